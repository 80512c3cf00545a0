pub mod duckdb_store;

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::record::{Coordinates, PractitionerRecord, Specialty};

pub use duckdb_store::DuckDbStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("practitioner {id} has invalid status: {message}")]
    InvalidStatus { id: String, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One archival decision: `ids` become `duplicate` pointing at `keeper_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchiveGroup {
    pub keeper_id: String,
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextFilters {
    /// Exact match on the stored specialty label.
    pub specialty: Option<String>,
    /// Case-insensitive substring over name or specialty.
    pub query: Option<String>,
    /// Case-insensitive substring over city.
    pub city: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearbyQuery {
    pub origin: Coordinates,
    pub radius_km: f64,
    pub filters: TextFilters,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    /// `intervention_count` descending (nulls last), then name.
    Pertinence,
    Alpha,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub filters: TextFilters,
    pub order: ListOrder,
    pub limit: usize,
    pub offset: usize,
}

/// A search row. `total_count` is the size of the whole matching set, repeated
/// on every row of the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRow {
    pub id: String,
    pub name: String,
    pub specialty: Option<String>,
    pub category: Specialty,
    pub city: Option<String>,
    pub region: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub intervention_count: Option<i64>,
    pub is_verified: bool,
    pub is_claimed: bool,
    pub distance_km: Option<f64>,
    #[serde(skip)]
    pub total_count: u64,
}

/// The narrow read/write contract the pipeline needs from the record store.
pub trait PractitionerStore {
    /// Every record with `status = active`.
    fn fetch_active(&mut self) -> StoreResult<Vec<PractitionerRecord>>;

    fn fetch_by_id(&mut self, id: &str) -> StoreResult<Option<PractitionerRecord>>;

    /// Marks every id in `groups` as `duplicate` in one all-or-nothing write.
    /// Only rows still `active` are touched. Returns the number of rows changed.
    fn mark_duplicates(&mut self, groups: &[ArchiveGroup]) -> StoreResult<usize>;

    /// Active records with either coordinate missing, oldest id first.
    fn fetch_backlog(&mut self, limit: Option<usize>) -> StoreResult<Vec<PractitionerRecord>>;

    fn count_backlog(&mut self) -> StoreResult<u64>;

    fn set_coordinates(&mut self, id: &str, coords: Coordinates) -> StoreResult<()>;

    fn search_nearby(&mut self, query: &NearbyQuery) -> StoreResult<Vec<SearchRow>>;

    /// Non-spatial listing. Returns the page and the total matching count.
    fn list(&mut self, query: &ListQuery) -> StoreResult<(Vec<SearchRow>, u64)>;
}

/// A store shared between request handlers. The lock is taken for one store
/// call at a time and never held across an `.await`, so a paced backfill
/// leaves the store free between lookups.
pub struct SharedStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> SharedStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, S>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl<S> Clone for SharedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PractitionerStore> PractitionerStore for SharedStore<S> {
    fn fetch_active(&mut self) -> StoreResult<Vec<PractitionerRecord>> {
        self.lock()?.fetch_active()
    }

    fn fetch_by_id(&mut self, id: &str) -> StoreResult<Option<PractitionerRecord>> {
        self.lock()?.fetch_by_id(id)
    }

    fn mark_duplicates(&mut self, groups: &[ArchiveGroup]) -> StoreResult<usize> {
        self.lock()?.mark_duplicates(groups)
    }

    fn fetch_backlog(&mut self, limit: Option<usize>) -> StoreResult<Vec<PractitionerRecord>> {
        self.lock()?.fetch_backlog(limit)
    }

    fn count_backlog(&mut self) -> StoreResult<u64> {
        self.lock()?.count_backlog()
    }

    fn set_coordinates(&mut self, id: &str, coords: Coordinates) -> StoreResult<()> {
        self.lock()?.set_coordinates(id, coords)
    }

    fn search_nearby(&mut self, query: &NearbyQuery) -> StoreResult<Vec<SearchRow>> {
        self.lock()?.search_nearby(query)
    }

    fn list(&mut self, query: &ListQuery) -> StoreResult<(Vec<SearchRow>, u64)> {
        self.lock()?.list(query)
    }
}
