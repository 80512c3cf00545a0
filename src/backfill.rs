//! Coordinate backfill for active practitioners.
//!
//! The backlog is the store predicate "active and missing coordinates", queried
//! fresh on every run. No cursor is kept, so a run can be repeated (for example
//! on a schedule, in bounded chunks) until the backlog is empty.

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::constants::{ADDRESS_PLACEHOLDER_MARKERS, MIN_ADDRESS_CHARS};
use crate::geocode::{GeocodeOutcome, GeocodeQuery, Geocoder};
use crate::normalize::non_blank;
use crate::pacing::Pacer;
use crate::record::{Coordinates, PractitionerRecord};
use crate::store::PractitionerStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct BackfillOptions {
    /// Max candidates for this run; `None` takes the whole backlog.
    pub limit: Option<usize>,
    /// Look up but never write.
    pub dry_run: bool,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Updated,
    NotFound,
    SkippedNoAddress,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemResult {
    pub id: String,
    pub name: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub used_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub dry_run: bool,
    pub processed: usize,
    pub updated: usize,
    pub not_found: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Lookups that failed in transport rather than finding nothing.
    pub lookup_errors: usize,
    /// Backlog size after the run, from a fresh count.
    pub remaining: Option<u64>,
    pub results: Vec<ItemResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// False for scraped placeholders such as opening-hours snippets.
pub fn address_looks_real(address: &str) -> bool {
    let trimmed = address.trim();
    if trimmed.chars().count() <= MIN_ADDRESS_CHARS {
        return false;
    }
    let lower = trimmed.to_lowercase();
    !ADDRESS_PLACEHOLDER_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Primary query plus the city-only retry, when one applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    pub primary: GeocodeQuery,
    pub fallback: Option<GeocodeQuery>,
}

/// `None` means there is nothing to look up.
pub fn plan_queries(r: &PractitionerRecord) -> Option<QueryPlan> {
    let city = non_blank(r.city.as_deref());
    let address = non_blank(r.address_full.as_deref()).filter(|a| address_looks_real(a));

    match (address, city) {
        (Some(address), city) => Some(QueryPlan {
            primary: GeocodeQuery::new(Some(address), city)?,
            fallback: city.and_then(GeocodeQuery::city_only),
        }),
        (None, Some(city)) => Some(QueryPlan {
            primary: GeocodeQuery::city_only(city)?,
            fallback: None,
        }),
        (None, None) => None,
    }
}

async fn paced_lookup<G: Geocoder>(
    geocoder: &G,
    pacer: &Pacer,
    query: &GeocodeQuery,
    report: &mut BackfillReport,
) -> Option<Coordinates> {
    match pacer.run(geocoder.geocode(query)).await {
        GeocodeOutcome::Found(c) => Some(c),
        GeocodeOutcome::NotFound => None,
        GeocodeOutcome::Unavailable(e) => {
            tracing::warn!("geocoder failure for {:?}: {e}", query.search_text());
            report.lookup_errors += 1;
            None
        }
    }
}

fn progress_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let progress = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [geocode {elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    ) {
        progress.set_style(style.progress_chars("=> "));
    }
    progress
}

/// One backfill pass. Never fails outright: a failed candidate read aborts
/// with `error` set, a failed per-record write marks that item `failed` and
/// the run moves on.
pub async fn run_backfill<S, G>(
    store: &mut S,
    geocoder: &G,
    pacer: &Pacer,
    opts: BackfillOptions,
) -> BackfillReport
where
    S: PractitionerStore,
    G: Geocoder,
{
    let mut report = BackfillReport {
        dry_run: opts.dry_run,
        ..BackfillReport::default()
    };

    let candidates = match store.fetch_backlog(opts.limit) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("backfill aborted, could not load candidates: {e}");
            report.error = Some(e.to_string());
            return report;
        }
    };
    tracing::info!(
        "{} practitioners without coordinates selected (limit={:?}, pacing={:?})",
        candidates.len(),
        opts.limit,
        pacer.interval()
    );

    let progress = progress_bar(candidates.len(), opts.show_progress);
    for (i, p) in candidates.iter().enumerate() {
        report.processed += 1;
        progress.inc(1);

        let Some(plan) = plan_queries(p) else {
            tracing::info!(
                "[{}/{}] {} ({}): no address or city, skipping",
                i + 1,
                candidates.len(),
                p.name,
                p.id
            );
            report.skipped += 1;
            report.results.push(ItemResult {
                id: p.id.clone(),
                name: p.name.clone(),
                status: ItemStatus::SkippedNoAddress,
                query: None,
                used_fallback: false,
                lat: None,
                lng: None,
                error: None,
            });
            continue;
        };

        let mut item = ItemResult {
            id: p.id.clone(),
            name: p.name.clone(),
            status: ItemStatus::NotFound,
            query: Some(plan.primary.search_text()),
            used_fallback: false,
            lat: None,
            lng: None,
            error: None,
        };

        let mut coords = paced_lookup(geocoder, pacer, &plan.primary, &mut report).await;
        if coords.is_none() {
            if let Some(fallback) = &plan.fallback {
                tracing::debug!("retrying {} with city only: {}", p.id, fallback.city());
                item.used_fallback = true;
                item.query = Some(fallback.search_text());
                coords = paced_lookup(geocoder, pacer, fallback, &mut report).await;
            }
        }

        match coords {
            Some(c) => {
                item.lat = Some(c.lat);
                item.lng = Some(c.lng);
                if opts.dry_run {
                    item.status = ItemStatus::Updated;
                    report.updated += 1;
                } else {
                    match store.set_coordinates(&p.id, c) {
                        Ok(()) => {
                            item.status = ItemStatus::Updated;
                            report.updated += 1;
                        }
                        Err(e) => {
                            tracing::warn!("could not save coordinates for {}: {e}", p.id);
                            item.status = ItemStatus::Failed;
                            item.error = Some(e.to_string());
                            report.failed += 1;
                        }
                    }
                }
                tracing::info!(
                    "[{}/{}] {} ({}): {:.5}, {:.5}",
                    i + 1,
                    candidates.len(),
                    p.name,
                    p.id,
                    c.lat,
                    c.lng
                );
            }
            None => {
                tracing::info!(
                    "[{}/{}] {} ({}): not found",
                    i + 1,
                    candidates.len(),
                    p.name,
                    p.id
                );
                report.not_found += 1;
            }
        }
        report.results.push(item);

        progress.set_message(format!(
            "updated={} not_found={} skipped={} failed={}",
            report.updated, report.not_found, report.skipped, report.failed
        ));
    }
    progress.finish_and_clear();

    match store.count_backlog() {
        Ok(n) => report.remaining = Some(n),
        Err(e) => {
            tracing::error!("could not count remaining backlog: {e}");
            report.error = Some(e.to_string());
        }
    }

    tracing::info!(
        "backfill: processed={} updated={} not_found={} skipped={} failed={} \
         lookup_errors={} remaining={:?}",
        report.processed,
        report.updated,
        report.not_found,
        report.skipped,
        report.failed,
        report.lookup_errors,
        report.remaining
    );
    report
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::geocode::GeocodeError;
    use crate::record::Status;
    use crate::store::{
        ArchiveGroup, DuckDbStore, ListQuery, NearbyQuery, SearchRow, StoreError, StoreResult,
    };

    const CAEN: Coordinates = Coordinates { lat: 49.1829, lng: -0.3707 };
    const RUE_X: Coordinates = Coordinates { lat: 49.1801, lng: -0.3655 };

    /// Answers from a fixed table keyed by search text; `"down"` fails in
    /// transport. Records every text it was asked for.
    #[derive(Default)]
    struct TableGeocoder {
        answers: HashMap<String, Coordinates>,
        calls: Mutex<Vec<String>>,
    }

    impl TableGeocoder {
        fn with(answers: &[(&str, Coordinates)]) -> Self {
            Self {
                answers: answers.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Geocoder for TableGeocoder {
        async fn geocode(&self, query: &GeocodeQuery) -> GeocodeOutcome {
            let text = query.search_text();
            self.calls.lock().unwrap().push(text.clone());
            if text.contains("down") {
                return GeocodeOutcome::Unavailable(GeocodeError::Transport("refused".into()));
            }
            match self.answers.get(&text) {
                Some(c) => GeocodeOutcome::Found(*c),
                None => GeocodeOutcome::NotFound,
            }
        }
    }

    fn rec(id: &str, address: Option<&str>, city: Option<&str>) -> PractitionerRecord {
        let mut r = PractitionerRecord::new(id, format!("Practitioner {id}"));
        r.address_full = address.map(Into::into);
        r.city = city.map(Into::into);
        r
    }

    fn store_with(records: &[PractitionerRecord]) -> DuckDbStore {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        for r in records {
            store.insert(r).unwrap();
        }
        store
    }

    fn opts() -> BackfillOptions {
        BackfillOptions::default()
    }

    #[test]
    fn placeholder_addresses_are_rejected() {
        assert!(address_looks_real("12 Rue X"));
        assert!(!address_looks_real("Caen"));
        assert!(!address_looks_real("Lun · Mar · Mer"));
        assert!(!address_looks_real("Ouvre à 09:00 demain"));
    }

    #[test]
    fn query_plans() {
        let p = plan_queries(&rec("a", Some("12 Rue X"), Some("Caen"))).unwrap();
        assert_eq!(p.primary.search_text(), "12 Rue X, Caen");
        assert_eq!(p.fallback.unwrap().search_text(), "Caen");

        let p = plan_queries(&rec("b", Some("Lun · Mar"), Some("Caen"))).unwrap();
        assert_eq!(p.primary.search_text(), "Caen");
        assert!(p.fallback.is_none());

        let p = plan_queries(&rec("c", Some("12 Rue X"), None)).unwrap();
        assert_eq!(p.primary.search_text(), "12 Rue X");
        assert!(p.fallback.is_none());

        assert!(plan_queries(&rec("d", Some(""), Some(" "))).is_none());
        assert!(plan_queries(&rec("e", Some("Lun · Mar"), None)).is_none());
    }

    #[tokio::test]
    async fn match_is_persisted_and_reported_updated() {
        let mut store = store_with(&[rec("a", Some("12 Rue X"), Some("Caen"))]);
        let geocoder = TableGeocoder::with(&[("12 Rue X, Caen", RUE_X)]);
        let pacer = Pacer::new(Duration::ZERO);

        let report = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        assert_eq!(report.error, None);
        assert_eq!((report.processed, report.updated), (1, 1));
        assert_eq!(report.results[0].status, ItemStatus::Updated);
        assert_eq!(report.remaining, Some(0));

        let a = store.fetch_by_id("a").unwrap().unwrap();
        assert_eq!(a.coordinates, Some(RUE_X));
        assert_eq!(geocoder.calls(), ["12 Rue X, Caen"]);
    }

    #[tokio::test]
    async fn empty_address_and_city_is_skipped_without_lookup() {
        let mut store = store_with(&[rec("a", Some(""), Some(""))]);
        let geocoder = TableGeocoder::default();
        let pacer = Pacer::new(Duration::ZERO);

        let report = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.results[0].status, ItemStatus::SkippedNoAddress);
        assert!(geocoder.calls().is_empty());
        assert_eq!(report.remaining, Some(1));
    }

    #[tokio::test]
    async fn city_fallback_after_address_miss() {
        let mut store = store_with(&[rec("a", Some("Lieu-dit Inconnu"), Some("Caen"))]);
        let geocoder = TableGeocoder::with(&[("Caen", CAEN)]);
        let pacer = Pacer::new(Duration::ZERO);

        let report = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        assert_eq!(report.updated, 1);
        assert!(report.results[0].used_fallback);
        assert_eq!(geocoder.calls(), ["Lieu-dit Inconnu, Caen", "Caen"]);
        let a = store.fetch_by_id("a").unwrap().unwrap();
        assert_eq!(a.coordinates, Some(CAEN));
    }

    #[tokio::test]
    async fn transport_failure_counts_as_not_found_and_lookup_error() {
        let mut store = store_with(&[rec("a", Some("1 rue down"), None)]);
        let geocoder = TableGeocoder::default();
        let pacer = Pacer::new(Duration::ZERO);

        let report = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        assert_eq!(report.not_found, 1);
        assert_eq!(report.lookup_errors, 1);
        assert_eq!(report.error, None);
    }

    #[tokio::test]
    async fn all_misses_rerun_is_an_identical_no_op() {
        let records = [
            rec("a", Some("12 Rue X"), Some("Nowhere")),
            rec("b", None, Some("Atlantis")),
            rec("c", None, None),
        ];
        let mut store = store_with(&records);
        let geocoder = TableGeocoder::default();
        let pacer = Pacer::new(Duration::ZERO);

        let first = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        let second = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        assert_eq!(first, second);
        assert_eq!(first.not_found, 2);
        assert_eq!(first.skipped, 1);
        assert_eq!(first.remaining, Some(3));
        for r in &records {
            assert_eq!(store.fetch_by_id(&r.id).unwrap().unwrap().coordinates, None);
        }
    }

    #[tokio::test]
    async fn limit_bounds_the_chunk_and_remaining_is_recounted() {
        let mut store = store_with(&[
            rec("a", None, Some("Caen")),
            rec("b", None, Some("Caen")),
            rec("c", None, Some("Caen")),
        ]);
        let geocoder = TableGeocoder::with(&[("Caen", CAEN)]);
        let pacer = Pacer::new(Duration::ZERO);

        let report = run_backfill(
            &mut store,
            &geocoder,
            &pacer,
            BackfillOptions {
                limit: Some(2),
                ..opts()
            },
        )
        .await;
        assert_eq!(report.processed, 2);
        assert_eq!(report.remaining, Some(1));

        let next = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        assert_eq!(next.processed, 1);
        assert_eq!(next.remaining, Some(0));
        // Records that already have both coordinates are never reselected.
        assert_eq!(geocoder.calls().len(), 3);
    }

    #[tokio::test]
    async fn dry_run_persists_nothing() {
        let mut store = store_with(&[rec("a", None, Some("Caen"))]);
        let geocoder = TableGeocoder::with(&[("Caen", CAEN)]);
        let pacer = Pacer::new(Duration::ZERO);

        let report = run_backfill(
            &mut store,
            &geocoder,
            &pacer,
            BackfillOptions {
                dry_run: true,
                ..opts()
            },
        )
        .await;
        assert!(report.dry_run);
        assert_eq!(report.updated, 1);
        assert_eq!(report.remaining, Some(1));
        assert_eq!(store.fetch_by_id("a").unwrap().unwrap().coordinates, None);
    }

    #[tokio::test]
    async fn every_lookup_is_paced() {
        let mut store = store_with(&[
            rec("a", Some("Lieu-dit Inconnu"), Some("Caen")),
            rec("b", None, Some("Caen")),
            rec("c", None, None),
        ]);
        let geocoder = TableGeocoder::with(&[("Caen", CAEN)]);
        let interval = Duration::from_millis(25);
        let pacer = Pacer::new(interval);

        let start = std::time::Instant::now();
        let report = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        assert_eq!(geocoder.calls().len(), 3);
        assert_eq!(report.updated, 2);
        assert!(start.elapsed() >= interval * 3, "took {:?}", start.elapsed());
    }

    fn in_backlog(r: &PractitionerRecord) -> bool {
        r.status == Status::Active && r.coordinates.is_none()
    }

    /// Backlog held in memory; writes to `reject_id` fail.
    struct MemStore {
        records: Vec<PractitionerRecord>,
        reject_id: Option<String>,
        fail_read: bool,
    }

    impl PractitionerStore for MemStore {
        fn fetch_active(&mut self) -> StoreResult<Vec<PractitionerRecord>> {
            Ok(self.records.clone())
        }
        fn fetch_by_id(&mut self, id: &str) -> StoreResult<Option<PractitionerRecord>> {
            Ok(self.records.iter().find(|r| r.id == id).cloned())
        }
        fn mark_duplicates(&mut self, _: &[ArchiveGroup]) -> StoreResult<usize> {
            Ok(0)
        }
        fn fetch_backlog(&mut self, limit: Option<usize>) -> StoreResult<Vec<PractitionerRecord>> {
            if self.fail_read {
                return Err(StoreError::Read("timeout".into()));
            }
            let backlog = self.records.iter().filter(|r| in_backlog(r)).cloned();
            Ok(match limit {
                Some(n) => backlog.take(n).collect(),
                None => backlog.collect(),
            })
        }
        fn count_backlog(&mut self) -> StoreResult<u64> {
            Ok(self.records.iter().filter(|r| in_backlog(r)).count() as u64)
        }
        fn set_coordinates(&mut self, id: &str, coords: Coordinates) -> StoreResult<()> {
            if self.reject_id.as_deref() == Some(id) {
                return Err(StoreError::Write(format!("row {id} locked")));
            }
            if let Some(r) = self.records.iter_mut().find(|r| r.id == id) {
                r.coordinates = Some(coords);
            }
            Ok(())
        }
        fn search_nearby(&mut self, _: &NearbyQuery) -> StoreResult<Vec<SearchRow>> {
            Ok(Vec::new())
        }
        fn list(&mut self, _: &ListQuery) -> StoreResult<(Vec<SearchRow>, u64)> {
            Ok((Vec::new(), 0))
        }
    }

    #[tokio::test]
    async fn write_failure_marks_item_and_continues() {
        let mut store = MemStore {
            records: vec![rec("a", None, Some("Caen")), rec("b", None, Some("Caen"))],
            reject_id: Some("a".into()),
            fail_read: false,
        };
        let geocoder = TableGeocoder::with(&[("Caen", CAEN)]);
        let pacer = Pacer::new(Duration::ZERO);

        let report = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.results[0].status, ItemStatus::Failed);
        assert!(report.results[0].error.as_deref().unwrap().contains("locked"));
        assert_eq!(report.remaining, Some(1));
        assert_eq!(report.error, None);
    }

    #[tokio::test]
    async fn candidate_read_failure_aborts_before_any_lookup() {
        let mut store = MemStore {
            records: vec![rec("a", None, Some("Caen"))],
            reject_id: None,
            fail_read: true,
        };
        let geocoder = TableGeocoder::with(&[("Caen", CAEN)]);
        let pacer = Pacer::new(Duration::ZERO);

        let report = run_backfill(&mut store, &geocoder, &pacer, opts()).await;
        assert!(report.error.as_deref().unwrap().contains("timeout"));
        assert_eq!(report.processed, 0);
        assert!(geocoder.calls().is_empty());
    }
}
