use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PAGE_SIZE, DEFAULT_RADIUS_KM, MAX_PAGE_SIZE};
use crate::record::{Coordinates, specialty_filter_value};
use crate::store::{ListOrder, ListQuery, NearbyQuery, PractitionerStore, SearchRow, TextFilters};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeoSearchParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    /// Category slug (`marechaux`) or stored label.
    pub specialty: Option<String>,
    #[serde(alias = "q")]
    pub query: Option<String>,
    pub city: Option<String>,
    /// `alpha`, anything else means pertinence. Ignored for spatial search.
    pub sort: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResult {
    pub data: Vec<SearchRow>,
    pub count: u64,
    pub error: Option<String>,
}

impl SearchResult {
    fn failed(message: String) -> Self {
        Self {
            data: Vec::new(),
            count: 0,
            error: Some(message),
        }
    }
}

fn parse_sort(s: Option<&str>) -> ListOrder {
    match s.unwrap_or("pertinence").trim().to_ascii_lowercase().as_str() {
        "alpha" => ListOrder::Alpha,
        _ => ListOrder::Pertinence,
    }
}

fn origin(params: &GeoSearchParams) -> Result<Option<Coordinates>, String> {
    match (params.lat, params.lng) {
        (None, None) => Ok(None),
        (Some(lat), Some(lng)) => {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(format!("coordinates out of range: {lat}, {lng}"));
            }
            Ok(Some(Coordinates { lat, lng }))
        }
        _ => Err("lat and lng must be supplied together".to_string()),
    }
}

/// Geo-radius search when an origin is given, otherwise a filtered listing.
/// Store failures come back in `error` with an empty page.
pub fn search<S: PractitionerStore>(store: &mut S, params: &GeoSearchParams) -> SearchResult {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = (page - 1).saturating_mul(page_size);

    let filters = TextFilters {
        specialty: params
            .specialty
            .as_deref()
            .map(specialty_filter_value)
            .filter(|s| !s.is_empty()),
        query: params.query.clone(),
        city: params.city.clone(),
    };

    let origin = match origin(params) {
        Ok(o) => o,
        Err(e) => return SearchResult::failed(e),
    };

    match origin {
        Some(origin) => {
            let radius_km = params.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
            if !radius_km.is_finite() || radius_km <= 0.0 {
                return SearchResult::failed(format!("radius_km must be positive, got {radius_km}"));
            }
            let q = NearbyQuery {
                origin,
                radius_km,
                filters,
                limit: page_size,
                offset,
            };
            match store.search_nearby(&q) {
                Ok(rows) => {
                    let count = rows.first().map(|r| r.total_count).unwrap_or(0);
                    SearchResult {
                        data: rows,
                        count,
                        error: None,
                    }
                }
                Err(e) => {
                    tracing::error!("nearby search failed: {e}");
                    SearchResult::failed(e.to_string())
                }
            }
        }
        None => {
            let q = ListQuery {
                filters,
                order: parse_sort(params.sort.as_deref()),
                limit: page_size,
                offset,
            };
            match store.list(&q) {
                Ok((rows, count)) => SearchResult {
                    data: rows,
                    count,
                    error: None,
                },
                Err(e) => {
                    tracing::error!("practitioner listing failed: {e}");
                    SearchResult::failed(e.to_string())
                }
            }
        }
    }
}
