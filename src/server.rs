use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::audit::run_audit;
use crate::backfill::{BackfillOptions, run_backfill};
use crate::cli::ServeArgs;
use crate::cluster::run_dedupe;
use crate::constants::{DEFAULT_HTTP_BACKFILL_LIMIT, MAX_HTTP_BACKFILL_LIMIT};
use crate::geocode::NominatimClient;
use crate::pacing::Pacer;
use crate::search::{GeoSearchParams, search};
use crate::storage::StoragePaths;
use crate::store::{DuckDbStore, PractitionerStore, SharedStore};
use crate::transparency::TransparencyCriteria;

#[derive(Clone)]
pub struct AppState {
    /// Locked per store call, so reads go through while a batch waits on the pacer.
    store: SharedStore<DuckDbStore>,
    geocoder: Arc<NominatimClient>,
    /// One pacer for the whole process so concurrent triggers share the budget.
    pacer: Arc<Pacer>,
    batch_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        store: DuckDbStore,
        geocoder: NominatimClient,
        pacer: Pacer,
        batch_key: Option<String>,
    ) -> Self {
        Self {
            store: SharedStore::new(store),
            geocoder: Arc::new(geocoder),
            pacer: Arc::new(pacer),
            batch_key: batch_key
                .filter(|k| !k.trim().is_empty())
                .map(Arc::from),
        }
    }

    fn authorized(&self, key: Option<&str>) -> bool {
        match (self.batch_key.as_deref(), key) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/practitioners/search", get(api_search))
        .route("/api/practitioners/:id/transparency", get(api_transparency))
        .route("/api/admin/dedupe", post(api_dedupe))
        .route("/api/admin/batch-geocode", post(api_batch_geocode))
        .route("/api/admin/audit", get(api_audit))
        .layer(cors)
        .with_state(state)
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let paths = StoragePaths::new(&opts.store.data_dir);
    let store = paths.open_store()?;
    let geocoder = NominatimClient::new(&opts.geocoder.config())?;
    if opts.batch_key.is_none() {
        tracing::warn!("PIPELINE_BATCH_KEY not set; /api/admin routes will answer 401");
    }
    let state = AppState::new(store, geocoder, opts.geocoder.pacer(), opts.batch_key);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Reports with `error` set go out as 500 with the body intact.
fn report_response<T: Serialize>(report: &T, error: Option<&str>) -> Response {
    let status = if error.is_some() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

async fn api_search(
    State(st): State<AppState>,
    Query(p): Query<GeoSearchParams>,
) -> impl IntoResponse {
    let mut store = st.store.clone();
    let result = search(&mut store, &p);
    report_response(&result, result.error.as_deref())
}

async fn api_transparency(
    State(st): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    let mut store = st.store.clone();
    match store.fetch_by_id(&id) {
        Ok(Some(record)) => {
            Json(TransparencyCriteria::from_record(&record).score()).into_response()
        }
        Ok(None) => {
            (StatusCode::NOT_FOUND, format!("practitioner {id} not found")).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct AdminParams {
    key: Option<String>,
    dry_run: Option<bool>,
    limit: Option<usize>,
}

/// Requested HTTP batch size, defaulted and capped.
fn backfill_limit(requested: Option<usize>) -> usize {
    requested
        .unwrap_or(DEFAULT_HTTP_BACKFILL_LIMIT)
        .min(MAX_HTTP_BACKFILL_LIMIT)
}

async fn api_dedupe(
    State(st): State<AppState>,
    Query(p): Query<AdminParams>,
) -> impl IntoResponse {
    if !st.authorized(p.key.as_deref()) {
        return unauthorized();
    }
    let mut store = st.store.clone();
    let report = run_dedupe(&mut store, p.dry_run.unwrap_or(false));
    report_response(&report, report.error.as_deref())
}

async fn api_batch_geocode(
    State(st): State<AppState>,
    Query(p): Query<AdminParams>,
) -> impl IntoResponse {
    if !st.authorized(p.key.as_deref()) {
        return unauthorized();
    }
    let opts = BackfillOptions {
        limit: Some(backfill_limit(p.limit)),
        dry_run: p.dry_run.unwrap_or(false),
        show_progress: false,
    };
    let mut store = st.store.clone();
    let report = run_backfill(&mut store, st.geocoder.as_ref(), &st.pacer, opts).await;
    report_response(&report, report.error.as_deref())
}

async fn api_audit(
    State(st): State<AppState>,
    Query(p): Query<AdminParams>,
) -> impl IntoResponse {
    if !st.authorized(p.key.as_deref()) {
        return unauthorized();
    }
    let mut store = st.store.clone();
    let report = run_audit(&mut store);
    report_response(&report, report.error.as_deref())
}
