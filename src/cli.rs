use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::constants::{
    DEFAULT_GEOCODER_TIMEOUT_SECS, DEFAULT_GEOCODER_URL, DEFAULT_GEOCODER_USER_AGENT,
    DEFAULT_PACING_MS, DEFAULT_PAGE_SIZE, DEFAULT_RADIUS_KM, PUBLIC_NOMINATIM_HOST,
};
use crate::geocode::GeocoderConfig;
use crate::pacing::Pacer;

const DEFAULT_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");

#[derive(Parser, Debug)]
#[command(name = "practitioner-pipeline")]
#[command(about = "Equine practitioner dedupe, geocoding and search", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Group active records by normalized key and soft-mark duplicates.
    Dedupe(DedupeArgs),
    /// Geocode active practitioners that have no coordinates yet.
    Backfill(BackfillArgs),
    /// Run one geo-radius search or filtered listing and print the page.
    Search(SearchArgs),
    /// Print the transparency score of one practitioner.
    Score(ScoreArgs),
    /// Report data-quality issues over active practitioners (read-only).
    Audit(AuditArgs),
    /// Load practitioner rows from a .csv or .parquet file.
    Import(ImportArgs),
    /// Serve the HTTP API.
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    /// Data directory holding the DuckDB database.
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GeocoderArgs {
    /// Nominatim-compatible search endpoint.
    #[arg(long, env = "GEOCODER_URL", default_value = DEFAULT_GEOCODER_URL)]
    pub geocoder_url: String,

    /// Identifying User-Agent sent with every lookup (required by the Nominatim usage policy).
    #[arg(long, env = "GEOCODER_USER_AGENT", default_value = DEFAULT_GEOCODER_USER_AGENT)]
    pub user_agent: String,

    /// Restrict matches to these ISO country codes, e.g. `fr`.
    #[arg(long)]
    pub country_codes: Option<String>,

    /// Pause after every outbound lookup, in milliseconds. Raised to the default
    /// when the public Nominatim instance is used.
    #[arg(long, default_value_t = DEFAULT_PACING_MS)]
    pub pacing_ms: u64,

    /// Per-request timeout.
    #[arg(long, default_value_t = DEFAULT_GEOCODER_TIMEOUT_SECS)]
    pub timeout_secs: u64,
}

impl GeocoderArgs {
    pub fn config(&self) -> GeocoderConfig {
        GeocoderConfig {
            base_url: self.geocoder_url.clone(),
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            country_codes: self.country_codes.clone(),
        }
    }

    pub fn pacer(&self) -> Pacer {
        let mut pacing_ms = self.pacing_ms;
        if pacing_ms < DEFAULT_PACING_MS && self.geocoder_url.contains(PUBLIC_NOMINATIM_HOST) {
            tracing::warn!(
                "--pacing-ms {pacing_ms} is below the {DEFAULT_PACING_MS} ms floor for \
                 {PUBLIC_NOMINATIM_HOST}, using {DEFAULT_PACING_MS} ms"
            );
            pacing_ms = DEFAULT_PACING_MS;
        }
        Pacer::new(Duration::from_millis(pacing_ms))
    }
}

#[derive(clap::Args, Debug, Clone)]
pub struct DedupeArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Plan and report without writing.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct BackfillArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub geocoder: GeocoderArgs,

    /// Max candidates this run. Omit to work through the whole backlog.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Look up coordinates but persist nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,

    /// Hide the progress bar.
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, allow_hyphen_values = true, requires = "lng")]
    pub lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    pub lng: Option<f64>,

    #[arg(long, default_value_t = DEFAULT_RADIUS_KM)]
    pub radius_km: f64,

    /// Category slug (osteopathes, marechaux, dentistes, bien-etre) or exact label.
    #[arg(long)]
    pub specialty: Option<String>,

    /// Substring over name or specialty.
    #[arg(long)]
    pub query: Option<String>,

    /// Substring over city.
    #[arg(long)]
    pub city: Option<String>,

    /// `pertinence` or `alpha` (listing only).
    #[arg(long, default_value = "pertinence")]
    pub sort: String,

    #[arg(long, default_value_t = 1)]
    pub page: usize,

    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ScoreArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Practitioner id.
    pub id: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AuditArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    /// Source file (.csv or .parquet) with at least `id` and `name` columns.
    #[arg(long)]
    pub input: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub geocoder: GeocoderArgs,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8787)]
    pub port: u16,

    /// Shared secret for the /api/admin routes. Without it they always answer 401.
    #[arg(long, env = "PIPELINE_BATCH_KEY", hide_env_values = true)]
    pub batch_key: Option<String>,
}
