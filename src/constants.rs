pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_GEOCODER_USER_AGENT: &str = "equine-directory-geocoder/1.0";
pub const NOMINATIM_USAGE_POLICY_URL: &str =
    "https://operations.osmfoundation.org/policies/nominatim/";
/// Lookups against this host never pause for less than `DEFAULT_PACING_MS`.
pub const PUBLIC_NOMINATIM_HOST: &str = "nominatim.openstreetmap.org";

/// Nominatim allows one request per second; keep a margin.
pub const DEFAULT_PACING_MS: u64 = 1100;
pub const DEFAULT_GEOCODER_TIMEOUT_SECS: u64 = 10;

/// Addresses at or below this many characters are treated as placeholders.
pub const MIN_ADDRESS_CHARS: usize = 5;
pub const ADDRESS_PLACEHOLDER_MARKERS: &[&str] = &["·", "ouvre à"];

pub const DEFAULT_HTTP_BACKFILL_LIMIT: usize = 10;
/// One paced HTTP batch stays within about a minute of lookups.
pub const MAX_HTTP_BACKFILL_LIMIT: usize = 50;
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;
pub const DEFAULT_RADIUS_KM: f64 = 50.0;

pub const DUCKDB_FILE_NAME: &str = "practitioners.duckdb";
