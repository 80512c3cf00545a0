use std::future::Future;
use std::time::Duration;

use anyhow::{Context, bail};
use reqwest::Client;
use serde::Deserialize;

use crate::common::truncate_for_log;
use crate::normalize::non_blank;
use crate::record::Coordinates;

/// Free-text lookup input. At least one of `address`/`city` is non-empty,
/// which the constructors enforce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodeQuery {
    address: String,
    city: String,
}

impl GeocodeQuery {
    pub fn new(address: Option<&str>, city: Option<&str>) -> Option<Self> {
        let address = non_blank(address).unwrap_or_default();
        let city = non_blank(city).unwrap_or_default();
        if address.is_empty() && city.is_empty() {
            return None;
        }
        Some(Self {
            address: address.to_string(),
            city: city.to_string(),
        })
    }

    pub fn city_only(city: &str) -> Option<Self> {
        Self::new(None, Some(city))
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    /// `"<address>, <city>"`, or whichever part is present.
    pub fn search_text(&self) -> String {
        match (self.address.is_empty(), self.city.is_empty()) {
            (false, false) => format!("{}, {}", self.address, self.city),
            (false, true) => self.address.clone(),
            _ => self.city.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("geocoder unreachable: {0}")]
    Transport(String),
    #[error("geocoder returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("geocoder payload malformed: {0}")]
    Payload(String),
}

#[derive(Debug)]
pub enum GeocodeOutcome {
    Found(Coordinates),
    NotFound,
    /// No answer because the lookup itself failed. Callers treat this as
    /// `NotFound`; it stays distinct so outages are visible in logs and reports.
    Unavailable(GeocodeError),
}

pub trait Geocoder: Send + Sync {
    /// Exactly one outbound lookup for the single best match.
    fn geocode(&self, query: &GeocodeQuery) -> impl Future<Output = GeocodeOutcome> + Send;
}

#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    /// Optional `countrycodes` restriction, e.g. `fr`.
    pub country_codes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimMatch {
    lat: String,
    lon: String,
}

pub struct NominatimClient {
    client: Client,
    base_url: String,
    country_codes: Option<String>,
}

impl NominatimClient {
    pub fn new(config: &GeocoderConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("geocoder requests must carry an identifying User-Agent");
        }
        let client = Client::builder()
            .user_agent(config.user_agent.trim())
            .timeout(config.timeout)
            .build()
            .context("Failed creating geocoder HTTP client")?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            country_codes: config
                .country_codes
                .as_deref()
                .and_then(|c| non_blank(Some(c)))
                .map(ToOwned::to_owned),
        })
    }

    async fn lookup(&self, query: &GeocodeQuery) -> Result<Option<Coordinates>, GeocodeError> {
        let text = query.search_text();
        let mut params: Vec<(&str, &str)> =
            vec![("format", "json"), ("q", text.as_str()), ("limit", "1")];
        if let Some(cc) = self.country_codes.as_deref() {
            params.push(("countrycodes", cc));
        }

        let resp = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GeocodeError::Status {
                status: status.as_u16(),
                body: truncate_for_log(&body),
            });
        }

        let matches: Vec<NominatimMatch> = resp
            .json()
            .await
            .map_err(|e| GeocodeError::Payload(e.to_string()))?;
        let Some(first) = matches.first() else {
            return Ok(None);
        };
        let lat: f64 = first
            .lat
            .trim()
            .parse()
            .map_err(|_| GeocodeError::Payload(format!("lat {:?} is not a number", first.lat)))?;
        let lng: f64 = first
            .lon
            .trim()
            .parse()
            .map_err(|_| GeocodeError::Payload(format!("lon {:?} is not a number", first.lon)))?;
        Ok(Some(Coordinates { lat, lng }))
    }
}

impl Geocoder for NominatimClient {
    async fn geocode(&self, query: &GeocodeQuery) -> GeocodeOutcome {
        match self.lookup(query).await {
            Ok(Some(c)) => GeocodeOutcome::Found(c),
            Ok(None) => GeocodeOutcome::NotFound,
            Err(e) => GeocodeOutcome::Unavailable(e),
        }
    }
}
