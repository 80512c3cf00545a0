use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::normalize::non_blank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Active,
    Duplicate,
    Archived,
    Pending,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Duplicate => "duplicate",
            Status::Archived => "archived",
            Status::Pending => "pending",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Status::Active),
            "duplicate" => Ok(Status::Duplicate),
            "archived" => Ok(Status::Archived),
            "pending" => Ok(Status::Pending),
            other => Err(anyhow!("unknown practitioner status {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    /// Pairs two nullable columns. A half-set pair is reported as `Err` so the
    /// caller can reject the row instead of guessing.
    pub fn from_pair(
        lat: Option<f64>,
        lng: Option<f64>,
    ) -> Result<Option<Self>, (Option<f64>, Option<f64>)> {
        match (lat, lng) {
            (Some(lat), Some(lng)) => Ok(Some(Self { lat, lng })),
            (None, None) => Ok(None),
            partial => Err(partial),
        }
    }
}

/// Directory categories the free-text `specialty` column is folded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    Osteopath,
    Farrier,
    Dentist,
    Wellness,
    Other,
}

impl Specialty {
    pub const ALL: [Specialty; 4] = [
        Specialty::Osteopath,
        Specialty::Farrier,
        Specialty::Dentist,
        Specialty::Wellness,
    ];

    pub fn slug(self) -> Option<&'static str> {
        match self {
            Specialty::Osteopath => Some("osteopathes"),
            Specialty::Farrier => Some("marechaux"),
            Specialty::Dentist => Some("dentistes"),
            Specialty::Wellness => Some("bien-etre"),
            Specialty::Other => None,
        }
    }

    /// Value stored in the `specialty` column for this category.
    pub fn db_label(self) -> Option<&'static str> {
        match self {
            Specialty::Osteopath => Some("Ostéopathe animalier"),
            Specialty::Farrier => Some("Maréchal-ferrant"),
            Specialty::Dentist => Some("Dentisterie équine"),
            Specialty::Wellness => Some("Praticien bien-être"),
            Specialty::Other => None,
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        let slug = slug.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.slug().is_some_and(|v| v.eq_ignore_ascii_case(slug)))
    }

    pub fn classify(raw: &str) -> Self {
        let lower = raw.to_lowercase();
        if lower.contains("ostéo") || lower.contains("osteo") {
            Specialty::Osteopath
        } else if lower.contains("maréchal")
            || lower.contains("marechal")
            || lower.contains("ferrant")
        {
            Specialty::Farrier
        } else if lower.contains("dentis") {
            Specialty::Dentist
        } else if lower.contains("bien-être") || lower.contains("bien-etre") {
            Specialty::Wellness
        } else {
            Specialty::Other
        }
    }
}

/// Resolves a search filter: category slugs map to their stored label, anything
/// else is used verbatim.
pub fn specialty_filter_value(input: &str) -> String {
    match Specialty::from_slug(input).and_then(Specialty::db_label) {
        Some(label) => label.to_string(),
        None => input.trim().to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PractitionerRecord {
    pub id: String,
    pub name: String,
    pub specialty: Option<String>,
    pub city: Option<String>,
    pub address_full: Option<String>,
    pub phone_norm: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub photo_url: Option<String>,
    pub has_diploma: bool,
    pub coordinates: Option<Coordinates>,
    pub status: Status,
    pub is_verified: bool,
    pub is_claimed: bool,
    pub intervention_count: Option<i64>,
    pub region: Option<String>,
    pub duplicate_of: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl PractitionerRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            specialty: None,
            city: None,
            address_full: None,
            phone_norm: None,
            website: None,
            description: None,
            photo_url: None,
            has_diploma: false,
            coordinates: None,
            status: Status::Active,
            is_verified: false,
            is_claimed: false,
            intervention_count: None,
            region: None,
            duplicate_of: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn has_website(&self) -> bool {
        non_blank(self.website.as_deref()).is_some()
    }

    pub fn has_phone(&self) -> bool {
        non_blank(self.phone_norm.as_deref()).is_some()
    }

    pub fn has_address(&self) -> bool {
        non_blank(self.address_full.as_deref()).is_some()
    }

    pub fn has_description(&self) -> bool {
        non_blank(self.description.as_deref()).is_some()
    }

    pub fn has_city(&self) -> bool {
        non_blank(self.city.as_deref()).is_some()
    }

    pub fn specialty_category(&self) -> Specialty {
        self.specialty
            .as_deref()
            .map(Specialty::classify)
            .unwrap_or(Specialty::Other)
    }
}
