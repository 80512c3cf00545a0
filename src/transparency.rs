use serde::Serialize;

use crate::record::PractitionerRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransparencyCriteria {
    pub is_verified: bool,
    pub has_phone: bool,
    pub has_region: bool,
    pub has_city: bool,
    pub has_website: bool,
    pub has_photo: bool,
    pub has_diploma: bool,
}

pub const WEIGHT_VERIFIED: u32 = 20;
pub const WEIGHT_PHONE: u32 = 15;
pub const WEIGHT_REGION: u32 = 25;
pub const WEIGHT_CITY: u32 = 15;
pub const WEIGHT_WEBSITE: u32 = 10;
pub const WEIGHT_PHOTO: u32 = 15;
pub const WEIGHT_DIPLOMA: u32 = 20;

pub const MAX_SCORE: u32 = WEIGHT_VERIFIED
    + WEIGHT_PHONE
    + WEIGHT_REGION
    + WEIGHT_CITY
    + WEIGHT_WEBSITE
    + WEIGHT_PHOTO
    + WEIGHT_DIPLOMA;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransparencyLevel {
    #[serde(rename = "Excellent")]
    Excellent,
    #[serde(rename = "Bon")]
    Good,
    #[serde(rename = "À compléter")]
    Incomplete,
}

impl TransparencyLevel {
    pub fn from_percentage(percentage: u32) -> Self {
        if percentage >= 70 {
            TransparencyLevel::Excellent
        } else if percentage >= 40 {
            TransparencyLevel::Good
        } else {
            TransparencyLevel::Incomplete
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransparencyScore {
    pub score: u32,
    pub max_score: u32,
    pub percentage: u32,
    pub level: TransparencyLevel,
}

impl TransparencyCriteria {
    pub fn from_record(r: &PractitionerRecord) -> Self {
        let region = r
            .region
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown"));
        Self {
            is_verified: r.is_verified,
            has_phone: r.has_phone(),
            has_region: region.is_some(),
            has_city: r.has_city(),
            has_website: r.has_website(),
            has_photo: r
                .photo_url
                .as_deref()
                .is_some_and(|v| !v.trim().is_empty()),
            has_diploma: r.has_diploma,
        }
    }

    pub fn score(&self) -> TransparencyScore {
        let weighted = [
            (self.is_verified, WEIGHT_VERIFIED),
            (self.has_phone, WEIGHT_PHONE),
            (self.has_region, WEIGHT_REGION),
            (self.has_city, WEIGHT_CITY),
            (self.has_website, WEIGHT_WEBSITE),
            (self.has_photo, WEIGHT_PHOTO),
            (self.has_diploma, WEIGHT_DIPLOMA),
        ];
        let score: u32 = weighted
            .iter()
            .filter(|(present, _)| *present)
            .map(|(_, w)| w)
            .sum();
        // Integer round-half-up of 100 * score / MAX_SCORE.
        let percentage = (200 * score + MAX_SCORE) / (2 * MAX_SCORE);
        TransparencyScore {
            score,
            max_score: MAX_SCORE,
            percentage,
            level: TransparencyLevel::from_percentage(percentage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_criteria_is_full_marks() {
        let s = TransparencyCriteria {
            is_verified: true,
            has_phone: true,
            has_region: true,
            has_city: true,
            has_website: true,
            has_photo: true,
            has_diploma: true,
        }
        .score();
        assert_eq!(s.score, 120);
        assert_eq!(s.max_score, 120);
        assert_eq!(s.percentage, 100);
        assert_eq!(s.level, TransparencyLevel::Excellent);
    }

    #[test]
    fn nothing_is_zero() {
        let s = TransparencyCriteria::default().score();
        assert_eq!((s.score, s.percentage), (0, 0));
        assert_eq!(s.level, TransparencyLevel::Incomplete);
        assert_eq!(serde_json::to_value(s.level).unwrap(), "À compléter");
    }

    #[test]
    fn verified_and_city_rounds_to_29() {
        let s = TransparencyCriteria {
            is_verified: true,
            has_city: true,
            ..Default::default()
        }
        .score();
        assert_eq!(s.score, 35);
        assert_eq!(s.percentage, 29);
        assert_eq!(s.level, TransparencyLevel::Incomplete);
    }

    #[test]
    fn level_boundaries() {
        assert_eq!(TransparencyLevel::from_percentage(70), TransparencyLevel::Excellent);
        assert_eq!(TransparencyLevel::from_percentage(69), TransparencyLevel::Good);
        assert_eq!(TransparencyLevel::from_percentage(40), TransparencyLevel::Good);
        assert_eq!(TransparencyLevel::from_percentage(39), TransparencyLevel::Incomplete);
    }

    #[test]
    fn half_percent_rounds_up() {
        // 15/120 = 12.5%
        let s = TransparencyCriteria {
            has_phone: true,
            ..Default::default()
        }
        .score();
        assert_eq!(s.percentage, 13);
    }

    #[test]
    fn criteria_from_record() {
        let mut r = PractitionerRecord::new("p1", "Jean");
        r.region = Some("unknown".into());
        r.city = Some("Caen".into());
        r.photo_url = Some("https://cdn/p1.jpg".into());
        r.has_diploma = true;
        let c = TransparencyCriteria::from_record(&r);
        assert!(!c.has_region);
        assert!(c.has_city && c.has_photo && c.has_diploma);
        assert!(!c.is_verified && !c.has_phone && !c.has_website);
        assert_eq!(c.score().score, 50);
        assert_eq!(c.score().level, TransparencyLevel::Good);
    }
}
