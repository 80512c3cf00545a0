//! Read-only data-quality audit over the active practitioner set.

use serde::Serialize;

use crate::cluster;
use crate::normalize::non_blank;
use crate::record::PractitionerRecord;
use crate::store::PractitionerStore;

const MAX_EXAMPLES: usize = 3;
/// Field checks feeding the quality score (the duplicate finding is not one).
const SCORED_CHECKS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub category: &'static str,
    pub issue: &'static str,
    pub severity: Severity,
    pub count: usize,
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditReport {
    pub active_records: usize,
    pub findings: Vec<Finding>,
    pub total_issues: usize,
    /// Share of passed field checks, 0..=100. `None` for an empty table.
    pub quality_score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditReport {
    pub fn verdict(&self) -> &'static str {
        match self.quality_score {
            None => "no active practitioners",
            Some(s) if s >= 80 => "good data quality",
            Some(s) if s >= 60 => "data needs improvement",
            Some(_) => "poor data quality, cleanup required",
        }
    }
}

fn check(
    records: &[PractitionerRecord],
    category: &'static str,
    issue: &'static str,
    severity: Severity,
    failing: impl Fn(&PractitionerRecord) -> bool,
) -> Finding {
    let hits: Vec<&PractitionerRecord> = records.iter().filter(|r| failing(*r)).collect();
    Finding {
        category,
        issue,
        severity,
        count: hits.len(),
        examples: hits
            .iter()
            .take(MAX_EXAMPLES)
            .map(|r| r.id.clone())
            .collect(),
    }
}

pub fn audit_records(records: &[PractitionerRecord]) -> AuditReport {
    let mut findings = vec![
        check(records, "identity", "missing name", Severity::Critical, |r| {
            non_blank(Some(&r.name)).is_none()
        }),
        check(records, "location", "missing city", Severity::Warning, |r| {
            !r.has_city()
        }),
        check(records, "contact", "missing phone number", Severity::Warning, |r| {
            !r.has_phone()
        }),
        check(records, "geolocation", "missing coordinates", Severity::Warning, |r| {
            r.coordinates.is_none()
        }),
        check(records, "location", "region is \"unknown\"", Severity::Warning, |r| {
            r.region
                .as_deref()
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("unknown"))
        }),
        check(records, "online presence", "no website", Severity::Info, |r| {
            !r.has_website()
        }),
        check(records, "location", "region is null", Severity::Info, |r| {
            r.region.is_none()
        }),
    ];
    let total_issues: usize = findings.iter().map(|f| f.count).sum();
    let quality_score = (!records.is_empty()).then(|| {
        let checks = (records.len() * SCORED_CHECKS) as f64;
        ((checks - total_issues as f64) / checks * 100.0).round() as u32
    });

    let cluster_plan = cluster::plan(records);
    findings.push(Finding {
        category: "duplicates",
        issue: "duplicate groups",
        severity: Severity::Warning,
        count: cluster_plan.decisions.len(),
        examples: cluster_plan
            .decisions
            .iter()
            .take(MAX_EXAMPLES)
            .map(|d| d.kept.id.clone())
            .collect(),
    });
    findings.sort_by_key(|f| f.severity);

    AuditReport {
        active_records: records.len(),
        findings,
        total_issues,
        quality_score,
        error: None,
    }
}

pub fn run_audit<S: PractitionerStore>(store: &mut S) -> AuditReport {
    let records = match store.fetch_active() {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("audit aborted, could not load active practitioners: {e}");
            return AuditReport {
                error: Some(e.to_string()),
                ..AuditReport::default()
            };
        }
    };
    tracing::info!("Analyzing {} active practitioners", records.len());
    let report = audit_records(&records);
    for f in report.findings.iter().filter(|f| f.count > 0) {
        tracing::info!("{:?} {}: {} ({})", f.severity, f.issue, f.count, f.examples.join(", "));
    }
    tracing::info!(
        "audit: issues={} quality_score={:?} ({})",
        report.total_issues,
        report.quality_score,
        report.verdict()
    );
    report
}
