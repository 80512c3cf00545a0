//! Duplicate detection over the live practitioner set.
//!
//! Records are grouped by an exact key made of the normalized name plus one
//! tiebreaker field (phone, else city, else the record's own id). Within each
//! group the most complete record is kept and the rest are soft-marked
//! `duplicate`.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::normalize::normalize;
use crate::record::PractitionerRecord;
use crate::store::{ArchiveGroup, PractitionerStore};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tiebreaker {
    Phone(String),
    City(String),
    /// No phone and no city: the record only ever matches itself.
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterKey {
    pub name: String,
    pub tiebreaker: Tiebreaker,
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tb = match &self.tiebreaker {
            Tiebreaker::Phone(v) | Tiebreaker::City(v) | Tiebreaker::Id(v) => v,
        };
        write!(f, "{}|{}", self.name, tb)
    }
}

pub fn cluster_key(r: &PractitionerRecord) -> ClusterKey {
    let phone = normalize(r.phone_norm.as_deref());
    let city = normalize(r.city.as_deref());
    let tiebreaker = if !phone.is_empty() {
        Tiebreaker::Phone(phone)
    } else if !city.is_empty() {
        Tiebreaker::City(city)
    } else {
        Tiebreaker::Id(r.id.clone())
    };
    ClusterKey {
        name: normalize(Some(&r.name)),
        tiebreaker,
    }
}

/// Completeness used to pick the keeper: website and phone weigh 2,
/// address and description weigh 1.
pub fn keeper_score(r: &PractitionerRecord) -> u32 {
    2 * u32::from(r.has_website())
        + 2 * u32::from(r.has_phone())
        + u32::from(r.has_address())
        + u32::from(r.has_description())
}

#[derive(Debug)]
pub struct DuplicateCluster<'a> {
    pub key: ClusterKey,
    /// First-seen order.
    pub members: Vec<&'a PractitionerRecord>,
}

impl<'a> DuplicateCluster<'a> {
    /// Members ordered keeper-first. The sort is stable, so equal scores keep
    /// their first-seen order and the earliest record wins the tie.
    pub fn ranked(&self) -> Vec<&'a PractitionerRecord> {
        let mut ranked = self.members.clone();
        ranked.sort_by(|a, b| keeper_score(b).cmp(&keeper_score(a)));
        ranked
    }
}

/// Partitions `records` by exact key equality. Clusters come out in the order
/// their first member was seen.
pub fn group_records(records: &[PractitionerRecord]) -> Vec<DuplicateCluster<'_>> {
    let mut index: HashMap<ClusterKey, usize> = HashMap::new();
    let mut clusters: Vec<DuplicateCluster<'_>> = Vec::new();
    for r in records {
        let key = cluster_key(r);
        match index.get(&key) {
            Some(&i) => clusters[i].members.push(r),
            None => {
                index.insert(key.clone(), clusters.len());
                clusters.push(DuplicateCluster {
                    key,
                    members: vec![r],
                });
            }
        }
    }
    clusters
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberSummary {
    pub id: String,
    pub name: String,
    pub score: u32,
}

impl MemberSummary {
    fn of(r: &PractitionerRecord) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            score: keeper_score(r),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDecision {
    pub key: String,
    pub kept: MemberSummary,
    pub archived: Vec<MemberSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterPlan {
    pub groups_examined: usize,
    pub decisions: Vec<GroupDecision>,
}

impl ClusterPlan {
    pub fn archived_ids(&self) -> impl Iterator<Item = &str> {
        self.decisions
            .iter()
            .flat_map(|d| d.archived.iter().map(|m| m.id.as_str()))
    }

    pub fn archive_groups(&self) -> Vec<ArchiveGroup> {
        self.decisions
            .iter()
            .map(|d| ArchiveGroup {
                keeper_id: d.kept.id.clone(),
                ids: d.archived.iter().map(|m| m.id.clone()).collect(),
            })
            .collect()
    }
}

pub fn plan(records: &[PractitionerRecord]) -> ClusterPlan {
    let clusters = group_records(records);
    let groups_examined = clusters.len();
    let decisions = clusters
        .iter()
        .filter(|c| c.members.len() > 1)
        .map(|c| {
            let ranked = c.ranked();
            GroupDecision {
                key: c.key.to_string(),
                kept: MemberSummary::of(ranked[0]),
                archived: ranked[1..].iter().map(|r| MemberSummary::of(r)).collect(),
            }
        })
        .collect();
    ClusterPlan {
        groups_examined,
        decisions,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterReport {
    pub dry_run: bool,
    pub active_records: usize,
    pub groups_examined: usize,
    pub duplicate_groups: usize,
    pub archived: usize,
    /// Rows the store actually flipped to `duplicate`.
    pub archived_written: usize,
    pub groups: Vec<GroupDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One dedup pass: one bulk read, one all-or-nothing bulk write. Never fails
/// outright; store errors land in `error`.
pub fn run_dedupe<S: PractitionerStore>(store: &mut S, dry_run: bool) -> ClusterReport {
    let mut report = ClusterReport {
        dry_run,
        ..ClusterReport::default()
    };

    let records = match store.fetch_active() {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("dedupe aborted, could not load active practitioners: {e}");
            report.error = Some(e.to_string());
            return report;
        }
    };
    tracing::info!("Loaded {} active practitioners", records.len());
    report.active_records = records.len();

    let cluster_plan = plan(&records);
    report.groups_examined = cluster_plan.groups_examined;
    report.duplicate_groups = cluster_plan.decisions.len();
    report.archived = cluster_plan.archived_ids().count();

    for d in &cluster_plan.decisions {
        tracing::info!(
            "[{}] keeping {} ({}, score {}), archiving {}",
            d.key,
            d.kept.id,
            d.kept.name,
            d.kept.score,
            d.archived
                .iter()
                .map(|m| format!("{} (score {})", m.id, m.score))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    if report.archived > 0 && !dry_run {
        match store.mark_duplicates(&cluster_plan.archive_groups()) {
            Ok(n) => {
                report.archived_written = n;
                if n != report.archived {
                    tracing::warn!(
                        "planned {} archivals but {} rows changed (records left the active set?)",
                        report.archived,
                        n
                    );
                }
            }
            Err(e) => {
                tracing::error!("archival write failed, nothing applied: {e}");
                report.error = Some(e.to_string());
            }
        }
    } else if dry_run {
        tracing::info!("dry run: {} records would be archived", report.archived);
    }

    report.groups = cluster_plan.decisions;
    tracing::info!(
        "dedupe: groups={} duplicate_groups={} archived={}",
        report.groups_examined,
        report.duplicate_groups,
        report.archived_written
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Coordinates, Status};
    use crate::store::{DuckDbStore, ListQuery, NearbyQuery, SearchRow, StoreError, StoreResult};

    fn rec(id: &str, name: &str, phone: Option<&str>, city: Option<&str>) -> PractitionerRecord {
        let mut r = PractitionerRecord::new(id, name);
        r.phone_norm = phone.map(Into::into);
        r.city = city.map(Into::into);
        r
    }

    #[test]
    fn key_prefers_phone_then_city_then_id() {
        let k = cluster_key(&rec("1", " Jean  Dupont", Some("0612"), Some("Caen")));
        assert_eq!(k.tiebreaker, Tiebreaker::Phone("0612".into()));
        assert_eq!(k.to_string(), "jean dupont|0612");

        let k = cluster_key(&rec("2", "Jean Dupont", Some("  "), Some(" CAEN ")));
        assert_eq!(k.tiebreaker, Tiebreaker::City("caen".into()));

        let k = cluster_key(&rec("3", "Jean Dupont", None, None));
        assert_eq!(k.tiebreaker, Tiebreaker::Id("3".into()));
    }

    #[test]
    fn merges_only_on_name_and_tiebreaker() {
        let records = vec![
            rec("a", "Jean Dupont", Some("0612"), Some("Caen")),
            rec("b", "JEAN DUPONT", Some("0612"), Some("Bayeux")),
            rec("c", "Jean Dupont", Some("0699"), Some("Caen")),
            rec("d", "Marie Martin", None, Some("Caen")),
            rec("e", "marie  martin", None, Some("caen")),
        ];
        let clusters = group_records(&records);
        let shapes: Vec<Vec<&str>> = clusters
            .iter()
            .map(|c| c.members.iter().map(|r| r.id.as_str()).collect())
            .collect();
        assert_eq!(shapes, vec![vec!["a", "b"], vec!["c"], vec!["d", "e"]]);
    }

    #[test]
    fn records_without_phone_or_city_stay_singletons() {
        let records = vec![
            rec("a", "Jean Dupont", None, None),
            rec("b", "Jean Dupont", None, None),
            rec("c", "Jean Dupont", None, Some("  ")),
        ];
        let p = plan(&records);
        assert_eq!(p.groups_examined, 3);
        assert!(p.decisions.is_empty());
    }

    #[test]
    fn id_tiebreaker_never_collides_with_a_city() {
        let records = vec![
            rec("caen", "Jean Dupont", None, None),
            rec("x", "Jean Dupont", None, Some("Caen")),
        ];
        assert_eq!(group_records(&records).len(), 2);
    }

    #[test]
    fn keeper_is_highest_score() {
        let mut weak = rec("a", "Jean Dupont", None, Some("Caen"));
        weak.description = Some("Maréchal".into());
        let mut strong = rec("b", "Jean Dupont", None, Some("Caen"));
        strong.website = Some("https://example.fr".into());
        let mut mid = rec("c", "Jean Dupont", None, Some("Caen"));
        mid.address_full = Some("12 Rue X".into());
        mid.description = Some("x".into());

        let p = plan(&[weak, strong, mid]);
        assert_eq!(p.decisions.len(), 1);
        let d = &p.decisions[0];
        assert_eq!(d.kept.id, "b");
        assert_eq!(d.kept.score, 2);
        let archived: Vec<_> = d.archived.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(archived, ["c", "a"]);
    }

    #[test]
    fn equal_scores_keep_the_earliest() {
        let records = vec![
            rec("first", "Jean Dupont", Some("0612"), None),
            rec("second", "Jean Dupont", Some("0612"), None),
            rec("third", "Jean Dupont", Some("0612"), None),
        ];
        let p = plan(&records);
        let d = &p.decisions[0];
        assert_eq!(d.kept.id, "first");
        let archived: Vec<_> = d.archived.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(archived, ["second", "third"]);
    }

    #[test]
    fn run_marks_archived_and_leaves_keeper() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let mut keeper = rec("k", "Jean Dupont", Some("0612"), Some("Caen"));
        keeper.website = Some("https://dupont.fr".into());
        store.insert(&keeper).unwrap();
        store.insert(&rec("d", "Jean Dupont", Some("0612"), Some("Caen"))).unwrap();
        store.insert(&rec("solo", "Marie Martin", None, None)).unwrap();

        let report = run_dedupe(&mut store, false);
        assert_eq!(report.error, None);
        assert_eq!(report.groups_examined, 2);
        assert_eq!(report.duplicate_groups, 1);
        assert_eq!(report.archived, 1);
        assert_eq!(report.archived_written, 1);

        let d = store.fetch_by_id("d").unwrap().unwrap();
        assert_eq!(d.status, Status::Duplicate);
        assert_eq!(d.duplicate_of.as_deref(), Some("k"));
        assert_eq!(store.fetch_by_id("k").unwrap().unwrap().status, Status::Active);

        // A second pass finds nothing left to merge.
        let again = run_dedupe(&mut store, false);
        assert_eq!(again.duplicate_groups, 0);
        assert_eq!(again.archived_written, 0);
    }

    #[test]
    fn dry_run_does_not_write() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        store.insert(&rec("a", "Jean", Some("1"), None)).unwrap();
        store.insert(&rec("b", "Jean", Some("1"), None)).unwrap();

        let report = run_dedupe(&mut store, true);
        assert!(report.dry_run);
        assert_eq!(report.archived, 1);
        assert_eq!(report.archived_written, 0);
        assert_eq!(store.fetch_by_id("b").unwrap().unwrap().status, Status::Active);
    }

    /// Serves a fixed record set and fails on demand.
    struct FlakyStore {
        records: Vec<PractitionerRecord>,
        fail_read: bool,
        writes: usize,
    }

    impl PractitionerStore for FlakyStore {
        fn fetch_active(&mut self) -> StoreResult<Vec<PractitionerRecord>> {
            if self.fail_read {
                return Err(StoreError::Read("connection reset".into()));
            }
            Ok(self.records.clone())
        }
        fn fetch_by_id(&mut self, _: &str) -> StoreResult<Option<PractitionerRecord>> {
            Ok(None)
        }
        fn mark_duplicates(&mut self, _: &[ArchiveGroup]) -> StoreResult<usize> {
            self.writes += 1;
            Err(StoreError::Write("constraint violated".into()))
        }
        fn fetch_backlog(&mut self, _: Option<usize>) -> StoreResult<Vec<PractitionerRecord>> {
            Ok(Vec::new())
        }
        fn count_backlog(&mut self) -> StoreResult<u64> {
            Ok(0)
        }
        fn set_coordinates(&mut self, _: &str, _: Coordinates) -> StoreResult<()> {
            Ok(())
        }
        fn search_nearby(&mut self, _: &NearbyQuery) -> StoreResult<Vec<SearchRow>> {
            Ok(Vec::new())
        }
        fn list(&mut self, _: &ListQuery) -> StoreResult<(Vec<SearchRow>, u64)> {
            Ok((Vec::new(), 0))
        }
    }

    #[test]
    fn read_failure_aborts_without_writing() {
        let mut store = FlakyStore {
            records: Vec::new(),
            fail_read: true,
            writes: 0,
        };
        let report = run_dedupe(&mut store, false);
        assert!(report.error.unwrap().contains("connection reset"));
        assert_eq!(store.writes, 0);
        assert_eq!(report.groups_examined, 0);
    }

    #[test]
    fn write_failure_is_reported_with_the_plan() {
        let mut store = FlakyStore {
            records: vec![
                rec("a", "Jean", Some("1"), None),
                rec("b", "Jean", Some("1"), None),
            ],
            fail_read: false,
            writes: 0,
        };
        let report = run_dedupe(&mut store, false);
        assert_eq!(store.writes, 1);
        assert!(report.error.unwrap().contains("constraint violated"));
        assert_eq!(report.archived, 1);
        assert_eq!(report.archived_written, 0);
        assert_eq!(report.groups.len(), 1);
    }
}
