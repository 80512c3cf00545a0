use anyhow::{Context, Result, anyhow, bail};
use serde::Serialize;

use crate::audit::run_audit;
use crate::backfill::{BackfillOptions, run_backfill};
use crate::cli::{AuditArgs, BackfillArgs, DedupeArgs, ImportArgs, ScoreArgs, SearchArgs};
use crate::cluster::run_dedupe;
use crate::constants::NOMINATIM_USAGE_POLICY_URL;
use crate::geocode::NominatimClient;
use crate::record::Specialty;
use crate::search::{GeoSearchParams, search};
use crate::storage::StoragePaths;
use crate::store::PractitionerStore;
use crate::transparency::{TransparencyCriteria, TransparencyScore};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}

fn fail_on(error: Option<&str>, what: &str) -> Result<()> {
    match error {
        Some(e) => Err(anyhow!("{what} failed: {e}")),
        None => Ok(()),
    }
}

pub fn dedupe(cmd: DedupeArgs) -> Result<()> {
    let mut store = StoragePaths::new(&cmd.store.data_dir).open_store()?;
    let report = run_dedupe(&mut store, cmd.dry_run);

    if cmd.json {
        print_json(&report)?;
    } else {
        println!("Groups examined:       {}", report.groups_examined);
        println!("Groups with duplicates: {}", report.duplicate_groups);
        if report.dry_run {
            println!("Would archive:         {}", report.archived);
        } else {
            println!("Archived:              {}", report.archived_written);
        }
    }
    fail_on(report.error.as_deref(), "dedupe")
}

pub async fn backfill(cmd: BackfillArgs) -> Result<()> {
    println!("Geocoder usage policy: {NOMINATIM_USAGE_POLICY_URL}");

    let mut store = StoragePaths::new(&cmd.store.data_dir).open_store()?;
    let geocoder = NominatimClient::new(&cmd.geocoder.config())?;
    let pacer = cmd.geocoder.pacer();
    let opts = BackfillOptions {
        limit: cmd.limit,
        dry_run: cmd.dry_run,
        show_progress: !cmd.no_progress && !cmd.json,
    };
    let report = run_backfill(&mut store, &geocoder, &pacer, opts).await;

    if cmd.json {
        print_json(&report)?;
    } else {
        println!("Processed: {}", report.processed);
        println!("Updated:   {}", report.updated);
        println!("Not found: {}", report.not_found);
        println!("Skipped:   {}", report.skipped);
        println!("Failed:    {}", report.failed);
        if report.lookup_errors > 0 {
            println!("Geocoder errors: {}", report.lookup_errors);
        }
        if let Some(remaining) = report.remaining {
            println!("Remaining backlog: {remaining}");
        }
    }
    fail_on(report.error.as_deref(), "backfill")
}

pub fn search_once(cmd: SearchArgs) -> Result<()> {
    let mut store = StoragePaths::new(&cmd.store.data_dir).open_store()?;
    let params = GeoSearchParams {
        lat: cmd.lat,
        lng: cmd.lng,
        radius_km: Some(cmd.radius_km),
        specialty: cmd.specialty,
        query: cmd.query,
        city: cmd.city,
        sort: Some(cmd.sort),
        page: Some(cmd.page),
        page_size: Some(cmd.page_size),
    };
    let result = search(&mut store, &params);
    print_json(&result)?;
    fail_on(result.error.as_deref(), "search")
}

#[derive(Debug, Serialize)]
struct ScoreOutput<'a> {
    id: &'a str,
    name: &'a str,
    category: Specialty,
    criteria: TransparencyCriteria,
    #[serde(flatten)]
    score: TransparencyScore,
}

pub fn score(cmd: ScoreArgs) -> Result<()> {
    let mut store = StoragePaths::new(&cmd.store.data_dir).open_store()?;
    let Some(record) = store
        .fetch_by_id(&cmd.id)
        .with_context(|| format!("load practitioner {}", cmd.id))?
    else {
        bail!("practitioner {} not found", cmd.id);
    };
    let criteria = TransparencyCriteria::from_record(&record);
    print_json(&ScoreOutput {
        id: &record.id,
        name: &record.name,
        category: record.specialty_category(),
        criteria,
        score: criteria.score(),
    })
}

pub fn audit(cmd: AuditArgs) -> Result<()> {
    let mut store = StoragePaths::new(&cmd.store.data_dir).open_store()?;
    let report = run_audit(&mut store);

    if cmd.json {
        print_json(&report)?;
    } else {
        println!("Active practitioners: {}", report.active_records);
        for f in &report.findings {
            println!("  [{:?}] {} / {}: {}", f.severity, f.category, f.issue, f.count);
            if !f.examples.is_empty() {
                println!("      examples: {}", f.examples.join(", "));
            }
        }
        match report.quality_score {
            Some(s) => println!("Data quality score: {s}% ({})", report.verdict()),
            None => println!("Data quality score: n/a ({})", report.verdict()),
        }
    }
    fail_on(report.error.as_deref(), "audit")
}

pub fn import(cmd: ImportArgs) -> Result<()> {
    let paths = StoragePaths::new(&cmd.store.data_dir);
    let mut store = paths.open_or_create_store()?;
    let inserted = store
        .import_file(&cmd.input)
        .with_context(|| format!("import {}", cmd.input.display()))?;
    tracing::info!(
        "Imported {} new practitioners from {} into {}",
        inserted,
        cmd.input.display(),
        paths.duckdb_path.display()
    );
    Ok(())
}
