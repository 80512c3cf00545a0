mod audit;
mod backfill;
mod cli;
mod cluster;
mod commands;
mod common;
mod constants;
mod geocode;
mod normalize;
mod pacing;
mod record;
mod search;
mod server;
mod storage;
mod store;
mod transparency;

use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = cli::Args::parse();

    match args.cmd {
        cli::Command::Dedupe(cmd) => commands::dedupe(cmd),
        cli::Command::Backfill(cmd) => commands::backfill(cmd).await,
        cli::Command::Search(cmd) => commands::search_once(cmd),
        cli::Command::Score(cmd) => commands::score(cmd),
        cli::Command::Audit(cmd) => commands::audit(cmd),
        cli::Command::Import(cmd) => commands::import(cmd).context("import failed"),
        cli::Command::Serve(cmd) => server::run(cmd).await.context("serve failed"),
    }
}
