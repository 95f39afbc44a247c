//! Deletes enrichment records created before a cutoff date so the next run
//! re-analyzes those channels.
//!
//! Usage: `purge_records <YYYY-MM-DD> [--dry-run]`

use std::env;

use anyhow::{anyhow, Context};
use channel_enricher::{
    error::EnricherError,
    store::{EnrichmentStore, SeaOrmStore},
};
use chrono::{DateTime, NaiveDate, Utc};
use futures::TryStreamExt;

fn parse_cutoff(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("'{}' is not a YYYY-MM-DD date", raw))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid cutoff {}", raw))?;
    Ok(midnight.and_utc())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_ansi(false).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some(raw_cutoff) = args.iter().find(|a| !a.starts_with("--")) else {
        return Err(anyhow!("usage: purge_records <YYYY-MM-DD> [--dry-run]"));
    };
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let cutoff = parse_cutoff(raw_cutoff)?;

    let db_url = env::var("DATABASE_URL")
        .map_err(|_| EnricherError::Config("DATABASE_URL is not set".to_string()))?;
    let store = SeaOrmStore::connect(&db_url)
        .await
        .map_err(EnricherError::Store)?;

    if dry_run {
        let matching = store
            .scan_all()
            .try_fold(0u64, |n, record| async move {
                anyhow::Ok(if record.created_at < cutoff { n + 1 } else { n })
            })
            .await?;
        tracing::info!("{} records created before {} would be purged", matching, cutoff);
        return Ok(());
    }

    let purged = store.purge_created_before(cutoff).await?;
    tracing::info!("Purged {} records created before {}", purged, cutoff);
    Ok(())
}
