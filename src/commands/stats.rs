//! Catalog inspection handlers: init, status and stats.

use anyhow::Result;
use myrient_core::catalog::EntryFilter;
use myrient_core::{Config, TransferStatus};

use super::format_bytes;
use crate::cli::{StatsArgs, StatusArgs};

/// Entries listed per status by `status`.
const STATUS_LIST_LIMIT: u32 = 20;

pub async fn run_init_command(config: Config) -> Result<()> {
    let path = config.database_path.clone();
    let ctx = super::open(config).await?;
    let paused = ctx.catalog().count_by_status(TransferStatus::Paused).await;
    ctx.close().await;
    println!("Catalog ready at {} ({} paused transfers)", path.display(), paused?);
    Ok(())
}

pub async fn run_status_command(args: &StatusArgs, config: Config) -> Result<()> {
    let ctx = super::open(config).await?;
    let result = collect_status(&ctx).await;
    ctx.close().await;
    let (counts, attention) = result?;

    if args.json {
        let value = serde_json::json!({
            "counts": counts
                .iter()
                .map(|(status, count)| (status.as_str(), *count))
                .collect::<std::collections::BTreeMap<_, _>>(),
            "attention": attention,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (status, count) in &counts {
        println!("{:>12}: {count}", status.as_str());
    }
    for entry in &attention {
        let detail = entry.last_error.as_deref().unwrap_or("");
        let throttled = if entry.throttled { " [throttled]" } else { "" };
        println!(
            "{} {}{throttled} {}/{} {detail}",
            entry.status(),
            entry.name,
            format_bytes(entry.bytes()),
            entry
                .size_bytes()
                .map_or_else(|| "?".to_string(), format_bytes),
        );
    }
    Ok(())
}

async fn collect_status(
    ctx: &myrient_core::Context,
) -> Result<(Vec<(TransferStatus, i64)>, Vec<myrient_core::Entry>)> {
    let mut counts = Vec::with_capacity(TransferStatus::ALL.len());
    for status in TransferStatus::ALL {
        counts.push((status, ctx.catalog().count_by_status(status).await?));
    }
    let mut attention = Vec::new();
    for status in [TransferStatus::Failed, TransferStatus::Paused] {
        let filter = EntryFilter {
            status: Some(status),
            ..EntryFilter::default()
        };
        attention.extend(
            ctx.catalog()
                .query_by_filter(&filter, STATUS_LIST_LIMIT, 0)
                .await?,
        );
    }
    Ok((counts, attention))
}

pub async fn run_stats_command(args: &StatsArgs, config: Config) -> Result<()> {
    let ctx = super::open(config).await?;
    let result = ctx.stats().await;
    ctx.close().await;
    let stats = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let overall = &stats.overall;
    println!(
        "{} entries in {} collections ({} consoles), {}",
        overall.total_entries,
        overall.collections,
        overall.consoles,
        format_bytes(non_negative(overall.total_size))
    );
    println!(
        "completed {} ({}), pending {}, failed {}, paused {}, verified {}, need conversion {}",
        overall.completed,
        format_bytes(non_negative(overall.completed_size)),
        overall.pending,
        overall.failed,
        overall.paused,
        overall.verified,
        overall.requires_conversion
    );
    for collection in &stats.collections {
        println!(
            "  {:<40} {:>8} entries {:>12}  {:>8} done",
            collection.name,
            collection.entry_count,
            format_bytes(non_negative(collection.total_size)),
            collection.completed_count
        );
    }
    Ok(())
}

fn non_negative(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
