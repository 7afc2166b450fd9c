//! Download command handler: queue entries and follow them to completion.

use anyhow::{Result, bail};
use myrient_core::{Config, Context, SearchFilters, parse_selection};
use tracing::{info, warn};

use super::search::render_hit;
use crate::cli::DownloadArgs;
use crate::progress;

/// Results a `--select` position can refer to.
const SELECTION_RESULT_LIMIT: usize = 50;

pub async fn run_download_command(
    args: &DownloadArgs,
    mut config: Config,
    quiet: bool,
) -> Result<()> {
    if let Some(concurrency) = args.concurrency {
        config.global_concurrency = usize::from(concurrency);
    }
    if args.no_verify {
        config.verify_on_completion = false;
    }

    let ctx = super::open(config).await?;
    let result = download(&ctx, args, quiet).await;
    ctx.close().await;
    result
}

async fn download(ctx: &Context, args: &DownloadArgs, quiet: bool) -> Result<()> {
    let addresses = resolve_addresses(ctx, args, quiet).await?;
    if addresses.is_empty() {
        bail!("nothing to download: pass entry addresses, or --search with --select");
    }

    let report = ctx.queue_download(&addresses).await?;
    for (address, reason) in &report.skipped {
        info!(address = %address, reason = ?reason, "skipped");
    }
    if report.accepted_count() == 0 {
        println!("Nothing queued; all {} entries were skipped.", report.skipped.len());
        return Ok(());
    }

    let bar = progress::download_bar(report.accepted_count(), !quiet && !args.no_progress);
    let mut interrupted = false;
    loop {
        let status = ctx.download_status();
        bar.set_position(progress::settled(&status));
        bar.set_message(progress::download_message(&status));
        if status.is_idle() || interrupted {
            break;
        }
        tokio::select! {
            () = tokio::time::sleep(progress::POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted; in-flight transfers will be paused");
                interrupted = true;
            }
        }
    }
    bar.finish_and_clear();

    let status = ctx.download_status();
    for advisory in &status.advisories {
        println!("note: {advisory}");
    }
    println!(
        "Downloads: {} completed, {} failed, {} paused, {} retried",
        status.completed, status.failed, status.paused, status.retried
    );
    if status.failed > 0 {
        bail!("{} download(s) failed; run `myrient-dl status` for details", status.failed);
    }
    Ok(())
}

async fn resolve_addresses(ctx: &Context, args: &DownloadArgs, quiet: bool) -> Result<Vec<String>> {
    let (Some(query), Some(selection)) = (&args.search, &args.select) else {
        return Ok(args.addresses.clone());
    };

    let filters = SearchFilters {
        console: args.console.clone(),
        collection: None,
    };
    let hits = ctx.search(query, &filters, SELECTION_RESULT_LIMIT).await?;
    if hits.is_empty() {
        bail!("no catalog entries matched '{query}'");
    }
    let positions = parse_selection(selection, hits.len())?;

    let mut addresses = Vec::with_capacity(positions.len());
    for position in positions {
        if let Some(hit) = hits.get(position - 1) {
            if !quiet {
                println!("{}", render_hit(position, hit));
            }
            addresses.push(hit.entry.address.clone());
        }
    }
    Ok(addresses)
}
