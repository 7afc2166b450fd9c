//! Crawl command handler: walk listings into the catalog with a live spinner.

use anyhow::Result;
use myrient_core::{Config, CrawlState};
use tracing::warn;

use crate::cli::CrawlArgs;
use crate::progress;

pub async fn run_crawl_command(args: &CrawlArgs, mut config: Config, quiet: bool) -> Result<()> {
    if let Some(depth) = args.max_depth {
        config.crawl_max_depth = depth;
    }
    if let Some(concurrency) = args.concurrency {
        config.crawl_concurrency = usize::from(concurrency);
    }
    if args.ignore_robots {
        config.respect_robots_txt = false;
    }

    let ctx = super::open(config).await?;
    if let Err(e) = ctx.run_crawl(args.root.as_deref()).await {
        ctx.close().await;
        return Err(e.into());
    }

    let spinner = progress::crawl_spinner(!quiet);
    let mut interrupted = false;
    loop {
        let snapshot = ctx.crawl_status();
        spinner.set_message(progress::crawl_message(&snapshot));
        if snapshot.state != CrawlState::Running {
            break;
        }
        tokio::select! {
            () = tokio::time::sleep(progress::POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                warn!("interrupted; finishing in-flight listings");
                interrupted = true;
                ctx.cancel_crawl().await;
            }
        }
    }
    spinner.finish_and_clear();

    let result = ctx.wait_crawl().await;
    ctx.close().await;
    let snapshot = result?;

    println!(
        "Crawl {}{}: {} listings visited, {} files cataloged, {} filtered, {} errors",
        snapshot.state,
        if snapshot.cancelled { " (cancelled)" } else { "" },
        snapshot.locations_visited,
        snapshot.entries_discovered,
        snapshot.entries_filtered,
        snapshot.errors
    );
    Ok(())
}
