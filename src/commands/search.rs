//! Search command handler: ranked catalog matches.

use anyhow::Result;
use myrient_core::{Config, SearchFilters, SearchHit};

use super::format_bytes;
use crate::cli::SearchArgs;

pub async fn run_search_command(args: &SearchArgs, config: Config) -> Result<()> {
    let ctx = super::open(config).await?;
    let filters = SearchFilters {
        console: args.console.clone(),
        collection: args.collection.clone(),
    };
    let result = ctx
        .search(&args.query.join(" "), &filters, usize::from(args.limit))
        .await;
    ctx.close().await;
    let hits = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No catalog entries matched the query.");
        return Ok(());
    }
    for (index, hit) in hits.iter().enumerate() {
        println!("{}", render_hit(index + 1, hit));
    }
    Ok(())
}

/// One numbered result line; the number is what `download --select` takes.
pub(crate) fn render_hit(position: usize, hit: &SearchHit) -> String {
    let entry = &hit.entry;
    let size = entry
        .size_bytes()
        .map_or_else(|| "?".to_string(), format_bytes);
    let console = entry.console.as_deref().unwrap_or(&entry.collection);
    format!(
        "{position:>3}. {name} [{console}] {size} ({status}, score {score:.2})\n     {address}",
        name = entry.name,
        status = entry.status(),
        score = hit.score,
        address = entry.address,
    )
}
