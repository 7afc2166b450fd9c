//! CLI command handlers.

mod crawl;
mod download;
mod search;
mod stats;
mod verify;

use anyhow::Result;
use myrient_core::{Config, Context};

use crate::cli::Command;

pub use crawl::run_crawl_command;
pub use download::run_download_command;
pub use search::run_search_command;
pub use stats::{run_init_command, run_stats_command, run_status_command};
pub use verify::run_verify_command;

/// Dispatches one subcommand.
pub async fn run(command: Command, config: Config, quiet: bool) -> Result<()> {
    match command {
        Command::Init => run_init_command(config).await,
        Command::Crawl(args) => run_crawl_command(&args, config, quiet).await,
        Command::Search(args) => run_search_command(&args, config).await,
        Command::Download(args) => run_download_command(&args, config, quiet).await,
        Command::Status(args) => run_status_command(&args, config).await,
        Command::Verify(args) => run_verify_command(&args, config).await,
        Command::Stats(args) => run_stats_command(&args, config).await,
    }
}

/// Opens the context for a command. Closing is the command's job.
async fn open(config: Config) -> Result<Context> {
    Ok(Context::init_catalog(config).await?)
}

/// `1536` → `1.5 KiB`.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::format_bytes;

    #[test]
    fn format_bytes_picks_binary_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
