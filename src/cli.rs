//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

/// Crawl, catalog, search and politely download from public file archives.
#[derive(Parser, Debug)]
#[command(name = "myrient-dl")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file of `key = value` lines
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Catalog database path (overrides the config file)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Download directory (overrides the config file)
    #[arg(long, global = true, value_name = "DIR")]
    pub download_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the catalog database and report recovered transfers
    Init,
    /// Crawl archive listings into the catalog
    Crawl(CrawlArgs),
    /// Search the catalog
    Search(SearchArgs),
    /// Download entries by address or from a search selection
    Download(DownloadArgs),
    /// Show transfer states recorded in the catalog
    Status(StatusArgs),
    /// Check completed zip files against their member checksums
    Verify(VerifyArgs),
    /// Show catalog statistics
    Stats(StatsArgs),
}

#[derive(ClapArgs, Debug)]
pub struct CrawlArgs {
    /// Listing to start from (defaults to the configured base URL)
    pub root: Option<String>,

    /// Maximum directory depth below the root
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=64))]
    pub max_depth: Option<u32>,

    /// Listings fetched in parallel (1-64)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: Option<u16>,

    /// Ignore the archive's robots.txt
    #[arg(long)]
    pub ignore_robots: bool,
}

#[derive(ClapArgs, Debug)]
pub struct SearchArgs {
    /// Search terms
    #[arg(required = true, num_args = 1..)]
    pub query: Vec<String>,

    /// Restrict to a console (name or alias such as `snes`)
    #[arg(long)]
    pub console: Option<String>,

    /// Restrict to a collection
    #[arg(long)]
    pub collection: Option<String>,

    /// Maximum results (1-1000)
    #[arg(short = 'n', long, default_value_t = 20, value_parser = clap::value_parser!(u16).range(1..=1000))]
    pub limit: u16,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct DownloadArgs {
    /// Entry addresses to download
    #[arg(conflicts_with = "search")]
    pub addresses: Vec<String>,

    /// Pick entries from the results of this search
    #[arg(long, requires = "select")]
    pub search: Option<String>,

    /// Positions from the search results, e.g. `1,3,5-7`
    #[arg(long, requires = "search")]
    pub select: Option<String>,

    /// Restrict the search to a console
    #[arg(long, requires = "search")]
    pub console: Option<String>,

    /// Maximum concurrent downloads (1-64)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub concurrency: Option<u16>,

    /// Skip integrity checks after each transfer
    #[arg(long)]
    pub no_verify: bool,

    /// Do not show a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(ClapArgs, Debug)]
pub struct StatusArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct VerifyArgs {
    /// Entry addresses to verify
    #[arg(required = true, num_args = 1..)]
    pub addresses: Vec<String>,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug)]
pub struct StatsArgs {
    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}
