//! Verify command handler: re-check completed zip files.

use anyhow::{Result, bail};
use myrient_core::Config;
use tracing::warn;

use crate::cli::VerifyArgs;

pub async fn run_verify_command(args: &VerifyArgs, config: Config) -> Result<()> {
    let ctx = super::open(config).await?;

    let mut reports = Vec::new();
    let mut problems = 0usize;
    for address in &args.addresses {
        match ctx.verify(address).await {
            Ok(report) => {
                if !report.is_verified() {
                    problems += 1;
                }
                if !args.json {
                    let mark = if report.is_verified() { "ok" } else { "FAIL" };
                    println!("{mark:>4}  {address}: {}", report.summary());
                }
                reports.push(report);
            }
            Err(e) => {
                problems += 1;
                warn!(address = %address, error = %e, "cannot verify");
                if !args.json {
                    println!("{:>4}  {address}: {e}", "SKIP");
                }
            }
        }
    }
    ctx.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if problems > 0 {
        bail!("{problems} of {} entries not verified", args.addresses.len());
    }
    Ok(())
}
