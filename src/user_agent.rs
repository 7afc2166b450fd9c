//! Shared User-Agent string for listing and transfer traffic.
//!
//! Single source so the crawler, robots.txt checks and downloads identify
//! themselves the same way.

/// Purpose advertised to archive operators.
const PURPOSE: &str = "Educational/Archival Use";

/// Default User-Agent, e.g. `MyrientDL/0.1.0 (Educational/Archival Use)`.
#[must_use]
pub fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("MyrientDL/{version} ({PURPOSE})")
}
