//! Minimal robots.txt support for polite crawling.
//!
//! Honors `Disallow` lines in groups for `*` or for our own agent token.
//! Rules are fetched once per crawl run.

use tracing::{debug, instrument, warn};
use url::Url;

use crate::download::{DownloadError, HttpClient, RateLimiter};

/// Disallowed path prefixes for one origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RobotsRules {
    disallowed_prefixes: Vec<String>,
}

impl RobotsRules {
    /// Rules that allow every path.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parses a robots.txt body for `*` and for `agent` (case-insensitive product token).
    #[must_use]
    pub fn parse(body: &str, agent: &str) -> Self {
        let agent = product_token(agent);
        let mut in_group = false;
        let mut last_was_agent = false;
        let mut disallowed = Vec::new();
        for line in body.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((field, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if field.trim().eq_ignore_ascii_case("user-agent") {
                // Consecutive User-agent lines share one group.
                let matches =
                    value == "*" || (!agent.is_empty() && value.eq_ignore_ascii_case(&agent));
                in_group = if last_was_agent { in_group || matches } else { matches };
                last_was_agent = true;
                continue;
            }
            last_was_agent = false;
            if in_group && field.trim().eq_ignore_ascii_case("disallow") {
                let prefix = normalize_disallow_path(value);
                if !prefix.is_empty() && !disallowed.contains(&prefix) {
                    disallowed.push(prefix);
                }
            }
        }
        disallowed.sort_by_key(|b| std::cmp::Reverse(b.len()));
        Self {
            disallowed_prefixes: disallowed,
        }
    }

    /// True if no disallowed prefix covers the URL's path.
    #[must_use]
    pub fn allows(&self, url: &Url) -> bool {
        let path = url.path();
        let allowed = !self
            .disallowed_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()));
        if !allowed {
            debug!(%path, "robots.txt disallows path");
        }
        allowed
    }
}

/// Fetches robots.txt for `root`'s origin through the shared rate limiter.
///
/// A missing file (404) or any fetch failure allows everything.
#[instrument(skip(client, rate_limiter, agent), fields(origin = %root.origin().ascii_serialization()))]
pub async fn fetch_rules(
    client: &HttpClient,
    rate_limiter: &RateLimiter,
    root: &Url,
    agent: &str,
) -> RobotsRules {
    let Ok(robots_url) = root.join("/robots.txt") else {
        return RobotsRules::allow_all();
    };
    rate_limiter.acquire(robots_url.as_str()).await;
    match client.fetch_listing(robots_url.as_str()).await {
        Ok(body) => RobotsRules::parse(&body, agent),
        Err(DownloadError::HttpStatus { status: 404, .. }) => {
            debug!("no robots.txt");
            RobotsRules::allow_all()
        }
        Err(e) => {
            warn!(error = %e, "robots.txt unavailable; crawling without it");
            RobotsRules::allow_all()
        }
    }
}

/// `MyrientDL/0.1 (...)` → `myrientdl`.
fn product_token(agent: &str) -> String {
    agent
        .split(['/', ' '])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn normalize_disallow_path(path: &str) -> String {
    let s = path.trim();
    if s.is_empty() {
        return String::new();
    }
    let mut s = s.to_string();
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    s
}
