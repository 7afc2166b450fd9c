//! Runtime configuration: recognized options, defaults and validation.
//!
//! [`Config::from_kv_str`] reads a flat `key = value` document:
//!
//! ```text
//! # comments run to end of line
//! download_root = "./downloads"
//! global_concurrency = 8
//! refill_per_sec = 0.5
//! verify_on_completion = true
//! include_patterns = ["*.zip", "*.7z"]
//! ```
//!
//! Locating and formatting the document is left to the caller.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::search::{DEFAULT_MIN_SCORE, DEFAULT_SEARCH_BATCH};
use crate::user_agent;

/// Default archive root.
pub const DEFAULT_BASE_URL: &str = "https://myrient.erista.me/files/";

/// Upper bound for either concurrency limit.
const MAX_CONCURRENCY: usize = 64;

/// Configuration errors. All of them are fatal before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A line is not `key = value`.
    #[error("invalid config syntax on line {line}: expected key = value")]
    Syntax { line: usize },

    /// The key is not a recognized option.
    #[error("unknown config key `{key}` on line {line}")]
    UnknownKey { key: String, line: usize },

    /// The value could not be parsed for its key.
    #[error("invalid `{key}` value on line {line}: {reason}")]
    Parse {
        key: String,
        line: usize,
        reason: String,
    },

    /// A parsed value is outside its allowed range.
    #[error("invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// All recognized options.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Where completed files are written.
    pub download_root: PathBuf,
    /// SQLite catalog file.
    pub database_path: PathBuf,
    /// Archive root the crawler starts from.
    pub base_url: String,
    pub user_agent: String,
    /// Transfers in flight across all hosts.
    pub global_concurrency: usize,
    /// Transfers in flight to one host.
    pub per_host_concurrency: usize,
    /// Listings fetched in parallel by the crawler.
    pub crawl_concurrency: usize,
    /// Token-bucket capacity per host.
    pub bucket_capacity: u32,
    /// Token-bucket refill rate per host, tokens per second.
    pub refill_per_sec: f64,
    pub connect_timeout_secs: u64,
    /// Listing request deadline; for transfers, the longest silence between reads.
    pub read_timeout_secs: u64,
    /// Attempts per transfer or listing, including the first.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Filename globs a crawled file must match (any).
    pub include_patterns: Vec<String>,
    /// Filename globs that reject a crawled file (any).
    pub exclude_patterns: Vec<String>,
    /// Files declaring more bytes than this are not cataloged.
    pub max_download_size: Option<u64>,
    /// Sustained throughput below this is treated as throttling.
    pub low_speed_threshold_bps: u64,
    /// How long throughput must stay low before the throttle flag is raised.
    pub throttle_grace_secs: u64,
    /// Width of the throughput sampling window.
    pub speed_window_secs: u64,
    pub verify_on_completion: bool,
    /// Resume from partial files instead of restarting.
    pub resume: bool,
    pub crawl_max_depth: u32,
    /// Skip listings disallowed by the archive's robots.txt.
    pub respect_robots_txt: bool,
    /// How often in-flight progress is written to the catalog.
    pub progress_flush_ms: u64,
    pub search_min_score: f64,
    /// Candidates read from the catalog per scoring batch.
    pub search_batch_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_root: PathBuf::from("./downloads"),
            database_path: PathBuf::from("./myrient.db"),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: user_agent::default_user_agent(),
            global_concurrency: 8,
            per_host_concurrency: 3,
            crawl_concurrency: 4,
            bucket_capacity: 3,
            refill_per_sec: 1.0,
            connect_timeout_secs: 10,
            read_timeout_secs: 120,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 30_000,
            include_patterns: ["*.zip", "*.7z", "*.rar", "*.iso", "*.wbfs", "*.rvz", "*.wux"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            exclude_patterns: ["*BIOS*", "*bios*", "*System*"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_download_size: None,
            low_speed_threshold_bps: 32 * 1024,
            throttle_grace_secs: 30,
            speed_window_secs: 10,
            verify_on_completion: true,
            resume: true,
            crawl_max_depth: 8,
            respect_robots_txt: true,
            progress_flush_ms: 1_000,
            search_min_score: DEFAULT_MIN_SCORE,
            search_batch_size: DEFAULT_SEARCH_BATCH,
        }
    }
}

impl Config {
    /// Checks every limit and path before anything touches the network.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.download_root.as_os_str().is_empty() {
            return Err(ConfigError::invalid("download_root", "must not be empty"));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("database_path", "must not be empty"));
        }
        match url::Url::parse(&self.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}
            _ => {
                return Err(ConfigError::invalid(
                    "base_url",
                    format!("'{}' is not an http(s) URL", self.base_url),
                ));
            }
        }
        validate_range("global_concurrency", self.global_concurrency, 1, MAX_CONCURRENCY)?;
        validate_range(
            "per_host_concurrency",
            self.per_host_concurrency,
            1,
            MAX_CONCURRENCY,
        )?;
        validate_range("crawl_concurrency", self.crawl_concurrency, 1, MAX_CONCURRENCY)?;
        if self.bucket_capacity == 0 {
            return Err(ConfigError::invalid("bucket_capacity", "must be at least 1"));
        }
        if !self.refill_per_sec.is_finite() || self.refill_per_sec <= 0.0 {
            return Err(ConfigError::invalid(
                "refill_per_sec",
                format!("{} is not a positive rate", self.refill_per_sec),
            ));
        }
        validate_range("connect_timeout_secs", self.connect_timeout_secs, 1, 300)?;
        validate_range("read_timeout_secs", self.read_timeout_secs, 1, 86_400)?;
        validate_range("max_attempts", self.max_attempts, 1, 20)?;
        validate_range("backoff_base_ms", self.backoff_base_ms, 1, 600_000)?;
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(ConfigError::invalid(
                "backoff_cap_ms",
                "must not be smaller than backoff_base_ms",
            ));
        }
        for (key, patterns) in [
            ("include_patterns", &self.include_patterns),
            ("exclude_patterns", &self.exclude_patterns),
        ] {
            for pattern in patterns {
                glob::Pattern::new(pattern)
                    .map_err(|e| ConfigError::invalid(key, format!("'{pattern}': {e}")))?;
            }
        }
        if self.low_speed_threshold_bps == 0 {
            return Err(ConfigError::invalid(
                "low_speed_threshold_bps",
                "must be greater than 0",
            ));
        }
        validate_range("speed_window_secs", self.speed_window_secs, 1, 3_600)?;
        validate_range("progress_flush_ms", self.progress_flush_ms, 10, 600_000)?;
        validate_range("crawl_max_depth", self.crawl_max_depth, 1, 64)?;
        if !(0.0..=1.0).contains(&self.search_min_score) {
            return Err(ConfigError::invalid(
                "search_min_score",
                "expected a score between 0.0 and 1.0",
            ));
        }
        if self.search_batch_size == 0 {
            return Err(ConfigError::invalid(
                "search_batch_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    #[must_use]
    pub fn throttle_grace(&self) -> Duration {
        Duration::from_secs(self.throttle_grace_secs)
    }

    #[must_use]
    pub fn speed_window(&self) -> Duration {
        Duration::from_secs(self.speed_window_secs)
    }

    #[must_use]
    pub fn progress_flush_interval(&self) -> Duration {
        Duration::from_millis(self.progress_flush_ms)
    }

    /// Parses a `key = value` document on top of the defaults.
    ///
    /// The result is not validated; call [`Config::validate`].
    ///
    /// # Errors
    ///
    /// Returns the first syntax, unknown-key or parse error with its line number.
    pub fn from_kv_str(raw: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        for (line_index, raw_line) in raw.lines().enumerate() {
            let line_no = line_index + 1;
            let line = strip_inline_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            let Some((raw_key, raw_value)) = line.split_once('=') else {
                return Err(ConfigError::Syntax { line: line_no });
            };
            let key = raw_key.trim();
            let value = raw_value.trim();
            let parse_err = |reason: String| ConfigError::Parse {
                key: key.to_string(),
                line: line_no,
                reason,
            };

            match key {
                "download_root" => cfg.download_root = PathBuf::from(parse_string(value).map_err(parse_err)?),
                "database_path" => cfg.database_path = PathBuf::from(parse_string(value).map_err(parse_err)?),
                "base_url" => cfg.base_url = parse_string(value).map_err(parse_err)?,
                "user_agent" => cfg.user_agent = parse_string(value).map_err(parse_err)?,
                "global_concurrency" => cfg.global_concurrency = parse_int(value).map_err(parse_err)?,
                "per_host_concurrency" => cfg.per_host_concurrency = parse_int(value).map_err(parse_err)?,
                "crawl_concurrency" => cfg.crawl_concurrency = parse_int(value).map_err(parse_err)?,
                "bucket_capacity" => cfg.bucket_capacity = parse_int(value).map_err(parse_err)?,
                "refill_per_sec" => cfg.refill_per_sec = parse_float(value).map_err(parse_err)?,
                "connect_timeout_secs" => cfg.connect_timeout_secs = parse_int(value).map_err(parse_err)?,
                "read_timeout_secs" | "request_timeout_secs" => {
                    cfg.read_timeout_secs = parse_int(value).map_err(parse_err)?;
                }
                "max_attempts" | "max_retries" => cfg.max_attempts = parse_int(value).map_err(parse_err)?,
                "backoff_base_ms" => cfg.backoff_base_ms = parse_int(value).map_err(parse_err)?,
                "backoff_cap_ms" => cfg.backoff_cap_ms = parse_int(value).map_err(parse_err)?,
                "include_patterns" => cfg.include_patterns = parse_string_list(value).map_err(parse_err)?,
                "exclude_patterns" => cfg.exclude_patterns = parse_string_list(value).map_err(parse_err)?,
                "max_download_size" => {
                    let size: u64 = parse_int(value).map_err(parse_err)?;
                    cfg.max_download_size = (size > 0).then_some(size);
                }
                "low_speed_threshold_bps" => {
                    cfg.low_speed_threshold_bps = parse_int(value).map_err(parse_err)?;
                }
                "throttle_grace_secs" => cfg.throttle_grace_secs = parse_int(value).map_err(parse_err)?,
                "speed_window_secs" => cfg.speed_window_secs = parse_int(value).map_err(parse_err)?,
                "verify_on_completion" => cfg.verify_on_completion = parse_bool(value).map_err(parse_err)?,
                "respect_robots_txt" => cfg.respect_robots_txt = parse_bool(value).map_err(parse_err)?,
                "resume" => cfg.resume = parse_bool(value).map_err(parse_err)?,
                "crawl_max_depth" => cfg.crawl_max_depth = parse_int(value).map_err(parse_err)?,
                "progress_flush_ms" => cfg.progress_flush_ms = parse_int(value).map_err(parse_err)?,
                "search_min_score" => cfg.search_min_score = parse_float(value).map_err(parse_err)?,
                "search_batch_size" => cfg.search_batch_size = parse_int(value).map_err(parse_err)?,
                _ => {
                    return Err(ConfigError::UnknownKey {
                        key: key.to_string(),
                        line: line_no,
                    });
                }
            }
        }
        Ok(cfg)
    }
}

fn validate_range<T>(key: &'static str, value: T, min: T, max: T) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(ConfigError::invalid(
            key,
            format!("{value}. Expected range: {min}..={max}"),
        ));
    }
    Ok(())
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string(raw_value: &str) -> Result<String, String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        return Err("expected double-quoted string".to_string());
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_string_list(raw_value: &str) -> Result<Vec<String>, String> {
    let inner = raw_value
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| "expected a list like [\"*.zip\", \"*.7z\"]".to_string())?;
    inner
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(parse_string)
        .collect()
}

fn parse_int<T>(raw_value: &str) -> Result<T, String>
where
    T: TryFrom<u64>,
{
    let token = raw_value.trim().replace('_', "");
    let value: u64 = token
        .parse()
        .map_err(|_| format!("expected a non-negative integer, got '{raw_value}'"))?;
    T::try_from(value).map_err(|_| format!("integer {value} is out of range"))
}

fn parse_float(raw_value: &str) -> Result<f64, String> {
    raw_value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("expected a number, got '{raw_value}'"))
}

fn parse_bool(raw_value: &str) -> Result<bool, String> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err("expected 'true' or 'false'".to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_from_kv_str_overrides_defaults() {
        let cfg = Config::from_kv_str(
            r#"
# politeness
global_concurrency = 4
per_host_concurrency = 2   # inline comment
refill_per_sec = 0.5
download_root = "/data/roms"
verify_on_completion = false
include_patterns = ["*.zip", "*.7z"]
max_download_size = 4_000_000_000
"#,
        )
        .unwrap();

        assert_eq!(cfg.global_concurrency, 4);
        assert_eq!(cfg.per_host_concurrency, 2);
        assert!((cfg.refill_per_sec - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.download_root, PathBuf::from("/data/roms"));
        assert!(!cfg.verify_on_completion);
        assert_eq!(cfg.include_patterns, vec!["*.zip", "*.7z"]);
        assert_eq!(cfg.max_download_size, Some(4_000_000_000));
        // untouched keys keep defaults
        assert_eq!(cfg.max_attempts, 3);
    }

    #[test]
    fn test_from_kv_str_reports_line_of_bad_value() {
        let err = Config::from_kv_str("max_attempts = 3\nbucket_capacity = lots\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { line: 2, .. }), "{err:?}");
    }

    #[test]
    fn test_from_kv_str_rejects_unknown_key_and_bad_syntax() {
        assert!(matches!(
            Config::from_kv_str("colour = \"blue\""),
            Err(ConfigError::UnknownKey { line: 1, .. })
        ));
        assert!(matches!(
            Config::from_kv_str("just words"),
            Err(ConfigError::Syntax { line: 1 })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let cfg = Config {
            global_concurrency: 0,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                key: "global_concurrency",
                ..
            })
        ));

        let cfg = Config {
            refill_per_sec: 0.0,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                key: "refill_per_sec",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_paths_and_urls() {
        let cfg = Config {
            download_root: PathBuf::new(),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = Config {
            base_url: "ftp://example.com/".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { key: "base_url", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_malformed_glob() {
        let cfg = Config {
            include_patterns: vec!["[unclosed".to_string()],
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                key: "include_patterns",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_cap_below_base() {
        let cfg = Config {
            backoff_base_ms: 5_000,
            backoff_cap_ms: 1_000,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
