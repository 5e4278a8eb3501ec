use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{DEFAULT_TIMEOUT, DEFAULT_TTL};
use crate::catalog::KindConflictPolicy;
use crate::logging::LogFormat;
use crate::query::DEFAULT_QUERY_TIMEOUT;
use crate::{Result, TimeseriesError};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;

/// Service settings, read once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    /// `None` keeps the database in memory.
    pub db_path: Option<PathBuf>,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_timeout: Duration,
    pub cache_max_entries: usize,
    pub kind_conflict_policy: KindConflictPolicy,
    pub strict_query_ranges: bool,
    pub query_timeout: Duration,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: None,
            cache_enabled: true,
            cache_ttl: DEFAULT_TTL,
            cache_timeout: DEFAULT_TIMEOUT,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            kind_conflict_policy: KindConflictPolicy::default(),
            strict_query_ranges: false,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty());

        Ok(Self {
            port: parse_or(&get, "PORT", defaults.port)?,
            db_path: get("DB_PATH").map(PathBuf::from),
            cache_enabled: parse_flag(&get, "CACHE_ENABLED", defaults.cache_enabled)?,
            cache_ttl: Duration::from_secs(parse_or(&get, "CACHE_TTL_SECONDS", defaults.cache_ttl.as_secs())?),
            cache_timeout: Duration::from_millis(parse_or(
                &get,
                "CACHE_TIMEOUT_MS",
                defaults.cache_timeout.as_millis() as u64,
            )?),
            cache_max_entries: parse_or(&get, "CACHE_MAX_ENTRIES", defaults.cache_max_entries)?,
            kind_conflict_policy: parse_or(&get, "KIND_CONFLICT_POLICY", defaults.kind_conflict_policy)?,
            strict_query_ranges: parse_flag(&get, "STRICT_QUERY_RANGES", defaults.strict_query_ranges)?,
            query_timeout: Duration::from_secs(parse_or(
                &get,
                "QUERY_TIMEOUT_SECONDS",
                defaults.query_timeout.as_secs(),
            )?),
            log_format: parse_or(&get, "LOG_FORMAT", defaults.log_format)?,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| TimeseriesError::Config(format!("invalid {}={:?}: {}", key, raw, e))),
        None => Ok(default),
    }
}

fn parse_flag<G>(get: &G, key: &str, default: bool) -> Result<bool>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|raw| raw.to_ascii_lowercase()) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(TimeseriesError::Config(format!(
                "invalid {}={:?}: expected true or false",
                key, raw
            ))),
        },
    }
}
