use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::collect::CollectorSettings;
use crate::request::RetryPolicy;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub url: String,
    pub key: String,
}

/// Runtime configuration. Every field can be overridden from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub queries: Vec<String>,
    pub output_dir: PathBuf,
    pub api_base: String,
    /// Empty means requests go out directly.
    pub proxy_urls: Vec<String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub collector: CollectorSettings,
    /// Downstream load runs only when this is set.
    pub store: Option<StoreConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            queries: vec!["growth".to_string()],
            output_dir: PathBuf::from("."),
            api_base: "https://substack.com/api/v1".to_string(),
            proxy_urls: Vec::new(),
            request_timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            collector: CollectorSettings::default(),
            store: None,
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the `HARVEST_*` variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let default = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let queries = get("HARVEST_QUERIES")
            .map(|v| split_list(&v))
            .unwrap_or(default.queries);
        let proxy_urls = get("HARVEST_PROXY_URLS")
            .map(|v| split_list(&v))
            .unwrap_or(default.proxy_urls);

        let store = match (get("SUPABASE_URL"), get("SUPABASE_KEY")) {
            (Some(url), Some(key)) => Some(StoreConfig { url, key }),
            _ => None,
        };

        Ok(Self {
            queries,
            output_dir: get("HARVEST_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.output_dir),
            api_base: get("HARVEST_API_BASE").unwrap_or(default.api_base),
            proxy_urls,
            request_timeout: parse_or(&get, "HARVEST_TIMEOUT_SECS", crate::DEFAULT_TIMEOUT_SECS)
                .map(Duration::from_secs)?,
            retry: RetryPolicy {
                max_attempts: parse_or(&get, "HARVEST_MAX_ATTEMPTS", default.retry.max_attempts)?,
                base_delay: parse_or(&get, "HARVEST_BACKOFF_MS", crate::DEFAULT_BACKOFF_MS)
                    .map(Duration::from_millis)?,
            },
            collector: CollectorSettings {
                search_batch: parse_or(&get, "HARVEST_SEARCH_BATCH", default.collector.search_batch)?,
                latest_batch: parse_or(&get, "HARVEST_LATEST_BATCH", default.collector.latest_batch)?,
                popular_batch: parse_or(
                    &get,
                    "HARVEST_POPULAR_BATCH",
                    default.collector.popular_batch,
                )?,
                min_subscribers: parse_or(
                    &get,
                    "HARVEST_MIN_SUBSCRIBERS",
                    default.collector.min_subscribers,
                )?,
            },
            store,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| Error::Config {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}
