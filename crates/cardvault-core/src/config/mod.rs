//! Client configuration read from the environment.
//!
//! Covers where the collection service lives, who the local replica belongs
//! to, and how eagerly the query cache resyncs.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cache::StaleTime;
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_HTTP_TIMEOUT_SECS: &str = "15";
const DEFAULT_SYNC_DEBOUNCE_MS: &str = "250";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub access_token: String,
    pub user_id: String,
    /// Replica location; callers pick a per-profile default when unset
    pub db_path: Option<PathBuf>,
    pub http_timeout: Duration,
    pub sync_debounce: Duration,
    pub stale_time: StaleTime,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_url", &self.api_url)
            .field("access_token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("db_path", &self.db_path)
            .field("http_timeout", &self.http_timeout)
            .field("sync_debounce", &self.sync_debounce)
            .field("stale_time", &self.stale_time)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_url = required_trimmed(&lookup, "CARDVAULT_API_URL")?;
        if !is_http_url(&api_url) {
            return Err(ConfigError::Invalid(
                "CARDVAULT_API_URL must start with http:// or https://".to_string(),
            ));
        }
        let api_url = api_url.trim_end_matches('/').to_string();

        let access_token = required_trimmed(&lookup, "CARDVAULT_ACCESS_TOKEN")?;
        let user_id = required_trimmed(&lookup, "CARDVAULT_USER_ID")?;
        let db_path = optional_trimmed(&lookup, "CARDVAULT_DB_PATH").map(PathBuf::from);

        let http_timeout_secs = value_or_default(
            &lookup,
            "CARDVAULT_HTTP_TIMEOUT_SECS",
            DEFAULT_HTTP_TIMEOUT_SECS,
        )
        .parse::<u64>()
        .map_err(|_| {
            ConfigError::Invalid(
                "CARDVAULT_HTTP_TIMEOUT_SECS must be an integer in [1, 300]".to_string(),
            )
        })?;
        if !(1..=300).contains(&http_timeout_secs) {
            return Err(ConfigError::Invalid(
                "CARDVAULT_HTTP_TIMEOUT_SECS must be in [1, 300]".to_string(),
            ));
        }

        let sync_debounce_ms =
            value_or_default(&lookup, "CARDVAULT_SYNC_DEBOUNCE_MS", DEFAULT_SYNC_DEBOUNCE_MS)
                .parse::<u64>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "CARDVAULT_SYNC_DEBOUNCE_MS must be an integer in [0, 60000]".to_string(),
                    )
                })?;
        if sync_debounce_ms > 60_000 {
            return Err(ConfigError::Invalid(
                "CARDVAULT_SYNC_DEBOUNCE_MS must be in [0, 60000]".to_string(),
            ));
        }

        let stale_time = parse_stale_time(optional_trimmed(&lookup, "CARDVAULT_STALE_TIME_SECS"))?;

        Ok(Self {
            api_url,
            access_token,
            user_id,
            db_path,
            http_timeout: Duration::from_secs(http_timeout_secs),
            sync_debounce: Duration::from_millis(sync_debounce_ms),
            stale_time,
        })
    }
}

/// `never` (or unset) keeps the cache fresh until invalidated; a number of
/// seconds expires it.
fn parse_stale_time(raw: Option<String>) -> Result<StaleTime, ConfigError> {
    let Some(raw) = raw else {
        return Ok(StaleTime::Never);
    };
    if raw.eq_ignore_ascii_case("never") {
        return Ok(StaleTime::Never);
    }
    raw.parse::<u64>()
        .map(|secs| StaleTime::After(Duration::from_secs(secs)))
        .map_err(|_| {
            ConfigError::Invalid(
                "CARDVAULT_STALE_TIME_SECS must be 'never' or a number of seconds".to_string(),
            )
        })
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}
