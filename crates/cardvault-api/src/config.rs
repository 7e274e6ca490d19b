use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Bearer token → user id
    pub api_tokens: HashMap<String, String>,
    pub rate_limit_window: Duration,
    pub bulk_sync_rate_limit_per_window: u32,
    pub mutation_rate_limit_per_window: u32,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&str> = self.api_tokens.values().map(String::as_str).collect();
        users.sort_unstable();
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("api_tokens", &format!("[REDACTED; users={users:?}]"))
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "bulk_sync_rate_limit_per_window",
                &self.bulk_sync_rate_limit_per_window,
            )
            .field(
                "mutation_rate_limit_per_window",
                &self.mutation_rate_limit_per_window,
            )
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "CARDVAULT_API_BIND_ADDR", "127.0.0.1:8080");
        let api_tokens = parse_api_tokens(&required_trimmed(&lookup, "CARDVAULT_API_TOKENS")?)?;

        let rate_limit_window_secs = value_or_default(&lookup, "RATE_LIMIT_WINDOW_SECS", "60")
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::Invalid(
                    "RATE_LIMIT_WINDOW_SECS must be an integer in [10, 3600]".to_string(),
                )
            })?;
        if !(10..=3_600).contains(&rate_limit_window_secs) {
            return Err(ConfigError::Invalid(
                "RATE_LIMIT_WINDOW_SECS must be in [10, 3600]".to_string(),
            ));
        }

        let bulk_sync_rate_limit_per_window =
            value_or_default(&lookup, "BULK_SYNC_RATE_LIMIT_PER_WINDOW", "60")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "BULK_SYNC_RATE_LIMIT_PER_WINDOW must be an integer in [1, 1000]"
                            .to_string(),
                    )
                })?;
        if !(1..=1_000).contains(&bulk_sync_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "BULK_SYNC_RATE_LIMIT_PER_WINDOW must be in [1, 1000]".to_string(),
            ));
        }

        let mutation_rate_limit_per_window =
            value_or_default(&lookup, "MUTATION_RATE_LIMIT_PER_WINDOW", "300")
                .parse::<u32>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "MUTATION_RATE_LIMIT_PER_WINDOW must be an integer in [1, 5000]"
                            .to_string(),
                    )
                })?;
        if !(1..=5_000).contains(&mutation_rate_limit_per_window) {
            return Err(ConfigError::Invalid(
                "MUTATION_RATE_LIMIT_PER_WINDOW must be in [1, 5000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            api_tokens,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            bulk_sync_rate_limit_per_window,
            mutation_rate_limit_per_window,
        })
    }
}

/// Parse `token=user` pairs separated by commas.
fn parse_api_tokens(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (token, user) = pair.split_once('=').ok_or_else(|| {
            ConfigError::Invalid("CARDVAULT_API_TOKENS entries must look like token=user".to_string())
        })?;
        let (token, user) = (token.trim(), user.trim());
        if token.is_empty() || user.is_empty() {
            return Err(ConfigError::Invalid(
                "CARDVAULT_API_TOKENS entries need both a token and a user".to_string(),
            ));
        }
        if tokens.insert(token.to_string(), user.to_string()).is_some() {
            return Err(ConfigError::Invalid(
                "CARDVAULT_API_TOKENS contains a duplicate token".to_string(),
            ));
        }
    }
    if tokens.is_empty() {
        return Err(ConfigError::MissingVar("CARDVAULT_API_TOKENS"));
    }
    Ok(tokens)
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
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
