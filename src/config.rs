//! Container tunables.
//!
//! The retry and round caps have no magic meaning; they exist so that a stuck
//! construction or a dependency cycle cannot keep invalidation or shutdown
//! looping forever. They are loaded from defaults, JSON or the environment.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DiError, DiResult};

/// Configuration of a [`Container`](crate::Container).
///
/// # Examples
///
/// ```
/// use ferrous_locator::ContainerConfig;
/// use std::time::Duration;
///
/// let config = ContainerConfig::from_json(r#"{ "max_clear_rounds": 4, "error_eviction_delay": { "secs": 0, "nanos": 5000000 } }"#).unwrap();
/// assert_eq!(config.max_clear_rounds, 4);
/// assert_eq!(config.error_eviction_delay, Duration::from_millis(5));
/// assert_eq!(config.max_invalidation_rounds, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Times invalidation waits for a `Creating` holder before giving up on it.
    pub max_invalidation_rounds: usize,
    /// Re-runs of a constructor whose synchronous injections were still pending.
    pub max_init_retries: usize,
    /// Dependency-ordered rounds `clear_all` performs before force-destroying the rest.
    pub max_clear_rounds: usize,
    /// Delay before a failed singleton is evicted so the next lookup can rebuild it.
    pub error_eviction_delay: Duration,
    /// Priority given to request contexts begun without an explicit one.
    pub default_request_priority: i32,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_invalidation_rounds: 3,
            max_init_retries: 3,
            max_clear_rounds: 10,
            error_eviction_delay: Duration::from_millis(10),
            default_request_priority: 100,
        }
    }
}

impl ContainerConfig {
    /// Parses a JSON document; missing fields keep their defaults.
    pub fn from_json(source: &str) -> DiResult<Self> {
        serde_json::from_str(source).map_err(DiError::unknown)
    }

    /// Defaults overlaid with `LOCATOR_*` environment variables.
    pub fn from_env() -> DiResult<Self> {
        Self::from_env_with_prefix("LOCATOR")
    }

    /// Defaults overlaid with `{PREFIX}_*` environment variables.
    ///
    /// Recognized keys: `MAX_INVALIDATION_ROUNDS`, `MAX_INIT_RETRIES`,
    /// `MAX_CLEAR_ROUNDS`, `ERROR_EVICTION_DELAY_MS`, `DEFAULT_REQUEST_PRIORITY`.
    pub fn from_env_with_prefix(prefix: &str) -> DiResult<Self> {
        let mut config = Self::default();
        let prefix = prefix.to_uppercase();
        let var = |key: &str| env::var(format!("{}_{}", prefix, key)).ok();

        if let Some(v) = var("MAX_INVALIDATION_ROUNDS") {
            config.max_invalidation_rounds = parse(&v, "MAX_INVALIDATION_ROUNDS")?;
        }
        if let Some(v) = var("MAX_INIT_RETRIES") {
            config.max_init_retries = parse(&v, "MAX_INIT_RETRIES")?;
        }
        if let Some(v) = var("MAX_CLEAR_ROUNDS") {
            config.max_clear_rounds = parse(&v, "MAX_CLEAR_ROUNDS")?;
        }
        if let Some(v) = var("ERROR_EVICTION_DELAY_MS") {
            config.error_eviction_delay = Duration::from_millis(parse(&v, "ERROR_EVICTION_DELAY_MS")?);
        }
        if let Some(v) = var("DEFAULT_REQUEST_PRIORITY") {
            config.default_request_priority = parse(&v, "DEFAULT_REQUEST_PRIORITY")?;
        }
        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(raw: &str, key: &str) -> DiResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| DiError::unknown(format!("invalid value {:?} for {}", raw, key)))
}

/// Knobs for [`Container::clear_all`](crate::Container::clear_all).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearOptions {
    /// End every active request context after the singletons are cleared.
    pub clear_request_contexts: bool,
    /// Overrides [`ContainerConfig::max_clear_rounds`].
    pub max_rounds: Option<usize>,
    /// Await [`Container::ready`](crate::Container::ready) before clearing.
    pub wait_for_settlement: bool,
}

impl Default for ClearOptions {
    fn default() -> Self {
        Self {
            clear_request_contexts: true,
            max_rounds: None,
            wait_for_settlement: true,
        }
    }
}
