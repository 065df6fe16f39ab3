//! Resolver configuration.
//!
//! Configuration can be deserialized (durations in humantime format, e.g. `"30s"`)
//! or built with the fallible builder. Both paths run the same validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::{backoff::BackoffPolicy, seed::Seed};

/// Configuration validation error.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A configuration value is invalid.
    #[snafu(display("invalid config: {message}"))]
    Validation {
        /// Description of the validation failure.
        message: String,
    },

    /// A seed is not a valid `host:port` endpoint.
    #[snafu(display("invalid seed '{seed}': {message}"))]
    InvalidSeed {
        /// The rejected seed as written.
        seed: String,
        /// Why it was rejected.
        message: String,
    },
}

/// Default delay between successful polls (30 seconds).
fn default_poll_delay() -> Duration {
    Duration::from_secs(30)
}

/// Default per-attempt timeout (5 seconds).
fn default_attempt_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Default consecutive discovery failures before failing over to the next seed.
fn default_max_discovery_attempts() -> u32 {
    10
}

/// Default initial retry backoff (100 milliseconds).
fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

/// Default maximum retry backoff (5 seconds).
fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

/// Configuration for topology discovery.
///
/// # Example
///
/// ```no_run
/// # use std::time::Duration;
/// # use inferadb_ledger_topology::{ResolverConfig, Seed};
/// let config = ResolverConfig::builder()
///     .seeds(Seed::parse_all(["ledger-0:5000", "ledger-1:5000"]).expect("valid seeds"))
///     .poll_delay(Duration::from_secs(10))
///     .build()
///     .expect("valid resolver config");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Seed endpoints queried for topology, tried in order.
    ///
    /// Must be non-empty.
    pub seeds: Vec<Seed>,
    /// Delay between successful polls of a pull-based source.
    #[serde(default = "default_poll_delay", with = "humantime_serde")]
    pub poll_delay: Duration,
    /// Timeout for a single fetch, and for the first snapshot of a streaming subscription.
    ///
    /// Must be > 0.
    #[serde(default = "default_attempt_timeout", with = "humantime_serde")]
    pub attempt_timeout: Duration,
    /// Consecutive fetch failures tolerated before failing over to the next seed.
    ///
    /// Must be >= 1.
    #[serde(default = "default_max_discovery_attempts")]
    pub max_discovery_attempts: u32,
    /// Backoff before the first retry.
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Upper bound for retry backoff.
    ///
    /// Must be >= `initial_backoff`.
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

#[bon::bon]
impl ResolverConfig {
    /// Creates a new resolver configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the seed list is empty or any
    /// value is out of range.
    #[builder]
    pub fn new(
        seeds: Vec<Seed>,
        #[builder(default = default_poll_delay())] poll_delay: Duration,
        #[builder(default = default_attempt_timeout())] attempt_timeout: Duration,
        #[builder(default = default_max_discovery_attempts())] max_discovery_attempts: u32,
        #[builder(default = default_initial_backoff())] initial_backoff: Duration,
        #[builder(default = default_max_backoff())] max_backoff: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            seeds,
            poll_delay,
            attempt_timeout,
            max_discovery_attempts,
            initial_backoff,
            max_backoff,
        };
        config.validate()?;
        Ok(config)
    }
}

impl ResolverConfig {
    /// Validates the configuration values.
    ///
    /// Call after deserialization to ensure values are within valid ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::Validation {
                message: "at least one seed is required".to_owned(),
            });
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::Validation {
                message: "attempt_timeout must be > 0".to_owned(),
            });
        }
        if self.max_discovery_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_discovery_attempts must be >= 1".to_owned(),
            });
        }
        if self.initial_backoff > self.max_backoff {
            return Err(ConfigError::Validation {
                message: format!(
                    "initial_backoff ({:?}) must be <= max_backoff ({:?})",
                    self.initial_backoff, self.max_backoff
                ),
            });
        }
        Ok(())
    }

    /// Returns the backoff policy derived from this configuration.
    #[must_use]
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.initial_backoff, self.max_backoff)
    }
}

/// Duration serialization using humantime format.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
