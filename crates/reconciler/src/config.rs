//! Configuration for the reconciliation controller.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::BackoffPolicy;
use crate::error::{Error, Result};

/// Environment variables read by [`ReconcilerConfig::from_env`].
pub const ENV_BASE_DELAY_MS: &str = "TETHER_BASE_DELAY_MS";
pub const ENV_MAX_DELAY_MS: &str = "TETHER_MAX_DELAY_MS";
pub const ENV_MAX_TOTAL_MS: &str = "TETHER_MAX_TOTAL_MS";
pub const ENV_MUTATION_RETRIES: &str = "TETHER_MUTATION_RETRIES";

/// Controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// How many times a transient add/remove failure is retried before it
    /// is escalated.
    #[serde(default = "default_mutation_retries")]
    pub mutation_retries: u32,

    /// Pause between mutation retries.
    #[serde(
        rename = "mutation_retry_delay_ms",
        with = "duration_ms",
        default = "default_mutation_retry_delay"
    )]
    pub mutation_retry_delay: Duration,

    /// Convergence polling schedule.
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            mutation_retries: default_mutation_retries(),
            mutation_retry_delay: default_mutation_retry_delay(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ReconcilerConfig {
    #[must_use]
    pub const fn with_mutation_retries(mut self, retries: u32) -> Self {
        self.mutation_retries = retries;
        self
    }

    #[must_use]
    pub const fn with_mutation_retry_delay(mut self, delay: Duration) -> Self {
        self.mutation_retry_delay = delay;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check the configuration for values that would break the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let backoff = &self.backoff;
        if backoff.base_delay.is_zero() {
            return Err(Error::invalid_config("backoff.base_delay_ms must be > 0"));
        }
        if backoff.max_delay < backoff.base_delay {
            return Err(Error::invalid_config(
                "backoff.max_delay_ms must be >= backoff.base_delay_ms",
            ));
        }
        if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
            return Err(Error::invalid_config(
                "backoff.multiplier must be a finite number >= 1.0",
            ));
        }
        if backoff.max_total.is_zero() {
            return Err(Error::invalid_config("backoff.max_total_ms must be > 0"));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] on malformed TOML and
    /// [`Error::InvalidConfig`] on out-of-range values.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::config_parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. `.json` files are read as JSON, anything
    /// else as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigRead`] if the file cannot be read, otherwise
    /// the same errors as [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::config_read(path, e.to_string()))?;

        if path.extension().is_some_and(|e| e == "json") {
            let config: Self =
                serde_json::from_str(&content).map_err(|e| Error::config_parse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Self::from_toml_str(&content)
        }
    }

    /// Defaults overridden by `TETHER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a variable is not a number or the
    /// result fails validation.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup, then validate.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str| -> Result<Option<Duration>> {
            lookup(key)
                .map(|raw| {
                    raw.trim()
                        .parse::<u64>()
                        .map(Duration::from_millis)
                        .map_err(|_| Error::invalid_config(format!("{key}='{raw}' is not a number")))
                })
                .transpose()
        };

        if let Some(delay) = millis(ENV_BASE_DELAY_MS)? {
            self.backoff.base_delay = delay;
        }
        if let Some(delay) = millis(ENV_MAX_DELAY_MS)? {
            self.backoff.max_delay = delay;
        }
        if let Some(total) = millis(ENV_MAX_TOTAL_MS)? {
            self.backoff.max_total = total;
        }
        if let Some(raw) = lookup(ENV_MUTATION_RETRIES) {
            self.mutation_retries = raw.trim().parse().map_err(|_| {
                Error::invalid_config(format!("{ENV_MUTATION_RETRIES}='{raw}' is not a number"))
            })?;
        }

        self.validate()?;
        Ok(self)
    }
}

const fn default_mutation_retries() -> u32 {
    3
}

const fn default_mutation_retry_delay() -> Duration {
    Duration::from_millis(200)
}

/// Serialization helper for Duration as milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
