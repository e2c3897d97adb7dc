//! Process-wide dispatch settings.
//!
//! All fields carry serde defaults, so an absent file or an entirely
//! unconfigured environment produces valid settings.

use crate::error::ConfigError;
use courier_transport::EntityOptions;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Environment variable prefix, e.g. `COURIER__PREFIX_NAME=dev-`
pub const ENV_PREFIX: &str = "COURIER";

/// Name of the optional deployment-local settings file, without extension
pub const LOCAL_SETTINGS_FILE: &str = "config/courier";

/// Retry policy applied when appending a message to a batch fails
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppendRetryPolicy {
    /// Retries after the first failed attempt before the message is dropped
    pub max_retries: u32,
    /// Fixed delay between two attempts
    pub delay_ms: u64,
}

impl AppendRetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for AppendRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1000,
        }
    }
}

/// Dispatch engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Prepended to every queue and topic name
    pub prefix_name: String,
    /// Strategy used for destinations without an override
    pub send_strategy_name: String,
    /// Messages per destination batch before a size-triggered flush
    pub batch_sending_buffer_size: usize,
    /// Age at which an open batch is flushed regardless of its size
    pub batch_flush_deadline_ms: u64,
    /// Upper bound on one batch send call
    pub batch_send_timeout_secs: u64,
    pub append_retry: AppendRetryPolicy,
    /// Maximum messages fetched per poll
    pub receive_message_buffer_size: u32,
    /// Poll timeout of receiver loops
    pub receive_message_timeout_secs: u64,
    pub default_message_ttl_days: u64,
    pub auto_delete_on_idle_days: u64,
    pub max_delivery_count: u32,
    /// Route every send through the in-process mock strategy
    pub use_mock_for_unit_tests: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            prefix_name: String::new(),
            send_strategy_name: "bufferized".to_string(),
            batch_sending_buffer_size: 20,
            batch_flush_deadline_ms: 1000,
            batch_send_timeout_secs: 15,
            append_retry: AppendRetryPolicy::default(),
            receive_message_buffer_size: 10,
            receive_message_timeout_secs: 1,
            default_message_ttl_days: 1,
            auto_delete_on_idle_days: 7,
            max_delivery_count: 1,
            use_mock_for_unit_tests: false,
        }
    }
}

impl BusSettings {
    /// Load settings from files and the environment.
    ///
    /// Sources, later ones overriding earlier ones:
    ///  1. `config/courier.{toml,json,yaml}` if present
    ///  2. `path`, which must exist when given
    ///  3. Environment variables prefixed `COURIER__`
    ///     e.g. `COURIER__APPEND_RETRY__MAX_RETRIES=5`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(LOCAL_SETTINGS_FILE).required(false));

        if let Some(path) = path {
            info!(path = %path.display(), "Loading settings from explicit path");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: BusSettings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_strategy_name.trim().is_empty() {
            return Err(ConfigError::Missing {
                field: "send_strategy_name".to_string(),
            });
        }

        if self.batch_sending_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_sending_buffer_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.receive_message_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "receive_message_buffer_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if self.receive_message_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "receive_message_timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Strategy used for destinations without an override
    pub fn default_strategy_name(&self) -> &str {
        if self.use_mock_for_unit_tests {
            crate::strategy::MOCK
        } else {
            &self.send_strategy_name
        }
    }

    /// Apply the name prefix
    pub fn prefixed(&self, name: &str) -> String {
        format!("{}{}", self.prefix_name, name)
    }

    pub fn batch_flush_deadline(&self) -> Duration {
        Duration::from_millis(self.batch_flush_deadline_ms)
    }

    pub fn batch_send_timeout(&self) -> Duration {
        Duration::from_secs(self.batch_send_timeout_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_message_timeout_secs)
    }

    /// Options used when a destination is created on first use
    pub fn entity_options(&self) -> EntityOptions {
        EntityOptions {
            default_message_ttl: Duration::from_secs(
                self.default_message_ttl_days.saturating_mul(SECONDS_PER_DAY),
            ),
            auto_delete_on_idle: Duration::from_secs(
                self.auto_delete_on_idle_days.saturating_mul(SECONDS_PER_DAY),
            ),
            max_delivery_count: self.max_delivery_count,
        }
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
