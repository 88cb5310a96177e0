//! Declarative store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Errors in a sample window of this size trip the breaker when they arrive
/// faster than [`INFINITE_ERROR_THRESHOLD_TIME`].
pub const INFINITE_ERROR_SAMPLE: u32 = 10;

/// Minimum spacing between error sample windows.
pub const INFINITE_ERROR_THRESHOLD_TIME: Duration = Duration::from_millis(500);

/// Store settings that can come from a config file.
///
/// ```toml
/// store_name = "editor-store"
/// disable_side_effects = false
/// infinite_error_sample = 10
/// infinite_error_threshold_ms = 500
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
	/// Namespaces generated action ids and marks serialized action provenance.
	pub store_name: String,
	/// Skip effect instantiation entirely.
	pub disable_side_effects: bool,
	pub infinite_error_sample: u32,
	pub infinite_error_threshold_ms: u64,
}

impl Default for StoreConfig {
	fn default() -> Self {
		Self {
			store_name: "main-store".to_string(),
			disable_side_effects: false,
			infinite_error_sample: INFINITE_ERROR_SAMPLE,
			infinite_error_threshold_ms: INFINITE_ERROR_THRESHOLD_TIME.as_millis() as u64,
		}
	}
}

impl StoreConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input).map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
		config.validate()?;
		Ok(config)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.store_name.is_empty() {
			return Err(ConfigError::InvalidConfig("store_name must not be empty".into()));
		}
		if self.infinite_error_sample == 0 {
			return Err(ConfigError::InvalidConfig("infinite_error_sample must be at least 1".into()));
		}
		Ok(())
	}

	pub fn infinite_error_threshold(&self) -> Duration {
		Duration::from_millis(self.infinite_error_threshold_ms)
	}
}
