//! Conduitd's config defaults and deserializer.
//!
//! Grounded on `original_source`'s absence of any daemon config at all
//! (`pipez` is a library, not a service) and on the teacher's
//! `ufod::config::UfodConfig` / `default-config.toml` pattern: every field
//! that can have a default does, every field is documented in
//! `default-config.toml`, and `ConduitdConfig::load_from_file` is the only
//! sanctioned way to build one.

use std::{fs::File, io::Write, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use smartstring::{LazyCompact, SmartString};

/// Top-level daemon configuration, loaded from a TOML file.
#[derive(Deserialize, Debug)]
pub struct ConduitdConfig {
	/// Pipeline runner settings
	#[serde(default)]
	pub pipeline: PipelineConfig,

	/// Liveness monitor settings
	#[serde(default)]
	pub liveness: LivenessConfig,

	/// Metrics HTTP endpoint settings
	#[serde(default)]
	pub metrics: MetricsConfig,

	/// Logging settings
	#[serde(default)]
	pub logging: LoggingConfig,
}

impl ConduitdConfig {
	const DEFAULT_CONFIG: &'static str = include_str!("./config/default-config.toml");

	/// Write the default config to `path`, overwriting anything already there.
	pub fn create_default_config(path: &Path) -> Result<(), std::io::Error> {
		let mut file = File::create(path)?;
		file.write_all(Self::DEFAULT_CONFIG.as_bytes())
	}

	/// Load a config from a TOML file. This is the only sanctioned way to
	/// build a [`ConduitdConfig`].
	pub fn load_from_file(config_path: &Path) -> anyhow::Result<Self> {
		let config_string = std::fs::read_to_string(config_path)
			.with_context(|| format!("could not read config file `{}`", config_path.display()))?;
		let config: Self = toml::from_str(&config_string)
			.with_context(|| format!("could not parse config file `{}`", config_path.display()))?;
		Ok(config)
	}
}

impl Default for ConduitdConfig {
	fn default() -> Self {
		toml::from_str(Self::DEFAULT_CONFIG).expect("the shipped default config is always valid")
	}
}

/// Pipeline runner settings: queue capacity and watchdog cadence.
#[derive(Deserialize, Debug)]
pub struct PipelineConfig {
	/// Capacity of every queue the builder allocates, unless a node's
	/// config record overrides it per-port.
	#[serde(default = "PipelineConfig::default_queue_capacity")]
	pub queue_capacity: usize,

	/// How often the watchdog polls every node's status and heartbeats
	/// the shared-state plane, in milliseconds.
	#[serde(default = "PipelineConfig::default_watchdog_interval_ms")]
	pub watchdog_interval_ms: u64,
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			queue_capacity: Self::default_queue_capacity(),
			watchdog_interval_ms: Self::default_watchdog_interval_ms(),
		}
	}
}

impl PipelineConfig {
	fn default_queue_capacity() -> usize {
		32
	}

	fn default_watchdog_interval_ms() -> u64 {
		1_000
	}
}

/// Liveness monitor settings (spec.md 4.H): a `PROCESS`-isolated watchdog
/// of the watchdog, for use when this daemon is itself pid 1 in a
/// container.
#[derive(Deserialize, Debug)]
pub struct LivenessConfig {
	/// Start the liveness monitor alongside the pipeline. Off by default:
	/// only meaningful when conduitd is the container's entrypoint.
	#[serde(default)]
	pub enabled: bool,

	/// How long the watchdog's heartbeat may go stale before the liveness
	/// monitor sends `SIGTERM` to pid 1. 120s matches a typical container
	/// restart policy; raise to 600s for a "relaxed" profile on pipelines
	/// with long per-iteration timeouts.
	#[serde(default = "LivenessConfig::default_stall_threshold_secs")]
	pub stall_threshold_secs: f64,
}

impl Default for LivenessConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			stall_threshold_secs: Self::default_stall_threshold_secs(),
		}
	}
}

impl LivenessConfig {
	fn default_stall_threshold_secs() -> f64 {
		120.0
	}

	/// This config's threshold as a [`Duration`]
	pub fn stall_threshold(&self) -> Duration {
		Duration::from_secs_f64(self.stall_threshold_secs)
	}
}

/// Metrics HTTP endpoint settings (spec.md section 6).
#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
	/// Serve the metrics JSON/HTML endpoints alongside the pipeline.
	#[serde(default)]
	pub enabled: bool,

	/// IP and port to bind the metrics server to, e.g. `127.0.0.1:9090`.
	#[serde(default = "MetricsConfig::default_server_addr")]
	pub server_addr: SmartString<LazyCompact>,
}

impl Default for MetricsConfig {
	fn default() -> Self {
		Self {
			enabled: false,
			server_addr: Self::default_server_addr(),
		}
	}
}

impl MetricsConfig {
	fn default_server_addr() -> SmartString<LazyCompact> {
		"127.0.0.1:9090".into()
	}
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Trace,
	Debug,
	Info,
	Warn,
	Error,
}

impl Default for LogLevel {
	fn default() -> Self {
		Self::Info
	}
}

impl std::fmt::Display for LogLevel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Trace => write!(f, "trace"),
			Self::Debug => write!(f, "debug"),
			Self::Info => write!(f, "info"),
			Self::Warn => write!(f, "warn"),
			Self::Error => write!(f, "error"),
		}
	}
}

/// Logging settings
#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
	/// `conduit_pipeline`'s own log level
	#[serde(default)]
	pub pipeline: LogLevel,

	/// `tower_http`'s request-tracing log level, used only when the
	/// metrics HTTP endpoint is enabled
	#[serde(default)]
	pub http: LogLevel,

	/// Every other target's log level
	#[serde(default = "LoggingConfig::default_all")]
	pub all: LogLevel,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			pipeline: LogLevel::default(),
			http: LogLevel::default(),
			all: Self::default_all(),
		}
	}
}

impl LoggingConfig {
	fn default_all() -> LogLevel {
		LogLevel::Warn
	}

	/// Convert this config into a `tracing_subscriber` env-filter string
	pub fn to_env_filter(&self) -> String {
		format!(
			"conduit_pipeline={},conduit_nodes={},conduitd={},tower_http={},{}",
			self.pipeline, self.pipeline, self.pipeline, self.http, self.all
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Make sure the default config we ship with is valid
	#[test]
	fn default_config_is_valid() {
		let _x: ConduitdConfig = toml::from_str(ConduitdConfig::DEFAULT_CONFIG).unwrap();
	}

	#[test]
	fn default_trait_matches_shipped_config() {
		let config = ConduitdConfig::default();
		assert_eq!(config.pipeline.queue_capacity, 32);
		assert!(!config.liveness.enabled);
		assert!(!config.metrics.enabled);
	}
}
