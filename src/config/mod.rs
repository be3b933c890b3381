//! Backplane configuration.
//!
//! Loaded from YAML files and environment variables. Every section has
//! defaults, so an empty configuration is a working in-memory setup.

use std::time::Duration;

use serde::Deserialize;

use crate::runtime::HostOptions;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "backplane.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BACKPLANE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BACKPLANE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BACKPLANE_LOG";

/// Main backplane configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackplaneConfig {
    pub streams: StreamsConfig,
    pub persistence: PersistenceConfig,
    pub membership: MembershipConfig,
    pub runtime: RuntimeConfig,
}

/// Replay windows per stream kind.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    /// The hub-wide "all" stream.
    pub all: StreamConfig,
    /// Per-connection streams.
    pub client: StreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Messages retained for replay. Zero disables replay.
    pub capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

/// Stream buffer persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Snapshot stream buffers so replay survives reactivation.
    pub enabled: bool,
    /// Period of the buffer snapshot timer in milliseconds.
    pub flush_interval_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            flush_interval_ms: 1000,
        }
    }
}

impl PersistenceConfig {
    /// Snapshot timer period, or `None` when persistence is off.
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.enabled && self.flush_interval_ms > 0)
            .then(|| Duration::from_millis(self.flush_interval_ms))
    }
}

/// Group and user membership persistence.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MembershipConfig {
    /// Period of the membership snapshot timer. Zero saves only on deactivation.
    pub flush_interval_secs: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 30,
        }
    }
}

impl MembershipConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }
}

/// Actor runtime settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Deactivate actors after this many idle seconds. Zero keeps them alive.
    pub idle_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 900,
        }
    }
}

impl RuntimeConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

impl BackplaneConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `backplane.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, e.g.
    ///    `BACKPLANE__STREAMS__CLIENT__CAPACITY=50`
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Create config for testing: small replay windows, no idle eviction.
    pub fn for_test() -> Self {
        Self {
            streams: StreamsConfig {
                all: StreamConfig { capacity: 10 },
                client: StreamConfig { capacity: 10 },
            },
            runtime: RuntimeConfig {
                idle_timeout_secs: 0,
            },
            ..Default::default()
        }
    }

    /// Timers for "all" and client stream actors.
    pub fn stream_host_options(&self) -> HostOptions {
        HostOptions {
            flush_interval: self.persistence.flush_interval(),
            idle_timeout: self.runtime.idle_timeout(),
        }
    }

    /// Timers for group and user membership actors.
    pub fn membership_host_options(&self) -> HostOptions {
        HostOptions {
            flush_interval: self.membership.flush_interval(),
            idle_timeout: self.runtime.idle_timeout(),
        }
    }
}
