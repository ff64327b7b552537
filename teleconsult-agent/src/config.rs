//! Configuration for the pre-flight agent.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use teleconsult_core::media::ConnectionClass;
use teleconsult_core::{LinkConditions, NetworkHint, SessionConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Options handed to `Session::initialize` for both parties.
    pub session: SessionConfig,
    /// Downlink hint used when picking capture constraints.
    pub network: NetworkConfig,
    /// Loopback call settings.
    pub self_test: SelfTestConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network hint configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// "slow2g", "cellular2g", "cellular3g", "cellular4g" or "broadband".
    /// Unset means no hint.
    pub class: Option<ConnectionClass>,
    /// Estimated downlink in megabits per second.
    pub downlink_mbps: Option<f64>,
}

/// Loopback call self-test configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfTestConfig {
    /// How long the call stays up before both sides hang up.
    pub duration_secs: u64,
    /// Simulated round-trip time in milliseconds.
    pub rtt_ms: u64,
    /// Simulated packet-loss ratio (0.0..=1.0).
    pub loss: f64,
    /// Simulated interarrival jitter in milliseconds.
    pub jitter_ms: u64,
    /// Whether the engine can swap a sending track in place.
    pub replace_supported: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SelfTestConfig {
    fn default() -> Self {
        Self {
            duration_secs: 12,
            rtt_ms: 40,
            loss: 0.0,
            jitter_ms: 5,
            replace_supported: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────

impl NetworkConfig {
    pub fn hint(&self) -> Option<NetworkHint> {
        self.class.map(|class| NetworkHint {
            class,
            downlink_mbps: self.downlink_mbps,
        })
    }
}

impl SelfTestConfig {
    /// Simulated link, with the loss ratio clamped to a valid range.
    pub fn link(&self) -> LinkConditions {
        LinkConditions {
            rtt: Duration::from_millis(self.rtt_ms),
            loss_ratio: self.loss.clamp(0.0, 1.0),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs.max(1))
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl AgentConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = Self::default_toml().map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────
