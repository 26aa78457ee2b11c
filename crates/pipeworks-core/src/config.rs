//! Runtime configuration, loadable from TOML.
//!
//! ```toml
//! tick_rate = 50
//! physics_rate = 60
//! flow_epsilon = 0.0001
//! physics_honors_pause = false
//!
//! [wait]
//! sleep_threshold_ms = 10
//! spin_threshold_ms = 2
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, DEFAULT_PHYSICS_RATE, DEFAULT_TICK_RATE, FixedRate, WaitThresholds};
use crate::fixed::Portion;

/// Errors that can occur while loading a [`SimConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("flow_epsilon must be within [0, 1], got {0}")]
    FlowEpsilon(f64),
}

/// Hybrid-wait thresholds in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub sleep_threshold_ms: u64,
    pub spin_threshold_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            sleep_threshold_ms: 10,
            spin_threshold_ms: 2,
        }
    }
}

impl From<&WaitConfig> for WaitThresholds {
    fn from(cfg: &WaitConfig) -> Self {
        WaitThresholds {
            sleep_above: Duration::from_millis(cfg.sleep_threshold_ms),
            spin_below: Duration::from_millis(cfg.spin_threshold_ms),
        }
    }
}

/// Configuration shared by the simulation and physics worlds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Gameplay ticks per second.
    pub tick_rate: u32,
    /// Physics steps per second.
    pub physics_rate: u32,
    pub wait: WaitConfig,
    /// Intervals a loop may fall behind before its schedule is rebased.
    pub max_catch_up: u32,
    /// Smallest fullness difference that makes a connector move volume.
    /// Zero means any difference at all.
    pub flow_epsilon: f64,
    /// Whether the physics loop stops stepping while the world is paused.
    pub physics_honors_pause: bool,
    pub gravity: [f32; 3],
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            physics_rate: DEFAULT_PHYSICS_RATE,
            wait: WaitConfig::default(),
            max_catch_up: 5,
            flow_epsilon: 1e-4,
            physics_honors_pause: false,
            gravity: [0.0, -9.81, 0.0],
        }
    }
}

impl SimConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.flow_epsilon) {
            return Err(ConfigError::FlowEpsilon(self.flow_epsilon));
        }
        Ok(())
    }

    pub fn clock(&self) -> Clock {
        Clock {
            tick: FixedRate::new(self.tick_rate),
            physics: FixedRate::new(self.physics_rate),
            wait: WaitThresholds::from(&self.wait),
        }
    }

    pub fn flow_epsilon(&self) -> Portion {
        Portion::from_f64(self.flow_epsilon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.tick_rate, 50);
        assert_eq!(cfg.physics_rate, 60);
        assert!(!cfg.physics_honors_pause);
        assert_eq!(cfg.clock().wait, WaitThresholds::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = SimConfig::from_toml_str("tick_rate = 20\n[wait]\nspin_threshold_ms = 1\n").unwrap();
        assert_eq!(cfg.tick_rate, 20);
        assert_eq!(cfg.physics_rate, 60);
        assert_eq!(cfg.wait.sleep_threshold_ms, 10);
        assert_eq!(cfg.wait.spin_threshold_ms, 1);
        assert_eq!(cfg.clock().tick.interval(), Duration::from_millis(50));
    }

    #[test]
    fn out_of_range_epsilon_is_rejected() {
        let err = SimConfig::from_toml_str("flow_epsilon = 2.0").unwrap_err();
        assert!(matches!(err, ConfigError::FlowEpsilon(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = SimConfig::from_toml_str("tick_rate = \"fast\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = SimConfig::from_toml_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
