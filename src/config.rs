use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{capture::SimulatorOptions, settings::DEFAULT_SETTINGS_FILE};

pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Process-level knobs. Operator-facing values (ports, calibration,
/// endpoints) live in the settings file instead.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionConfig {
    /// Upper bound on one wait for a feed or stop signal.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DiscoveryConfig {
    /// Start with the discovery listener open.
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    /// Per-datagram send deadline.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulatorConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_bodies")]
    pub bodies: usize,
    #[serde(default)]
    pub seed: u64,
}

fn default_settings_path() -> PathBuf { PathBuf::from(DEFAULT_SETTINGS_FILE) }
fn default_wait_timeout_ms() -> u64 { 1000 }
fn default_send_timeout_ms() -> u64 { 5 }
fn default_fps() -> u32 { 30 }
fn default_bodies() -> usize { 2 }

impl Default for Config {
    fn default() -> Self {
        Self {
            settings_path: default_settings_path(),
            acquisition: AcquisitionConfig::default(),
            discovery: DiscoveryConfig::default(),
            broadcast: BroadcastConfig::default(),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            bodies: default_bodies(),
            seed: 0,
        }
    }
}

impl AcquisitionConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms.max(1))
    }
}

impl BroadcastConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms.max(1))
    }
}

impl SimulatorConfig {
    pub fn options(&self) -> SimulatorOptions {
        SimulatorOptions {
            fps: self.fps,
            bodies: self.bodies,
            seed: self.seed,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("{} not found, using default configuration", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("{err:#}; using default configuration");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_take_defaults() {
        let config: Config = toml::from_str(
            r#"
            settings_path = "rig/kinect.cfg"

            [simulator]
            bodies = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.settings_path, PathBuf::from("rig/kinect.cfg"));
        assert_eq!(config.acquisition.wait_timeout(), Duration::from_millis(1000));
        assert_eq!(config.broadcast.send_timeout(), Duration::from_millis(5));
        assert!(!config.discovery.enabled);
        assert_eq!(config.simulator.bodies, 4);
        assert_eq!(config.simulator.fps, 30);
    }

    #[test]
    fn load_or_default_tolerates_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = Config::load_or_default(dir.path().join("nope.toml"));
        assert_eq!(missing.settings_path, PathBuf::from(DEFAULT_SETTINGS_FILE));

        let broken = dir.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&broken, "[discovery]\nenabled = \"maybe\"\n").unwrap();
        assert!(Config::load(&broken).is_err());
        assert!(!Config::load_or_default(&broken).discovery.enabled);
    }

    #[test]
    fn zero_timeouts_are_raised_to_one_millisecond() {
        let config: Config =
            toml::from_str("[acquisition]\nwait_timeout_ms = 0\n[broadcast]\nsend_timeout_ms = 0\n")
                .unwrap();
        assert_eq!(config.acquisition.wait_timeout(), Duration::from_millis(1));
        assert_eq!(config.broadcast.send_timeout(), Duration::from_millis(1));
    }
}
