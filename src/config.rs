//! Configuration with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/canopy/canopy.toml`
//! 3. Environment variables: `CANOPY_*` prefix (`__` as section separator)

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::errors::TreeResult;

/// Tuning for the scoped sibling rebalancer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Smallest sibling window considered when re-spreading keys.
    /// Windows double outward from the insertion point until the spread fits.
    pub min_window: usize,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self { min_window: 8 }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CanopyConfig {
    /// Longest sibling segment the codec mints before signalling exhaustion.
    /// Caps key growth under adversarial insertion patterns.
    pub max_segment_len: usize,
    /// Rebalancer tuning.
    pub rebalance: RebalanceConfig,
}

impl Default for CanopyConfig {
    fn default() -> Self {
        Self {
            max_segment_len: 16,
            rebalance: RebalanceConfig::default(),
        }
    }
}

/// Raw config for intermediate parsing (fields are Option to detect "not
/// specified" and inherit from the layer below).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    max_segment_len: Option<usize>,
    rebalance: RawRebalanceConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRebalanceConfig {
    min_window: Option<usize>,
}

/// Get the XDG config directory for canopy.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "canopy").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("canopy.toml"))
}

fn load_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Message(format!("read {}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| ConfigError::Message(format!("parse {}: {}", path.display(), e)))
}

impl CanopyConfig {
    /// Load configuration with layered precedence: defaults, then the global
    /// config file, then `CANOPY_*` environment variables.
    pub fn load() -> TreeResult<Self> {
        Self::load_from(global_config_path().as_deref())
    }

    /// Load with an explicit config file path (testing entry point).
    pub fn load_from(path: Option<&Path>) -> TreeResult<Self> {
        let mut current = Self::default();

        if let Some(path) = path {
            if path.exists() {
                let raw = load_raw(path)?;
                current = current.merge_with(&raw);
            }
        }

        current = Self::apply_env_overrides(current)?;
        current.clamp();
        Ok(current)
    }

    /// Overlay wins where specified, base is kept otherwise.
    fn merge_with(&self, overlay: &RawConfig) -> Self {
        Self {
            max_segment_len: overlay.max_segment_len.unwrap_or(self.max_segment_len),
            rebalance: RebalanceConfig {
                min_window: overlay
                    .rebalance
                    .min_window
                    .unwrap_or(self.rebalance.min_window),
            },
        }
    }

    /// Apply `CANOPY_*` environment variables as explicit overrides.
    fn apply_env_overrides(mut cfg: Self) -> TreeResult<Self> {
        let parsed = Config::builder()
            .add_source(
                Environment::with_prefix("CANOPY")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        if let Ok(val) = parsed.get_int("max_segment_len") {
            cfg.max_segment_len = val.max(0) as usize;
        }
        if let Ok(val) = parsed.get_int("rebalance.min_window") {
            cfg.rebalance.min_window = val.max(0) as usize;
        }
        Ok(cfg)
    }

    /// A segment cap below 2 leaves no room to extend keys, and a window
    /// below 2 cannot cover both neighbors of an insertion point.
    fn clamp(&mut self) {
        self.max_segment_len = self.max_segment_len.max(2);
        self.rebalance.min_window = self.rebalance.min_window.max(2);
    }

    /// Render the compiled defaults as an example config file.
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// Write this configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> TreeResult<()> {
        let rendered = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Message(format!("serialize config: {e}")))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Message(format!("create {}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, rendered)
            .map_err(|e| ConfigError::Message(format!("write {}: {}", path.display(), e)))?;
        Ok(())
    }
}
