//! Application configuration (`config/travelpurpose.toml`).
//!
//! Resolution order:
//! 1. `TRAVELPURPOSE_CONFIG_PATH` if set (the file must exist),
//! 2. `config/travelpurpose.toml` if present,
//! 3. built-in defaults.
//!
//! `TRAVELPURPOSE_MAIN_THRESHOLD` / `TRAVELPURPOSE_SUB_THRESHOLD` override the
//! label thresholds after loading (clamped to [0, 1]; unparseable values are ignored).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::scoring::ScoringParams;

pub const ENV_CONFIG_PATH: &str = "TRAVELPURPOSE_CONFIG_PATH";
pub const ENV_MAIN_THRESHOLD: &str = "TRAVELPURPOSE_MAIN_THRESHOLD";
pub const ENV_SUB_THRESHOLD: &str = "TRAVELPURPOSE_SUB_THRESHOLD";
pub const DEFAULT_CONFIG_PATH: &str = "config/travelpurpose.toml";

/// Data files. `None` means "use the built-in table" (or no data for CSVs).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub ontology: Option<PathBuf>,
    pub source_weights: Option<PathBuf>,
    pub seasonal: Option<PathBuf>,
    pub fallback: Option<PathBuf>,
    pub purpose_mapping: Option<PathBuf>,
    /// Pre-classified city dataset (JSON).
    pub cities: Option<PathBuf>,
    pub tags_csv: Option<PathBuf>,
    pub city_tags_csv: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataPaths,
    pub scoring: ScoringParams,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load using the env/default resolution order, then apply env overrides.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(ENV_CONFIG_PATH)
            .ok()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        Self::load_with(explicit.as_deref())
    }

    /// Like [`AppConfig::load`] with the path already resolved (e.g. from a CLI flag).
    /// `None` tries the default location and falls back to built-in defaults.
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => Self::load_from_file(p)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::load_from_file(default)?
                } else {
                    warn!(target: "config", path = DEFAULT_CONFIG_PATH, "config file not found, using built-in defaults");
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides();
        cfg.scoring.validate().context("invalid [scoring] section")?;
        Ok(cfg)
    }

    /// Parse a config file. Relative data paths stay relative to the working directory.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: AppConfig =
            toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
        info!(target: "config", path = %path.display(), "config loaded");
        Ok(cfg)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(t) = parse_threshold_env(std::env::var(ENV_MAIN_THRESHOLD).ok()) {
            self.scoring.main_threshold = t;
        }
        if let Some(t) = parse_threshold_env(std::env::var(ENV_SUB_THRESHOLD).ok()) {
            self.scoring.sub_threshold = t;
        }
    }
}

fn parse_threshold_env(raw: Option<String>) -> Option<f32> {
    raw.and_then(|s| s.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
}
