//! Configuration loading and parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub normalize: bool,
    #[serde(default = "default_include_time")]
    pub include_time: bool,
    #[serde(default = "default_max_points")]
    pub max_points: usize,
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    pub tmin: Option<f64>,
    pub tmax: Option<f64>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            signals: Vec::new(),
            normalize: false,
            include_time: default_include_time(),
            max_points: default_max_points(),
            algorithm: default_algorithm(),
            tmin: None,
            tmax: None,
        }
    }
}

fn default_include_time() -> bool {
    true
}

fn default_max_points() -> usize {
    series_engine::DEFAULT_MAX_POINTS
}

fn default_algorithm() -> String {
    "stride".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub stats: bool,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
