//! Configuration file support.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use strainer_core::{HostEnvironment, Version};

/// Main configuration structure.
///
/// ```toml
/// database = "/var/lib/strainer/filters.db"
/// context = 0
/// locale = "en"
///
/// [defaults]
/// verbose = false
/// log_level = "info"
///
/// [host]
/// version = "2.1.0"
/// extensions = ["pdf"]
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default CLI options.
    pub defaults: Defaults,
    /// Filter database path.
    pub database: Option<PathBuf>,
    /// Context that filters are stored in and looked up from.
    pub context: Option<i64>,
    /// Locale used to resolve localized settings when running filters.
    pub locale: Option<String>,
    /// Host that runtime requirements are checked against.
    pub host: HostConfig,
}

/// Default CLI options.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Enable verbose output by default.
    pub verbose: bool,
    /// Enable quiet output by default.
    pub quiet: bool,
    /// Log filter directive used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host version; the built-in version when unset.
    pub version: Option<String>,
    pub extensions: Vec<String>,
}

impl HostConfig {
    pub fn to_host(&self) -> Result<HostEnvironment> {
        let mut host = match &self.version {
            Some(v) => {
                let version: Version = v
                    .parse()
                    .with_context(|| format!("invalid host version in config: {v}"))?;
                HostEnvironment::new(version)
            }
            None => HostEnvironment::current(),
        };
        for ext in &self.extensions {
            host = host.with_extension(ext.clone());
        }
        Ok(host)
    }
}

impl Config {
    /// Load config from the default location.
    pub fn load() -> Self {
        Self::load_from_path(Self::default_path())
    }

    /// Load config from a specific path.
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("strainer").join("config.toml"))
    }

    /// Database path from config, else the per-user data directory.
    pub fn database_path(&self) -> PathBuf {
        self.database.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|p| p.join("strainer").join("filters.db"))
                .unwrap_or_else(|| PathBuf::from("strainer.db"))
        })
    }
}
