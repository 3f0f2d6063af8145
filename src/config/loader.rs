//! Configuration File Loading
//!
//! Finds and loads configuration files from the usual locations, in TOML
//! or JSON, and applies environment overrides.

use super::Config;
use crate::error::{Error, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable forcing the simulator backend
pub const SIMULATOR_ENV: &str = "JOINTCAL_SIMULATOR";

/// Configuration file loader
pub struct ConfigLoader {
    /// Search paths for configuration files (without extension)
    search_paths: Vec<PathBuf>,
    /// Supported configuration file formats
    supported_formats: Vec<ConfigFormat>,
    /// Current configuration file path (if loaded)
    current_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    fn extension(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }

    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Fall back to defaults if no file exists
    pub create_default: bool,
    /// Apply environment overrides
    pub apply_env: bool,
    /// Validate configuration after loading
    pub validate: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            create_default: true,
            apply_env: true,
            validate: true,
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            search_paths: Self::get_search_paths(),
            supported_formats: vec![ConfigFormat::Toml, ConfigFormat::Json],
            current_path: None,
        }
    }

    /// Load configuration with default options
    pub fn load() -> Result<Config> {
        Self::new().load_with_options(&LoadOptions::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from_path(path: &Path) -> Result<Config> {
        let mut loader = Self::new();
        let mut config = loader.load_config_file(path, ConfigFormat::from_path(path))?;
        loader.current_path = Some(path.to_path_buf());
        apply_env_overrides(&mut config);
        loader.validate_config(&config)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration with custom options
    pub fn load_with_options(&mut self, options: &LoadOptions) -> Result<Config> {
        let mut config = match self.find_and_load_config()? {
            Some((path, config)) => {
                info!("Configuration loaded from {}", path.display());
                self.current_path = Some(path);
                config
            }
            None if options.create_default => {
                debug!("No configuration file found, using defaults");
                Config::default()
            }
            None => return Err(Error::ConfigNotFound),
        };

        if options.apply_env {
            apply_env_overrides(&mut config);
        }
        if options.validate {
            self.validate_config(&config)?;
        }
        Ok(config)
    }

    /// Save configuration to the current path or default location
    pub fn save(&self, config: &Config) -> Result<PathBuf> {
        let path = self
            .current_path
            .clone()
            .unwrap_or_else(Self::get_default_config_path);
        self.save_to_path(config, &path)?;
        Ok(path)
    }

    /// Save configuration to a specific path, choosing the format by extension
    pub fn save_to_path(&self, config: &Config, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::ConfigSaveFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(config).map_err(|e| {
                Error::ConfigSerializationFailed {
                    format: "JSON".to_string(),
                    reason: e.to_string(),
                }
            })?,
            ConfigFormat::Toml => {
                toml::to_string_pretty(config).map_err(|e| Error::ConfigSerializationFailed {
                    format: "TOML".to_string(),
                    reason: e.to_string(),
                })?
            }
        };

        fs::write(path, content)?;
        Ok(())
    }

    /// Find and load configuration from search paths
    fn find_and_load_config(&self) -> Result<Option<(PathBuf, Config)>> {
        for path in &self.search_paths {
            for format in &self.supported_formats {
                let config_path = path.with_extension(format.extension());
                if !config_path.exists() {
                    continue;
                }
                match self.load_config_file(&config_path, *format) {
                    Ok(config) => return Ok(Some((config_path, config))),
                    Err(e) => {
                        warn!(
                            "Failed to load config from {}: {}",
                            config_path.display(),
                            e
                        );
                    }
                }
            }
        }
        Ok(None)
    }

    fn load_config_file(&self, path: &Path, format: ConfigFormat) -> Result<Config> {
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigLoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        match format {
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| Error::ConfigParseFailed {
                format: "TOML".to_string(),
                reason: e.to_string(),
            }),
            ConfigFormat::Json => {
                serde_json::from_str(&content).map_err(|e| Error::ConfigParseFailed {
                    format: "JSON".to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn get_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(cwd) = env::current_dir() {
            paths.push(cwd.join("jointcal"));
        }

        if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg_config).join("jointcal").join("config"));
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("jointcal").join("config"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".jointcal"));
        }

        paths
    }

    fn get_default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jointcal")
            .join("config.toml")
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        config.validate().map_err(|e| Error::ConfigValidationFailed {
            field: "config".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Clear all search paths and add a single path (without extension)
    pub fn set_search_path(&mut self, path: PathBuf) {
        self.search_paths = vec![path];
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `JOINTCAL_*` environment overrides
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(value) = env::var(SIMULATOR_ENV) {
        let enabled = matches!(value.trim(), "1" | "true" | "yes" | "on");
        if enabled != config.simulator.enabled {
            info!("{}={} overrides simulator.enabled", SIMULATOR_ENV, value);
        }
        config.simulator.enabled = enabled;
    }
}
