//! Configuration Loader
//!
//! Environment-aware configuration loading. A base `capstan.yaml` is merged
//! with an optional `<environment>.yaml` overlay, then validated. The
//! environment is detected from `CAPSTAN_ENV` (falling back to `APP_ENV`,
//! then `development`).

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::Value as YamlValue;
use tracing::debug;

use super::{CapstanConfig, ConfigResult};

const BASE_CONFIG_FILE: &str = "capstan.yaml";

/// Loads and holds the merged configuration for one process.
pub struct ConfigManager {
    config: CapstanConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory.
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with an explicit
    /// environment. Useful for tests that must not touch process env vars.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &CapstanConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn detect_environment() -> String {
        env::var("CAPSTAN_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("CAPSTAN_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    /// Read the base file, overlay the environment file when present, and
    /// deserialize into the typed configuration. Missing files fall back to
    /// compiled defaults so embedded and test usage needs no filesystem.
    fn load_and_merge_config(directory: &Path, environment: &str) -> ConfigResult<CapstanConfig> {
        let base_path = directory.join(BASE_CONFIG_FILE);

        if !base_path.exists() {
            debug!(
                path = %base_path.display(),
                "No configuration file found, using defaults"
            );
            return Ok(CapstanConfig::default());
        }

        let base_text = std::fs::read_to_string(&base_path)?;
        let mut merged: YamlValue = serde_yaml::from_str(&base_text)?;

        let overlay_path = directory.join(format!("{environment}.yaml"));
        if overlay_path.exists() {
            let overlay_text = std::fs::read_to_string(&overlay_path)?;
            let overlay: YamlValue = serde_yaml::from_str(&overlay_text)?;
            merge_yaml(&mut merged, overlay);
        }

        Ok(serde_yaml::from_value(merged)?)
    }
}

/// Recursively merge `overlay` into `base`. Mappings merge key-by-key;
/// everything else is replaced by the overlay value.
fn merge_yaml(base: &mut YamlValue, overlay: YamlValue) {
    match (base, overlay) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => merge_yaml(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}
