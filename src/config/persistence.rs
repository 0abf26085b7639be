use crate::error::{RedirectError, Result};
use std::path::Path;

use crate::config::paths::*;
use crate::config::schema::*;

/// Load the user config, writing a default one first if none exists.
pub fn load_config() -> Result<Config> {
    let config_dir = get_config_dir()?;
    let config_path = config_dir.join("config.toml");

    if !config_path.exists() {
        std::fs::create_dir_all(&config_dir).map_err(|e| {
            RedirectError::Config(format!(
                "Failed to create config directory {}: {}",
                config_dir.display(),
                e
            ))
        })?;
        write_config(&config_path, &Config::default())?;
        tracing::info!("Created default config at {}", config_path.display());
        return Ok(Config::default());
    }

    load_config_from(&config_path)
}

pub fn load_config_from(path: &Path) -> Result<Config> {
    let toml_content = std::fs::read_to_string(path).map_err(|e| {
        RedirectError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&toml_content)
        .map_err(|e| RedirectError::Config(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;
    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    let config_path = get_config_path()?;
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            RedirectError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }
    write_config(&config_path, config)
}

fn write_config(path: &Path, config: &Config) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| RedirectError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, toml_str)
        .map_err(|e| RedirectError::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}
