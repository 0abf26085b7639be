use crate::error::{RedirectError, Result};
use crate::overlay::handle_table::MAX_TABLE_SLOTS;
use crate::overlay::{LayerMode, LayerSpec};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_open_handles: Option<usize>,
}

impl SessionConfig {
    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or_else(super::default_workers)
    }

    pub fn get_queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(super::default_queue_capacity)
    }

    pub fn get_max_open_handles(&self) -> usize {
        self.max_open_handles
            .unwrap_or_else(super::default_max_open_handles)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NativeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

impl NativeConfig {
    /// Host directory standing in for the native filesystem root.
    pub fn get_root(&self) -> PathBuf {
        let root = self.root.clone().unwrap_or_else(super::default_native_root);
        super::expand_tilde(&root)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerConfig {
    pub name: String,
    pub prefix: String,
    pub replacement: String,
    #[serde(default)]
    pub mode: LayerMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_on_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

impl LayerConfig {
    pub fn get_writable(&self) -> bool {
        self.writable.unwrap_or(false)
    }

    pub fn get_fallback_on_error(&self) -> bool {
        self.fallback_on_error
            .unwrap_or_else(|| self.mode.default_fallback_on_error())
    }

    pub fn get_active(&self) -> bool {
        self.active.unwrap_or(true)
    }

    pub fn to_spec(&self, max_handles: usize) -> Result<LayerSpec> {
        let replacement = super::expand_tilde(&self.replacement);
        let replacement = replacement.to_str().ok_or_else(|| {
            RedirectError::Config(format!(
                "Layer '{}' has a non UTF-8 replacement path",
                self.name
            ))
        })?;

        Ok(LayerSpec::new(&self.name, &self.prefix, replacement, self.mode)
            .writable(self.get_writable())
            .fallback_on_error(self.get_fallback_on_error())
            .ignore(self.ignore.clone())
            .max_handles(max_handles))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub native: NativeConfig,
    /// Lowest priority first, in the order they are pushed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layers: Vec<LayerConfig>,
}

impl Config {
    pub fn find_layer(&self, name: &str) -> Option<&LayerConfig> {
        self.layers.iter().find(|l| l.name == name)
    }
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.session.get_workers() == 0 {
        return Err(RedirectError::Config(
            "session.workers must be at least 1".to_string(),
        ));
    }
    if config.session.get_queue_capacity() == 0 {
        return Err(RedirectError::Config(
            "session.queue_capacity must be at least 1".to_string(),
        ));
    }
    if config.session.get_max_open_handles() == 0 {
        return Err(RedirectError::Config(
            "session.max_open_handles must be at least 1".to_string(),
        ));
    }
    if config.session.get_max_open_handles() > MAX_TABLE_SLOTS {
        return Err(RedirectError::Config(format!(
            "session.max_open_handles must be at most {}",
            MAX_TABLE_SLOTS
        )));
    }

    let mut names = HashSet::new();
    for layer in &config.layers {
        if layer.name.trim().is_empty() {
            return Err(RedirectError::Config(
                "Every layer needs a non-empty name".to_string(),
            ));
        }
        if !names.insert(layer.name.as_str()) {
            return Err(RedirectError::Config(format!(
                "Duplicate layer name '{}'",
                layer.name
            )));
        }
        if layer.prefix.trim().is_empty() || layer.replacement.trim().is_empty() {
            return Err(RedirectError::Config(format!(
                "Layer '{}' needs both a prefix and a replacement",
                layer.name
            )));
        }
        for pattern in &layer.ignore {
            glob::Pattern::new(pattern).map_err(|e| {
                RedirectError::Config(format!(
                    "Invalid ignore pattern '{}' in layer '{}': {}",
                    pattern, layer.name, e
                ))
            })?;
        }
    }

    if config.session.get_workers() > 16 {
        eprintln!(
            "Warning: session.workers ({}) is unusually high; requests are I/O bound.",
            config.session.get_workers()
        );
    }

    Ok(())
}
