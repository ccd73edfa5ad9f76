// src/config.rs

//! Defines the configuration structures for the surfaceless display.
//!
//! Settings are read from an optional JSON file named by
//! `SURFACELESS_CONFIG` and then overridden by the environment variables the
//! GL stack traditionally honours (`LIBGL_ALWAYS_SOFTWARE`, `GALLIUM_DRIVER`,
//! `LIBGL_KOPPER_DISABLE`, `MESA_LOADER_DRIVER_OVERRIDE`, `DRI_PRIME`).
//! Per-display choices live in [`DisplayOptions`], which is usually derived
//! from the process-wide [`CONFIG`].

use anyhow::{Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::device::DeviceId;

/// Environment variable naming a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "SURFACELESS_CONFIG";

/// Process-wide configuration, loaded on first use.
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    Config::load_from_env().unwrap_or_else(|e| {
        warn!("Failed to load configuration, using defaults: {:#}", e);
        Config::default().with_env_overrides(|key| std::env::var(key).ok())
    })
});

/// When the software probe runs after the hardware probe has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftwareFallback {
    /// Only when software rendering was explicitly requested.
    OnRequest,
    /// Whenever hardware probing fails. Hosts without DRM devices need this.
    Always,
}

impl Default for SoftwareFallback {
    fn default() -> Self {
        if cfg!(target_os = "macos") {
            SoftwareFallback::Always
        } else {
            SoftwareFallback::OnRequest
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Probe primary nodes and prefer software drivers.
    pub force_software: bool,
    /// Use zink instead of swrast for the software device.
    pub zink: bool,
    /// Never take the kopper presentation path, even with zink.
    pub kopper_disable: bool,
    pub software_fallback: SoftwareFallback,
    /// Replaces the driver name resolved for hardware nodes.
    pub driver_override: Option<String>,
    /// Device tag (e.g. `pci-0000_01_00_0`) to render on when it differs
    /// from the probed device.
    pub prefer_device: Option<String>,
}

impl Config {
    /// Reads the file named by `SURFACELESS_CONFIG` (if any) and applies
    /// environment overrides.
    pub fn load_from_env() -> Result<Self> {
        let base = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load_file(Path::new(&path))?,
            None => Config::default(),
        };
        Ok(base.with_env_overrides(|key| std::env::var(key).ok()))
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Applies the GL-stack environment variables on top of `self`.
    ///
    /// `lookup` is injected so tests do not have to mutate the process
    /// environment.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LIBGL_ALWAYS_SOFTWARE") {
            self.force_software = parse_bool(&v);
        }
        if let Some(v) = lookup("GALLIUM_DRIVER") {
            self.zink = v == "zink";
        }
        if let Some(v) = lookup("LIBGL_KOPPER_DISABLE") {
            self.kopper_disable = parse_bool(&v);
        }
        if let Some(v) = lookup("MESA_LOADER_DRIVER_OVERRIDE").filter(|v| !v.is_empty()) {
            self.driver_override = Some(v);
        }
        if let Some(v) = lookup("DRI_PRIME").filter(|v| !v.is_empty()) {
            self.prefer_device = Some(v);
        }
        self
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Options fixed for the lifetime of one display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    pub force_software: bool,
    pub zink: bool,
    pub kopper_disable: bool,
    pub software_fallback: SoftwareFallback,
    /// Restricts probing to one device, like `EGL_DEVICE_EXT`.
    pub device: Option<DeviceId>,
}

impl DisplayOptions {
    pub fn from_config(config: &Config) -> Self {
        DisplayOptions {
            force_software: config.force_software,
            zink: config.zink,
            kopper_disable: config.kopper_disable,
            software_fallback: config.software_fallback,
            device: None,
        }
    }

    pub fn pinned_to(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// Whether the kopper presentation path applies to a probe that loads
    /// zink when `zink` is set.
    pub fn kopper(&self, zink: bool) -> bool {
        zink && !self.kopper_disable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use test_log::test;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        let config = Config::default().with_env_overrides(env(&[
            ("LIBGL_ALWAYS_SOFTWARE", "1"),
            ("GALLIUM_DRIVER", "zink"),
            ("DRI_PRIME", "pci-0000_01_00_0"),
        ]));
        assert!(config.force_software);
        assert!(config.zink);
        assert!(!config.kopper_disable);
        assert_eq!(config.prefer_device.as_deref(), Some("pci-0000_01_00_0"));
    }

    #[test]
    fn false_like_values_clear_force_software() {
        let base = Config {
            force_software: true,
            ..Config::default()
        };
        let config = base.with_env_overrides(env(&[("LIBGL_ALWAYS_SOFTWARE", "0")]));
        assert!(!config.force_software);
    }

    #[test]
    fn json_with_missing_fields_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{ "zink": true }"#).unwrap();
        assert!(config.zink);
        assert!(!config.force_software);
        assert_eq!(config.software_fallback, SoftwareFallback::default());
    }

    #[test]
    fn kopper_requires_zink_and_not_disabled() {
        let mut options = DisplayOptions::default();
        assert!(!options.kopper(false));
        assert!(options.kopper(true));
        options.kopper_disable = true;
        assert!(!options.kopper(true));
    }
}
