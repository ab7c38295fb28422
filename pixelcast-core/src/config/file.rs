//! Settings file loading and saving
//!
//! Loads user settings from `~/.config/pixelcast/config.toml`

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::Settings;
use crate::error::{PixelcastError, Result};

impl Settings {
    /// Get the default settings file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("pixelcast").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("pixelcast")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/pixelcast/config.toml")
        }
    }

    /// Load settings from the default path, logging warnings but returning
    /// defaults on error
    pub fn load() -> Self {
        match Self::load_from(Self::default_path()) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load config file: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Load settings from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| PixelcastError::config(format!("Failed to read config file: {}", e)))?;

        let settings: Settings = toml::from_str(&content)
            .map_err(|e| PixelcastError::config(format!("Failed to parse config file: {}", e)))?;

        for warning in settings.validate() {
            warn!("{}", warning);
        }

        info!("Loaded configuration from {:?}", path);
        Ok(settings)
    }

    /// Save settings to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PixelcastError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| PixelcastError::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| PixelcastError::config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Write the sample file if none exists yet
    pub fn create_default_if_missing(path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, sample_config())?;
        info!("Created configuration at {:?}", path);
        Ok(true)
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# Pixelcast Configuration

[render]
# Prefer the software renderer (lower power, no shader presets)
performance_mode = false

# What performance mode does:
#   "force-software"  - stop the accelerated renderer and draw in software
#   "low-cost-preset" - keep the accelerated renderer, swap in the cheap preset
performance_strategy = "force-software"

# Visual preset: none, scanlines, lcd-grid, dmg, performance
preset = "none"

# Output brightness multiplier (1.0 = unchanged)
brightness = 1.0

[health]
# Milliseconds to wait for the first frame before reporting
# "device not sending video"
timeout_ms = 3000

[viewport]
# Native resolution of the captured content (160x144 Game Boy, 240x160 GBA)
native_width = 160
native_height = 144

# Delay before applying window resizes
resize_debounce_ms = 100

[device]
# Capture device to open by default (adapter default when unset)
# default = "usb-capture-0"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PerformanceStrategy;
    use crate::render::ShaderPreset;

    #[test]
    fn test_sample_config_parses() {
        let settings: Settings = toml::from_str(&sample_config()).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [render]
            preset = "lcd-grid"
            performance_strategy = "low-cost-preset"
            "#,
        )
        .unwrap();
        assert_eq!(settings.render.preset, ShaderPreset::LcdGrid);
        assert_eq!(settings.render.performance_strategy, PerformanceStrategy::LowCostPreset);
        assert_eq!(settings.health.timeout_ms, 3000);
        assert_eq!(settings.viewport.native_width, 160);
    }

    #[test]
    fn test_unknown_preset_rejected() {
        let parsed: std::result::Result<Settings, _> = toml::from_str(
            r#"
            [render]
            preset = "crt-royale"
            "#,
        );
        assert!(parsed.is_err());
    }
}
