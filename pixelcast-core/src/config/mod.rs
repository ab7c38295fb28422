//! Configuration types for Pixelcast
//!
//! Runtime settings for the render pipeline, the health probe and the
//! viewport, persisted as TOML.

mod file;
mod provider;

pub use file::sample_config;
pub use provider::{FileSettings, MemorySettings, SettingsProvider};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::render::ShaderPreset;
use crate::types::Resolution;

/// Largest supported native resolution edge
const MAX_NATIVE_EDGE: u32 = 4096;

/// What performance mode does when enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PerformanceStrategy {
    /// Tear down the accelerated renderer and draw in software
    #[default]
    ForceSoftware,
    /// Keep an already running accelerated renderer but swap in the
    /// low-cost preset
    LowCostPreset,
}

impl std::fmt::Display for PerformanceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ForceSoftware => write!(f, "force-software"),
            Self::LowCostPreset => write!(f, "low-cost-preset"),
        }
    }
}

impl std::str::FromStr for PerformanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "force-software" | "software" => Ok(Self::ForceSoftware),
            "low-cost-preset" | "low-cost" => Ok(Self::LowCostPreset),
            _ => Err(format!("Unknown performance strategy: {}", s)),
        }
    }
}

/// Top-level settings file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub render: RenderSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub viewport: ViewportSettings,

    #[serde(default)]
    pub device: DeviceSettings,
}

/// Renderer preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    /// Prefer the software renderer for lower power use
    #[serde(default)]
    pub performance_mode: bool,

    /// How performance mode is applied
    #[serde(default)]
    pub performance_strategy: PerformanceStrategy,

    /// Active visual preset
    #[serde(default)]
    pub preset: ShaderPreset,

    /// Output brightness multiplier
    #[serde(default = "default_brightness")]
    pub brightness: f32,
}

/// Health probe settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSettings {
    /// How long to wait for the first frame
    #[serde(default = "default_health_timeout_ms")]
    pub timeout_ms: u64,
}

/// Viewport scaling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSettings {
    /// Native width of the captured content
    #[serde(default = "default_native_width")]
    pub native_width: u32,

    /// Native height of the captured content
    #[serde(default = "default_native_height")]
    pub native_height: u32,

    /// Resize debounce delay
    #[serde(default = "default_resize_debounce_ms")]
    pub resize_debounce_ms: u64,
}

/// Capture device selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Device id to open when none is given (adapter default otherwise)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

fn default_brightness() -> f32 {
    1.0
}

fn default_health_timeout_ms() -> u64 {
    3000
}

fn default_native_width() -> u32 {
    Resolution::GAME_BOY.width
}

fn default_native_height() -> u32 {
    Resolution::GAME_BOY.height
}

fn default_resize_debounce_ms() -> u64 {
    100
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            performance_mode: false,
            performance_strategy: PerformanceStrategy::default(),
            preset: ShaderPreset::default(),
            brightness: default_brightness(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_health_timeout_ms(),
        }
    }
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            native_width: default_native_width(),
            native_height: default_native_height(),
            resize_debounce_ms: default_resize_debounce_ms(),
        }
    }
}

impl Settings {
    /// Health probe timeout
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health.timeout_ms)
    }

    /// Resize debounce delay
    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.viewport.resize_debounce_ms)
    }

    /// Native resolution of the captured content
    pub fn native_resolution(&self) -> Resolution {
        Resolution::new(self.viewport.native_width, self.viewport.native_height)
    }

    /// Validate the settings and return any warnings
    ///
    /// An empty list means the settings look good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.health.timeout_ms < 500 {
            warnings.push(format!(
                "Health timeout of {} ms is very short; slow devices may be reported as not sending video.",
                self.health.timeout_ms
            ));
        } else if self.health.timeout_ms > 30_000 {
            warnings.push(format!(
                "Health timeout of {} ms delays error reporting for powered-off devices.",
                self.health.timeout_ms
            ));
        }

        if self.viewport.resize_debounce_ms > 1000 {
            warnings.push(format!(
                "Resize debounce of {} ms will make window resizing feel sluggish.",
                self.viewport.resize_debounce_ms
            ));
        }

        if self.render.brightness > 2.0 {
            warnings.push(format!(
                "Brightness {:.2} will clip most colours.",
                self.render.brightness
            ));
        }

        if self.render.performance_mode
            && self.render.performance_strategy == PerformanceStrategy::LowCostPreset
            && !self.render.preset.is_low_cost()
        {
            warnings.push(format!(
                "Preset '{}' is replaced while performance mode is on.",
                self.render.preset
            ));
        }

        warnings
    }

    /// Validate and return an error if the settings cannot work
    ///
    /// Unlike `validate()` which returns warnings, this returns hard errors.
    pub fn validate_strict(&self) -> Result<(), String> {
        let native = self.native_resolution();
        if native.width == 0 || native.height == 0 {
            return Err("Native resolution cannot be zero".to_string());
        }

        if native.width > MAX_NATIVE_EDGE || native.height > MAX_NATIVE_EDGE {
            return Err(format!(
                "Native resolution {} exceeds maximum supported ({}x{})",
                native, MAX_NATIVE_EDGE, MAX_NATIVE_EDGE
            ));
        }

        if self.health.timeout_ms == 0 {
            return Err("Health timeout cannot be zero".to_string());
        }

        if !self.render.brightness.is_finite() || self.render.brightness < 0.0 {
            return Err(format!(
                "Brightness {} must be a non-negative number",
                self.render.brightness
            ));
        }

        Ok(())
    }
}
