//! Settings access for the session

use parking_lot::RwLock;
use std::path::PathBuf;
use tracing::debug;

use super::Settings;
use crate::error::{PixelcastError, Result};
use crate::render::ShaderPreset;

/// Read/write access to the user-facing render settings
pub trait SettingsProvider: Send + Sync {
    /// Copy of the current settings
    fn snapshot(&self) -> Settings;

    /// Apply a change and persist it where the provider supports that
    fn update(&self, change: &mut dyn FnMut(&mut Settings)) -> Result<()>;

    fn performance_mode(&self) -> bool {
        self.snapshot().render.performance_mode
    }

    fn set_performance_mode(&self, enabled: bool) -> Result<()> {
        self.update(&mut |s| s.render.performance_mode = enabled)
    }

    fn active_preset(&self) -> ShaderPreset {
        self.snapshot().render.preset
    }

    fn set_active_preset(&self, preset: ShaderPreset) -> Result<()> {
        self.update(&mut |s| s.render.preset = preset)
    }

    fn global_brightness(&self) -> f32 {
        self.snapshot().render.brightness
    }

    fn set_global_brightness(&self, brightness: f32) -> Result<()> {
        if !brightness.is_finite() || brightness < 0.0 {
            return Err(PixelcastError::config(format!(
                "Brightness {} must be a non-negative number",
                brightness
            )));
        }
        self.update(&mut |s| s.render.brightness = brightness)
    }
}

/// In-memory settings; nothing is persisted
#[derive(Debug, Default)]
pub struct MemorySettings {
    settings: RwLock<Settings>,
}

impl MemorySettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }
}

impl SettingsProvider for MemorySettings {
    fn snapshot(&self) -> Settings {
        self.settings.read().clone()
    }

    fn update(&self, change: &mut dyn FnMut(&mut Settings)) -> Result<()> {
        change(&mut self.settings.write());
        Ok(())
    }
}

/// Settings backed by a TOML file, saved on every change
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    settings: RwLock<Settings>,
}

impl FileSettings {
    /// Load from `path`; a missing file yields defaults
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = Settings::load_from(&path)?;
        Ok(Self {
            path,
            settings: RwLock::new(settings),
        })
    }

    /// Open the file at the default location
    pub fn open_default() -> Result<Self> {
        Self::open(Settings::default_path())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SettingsProvider for FileSettings {
    fn snapshot(&self) -> Settings {
        self.settings.read().clone()
    }

    fn update(&self, change: &mut dyn FnMut(&mut Settings)) -> Result<()> {
        let mut settings = self.settings.write();
        let mut next = settings.clone();
        change(&mut next);
        if next == *settings {
            return Ok(());
        }
        next.save_to(&self.path)?;
        debug!("Persisted settings change to {:?}", self.path);
        *settings = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_round_trip() {
        let settings = MemorySettings::default();
        settings.set_performance_mode(true).unwrap();
        settings.set_active_preset(ShaderPreset::Dmg).unwrap();
        assert!(settings.performance_mode());
        assert_eq!(settings.active_preset(), ShaderPreset::Dmg);
        assert!(settings.set_global_brightness(-1.0).is_err());
    }

    #[test]
    fn test_file_settings_write_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let settings = FileSettings::open(&path).unwrap();
        assert!(!path.exists());
        settings.set_active_preset(ShaderPreset::Scanlines).unwrap();
        assert!(path.exists());

        let reopened = FileSettings::open(&path).unwrap();
        assert_eq!(reopened.active_preset(), ShaderPreset::Scanlines);
    }
}
