//! Core types for Pixelcast
//!
//! These types represent the fundamental data structures shared by the
//! session, the health probe and the renderers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Global handle counter for unique ids
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque process-unique id
///
/// Used for sessions and presentation surfaces so logs and events can tell
/// instances apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(u64);

impl Handle {
    /// Create a new unique handle
    pub fn new() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

/// Logical pixel size of a picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Game Boy / Game Boy Color LCD
    pub const GAME_BOY: Resolution = Resolution::new(160, 144);
    /// Game Boy Advance LCD
    pub const GAME_BOY_ADVANCE: Resolution = Resolution::new(240, 160);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels
    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Multiply both axes by an integer factor, saturating at `u32::MAX`
    pub fn scaled(&self, factor: u32) -> Self {
        Self::new(self.width.saturating_mul(factor), self.height.saturating_mul(factor))
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("Invalid resolution '{}', expected WIDTHxHEIGHT", s))?;
        let width = w
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid width in '{}'", s))?;
        let height = h
            .trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid height in '{}'", s))?;
        if width == 0 || height == 0 {
            return Err(format!("Resolution '{}' must be non-zero", s));
        }
        Ok(Self::new(width, height))
    }
}

/// A decoded video frame delivered by the device
///
/// Pixels are tightly packed RGBA8 rows.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Presentation time within the stream
    pub media_time: Duration,
    /// Frame size
    pub resolution: Resolution,
    /// RGBA8 pixel data
    pub data: Bytes,
}

impl VideoFrame {
    /// Build a frame, checking the payload size
    pub fn new(media_time: Duration, resolution: Resolution, data: Bytes) -> Option<Self> {
        if data.len() != resolution.area() * 4 {
            return None;
        }
        Some(Self {
            media_time,
            resolution,
            data,
        })
    }

    /// A frame filled with one RGBA colour
    pub fn solid(media_time: Duration, resolution: Resolution, rgba: [u8; 4]) -> Self {
        let data: Vec<u8> = rgba.repeat(resolution.area());
        Self {
            media_time,
            resolution,
            data: Bytes::from(data),
        }
    }

    /// View the payload as RGBA pixels
    ///
    /// Trailing bytes that do not form a whole pixel are ignored.
    pub fn pixels(&self) -> &[[u8; 4]] {
        let whole = self.data.len() - self.data.len() % 4;
        bytemuck::cast_slice(&self.data[..whole])
    }

    /// Whether the payload holds exactly one RGBA pixel per position
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.resolution.area() * 4
    }
}

/// Description of the capture device backing a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Adapter-specific identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
}

impl DeviceInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// What the device reported about the opened stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaCapabilities {
    /// Native resolution of the captured content
    pub resolution: Resolution,
    /// Nominal frame rate
    pub frame_rate: f64,
    /// Whether an audio track is present
    pub has_audio: bool,
}

/// Which renderer is presenting frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// Off-thread worker with shader post-processing
    Accelerated,
    /// Main-context raster drawing
    Software,
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accelerated => write!(f, "accelerated"),
            Self::Software => write!(f, "software"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let a = Handle::new();
        let b = Handle::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!(
            "160x144".parse::<Resolution>().unwrap(),
            Resolution::GAME_BOY
        );
        assert_eq!(
            "240X160".parse::<Resolution>().unwrap(),
            Resolution::GAME_BOY_ADVANCE
        );
        assert!("160".parse::<Resolution>().is_err());
        assert!("0x144".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_frame_size_checked() {
        let res = Resolution::new(2, 2);
        assert!(VideoFrame::new(Duration::ZERO, res, Bytes::from(vec![0u8; 16])).is_some());
        assert!(VideoFrame::new(Duration::ZERO, res, Bytes::from(vec![0u8; 15])).is_none());
    }

    #[test]
    fn test_solid_frame_pixels() {
        let frame = VideoFrame::solid(Duration::ZERO, Resolution::new(3, 1), [1, 2, 3, 4]);
        assert_eq!(frame.pixels(), &[[1, 2, 3, 4]; 3]);
    }
}
