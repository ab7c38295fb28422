//! Visual presets and shader post-processing
//!
//! Each preset is a per-pixel fragment function evaluated at backing-store
//! resolution. The fragment knows its position inside the enlarged source
//! pixel (its "cell"), which is what grid and scanline effects key off.

use serde::{Deserialize, Serialize};

use crate::capability::RenderTier;
use crate::error::{PixelcastError, Result};
use crate::surface::{FrameBuffer, PresentationSurface};
use crate::types::VideoFrame;

/// Shades of the original handheld LCD, darkest first
const DMG_PALETTE: [[u8; 3]; 4] = [
    [0x0f, 0x38, 0x0f],
    [0x30, 0x62, 0x30],
    [0x8b, 0xac, 0x0f],
    [0x9b, 0xbc, 0x0f],
];

/// Active visual preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ShaderPreset {
    /// Plain nearest-neighbour pixels
    #[default]
    None,
    /// Darkened line between source rows
    Scanlines,
    /// Visible gaps between LCD cells
    LcdGrid,
    /// Four-shade green palette
    Dmg,
    /// Low-cost preset used under performance mode
    Performance,
}

impl ShaderPreset {
    /// Every preset, in menu order
    pub const ALL: [ShaderPreset; 5] = [
        Self::None,
        Self::Scanlines,
        Self::LcdGrid,
        Self::Dmg,
        Self::Performance,
    ];

    /// Stable id used in settings
    pub fn id(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Scanlines => "scanlines",
            Self::LcdGrid => "lcd-grid",
            Self::Dmg => "dmg",
            Self::Performance => "performance",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::None => "Sharp pixels",
            Self::Scanlines => "Scanlines",
            Self::LcdGrid => "LCD grid",
            Self::Dmg => "DMG green",
            Self::Performance => "Performance",
        }
    }

    /// Whether the preset costs nothing beyond the upscale
    pub fn is_low_cost(&self) -> bool {
        matches!(self, Self::None | Self::Performance)
    }
}

impl std::fmt::Display for ShaderPreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl std::str::FromStr for ShaderPreset {
    type Err = PixelcastError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.id() == wanted)
            .ok_or_else(|| PixelcastError::config(format!("Unknown preset: {}", s)))
    }
}

/// Per-draw shader parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Uniforms {
    /// Output multiplier, 1.0 = unchanged
    pub brightness: f32,
}

impl Default for Uniforms {
    fn default() -> Self {
        Self { brightness: 1.0 }
    }
}

/// Scale a colour by brightness, saturating
pub fn apply_brightness(rgba: [u8; 4], brightness: f32) -> [u8; 4] {
    if (brightness - 1.0).abs() < f32::EPSILON {
        return rgba;
    }
    let scale = |c: u8| ((c as f32) * brightness).round().clamp(0.0, 255.0) as u8;
    [scale(rgba[0]), scale(rgba[1]), scale(rgba[2]), rgba[3]]
}

fn darken(rgba: [u8; 4], factor: f32) -> [u8; 4] {
    let scale = |c: u8| ((c as f32) * factor).round() as u8;
    [scale(rgba[0]), scale(rgba[1]), scale(rgba[2]), rgba[3]]
}

/// Evaluate a preset for one output pixel
///
/// `cell` is the size of an enlarged source pixel and `(cx, cy)` the position
/// within it.
pub fn fragment(preset: ShaderPreset, src: [u8; 4], cx: u32, cy: u32, cell: u32) -> [u8; 4] {
    match preset {
        ShaderPreset::None | ShaderPreset::Performance => src,
        ShaderPreset::Scanlines => {
            if cell >= 2 && cy == cell - 1 {
                darken(src, 0.5)
            } else {
                src
            }
        }
        ShaderPreset::LcdGrid => {
            if cell >= 3 && (cx == cell - 1 || cy == cell - 1) {
                darken(src, 0.75)
            } else {
                src
            }
        }
        ShaderPreset::Dmg => {
            let luma = (src[0] as u32 * 299 + src[1] as u32 * 587 + src[2] as u32 * 114) / 1000;
            let shade = DMG_PALETTE[(luma as usize * 4 / 256).min(3)];
            [shade[0], shade[1], shade[2], src[3]]
        }
    }
}

/// Map a destination coordinate to its source coordinate
#[inline]
pub fn source_coord(dst: u32, dst_len: u32, src_len: u32) -> u32 {
    ((dst as u64 * src_len as u64) / dst_len.max(1) as u64).min(src_len.saturating_sub(1) as u64) as u32
}

/// Nearest-neighbour upscale of `frame` into `target`, running `preset` per
/// output pixel. No filtering is ever applied.
pub fn draw_scaled(frame: &VideoFrame, target: &mut FrameBuffer, preset: ShaderPreset, uniforms: Uniforms) {
    let src_res = frame.resolution;
    let dst_res = target.resolution();
    if src_res.area() == 0 || dst_res.area() == 0 || !frame.is_well_formed() {
        return;
    }

    let src = frame.pixels();
    let cell_w = (dst_res.width / src_res.width).max(1);
    let cell_h = (dst_res.height / src_res.height).max(1);
    let cell = cell_w.min(cell_h);
    let dst_width = dst_res.width as usize;

    for (y, row) in target.pixels_mut().chunks_exact_mut(dst_width).enumerate() {
        let y = y as u32;
        let sy = source_coord(y, dst_res.height, src_res.height);
        let src_row = &src[sy as usize * src_res.width as usize..][..src_res.width as usize];
        let cy = y % cell_h;

        for (x, out) in row.iter_mut().enumerate() {
            let x = x as u32;
            let sx = source_coord(x, dst_res.width, src_res.width);
            let shaded = fragment(preset, src_row[sx as usize], x % cell_w, cy, cell);
            *out = apply_brightness(shaded, uniforms.brightness);
        }
    }
}

/// Drawing context living on the accelerated worker thread
pub trait GpuContext: Send {
    /// Tier the context was created for
    fn tier(&self) -> RenderTier;

    /// Bind to the surface once it has reached the worker thread
    fn bind(&mut self, _surface: &PresentationSurface) -> Result<()> {
        Ok(())
    }

    /// Run the preset over `frame` into `target`
    fn render(
        &mut self,
        frame: &VideoFrame,
        preset: ShaderPreset,
        uniforms: Uniforms,
        target: &mut FrameBuffer,
    ) -> Result<()>;
}

/// Context evaluating the fragment functions on the worker's CPU
#[derive(Debug)]
pub struct CpuShaderContext {
    tier: RenderTier,
}

impl CpuShaderContext {
    pub fn new(tier: RenderTier) -> Self {
        Self { tier }
    }
}

impl GpuContext for CpuShaderContext {
    fn tier(&self) -> RenderTier {
        self.tier
    }

    fn render(
        &mut self,
        frame: &VideoFrame,
        preset: ShaderPreset,
        uniforms: Uniforms,
        target: &mut FrameBuffer,
    ) -> Result<()> {
        draw_scaled(frame, target, preset, uniforms);
        Ok(())
    }
}
