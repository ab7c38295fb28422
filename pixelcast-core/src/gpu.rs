//! System graphics backend
//!
//! Detects what the host machine offers for rendering:
//! - GPU vendor via `nvidia-smi` or the DRM sysfs vendor id
//! - Vulkan ICD manifests for the compute tier
//! - DRM card/render nodes for the accelerated tier
//!
//! Contexts created here run the shader presets on the render worker thread.

use async_trait::async_trait;
use std::path::Path;
use std::process::Command;
use tracing::debug;

use crate::capability::{GraphicsBackend, RenderTier, TierLimits};
use crate::error::{PixelcastError, Result};
use crate::render::shader::{CpuShaderContext, GpuContext};

/// Environment variable forcing the raster tier
pub const FORCE_SOFTWARE_ENV: &str = "PIXELCAST_FORCE_SOFTWARE";

const VULKAN_ICD_DIRS: &[&str] = &[
    "/usr/share/vulkan/icd.d",
    "/etc/vulkan/icd.d",
    "/usr/local/share/vulkan/icd.d",
];

/// GPU vendor identification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    /// Virtual GPU (virtio, QXL, llvmpipe)
    Virtual,
    Unknown,
}

impl GpuVendor {
    /// Map a PCI vendor id
    pub fn from_pci_id(id: u32) -> Self {
        match id {
            0x10de => Self::Nvidia,
            0x1002 | 0x1022 => Self::Amd,
            0x8086 => Self::Intel,
            0x1af4 | 0x1b36 | 0x15ad => Self::Virtual,
            _ => Self::Unknown,
        }
    }

    /// Largest texture edge typically supported
    pub fn max_texture_dimension(&self) -> u32 {
        match self {
            Self::Nvidia | Self::Amd => 32768,
            Self::Intel => 16384,
            Self::Virtual | Self::Unknown => 8192,
        }
    }
}

/// Detected GPU
#[derive(Debug, Clone)]
pub struct GpuInfo {
    pub name: String,
    pub vendor: GpuVendor,
}

/// Backend probing the real machine
#[derive(Debug, Default)]
pub struct SystemBackend;

impl SystemBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GraphicsBackend for SystemBackend {
    fn name(&self) -> &str {
        "system"
    }

    async fn probe_compute(&self) -> Result<TierLimits> {
        blocking(|| {
            ensure_not_forced()?;
            let gpu = detect_gpu()?;
            if gpu.vendor == GpuVendor::Virtual {
                return Err(PixelcastError::render_init(format!(
                    "virtual GPU '{}' lacks compute support",
                    gpu.name
                )));
            }
            if !has_vulkan_icd() {
                return Err(PixelcastError::render_init("no Vulkan ICD installed"));
            }
            if !has_render_node() && gpu.vendor != GpuVendor::Nvidia {
                return Err(PixelcastError::render_init("no DRM render node"));
            }
            Ok(TierLimits {
                max_texture_dimension: gpu.vendor.max_texture_dimension(),
                offscreen: true,
            })
        })
        .await
    }

    async fn probe_accelerated(&self) -> Result<TierLimits> {
        blocking(|| {
            ensure_not_forced()?;
            if std::env::var_os("LIBGL_ALWAYS_SOFTWARE").is_some() {
                return Err(PixelcastError::render_init("LIBGL_ALWAYS_SOFTWARE is set"));
            }
            let gpu = detect_gpu()?;
            Ok(TierLimits {
                max_texture_dimension: gpu.vendor.max_texture_dimension().min(16384),
                offscreen: true,
            })
        })
        .await
    }

    fn raster_limits(&self) -> TierLimits {
        TierLimits {
            max_texture_dimension: 32767,
            offscreen: false,
        }
    }

    fn create_context(&self, tier: RenderTier) -> Result<Box<dyn GpuContext>> {
        if !tier.is_accelerated() {
            return Err(PixelcastError::render_init(
                "raster tier has no accelerated context",
            ));
        }
        Ok(Box::new(CpuShaderContext::new(tier)))
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PixelcastError::render_init(format!("probe task failed: {}", e)))?
}

fn ensure_not_forced() -> Result<()> {
    if std::env::var_os(FORCE_SOFTWARE_ENV).is_some() {
        return Err(PixelcastError::render_init(format!(
            "{} is set",
            FORCE_SOFTWARE_ENV
        )));
    }
    Ok(())
}

/// Detect the primary GPU
pub fn detect_gpu() -> Result<GpuInfo> {
    if let Ok(name) = query_nvidia_name() {
        return Ok(GpuInfo {
            name,
            vendor: GpuVendor::Nvidia,
        });
    }

    let vendor_id = read_drm_vendor()
        .ok_or_else(|| PixelcastError::render_init("no GPU found under /sys/class/drm"))?;
    let vendor = GpuVendor::from_pci_id(vendor_id);
    debug!("DRM vendor id {:#06x} -> {:?}", vendor_id, vendor);

    Ok(GpuInfo {
        name: format!("{:?} GPU", vendor),
        vendor,
    })
}

/// Query GPU name from nvidia-smi
fn query_nvidia_name() -> Result<String> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader,nounits", "--id=0"])
        .output()
        .map_err(|e| PixelcastError::render_init(format!("Failed to run nvidia-smi: {}", e)))?;

    if !output.status.success() {
        return Err(PixelcastError::render_init("nvidia-smi query failed"));
    }

    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() {
        return Err(PixelcastError::render_init("Empty GPU name from nvidia-smi"));
    }

    Ok(name)
}

fn read_drm_vendor() -> Option<u32> {
    let entries = std::fs::read_dir("/sys/class/drm").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("card") || name.contains('-') {
            continue;
        }
        let vendor_path = entry.path().join("device/vendor");
        if let Ok(raw) = std::fs::read_to_string(&vendor_path) {
            if let Some(id) = parse_pci_id(&raw) {
                return Some(id);
            }
        }
    }
    None
}

fn parse_pci_id(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u32::from_str_radix(hex, 16).ok()
}

fn has_vulkan_icd() -> bool {
    VULKAN_ICD_DIRS.iter().any(|dir| {
        std::fs::read_dir(dir)
            .map(|mut entries| {
                entries.any(|e| {
                    e.map(|e| e.path().extension().is_some_and(|ext| ext == "json"))
                        .unwrap_or(false)
                })
            })
            .unwrap_or(false)
    })
}

fn has_render_node() -> bool {
    Path::new("/dev/dri/renderD128").exists()
}
