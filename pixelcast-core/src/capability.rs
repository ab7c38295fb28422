//! Graphics capability detection
//!
//! Probes the rendering tiers a [`GraphicsBackend`] offers, in priority
//! order:
//! 1. a high-performance compute-capable context (device creation confirmed)
//! 2. a widely supported accelerated context
//! 3. unaccelerated raster drawing, which always succeeds
//!
//! Tier probe failures are logged and recorded as "unavailable"; they never
//! propagate. Detection runs once and is cached until [`CapabilityProbe::redetect`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::render::shader::GpuContext;

/// Upper bound on a single tier probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Rendering tier, ordered from least to most capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderTier {
    /// Unaccelerated raster drawing
    Raster,
    /// Widely supported accelerated 2D/3D context
    Accelerated,
    /// High-performance compute-capable context
    Compute,
}

impl RenderTier {
    /// Whether this tier drives the accelerated renderer
    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Self::Raster)
    }
}

impl std::fmt::Display for RenderTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raster => write!(f, "raster"),
            Self::Accelerated => write!(f, "accelerated"),
            Self::Compute => write!(f, "compute"),
        }
    }
}

/// Limits reported by a successful tier probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Largest texture/surface edge in pixels
    pub max_texture_dimension: u32,
    /// Whether rendering can move to a worker context
    pub offscreen: bool,
}

/// Probe result for one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCapability {
    pub tier: RenderTier,
    pub available: bool,
    pub max_texture_dimension: u32,
    pub offscreen: bool,
    /// Why the tier is unavailable, if it is
    pub reason: Option<String>,
}

impl TierCapability {
    fn available(tier: RenderTier, limits: TierLimits) -> Self {
        Self {
            tier,
            available: true,
            max_texture_dimension: limits.max_texture_dimension,
            offscreen: limits.offscreen,
            reason: None,
        }
    }

    fn unavailable(tier: RenderTier, reason: impl Into<String>) -> Self {
        Self {
            tier,
            available: false,
            max_texture_dimension: 0,
            offscreen: false,
            reason: Some(reason.into()),
        }
    }
}

/// Outcome of capability detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityReport {
    /// Name of the backend that was probed
    pub backend: String,
    pub compute: TierCapability,
    pub accelerated: TierCapability,
    pub raster: TierCapability,
    /// Ranked decision
    pub preferred_tier: RenderTier,
}

impl CapabilityReport {
    fn new(backend: String, compute: TierCapability, accelerated: TierCapability, raster: TierCapability) -> Self {
        let preferred_tier = rank(&[&compute, &accelerated, &raster]);
        Self {
            backend,
            compute,
            accelerated,
            raster,
            preferred_tier,
        }
    }

    /// Capability of a specific tier
    pub fn tier(&self, tier: RenderTier) -> &TierCapability {
        match tier {
            RenderTier::Compute => &self.compute,
            RenderTier::Accelerated => &self.accelerated,
            RenderTier::Raster => &self.raster,
        }
    }

    /// Whether the preferred tier drives the accelerated renderer
    pub fn supports_acceleration(&self) -> bool {
        self.preferred_tier.is_accelerated()
    }

    /// Limits of the preferred tier
    pub fn preferred(&self) -> &TierCapability {
        self.tier(self.preferred_tier)
    }

    /// Whether the preferred tier can drive the renderer from its worker
    /// thread. Main-thread-only tiers cannot take a transferred surface.
    pub fn supports_worker_rendering(&self) -> bool {
        let preferred = self.preferred();
        preferred.tier.is_accelerated() && preferred.offscreen
    }
}

impl std::fmt::Display for CapabilityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Backend: {}", self.backend)?;
        for cap in [&self.compute, &self.accelerated, &self.raster] {
            if cap.available {
                writeln!(
                    f,
                    "  {:<12} available  max {}px  offscreen: {}",
                    cap.tier.to_string(),
                    cap.max_texture_dimension,
                    if cap.offscreen { "yes" } else { "no" }
                )?;
            } else {
                writeln!(
                    f,
                    "  {:<12} unavailable ({})",
                    cap.tier.to_string(),
                    cap.reason.as_deref().unwrap_or("unknown")
                )?;
            }
        }
        write!(f, "Preferred tier: {}", self.preferred_tier)
    }
}

/// Pick the highest tier that is available and off-thread capable, else the
/// highest available tier, else raster. Input is in priority order.
fn rank(tiers: &[&TierCapability]) -> RenderTier {
    tiers
        .iter()
        .find(|t| t.available && t.offscreen)
        .or_else(|| tiers.iter().find(|t| t.available))
        .map(|t| t.tier)
        .unwrap_or(RenderTier::Raster)
}

/// Platform graphics layer
///
/// `probe_*` calls may fail freely; the probe treats any error as "tier
/// unavailable".
#[async_trait]
pub trait GraphicsBackend: Send + Sync {
    /// Backend name for logs and reports
    fn name(&self) -> &str;

    /// Request a high-performance compute-capable context and create a device
    async fn probe_compute(&self) -> Result<TierLimits>;

    /// Request a widely supported accelerated context
    async fn probe_accelerated(&self) -> Result<TierLimits>;

    /// Limits of plain raster drawing
    fn raster_limits(&self) -> TierLimits;

    /// Create a drawing context for the accelerated worker
    ///
    /// Called before the surface is transferred; the context then moves to
    /// the worker thread.
    fn create_context(&self, tier: RenderTier) -> Result<Box<dyn GpuContext>>;
}

/// Cached capability detection over a [`GraphicsBackend`]
#[derive(Clone)]
pub struct CapabilityProbe {
    backend: Arc<dyn GraphicsBackend>,
    cached: Arc<Mutex<Option<CapabilityReport>>>,
}

impl CapabilityProbe {
    pub fn new(backend: Arc<dyn GraphicsBackend>) -> Self {
        Self {
            backend,
            cached: Arc::new(Mutex::new(None)),
        }
    }

    /// Backend the probe runs against
    pub fn backend(&self) -> &Arc<dyn GraphicsBackend> {
        &self.backend
    }

    /// Detect capabilities, reusing a previous result
    pub async fn detect(&self) -> CapabilityReport {
        let mut cached = self.cached.lock().await;
        if let Some(report) = cached.as_ref() {
            return report.clone();
        }
        let report = self.run().await;
        *cached = Some(report.clone());
        report
    }

    /// Drop the cached result and probe again
    pub async fn redetect(&self) -> CapabilityReport {
        let mut cached = self.cached.lock().await;
        let report = self.run().await;
        *cached = Some(report.clone());
        report
    }

    /// Cached result, if detection already ran
    pub async fn cached(&self) -> Option<CapabilityReport> {
        self.cached.lock().await.clone()
    }

    async fn run(&self) -> CapabilityReport {
        info!("Probing graphics capabilities via {}", self.backend.name());

        let compute = probe_tier(RenderTier::Compute, self.backend.probe_compute()).await;
        let accelerated = probe_tier(RenderTier::Accelerated, self.backend.probe_accelerated()).await;
        let raster = TierCapability::available(RenderTier::Raster, self.backend.raster_limits());

        let report = CapabilityReport::new(self.backend.name().to_string(), compute, accelerated, raster);
        info!(
            "Preferred render tier: {} (max texture {}px)",
            report.preferred_tier,
            report.preferred().max_texture_dimension
        );
        report
    }
}

async fn probe_tier(
    tier: RenderTier,
    probe: impl std::future::Future<Output = Result<TierLimits>>,
) -> TierCapability {
    match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
        Ok(Ok(limits)) => {
            debug!("{} tier available: {:?}", tier, limits);
            TierCapability::available(tier, limits)
        }
        Ok(Err(e)) => {
            warn!("{} tier unavailable: {}", tier, e);
            TierCapability::unavailable(tier, e.to_string())
        }
        Err(_) => {
            warn!("{} tier probe timed out", tier);
            TierCapability::unavailable(tier, "probe timed out")
        }
    }
}
