//! Mock infrastructure for testing
//!
//! Graphics backends and presentation hosts with scripted failures, plus
//! helpers for building sessions over the synthetic device.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use pixelcast_core::capability::{CapabilityProbe, GraphicsBackend, RenderTier, TierLimits};
use pixelcast_core::config::{MemorySettings, PerformanceStrategy, Settings};
use pixelcast_core::device::{SyntheticBehavior, SyntheticConfig, SyntheticDevice};
use pixelcast_core::error::{PixelcastError, Result};
use pixelcast_core::render::shader::{CpuShaderContext, GpuContext};
use pixelcast_core::render::{ShaderPreset, Uniforms};
use pixelcast_core::surface::{FrameBuffer, PresentationHost, PresentationSurface};
use pixelcast_core::types::{Handle, VideoFrame};
use pixelcast_core::viewport::Dimensions;
use pixelcast_core::{SessionEvent, StreamSession};

/// What contexts created by [`MockBackend`] do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// Render normally
    Working,
    /// Fail to create the context, before any surface transfer
    FailCreate,
    /// Fail to bind to the surface once it reached the worker
    FailBind,
    /// Fail on the first frame
    FailRender,
}

/// Backend with configurable tiers and context behaviour
#[derive(Debug, Clone)]
pub struct MockBackend {
    pub accelerated: bool,
    /// Whether the accelerated tier can render from a worker thread
    pub offscreen: bool,
    pub max_texture: u32,
    pub context: ContextMode,
}

impl MockBackend {
    pub fn accelerated() -> Self {
        Self {
            accelerated: true,
            offscreen: true,
            max_texture: 8192,
            context: ContextMode::Working,
        }
    }

    pub fn main_thread_only() -> Self {
        Self {
            offscreen: false,
            ..Self::accelerated()
        }
    }

    pub fn raster_only() -> Self {
        Self {
            accelerated: false,
            ..Self::accelerated()
        }
    }

    pub fn with_context(context: ContextMode) -> Self {
        Self {
            context,
            ..Self::accelerated()
        }
    }

    pub fn with_max_texture(max_texture: u32) -> Self {
        Self {
            max_texture,
            ..Self::accelerated()
        }
    }
}

#[derive(Debug)]
struct BrokenContext {
    fail_bind: bool,
}

impl GpuContext for BrokenContext {
    fn tier(&self) -> RenderTier {
        RenderTier::Accelerated
    }

    fn bind(&mut self, _: &PresentationSurface) -> Result<()> {
        if self.fail_bind {
            return Err(PixelcastError::render_init("surface rejected by driver"));
        }
        Ok(())
    }

    fn render(&mut self, _: &VideoFrame, _: ShaderPreset, _: Uniforms, _: &mut FrameBuffer) -> Result<()> {
        Err(PixelcastError::surface("context lost"))
    }
}

#[async_trait]
impl GraphicsBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn probe_compute(&self) -> Result<TierLimits> {
        Err(PixelcastError::render_init("compute not offered by mock"))
    }

    async fn probe_accelerated(&self) -> Result<TierLimits> {
        if !self.accelerated {
            return Err(PixelcastError::render_init("acceleration disabled"));
        }
        Ok(TierLimits {
            max_texture_dimension: self.max_texture,
            offscreen: self.offscreen,
        })
    }

    fn raster_limits(&self) -> TierLimits {
        TierLimits {
            max_texture_dimension: 16384,
            offscreen: false,
        }
    }

    fn create_context(&self, tier: RenderTier) -> Result<Box<dyn GpuContext>> {
        match self.context {
            ContextMode::Working => Ok(Box::new(CpuShaderContext::new(tier))),
            ContextMode::FailCreate => Err(PixelcastError::render_init("device creation failed")),
            ContextMode::FailBind => Ok(Box::new(BrokenContext { fail_bind: true })),
            ContextMode::FailRender => Ok(Box::new(BrokenContext { fail_bind: false })),
        }
    }
}

/// Host that records surfaces and can refuse attachments
#[derive(Debug, Default)]
pub struct ScriptedHost {
    attached: Mutex<Vec<Handle>>,
    detached: Mutex<Vec<Handle>>,
    /// Refuse every attach after this many succeeded
    fail_after: Option<usize>,
}

impl ScriptedHost {
    pub fn failing_after(attaches: usize) -> Self {
        Self {
            fail_after: Some(attaches),
            ..Default::default()
        }
    }

    pub fn attached(&self) -> Vec<Handle> {
        self.attached.lock().clone()
    }

    pub fn detached(&self) -> Vec<Handle> {
        self.detached.lock().clone()
    }
}

impl PresentationHost for ScriptedHost {
    fn attach(&self, surface: Handle, _dimensions: Dimensions) -> Result<()> {
        let mut attached = self.attached.lock();
        if self.fail_after.is_some_and(|limit| attached.len() >= limit) {
            return Err(PixelcastError::surface("host refused surface"));
        }
        attached.push(surface);
        Ok(())
    }

    fn detach(&self, surface: Handle) {
        self.detached.lock().push(surface);
    }
}

/// Settings with a health timeout short enough for tests
pub fn test_settings(health_timeout_ms: u64) -> Settings {
    let mut settings = Settings::default();
    settings.health.timeout_ms = health_timeout_ms;
    settings.viewport.resize_debounce_ms = 20;
    settings
}

/// Settings with performance mode configured up front
pub fn performance_settings(enabled: bool, strategy: PerformanceStrategy) -> Settings {
    let mut settings = test_settings(1000);
    settings.render.performance_mode = enabled;
    settings.render.performance_strategy = strategy;
    settings
}

/// Synthetic device with a given behaviour
pub fn device(behavior: SyntheticBehavior) -> Arc<SyntheticDevice> {
    Arc::new(SyntheticDevice::new(SyntheticConfig {
        behavior,
        ..Default::default()
    }))
}

/// Synthetic device whose acquisition takes a while
pub fn slow_device(delay: Duration) -> Arc<SyntheticDevice> {
    Arc::new(SyntheticDevice::new(SyntheticConfig {
        acquire_delay: delay,
        ..Default::default()
    }))
}

/// Synthetic device whose release takes a while
pub fn slow_release_device(delay: Duration) -> Arc<SyntheticDevice> {
    Arc::new(SyntheticDevice::new(SyntheticConfig {
        release_delay: delay,
        ..Default::default()
    }))
}

/// Session over `device` and `backend` with a headless host
pub fn session(device: Arc<SyntheticDevice>, backend: MockBackend, settings: Settings) -> StreamSession {
    StreamSession::new(device, Arc::new(backend), Arc::new(MemorySettings::new(settings)))
}

/// Session presenting into a [`ScriptedHost`]
pub fn session_with_host(
    device: Arc<SyntheticDevice>,
    backend: MockBackend,
    host: Arc<ScriptedHost>,
    settings: Settings,
) -> StreamSession {
    StreamSession::with_host(
        device,
        CapabilityProbe::new(Arc::new(backend)),
        host,
        Arc::new(MemorySettings::new(settings)),
    )
}

/// Wait for the first event matching `pred`, skipping others
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for session event")
}

/// Poll `cond` until it holds
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    let wait = async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("timed out waiting for condition");
}
