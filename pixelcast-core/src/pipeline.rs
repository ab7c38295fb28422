//! Adaptive render pipeline
//!
//! Chooses between the accelerated and the software renderer, owns the
//! presentation surface and keeps it sized to the container.
//!
//! ```text
//! start ─▶ health probe ─▶ performance mode? ──yes──▶ software
//!                                 │
//!                                 no
//!                                 ▼
//!                          capability probe ──no acceleration──▶ software
//!                                 │        └──main thread only──▶ software
//!                                 ▼
//!                     accelerated (surface transferred)
//!                          │ init failed, surface kept  ─▶ software
//!                          │ init failed, surface gone  ─▶ SurfaceUnrecoverable
//! ```
//!
//! Mid-session, a failed switch to the accelerated renderer replaces the
//! surface and keeps drawing in software.
//!
//! The session serializes access behind an async mutex, so mode switches
//! never overlap.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::capability::{CapabilityProbe, CapabilityReport};
use crate::config::{PerformanceStrategy, Settings};
use crate::device::VideoTrack;
use crate::error::{PixelcastError, Result};
use crate::health::{HealthMonitor, HealthOutcome};
use crate::render::{
    AcceleratedRenderer, ActiveRenderer, ContinueFn, FrameRenderer, LoopControls, RenderStats,
    ShaderPreset, SoftwareRenderer, StartFailure, SurfaceExpiry,
};
use crate::surface::{
    PresentationHost, PresentationSurface, PresentedFrame, PresentedFrames, Presenter, SurfaceOwnership,
    SurfaceSlot,
};
use crate::types::{Handle, RenderMode, Resolution};
use crate::viewport::{ContainerMetrics, Dimensions, LayoutChrome, ViewportScaler};

const DISPLAY_UNAVAILABLE: &str = "display unavailable until a new session is started";

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No renderer attached
    Idle,
    /// A renderer is drawing frames
    Running,
    /// The surface was lost and could not be replaced
    Degraded,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Render pipeline for one session at a time
pub struct RenderPipeline {
    /// Pipeline handle
    handle: Handle,
    /// Capability detection (cached per process)
    probe: CapabilityProbe,
    /// Where surfaces are attached
    host: Arc<dyn PresentationHost>,
    /// Integer scaler
    scaler: ViewportScaler,
    /// Last measured container
    container: Option<ContainerMetrics>,
    /// Presentation surface, built on first start
    slot: Option<SurfaceSlot>,
    /// Renderer currently drawing
    renderer: Option<ActiveRenderer>,
    /// Renderer mode of the current or last session
    mode: RenderMode,
    state: PipelineState,
    performance_mode: bool,
    strategy: PerformanceStrategy,
    /// Preset the renderer uses
    current_preset: ShaderPreset,
    /// User preset saved while performance mode is on
    cached_preset: Option<ShaderPreset>,
    brightness: f32,
    health: HealthMonitor,
    health_timeout: Duration,
    /// Borrowed for the duration of a session
    track: Option<VideoTrack>,
    visible_tx: watch::Sender<bool>,
    size_tx: watch::Sender<Dimensions>,
    presenter: Presenter,
    stats: Arc<RenderStats>,
    expiry_tx: mpsc::UnboundedSender<SurfaceExpiry>,
    expiry_rx: Option<mpsc::UnboundedReceiver<SurfaceExpiry>>,
    /// Readable without the pipeline lock
    accelerated: Arc<AtomicBool>,
    /// Consulted by render loops after each wake-up
    running: Arc<AtomicBool>,
    start_time: Option<Instant>,
}

impl RenderPipeline {
    /// Create a pipeline from the current settings
    pub fn new(probe: CapabilityProbe, host: Arc<dyn PresentationHost>, settings: &Settings) -> Self {
        let native = settings.native_resolution();
        let (visible_tx, _) = watch::channel(true);
        let (size_tx, _) = watch::channel(Dimensions::native(native));
        let (expiry_tx, expiry_rx) = mpsc::unbounded_channel();

        let (current_preset, cached_preset) = if settings.render.performance_mode
            && settings.render.performance_strategy == PerformanceStrategy::LowCostPreset
        {
            (ShaderPreset::Performance, Some(settings.render.preset))
        } else if settings.render.performance_mode {
            (settings.render.preset, Some(settings.render.preset))
        } else {
            (settings.render.preset, None)
        };

        Self {
            handle: Handle::new(),
            probe,
            host,
            scaler: ViewportScaler::new(native),
            container: None,
            slot: None,
            renderer: None,
            mode: RenderMode::Software,
            state: PipelineState::Idle,
            performance_mode: settings.render.performance_mode,
            strategy: settings.render.performance_strategy,
            current_preset,
            cached_preset,
            brightness: settings.render.brightness,
            health: HealthMonitor::new(),
            health_timeout: settings.health_timeout(),
            track: None,
            visible_tx,
            size_tx,
            presenter: Presenter::new(),
            stats: Arc::new(RenderStats::default()),
            expiry_tx,
            expiry_rx: Some(expiry_rx),
            accelerated: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            start_time: None,
        }
    }

    /// Get the pipeline handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// The user's preset (restored when performance mode turns off)
    pub fn preset(&self) -> ShaderPreset {
        self.cached_preset.unwrap_or(self.current_preset)
    }

    /// The preset the renderer is using right now
    pub fn effective_preset(&self) -> ShaderPreset {
        self.current_preset
    }

    pub fn performance_mode(&self) -> bool {
        self.performance_mode
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    /// Whether an accelerated renderer is drawing
    pub fn is_accelerated(&self) -> bool {
        self.accelerated.load(Ordering::SeqCst)
    }

    /// Shared flag mirroring [`is_accelerated`](Self::is_accelerated)
    pub fn accelerated_flag(&self) -> Arc<AtomicBool> {
        self.accelerated.clone()
    }

    /// Id of the current presentation surface
    pub fn surface_id(&self) -> Option<Handle> {
        self.slot.as_ref().map(|s| s.id())
    }

    pub fn surface_ownership(&self) -> Option<SurfaceOwnership> {
        self.slot.as_ref().map(|s| s.ownership())
    }

    /// Current surface dimensions
    pub fn dimensions(&self) -> Dimensions {
        *self.size_tx.borrow()
    }

    /// Receiver for surface expiry signals; can be taken once
    pub fn take_expiry_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SurfaceExpiry>> {
        self.expiry_rx.take()
    }

    /// Publisher of presented pictures, shared by every surface
    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    /// Most recent presented picture
    pub fn latest_presented(&self) -> Option<Arc<PresentedFrame>> {
        self.presenter.latest()
    }

    pub fn subscribe_presented(&self) -> PresentedFrames {
        self.presenter.subscribe()
    }

    /// Confirm frames flow, then attach a renderer
    pub async fn start(&mut self, track: &VideoTrack, native: Resolution) -> Result<RenderMode> {
        if self.state != PipelineState::Idle {
            debug!("Pipeline {} restarting from {}", self.handle, self.state);
            self.stop().await;
        }

        info!("Starting render pipeline {} for {} content", self.handle, native);
        self.stats.reset();
        self.scaler.set_native(native);
        if let Some(container) = self.container {
            self.scaler.calculate_dimensions(&container);
        }

        match self.health.probe(track, self.health_timeout).await {
            HealthOutcome::Healthy(first) => {
                debug!("First frame at {:?}", first);
            }
            HealthOutcome::Unhealthy(reason) => {
                return Err(PixelcastError::StreamUnhealthy(reason));
            }
        }

        self.track = Some(track.clone());
        self.running.store(true, Ordering::SeqCst);
        self.start_time = Some(Instant::now());

        let result = self.launch(track).await;
        match &result {
            Ok(mode) => {
                self.state = PipelineState::Running;
                info!("Pipeline {} rendering in {} mode", self.handle, mode);
            }
            Err(e) => {
                error!("Pipeline {} failed to start: {}", self.handle, e);
                self.running.store(false, Ordering::SeqCst);
                self.track = None;
            }
        }
        result
    }

    /// Halt the render loop and return the surface to a clean state
    ///
    /// No renderer draws after this returns.
    pub async fn stop(&mut self) {
        if self.state == PipelineState::Idle && self.renderer.is_none() {
            return;
        }

        info!("Stopping render pipeline {}", self.handle);
        self.running.store(false, Ordering::SeqCst);
        self.health.stop_monitoring();
        self.halt_renderer().await;

        match self.slot.as_mut() {
            Some(SurfaceSlot::Owned(surface)) => surface.reset(),
            Some(_) => {
                // Transferred (or never returned); only a new surface is clean
                if let Err(e) = self.replace_surface() {
                    warn!("Could not rebuild surface on stop: {}", e);
                }
            }
            None => {}
        }
        self.presenter.clear();

        self.track = None;
        self.scaler.reset();
        self.state = PipelineState::Idle;

        let elapsed = self
            .start_time
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        info!(
            "Pipeline {} stopped - {} frames in {:.1}s, {} duplicate wake-ups skipped",
            self.handle,
            self.stats.frames_drawn(),
            elapsed,
            self.stats.duplicates_skipped()
        );
    }

    /// Toggle performance mode, switching renderers when a session is live
    pub async fn set_performance_mode(&mut self, enabled: bool) -> Result<RenderMode> {
        if enabled == self.performance_mode {
            return Ok(self.mode);
        }
        self.performance_mode = enabled;
        info!("Performance mode {}", if enabled { "enabled" } else { "disabled" });

        if enabled {
            self.cached_preset = Some(self.current_preset);
        } else if let Some(preset) = self.cached_preset.take() {
            self.current_preset = preset;
        }

        if self.state != PipelineState::Running {
            if enabled && self.strategy == PerformanceStrategy::LowCostPreset {
                self.current_preset = ShaderPreset::Performance;
            }
            return Ok(self.mode);
        }

        match (enabled, self.mode) {
            (true, RenderMode::Accelerated) if self.strategy == PerformanceStrategy::LowCostPreset => {
                self.current_preset = ShaderPreset::Performance;
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.set_preset(ShaderPreset::Performance);
                }
                Ok(RenderMode::Accelerated)
            }
            (true, RenderMode::Accelerated) => self.switch_to_software().await,
            (true, RenderMode::Software) => Ok(RenderMode::Software),
            (false, RenderMode::Accelerated) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.set_preset(self.current_preset);
                }
                Ok(RenderMode::Accelerated)
            }
            (false, RenderMode::Software) => self.switch_to_accelerated().await,
        }
    }

    /// Change the active preset
    ///
    /// While performance mode is on the choice is remembered and applied
    /// when it turns off.
    pub fn set_preset(&mut self, preset: ShaderPreset) {
        if self.cached_preset.is_some() {
            debug!("Preset {} saved for after performance mode", preset);
            self.cached_preset = Some(preset);
            if self.strategy == PerformanceStrategy::LowCostPreset {
                return;
            }
        }
        self.current_preset = preset;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_preset(preset);
        }
    }

    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = brightness;
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.set_brightness(brightness);
        }
    }

    /// Pause (hidden) or resume (visible) the render loop in place
    pub fn set_visible(&self, visible: bool) {
        if *self.visible_tx.borrow() != visible {
            debug!("Presentation {}", if visible { "visible" } else { "hidden" });
            self.visible_tx.send_replace(visible);
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.visible_tx.borrow()
    }

    /// Cache the layout chrome for this session
    pub fn set_chrome(&mut self, chrome: LayoutChrome) {
        self.scaler.set_chrome(chrome);
    }

    /// Recompute the surface size for a container
    ///
    /// `force` bypasses the dimension cache. Returns the new dimensions, or
    /// `None` when nothing changed.
    pub fn apply_resize(&mut self, container: ContainerMetrics, force: bool) -> Option<Dimensions> {
        self.container = Some(container);
        let dims = if force {
            Some(self.scaler.force_recalculate(&container))
        } else {
            self.scaler.calculate_dimensions(&container).dimensions()
        }?;

        // A live loop resizes its own surface
        if let Some(surface) = self.slot.as_mut().and_then(|s| s.as_owned_mut()) {
            surface.resize(dims);
        }
        self.size_tx.send_replace(dims);
        Some(dims)
    }

    /// Recover from a dead accelerated worker
    ///
    /// Replaces the surface and continues in software. Signals for surfaces
    /// that are no longer current are ignored.
    pub async fn handle_surface_expired(&mut self, expiry: &SurfaceExpiry) -> Result<RenderMode> {
        let current = self.slot.as_ref().map(|s| s.id());
        if current != Some(expiry.surface) || self.mode != RenderMode::Accelerated {
            debug!("Ignoring expiry of stale surface {}", expiry.surface);
            return Ok(self.mode);
        }

        warn!("Surface {} expired ({}); falling back to software", expiry.surface, expiry.reason);
        if self.state != PipelineState::Running {
            self.halt_renderer().await;
            return match self.replace_surface() {
                Ok(()) => Ok(self.mode),
                Err(e) => Err(self.degrade(e)),
            };
        }
        self.switch_to_software().await
    }

    /// Snapshot of the pipeline counters
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            handle: self.handle,
            state: self.state,
            mode: self.mode,
            preset: self.current_preset,
            performance_mode: self.performance_mode,
            surface: self.surface_id(),
            dimensions: self.dimensions(),
            frames_drawn: self.stats.frames_drawn(),
            duplicates_skipped: self.stats.duplicates_skipped(),
            pauses: self.stats.pauses(),
            renderer_switches: self.stats.renderer_switches(),
            elapsed_seconds: self
                .start_time
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(0.0),
        }
    }

    async fn launch(&mut self, track: &VideoTrack) -> Result<RenderMode> {
        self.ensure_surface()?;

        // The low-cost preset only applies to an accelerated renderer that
        // is already running
        if self.performance_mode {
            info!("Performance mode on; using software renderer");
            self.start_software(track).await?;
            return Ok(RenderMode::Software);
        }

        let report = self.probe.detect().await;
        if !report.supports_acceleration() {
            info!("No accelerated tier available; using software renderer");
            self.start_software(track).await?;
            return Ok(RenderMode::Software);
        }
        if !report.supports_worker_rendering() {
            info!(
                "{} tier cannot render off the main thread; using software renderer",
                report.preferred_tier
            );
            self.start_software(track).await?;
            return Ok(RenderMode::Software);
        }

        match self.start_accelerated(track, &report).await {
            Ok(()) => Ok(RenderMode::Accelerated),
            Err(StartFailure {
                error,
                surface: Some(surface),
            }) => {
                warn!("Accelerated renderer unavailable ({}); falling back to software", error);
                self.restore_surface(surface);
                self.start_software(track).await?;
                Ok(RenderMode::Software)
            }
            Err(StartFailure { error, surface: None }) => {
                warn!("Accelerated renderer failed after surface transfer: {}", error);
                Err(self.degrade(error))
            }
        }
    }

    async fn switch_to_software(&mut self) -> Result<RenderMode> {
        let Some(track) = self.track.clone() else {
            return Ok(self.mode);
        };

        info!("Switching to software renderer");
        self.stats.record_switch();
        self.halt_renderer().await;

        if !matches!(self.slot, Some(SurfaceSlot::Owned(_))) {
            if let Err(e) = self.replace_surface() {
                return Err(self.degrade(e));
            }
        }

        if let Err(e) = self.start_software(&track).await {
            return Err(self.degrade(e));
        }
        Ok(RenderMode::Software)
    }

    async fn switch_to_accelerated(&mut self) -> Result<RenderMode> {
        let Some(track) = self.track.clone() else {
            return Ok(self.mode);
        };

        let report = self.probe.detect().await;
        if !report.supports_worker_rendering() {
            debug!("Staying in software; no accelerated tier for the render worker");
            return Ok(RenderMode::Software);
        }

        info!("Switching to accelerated renderer");
        self.stats.record_switch();
        self.halt_renderer().await;
        if let Err(e) = self.ensure_surface() {
            return Err(self.degrade(e));
        }

        match self.start_accelerated(&track, &report).await {
            Ok(()) => Ok(RenderMode::Accelerated),
            Err(StartFailure {
                error,
                surface: Some(surface),
            }) => {
                warn!("Accelerated renderer unavailable ({}); staying in software", error);
                self.restore_surface(surface);
                match self.start_software(&track).await {
                    Ok(()) => Ok(RenderMode::Software),
                    Err(e) => Err(self.degrade(e)),
                }
            }
            Err(StartFailure { error, surface: None }) => {
                warn!("Accelerated renderer failed after surface transfer ({}); replacing surface", error);
                if let Err(e) = self.replace_surface() {
                    return Err(self.degrade(e));
                }
                match self.start_software(&track).await {
                    Ok(()) => Ok(RenderMode::Software),
                    Err(e) => Err(self.degrade(e)),
                }
            }
        }
    }

    async fn start_accelerated(
        &mut self,
        track: &VideoTrack,
        report: &CapabilityReport,
    ) -> std::result::Result<(), StartFailure> {
        let capability = report.preferred();
        let surface = self
            .slot
            .as_mut()
            .and_then(|s| s.transfer())
            .ok_or_else(|| StartFailure::lost(PixelcastError::surface("no surface to transfer")))?;
        self.size_tx.send_replace(surface.dimensions());

        let mut renderer = AcceleratedRenderer::new(
            self.probe.backend().clone(),
            capability.tier,
            capability.max_texture_dimension,
            self.current_preset,
            self.brightness,
            self.expiry_tx.clone(),
        );
        renderer
            .start(track, surface, self.controls(), self.should_continue())
            .await?;

        self.renderer = Some(ActiveRenderer::Accelerated(renderer));
        self.mode = RenderMode::Accelerated;
        self.accelerated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start_software(&mut self, track: &VideoTrack) -> Result<()> {
        let surface = self
            .slot
            .as_mut()
            .and_then(|s| s.lend())
            .ok_or_else(|| PixelcastError::surface("surface is not available for software drawing"))?;
        self.size_tx.send_replace(surface.dimensions());

        let mut renderer = SoftwareRenderer::new(self.brightness);
        if let Err(failure) = renderer
            .start(track, surface, self.controls(), self.should_continue())
            .await
        {
            if let Some(surface) = failure.surface {
                self.restore_surface(surface);
            }
            return Err(failure.error);
        }

        self.renderer = Some(ActiveRenderer::Software(renderer));
        self.mode = RenderMode::Software;
        self.accelerated.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Stop whatever renderer runs, taking back a borrowed surface
    async fn halt_renderer(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            let stopped = renderer.stop().await;
            debug!("{} renderer halted: {:?}", renderer.mode(), stopped.exit);
            if let Some(surface) = stopped.surface {
                self.restore_surface(surface);
            }
        }
        self.accelerated.store(false, Ordering::SeqCst);
    }

    fn restore_surface(&mut self, surface: PresentationSurface) {
        match self.slot.as_mut() {
            Some(slot) => slot.restore(surface),
            None => self.slot = Some(SurfaceSlot::Owned(surface)),
        }
    }

    fn ensure_surface(&mut self) -> Result<()> {
        match self.slot {
            Some(SurfaceSlot::Owned(_)) => Ok(()),
            _ => self.replace_surface(),
        }
    }

    /// Destroy the current surface and attach a fresh one
    fn replace_surface(&mut self) -> Result<()> {
        if let Some(old) = self.slot.take() {
            self.host.detach(old.id());
        }

        let dims = self
            .scaler
            .last()
            .unwrap_or_else(|| Dimensions::native(self.scaler.native()));
        let surface = PresentationSurface::new(dims, self.presenter.clone());
        self.host
            .attach(surface.id(), dims)
            .map_err(|e| PixelcastError::surface(format!("failed to attach surface: {}", e)))?;

        info!("Attached new presentation surface {}", surface.id());
        self.size_tx.send_replace(dims);
        self.slot = Some(SurfaceSlot::Owned(surface));
        Ok(())
    }

    /// Record an unrecoverable surface and produce the error to report
    ///
    /// A surface that is not owned here is forgotten, so a transferred slot
    /// never outlives the accelerated renderer.
    fn degrade(&mut self, cause: PixelcastError) -> PixelcastError {
        error!("Pipeline {} degraded: {}", self.handle, cause);
        self.state = PipelineState::Degraded;
        self.running.store(false, Ordering::SeqCst);
        self.accelerated.store(false, Ordering::SeqCst);
        if !matches!(self.slot, None | Some(SurfaceSlot::Owned(_))) {
            if let Some(lost) = self.slot.take() {
                self.host.detach(lost.id());
            }
        }

        let cause = match cause.root() {
            PixelcastError::SurfaceUnrecoverable(_) => cause,
            _ => PixelcastError::surface(cause.to_string()),
        };
        cause.with_context(DISPLAY_UNAVAILABLE)
    }

    fn controls(&self) -> LoopControls {
        LoopControls {
            visible: self.visible_tx.subscribe(),
            dimensions: self.size_tx.subscribe(),
            stats: self.stats.clone(),
        }
    }

    fn should_continue(&self) -> ContinueFn {
        let running = self.running.clone();
        Arc::new(move || running.load(Ordering::SeqCst))
    }
}

/// Pipeline statistics
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Pipeline handle
    pub handle: Handle,
    /// Current state
    pub state: PipelineState,
    /// Active renderer mode
    pub mode: RenderMode,
    /// Preset in use
    pub preset: ShaderPreset,
    pub performance_mode: bool,
    /// Current surface id
    pub surface: Option<Handle>,
    /// Current surface size
    pub dimensions: Dimensions,
    /// Frames drawn
    pub frames_drawn: u64,
    /// Wake-ups without a new frame
    pub duplicates_skipped: u64,
    /// Times the loop paused while hidden
    pub pauses: u64,
    /// Mid-session renderer switches
    pub renderer_switches: u64,
    /// Elapsed time in seconds
    pub elapsed_seconds: f64,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pipeline {}: {} - {} @ {} preset '{}'{}, {} frames, {} duplicates, {} pauses, {} switches, {:.1}s",
            self.handle,
            self.state,
            self.mode,
            self.dimensions,
            self.preset,
            if self.performance_mode { " (performance)" } else { "" },
            self.frames_drawn,
            self.duplicates_skipped,
            self.pauses,
            self.renderer_switches,
            self.elapsed_seconds
        )
    }
}
