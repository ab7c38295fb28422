//! Stream lifecycle state machine
//!
//! ```text
//! Idle ──start──▶ Starting ──ok──▶ Streaming ──stop──▶ Stopping ──▶ Idle
//!                    │                  │
//!                 failure            start (restart)
//!                    ▼
//!                  Error ──start──▶ Starting
//! ```
//!
//! At most one start or stop runs at a time. It lives in a single in-flight
//! slot as a shared future; concurrent callers await that same future instead
//! of starting a second acquisition or release.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capability::{CapabilityProbe, CapabilityReport, GraphicsBackend};
use crate::config::SettingsProvider;
use crate::device::{DeviceAdapter, DeviceSelector, MediaHandle, VideoTrack};
use crate::error::{PixelcastError, Result};
use crate::events::{EVENT_CHANNEL_CAPACITY, SessionEvent, StopReason};
use crate::pipeline::{PipelineStats, RenderPipeline};
use crate::render::{ShaderPreset, SurfaceExpiry};
use crate::surface::{HeadlessHost, PresentationHost, PresentedFrame, PresentedFrames, Presenter};
use crate::types::{DeviceInfo, Handle, MediaCapabilities, RenderMode};
use crate::viewport::{ContainerMetrics, Dimensions, LayoutChrome, ResizeDebouncer};

/// Lifecycle state of a [`StreamSession`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Stopping,
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What a successful start reports
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Session id
    pub session: Handle,
    /// Id of the acquired media handle
    pub media: Handle,
    pub device: DeviceInfo,
    pub capabilities: MediaCapabilities,
    /// Renderer chosen at start
    pub render_mode: RenderMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Start,
    Stop,
}

#[derive(Debug, Clone)]
enum OpOutcome {
    Started(SessionInfo),
    Stopped,
}

type SharedOp = Shared<BoxFuture<'static, Result<OpOutcome>>>;

struct InFlight {
    id: u64,
    kind: OpKind,
    future: SharedOp,
}

/// Fields owned by the state machine
struct SessionCore {
    state: SessionState,
    session: Option<Handle>,
    media: Option<MediaHandle>,
    info: Option<SessionInfo>,
    device_watch: Option<JoinHandle<()>>,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session: None,
            media: None,
            info: None,
            device_watch: None,
        }
    }
}

struct SessionInner {
    adapter: Arc<dyn DeviceAdapter>,
    settings: Arc<dyn SettingsProvider>,
    probe: CapabilityProbe,
    pipeline: AsyncMutex<RenderPipeline>,
    presenter: Presenter,
    accelerated: Arc<AtomicBool>,
    core: Mutex<SessionCore>,
    in_flight: Mutex<Option<InFlight>>,
    next_op: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
    expiry_rx: Mutex<Option<mpsc::UnboundedReceiver<SurfaceExpiry>>>,
    expiry_watch: Mutex<Option<JoinHandle<()>>>,
    debouncer: Mutex<ResizeDebouncer>,
}

/// One capture session and its rendering surface
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct StreamSession {
    inner: Arc<SessionInner>,
}

impl StreamSession {
    /// Create a session presenting into a headless host
    pub fn new(
        adapter: Arc<dyn DeviceAdapter>,
        backend: Arc<dyn GraphicsBackend>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        Self::with_host(adapter, CapabilityProbe::new(backend), Arc::new(HeadlessHost), settings)
    }

    /// Create a session with an explicit capability probe and host
    pub fn with_host(
        adapter: Arc<dyn DeviceAdapter>,
        probe: CapabilityProbe,
        host: Arc<dyn PresentationHost>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        let snapshot = settings.snapshot();
        let mut pipeline = RenderPipeline::new(probe.clone(), host, &snapshot);
        let expiry_rx = pipeline.take_expiry_receiver();
        let presenter = pipeline.presenter().clone();
        let accelerated = pipeline.accelerated_flag();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(SessionInner {
                adapter,
                settings,
                probe,
                pipeline: AsyncMutex::new(pipeline),
                presenter,
                accelerated,
                core: Mutex::new(SessionCore::new()),
                in_flight: Mutex::new(None),
                next_op: AtomicU64::new(1),
                events,
                expiry_rx: Mutex::new(expiry_rx),
                expiry_watch: Mutex::new(None),
                debouncer: Mutex::new(ResizeDebouncer::new(snapshot.resize_debounce())),
            }),
        }
    }

    /// Open the device and begin rendering
    ///
    /// `device_id` falls back to the configured default device. A start while
    /// another start is pending returns that start's result; a start while a
    /// stop is pending waits for the stop first. Starting a streaming
    /// session restarts it.
    pub async fn start(&self, device_id: Option<String>) -> Result<SessionInfo> {
        self.inner.start(device_id).await
    }

    /// Stop rendering and release the device
    ///
    /// A no-op from `Idle`. Release failures are reported as events; the
    /// session still returns to `Idle`.
    pub async fn stop(&self) -> Result<()> {
        self.inner.stop_with_reason(StopReason::User).await
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Whether the accelerated renderer is presenting
    pub fn is_rendering_accelerated(&self) -> bool {
        self.is_streaming() && self.inner.accelerated.load(Ordering::SeqCst)
    }

    /// Details of the running session
    pub fn info(&self) -> Option<SessionInfo> {
        self.inner.core.lock().info.clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Graphics capabilities (probed once, then cached)
    pub async fn capabilities(&self) -> CapabilityReport {
        self.inner.probe.detect().await
    }

    /// Toggle performance mode and persist the choice
    pub async fn set_performance_mode(&self, enabled: bool) -> Result<RenderMode> {
        if let Err(e) = self.inner.settings.set_performance_mode(enabled) {
            warn!("Failed to persist performance mode: {}", e);
        }

        let result = {
            let mut pipeline = self.inner.pipeline.lock().await;
            let before = pipeline.mode();
            let result = pipeline.set_performance_mode(enabled).await;
            if let Ok(mode) = &result {
                if *mode != before || self.is_streaming() {
                    self.inner.emit(SessionEvent::RenderModeChanged {
                        mode: *mode,
                        preset: pipeline.effective_preset(),
                    });
                }
            }
            result
        };

        if let Err(e) = &result {
            self.inner.render_failure(e.clone()).await;
        }
        result
    }

    /// Select the active visual preset and persist it
    pub async fn set_preset(&self, preset: ShaderPreset) {
        if let Err(e) = self.inner.settings.set_active_preset(preset) {
            warn!("Failed to persist preset: {}", e);
        }
        let mut pipeline = self.inner.pipeline.lock().await;
        pipeline.set_preset(preset);
        self.inner.emit(SessionEvent::RenderModeChanged {
            mode: pipeline.mode(),
            preset: pipeline.effective_preset(),
        });
    }

    /// The user's chosen preset
    pub async fn preset(&self) -> ShaderPreset {
        self.inner.pipeline.lock().await.preset()
    }

    /// Set global brightness and persist it
    pub async fn set_brightness(&self, brightness: f32) -> Result<()> {
        self.inner.settings.set_global_brightness(brightness)?;
        self.inner.pipeline.lock().await.set_brightness(brightness);
        Ok(())
    }

    /// Pause or resume presentation without tearing anything down
    pub async fn set_visible(&self, visible: bool) {
        self.inner.pipeline.lock().await.set_visible(visible);
    }

    /// Cache layout chrome measured for this session
    pub async fn set_chrome(&self, chrome: LayoutChrome) {
        self.inner.pipeline.lock().await.set_chrome(chrome);
    }

    /// Resize after the debounce delay; later requests replace earlier ones
    pub fn request_resize(&self, container: ContainerMetrics) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.debouncer.lock().schedule(async move {
            if let Some(inner) = inner.upgrade() {
                inner.pipeline.lock().await.apply_resize(container, false);
            }
        });
    }

    /// Resize immediately, bypassing debounce and cache (layout-mode changes)
    pub async fn force_resize(&self, container: ContainerMetrics) -> Option<Dimensions> {
        self.inner.debouncer.lock().cancel();
        self.inner.pipeline.lock().await.apply_resize(container, true)
    }

    /// Latest presented picture
    pub fn screenshot(&self) -> Option<Arc<PresentedFrame>> {
        self.inner.presenter.latest()
    }

    /// Watch presented pictures
    pub fn subscribe_presented(&self) -> PresentedFrames {
        self.inner.presenter.subscribe()
    }

    /// Pipeline counters
    pub async fn stats(&self) -> PipelineStats {
        self.inner.pipeline.lock().await.stats()
    }

    /// Id of the current presentation surface
    pub async fn surface_id(&self) -> Option<Handle> {
        self.inner.pipeline.lock().await.surface_id()
    }
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        debug!("Session event: {}", event.name());
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn start(self: &Arc<Self>, device_id: Option<String>) -> Result<SessionInfo> {
        loop {
            let (pending, future) = self.join_or_spawn(OpKind::Start, || Op::Start(device_id.clone()));
            match pending {
                Some(OpKind::Stop) => {
                    // Let the stop finish, then start fresh
                    let _ = future.await;
                }
                _ => {
                    return match future.await? {
                        OpOutcome::Started(info) => Ok(info),
                        OpOutcome::Stopped => Err(PixelcastError::AlreadyInState(SessionState::Idle)),
                    };
                }
            }
        }
    }

    async fn stop_with_reason(self: &Arc<Self>, reason: StopReason) -> Result<()> {
        loop {
            let (pending, future) = self.join_or_spawn(OpKind::Stop, || Op::Stop(reason));
            match pending {
                Some(OpKind::Start) => {
                    // Stop what that start produced
                    let _ = future.await;
                }
                _ => {
                    future.await?;
                    return Ok(());
                }
            }
        }
    }

    /// Join the in-flight operation of the same kind, or start `op`
    ///
    /// Returns the kind of an already pending operation (if one was joined)
    /// and the future to await.
    fn join_or_spawn(
        self: &Arc<Self>,
        kind: OpKind,
        op: impl FnOnce() -> Op,
    ) -> (Option<OpKind>, SharedOp) {
        let mut slot = self.in_flight.lock();
        if let Some(pending) = slot.as_ref() {
            if pending.kind == kind {
                debug!("Joining in-flight {:?}", kind);
            }
            return (Some(pending.kind), pending.future.clone());
        }

        let id = self.next_op.fetch_add(1, Ordering::Relaxed);
        let inner = self.clone();
        let op = op();
        let task = tokio::spawn(async move {
            let result = match op {
                Op::Start(device_id) => inner.run_start(device_id).await.map(OpOutcome::Started),
                Op::Stop(reason) => inner.run_stop(reason).await.map(|_| OpOutcome::Stopped),
            };
            let mut slot = inner.in_flight.lock();
            if slot.as_ref().is_some_and(|p| p.id == id) {
                *slot = None;
            }
            result
        });

        let future: BoxFuture<'static, Result<OpOutcome>> = async move {
            task.await.unwrap_or_else(|e| {
                error!("Session operation panicked: {}", e);
                Err(PixelcastError::acquisition("session operation aborted"))
            })
        }
        .boxed();
        let future = future.shared();

        *slot = Some(InFlight {
            id,
            kind,
            future: future.clone(),
        });
        (None, future)
    }

    async fn run_start(self: &Arc<Self>, device_id: Option<String>) -> Result<SessionInfo> {
        let state = self.core.lock().state;
        match state {
            SessionState::Idle => {}
            SessionState::Streaming => {
                info!("Restarting streaming session");
                self.run_stop(StopReason::Restart).await?;
            }
            SessionState::Error => self.clear_failed().await,
            SessionState::Starting | SessionState::Stopping => {
                return Err(PixelcastError::AlreadyInState(state));
            }
        }

        self.core.lock().state = SessionState::Starting;
        self.ensure_expiry_watch();

        let settings = self.settings.snapshot();
        let selector = DeviceSelector::from_id(device_id.or_else(|| settings.device.default.clone()));
        info!("Starting session on device {}", selector);

        let acquired = match self.adapter.acquire(&selector).await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!("Acquisition failed: {}", e);
                self.core.lock().state = SessionState::Error;
                self.emit(SessionEvent::SessionError {
                    session: None,
                    error: e.clone(),
                });
                return Err(e);
            }
        };

        let session = Handle::new();
        let media_id = acquired.handle.id();
        let track = acquired.handle.video().clone();
        {
            let mut core = self.core.lock();
            core.session = Some(session);
            core.media = Some(acquired.handle);
        }

        let native = if acquired.capabilities.resolution.area() > 0 {
            acquired.capabilities.resolution
        } else {
            settings.native_resolution()
        };

        let started = self.pipeline.lock().await.start(&track, native).await;
        let render_mode = match started {
            Ok(mode) => mode,
            Err(e) => {
                warn!("Session {} failed to start: {}", session, e);
                self.emit(SessionEvent::SessionError {
                    session: Some(session),
                    error: e.clone(),
                });
                self.clear_failed().await;
                self.core.lock().state = SessionState::Error;
                return Err(e);
            }
        };

        let info = SessionInfo {
            session,
            media: media_id,
            device: acquired.device,
            capabilities: acquired.capabilities,
            render_mode,
        };

        {
            let mut core = self.core.lock();
            core.state = SessionState::Streaming;
            core.info = Some(info.clone());
            core.device_watch = Some(self.watch_device(session, track));
        }

        info!(
            "Session {} streaming from {} in {} mode",
            session, info.device, render_mode
        );
        self.emit(SessionEvent::SessionStarted(info.clone()));
        let preset = self.pipeline.lock().await.effective_preset();
        self.emit(SessionEvent::RenderModeChanged {
            mode: render_mode,
            preset,
        });
        Ok(info)
    }

    async fn run_stop(self: &Arc<Self>, reason: StopReason) -> Result<()> {
        let state = self.core.lock().state;
        match state {
            SessionState::Idle => {
                debug!("Stop requested while idle");
                return Ok(());
            }
            SessionState::Error => {
                self.clear_failed().await;
                self.core.lock().state = SessionState::Idle;
                return Ok(());
            }
            SessionState::Streaming => {}
            SessionState::Starting | SessionState::Stopping => {
                return Err(PixelcastError::AlreadyInState(state));
            }
        }

        let (session, watch) = {
            let mut core = self.core.lock();
            core.state = SessionState::Stopping;
            (core.session, core.device_watch.take())
        };
        info!("Stopping session ({})", reason);

        // Releasing the handle ends the track; the watcher must not mistake
        // that for an unplug
        if let Some(watch) = watch {
            watch.abort();
        }
        self.debouncer.lock().cancel();
        self.pipeline.lock().await.stop().await;

        let media = self.core.lock().media.take();
        if let Some(media) = media {
            if let Err(e) = self.adapter.release(media).await {
                warn!("Release failed during stop: {}", e);
                self.emit(SessionEvent::SessionError {
                    session,
                    error: e,
                });
            }
        }

        {
            let mut core = self.core.lock();
            core.state = SessionState::Idle;
            core.session = None;
            core.info = None;
        }

        if let Some(session) = session {
            self.emit(SessionEvent::SessionStopped { session, reason });
        }
        info!("Session stopped");
        Ok(())
    }

    /// Undo whatever a failed start left behind
    async fn clear_failed(&self) {
        let (session, media, watch) = {
            let mut core = self.core.lock();
            core.info = None;
            (core.session.take(), core.media.take(), core.device_watch.take())
        };
        if let Some(watch) = watch {
            watch.abort();
        }

        let mut pipeline = self.pipeline.lock().await;
        pipeline.health().stop_monitoring();
        pipeline.stop().await;
        drop(pipeline);

        if let Some(media) = media {
            debug!("Releasing partially acquired handle {}", media.id());
            if let Err(e) = self.adapter.release(media).await {
                warn!("Release failed during cleanup: {}", e);
            }
            if let Some(session) = session {
                self.emit(SessionEvent::SessionStopped {
                    session,
                    reason: StopReason::Cleanup,
                });
            }
        }
    }

    /// Report a surface that could not be recovered and shut the session down
    async fn render_failure(self: &Arc<Self>, error: PixelcastError) {
        let session = self.core.lock().session;
        error!("Render failure, stopping session: {}", error);
        self.emit(SessionEvent::SessionError { session, error });
        if let Err(e) = self.stop_with_reason(StopReason::RenderFailure).await {
            warn!("Stop after render failure failed: {}", e);
        }
    }

    fn watch_device(self: &Arc<Self>, session: Handle, track: VideoTrack) -> JoinHandle<()> {
        let inner: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            track.ended().await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            if inner.core.lock().session != Some(session) {
                return;
            }

            warn!("Capture device disconnected from session {}", session);
            inner.emit(SessionEvent::SessionError {
                session: Some(session),
                error: PixelcastError::DeviceDisconnected,
            });
            if let Err(e) = inner.stop_with_reason(StopReason::DeviceLost).await {
                warn!("Stop after device loss failed: {}", e);
            }
        })
    }

    fn ensure_expiry_watch(self: &Arc<Self>) {
        let mut watch = self.expiry_watch.lock();
        if watch.is_some() {
            return;
        }
        let Some(mut rx) = self.expiry_rx.lock().take() else {
            return;
        };

        let inner: Weak<Self> = Arc::downgrade(self);
        *watch = Some(tokio::spawn(async move {
            while let Some(expiry) = rx.recv().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.surface_expired(expiry).await;
            }
        }));
    }

    async fn surface_expired(self: &Arc<Self>, expiry: SurfaceExpiry) {
        let result = {
            let mut pipeline = self.pipeline.lock().await;
            if pipeline.surface_id() != Some(expiry.surface) {
                debug!("Expiry for replaced surface {} ignored", expiry.surface);
                return;
            }
            self.emit(SessionEvent::SurfaceExpired {
                surface: expiry.surface,
                reason: expiry.reason.clone(),
            });
            let result = pipeline.handle_surface_expired(&expiry).await;
            if let Ok(mode) = &result {
                self.emit(SessionEvent::RenderModeChanged {
                    mode: *mode,
                    preset: pipeline.effective_preset(),
                });
            }
            result
        };

        if let Err(e) = result {
            self.render_failure(e).await;
        }
    }
}

enum Op {
    Start(Option<String>),
    Stop(StopReason),
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(watch) = self.expiry_watch.get_mut().take() {
            watch.abort();
        }
        if let Some(watch) = self.core.get_mut().device_watch.take() {
            watch.abort();
        }
    }
}
