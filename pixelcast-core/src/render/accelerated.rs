//! Off-thread accelerated renderer
//!
//! On start the drawing context is created first, then the presentation
//! surface is moved into a dedicated `pixelcast-render` thread. A context
//! that cannot be created leaves the surface with the caller. From the
//! transfer on, the main context only talks to the worker through messages;
//! the surface can never come back. Frames are
//! drawn into a back buffer and swapped in, so a picture is never shown half
//! drawn.
//!
//! If the worker dies for any reason other than a requested shutdown, a
//! [`SurfaceExpiry`] is sent so the pipeline can rebuild the surface.

use std::sync::Arc;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::frame_loop::{FrameSink, LoopExit, run_frame_loop};
use super::shader::{GpuContext, ShaderPreset, Uniforms};
use super::{ContinueFn, FrameRenderer, LoopControls, RendererStop, StartFailure};
use crate::capability::{GraphicsBackend, RenderTier};
use crate::device::VideoTrack;
use crate::error::{PixelcastError, Result};
use crate::surface::{FrameBuffer, PresentationSurface};
use crate::types::{Handle, RenderMode, VideoFrame};
use crate::viewport::Dimensions;

const WORKER_THREAD_NAME: &str = "pixelcast-render";

/// A transferred surface stopped working
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceExpiry {
    /// Id of the dead surface
    pub surface: Handle,
    pub reason: String,
}

enum WorkerMessage {
    Frame(Arc<VideoFrame>),
    Resize(Dimensions),
    SetPreset(ShaderPreset),
    SetBrightness(f32),
    Shutdown,
}

/// Sends [`SurfaceExpiry`] when dropped while still armed
struct ExpiryGuard {
    surface: Handle,
    reason: Option<String>,
    tx: mpsc::UnboundedSender<SurfaceExpiry>,
}

impl ExpiryGuard {
    fn disarm(&mut self) {
        self.reason = None;
    }
}

impl Drop for ExpiryGuard {
    fn drop(&mut self) {
        if let Some(reason) = self.reason.take() {
            warn!("Surface {} expired: {}", self.surface, reason);
            let _ = self.tx.send(SurfaceExpiry {
                surface: self.surface,
                reason,
            });
        }
    }
}

struct WorkerState {
    surface: PresentationSurface,
    back: FrameBuffer,
    context: Box<dyn GpuContext>,
    preset: ShaderPreset,
    uniforms: Uniforms,
    last_frame: Option<Arc<VideoFrame>>,
}

impl WorkerState {
    fn resize(&mut self, dimensions: Dimensions) {
        self.surface.resize(dimensions);
        self.back.resize(dimensions.backing);
    }

    fn render(&mut self, frame: &Arc<VideoFrame>) -> Result<()> {
        self.back.resize(self.surface.dimensions().backing);
        self.context
            .render(frame, self.preset, self.uniforms, &mut self.back)?;
        std::mem::swap(&mut self.back, self.surface.buffer_mut());
        self.surface.present(RenderMode::Accelerated, frame.media_time);
        Ok(())
    }
}

fn worker_main(
    mut context: Box<dyn GpuContext>,
    surface: PresentationSurface,
    preset: ShaderPreset,
    brightness: f32,
    rx: std_mpsc::Receiver<WorkerMessage>,
    ready: oneshot::Sender<Result<()>>,
    expiry_tx: mpsc::UnboundedSender<SurfaceExpiry>,
) {
    if let Err(e) = context.bind(&surface) {
        let _ = ready.send(Err(e));
        return;
    }
    let tier = context.tier();

    let mut guard = ExpiryGuard {
        surface: surface.id(),
        reason: Some("render worker exited unexpectedly".to_string()),
        tx: expiry_tx,
    };

    let back = FrameBuffer::new(surface.dimensions().backing);
    let mut state = WorkerState {
        surface,
        back,
        context,
        preset,
        uniforms: Uniforms { brightness },
        last_frame: None,
    };

    if ready.send(Ok(())).is_err() {
        // Starter gave up waiting
        guard.disarm();
        return;
    }
    debug!("Render worker ready on {} ({})", state.surface.id(), tier);

    while let Ok(first) = rx.recv() {
        // Coalesce the backlog: settings apply in order, only the newest
        // frame gets drawn
        let mut pending = None;
        let mut repaint = false;
        let mut shutdown = false;
        let mut next = Some(first);

        while let Some(message) = next.take() {
            match message {
                WorkerMessage::Frame(frame) => {
                    if pending.is_some() {
                        trace!("Render worker dropped a stale frame");
                    }
                    pending = Some(frame);
                }
                WorkerMessage::Resize(dimensions) => {
                    state.resize(dimensions);
                    repaint = true;
                }
                WorkerMessage::SetPreset(preset) => {
                    state.preset = preset;
                    repaint = true;
                }
                WorkerMessage::SetBrightness(brightness) => {
                    state.uniforms.brightness = brightness;
                    repaint = true;
                }
                WorkerMessage::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
            next = rx.try_recv().ok();
        }

        if shutdown {
            guard.disarm();
            debug!("Render worker shutting down");
            return;
        }

        let frame = pending.or_else(|| repaint.then(|| state.last_frame.clone()).flatten());
        if let Some(frame) = frame {
            if let Err(e) = state.render(&frame) {
                error!("Render worker failed: {}", e);
                guard.reason = Some(e.to_string());
                return;
            }
            state.last_frame = Some(frame);
        }
    }

    // Every sender is gone without a shutdown request; the guard reports it
}

/// Loop-side end of the worker channel
struct WorkerSink {
    tx: std_mpsc::Sender<WorkerMessage>,
}

impl WorkerSink {
    fn post(&self, message: WorkerMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| PixelcastError::surface("render worker is gone"))
    }
}

impl FrameSink for WorkerSink {
    fn draw(&mut self, frame: &Arc<VideoFrame>) -> Result<()> {
        self.post(WorkerMessage::Frame(frame.clone()))
    }

    fn resize(&mut self, dimensions: Dimensions) -> Result<()> {
        self.post(WorkerMessage::Resize(dimensions))
    }
}

struct Worker {
    surface: Handle,
    tx: std_mpsc::Sender<WorkerMessage>,
    thread: Option<thread::JoinHandle<()>>,
    loop_task: JoinHandle<LoopExit>,
    stop: Arc<Notify>,
}

/// Renderer that owns the surface from a worker thread
pub struct AcceleratedRenderer {
    backend: Arc<dyn GraphicsBackend>,
    tier: RenderTier,
    max_texture_dimension: u32,
    preset: ShaderPreset,
    brightness: f32,
    expiry_tx: mpsc::UnboundedSender<SurfaceExpiry>,
    worker: Option<Worker>,
}

impl AcceleratedRenderer {
    pub fn new(
        backend: Arc<dyn GraphicsBackend>,
        tier: RenderTier,
        max_texture_dimension: u32,
        preset: ShaderPreset,
        brightness: f32,
        expiry_tx: mpsc::UnboundedSender<SurfaceExpiry>,
    ) -> Self {
        Self {
            backend,
            tier,
            max_texture_dimension,
            preset,
            brightness,
            expiry_tx,
            worker: None,
        }
    }

    pub fn tier(&self) -> RenderTier {
        self.tier
    }

    pub fn preset(&self) -> ShaderPreset {
        self.preset
    }

    /// Id of the surface held by the worker
    pub fn surface_id(&self) -> Option<Handle> {
        self.worker.as_ref().map(|w| w.surface)
    }

    pub fn set_preset(&mut self, preset: ShaderPreset) {
        self.preset = preset;
        self.post(WorkerMessage::SetPreset(preset));
    }

    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness = brightness;
        self.post(WorkerMessage::SetBrightness(brightness));
    }

    fn post(&self, message: WorkerMessage) {
        if let Some(worker) = &self.worker {
            if worker.tx.send(message).is_err() {
                debug!("Render worker gone; setting kept for next start");
            }
        }
    }

    fn fits(&self, dimensions: &Dimensions) -> bool {
        dimensions.backing.width <= self.max_texture_dimension
            && dimensions.backing.height <= self.max_texture_dimension
    }
}

impl FrameRenderer for AcceleratedRenderer {
    fn mode(&self) -> RenderMode {
        RenderMode::Accelerated
    }

    async fn start(
        &mut self,
        track: &VideoTrack,
        surface: PresentationSurface,
        controls: LoopControls,
        should_continue: ContinueFn,
    ) -> std::result::Result<(), StartFailure> {
        if self.worker.is_some() {
            return Err(StartFailure::returned(
                PixelcastError::render_init("accelerated renderer already running"),
                surface,
            ));
        }

        let dimensions = surface.dimensions();
        if !self.fits(&dimensions) {
            return Err(StartFailure::returned(
                PixelcastError::render_init(format!(
                    "backing store {} exceeds maximum texture size {}",
                    dimensions.backing, self.max_texture_dimension
                )),
                surface,
            ));
        }

        let tier = self.tier;
        let context = match self.backend.create_context(tier) {
            Ok(context) => context,
            Err(e) => {
                return Err(StartFailure::returned(
                    PixelcastError::render_init(format!("failed to create {} context: {}", tier, e)),
                    surface,
                ));
            }
        };

        let surface_id = surface.id();
        let (tx, rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let preset = self.preset;
        let brightness = self.brightness;
        let expiry_tx = self.expiry_tx.clone();

        // The surface moves into the thread here and is never returned
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || worker_main(context, surface, preset, brightness, rx, ready_tx, expiry_tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                return Err(StartFailure::lost(PixelcastError::render_init(format!(
                    "failed to spawn render worker: {}",
                    e
                ))));
            }
        };

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                return Err(StartFailure::lost(e));
            }
            Err(_) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                return Err(StartFailure::lost(PixelcastError::render_init(
                    "render worker exited during initialization",
                )));
            }
        }

        info!("Accelerated renderer started on surface {} ({})", surface_id, tier);

        let frames = track.subscribe();
        let stop = Arc::new(Notify::new());
        let stop_signal = stop.clone();
        let mut sink = WorkerSink { tx: tx.clone() };
        let loop_task = tokio::spawn(async move {
            run_frame_loop(&mut sink, frames, controls, should_continue, stop_signal).await
        });

        self.worker = Some(Worker {
            surface: surface_id,
            tx,
            thread: Some(thread),
            loop_task,
            stop,
        });
        Ok(())
    }

    async fn stop(&mut self) -> RendererStop {
        let Some(mut worker) = self.worker.take() else {
            return RendererStop::default();
        };

        worker.stop.notify_one();
        let exit = match (&mut worker.loop_task).await {
            Ok(exit) => exit,
            Err(e) => {
                error!("Accelerated render loop panicked: {}", e);
                LoopExit::Failed(PixelcastError::surface("render loop panicked"))
            }
        };

        let _ = worker.tx.send(WorkerMessage::Shutdown);
        if let Some(thread) = worker.thread.take() {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                _ => warn!("Render worker for {} did not exit cleanly", worker.surface),
            }
        }

        debug!("Accelerated renderer stopped: {:?}", exit);
        RendererStop {
            surface: None,
            exit: Some(exit),
        }
    }

    fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.loop_task.is_finished())
    }
}
