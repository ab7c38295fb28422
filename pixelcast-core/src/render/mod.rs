//! Frame renderers
//!
//! Two implementations of [`FrameRenderer`]:
//! - [`SoftwareRenderer`] draws on the main context into a borrowed surface
//!   and hands it back on stop
//! - [`AcceleratedRenderer`] transfers the surface to a dedicated worker
//!   thread that runs shader presets and presents double-buffered
//!
//! Both are driven by the video track's frame notification through the
//! shared render loop.

pub mod accelerated;
pub(crate) mod frame_loop;
pub mod shader;
pub mod software;
pub mod stats;

pub use accelerated::{AcceleratedRenderer, SurfaceExpiry};
pub use frame_loop::LoopExit;
pub use shader::{ShaderPreset, Uniforms};
pub use software::SoftwareRenderer;
pub use stats::RenderStats;

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use crate::device::VideoTrack;
use crate::error::PixelcastError;
use crate::surface::PresentationSurface;
use crate::types::RenderMode;
use crate::viewport::Dimensions;

/// Callback consulted after every wake-up; `false` ends the loop
pub type ContinueFn = Arc<dyn Fn() -> bool + Send + Sync>;

/// Live inputs the pipeline steers while a loop runs
#[derive(Debug, Clone)]
pub struct LoopControls {
    /// Presentation visibility; hidden parks the loop
    pub visible: watch::Receiver<bool>,
    /// Current surface dimensions
    pub dimensions: watch::Receiver<Dimensions>,
    /// Shared counters
    pub stats: Arc<RenderStats>,
}

/// A renderer that could not start
#[derive(Debug)]
pub struct StartFailure {
    pub error: PixelcastError,
    /// The surface, when it was not transferred before the failure
    pub surface: Option<PresentationSurface>,
}

impl StartFailure {
    pub fn returned(error: PixelcastError, surface: PresentationSurface) -> Self {
        Self {
            error,
            surface: Some(surface),
        }
    }

    pub fn lost(error: PixelcastError) -> Self {
        Self {
            error,
            surface: None,
        }
    }
}

/// What a renderer gives back when stopped
#[derive(Debug, Default)]
pub struct RendererStop {
    /// The borrowed surface, if the renderer did not transfer it
    pub surface: Option<PresentationSurface>,
    /// How the loop ended, if one was running
    pub exit: Option<LoopExit>,
}

/// Draws video frames onto a presentation surface
pub trait FrameRenderer {
    /// Which mode this renderer implements
    fn mode(&self) -> RenderMode;

    /// Take the surface and begin the frame-driven loop
    fn start(
        &mut self,
        track: &VideoTrack,
        surface: PresentationSurface,
        controls: LoopControls,
        should_continue: ContinueFn,
    ) -> impl Future<Output = Result<(), StartFailure>> + Send;

    /// End the loop; no draw happens after this resolves
    fn stop(&mut self) -> impl Future<Output = RendererStop> + Send;

    /// Whether a loop is currently running
    fn is_running(&self) -> bool;
}

/// The renderer currently attached to the pipeline
pub enum ActiveRenderer {
    Software(SoftwareRenderer),
    Accelerated(AcceleratedRenderer),
}

impl ActiveRenderer {
    pub fn mode(&self) -> RenderMode {
        match self {
            Self::Software(r) => r.mode(),
            Self::Accelerated(r) => r.mode(),
        }
    }

    pub async fn stop(&mut self) -> RendererStop {
        match self {
            Self::Software(r) => r.stop().await,
            Self::Accelerated(r) => r.stop().await,
        }
    }

    pub fn is_running(&self) -> bool {
        match self {
            Self::Software(r) => r.is_running(),
            Self::Accelerated(r) => r.is_running(),
        }
    }

    /// Push a preset to the renderer; only the accelerated one uses it
    pub fn set_preset(&mut self, preset: ShaderPreset) {
        if let Self::Accelerated(r) = self {
            r.set_preset(preset);
        }
    }

    pub fn set_brightness(&mut self, brightness: f32) {
        match self {
            Self::Software(r) => r.set_brightness(brightness),
            Self::Accelerated(r) => r.set_brightness(brightness),
        }
    }
}
