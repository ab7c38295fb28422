//! Main-context software renderer
//!
//! Borrows the presentation surface for the lifetime of its loop and returns
//! it on [`stop`](FrameRenderer::stop). Draws nearest-neighbour pixels with
//! brightness applied and no shader passes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::frame_loop::{FrameSink, LoopExit, run_frame_loop};
use super::shader::{ShaderPreset, Uniforms, draw_scaled};
use super::{ContinueFn, FrameRenderer, LoopControls, RendererStop, StartFailure};
use crate::device::VideoTrack;
use crate::error::{PixelcastError, Result};
use crate::surface::PresentationSurface;
use crate::types::{RenderMode, VideoFrame};
use crate::viewport::Dimensions;

struct SoftwareSink {
    surface: PresentationSurface,
    brightness: Arc<AtomicU32>,
}

impl FrameSink for SoftwareSink {
    fn draw(&mut self, frame: &Arc<VideoFrame>) -> Result<()> {
        let uniforms = Uniforms {
            brightness: f32::from_bits(self.brightness.load(Ordering::Relaxed)),
        };
        draw_scaled(frame, self.surface.buffer_mut(), ShaderPreset::None, uniforms);
        self.surface.present(RenderMode::Software, frame.media_time);
        Ok(())
    }

    fn resize(&mut self, dimensions: Dimensions) -> Result<()> {
        self.surface.resize(dimensions);
        Ok(())
    }
}

struct RunningLoop {
    task: JoinHandle<(PresentationSurface, LoopExit)>,
    stop: Arc<Notify>,
}

/// Raster renderer drawing on the main context
pub struct SoftwareRenderer {
    brightness: Arc<AtomicU32>,
    running: Option<RunningLoop>,
}

impl SoftwareRenderer {
    pub fn new(brightness: f32) -> Self {
        Self {
            brightness: Arc::new(AtomicU32::new(brightness.to_bits())),
            running: None,
        }
    }

    /// Change brightness; applies from the next drawn frame
    pub fn set_brightness(&mut self, brightness: f32) {
        self.brightness.store(brightness.to_bits(), Ordering::Relaxed);
    }
}

impl FrameRenderer for SoftwareRenderer {
    fn mode(&self) -> RenderMode {
        RenderMode::Software
    }

    async fn start(
        &mut self,
        track: &VideoTrack,
        surface: PresentationSurface,
        controls: LoopControls,
        should_continue: ContinueFn,
    ) -> std::result::Result<(), StartFailure> {
        if self.running.is_some() {
            return Err(StartFailure::returned(
                PixelcastError::render_init("software renderer already running"),
                surface,
            ));
        }

        info!("Software renderer started on surface {}", surface.id());

        let frames = track.subscribe();
        let stop = Arc::new(Notify::new());
        let stop_signal = stop.clone();
        let mut sink = SoftwareSink {
            surface,
            brightness: self.brightness.clone(),
        };

        let task = tokio::spawn(async move {
            let exit = run_frame_loop(&mut sink, frames, controls, should_continue, stop_signal).await;
            (sink.surface, exit)
        });

        self.running = Some(RunningLoop { task, stop });
        Ok(())
    }

    async fn stop(&mut self) -> RendererStop {
        let Some(running) = self.running.take() else {
            return RendererStop::default();
        };

        running.stop.notify_one();
        match running.task.await {
            Ok((surface, exit)) => {
                debug!("Software renderer stopped: {:?}", exit);
                RendererStop {
                    surface: Some(surface),
                    exit: Some(exit),
                }
            }
            Err(e) => {
                error!("Software render loop panicked: {}", e);
                RendererStop {
                    surface: None,
                    exit: Some(LoopExit::Failed(PixelcastError::surface(
                        "software render loop panicked",
                    ))),
                }
            }
        }
    }

    fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.task.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TrackFeed;
    use crate::render::stats::RenderStats;
    use crate::surface::Presenter;
    use crate::types::Resolution;
    use std::time::Duration;
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_draws_and_returns_surface() {
        let (feed, track) = TrackFeed::new(true);
        let dims = Dimensions {
            scale: 2,
            logical: Resolution::new(4, 4),
            backing: Resolution::new(4, 4),
        };
        let presenter = Presenter::new();
        let surface = PresentationSurface::new(dims, presenter.clone());
        let surface_id = surface.id();

        let (_visible_tx, visible) = watch::channel(true);
        let (_dims_tx, dimensions) = watch::channel(dims);
        let controls = LoopControls {
            visible,
            dimensions,
            stats: Arc::new(RenderStats::default()),
        };

        let mut renderer = SoftwareRenderer::new(1.0);
        renderer
            .start(&track, surface, controls, Arc::new(|| true))
            .await
            .unwrap();
        assert!(renderer.is_running());

        let mut presented = presenter.subscribe();
        feed.deliver(VideoFrame::solid(
            Duration::from_millis(16),
            Resolution::new(2, 2),
            [10, 20, 30, 255],
        ));
        let frame = presented.next().await.unwrap();
        assert_eq!(frame.surface, surface_id);
        assert_eq!(frame.mode, RenderMode::Software);
        assert_eq!(&frame.pixels[..4], &[10, 20, 30, 255]);

        let stopped = renderer.stop().await;
        assert_eq!(stopped.surface.unwrap().id(), surface_id);
        assert!(matches!(stopped.exit, Some(LoopExit::Stopped)));
        assert!(!renderer.is_running());
    }
}
