//! Frame-driven render loop shared by both renderers
//!
//! The loop wakes on the video track's own frame notification rather than a
//! timer. A wake-up whose frame has the same media time as the last drawn one
//! is a duplicate: nothing is drawn, but the loop re-arms unless
//! `should_continue` says otherwise. Hiding the presentation parks the loop
//! in place; showing it again resumes the same loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::{ContinueFn, LoopControls};
use crate::device::FrameSubscription;
use crate::error::{PixelcastError, Result};
use crate::types::VideoFrame;
use crate::viewport::Dimensions;

/// Why a render loop ended
#[derive(Debug, Clone)]
pub enum LoopExit {
    /// Asked to stop, or `should_continue` returned false
    Stopped,
    /// The video track went away
    SourceEnded,
    /// Drawing failed
    Failed(PixelcastError),
}

/// Drawing target of a render loop
pub(crate) trait FrameSink: Send {
    /// Draw one new frame
    fn draw(&mut self, frame: &Arc<VideoFrame>) -> Result<()>;

    /// Apply new surface dimensions
    fn resize(&mut self, dimensions: Dimensions) -> Result<()>;
}

pub(crate) async fn run_frame_loop<S: FrameSink>(
    sink: &mut S,
    mut frames: FrameSubscription,
    mut controls: LoopControls,
    should_continue: ContinueFn,
    stop: Arc<Notify>,
) -> LoopExit {
    let mut last_drawn: Option<Duration> = None;
    let mut last_frame: Option<Arc<VideoFrame>> = None;
    controls.dimensions.borrow_and_update();

    loop {
        let visible = *controls.visible.borrow_and_update();
        if !visible {
            controls.stats.record_pause();
            debug!("Render loop paused");
            tokio::select! {
                biased;
                _ = stop.notified() => return LoopExit::Stopped,
                shown = controls.visible.wait_for(|v| *v) => {
                    if shown.is_err() {
                        return LoopExit::Stopped;
                    }
                }
            }
            debug!("Render loop resumed");
            continue;
        }

        tokio::select! {
            biased;
            _ = stop.notified() => return LoopExit::Stopped,
            changed = controls.visible.changed() => {
                if changed.is_err() {
                    return LoopExit::Stopped;
                }
            }
            changed = controls.dimensions.changed() => {
                if changed.is_err() {
                    return LoopExit::Stopped;
                }
                let dimensions = *controls.dimensions.borrow_and_update();
                if let Err(e) = sink.resize(dimensions) {
                    return LoopExit::Failed(e);
                }
                // Repaint the current picture at the new size
                if let Some(frame) = &last_frame {
                    if let Err(e) = sink.draw(frame) {
                        return LoopExit::Failed(e);
                    }
                }
            }
            frame = frames.next() => {
                let Some(frame) = frame else {
                    debug!("Render loop source ended");
                    return LoopExit::SourceEnded;
                };

                if last_drawn == Some(frame.media_time) {
                    trace!("Duplicate wake-up at {:?}", frame.media_time);
                    controls.stats.record_duplicate();
                } else {
                    if let Err(e) = sink.draw(&frame) {
                        return LoopExit::Failed(e);
                    }
                    last_drawn = Some(frame.media_time);
                    last_frame = Some(frame);
                    controls.stats.record_drawn();
                }

                if !should_continue() {
                    return LoopExit::Stopped;
                }
            }
        }
    }
}
