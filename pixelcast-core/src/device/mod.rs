//! Capture device boundary
//!
//! The core never talks to hardware directly. A [`DeviceAdapter`] opens a
//! [`MediaHandle`] whose [`VideoTrack`] exposes:
//! - a precise "next frame delivered" notification (when the source has one)
//! - a coarser "playback progressed" notification
//! - an end-of-track signal used for device-loss detection
//!
//! The producing side of a track is a [`TrackFeed`].

pub mod synthetic;

pub use synthetic::{DeviceCall, SyntheticBehavior, SyntheticConfig, SyntheticDevice};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;

use crate::error::Result;
use crate::types::{DeviceInfo, Handle, MediaCapabilities, VideoFrame};

/// Which device to open
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// Whatever the adapter considers the default capture device
    #[default]
    Default,
    /// A specific device id
    Id(String),
}

impl DeviceSelector {
    /// Build a selector from an optional device id
    pub fn from_id(id: Option<impl Into<String>>) -> Self {
        match id {
            Some(id) => Self::Id(id.into()),
            None => Self::Default,
        }
    }
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Id(id) => write!(f, "{}", id),
        }
    }
}

/// Result of a successful acquisition
#[derive(Debug)]
pub struct AcquiredMedia {
    pub handle: MediaHandle,
    pub device: DeviceInfo,
    pub capabilities: MediaCapabilities,
}

/// Source of live media handles
///
/// Implementations must report end-of-track through the handle's
/// [`VideoTrack`] when the device goes away.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Open the selected device
    async fn acquire(&self, selector: &DeviceSelector) -> Result<AcquiredMedia>;

    /// Close a handle previously returned by `acquire`
    async fn release(&self, handle: MediaHandle) -> Result<()>;
}

/// Exclusively owned reference to a live audio/video source
///
/// Not `Clone`: releasing consumes the handle, so it cannot be released twice.
#[derive(Debug)]
pub struct MediaHandle {
    id: Handle,
    video: VideoTrack,
}

impl MediaHandle {
    pub fn new(video: VideoTrack) -> Self {
        Self {
            id: Handle::new(),
            video,
        }
    }

    /// Unique id of this handle
    pub fn id(&self) -> Handle {
        self.id
    }

    /// Borrow the video component
    pub fn video(&self) -> &VideoTrack {
        &self.video
    }
}

/// Producing side of a [`VideoTrack`]
pub struct TrackFeed {
    frame_tx: watch::Sender<Option<Arc<VideoFrame>>>,
    progress_tx: watch::Sender<Duration>,
    ended_tx: watch::Sender<bool>,
}

impl TrackFeed {
    /// Create a feed and the track it drives
    ///
    /// `precise_frames` controls whether consumers may register for the
    /// per-frame notification or must fall back to playback progress.
    pub fn new(precise_frames: bool) -> (Self, VideoTrack) {
        let (frame_tx, frame_rx) = watch::channel(None);
        let (progress_tx, progress_rx) = watch::channel(Duration::ZERO);
        let (ended_tx, ended_rx) = watch::channel(false);

        let track = VideoTrack {
            id: Handle::new(),
            frames: frame_rx,
            progress: progress_rx,
            ended: ended_rx,
            precise_frames,
        };

        (
            Self {
                frame_tx,
                progress_tx,
                ended_tx,
            },
            track,
        )
    }

    /// Publish a new frame
    pub fn deliver(&self, frame: VideoFrame) {
        let media_time = frame.media_time;
        self.frame_tx.send_replace(Some(Arc::new(frame)));
        self.progress_tx.send_replace(media_time);
    }

    /// Notify consumers again without a new frame
    ///
    /// Models a frame callback firing more often than frames arrive.
    pub fn wake(&self) {
        self.frame_tx.send_modify(|_| {});
    }

    /// Signal end-of-track
    pub fn end(&self) {
        trace!("Track feed ended");
        self.ended_tx.send_replace(true);
    }

    /// Whether end-of-track was signalled
    pub fn is_ended(&self) -> bool {
        *self.ended_tx.borrow()
    }
}

/// Consuming side of a live video stream
#[derive(Debug, Clone)]
pub struct VideoTrack {
    id: Handle,
    frames: watch::Receiver<Option<Arc<VideoFrame>>>,
    progress: watch::Receiver<Duration>,
    ended: watch::Receiver<bool>,
    precise_frames: bool,
}

impl VideoTrack {
    /// Unique id of this track
    pub fn id(&self) -> Handle {
        self.id
    }

    /// Whether the per-frame notification is available
    pub fn supports_frame_callback(&self) -> bool {
        self.precise_frames
    }

    /// Most recently delivered frame
    pub fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.frames.borrow().clone()
    }

    /// Whether end-of-track was signalled (or the producer is gone)
    pub fn is_ended(&self) -> bool {
        *self.ended.borrow() || self.ended.has_changed().is_err()
    }

    /// Resolve once the track ends
    pub async fn ended(&self) {
        let mut ended = self.ended.clone();
        // A dropped producer counts as ended too
        let _ = ended.wait_for(|e| *e).await;
    }

    /// Register for frame-delivery wake-ups
    ///
    /// Uses the precise frame notification when the source offers it,
    /// otherwise playback progress.
    pub fn subscribe(&self) -> FrameSubscription {
        if self.precise_frames {
            FrameSubscription {
                signal: WakeSignal::Frame(self.frames.clone()),
                frames: self.frames.clone(),
            }
        } else {
            FrameSubscription {
                signal: WakeSignal::Progress(self.progress.clone()),
                frames: self.frames.clone(),
            }
        }
    }
}

#[derive(Debug)]
enum WakeSignal {
    Frame(watch::Receiver<Option<Arc<VideoFrame>>>),
    Progress(watch::Receiver<Duration>),
}

/// Wake-up registration on a [`VideoTrack`]
#[derive(Debug)]
pub struct FrameSubscription {
    signal: WakeSignal,
    frames: watch::Receiver<Option<Arc<VideoFrame>>>,
}

impl FrameSubscription {
    /// Whether this subscription uses the precise per-frame signal
    pub fn is_precise(&self) -> bool {
        matches!(self.signal, WakeSignal::Frame(_))
    }

    /// Wait for the next wake-up and return the current frame
    ///
    /// A wake-up does not guarantee a new frame; callers compare media
    /// times. Returns `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<Arc<VideoFrame>> {
        loop {
            match &mut self.signal {
                WakeSignal::Frame(rx) => {
                    rx.changed().await.ok()?;
                    let frame = rx.borrow_and_update().clone();
                    if frame.is_some() {
                        return frame;
                    }
                }
                WakeSignal::Progress(rx) => {
                    rx.changed().await.ok()?;
                    rx.borrow_and_update();
                    let frame = self.frames.borrow().clone();
                    if frame.is_some() {
                        return frame;
                    }
                }
            }
        }
    }
}
