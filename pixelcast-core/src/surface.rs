//! Presentation surfaces
//!
//! A [`PresentationSurface`] is the drawable target frames are rendered into.
//! The pipeline keeps it in a [`SurfaceSlot`]:
//!
//! ```text
//! Owned(surface) ──lend──▶ Lent { id } ──return──▶ Owned(surface)
//!       │
//!       └──transfer──▶ Transferred { id }   (one way; replace to recover)
//! ```
//!
//! Once transferred to the accelerated worker, the surface value lives on the
//! worker thread and the slot only remembers its id, so main-context drawing
//! through it cannot be expressed.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

use crate::error::Result;
use crate::types::{Handle, RenderMode, Resolution};
use crate::viewport::Dimensions;

/// RGBA8 pixel grid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    resolution: Resolution,
    pixels: Vec<[u8; 4]>,
}

impl FrameBuffer {
    /// Opaque black buffer
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            pixels: vec![[0, 0, 0, 0xff]; resolution.area()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn pixels(&self) -> &[[u8; 4]] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [[u8; 4]] {
        &mut self.pixels
    }

    /// Pixel at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.resolution.width || y >= self.resolution.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.resolution.width as usize + x as usize)
            .copied()
    }

    /// Reallocate to a new size, clearing contents
    pub fn resize(&mut self, resolution: Resolution) {
        if resolution != self.resolution {
            *self = Self::new(resolution);
        }
    }

    /// Fill with opaque black
    pub fn clear(&mut self) {
        self.pixels.fill([0, 0, 0, 0xff]);
    }

    /// Copy the pixels out as packed RGBA bytes
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(bytemuck::cast_slice(&self.pixels))
    }
}

/// A picture that reached the screen
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    /// Surface the picture was drawn on
    pub surface: Handle,
    /// Renderer that drew it
    pub mode: RenderMode,
    /// Media time of the source frame
    pub media_time: Duration,
    /// Backing-store size
    pub resolution: Resolution,
    /// RGBA8 pixels
    pub pixels: Bytes,
}

/// Publishes presented pictures to screenshot/recording collaborators
#[derive(Debug, Clone)]
pub struct Presenter {
    tx: Arc<watch::Sender<Option<Arc<PresentedFrame>>>>,
}

impl Presenter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Publish a picture
    pub fn present(&self, frame: PresentedFrame) {
        self.tx.send_replace(Some(Arc::new(frame)));
    }

    /// Drop the last picture
    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Most recent picture
    pub fn latest(&self) -> Option<Arc<PresentedFrame>> {
        self.tx.borrow().clone()
    }

    /// Watch presented pictures
    pub fn subscribe(&self) -> PresentedFrames {
        PresentedFrames {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Presenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription to presented pictures
///
/// Only shared snapshots are handed out. The channel is never borrowed past
/// a single call, so a subscriber cannot hold up a renderer publishing the
/// next picture.
#[derive(Debug, Clone)]
pub struct PresentedFrames {
    rx: watch::Receiver<Option<Arc<PresentedFrame>>>,
}

impl PresentedFrames {
    /// Most recent picture
    pub fn latest(&self) -> Option<Arc<PresentedFrame>> {
        self.rx.borrow().clone()
    }

    /// Wait for the next picture published after the last one seen
    ///
    /// Returns `None` once the presenter is gone.
    pub async fn next(&mut self) -> Option<Arc<PresentedFrame>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }

    /// Wait for a picture matching `pred`, starting with the current one
    pub async fn wait_for<F>(&mut self, mut pred: F) -> Option<Arc<PresentedFrame>>
    where
        F: FnMut(&PresentedFrame) -> bool,
    {
        let matched = self
            .rx
            .wait_for(|frame| frame.as_deref().is_some_and(&mut pred))
            .await
            .ok()?
            .clone();
        matched
    }
}

/// Drawable target owned by the render pipeline
#[derive(Debug)]
pub struct PresentationSurface {
    id: Handle,
    dimensions: Dimensions,
    buffer: FrameBuffer,
    presenter: Presenter,
}

impl PresentationSurface {
    pub fn new(dimensions: Dimensions, presenter: Presenter) -> Self {
        let id = Handle::new();
        debug!("Created presentation surface {} at {}", id, dimensions);
        Self {
            id,
            dimensions,
            buffer: FrameBuffer::new(dimensions.backing),
            presenter,
        }
    }

    pub fn id(&self) -> Handle {
        self.id
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut FrameBuffer {
        &mut self.buffer
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    /// Resize the backing store
    pub fn resize(&mut self, dimensions: Dimensions) {
        if dimensions != self.dimensions {
            self.dimensions = dimensions;
            self.buffer.resize(dimensions.backing);
        }
    }

    /// Clear to black and withdraw the last picture
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.presenter.clear();
    }

    /// Publish the current buffer contents
    pub fn present(&self, mode: RenderMode, media_time: Duration) {
        self.presenter.present(PresentedFrame {
            surface: self.id,
            mode,
            media_time,
            resolution: self.buffer.resolution(),
            pixels: self.buffer.to_bytes(),
        });
    }
}

/// Who controls the presentation surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceOwnership {
    /// The pipeline (or a renderer borrowing it) can draw on the main context
    Owned,
    /// Control was handed to the accelerated worker
    Transferred,
}

/// Pipeline-side holder of the surface
#[derive(Debug)]
pub enum SurfaceSlot {
    /// Surface available to the pipeline
    Owned(PresentationSurface),
    /// Borrowed by the software renderer until it stops
    Lent { id: Handle },
    /// Handed to the accelerated worker; can only be replaced
    Transferred { id: Handle },
}

impl SurfaceSlot {
    pub fn id(&self) -> Handle {
        match self {
            Self::Owned(surface) => surface.id(),
            Self::Lent { id } | Self::Transferred { id } => *id,
        }
    }

    pub fn ownership(&self) -> SurfaceOwnership {
        match self {
            Self::Owned(_) | Self::Lent { .. } => SurfaceOwnership::Owned,
            Self::Transferred { .. } => SurfaceOwnership::Transferred,
        }
    }

    pub fn as_owned_mut(&mut self) -> Option<&mut PresentationSurface> {
        match self {
            Self::Owned(surface) => Some(surface),
            _ => None,
        }
    }

    /// Take the surface out for the software renderer
    pub fn lend(&mut self) -> Option<PresentationSurface> {
        self.take_as(|id| Self::Lent { id })
    }

    /// Give a lent surface back
    pub fn restore(&mut self, surface: PresentationSurface) {
        *self = Self::Owned(surface);
    }

    /// Hand the surface to the accelerated worker, irreversibly
    pub fn transfer(&mut self) -> Option<PresentationSurface> {
        self.take_as(|id| Self::Transferred { id })
    }

    fn take_as(&mut self, next: impl FnOnce(Handle) -> Self) -> Option<PresentationSurface> {
        match self {
            Self::Owned(surface) => {
                let id = surface.id();
                match std::mem::replace(self, next(id)) {
                    Self::Owned(surface) => Some(surface),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Presentation host the surface is attached to
///
/// Replacing a transferred surface detaches the old one and attaches the
/// fresh one.
pub trait PresentationHost: Send + Sync {
    /// Attach a freshly constructed surface
    fn attach(&self, surface: Handle, dimensions: Dimensions) -> Result<()>;

    /// Remove a surface from the host
    fn detach(&self, surface: Handle);
}

/// Host without a window; used by the CLI and tests
#[derive(Debug, Default)]
pub struct HeadlessHost;

impl PresentationHost for HeadlessHost {
    fn attach(&self, surface: Handle, dimensions: Dimensions) -> Result<()> {
        debug!("Headless host attached {} at {}", surface, dimensions);
        Ok(())
    }

    fn detach(&self, surface: Handle) {
        debug!("Headless host detached {}", surface);
    }
}
