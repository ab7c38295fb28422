//! Pixel-perfect viewport scaling
//!
//! Computes the largest integer scale of the native resolution that fits the
//! container, and the backing-store size for the display pixel density.
//!
//! Layout chrome around the surface (padding, border, sibling elements) is
//! measured once per session and cached. Normal resizes are debounced;
//! layout-mode transitions (entering or leaving full screen) use
//! [`ViewportScaler::force_recalculate`] to resize immediately.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::types::Resolution;

/// Largest surface edge, logical or backing, in pixels
pub const MAX_SURFACE_DIMENSION: u32 = 16384;

/// Edge sizes in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Insets {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Insets {
    /// Same size on every edge
    pub fn uniform(v: f64) -> Self {
        Self {
            top: v,
            right: v,
            bottom: v,
            left: v,
        }
    }

    pub fn horizontal(&self) -> f64 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f64 {
        self.top + self.bottom
    }
}

/// Space around the surface that does not change during a session
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutChrome {
    pub padding: Insets,
    pub border: Insets,
    /// Width taken by sibling elements laid out beside the surface
    pub sibling_width: f64,
    /// Height taken by sibling elements stacked with the surface
    pub sibling_height: f64,
}

impl LayoutChrome {
    fn horizontal(&self) -> f64 {
        self.padding.horizontal() + self.border.horizontal() + self.sibling_width
    }

    fn vertical(&self) -> f64 {
        self.padding.vertical() + self.border.vertical() + self.sibling_height
    }
}

/// Measured container box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetrics {
    /// Container width in CSS pixels
    pub width: f64,
    /// Container height in CSS pixels
    pub height: f64,
    /// Device pixels per CSS pixel
    pub pixel_density: f64,
}

impl ContainerMetrics {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            pixel_density: 1.0,
        }
    }

    pub fn with_pixel_density(mut self, density: f64) -> Self {
        self.pixel_density = density;
        self
    }
}

/// Computed surface size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Integer scale factor, always >= 1
    pub scale: u32,
    /// Display size in CSS pixels
    pub logical: Resolution,
    /// Backing-store size in device pixels
    pub backing: Resolution,
}

impl Dimensions {
    /// Native size at scale 1 and density 1
    pub fn native(native: Resolution) -> Self {
        Self {
            scale: 1,
            logical: native,
            backing: native,
        }
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (x{}, backing {})", self.logical, self.scale, self.backing)
    }
}

/// Result of a scale calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleOutcome {
    /// New dimensions differ from the cached ones
    Resized(Dimensions),
    /// Same as last time; skip the surface resize
    Unchanged,
}

impl ScaleOutcome {
    pub fn dimensions(&self) -> Option<Dimensions> {
        match self {
            Self::Resized(d) => Some(*d),
            Self::Unchanged => None,
        }
    }
}

/// Integer scaler for a fixed native resolution
#[derive(Debug, Clone)]
pub struct ViewportScaler {
    native: Resolution,
    chrome: Option<LayoutChrome>,
    last: Option<Dimensions>,
}

impl ViewportScaler {
    pub fn new(native: Resolution) -> Self {
        Self {
            native,
            chrome: None,
            last: None,
        }
    }

    pub fn native(&self) -> Resolution {
        self.native
    }

    /// Change the native resolution, invalidating the cache
    pub fn set_native(&mut self, native: Resolution) {
        if native != self.native {
            self.native = native;
            self.last = None;
        }
    }

    /// Cache the layout chrome for this session
    ///
    /// The first measurement wins until [`reset`](Self::reset).
    pub fn set_chrome(&mut self, chrome: LayoutChrome) {
        if self.chrome.is_none() {
            self.chrome = Some(chrome);
            self.last = None;
        }
    }

    pub fn chrome(&self) -> LayoutChrome {
        self.chrome.unwrap_or_default()
    }

    /// Last computed dimensions
    pub fn last(&self) -> Option<Dimensions> {
        self.last
    }

    /// Forget chrome and cached dimensions (new session)
    pub fn reset(&mut self) {
        self.chrome = None;
        self.last = None;
    }

    /// Compute dimensions, returning `Unchanged` when they match the cache
    pub fn calculate_dimensions(&mut self, container: &ContainerMetrics) -> ScaleOutcome {
        let dims = self.compute(container);
        if self.last == Some(dims) {
            trace!("Viewport unchanged at {}", dims);
            return ScaleOutcome::Unchanged;
        }
        debug!("Viewport resized to {}", dims);
        self.last = Some(dims);
        ScaleOutcome::Resized(dims)
    }

    /// Compute dimensions bypassing the cache
    pub fn force_recalculate(&mut self, container: &ContainerMetrics) -> Dimensions {
        let dims = self.compute(container);
        debug!("Viewport forced to {}", dims);
        self.last = Some(dims);
        dims
    }

    fn compute(&self, container: &ContainerMetrics) -> Dimensions {
        let chrome = self.chrome();
        let available_w = container.width - chrome.horizontal();
        let available_h = container.height - chrome.vertical();

        let native_w = self.native.width.max(1) as f64;
        let native_h = self.native.height.max(1) as f64;
        let fit = (available_w / native_w).min(available_h / native_h).floor();
        let max_scale = (MAX_SURFACE_DIMENSION / self.native.width.max(self.native.height).max(1)).max(1);
        // NaN and negatives fall through to 1
        let scale = if fit >= 1.0 {
            (fit.min(max_scale as f64) as u32).max(1)
        } else {
            1
        };

        let logical = self.native.scaled(scale);
        let density = if container.pixel_density.is_finite() && container.pixel_density > 0.0 {
            container.pixel_density
        } else {
            1.0
        };
        let backing_edge = |len: u32| {
            (len as f64 * density)
                .round()
                .clamp(1.0, MAX_SURFACE_DIMENSION.max(len) as f64) as u32
        };
        let backing = Resolution::new(backing_edge(logical.width), backing_edge(logical.height));

        Dimensions {
            scale,
            logical,
            backing,
        }
    }
}

/// Trailing-edge debounce for resize work
///
/// Each call to [`schedule`](Self::schedule) replaces the pending one.
#[derive(Debug)]
pub struct ResizeDebouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl ResizeDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `work` after the delay unless rescheduled or cancelled first
    pub fn schedule<F>(&mut self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            work.await;
        }));
    }

    /// Drop any pending work
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    /// Whether work is waiting to run
    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| !p.is_finished())
    }
}

impl Drop for ResizeDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
