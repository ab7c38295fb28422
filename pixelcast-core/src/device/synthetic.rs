//! Synthetic capture device
//!
//! Produces a moving test pattern on a tokio task. Behaviours cover the
//! failure modes a real capture card shows: no device, a device that opens
//! but never sends frames (console powered off), acquisition and release
//! failures, and unplugging mid-session.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AcquiredMedia, DeviceAdapter, DeviceSelector, MediaHandle, TrackFeed};
use crate::error::{PixelcastError, Result};
use crate::types::{DeviceInfo, MediaCapabilities, Resolution, VideoFrame};

/// Four-shade green palette used by the test pattern
const PALETTE: [[u8; 4]; 4] = [
    [0x0f, 0x38, 0x0f, 0xff],
    [0x30, 0x62, 0x30, 0xff],
    [0x8b, 0xac, 0x0f, 0xff],
    [0x9b, 0xbc, 0x0f, 0xff],
];

/// How the synthetic device behaves when acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyntheticBehavior {
    /// Frames flow normally
    #[default]
    Normal,
    /// Stream opens but no frame is ever delivered
    NoFrames,
    /// Acquisition fails with an adapter error
    FailAcquire,
    /// No device is connected
    NoDevice,
    /// Frames flow but releasing the handle fails
    FailRelease,
}

/// Synthetic device configuration
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Device id reported in [`DeviceInfo`]
    pub device_id: String,
    /// Native resolution of the pattern
    pub resolution: Resolution,
    /// Frames per second
    pub frame_rate: f64,
    /// Failure mode
    pub behavior: SyntheticBehavior,
    /// Signal end-of-track after this many frames
    pub end_after_frames: Option<u64>,
    /// Fire an extra wake-up after every frame
    pub duplicate_wakeups: bool,
    /// Offer the per-frame notification (otherwise progress only)
    pub precise_frames: bool,
    /// Simulated latency of `acquire`
    pub acquire_delay: Duration,
    /// Simulated latency of `release`
    pub release_delay: Duration,
}

/// Completed adapter call, in the order calls finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall {
    Acquire,
    Release,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            device_id: "synthetic-0".to_string(),
            resolution: Resolution::GAME_BOY,
            frame_rate: 59.73,
            behavior: SyntheticBehavior::Normal,
            end_after_frames: None,
            duplicate_wakeups: false,
            precise_frames: true,
            acquire_delay: Duration::ZERO,
            release_delay: Duration::ZERO,
        }
    }
}

struct ActiveStream {
    feed: Arc<TrackFeed>,
    producer: Option<JoinHandle<()>>,
}

/// In-process [`DeviceAdapter`] producing a test pattern
pub struct SyntheticDevice {
    config: SyntheticConfig,
    acquisitions: AtomicU64,
    releases: AtomicU64,
    active: Mutex<HashMap<u64, ActiveStream>>,
    calls: Mutex<Vec<DeviceCall>>,
    in_progress: AtomicUsize,
    overlaps: AtomicU64,
}

/// Tracks one adapter call from entry to exit
struct CallScope<'a> {
    device: &'a SyntheticDevice,
}

impl<'a> CallScope<'a> {
    fn enter(device: &'a SyntheticDevice) -> Self {
        if device.in_progress.fetch_add(1, Ordering::SeqCst) > 0 {
            warn!("Synthetic device called while another call is in flight");
            device.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        Self { device }
    }
}

impl Drop for CallScope<'_> {
    fn drop(&mut self) {
        self.device.in_progress.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SyntheticDevice {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            acquisitions: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            active: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_progress: AtomicUsize::new(0),
            overlaps: AtomicU64::new(0),
        }
    }

    /// Number of successful acquisitions
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::SeqCst)
    }

    /// Number of release calls
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Number of handles currently open
    pub fn open_handles(&self) -> usize {
        self.active.lock().len()
    }

    /// Acquisitions and releases that completed, in completion order
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.calls.lock().clone()
    }

    /// Calls that began while another acquire or release was still running
    pub fn overlapping_calls(&self) -> u64 {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Simulate unplugging: end every open track
    pub fn disconnect(&self) {
        let active = self.active.lock();
        for stream in active.values() {
            if let Some(producer) = &stream.producer {
                producer.abort();
            }
            stream.feed.end();
        }
        info!("Synthetic device disconnected ({} open streams)", active.len());
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(self.config.device_id.clone(), "Synthetic Capture Device")
    }
}

impl Default for SyntheticDevice {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

#[async_trait]
impl DeviceAdapter for SyntheticDevice {
    async fn acquire(&self, selector: &DeviceSelector) -> Result<AcquiredMedia> {
        let _scope = CallScope::enter(self);
        if !self.config.acquire_delay.is_zero() {
            tokio::time::sleep(self.config.acquire_delay).await;
        }

        match self.config.behavior {
            SyntheticBehavior::NoDevice => return Err(PixelcastError::NoDeviceAvailable),
            SyntheticBehavior::FailAcquire => {
                return Err(PixelcastError::acquisition("device busy"));
            }
            _ => {}
        }

        if let DeviceSelector::Id(id) = selector {
            if id != &self.config.device_id {
                return Err(PixelcastError::NoDeviceAvailable);
            }
        }

        let (feed, track) = TrackFeed::new(self.config.precise_frames);
        let feed = Arc::new(feed);
        let handle = MediaHandle::new(track);

        let producer = if self.config.behavior == SyntheticBehavior::NoFrames {
            debug!("Synthetic device opened without frame output");
            None
        } else {
            Some(tokio::spawn(produce_frames(feed.clone(), self.config.clone())))
        };

        self.active.lock().insert(
            handle.id().as_u64(),
            ActiveStream { feed, producer },
        );
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(DeviceCall::Acquire);

        info!(
            "Synthetic device acquired: {} @ {:.2}fps",
            self.config.resolution, self.config.frame_rate
        );

        Ok(AcquiredMedia {
            handle,
            device: self.device_info(),
            capabilities: MediaCapabilities {
                resolution: self.config.resolution,
                frame_rate: self.config.frame_rate,
                has_audio: false,
            },
        })
    }

    async fn release(&self, handle: MediaHandle) -> Result<()> {
        let _scope = CallScope::enter(self);
        if !self.config.release_delay.is_zero() {
            tokio::time::sleep(self.config.release_delay).await;
        }
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(DeviceCall::Release);

        if let Some(stream) = self.active.lock().remove(&handle.id().as_u64()) {
            if let Some(producer) = stream.producer {
                producer.abort();
            }
        } else {
            warn!("Release of unknown handle {}", handle.id());
        }

        if self.config.behavior == SyntheticBehavior::FailRelease {
            return Err(PixelcastError::release("device did not acknowledge close"));
        }
        Ok(())
    }
}

async fn produce_frames(feed: Arc<TrackFeed>, config: SyntheticConfig) {
    let period = Duration::from_secs_f64(1.0 / config.frame_rate.max(1.0));
    let mut ticker = tokio::time::interval(period);
    let mut index: u64 = 0;

    loop {
        ticker.tick().await;

        let media_time = period * index as u32;
        feed.deliver(VideoFrame {
            media_time,
            resolution: config.resolution,
            data: test_pattern(config.resolution, index),
        });
        if config.duplicate_wakeups {
            feed.wake();
        }

        index += 1;
        if config.end_after_frames.is_some_and(|limit| index >= limit) {
            feed.end();
            break;
        }
    }
}

/// Diagonal stripes in four shades, scrolling one pixel per frame
pub fn test_pattern(resolution: Resolution, frame_index: u64) -> Bytes {
    let mut data = Vec::with_capacity(resolution.area() * 4);
    for y in 0..resolution.height as u64 {
        for x in 0..resolution.width as u64 {
            let shade = ((x + y + frame_index) / 8) % 4;
            data.extend_from_slice(&PALETTE[shade as usize]);
        }
    }
    Bytes::from(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_size() {
        let data = test_pattern(Resolution::GAME_BOY, 0);
        assert_eq!(data.len(), 160 * 144 * 4);
    }

    #[test]
    fn test_pattern_scrolls() {
        let a = test_pattern(Resolution::new(16, 1), 0);
        let b = test_pattern(Resolution::new(16, 1), 8);
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_and_release_counts() {
        let device = SyntheticDevice::default();
        let media = device.acquire(&DeviceSelector::Default).await.unwrap();
        assert_eq!(device.acquisitions(), 1);
        assert_eq!(device.open_handles(), 1);

        device.release(media.handle).await.unwrap();
        assert_eq!(device.releases(), 1);
        assert_eq!(device.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_calls_are_counted() {
        let device = SyntheticDevice::new(SyntheticConfig {
            acquire_delay: Duration::from_millis(50),
            ..Default::default()
        });
        let (a, b) = tokio::join!(
            device.acquire(&DeviceSelector::Default),
            device.acquire(&DeviceSelector::Default)
        );
        assert_eq!(device.overlapping_calls(), 1);
        assert_eq!(device.calls(), vec![DeviceCall::Acquire, DeviceCall::Acquire]);

        device.release(a.unwrap().handle).await.unwrap();
        device.release(b.unwrap().handle).await.unwrap();
        assert_eq!(device.overlapping_calls(), 1);
        assert_eq!(device.calls().last(), Some(&DeviceCall::Release));
    }

    #[tokio::test]
    async fn test_no_device() {
        let device = SyntheticDevice::new(SyntheticConfig {
            behavior: SyntheticBehavior::NoDevice,
            ..Default::default()
        });
        let err = device.acquire(&DeviceSelector::Default).await.unwrap_err();
        assert!(matches!(err, PixelcastError::NoDeviceAvailable));
    }

    #[tokio::test]
    async fn test_unknown_device_id() {
        let device = SyntheticDevice::default();
        let err = device
            .acquire(&DeviceSelector::Id("other".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, PixelcastError::NoDeviceAvailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_after_frames() {
        let device = SyntheticDevice::new(SyntheticConfig {
            end_after_frames: Some(3),
            ..Default::default()
        });
        let media = device.acquire(&DeviceSelector::Default).await.unwrap();
        media.handle.video().ended().await;
        assert!(media.handle.video().is_ended());
    }
}
