//! Stream health probe
//!
//! Confirms that an opened stream actually produces frames. The first of
//! {frame delivered, timeout} wins and exactly one outcome callback fires per
//! [`HealthMonitor::start_monitoring`] call, including when the probe is
//! cancelled or re-armed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::device::VideoTrack;

/// Default time to wait for the first frame
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Why a stream was judged unhealthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnhealthyReason {
    /// Timeout elapsed without a frame
    NoFramesReceived,
    /// The track ended before its first frame
    TrackEnded,
    /// Monitoring was stopped or re-armed while pending
    Cancelled,
}

impl std::fmt::Display for UnhealthyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFramesReceived => write!(f, "NO_FRAMES_RECEIVED"),
            Self::TrackEnded => write!(f, "TRACK_ENDED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Result of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// First frame arrived at this media time
    Healthy(Duration),
    Unhealthy(UnhealthyReason),
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy(_))
    }
}

struct PendingProbe {
    id: u64,
    cancel: oneshot::Sender<()>,
}

#[derive(Default)]
struct MonitorInner {
    pending: Mutex<Option<PendingProbe>>,
    next_id: AtomicU64,
}

/// One-shot "is video flowing" probe, re-armed per session start
#[derive(Clone, Default)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a probe on `track`
    ///
    /// A probe that is still pending is cancelled first and resolves as
    /// [`UnhealthyReason::Cancelled`].
    pub fn start_monitoring<H, U>(&self, track: &VideoTrack, on_healthy: H, on_unhealthy: U, timeout: Duration)
    where
        H: FnOnce(Duration) + Send + 'static,
        U: FnOnce(UnhealthyReason) + Send + 'static,
    {
        self.stop_monitoring();

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        *self.inner.pending.lock() = Some(PendingProbe { id, cancel: cancel_tx });

        let mut frames = track.subscribe();
        let precise = frames.is_precise();
        let track = track.clone();
        let inner = self.inner.clone();

        debug!(
            "Health probe {} armed on track {} ({} signal, timeout {:?})",
            id,
            track.id(),
            if precise { "frame" } else { "progress" },
            timeout
        );

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                _ = cancel_rx => HealthOutcome::Unhealthy(UnhealthyReason::Cancelled),
                frame = frames.next() => match frame {
                    Some(frame) => HealthOutcome::Healthy(frame.media_time),
                    None => HealthOutcome::Unhealthy(UnhealthyReason::TrackEnded),
                },
                _ = track.ended() => HealthOutcome::Unhealthy(UnhealthyReason::TrackEnded),
                _ = tokio::time::sleep(timeout) => HealthOutcome::Unhealthy(UnhealthyReason::NoFramesReceived),
            };

            {
                let mut pending = inner.pending.lock();
                if pending.as_ref().is_some_and(|p| p.id == id) {
                    *pending = None;
                }
            }

            match outcome {
                HealthOutcome::Healthy(media_time) => {
                    info!("Stream healthy: first frame at {:?}", media_time);
                    on_healthy(media_time);
                }
                HealthOutcome::Unhealthy(UnhealthyReason::Cancelled) => {
                    debug!("Health probe {} cancelled", id);
                    on_unhealthy(UnhealthyReason::Cancelled);
                }
                HealthOutcome::Unhealthy(reason) => {
                    warn!("Stream unhealthy: {}", reason);
                    on_unhealthy(reason);
                }
            }
        });
    }

    /// Cancel the pending probe, if any. Safe to call repeatedly.
    pub fn stop_monitoring(&self) {
        if let Some(probe) = self.inner.pending.lock().take() {
            // The task may have just resolved on its own; either way exactly
            // one callback runs
            let _ = probe.cancel.send(());
        }
    }

    /// Whether a probe is pending
    pub fn is_monitoring(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    /// Arm a probe and wait for its outcome
    pub async fn probe(&self, track: &VideoTrack, timeout: Duration) -> HealthOutcome {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let healthy_tx = tx.clone();

        self.start_monitoring(
            track,
            move |media_time| {
                if let Some(tx) = healthy_tx.lock().take() {
                    let _ = tx.send(HealthOutcome::Healthy(media_time));
                }
            },
            move |reason| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(HealthOutcome::Unhealthy(reason));
                }
            },
            timeout,
        );

        rx.await
            .unwrap_or(HealthOutcome::Unhealthy(UnhealthyReason::Cancelled))
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}
