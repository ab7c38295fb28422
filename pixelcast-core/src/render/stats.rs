//! Render loop counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the pipeline and its render loops
#[derive(Debug, Default)]
pub struct RenderStats {
    frames_drawn: AtomicU64,
    duplicates_skipped: AtomicU64,
    pauses: AtomicU64,
    renderer_switches: AtomicU64,
}

impl RenderStats {
    pub fn record_drawn(&self) {
        self.frames_drawn.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pause(&self) {
        self.pauses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_switch(&self) {
        self.renderer_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn.load(Ordering::Relaxed)
    }

    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped.load(Ordering::Relaxed)
    }

    pub fn pauses(&self) -> u64 {
        self.pauses.load(Ordering::Relaxed)
    }

    pub fn renderer_switches(&self) -> u64 {
        self.renderer_switches.load(Ordering::Relaxed)
    }

    /// Zero every counter (new session)
    pub fn reset(&self) {
        self.frames_drawn.store(0, Ordering::Relaxed);
        self.duplicates_skipped.store(0, Ordering::Relaxed);
        self.pauses.store(0, Ordering::Relaxed);
        self.renderer_switches.store(0, Ordering::Relaxed);
    }
}
