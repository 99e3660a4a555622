//! Session statistics.
//!
//! Counters follow a single-writer discipline: the capture side of the send
//! task writes `frames_captured`, the send path writes `frames_sent` and
//! `bytes_sent`, the receive task writes the latency estimate, and the stats
//! task only reads. Relaxed atomics are sufficient under that discipline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Live counters for one session. Reset at session start.
#[derive(Debug)]
pub struct SessionStats {
    frames_captured: AtomicU64,
    frames_encoded: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    frames_received: AtomicU64,
    frames_decoded: AtomicU64,
    bytes_received: AtomicU64,
    latency_us: AtomicU64,
    started_at: Mutex<Instant>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            frames_captured: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            latency_us: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
        }
    }

    /// Zeroes every counter and restarts the session clock.
    pub fn reset(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_encoded.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.frames_received.store(0, Ordering::Relaxed);
        self.frames_decoded.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.latency_us.store(0, Ordering::Relaxed);
        *self.started_at.lock() = Instant::now();
    }

    pub fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encoded(&self) {
        self.frames_encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Installs an absolute dropped-frame count (the reassembler keeps its
    /// own monotonic counter on the sink).
    pub fn set_dropped(&self, dropped: u64) {
        self.frames_dropped.store(dropped, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_received(&self, bytes: u64) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, latency_us: u64) {
        self.latency_us.store(latency_us, Ordering::Relaxed);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    /// A point-in-time snapshot with derived rates.
    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.started_at.lock().elapsed();
        let secs = elapsed.as_secs_f64().max(1e-3);

        let frames_captured = self.frames_captured.load(Ordering::Relaxed);
        let frames_decoded = self.frames_decoded.load(Ordering::Relaxed);
        let bytes_sent = self.bytes_sent.load(Ordering::Relaxed);
        let bytes_received = self.bytes_received.load(Ordering::Relaxed);

        // The source rates come from what it produces, the sink's from what
        // it consumes.
        let rate_frames = if frames_captured > 0 {
            frames_captured
        } else {
            frames_decoded
        };
        let rate_bytes = if bytes_sent > 0 {
            bytes_sent
        } else {
            bytes_received
        };

        StatsSnapshot {
            frames_captured,
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_sent,
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_decoded,
            bytes_received,
            current_fps: rate_frames as f64 / secs,
            current_bitrate_bps: (rate_bytes as f64 * 8.0 / secs) as u64,
            latency_us: self.latency_us.load(Ordering::Relaxed),
            elapsed_us: elapsed.as_micros() as u64,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of session counters with derived rates, serializable for shells.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub frames_captured: u64,
    pub frames_encoded: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub frames_decoded: u64,
    pub bytes_received: u64,
    pub current_fps: f64,
    pub current_bitrate_bps: u64,
    pub latency_us: u64,
    pub elapsed_us: u64,
}
