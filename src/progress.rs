//! Progress tracking for shard export.
//!
//! Workers bump lock-free counters as they finish shards; a callback, if
//! installed, receives a [`ProgressState`] at most once per emit interval.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Snapshot of an export in flight.
#[derive(Debug, Clone)]
pub struct ProgressState {
    pub total_bytes: u64,
    pub processed_bytes: u64,
    pub completed_shards: usize,
    pub total_shards: usize,
    pub elapsed_time: Duration,
    pub speed_mbps: f32,
    pub progress_percent: f32,
}

impl ProgressState {
    /// Estimated time remaining based on the current speed.
    pub fn estimated_time_remaining(&self) -> Duration {
        if self.speed_mbps <= 0.0 {
            return Duration::from_secs(0);
        }
        let remaining_bytes = self.total_bytes.saturating_sub(self.processed_bytes);
        let remaining_mb = remaining_bytes as f32 / (1024.0 * 1024.0);
        Duration::from_secs_f32((remaining_mb / self.speed_mbps).max(0.0))
    }
}

pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;

pub struct ProgressTracker {
    total_bytes: u64,
    total_shards: usize,
    processed_bytes: AtomicU64,
    completed_shards: AtomicUsize,
    start_time: Instant,
    last_emit_time: Mutex<Instant>,
    emit_interval: Duration,
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressTracker {
    pub fn new(total_shards: usize, total_bytes: u64, emit_interval: Duration) -> Self {
        Self {
            total_bytes,
            total_shards,
            processed_bytes: AtomicU64::new(0),
            completed_shards: AtomicUsize::new(0),
            start_time: Instant::now(),
            last_emit_time: Mutex::new(Instant::now()),
            emit_interval,
            callback: None,
        }
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressState) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Records one finished shard of `bytes` bytes.
    pub fn record_shard_completed(&self, bytes: u64) {
        self.processed_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.completed_shards.fetch_add(1, Ordering::Relaxed);
        self.maybe_emit_progress();
    }

    pub fn emit_progress(&self) {
        if let Some(callback) = &self.callback {
            callback(self.get_progress_state());
        }
    }

    fn maybe_emit_progress(&self) {
        if self.callback.is_none() {
            return;
        }
        let now = Instant::now();
        let should_emit = match self.last_emit_time.lock() {
            Ok(mut last) if now.duration_since(*last) >= self.emit_interval => {
                *last = now;
                true
            }
            _ => false,
        };
        if should_emit {
            self.emit_progress();
        }
    }

    pub fn get_progress_state(&self) -> ProgressState {
        let processed_bytes = self.processed_bytes.load(Ordering::Relaxed);
        let completed_shards = self.completed_shards.load(Ordering::Relaxed);
        let elapsed_time = self.start_time.elapsed();

        let speed_mbps = if elapsed_time.as_secs_f32() > 0.0 {
            (processed_bytes as f32 / (1024.0 * 1024.0)) / elapsed_time.as_secs_f32()
        } else {
            0.0
        };
        let progress_percent = if self.total_bytes > 0 {
            (processed_bytes as f32 / self.total_bytes as f32 * 100.0).min(100.0)
        } else if self.total_shards > 0 {
            completed_shards as f32 / self.total_shards as f32 * 100.0
        } else {
            100.0
        };

        ProgressState {
            total_bytes: self.total_bytes,
            processed_bytes,
            completed_shards,
            total_shards: self.total_shards,
            elapsed_time,
            speed_mbps,
            progress_percent,
        }
    }
}
