//! Metrics recorder for session and path activity

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    describe_counter!("mpsession_sessions_total", "Total number of sessions created");
    describe_counter!(
        "mpsession_paths_total",
        "Total number of paths attached to sessions"
    );
    describe_counter!(
        "mpsession_path_failures_total",
        "Paths removed after a transport or protocol failure"
    );
    describe_counter!("mpsession_bytes_sent_total", "Payload bytes sent per path");
    describe_counter!(
        "mpsession_bytes_received_total",
        "Payload bytes received per path"
    );

    describe_gauge!("mpsession_active_sessions", "Sessions not yet closed");
    describe_gauge!(
        "mpsession_reorder_pending",
        "Out-of-order chunks held by the reassembler"
    );

    describe_histogram!(
        "mpsession_session_duration_seconds",
        "Lifetime of a session from creation to close"
    );
}

// ============== Sessions ==============

pub fn record_session_created(role: &'static str) {
    counter!("mpsession_sessions_total", "role" => role).increment(1);
    gauge!("mpsession_active_sessions").increment(1.0);
}

fn record_session_closed(duration: Duration) {
    gauge!("mpsession_active_sessions").decrement(1.0);
    histogram!("mpsession_session_duration_seconds").record(duration.as_secs_f64());
}

// ============== Paths ==============

pub fn record_path_added(path_id: usize) {
    counter!("mpsession_paths_total", "path" => path_id.to_string()).increment(1);
}

pub fn record_path_failed(path_id: usize) {
    counter!("mpsession_path_failures_total", "path" => path_id.to_string()).increment(1);
}

pub fn record_bytes_sent(path_id: usize, bytes: usize) {
    counter!("mpsession_bytes_sent_total", "path" => path_id.to_string())
        .increment(bytes as u64);
}

pub fn record_bytes_received(path_id: usize, bytes: usize) {
    counter!("mpsession_bytes_received_total", "path" => path_id.to_string())
        .increment(bytes as u64);
}

pub fn set_reorder_pending(chunks: usize) {
    gauge!("mpsession_reorder_pending").set(chunks as f64);
}

/// Lifetime and byte totals of one session
pub struct SessionMetrics {
    start_time: Instant,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    finished: AtomicBool,
}

impl SessionMetrics {
    pub fn start(role: &'static str) -> Self {
        record_session_created(role);
        Self {
            start_time: Instant::now(),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            finished: AtomicBool::new(false),
        }
    }

    pub fn add_sent(&self, path_id: usize, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        record_bytes_sent(path_id, bytes);
    }

    pub fn add_received(&self, path_id: usize, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        record_bytes_received(path_id, bytes);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Record the session's end; later calls are ignored
    pub fn finish(&self) {
        if !self.finished.swap(true, Ordering::SeqCst) {
            record_session_closed(self.start_time.elapsed());
        }
    }
}
