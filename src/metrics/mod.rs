//! Metrics for multipath sessions
//!
//! Recorded through the `metrics` facade; install any recorder/exporter in the
//! host process to collect them.
//!
//! Key metrics exposed:
//! - Sessions created and closed
//! - Paths attached and failed
//! - Bytes sent and received per path
//! - Out-of-order chunks waiting in the reassembler

pub mod recorder;

pub use recorder::{
    init_metrics, record_bytes_received, record_bytes_sent, record_path_added,
    record_path_failed, record_session_created, set_reorder_pending, SessionMetrics,
};
