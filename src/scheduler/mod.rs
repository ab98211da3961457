pub mod error;
pub mod types;
pub mod wrr;

pub use error::{SchedulerError, SchedulerResult};
pub use types::{PathId, SchedulerConfig, SchedulerKind};
pub use wrr::PathScheduler;
