use crate::scheduler::types::PathId;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("No path available for scheduling")]
    NoPaths,

    #[error("Unknown path {0}")]
    UnknownPath(PathId),

    #[error("Invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
