use crate::protocol::{DEFAULT_CHUNK_SIZE, MAX_DATA_PAYLOAD};
use crate::scheduler::error::{SchedulerError, SchedulerResult};
use serde::{Deserialize, Serialize};

/// Ordinal of a path inside its session
pub type PathId = usize;

/// Weight given to paths beyond the end of the configured weight list
pub const DEFAULT_WEIGHT: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SchedulerKind {
    /// Static weighted round robin over configured per-path weights
    #[default]
    UserWeighted,
    /// Weighted by measured network conditions (not implemented, always the first live path)
    NetworkAware,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub kind: SchedulerKind,
    /// Weight per path, indexed by path id
    pub weights: Vec<u32>,
    /// Payload bytes per Data packet
    pub chunk_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::UserWeighted,
            weights: vec![5, 2],
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SchedulerConfig {
    pub fn with_weights(weights: Vec<u32>) -> Self {
        Self {
            weights,
            ..Default::default()
        }
    }

    pub fn weight(&self, path: PathId) -> u32 {
        self.weights.get(path).copied().unwrap_or(DEFAULT_WEIGHT)
    }

    /// Full quota in bytes a path receives on every reset
    pub fn quota(&self, path: PathId) -> u64 {
        self.weight(path) as u64 * self.chunk_size as u64
    }

    /// Quota at or below which a path is refilled and the rotation advances
    pub fn reset_threshold(&self) -> u64 {
        (self.chunk_size / 8) as u64
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_DATA_PAYLOAD {
            return Err(SchedulerError::InvalidConfig(format!(
                "chunk size {} outside 1..={}",
                self.chunk_size, MAX_DATA_PAYLOAD
            )));
        }
        if let Some(idx) = self.weights.iter().position(|w| *w == 0) {
            return Err(SchedulerError::InvalidConfig(format!(
                "weight of path {idx} is zero"
            )));
        }
        Ok(())
    }
}
