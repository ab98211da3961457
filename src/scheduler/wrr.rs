//! Weighted round robin path selection
//!
//! Each path owns a byte quota of `weight * chunk_size`. The current path
//! carries chunks until its quota drops to one eighth of a chunk, then it is
//! refilled and the rotation moves on. A newly added path becomes the current
//! path immediately.

use crate::scheduler::error::{SchedulerError, SchedulerResult};
use crate::scheduler::types::{PathId, SchedulerConfig, SchedulerKind};

#[derive(Debug)]
pub struct PathScheduler {
    config: SchedulerConfig,
    remaining: Vec<u64>,
    live: Vec<bool>,
    current: PathId,
}

impl PathScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            remaining: Vec::new(),
            live: Vec::new(),
            current: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register the next path and return its id
    pub fn add_path(&mut self) -> PathId {
        let path = self.remaining.len();

        if path > 0 && self.live[self.current] {
            self.remaining[self.current] = self.config.quota(self.current);
        }

        self.remaining.push(self.config.quota(path));
        self.live.push(true);
        self.current = path;

        tracing::debug!(path, num_paths = self.remaining.len(), "scheduler added path");
        path
    }

    /// Take a path out of the rotation. Its id stays reserved.
    pub fn remove_path(&mut self, path: PathId) -> SchedulerResult<()> {
        if path >= self.live.len() {
            return Err(SchedulerError::UnknownPath(path));
        }
        if !self.live[path] {
            return Ok(());
        }

        self.live[path] = false;
        self.remaining[path] = self.config.quota(path);

        if self.current == path {
            if let Some(next) = self.next_live(path) {
                self.current = next;
            }
        }

        tracing::debug!(path, live = self.live_paths(), "scheduler removed path");
        Ok(())
    }

    /// Choose the path for the next chunk of `chunk_size` bytes
    pub fn pick_path(&mut self, chunk_size: usize) -> SchedulerResult<PathId> {
        if self.live_paths() == 0 {
            return Err(SchedulerError::NoPaths);
        }

        match self.config.kind {
            SchedulerKind::UserWeighted => Ok(self.pick_user_weighted(chunk_size)),
            SchedulerKind::NetworkAware => Ok(self.pick_network_aware(chunk_size)),
        }
    }

    fn pick_user_weighted(&mut self, chunk_size: usize) -> PathId {
        let selected = self.current;

        // saturating so an oversized chunk empties the quota rather than wrapping
        self.remaining[selected] = self.remaining[selected].saturating_sub(chunk_size as u64);

        if self.remaining[selected] <= self.config.reset_threshold() {
            self.remaining[selected] = self.config.quota(selected);
            if let Some(next) = self.next_live(selected) {
                self.current = next;
            }
        }

        selected
    }

    // TODO: weight by per-path RTT and goodput once paths report them
    fn pick_network_aware(&mut self, _chunk_size: usize) -> PathId {
        self.live.iter().position(|live| *live).unwrap_or(0)
    }

    /// Next live path after `from`, wrapping; `from` itself if it is the only one
    fn next_live(&self, from: PathId) -> Option<PathId> {
        let n = self.live.len();
        (1..=n).map(|step| (from + step) % n).find(|p| self.live[*p])
    }

    pub fn num_paths(&self) -> usize {
        self.remaining.len()
    }

    pub fn live_paths(&self) -> usize {
        self.live.iter().filter(|live| **live).count()
    }

    pub fn current_path(&self) -> PathId {
        self.current
    }

    pub fn remaining(&self, path: PathId) -> Option<u64> {
        self.remaining.get(path).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 1024;

    fn scheduler(weights: Vec<u32>, paths: usize) -> PathScheduler {
        let mut s = PathScheduler::new(SchedulerConfig::with_weights(weights));
        for _ in 0..paths {
            s.add_path();
        }
        s
    }

    #[test]
    fn test_no_paths() {
        let mut s = scheduler(vec![5, 2], 0);
        assert_eq!(s.pick_path(CHUNK), Err(SchedulerError::NoPaths));
    }

    #[test]
    fn test_single_path() {
        let mut s = scheduler(vec![5, 2], 1);
        for _ in 0..20 {
            assert_eq!(s.pick_path(CHUNK).unwrap(), 0);
        }
    }

    #[test]
    fn test_new_path_is_picked_next() {
        let mut s = scheduler(vec![5, 2], 1);
        s.pick_path(CHUNK).unwrap();
        s.pick_path(CHUNK).unwrap();
        assert_eq!(s.remaining(0), Some(3 * 1024));

        assert_eq!(s.add_path(), 1);
        // previous current path was refilled
        assert_eq!(s.remaining(0), Some(5 * 1024));
        assert_eq!(s.pick_path(CHUNK).unwrap(), 1);
    }

    #[test]
    fn test_exact_rotation_sequence() {
        let mut s = scheduler(vec![5, 2], 2);
        let picks: Vec<PathId> = (0..14).map(|_| s.pick_path(CHUNK).unwrap()).collect();
        assert_eq!(picks, vec![1, 1, 0, 0, 0, 0, 0, 1, 1, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_ratio_converges() {
        let mut s = scheduler(vec![5, 2], 2);
        let mut counts = [0usize; 2];
        for _ in 0..70_000 {
            counts[s.pick_path(CHUNK).unwrap()] += 1;
        }
        // tolerance of one quota worth of chunks
        let expected0 = 70_000 * 5 / 7;
        assert!(counts[0].abs_diff(expected0) <= 5, "counts {counts:?}");
        assert_eq!(counts[0] + counts[1], 70_000);
    }

    #[test]
    fn test_quota_never_exceeds_full() {
        let mut s = scheduler(vec![3, 1, 4], 3);
        let sizes = [1024, 1, 700, 1024, 129, 1023, 5];
        for i in 0..1000 {
            s.pick_path(sizes[i % sizes.len()]).unwrap();
            for p in 0..3 {
                assert!(s.remaining(p).unwrap() <= s.config().quota(p));
            }
            assert!(s.current_path() < s.num_paths());
        }
    }

    #[test]
    fn test_short_chunks_stay_longer() {
        let mut s = scheduler(vec![1], 1);
        s.add_path();
        // quota 1024 on path 1, threshold 128: 512 + 384 leaves 128
        assert_eq!(s.pick_path(512).unwrap(), 1);
        assert_eq!(s.pick_path(384).unwrap(), 1);
        assert_eq!(s.pick_path(512).unwrap(), 0);
    }

    #[test]
    fn test_missing_weight_defaults_to_one() {
        let mut s = scheduler(vec![2], 2);
        assert_eq!(s.remaining(1), Some(1024));
        assert_eq!(s.pick_path(CHUNK).unwrap(), 1);
        assert_eq!(s.pick_path(CHUNK).unwrap(), 0);
    }

    #[test]
    fn test_removed_path_is_skipped() {
        let mut s = scheduler(vec![1, 1, 1], 3);
        s.remove_path(2).unwrap();
        assert_eq!(s.live_paths(), 2);
        assert_eq!(s.num_paths(), 3);

        let picks: Vec<PathId> = (0..6).map(|_| s.pick_path(CHUNK).unwrap()).collect();
        assert!(picks.iter().all(|p| *p != 2), "picks {picks:?}");
        assert!(picks.contains(&0) && picks.contains(&1));
    }

    #[test]
    fn test_remove_all_paths() {
        let mut s = scheduler(vec![1, 1], 2);
        s.remove_path(0).unwrap();
        s.remove_path(1).unwrap();
        s.remove_path(1).unwrap();
        assert_eq!(s.pick_path(CHUNK), Err(SchedulerError::NoPaths));
        assert_eq!(s.remove_path(9), Err(SchedulerError::UnknownPath(9)));
    }

    #[test]
    fn test_network_aware_stub() {
        let mut s = PathScheduler::new(SchedulerConfig {
            kind: SchedulerKind::NetworkAware,
            ..Default::default()
        });
        assert_eq!(s.pick_path(CHUNK), Err(SchedulerError::NoPaths));
        s.add_path();
        s.add_path();
        assert_eq!(s.pick_path(CHUNK).unwrap(), 0);
        s.remove_path(0).unwrap();
        assert_eq!(s.pick_path(CHUNK).unwrap(), 1);
    }
}
