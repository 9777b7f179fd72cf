use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

use crate::config::ViewConfig;

/// Sliding window submit limiter keyed by author.
///
/// Clones share their counters, so one throttle handed to several thread
/// views limits an author across all of them.
#[derive(Clone)]
pub struct SubmitThrottle {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
    pub limit: usize,
    pub window: Duration,
}

impl SubmitThrottle {
    pub fn new(enabled: bool, limit: usize, window: Duration) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled, limit, window }
    }

    pub fn from_config(cfg: &ViewConfig) -> Self {
        Self::new(cfg.throttle_enabled, cfg.submit_limit, cfg.submit_window)
    }

    pub fn disabled() -> Self {
        Self::new(false, usize::MAX, Duration::ZERO)
    }

    /// Records a submit for `author_id`; false if over the limit.
    pub fn allow(&self, author_id: &str) -> bool {
        self.check(author_id, Instant::now())
    }

    fn check(&self, key: &str, now: Instant) -> bool {
        if !self.enabled { return true; }
        let mut entry = self.store.entry(format!("submit:{key}")).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= self.window { entry.pop_front(); } else { break; }
        }
        if entry.len() < self.limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}
