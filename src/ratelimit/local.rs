//! In-process sliding-window store.
//!
//! Used whenever the shared store is missing or failing. Each identity keeps
//! its admission timestamps; the map is bounded (least recently seen identities
//! evicted first, in batches down to 90% of the bound) and idle identities are
//! removed by [`LocalWindowStore::sweep`].

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::store::{StoreError, WindowSnapshot, WindowStore};

/// Admission history for one identity.
#[derive(Debug)]
struct KeyWindow {
    hits: VecDeque<f64>,
    /// Window length most recently used with this key, in seconds
    window_secs: f64,
    /// Last time this key was checked
    last_seen: f64,
}

impl KeyWindow {
    fn new() -> Self {
        Self {
            hits: VecDeque::new(),
            window_secs: 0.0,
            last_seen: 0.0,
        }
    }

    fn prune(&mut self, window_start: f64) {
        self.hits.retain(|&ts| ts > window_start);
    }

    fn oldest(&self) -> Option<f64> {
        self.hits.iter().copied().reduce(f64::min)
    }

    fn is_idle(&self, now: f64) -> bool {
        let window_start = now - self.window_secs;
        !self.hits.iter().any(|&ts| ts > window_start)
    }
}

/// Bounded per-process window store.
#[derive(Debug)]
pub struct LocalWindowStore {
    windows: DashMap<String, KeyWindow>,
    max_keys: usize,
}

impl LocalWindowStore {
    /// Create a store tracking at most `max_keys` identities.
    pub fn new(max_keys: usize) -> Self {
        Self {
            windows: DashMap::new(),
            max_keys: max_keys.max(1),
        }
    }

    /// Number of identities currently tracked.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Prune, count and conditionally record `now` for `key`.
    pub fn record(&self, key: &str, now: f64, limit: u64, window: Duration) -> WindowSnapshot {
        let window_secs = window.as_secs_f64();
        let is_new = !self.windows.contains_key(key);

        let snapshot = {
            // The entry guard holds the shard lock for the whole prune/count/append.
            let mut entry = self
                .windows
                .entry(key.to_string())
                .or_insert_with(KeyWindow::new);

            entry.window_secs = window_secs;
            entry.last_seen = now;
            entry.prune(now - window_secs);

            let count = entry.hits.len() as u64;
            let allowed = count < limit;
            if allowed {
                entry.hits.push_back(now);
            }

            WindowSnapshot {
                allowed,
                count,
                oldest: entry.oldest(),
            }
        };

        if is_new {
            self.enforce_capacity(key);
        }

        trace!(key = %key, count = snapshot.count, allowed = snapshot.allowed, "Local window checked");
        snapshot
    }

    /// Prune and count `key` without recording anything.
    pub fn peek(&self, key: &str, now: f64, window: Duration) -> WindowSnapshot {
        let window_secs = window.as_secs_f64();

        match self.windows.get_mut(key) {
            Some(mut entry) => {
                entry.prune(now - window_secs);
                WindowSnapshot {
                    allowed: false,
                    count: entry.hits.len() as u64,
                    oldest: entry.oldest(),
                }
            }
            None => WindowSnapshot {
                allowed: false,
                count: 0,
                oldest: None,
            },
        }
    }

    /// Forget `key`.
    pub fn remove(&self, key: &str) -> bool {
        self.windows.remove(key).is_some()
    }

    /// Drop every identity with no timestamps left inside its window.
    /// Returns how many were removed.
    pub fn sweep(&self, now: f64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_idle(now));
        let removed = before.saturating_sub(self.windows.len());

        if removed > 0 {
            debug!(removed = removed, remaining = self.windows.len(), "Swept idle rate limit keys");
        }
        removed
    }

    /// Once over the bound, evict the least recently seen identities down to
    /// the low-water mark so the scan runs once per batch of new keys.
    fn enforce_capacity(&self, keep: &str) {
        let len = self.windows.len();
        if len <= self.max_keys {
            return;
        }
        let excess = len - self.low_water_mark();

        let mut candidates: Vec<(f64, String)> = self
            .windows
            .iter()
            .filter(|entry| entry.key() != keep)
            .map(|entry| (entry.last_seen, entry.key().clone()))
            .collect();
        if excess < candidates.len() {
            candidates.select_nth_unstable_by(excess, |a, b| a.0.total_cmp(&b.0));
            candidates.truncate(excess);
        }

        let evicted = candidates
            .iter()
            .filter(|(_, key)| self.windows.remove(key).is_some())
            .count();
        debug!(evicted = evicted, max_keys = self.max_keys, "Evicted least recently seen rate limit keys");
    }

    fn low_water_mark(&self) -> usize {
        self.max_keys - self.max_keys / 10
    }
}

impl Default for LocalWindowStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl WindowStore for LocalWindowStore {
    async fn admit(
        &self,
        key: &str,
        now: f64,
        limit: u64,
        window: Duration,
    ) -> Result<WindowSnapshot, StoreError> {
        Ok(self.record(key, now, limit, window))
    }

    async fn usage(&self, key: &str, now: f64, window: Duration) -> Result<WindowSnapshot, StoreError> {
        Ok(self.peek(key, now, window))
    }

    async fn clear(&self, key: &str) -> Result<(), StoreError> {
        self.remove(key);
        Ok(())
    }
}
