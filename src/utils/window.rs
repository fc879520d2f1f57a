//! Per-key sliding time windows

use dashmap::DashMap;
use std::collections::VecDeque;

/// One timestamped observation attributed to a key
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry<T> {
    pub timestamp: i64,
    pub observation: T,
}

/// Sliding-window accumulator keyed by address or mint.
///
/// Entries older than the retention ceiling are evicted whenever the key is
/// queried; eviction is permanent. Aggregates are computed by callers over the
/// returned window.
#[derive(Debug)]
pub struct WindowedAggregator<T> {
    entries: DashMap<String, VecDeque<WindowEntry<T>>>,
    retention: i64,
}

impl<T: Clone> WindowedAggregator<T> {
    /// `retention` must be at least as long as any horizon queried
    pub fn new(retention: i64) -> Self {
        Self {
            entries: DashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> i64 {
        self.retention
    }

    /// Append one observation for `key`
    pub fn record(&self, key: &str, observation: T, timestamp: i64) {
        let mut deque = self.entries.entry(key.to_string()).or_default();

        // Keep the deque ordered even if observations arrive slightly out of order
        let pos = deque
            .iter()
            .rposition(|e| e.timestamp <= timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        deque.insert(
            pos,
            WindowEntry {
                timestamp,
                observation,
            },
        );
    }

    /// Entries recorded within `[now - horizon, now]`, oldest first.
    ///
    /// Evicts entries older than the retention ceiling as a side effect.
    pub fn window(&self, key: &str, horizon: i64, now: i64) -> Vec<WindowEntry<T>> {
        let horizon = horizon.min(self.retention);

        let result = match self.entries.get_mut(key) {
            Some(mut deque) => {
                let cutoff = now - self.retention;
                while deque.front().map_or(false, |e| e.timestamp < cutoff) {
                    deque.pop_front();
                }

                let start = now - horizon;
                deque
                    .iter()
                    .filter(|e| e.timestamp >= start && e.timestamp <= now)
                    .cloned()
                    .collect()
            }
            None => return Vec::new(),
        };

        self.entries.remove_if(key, |_, deque| deque.is_empty());
        result
    }

    pub fn count(&self, key: &str, horizon: i64, now: i64) -> usize {
        self.window(key, horizon, now).len()
    }

    /// Keys currently holding at least one entry
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}
