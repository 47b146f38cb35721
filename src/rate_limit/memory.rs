use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};

use super::{CounterError, CounterStore, WindowCount};

/// Above this many tracked keys, closed windows are pruned.
const PRUNE_THRESHOLD: usize = 10_000;
/// At most one prune per interval, however many keys are tracked.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

struct Window {
    count: u64,
    resets_at: Instant,
}

#[derive(Default)]
struct Counters {
    windows: HashMap<String, Window>,
    next_prune: Option<Instant>,
}

/// Process-local counters for single-node deployments without Redis.
pub struct MemoryCounterStore {
    counters: Mutex<Counters>,
    prune_threshold: usize,
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::with_prune_threshold(PRUNE_THRESHOLD)
    }
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prune_threshold(prune_threshold: usize) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            prune_threshold,
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;

        let prune_due = counters.next_prune.is_none_or(|at| at <= now);
        if counters.windows.len() > self.prune_threshold && prune_due {
            counters.windows.retain(|_, w| w.resets_at > now);
            counters.next_prune = Some(now + PRUNE_INTERVAL);
        }

        let entry = counters.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            resets_at: now + window,
        });
        if entry.resets_at <= now {
            // Only a hit that opens a fresh window sets the expiry
            entry.count = 0;
            entry.resets_at = now + window;
        }
        entry.count += 1;

        Ok(WindowCount {
            count: entry.count,
            resets_in: entry.resets_at - now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn window_expiry_is_not_pushed_back_by_later_hits() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(60);

        let first = store.hit("k", window).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.resets_in, window);

        tokio::time::advance(Duration::from_secs(20)).await;
        let second = store.hit("k", window).await.unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.resets_in, Duration::from_secs(40));

        tokio::time::advance(Duration::from_secs(40)).await;
        let fresh = store.hit("k", window).await.unwrap();
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.resets_in, window);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_windows_are_pruned_at_most_once_per_interval() {
        let store = MemoryCounterStore::with_prune_threshold(2);
        let window = Duration::from_secs(1);
        let tracked = |store: &MemoryCounterStore| {
            let counters = store.counters.try_lock().unwrap();
            counters.windows.len()
        };

        for key in ["a", "b", "c"] {
            store.hit(key, window).await.unwrap();
        }
        assert_eq!(tracked(&store), 3);

        // Over the threshold with closed windows: the first prune runs
        tokio::time::advance(Duration::from_secs(2)).await;
        store.hit("d", window).await.unwrap();
        assert_eq!(tracked(&store), 1);

        for key in ["e", "f"] {
            store.hit(key, window).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(2)).await;
        store.hit("g", window).await.unwrap();
        assert_eq!(tracked(&store), 4);

        tokio::time::advance(PRUNE_INTERVAL).await;
        store.hit("h", window).await.unwrap();
        assert_eq!(tracked(&store), 1);
    }
}
