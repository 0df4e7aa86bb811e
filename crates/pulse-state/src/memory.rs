//! In-process metric store.
//!
//! One coarse `RwLock` guards both maps, so a batch is a single critical
//! section and readers copy a consistent state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use pulse_core::{MetricChange, MetricKind, MetricUpdate, MetricValue, Snapshot};

use crate::error::{StateError, StateResult};
use crate::store::{MetricStore, StoreFuture};

#[derive(Debug, Default)]
struct Maps {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Maps {
    fn add(&mut self, id: &str, delta: i64) -> StateResult<i64> {
        let current = self.counters.get(id).copied().unwrap_or(0);
        let total = current.checked_add(delta).ok_or_else(|| StateError::Overflow {
            id: id.to_string(),
        })?;
        self.counters.insert(id.to_string(), total);
        Ok(total)
    }

    /// Stage every counter total first so an overflow anywhere leaves the
    /// maps untouched.
    fn apply_batch(&mut self, batch: &[MetricUpdate]) -> StateResult<()> {
        let mut staged: HashMap<&str, i64> = HashMap::new();
        for update in batch {
            if let MetricChange::Counter(delta) = update.change {
                let current = match staged.get(update.id.as_str()) {
                    Some(total) => *total,
                    None => self.counters.get(&update.id).copied().unwrap_or(0),
                };
                let total = current.checked_add(delta).ok_or_else(|| StateError::Overflow {
                    id: update.id.clone(),
                })?;
                staged.insert(update.id.as_str(), total);
            }
        }

        for update in batch {
            if let MetricChange::Gauge(value) = update.change {
                self.gauges.insert(update.id.clone(), value);
            }
        }
        for (id, total) in staged {
            self.counters.insert(id.to_string(), total);
        }
        Ok(())
    }
}

/// Thread-safe in-memory store. Clones share the same maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Maps>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let maps = Maps {
            gauges: snapshot.gauges.into_iter().collect(),
            counters: snapshot.counters.into_iter().collect(),
        };
        Self {
            inner: Arc::new(RwLock::new(maps)),
        }
    }

    /// Replace the whole contents with `snapshot`.
    pub async fn restore(&self, snapshot: Snapshot) {
        let mut maps = self.inner.write().await;
        maps.gauges = snapshot.gauges.into_iter().collect();
        maps.counters = snapshot.counters.into_iter().collect();
        debug!(
            gauges = maps.gauges.len(),
            counters = maps.counters.len(),
            "memory store restored"
        );
    }

    /// Copy the current state; the lock is held only while copying.
    pub async fn snapshot(&self) -> Snapshot {
        let maps = self.inner.read().await;
        Snapshot {
            gauges: maps.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            counters: maps.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }
}

impl MetricStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn update_gauge<'a>(&'a self, id: &'a str, value: f64) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.inner.write().await.gauges.insert(id.to_string(), value);
            Ok(())
        })
    }

    fn update_counter<'a>(&'a self, id: &'a str, delta: i64) -> StoreFuture<'a, i64> {
        Box::pin(async move { self.inner.write().await.add(id, delta) })
    }

    fn get_value<'a>(
        &'a self,
        kind: MetricKind,
        id: &'a str,
    ) -> StoreFuture<'a, Option<MetricValue>> {
        Box::pin(async move {
            let maps = self.inner.read().await;
            Ok(match kind {
                MetricKind::Gauge => maps.gauges.get(id).copied().map(MetricValue::Gauge),
                MetricKind::Counter => maps.counters.get(id).copied().map(MetricValue::Counter),
            })
        })
    }

    fn get_all(&self) -> StoreFuture<'_, Snapshot> {
        Box::pin(async move { Ok(self.snapshot().await) })
    }

    fn update_batch<'a>(&'a self, batch: &'a [MetricUpdate]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.inner.write().await.apply_batch(batch)?;
            debug!(updates = batch.len(), "batch applied to memory store");
            Ok(())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gauge_overwrites() {
        let store = MemoryStore::new();
        store.update_gauge("HeapAlloc", 1.0).await.unwrap();
        store.update_gauge("HeapAlloc", 123456.0).await.unwrap();

        assert_eq!(
            store.get_value(MetricKind::Gauge, "HeapAlloc").await.unwrap(),
            Some(MetricValue::Gauge(123456.0))
        );
    }

    #[tokio::test]
    async fn counter_accumulates() {
        let store = MemoryStore::new();
        assert_eq!(store.update_counter("PollCount", 1).await.unwrap(), 1);
        assert_eq!(store.update_counter("PollCount", 1).await.unwrap(), 2);
        assert_eq!(store.update_counter("PollCount", -5).await.unwrap(), -3);
    }

    #[tokio::test]
    async fn kinds_are_separate_namespaces() {
        let store = MemoryStore::new();
        store.update_gauge("x", 2.5).await.unwrap();
        store.update_counter("x", 3).await.unwrap();

        assert_eq!(
            store.get_value(MetricKind::Gauge, "x").await.unwrap(),
            Some(MetricValue::Gauge(2.5))
        );
        assert_eq!(
            store.get_value(MetricKind::Counter, "x").await.unwrap(),
            Some(MetricValue::Counter(3))
        );
        assert_eq!(store.get_value(MetricKind::Counter, "y").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_counter_updates_are_not_lost() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for task in 0..16i64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100i64 {
                    store.update_counter("hits", task * 100 + i).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let expected: i64 = (0..1600i64).sum();
        assert_eq!(
            store.get_value(MetricKind::Counter, "hits").await.unwrap(),
            Some(MetricValue::Counter(expected))
        );
    }

    #[tokio::test]
    async fn batch_last_gauge_wins_and_counters_sum() {
        let store = MemoryStore::new();
        store.update_counter("c", 10).await.unwrap();

        let batch = vec![
            MetricUpdate::gauge("g", 1.0),
            MetricUpdate::counter("c", 5),
            MetricUpdate::gauge("g", 2.0),
            MetricUpdate::counter("c", 7),
        ];
        store.update_batch(&batch).await.unwrap();

        let snap = store.get_all().await.unwrap();
        assert_eq!(snap.gauges["g"], 2.0);
        assert_eq!(snap.counters["c"], 22);
    }

    #[tokio::test]
    async fn batch_overflow_leaves_state_untouched() {
        let store = MemoryStore::new();
        store.update_counter("big", i64::MAX - 1).await.unwrap();
        store.update_gauge("g", 1.0).await.unwrap();
        let before = store.get_all().await.unwrap();

        let batch = vec![
            MetricUpdate::gauge("g", 99.0),
            MetricUpdate::counter("other", 1),
            MetricUpdate::counter("big", 5),
        ];
        let err = store.update_batch(&batch).await.unwrap_err();
        assert!(matches!(err, StateError::Overflow { .. }));
        assert_eq!(store.get_all().await.unwrap(), before);
    }

    #[tokio::test]
    async fn single_counter_overflow_is_an_error() {
        let store = MemoryStore::new();
        store.update_counter("c", i64::MAX).await.unwrap();
        assert!(store.update_counter("c", 1).await.is_err());
        assert_eq!(
            store.get_value(MetricKind::Counter, "c").await.unwrap(),
            Some(MetricValue::Counter(i64::MAX))
        );
    }

    #[tokio::test]
    async fn restore_replaces_contents() {
        let store = MemoryStore::new();
        store.update_gauge("stale", 1.0).await.unwrap();

        let mut snap = Snapshot::default();
        snap.counters.insert("PollCount".to_string(), 4);
        store.restore(snap.clone()).await;

        assert_eq!(store.get_all().await.unwrap(), snap);
    }

    #[tokio::test]
    async fn snapshot_is_a_copy() {
        let store = MemoryStore::new();
        store.update_counter("c", 1).await.unwrap();
        let snap = store.snapshot().await;
        store.update_counter("c", 1).await.unwrap();
        assert_eq!(snap.counters["c"], 1);
    }
}
