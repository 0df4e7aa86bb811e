//! The storage capability shared by every backend.

use std::future::Future;
use std::pin::Pin;

use pulse_core::{MetricChange, MetricKind, MetricUpdate, MetricValue, Snapshot};

use crate::error::StateResult;

/// Boxed future returned by [`MetricStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StateResult<T>> + Send + 'a>>;

/// Metric storage with gauge-overwrite and counter-accumulate semantics.
///
/// Implementations are shared across request tasks behind an
/// `Arc<dyn MetricStore>`. Every method is cancel-safe: dropping the
/// returned future never leaves a batch partially applied.
pub trait MetricStore: Send + Sync {
    /// Short backend name for logs (`"memory"`, `"sql"`).
    fn backend(&self) -> &'static str;

    /// Overwrite a gauge.
    fn update_gauge<'a>(&'a self, id: &'a str, value: f64) -> StoreFuture<'a, ()>;

    /// Add `delta` to a counter and return the new total.
    fn update_counter<'a>(&'a self, id: &'a str, delta: i64) -> StoreFuture<'a, i64>;

    /// Current value, or `None` if the metric has never been written.
    fn get_value<'a>(&'a self, kind: MetricKind, id: &'a str)
    -> StoreFuture<'a, Option<MetricValue>>;

    /// Point-in-time copy of every metric.
    fn get_all(&self) -> StoreFuture<'_, Snapshot>;

    /// Apply every update or none of them. Later gauge updates for the
    /// same id overwrite earlier ones.
    fn update_batch<'a>(&'a self, batch: &'a [MetricUpdate]) -> StoreFuture<'a, ()>;

    /// Check that the backend is reachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// Apply a single update through the store, returning the stored value.
pub async fn apply_update(
    store: &dyn MetricStore,
    update: &MetricUpdate,
) -> StateResult<MetricValue> {
    match update.change {
        MetricChange::Gauge(v) => {
            store.update_gauge(&update.id, v).await?;
            Ok(MetricValue::Gauge(v))
        }
        MetricChange::Counter(d) => {
            let total = store.update_counter(&update.id, d).await?;
            Ok(MetricValue::Counter(total))
        }
    }
}
