//! Relational metric store over sqlx's `Any` driver.
//!
//! The same statements run against PostgreSQL (`postgres://...`) and
//! SQLite (`sqlite://...`, `sqlite::memory:`). Counter increments happen
//! inside a single upsert statement, and a batch runs inside a single
//! transaction that is only committed once every statement succeeded.

use std::time::Duration;

use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::error::ErrorKind;
use sqlx::{AnyPool, Row};
use tracing::debug;

use pulse_core::{MetricChange, MetricKind, MetricUpdate, MetricValue, Snapshot};

use crate::error::{StateError, StateResult};
use crate::schema::*;
use crate::store::{MetricStore, StoreFuture};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// PostgreSQL `numeric_value_out_of_range`.
const PG_OUT_OF_RANGE: &str = "22003";

/// Map a failed counter write, reporting overflow as [`StateError::Overflow`].
fn counter_write_error(id: &str, e: sqlx::Error) -> StateError {
    let overflow = e.as_database_error().is_some_and(|db| {
        matches!(db.kind(), ErrorKind::CheckViolation)
            || db.code().as_deref() == Some(PG_OUT_OF_RANGE)
    });
    if overflow {
        StateError::Overflow { id: id.to_string() }
    } else {
        StateError::Write(e.to_string())
    }
}

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-pooled SQL store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
}

impl SqlStore {
    /// Connect to `dsn` and create the tables if they don't exist yet.
    pub async fn connect(dsn: &str) -> StateResult<Self> {
        let options = AnyPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT);
        Self::connect_with(options, dsn).await
    }

    /// Create an ephemeral SQLite-backed store (for testing).
    ///
    /// A single connection that never expires keeps the in-memory database alive.
    pub async fn open_in_memory() -> StateResult<Self> {
        let options = AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(ACQUIRE_TIMEOUT);
        Self::connect_with(options, "sqlite::memory:").await
    }

    async fn connect_with(options: AnyPoolOptions, dsn: &str) -> StateResult<Self> {
        install_default_drivers();
        let pool = options.connect(dsn).await.map_err(map_err!(Open))?;
        let store = Self {
            pool,
            dialect: Dialect::from_dsn(dsn),
        };
        store.ensure_tables().await?;
        debug!(driver = dsn.split(':').next().unwrap_or(""), "sql store opened");
        Ok(store)
    }

    /// Underlying pool, for administrative statements.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn ensure_tables(&self) -> StateResult<()> {
        sqlx::query(CREATE_GAUGE)
            .execute(&self.pool)
            .await
            .map_err(map_err!(Schema))?;
        sqlx::query(self.dialect.create_counter())
            .execute(&self.pool)
            .await
            .map_err(map_err!(Schema))?;
        Ok(())
    }

    async fn read_all(&self) -> StateResult<Snapshot> {
        let mut tx = self.pool.begin().await.map_err(map_err!(Transaction))?;

        let gauge_rows = sqlx::query(SELECT_ALL_GAUGES)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_err!(Read))?;
        let counter_rows = sqlx::query(SELECT_ALL_COUNTERS)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_err!(Read))?;
        tx.commit().await.map_err(map_err!(Transaction))?;

        let mut snapshot = Snapshot::default();
        for row in gauge_rows {
            let id: String = row.try_get(0).map_err(map_err!(Read))?;
            let value: f64 = row.try_get(1).map_err(map_err!(Read))?;
            snapshot.gauges.insert(id, value);
        }
        for row in counter_rows {
            let id: String = row.try_get(0).map_err(map_err!(Read))?;
            let total: i64 = row.try_get(1).map_err(map_err!(Read))?;
            snapshot.counters.insert(id, total);
        }
        Ok(snapshot)
    }

    async fn apply_batch(&self, batch: &[MetricUpdate]) -> StateResult<()> {
        let mut tx = self.pool.begin().await.map_err(map_err!(Transaction))?;
        for update in batch {
            let id = update.id.as_str();
            let result = match update.change {
                MetricChange::Gauge(value) => sqlx::query(UPSERT_GAUGE)
                    .bind(id)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_err!(Write)),
                MetricChange::Counter(delta) => sqlx::query(UPSERT_COUNTER)
                    .bind(id)
                    .bind(delta)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| counter_write_error(id, e)),
            };
            // An early return drops `tx`, which rolls the whole batch back.
            if let Err(e) = result {
                debug!(id, error = %e, "batch statement failed, rolling back");
                return Err(e);
            }
        }
        tx.commit().await.map_err(map_err!(Transaction))?;
        debug!(updates = batch.len(), "batch committed");
        Ok(())
    }
}

impl MetricStore for SqlStore {
    fn backend(&self) -> &'static str {
        "sql"
    }

    fn update_gauge<'a>(&'a self, id: &'a str, value: f64) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(UPSERT_GAUGE)
                .bind(id)
                .bind(value)
                .execute(&self.pool)
                .await
                .map_err(map_err!(Write))?;
            Ok(())
        })
    }

    fn update_counter<'a>(&'a self, id: &'a str, delta: i64) -> StoreFuture<'a, i64> {
        Box::pin(async move {
            let row = sqlx::query(UPSERT_COUNTER)
                .bind(id)
                .bind(delta)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| counter_write_error(id, e))?;
            row.try_get::<i64, _>(0).map_err(map_err!(Read))
        })
    }

    fn get_value<'a>(
        &'a self,
        kind: MetricKind,
        id: &'a str,
    ) -> StoreFuture<'a, Option<MetricValue>> {
        Box::pin(async move {
            let statement = match kind {
                MetricKind::Gauge => SELECT_GAUGE,
                MetricKind::Counter => SELECT_COUNTER,
            };
            let row = sqlx::query(statement)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_err!(Read))?;
            let Some(row) = row else {
                return Ok(None);
            };
            let value = match kind {
                MetricKind::Gauge => MetricValue::Gauge(row.try_get(0).map_err(map_err!(Read))?),
                MetricKind::Counter => {
                    MetricValue::Counter(row.try_get(0).map_err(map_err!(Read))?)
                }
            };
            Ok(Some(value))
        })
    }

    fn get_all(&self) -> StoreFuture<'_, Snapshot> {
        Box::pin(self.read_all())
    }

    fn update_batch<'a>(&'a self, batch: &'a [MetricUpdate]) -> StoreFuture<'a, ()> {
        Box::pin(self.apply_batch(batch))
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(PING)
                .execute(&self.pool)
                .await
                .map_err(map_err!(Read))?;
            Ok(())
        })
    }
}
