//! pulse-state — metric storage for the Pulse server.
//!
//! Two backends implement [`MetricStore`]:
//!
//! - [`MemoryStore`]: maps behind one lock, optionally mirrored to a JSON
//!   snapshot file by a [`SnapshotPersister`].
//! - [`SqlStore`]: PostgreSQL or SQLite through sqlx, with counter
//!   increments done as a single upsert and batches in one transaction.
//!
//! Both are `Clone + Send + Sync` and are shared as `Arc<dyn MetricStore>`.

pub mod error;
pub mod memory;
pub mod schema;
pub mod snapshot;
pub mod sql;
pub mod store;

pub use error::{StateError, StateResult};
pub use memory::MemoryStore;
pub use snapshot::SnapshotPersister;
pub use sql::SqlStore;
pub use store::{apply_update, MetricStore, StoreFuture};
