//! Disk snapshots for the memory backend.
//!
//! A snapshot is a pretty-printed JSON document with a `gauges` map and a
//! `counters` map. Writes go to a temporary file in the target directory,
//! are fsynced, then renamed over the target, so a crash never leaves a
//! half-written snapshot behind.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use pulse_core::Snapshot;

use crate::error::{StateError, StateResult};
use crate::memory::MemoryStore;

/// Write `snapshot` to `path` atomically.
pub async fn write_snapshot(snapshot: &Snapshot, path: &Path) -> StateResult<()> {
    let bytes =
        serde_json::to_vec_pretty(snapshot).map_err(|e| StateError::Persist(e.to_string()))?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
        .await
        .map_err(|e| StateError::Persist(e.to_string()))?
}

fn write_atomic(path: &Path, bytes: &[u8]) -> StateResult<()> {
    let persist_err = |e: std::io::Error| StateError::Persist(format!("{}: {e}", path.display()));

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(persist_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(persist_err)?;
    tmp.write_all(bytes).map_err(persist_err)?;
    tmp.as_file().sync_all().map_err(persist_err)?;
    tmp.persist(path).map_err(|e| persist_err(e.error))?;
    Ok(())
}

/// Save the store's current contents to `path`. Returns the number of metrics written.
pub async fn save(store: &MemoryStore, path: &Path) -> StateResult<usize> {
    let snapshot = store.snapshot().await;
    write_snapshot(&snapshot, path).await?;
    Ok(snapshot.len())
}

/// Read a snapshot file.
///
/// A missing or unreadable file is not an error: it is logged and `None`
/// is returned so the server starts empty.
pub async fn load(path: &Path) -> Option<Snapshot> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no snapshot file, starting empty");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot unreadable, starting empty");
            return None;
        }
    };
    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "snapshot corrupt, starting empty");
            None
        }
    }
}

/// Load `path` into `store` if the file exists and parses. Returns the
/// number of metrics restored.
pub async fn restore(store: &MemoryStore, path: &Path) -> usize {
    match load(path).await {
        Some(snapshot) => {
            let count = snapshot.len();
            store.restore(snapshot).await;
            info!(path = %path.display(), metrics = count, "snapshot restored");
            count
        }
        None => 0,
    }
}

/// Mirrors a [`MemoryStore`] to disk.
///
/// With a zero interval the ingest path calls [`after_write`] after every
/// mutation; otherwise [`run`] flushes on the interval in the background.
/// Both paths write a final snapshot on shutdown.
///
/// [`after_write`]: SnapshotPersister::after_write
/// [`run`]: SnapshotPersister::run
pub struct SnapshotPersister {
    store: MemoryStore,
    path: PathBuf,
    interval: Duration,
    /// Serializes writers so an older copy never lands after a newer one.
    write_lock: Mutex<()>,
}

impl SnapshotPersister {
    pub fn new(store: MemoryStore, path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            store,
            path: path.into(),
            interval,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_write_through(&self) -> bool {
        self.interval.is_zero()
    }

    /// Copy the store and write it out now.
    pub async fn persist_now(&self) -> StateResult<usize> {
        let _guard = self.write_lock.lock().await;
        save(&self.store, &self.path).await
    }

    /// [`persist_now`](Self::persist_now), logging instead of failing.
    pub async fn flush(&self) {
        match self.persist_now().await {
            Ok(count) => debug!(path = %self.path.display(), metrics = count, "snapshot written"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "snapshot write failed"),
        }
    }

    /// Hook for the ingest path: flushes synchronously in write-through mode.
    pub async fn after_write(&self) {
        if self.is_write_through() {
            self.flush().await;
        }
    }

    /// Run the periodic flush loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.is_write_through() {
            info!(path = %self.path.display(), "snapshot persister in write-through mode");
            let _ = shutdown.changed().await;
            self.flush().await;
            return;
        }

        info!(
            path = %self.path.display(),
            interval_secs = self.interval.as_secs(),
            "snapshot persister started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.flush().await;
                }
                _ = shutdown.changed() => {
                    info!("snapshot persister shutting down");
                    // Final snapshot before exit.
                    self.flush().await;
                    break;
                }
            }
        }
    }
}
