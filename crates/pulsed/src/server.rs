//! Server assembly: storage, snapshot persistence, envelope keys, HTTP.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info};

use pulse_api::{build_router, ApiState};
use pulse_core::ServerConfig;
use pulse_envelope::{Decryptor, Opener, Signer};
use pulse_state::{snapshot, MemoryStore, MetricStore, SnapshotPersister, SqlStore};

/// Storage chosen from configuration.
struct Backend {
    store: Arc<dyn MetricStore>,
    persister: Option<Arc<SnapshotPersister>>,
}

async fn open_backend(config: &ServerConfig) -> anyhow::Result<Backend> {
    if let Some(dsn) = &config.database_dsn {
        let sql = SqlStore::connect(dsn)
            .await
            .context("connecting to database")?;
        return Ok(Backend {
            store: Arc::new(sql),
            persister: None,
        });
    }

    let memory = MemoryStore::new();
    let path = &config.file_storage_path;
    if config.restore {
        snapshot::restore(&memory, path).await;
    }
    let persister = SnapshotPersister::new(memory.clone(), path, config.store_interval());
    Ok(Backend {
        store: Arc::new(memory),
        persister: Some(Arc::new(persister)),
    })
}

fn build_opener(config: &ServerConfig) -> anyhow::Result<Opener> {
    let decryptor = config
        .crypto_key
        .as_deref()
        .map(Decryptor::from_pem_file)
        .transpose()
        .context("loading private key")?;
    Ok(Opener::new()
        .with_signer(config.key.as_deref().map(Signer::new))
        .with_decryptor(decryptor))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
}

/// Run the server until CTRL+C.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let opener = build_opener(&config)?;
    let subnet = config.subnet()?;
    let backend = open_backend(&config).await?;
    info!(
        backend = backend.store.backend(),
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        trusted_subnet = ?config.trusted_subnet,
        "metric store ready"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Snapshot loop, memory backend only.
    let persister_handle = backend.persister.clone().map(|persister| {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { persister.run(rx).await })
    });

    // ── Start API server ───────────────────────────────────────

    let state = ApiState::new(backend.store)
        .with_persister(backend.persister)
        .with_opener(opener)
        .with_trusted_subnet(subnet);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("binding {}", config.address))?;
    info!(addr = %listener.local_addr()?, "pulse server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Wait for the final snapshot.
    if let Some(handle) = persister_handle {
        let _ = handle.await;
    }

    info!("pulse server stopped");
    Ok(())
}
