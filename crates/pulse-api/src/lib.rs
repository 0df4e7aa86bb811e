//! pulse-api — HTTP surface of the Pulse server.
//!
//! Ingest routes sit behind [`ingest::open_envelope`], which checks the
//! trusted subnet and unwraps the request envelope before a handler sees
//! the body. Every response is signed when a shared key is configured.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/update/{kind}/{id}/{value}` | Path-encoded single update |
//! | POST | `/update/` | Single JSON wire record |
//! | POST | `/updates/` | JSON batch, applied atomically |
//! | GET | `/value/{kind}/{id}` | Current value as text |
//! | POST | `/value/` | Current value as a JSON wire record |
//! | GET | `/` | HTML table of every metric |
//! | GET | `/ping` | Backend reachability |

pub mod error;
pub mod handlers;
pub mod ingest;

use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use pulse_core::Subnet;
use pulse_envelope::Opener;
use pulse_state::{MetricStore, SnapshotPersister};

pub use error::ApiError;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn MetricStore>,
    /// Present only for the memory backend.
    pub persister: Option<Arc<SnapshotPersister>>,
    pub opener: Arc<Opener>,
    pub trusted_subnet: Option<Subnet>,
}

impl ApiState {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self {
            store,
            persister: None,
            opener: Arc::new(Opener::new()),
            trusted_subnet: None,
        }
    }

    pub fn with_persister(mut self, persister: Option<Arc<SnapshotPersister>>) -> Self {
        self.persister = persister;
        self
    }

    pub fn with_opener(mut self, opener: Opener) -> Self {
        self.opener = Arc::new(opener);
        self
    }

    pub fn with_trusted_subnet(mut self, subnet: Option<Subnet>) -> Self {
        self.trusted_subnet = subnet;
        self
    }

    /// Run after every successful mutation.
    pub(crate) async fn after_write(&self) {
        if let Some(persister) = &self.persister {
            persister.after_write().await;
        }
    }
}

/// Build the complete router.
pub fn build_router(state: ApiState) -> Router {
    let ingest_routes = Router::new()
        .route("/update/{kind}/{id}/{value}", post(handlers::update_from_path))
        .route("/update/", post(handlers::update_json))
        .route("/updates/", post(handlers::update_batch))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            ingest::open_envelope,
        ));

    Router::new()
        .merge(ingest_routes)
        .route("/value/{kind}/{id}", get(handlers::get_value))
        .route("/value/", post(handlers::get_value_json))
        .route("/", get(handlers::list_metrics))
        .route("/ping", get(handlers::ping))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            ingest::sign_response,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
