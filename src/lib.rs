pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use logic::{UpsertError, UpsertWorkflow};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};

use crate::config::{AppConfig, StoreBackend};
use std::sync::Arc;

/// Build the configured store and serve the API until the listener fails.
pub async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    match config.database.backend {
        StoreBackend::Postgres => {
            log::info!("Connecting to PostgreSQL...");
            let store = PostgresStore::new(&config.database_url(), config.max_connections()).await?;

            log::info!("Running database migrations...");
            store.migrate().await?;

            serve(Arc::new(store), &config).await
        }
        StoreBackend::Memory => {
            log::warn!("Using in-memory store; data is lost on shutdown");
            serve(Arc::new(MemoryStore::new()), &config).await
        }
    }
}

async fn serve<S: Store + 'static>(store: Arc<S>, config: &AppConfig) -> anyhow::Result<()> {
    use axum::serve;
    use tokio::net::TcpListener;

    let app = crate::api::routes::create_router().with_state(store);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("Data collection server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
