use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers;
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<Arc<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Entity upsert
        .route("/v1/api/entity", post(handlers::create_entity::<S>))
        // Instance reads
        .route(
            "/v1/api/entity/instances",
            get(handlers::list_instances::<S>),
        )
        .route(
            "/v1/api/entity/instances/latest",
            get(handlers::latest_instances::<S>),
        )
        .route(
            "/v1/api/entity/instances/historical",
            get(handlers::historical_instances::<S>),
        )
}
