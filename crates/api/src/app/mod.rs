//! HTTP application wiring (axum router + service wiring).
//!
//! - `services.rs`: ledger store, catalog, stock views, recorder, workers
//! - `routes/`: HTTP handlers, one file per area
//! - `dto.rs`: query and response shapes
//! - `errors.rs`: JSON error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use stockroom_auth::Hs256JwtValidator;
use stockroom_infra::InventoryConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router.
pub async fn build_app(config: &InventoryConfig) -> anyhow::Result<Router> {
    Ok(build_app_with_services(config).await?.0)
}

/// Router plus the services behind it, so the caller can stop the workers.
pub async fn build_app_with_services(config: &InventoryConfig) -> anyhow::Result<(Router, Arc<services::AppServices>)> {
    let services = Arc::new(services::build_services(config).await?);
    Ok((router(services.clone(), &config.auth.jwt_secret), services))
}

pub fn router(services: Arc<services::AppServices>, jwt_secret: &str) -> Router {
    let jwt = Arc::new(Hs256JwtValidator::new(jwt_secret.as_bytes()));
    let auth_state = middleware::AuthState { jwt };

    // Everything except /health needs an identity.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn_with_state(auth_state, middleware::auth_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}
