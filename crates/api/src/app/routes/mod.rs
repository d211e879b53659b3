use axum::{Router, routing::get};

pub mod catalog;
pub mod movements;
pub mod stock;
pub mod system;

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/stream", get(system::stream))
        .nest("/stock", stock::router())
        .nest("/movements", movements::router())
        .nest("/materials", catalog::materials_router())
        .nest("/locations", catalog::locations_router())
}
