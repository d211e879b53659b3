use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse, response::sse::Event as SseEvent};

use stockroom_auth::Identity;

use crate::app::services::{self, AppServices};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(identity): Extension<Identity>) -> impl IntoResponse {
    Json(serde_json::json!({
        "user_id": identity.user_id.to_string(),
        "email": identity.email,
    }))
}

/// Server-sent events, one per committed ledger entry.
pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Sse<impl tokio_stream::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    services::movement_sse_stream(services)
}
