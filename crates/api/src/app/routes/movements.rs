use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use uuid::Uuid;

use stockroom_auth::Identity;
use stockroom_infra::MovementRequest;

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

/// Client retry token; a body `idempotency_key` wins over the header.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

pub fn router() -> Router {
    Router::new().route("/", get(history).post(record_movement))
}

pub async fn record_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
    Json(mut body): Json<MovementRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.idempotency_key.is_none() {
        if let Some(raw) = headers.get(IDEMPOTENCY_HEADER) {
            let token = raw
                .to_str()
                .ok()
                .and_then(|v| Uuid::parse_str(v.trim()).ok())
                .ok_or_else(|| ApiError::BadRequest(format!("{IDEMPOTENCY_HEADER} must be a UUID")))?;
            body.idempotency_key = Some(token);
        }
    }

    let outcome = services
        .run_blocking(move |s| Ok(s.recorder.record(body, Some(&identity))?))
        .await?;

    let status = if outcome.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = services
        .run_blocking(move |s| {
            let filter = query.filter();
            Ok(s.history.page(query.page.unwrap_or(1), query.page_size, &filter)?)
        })
        .await?;
    Ok(Json(page))
}
