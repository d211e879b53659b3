use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    response::IntoResponse,
    routing::get,
};

use stockroom_core::{LocationId, MaterialId};

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_stock))
        .route("/low", get(low_stock))
        .route("/verify", get(verify_stock))
        .route("/:material_id/:location_id", get(current_stock))
}

pub async fn list_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::StockQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let body = services
        .run_blocking(move |s| {
            if let Some(min) = query.min_position {
                s.aggregator.ensure_position(min)?;
            }
            let items = s.aggregator.all_stock()?;
            Ok(dto::StockListResponse {
                position: s.aggregator.position(),
                items,
            })
        })
        .await?;
    Ok(Json(body))
}

pub async fn low_stock(Extension(services): Extension<Arc<AppServices>>) -> Result<impl IntoResponse, ApiError> {
    let rows = services.run_blocking(|s| Ok(s.monitor.low_stock()?)).await?;
    Ok(Json(rows))
}

pub async fn verify_stock(Extension(services): Extension<Arc<AppServices>>) -> Result<impl IntoResponse, ApiError> {
    let report = services.run_blocking(|s| Ok(s.aggregator.verify()?)).await?;
    if !report.is_consistent() {
        tracing::warn!(
            mismatches = report.mismatches.len(),
            negative = report.negative.len(),
            "stock view disagrees with ledger replay"
        );
    }
    Ok(Json(report))
}

pub async fn current_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Path((material_id, location_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let material_id: MaterialId = material_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid material id".to_string()))?;
    let location_id: LocationId = location_id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid location id".to_string()))?;

    let body = services
        .run_blocking(move |s| {
            let current_stock = s.aggregator.current_stock(material_id, location_id)?;
            Ok(dto::CurrentStockResponse {
                material_id,
                location_id,
                current_stock,
                position: s.aggregator.position(),
            })
        })
        .await?;
    Ok(Json(body))
}
