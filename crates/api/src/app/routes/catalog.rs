use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
};

use stockroom_core::{LocationId, MaterialId};
use stockroom_inventory::{NewLocation, NewMaterial};

use crate::app::dto;
use crate::app::errors::ApiError;
use crate::app::services::AppServices;

pub fn materials_router() -> Router {
    Router::new()
        .route("/", get(list_materials).post(create_material))
        .route("/barcode/:code", get(material_by_barcode))
        .route("/:id", delete(remove_material))
}

pub fn locations_router() -> Router {
    Router::new()
        .route("/", get(list_locations).post(create_location))
        .route("/:id", delete(remove_location))
}

pub async fn create_material(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewMaterial>,
) -> Result<impl IntoResponse, ApiError> {
    let material = services.catalog.create_material(body)?;
    Ok((StatusCode::CREATED, Json(material)))
}

pub async fn list_materials(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> impl IntoResponse {
    Json(services.catalog.list_materials(query.pagination()))
}

pub async fn material_by_barcode(
    Extension(services): Extension<Arc<AppServices>>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(services.catalog.find_by_barcode(&code)?))
}

pub async fn remove_material(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: MaterialId = id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid material id".to_string()))?;
    let removed = services
        .run_blocking(move |s| Ok(s.catalog.remove_material(id, &s.ledger)?))
        .await?;
    Ok(Json(removed))
}

pub async fn create_location(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewLocation>,
) -> Result<impl IntoResponse, ApiError> {
    let location = services.catalog.create_location(body)?;
    Ok((StatusCode::CREATED, Json(location)))
}

pub async fn list_locations(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> impl IntoResponse {
    Json(services.catalog.list_locations(query.pagination()))
}

pub async fn remove_location(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id: LocationId = id
        .parse()
        .map_err(|_| ApiError::BadRequest("invalid location id".to_string()))?;
    let removed = services
        .run_blocking(move |s| Ok(s.catalog.remove_location(id, &s.ledger)?))
        .await?;
    Ok(Json(removed))
}
