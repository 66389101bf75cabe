//! Host contract over HTTP
//!
//! Exposes the table schema and one-shot table refreshes so a host that
//! cannot embed the connector can drive it remotely.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    response::Json,
};

use crate::connectors::{
    RefreshOutcome, RefreshRequest, TableId, TableSchema, all_schemas, refresh_table, table_schema,
};
use crate::error::{ApiError, ErrorType};
use crate::server::AppState;

/// Column schema of every table
#[utoipa::path(
    get,
    path = "/api/schema",
    responses(
        (status = 200, description = "Schemas of the builds, commits and jobs tables", body = Vec<TableSchema>)
    ),
    tag = "connector"
)]
pub async fn list_schemas() -> Json<Vec<TableSchema>> {
    Json(all_schemas())
}

/// Column schema of one table
#[utoipa::path(
    get,
    path = "/api/schema/{table}",
    params(
        ("table" = String, Path, description = "Table identifier: builds, commits or jobs")
    ),
    responses(
        (status = 200, description = "Table schema", body = TableSchema),
        (status = 404, description = "Unknown table", body = ApiError)
    ),
    tag = "connector"
)]
pub async fn get_schema(Path(table): Path<String>) -> Result<Json<TableSchema>, ApiError> {
    let table: TableId = table
        .parse()
        .map_err(|_| ApiError::from(ErrorType::NotFound))?;
    Ok(Json(table_schema(table)))
}

/// Run one table refresh
///
/// Failures are reported the way the host expects them: an `abort_reason`
/// and no rows.
#[utoipa::path(
    post,
    path = "/api/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rows registered for the table, or the abort reason", body = RefreshOutcome),
        (status = 400, description = "Malformed request body", body = ApiError)
    ),
    tag = "connector"
)]
pub async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Json<RefreshOutcome>, ApiError> {
    let Json(request) = payload?;
    let outcome = refresh_table(&state.config.travis, request).await;
    Ok(Json(outcome))
}
