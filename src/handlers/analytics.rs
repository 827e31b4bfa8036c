use axum::{
    extract::{Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::analytics::{
        AnalyticsQuery, ManagerStats, Overview, ProductStats, TimeseriesPoint, CSV_FILENAME,
    },
    ApiResponse, AppState,
};

pub fn analytics_routes() -> Router<AppState> {
    Router::new()
        .route("/overview", get(overview))
        .route("/timeseries", get(timeseries))
        .route("/by-manager", get(by_manager))
        .route("/top-products", get(top_products))
        .route("/export.csv", get(export_csv))
}

#[utoipa::path(
    get,
    path = "/api/v1/analytics/overview",
    summary = "Order counters for the period",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Totals, completed and cancelled", body = ApiResponse<Overview>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "analytics"
)]
pub async fn overview(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<Overview>>, ServiceError> {
    let data = state
        .services
        .analytics
        .overview(auth_user.user(), &query)
        .await?;
    Ok(Json(ApiResponse::success(data)))
}

#[utoipa::path(
    get,
    path = "/api/v1/analytics/timeseries",
    summary = "Orders bucketed by day, week or month",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Buckets ordered by date", body = ApiResponse<Vec<TimeseriesPoint>>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "analytics"
)]
pub async fn timeseries(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<Vec<TimeseriesPoint>>>, ServiceError> {
    let data = state
        .services
        .analytics
        .timeseries(auth_user.user(), &query)
        .await?;
    Ok(Json(ApiResponse::success(data)))
}

#[utoipa::path(
    get,
    path = "/api/v1/analytics/by-manager",
    summary = "Per-manager aggregates",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Managers by revenue", body = ApiResponse<Vec<ManagerStats>>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "analytics"
)]
pub async fn by_manager(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<Vec<ManagerStats>>>, ServiceError> {
    let data = state
        .services
        .analytics
        .by_manager(auth_user.user(), &query)
        .await?;
    Ok(Json(ApiResponse::success(data)))
}

#[utoipa::path(
    get,
    path = "/api/v1/analytics/top-products",
    summary = "Best-selling products",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Products by revenue", body = ApiResponse<Vec<ProductStats>>),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "analytics"
)]
pub async fn top_products(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Json<ApiResponse<Vec<ProductStats>>>, ServiceError> {
    let data = state
        .services
        .analytics
        .top_products(auth_user.user(), &query)
        .await?;
    Ok(Json(ApiResponse::success(data)))
}

#[utoipa::path(
    get,
    path = "/api/v1/analytics/export.csv",
    summary = "Export orders as CSV",
    params(AnalyticsQuery),
    responses(
        (status = 200, description = "Semicolon separated report", content_type = "text/csv", body = String),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "analytics"
)]
pub async fn export_csv(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<Response, ServiceError> {
    let body = state
        .services
        .analytics
        .export_csv(auth_user.user(), &query)
        .await?;
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", CSV_FILENAME))
        .map_err(|e| ServiceError::InternalError(e.to_string()))?;

    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
