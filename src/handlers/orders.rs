use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::{
        order_query::OrderFilter,
        orders::{OrderPayload, OrderRef, OrderStatusRef, OrderStatusRequest, OrderView},
    },
    ApiResponse, AppState, PaginatedResponse,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    /// Page number, starting at 1
    pub page: Option<u64>,
    /// One of 10, 25, 50, 100
    pub per_page: Option<u64>,
}

pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/:id", get(get_order).put(update_order).delete(delete_order))
        .route("/:id/status", put(set_order_status))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Orders whose responsible manager is visible to the caller, newest first",
    params(PageParams, OrderFilter),
    responses(
        (status = 200, description = "Orders retrieved", body = ApiResponse<PaginatedResponse<OrderView>>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid filter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(page): Query<PageParams>,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderView>>>, ServiceError> {
    let per_page = state.config.page_size(page.per_page);
    let orders = state
        .services
        .orders
        .list_orders(auth_user.user(), &filter, page.page.unwrap_or(1), per_page)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Snapshot prices, assign the next order number and refresh plan progress",
    request_body = OrderPayload,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderRef>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Responsible user is not manageable by the caller", body = crate::errors::ErrorResponse),
        (status = 404, description = "Client, product or user not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<OrderPayload>,
) -> Result<(StatusCode, Json<ApiResponse<OrderRef>>), ServiceError> {
    let created = state
        .services
        .orders
        .create_order(auth_user.user(), payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with items", body = ApiResponse<OrderView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Order is outside the caller's visibility", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<OrderView>>, ServiceError> {
    let order = state.services.orders.get_order(auth_user.user(), id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}",
    summary = "Update order",
    description = "Replace the order's items and fields; prices are re-snapshotted",
    params(("id" = i32, Path, description = "Order id")),
    request_body = OrderPayload,
    responses(
        (status = 200, description = "Order updated", body = ApiResponse<OrderRef>),
        (status = 400, description = "Invalid request data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn update_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<OrderPayload>,
) -> Result<Json<ApiResponse<OrderRef>>, ServiceError> {
    let updated = state
        .services
        .orders
        .update_order(auth_user.user(), id, payload)
        .await?;
    Ok(Json(ApiResponse::success(updated)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    summary = "Set order status",
    params(("id" = i32, Path, description = "Order id")),
    request_body = OrderStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = ApiResponse<OrderStatusRef>),
        (status = 400, description = "Unknown status", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn set_order_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
    Json(request): Json<OrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderStatusRef>>, ServiceError> {
    let changed = state
        .services
        .orders
        .set_status(auth_user.user(), id, &request.status)
        .await?;
    Ok(Json(ApiResponse::success(changed)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    summary = "Delete order",
    params(("id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order deleted"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    state.services.orders.delete_order(auth_user.user(), id).await?;
    Ok(Json(ApiResponse::message("Order deleted")))
}
