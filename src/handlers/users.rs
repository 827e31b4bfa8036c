use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, put},
    Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::AuthUser, errors::ServiceError, services::hierarchy::UserSummary, ApiResponse, AppState,
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetManagerRequest {
    /// New manager, or null to detach the user
    pub manager_id: Option<i32>,
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(me))
        .route("/me/subordinates", get(subordinates))
        .route("/:id/manager-chain", get(manager_chain))
        .route("/:id/manager", put(set_manager))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    summary = "Current user",
    responses(
        (status = 200, description = "The authenticated user", body = ApiResponse<UserSummary>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn me(auth_user: AuthUser) -> Result<Json<ApiResponse<UserSummary>>, ServiceError> {
    Ok(Json(ApiResponse::success(UserSummary::from(auth_user.0))))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me/subordinates",
    summary = "Direct reports",
    responses(
        (status = 200, description = "Active direct reports of the caller", body = ApiResponse<Vec<UserSummary>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn subordinates(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<UserSummary>>>, ServiceError> {
    let users = state
        .services
        .hierarchy
        .subordinates(auth_user.user())
        .await?;
    Ok(Json(ApiResponse::success(users)))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/manager-chain",
    summary = "Chain of command",
    params(("id" = i32, Path, description = "User id")),
    responses(
        (status = 200, description = "Managers above the user, nearest first", body = ApiResponse<Vec<UserSummary>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "User is outside the caller's visibility", body = crate::errors::ErrorResponse),
        (status = 404, description = "User not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn manager_chain(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<UserSummary>>>, ServiceError> {
    let chain = state
        .services
        .hierarchy
        .manager_chain(auth_user.user(), id)
        .await?;
    Ok(Json(ApiResponse::success(chain)))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/manager",
    summary = "Set manager",
    description = "Superuser only. Self-management and cycles are rejected",
    params(("id" = i32, Path, description = "User id")),
    request_body = SetManagerRequest,
    responses(
        (status = 200, description = "Updated user", body = ApiResponse<UserSummary>),
        (status = 400, description = "Would create a cycle", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not a superuser", body = crate::errors::ErrorResponse),
        (status = 404, description = "User or manager not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn set_manager(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
    Json(request): Json<SetManagerRequest>,
) -> Result<Json<ApiResponse<UserSummary>>, ServiceError> {
    let user = state
        .services
        .hierarchy
        .set_manager(auth_user.user(), id, request.manager_id)
        .await?;
    Ok(Json(ApiResponse::success(user)))
}
