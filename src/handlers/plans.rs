use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::{
        plans::{AssignmentListQuery, PlanAssignmentView, PlanListQuery, PlanPayload, PlanView},
        progress::AssignmentProgress,
    },
    ApiResponse, AppState,
};

pub fn plan_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_plans).post(create_plan))
        .route("/mine", get(my_plans))
        .route("/active", get(active_plans))
        .route("/:id", get(get_plan).put(update_plan).delete(delete_plan))
        .route("/:id/recalc", post(recalc_plan))
}

pub fn assignment_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_assignments))
        .route("/:id/recalc", post(recalc_assignment))
}

#[utoipa::path(
    post,
    path = "/api/v1/plans",
    summary = "Create plan",
    description = "Create a plan with per-manager targets; progress is filled in immediately",
    request_body = PlanPayload,
    responses(
        (status = 201, description = "Plan created", body = ApiResponse<PlanView>),
        (status = 400, description = "Invalid plan", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Manager is not assignable by the caller", body = crate::errors::ErrorResponse),
        (status = 404, description = "Manager not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn create_plan(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<PlanPayload>,
) -> Result<(StatusCode, Json<ApiResponse<PlanView>>), ServiceError> {
    let plan = state
        .services
        .plans
        .create_plan(auth_user.user(), payload)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(plan))))
}

#[utoipa::path(
    get,
    path = "/api/v1/plans",
    summary = "List plans",
    params(PlanListQuery),
    responses(
        (status = 200, description = "Visible plans", body = ApiResponse<Vec<PlanView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn list_plans(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<PlanListQuery>,
) -> Result<Json<ApiResponse<Vec<PlanView>>>, ServiceError> {
    let plans = state
        .services
        .plans
        .list_plans(auth_user.user(), &query)
        .await?;
    Ok(Json(ApiResponse::success(plans)))
}

#[utoipa::path(
    get,
    path = "/api/v1/plans/mine",
    summary = "Plans assigned to the caller",
    responses(
        (status = 200, description = "Plans with an assignment to the caller", body = ApiResponse<Vec<PlanView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn my_plans(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<PlanView>>>, ServiceError> {
    let plans = state.services.plans.my_plans(auth_user.user()).await?;
    Ok(Json(ApiResponse::success(plans)))
}

#[utoipa::path(
    get,
    path = "/api/v1/plans/active",
    summary = "Plans covering today",
    responses(
        (status = 200, description = "Visible plans active today", body = ApiResponse<Vec<PlanView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn active_plans(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<PlanView>>>, ServiceError> {
    let plans = state.services.plans.active_plans(auth_user.user()).await?;
    Ok(Json(ApiResponse::success(plans)))
}

#[utoipa::path(
    get,
    path = "/api/v1/plans/{id}",
    summary = "Get plan",
    params(("id" = i32, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan with assignments", body = ApiResponse<PlanView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Plan is outside the caller's visibility", body = crate::errors::ErrorResponse),
        (status = 404, description = "Plan not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn get_plan(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<PlanView>>, ServiceError> {
    let plan = state.services.plans.get_plan(auth_user.user(), id).await?;
    Ok(Json(ApiResponse::success(plan)))
}

#[utoipa::path(
    put,
    path = "/api/v1/plans/{id}",
    summary = "Update plan",
    description = "Replace fields and assignments, then recompute every assignment",
    params(("id" = i32, Path, description = "Plan id")),
    request_body = PlanPayload,
    responses(
        (status = 200, description = "Plan updated", body = ApiResponse<PlanView>),
        (status = 400, description = "Invalid plan", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Only the creator or a superuser may edit", body = crate::errors::ErrorResponse),
        (status = 404, description = "Plan or manager not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn update_plan(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
    Json(payload): Json<PlanPayload>,
) -> Result<Json<ApiResponse<PlanView>>, ServiceError> {
    let plan = state
        .services
        .plans
        .update_plan(auth_user.user(), id, payload)
        .await?;
    Ok(Json(ApiResponse::success(plan)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/plans/{id}",
    summary = "Delete plan",
    params(("id" = i32, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Plan deleted"),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Only the creator or a superuser may delete", body = crate::errors::ErrorResponse),
        (status = 404, description = "Plan not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn delete_plan(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    state.services.plans.delete_plan(auth_user.user(), id).await?;
    Ok(Json(ApiResponse::message("Plan deleted")))
}

#[utoipa::path(
    post,
    path = "/api/v1/plans/{id}/recalc",
    summary = "Recalculate plan progress",
    params(("id" = i32, Path, description = "Plan id")),
    responses(
        (status = 200, description = "Recomputed assignments", body = ApiResponse<Vec<AssignmentProgress>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Plan not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn recalc_plan(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<AssignmentProgress>>>, ServiceError> {
    let progress = state.services.plans.recalc_plan(auth_user.user(), id).await?;
    Ok(Json(ApiResponse::success(progress)))
}

#[utoipa::path(
    get,
    path = "/api/v1/plan-assignments",
    summary = "List plan assignments",
    params(AssignmentListQuery),
    responses(
        (status = 200, description = "Assignments of visible managers", body = ApiResponse<Vec<PlanAssignmentView>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn list_assignments(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<AssignmentListQuery>,
) -> Result<Json<ApiResponse<Vec<PlanAssignmentView>>>, ServiceError> {
    let assignments = state
        .services
        .plans
        .list_assignments(auth_user.user(), &query)
        .await?;
    Ok(Json(ApiResponse::success(assignments)))
}

#[utoipa::path(
    post,
    path = "/api/v1/plan-assignments/{id}/recalc",
    summary = "Recalculate one assignment",
    params(("id" = i32, Path, description = "Assignment id")),
    responses(
        (status = 200, description = "Recomputed progress", body = ApiResponse<AssignmentProgress>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Assignment not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "plans"
)]
pub async fn recalc_assignment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<AssignmentProgress>>, ServiceError> {
    let progress = state
        .services
        .plans
        .recalc_assignment(auth_user.user(), id)
        .await?;
    Ok(Json(ApiResponse::success(progress)))
}
