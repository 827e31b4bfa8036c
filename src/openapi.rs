use axum::{response::Json, routing::get, Router};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

use crate::{handlers, services, AppState};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tire CRM API",
        version = "0.1.0",
        description = r#"
Order ledger, sales plans and role-scoped analytics for a tire retailer.

All endpoints except `/api/v1/health` and `/api/v1/status` require a bearer token:

```
Authorization: Bearer <jwt>
```

Managers see their own orders and those of their direct reports; superusers see everything.
Requests outside the caller's visibility fail with `403`.
        "#
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "orders", description = "Order ledger"),
        (name = "plans", description = "Sales plans and progress"),
        (name = "analytics", description = "Role-scoped reports"),
        (name = "users", description = "Manager hierarchy")
    ),
    paths(
        handlers::orders::list_orders,
        handlers::orders::create_order,
        handlers::orders::get_order,
        handlers::orders::update_order,
        handlers::orders::set_order_status,
        handlers::orders::delete_order,
        handlers::plans::create_plan,
        handlers::plans::list_plans,
        handlers::plans::my_plans,
        handlers::plans::active_plans,
        handlers::plans::get_plan,
        handlers::plans::update_plan,
        handlers::plans::delete_plan,
        handlers::plans::recalc_plan,
        handlers::plans::list_assignments,
        handlers::plans::recalc_assignment,
        handlers::analytics::overview,
        handlers::analytics::timeseries,
        handlers::analytics::by_manager,
        handlers::analytics::top_products,
        handlers::analytics::export_csv,
        handlers::users::me,
        handlers::users::subordinates,
        handlers::users::manager_chain,
        handlers::users::set_manager,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::entities::OrderStatus,
        crate::entities::OrderSource,
        crate::entities::PaymentMethod,
        crate::entities::DeliveryMethod,
        crate::entities::PriceLevel,
        crate::entities::CriteriaOperator,
        services::orders::OrderPayload,
        services::orders::OrderItemInput,
        services::orders::OrderStatusRequest,
        services::orders::OrderRef,
        services::orders::OrderStatusRef,
        services::orders::OrderView,
        services::orders::OrderItemView,
        services::plans::PlanPayload,
        services::plans::AssignmentInput,
        services::plans::PlanView,
        services::plans::PlanAssignmentView,
        services::progress::AssignmentProgress,
        services::analytics::Overview,
        services::analytics::TimeseriesPoint,
        services::analytics::ManagerStats,
        services::analytics::ProductStats,
        services::hierarchy::UserSummary,
        handlers::users::SetManagerRequest,
    )),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn openapi_routes() -> Router<AppState> {
    Router::new().route("/api-docs/openapi.json", get(openapi_json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route_group() {
        let json = serde_json::to_string(&ApiDoc::openapi()).unwrap();
        assert!(json.contains("/api/v1/orders/{id}/status"));
        assert!(json.contains("/api/v1/plans/{id}/recalc"));
        assert!(json.contains("/api/v1/analytics/export.csv"));
        assert!(json.contains("/api/v1/users/{id}/manager"));
        assert!(json.contains("Bearer"));
    }
}
