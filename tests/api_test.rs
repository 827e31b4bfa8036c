mod common;

use axum::http::{header, Method, Request, StatusCode};
use axum::body::Body;
use common::{json_body, TestApp};
use tirecrm_api::{auth::AuthService, request_id::REQUEST_ID_HEADER, services::analytics::CSV_HEADER};

#[tokio::test]
async fn health_and_status_are_public() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["checks"]["database"], "healthy");

    let response = app.request(Method::GET, "/api/v1/status", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["service"], "tirecrm-api");
    assert_eq!(body["data"]["environment"], "test");
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some("not-a-jwt"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // signed with another key
    let foreign = AuthService::new("another_secret_key_that_is_long_enough_123", "tirecrm-api", 3600)
        .issue_token(app.seed.admin.id)
        .unwrap();
    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&foreign))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // deactivated accounts lose access even with a valid token
    let retired = app.token_for(&app.seed.retired);
    let response = app
        .request(Method::GET, "/api/v1/users/me", None, Some(&retired))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = app.token_for(&app.seed.mgr_a);
    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn request_id_is_echoed_or_generated() {
    let app = TestApp::new().await;

    let response = app
        .router_request(
            Request::builder()
                .uri("/api/v1/health")
                .header(REQUEST_ID_HEADER, "trace-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(
        response.headers().get(REQUEST_ID_HEADER).unwrap(),
        "trace-42"
    );
    let body = json_body(response).await;
    assert_eq!(body["meta"]["request_id"], "trace-42");

    let response = app.request(Method::GET, "/api/v1/health", None, None).await;
    let generated = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .expect("request id header")
        .to_str()
        .unwrap()
        .to_string();
    assert!(!generated.is_empty());
}

#[tokio::test]
async fn errors_use_the_error_envelope() {
    let app = TestApp::new().await;
    let (status, body) = app
        .call(&app.seed.admin, Method::GET, "/api/v1/orders/424242", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["message"].as_str().unwrap().contains("424242"));
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn csv_export_is_an_attachment() {
    let app = TestApp::new().await;
    let s = &app.seed;
    let id = app
        .completed_order(&s.admin, &s.mgr_a, "2025-02-03T04:05:00Z", &[(s.tire_1000, 1)])
        .await;

    let token = app.token_for(&s.head);
    let response = app
        .request(
            Method::GET,
            "/api/v1/analytics/export.csv?start=2025-02-01&end=2025-02-28",
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/csv; charset=utf-8"
    );
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"orders_report.csv\""
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some(CSV_HEADER));
    let row: Vec<&str> = lines.next().expect("one order row").split(';').collect();
    assert_eq!(row[0], format!("{:06}", id));
    assert_eq!(row[1], "2025-02-03 04:05");
    assert_eq!(row[2], "completed");
    assert_eq!(row[3], "mgr_a");
    assert_eq!(row[4], s.client_id.to_string());
    assert_eq!(row[5].parse::<rust_decimal::Decimal>().unwrap(), rust_decimal_macros::dec!(1000));
    assert_eq!(lines.next(), None);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;
    let response = app
        .request(Method::GET, "/api-docs/openapi.json", None, None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await;
    let paths = doc["paths"].as_object().expect("paths object");
    for path in [
        "/api/v1/orders",
        "/api/v1/orders/{id}/status",
        "/api/v1/plans/{id}/recalc",
        "/api/v1/plan-assignments/{id}/recalc",
        "/api/v1/analytics/export.csv",
        "/api/v1/users/{id}/manager",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}
