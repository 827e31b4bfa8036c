mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{decimal, ts, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use tirecrm_api::{
    entities::{OrderSource, OrderStatus, PriceLevel},
    errors::ServiceError,
    services::order_query::OrderFilter,
};

#[tokio::test]
async fn create_snapshots_prices_and_totals() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let orders = &app.state.services.orders;

    let created = orders
        .create_order(
            &seed.mgr_a,
            app.order_payload(&[(seed.tire_1000, 4), (seed.tire_500, 2)]),
        )
        .await
        .expect("create order");

    let view = orders
        .get_order(&seed.mgr_a, created.order_id)
        .await
        .expect("get order");
    assert_eq!(view.status, OrderStatus::New);
    assert_eq!(view.price_level, PriceLevel::Retail);
    assert_eq!(view.responsible_id, Some(seed.mgr_a.id));
    assert_eq!(view.created_by, Some(seed.mgr_a.id));
    assert_eq!(view.items.len(), 2);
    assert_eq!(view.items[0].price, dec!(1000));
    assert_eq!(view.items[0].amount, dec!(4000));
    assert_eq!(view.items[0].product_code, "HK-R5");
    assert_eq!(view.items[0].segment.as_deref(), Some("premium"));
    assert_eq!(view.items[0].branch_city.as_deref(), Some("Almaty"));
    assert_eq!(view.items[1].amount, dec!(1000));
    assert_eq!(view.total_amount, dec!(5000));
    assert_eq!(view.client_name.as_deref(), Some("Nurlanova Aigerim"));
}

#[tokio::test]
async fn promo_orders_get_ten_percent_off() {
    let app = TestApp::new().await;
    let seed = &app.seed;

    let mut payload = app.order_payload(&[(seed.tire_1000, 1), (seed.tire_500, 1)]);
    payload.is_promo = true;
    let created = app
        .state
        .services
        .orders
        .create_order(&seed.mgr_a, payload)
        .await
        .expect("create promo order");

    let view = app
        .state
        .services
        .orders
        .get_order(&seed.mgr_a, created.order_id)
        .await
        .unwrap();
    assert!(view.is_promo);
    assert_eq!(view.total_amount, dec!(1350));
    // line amounts keep the undiscounted figures
    assert_eq!(view.items[0].amount, dec!(1000));
    assert_eq!(view.items[1].amount, dec!(500));
}

#[tokio::test]
async fn price_level_falls_back_to_base_price() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let orders = &app.state.services.orders;

    let mut wholesale = app.order_payload(&[(seed.tire_1000, 1), (seed.unpriced, 2)]);
    wholesale.price_level = Some("wholesale".into());
    let id = orders.create_order(&seed.mgr_a, wholesale).await.unwrap().order_id;
    let view = orders.get_order(&seed.mgr_a, id).await.unwrap();
    assert_eq!(view.items[0].price, dec!(800));
    assert_eq!(view.items[1].price, dec!(300));
    assert_eq!(view.total_amount, dec!(1400));

    // promotional price of zero counts as unset
    let mut promotional = app.order_payload(&[(seed.tire_1000, 1)]);
    promotional.price_level = Some("promotional".into());
    let id = orders.create_order(&seed.mgr_a, promotional).await.unwrap().order_id;
    let view = orders.get_order(&seed.mgr_a, id).await.unwrap();
    assert_eq!(view.items[0].price, dec!(1000));

    // no level price and no base price
    let retail = app.order_payload(&[(seed.unpriced, 1)]);
    assert_matches!(
        orders.create_order(&seed.mgr_a, retail).await,
        Err(ServiceError::ValidationError(msg)) if msg.contains("NP-0")
    );
}

#[tokio::test]
async fn order_numbers_are_sequential_and_padded() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let orders = &app.state.services.orders;

    let first = orders
        .create_order(&seed.mgr_a, app.order_payload(&[(seed.tire_500, 1)]))
        .await
        .unwrap();
    let second = orders
        .create_order(&seed.mgr_b, app.order_payload(&[(seed.tire_500, 1)]))
        .await
        .unwrap();

    assert_eq!(first.order_number, "000001");
    assert_eq!(second.order_number, "000002");
    assert_eq!(second.order_id, first.order_id + 1);

    // a deleted order's number is never reused
    orders.delete_order(&seed.mgr_b, second.order_id).await.unwrap();
    let third = orders
        .create_order(&seed.mgr_a, app.order_payload(&[(seed.tire_500, 1)]))
        .await
        .unwrap();
    assert_eq!(third.order_number, "000003");
}

#[tokio::test]
async fn catalog_price_changes_do_not_touch_existing_orders() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let orders = &app.state.services.orders;

    let old = orders
        .create_order(&seed.mgr_a, app.order_payload(&[(seed.tire_1000, 2)]))
        .await
        .unwrap();
    app.set_product_price(seed.tire_1000, dec!(1200)).await;

    let old_view = orders.get_order(&seed.mgr_a, old.order_id).await.unwrap();
    assert_eq!(old_view.items[0].price, dec!(1000));
    assert_eq!(old_view.total_amount, dec!(2000));

    // a status change does not reprice
    orders
        .set_status(&seed.mgr_a, old.order_id, "completed")
        .await
        .unwrap();
    let old_view = orders.get_order(&seed.mgr_a, old.order_id).await.unwrap();
    assert_eq!(old_view.status, OrderStatus::Completed);
    assert_eq!(old_view.total_amount, dec!(2000));

    let new = orders
        .create_order(&seed.mgr_a, app.order_payload(&[(seed.tire_1000, 2)]))
        .await
        .unwrap();
    let new_view = orders.get_order(&seed.mgr_a, new.order_id).await.unwrap();
    assert_eq!(new_view.items[0].price, dec!(1200));
    assert_eq!(new_view.total_amount, dec!(2400));
}

#[tokio::test]
async fn update_replaces_items_and_keeps_created_at() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let orders = &app.state.services.orders;

    let mut payload = app.order_payload(&[(seed.tire_1000, 1)]);
    payload.created_at = Some(ts("2025-03-10T09:00:00Z"));
    payload.source = Some("kaspi".into());
    let created = orders.create_order(&seed.mgr_a, payload).await.unwrap();

    let mut update = app.order_payload(&[(seed.tire_500, 3)]);
    update.created_at = Some(ts("2030-01-01T00:00:00Z"));
    update.notes = Some("  call before delivery ".into());
    let updated = orders
        .update_order(&seed.mgr_a, created.order_id, update)
        .await
        .unwrap();
    assert_eq!(updated.order_number, created.order_number);

    let view = orders.get_order(&seed.mgr_a, created.order_id).await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].quantity, 3);
    assert_eq!(view.total_amount, dec!(1500));
    assert_eq!(view.created_at, ts("2025-03-10T09:00:00Z"));
    assert_eq!(view.notes.as_deref(), Some("call before delivery"));
    // omitted enum fields keep their stored values
    assert_eq!(view.source, OrderSource::Kaspi);
}

#[tokio::test]
async fn invalid_orders_are_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let orders = &app.state.services.orders;

    assert_matches!(
        orders.create_order(&seed.mgr_a, app.order_payload(&[])).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        orders
            .create_order(&seed.mgr_a, app.order_payload(&[(seed.tire_500, 0)]))
            .await,
        Err(ServiceError::ValidationError(msg)) if msg.contains("items[0].quantity")
    );
    assert_matches!(
        orders
            .create_order(&seed.mgr_a, app.order_payload(&[(seed.discontinued, 1)]))
            .await,
        Err(ServiceError::ValidationError(msg)) if msg.contains("inactive")
    );
    assert_matches!(
        orders
            .create_order(&seed.mgr_a, app.order_payload(&[(9_999, 1)]))
            .await,
        Err(ServiceError::NotFound(_))
    );

    let mut bad_status = app.order_payload(&[(seed.tire_500, 1)]);
    bad_status.status = Some("shipped".into());
    assert_matches!(
        orders.create_order(&seed.mgr_a, bad_status).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut unknown_client = app.order_payload(&[(seed.tire_500, 1)]);
    unknown_client.client_id = uuid::Uuid::new_v4();
    assert_matches!(
        orders.create_order(&seed.mgr_a, unknown_client).await,
        Err(ServiceError::NotFound(_))
    );

    // no order and no sequence value was consumed
    let page = orders
        .list_orders(&seed.admin, &OrderFilter::default(), 1, 20)
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    let created = orders
        .create_order(&seed.mgr_a, app.order_payload(&[(seed.tire_500, 1)]))
        .await
        .unwrap();
    assert_eq!(created.order_number, "000001");
}

#[tokio::test]
async fn failed_update_leaves_the_order_untouched() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let orders = &app.state.services.orders;

    let created = orders
        .create_order(&seed.mgr_a, app.order_payload(&[(seed.tire_1000, 2)]))
        .await
        .unwrap();

    assert_matches!(
        orders
            .update_order(
                &seed.mgr_a,
                created.order_id,
                app.order_payload(&[(seed.tire_500, 1), (9_999, 1)]),
            )
            .await,
        Err(ServiceError::NotFound(_))
    );

    let view = orders.get_order(&seed.mgr_a, created.order_id).await.unwrap();
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].product_id, seed.tire_1000);
    assert_eq!(view.items[0].quantity, 2);
    assert_eq!(view.total_amount, dec!(2000));
    assert_eq!(view.order_number, created.order_number);
}

#[tokio::test]
async fn delete_removes_order_and_items() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let orders = &app.state.services.orders;

    let created = orders
        .create_order(&seed.mgr_a, app.order_payload(&[(seed.tire_500, 1)]))
        .await
        .unwrap();
    orders.delete_order(&seed.mgr_a, created.order_id).await.unwrap();

    assert_matches!(
        orders.get_order(&seed.mgr_a, created.order_id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        orders.delete_order(&seed.mgr_a, created.order_id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn list_filters_by_status_family_and_search() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let at = "2025-05-05T12:00:00Z";

    let done = app.completed_order(&seed.admin, &seed.mgr_a, at, &[(seed.tire_1000, 1)]).await;
    let dropped = app
        .place_order(&seed.admin, &seed.mgr_a, "cancel_no_answer", at, &[(seed.tire_500, 1)])
        .await;
    let refunded = app
        .place_order(&seed.admin, &seed.mgr_b, "refund", at, &[(seed.tire_500, 1)])
        .await;

    let orders = &app.state.services.orders;
    let cancelled = orders
        .list_orders(
            &seed.admin,
            &OrderFilter {
                status: Some("cancelled".into()),
                ..Default::default()
            },
            1,
            20,
        )
        .await
        .unwrap();
    let ids: Vec<i32> = cancelled.items.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![dropped]);

    let by_code = orders
        .list_orders(
            &seed.admin,
            &OrderFilter {
                search: Some("hk-r5".into()),
                ..Default::default()
            },
            1,
            20,
        )
        .await
        .unwrap();
    assert_eq!(by_code.items.iter().map(|o| o.id).collect::<Vec<_>>(), vec![done]);

    let percent = orders
        .list_orders(
            &seed.admin,
            &OrderFilter {
                search: Some("%".into()),
                ..Default::default()
            },
            1,
            20,
        )
        .await
        .unwrap();
    assert_eq!(percent.total, 0);

    let by_manager = orders
        .list_orders(
            &seed.admin,
            &OrderFilter {
                manager: Some(seed.mgr_b.id),
                ..Default::default()
            },
            1,
            20,
        )
        .await
        .unwrap();
    assert_eq!(by_manager.items.iter().map(|o| o.id).collect::<Vec<_>>(), vec![refunded]);

    let paged = orders
        .list_orders(&seed.admin, &OrderFilter::default(), 2, 2)
        .await
        .unwrap();
    assert_eq!(paged.total, 3);
    assert_eq!(paged.total_pages, 2);
    assert_eq!(paged.items.len(), 1);
}

#[tokio::test]
async fn order_lifecycle_over_http() {
    let app = TestApp::new().await;
    let seed = &app.seed;
    let client_id = seed.client_id;

    let (status, body) = app
        .call(
            &seed.mgr_a,
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "client_id": client_id,
                "payment_method": "kaspi",
                "is_promo": true,
                "items": [
                    { "product_id": seed.tire_1000, "quantity": 1 },
                    { "product_id": seed.tire_500, "quantity": 1, "city": "Shymkent" }
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order_id = body["data"]["order_id"].as_i64().unwrap();
    assert_eq!(body["data"]["order_number"], "000001");

    let (status, body) = app
        .call(&seed.mgr_a, Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["data"]["total_amount"]), dec!(1350));
    assert_eq!(body["data"]["payment_method"], "kaspi");
    assert_eq!(body["data"]["items"][1]["branch_city"], "Shymkent");

    let (status, body) = app
        .call(
            &seed.mgr_a,
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "completed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");

    let (status, _) = app
        .call(
            &seed.mgr_a,
            Method::PUT,
            &format!("/api/v1/orders/{order_id}/status"),
            Some(json!({ "status": "lost" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .call(&seed.mgr_a, Method::GET, "/api/v1/orders?status=completed", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);

    let (status, body) = app
        .call(&seed.mgr_a, Method::DELETE, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Order deleted");

    let (status, _) = app
        .call(&seed.mgr_a, Method::GET, &format!("/api/v1/orders/{order_id}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
