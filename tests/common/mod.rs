#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tirecrm_api::{
    app_router,
    config::AppConfig,
    db::{self, DbPool},
    entities::{client, product, user},
    events::{self, EventSender},
    services::orders::{OrderItemInput, OrderPayload},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Rows every test starts with.
///
/// `head` manages `mgr_a`, `mgr_b` and the inactive `retired`.
/// `outsider` reports to nobody and `admin` is a superuser.
pub struct Seed {
    pub admin: user::Model,
    pub head: user::Model,
    pub mgr_a: user::Model,
    pub mgr_b: user::Model,
    pub outsider: user::Model,
    pub retired: user::Model,
    pub client_id: Uuid,
    /// base 1000, wholesale 800, promotional 0
    pub tire_1000: i32,
    /// base 500 only
    pub tire_500: i32,
    pub discontinued: i32,
    /// wholesale 300, no base price
    pub unpriced: i32,
}

/// Application over in-memory SQLite with the real router and migrations
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub seed: Seed,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // one connection so every query sees the same in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_idle_timeout_secs = 3600;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let seed = seed(&pool).await;

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            Some(Arc::new(EventSender::new(event_tx))),
        );
        let router = app_router(state.clone());

        Self {
            router,
            state,
            seed,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user: &user::Model) -> String {
        self.state
            .services
            .auth
            .issue_token(user.id)
            .expect("issue test token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };
        self.router_request(builder.body(body).expect("build request"))
            .await
    }

    pub async fn router_request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Authenticated request as `user`, returning status and parsed body
    pub async fn call(
        &self,
        user: &user::Model,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let token = self.token_for(user);
        let response = self.request(method, uri, body, Some(&token)).await;
        let status = response.status();
        (status, json_body(response).await)
    }

    /// Payload for the seeded client, one line per `(product_id, quantity)`
    pub fn order_payload(&self, lines: &[(i32, i32)]) -> OrderPayload {
        OrderPayload {
            client_id: self.seed.client_id,
            responsible_id: None,
            status: None,
            source: None,
            payment_method: None,
            delivery_method: None,
            price_level: None,
            is_promo: false,
            sale_number: None,
            notes: None,
            created_at: None,
            items: lines
                .iter()
                .map(|(product_id, quantity)| OrderItemInput {
                    product_id: *product_id,
                    quantity: *quantity,
                    city: None,
                })
                .collect(),
        }
    }

    /// Order for `responsible` with `status`, dated `at`
    pub async fn place_order(
        &self,
        actor: &user::Model,
        responsible: &user::Model,
        status: &str,
        at: &str,
        lines: &[(i32, i32)],
    ) -> i32 {
        let mut payload = self.order_payload(lines);
        payload.responsible_id = Some(responsible.id);
        payload.status = Some(status.to_string());
        payload.created_at = Some(ts(at));
        self.state
            .services
            .orders
            .create_order(actor, payload)
            .await
            .expect("create order")
            .order_id
    }

    pub async fn completed_order(
        &self,
        actor: &user::Model,
        responsible: &user::Model,
        at: &str,
        lines: &[(i32, i32)],
    ) -> i32 {
        self.place_order(actor, responsible, "completed", at, lines)
            .await
    }

    pub async fn set_product_price(&self, product_id: i32, price: Decimal) {
        product::ActiveModel {
            id: Set(product_id),
            price: Set(Some(price)),
            ..Default::default()
        }
        .update(&*self.state.db)
        .await
        .expect("update product price");
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    }
}

pub fn ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .expect("valid RFC 3339 timestamp")
        .with_timezone(&Utc)
}

/// Decimal from a JSON string or number
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}

async fn insert_user(
    db: &DbPool,
    username: &str,
    manager_id: Option<i32>,
    is_superuser: bool,
    active: bool,
) -> user::Model {
    let now = Utc::now();
    user::ActiveModel {
        username: Set(username.to_string()),
        email: Set(Some(format!("{username}@example.com"))),
        first_name: Set(username.to_uppercase()),
        last_name: Set("Test".to_string()),
        role: Set(if is_superuser { "admin" } else { "manager" }.to_string()),
        manager_id: Set(manager_id),
        is_superuser: Set(is_superuser),
        is_staff: Set(is_superuser),
        active: Set(active),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed user")
}

async fn insert_product(
    db: &DbPool,
    code: &str,
    price: Option<Decimal>,
    wholesale: Option<Decimal>,
    promotional: Option<Decimal>,
    is_active: bool,
) -> i32 {
    product::ActiveModel {
        code: Set(code.to_string()),
        name: Set(format!("Tire {code}")),
        price: Set(price),
        wholesale_price: Set(wholesale),
        promotional_price: Set(promotional),
        retail_price: Set(None),
        assortment_group: Set(Some("premium".to_string())),
        tire_type: Set(Some("winter".to_string())),
        branch_city: Set(Some("Almaty".to_string())),
        is_active: Set(is_active),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("seed product")
    .id
}

async fn seed(db: &DbPool) -> Seed {
    let admin = insert_user(db, "admin", None, true, true).await;
    let head = insert_user(db, "head", None, false, true).await;
    let mgr_a = insert_user(db, "mgr_a", Some(head.id), false, true).await;
    let mgr_b = insert_user(db, "mgr_b", Some(head.id), false, true).await;
    let outsider = insert_user(db, "outsider", None, false, true).await;
    let retired = insert_user(db, "retired", Some(head.id), false, false).await;

    let client_id = Uuid::new_v4();
    client::ActiveModel {
        id: Set(client_id),
        client_type: Set("individual".to_string()),
        first_name: Set(Some("Aigerim".to_string())),
        last_name: Set(Some("Nurlanova".to_string())),
        middle_name: Set(None),
        company_name: Set(None),
        phone: Set(Some("+77010000000".to_string())),
        email: Set(None),
        city: Set(Some("Astana".to_string())),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("seed client");

    let tire_1000 = insert_product(
        db,
        "HK-R5",
        Some(dec!(1000)),
        Some(dec!(800)),
        Some(dec!(0)),
        true,
    )
    .await;
    let tire_500 = insert_product(db, "NK-7", Some(dec!(500)), None, None, true).await;
    let discontinued = insert_product(db, "OLD-1", Some(dec!(100)), None, None, false).await;
    let unpriced = insert_product(db, "NP-0", None, Some(dec!(300)), None, true).await;

    Seed {
        admin,
        head,
        mgr_a,
        mgr_b,
        outsider,
        retired,
        client_id,
        tire_1000,
        tire_500,
        discontinued,
        unpriced,
    }
}
