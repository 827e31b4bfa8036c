use crate::{
    db::DbPool,
    entities::{
        client, order, order_item, product, sequence, user, DeliveryMethod, Labelled,
        OrderSource, OrderStatus, PaymentMethod, PriceLevel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        hierarchy::{self, Visibility},
        order_query::{scoped_orders, OrderFilter},
        pricing, progress,
    },
    PaginatedResponse,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const ORDER_SEQUENCE: &str = "orders";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemInput {
    pub product_id: i32,
    pub quantity: i32,
    /// Branch city the item is sold from
    pub city: Option<String>,
}

/// Body of create and update. Enum fields are stored values, e.g. `completed`, `kaspi`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderPayload {
    pub client_id: Uuid,
    /// Defaults to the acting user
    pub responsible_id: Option<i32>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub payment_method: Option<String>,
    pub delivery_method: Option<String>,
    pub price_level: Option<String>,
    #[serde(default)]
    pub is_promo: bool,
    #[validate(length(max = 100, message = "sale number is too long"))]
    pub sale_number: Option<String>,
    pub notes: Option<String>,
    /// Back-dates an imported order; only honoured on create
    pub created_at: Option<DateTime<Utc>>,
    #[validate(length(min = 1, message = "at least one item is required"))]
    pub items: Vec<OrderItemInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusRequest {
    pub status: String,
}

/// Identity returned by create and update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderRef {
    pub order_id: i32,
    pub order_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusRef {
    pub order_id: i32,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub id: i32,
    pub product_id: i32,
    pub product_code: String,
    pub product_name: String,
    #[schema(value_type = String)]
    pub price: Decimal,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub segment: Option<String>,
    pub tire_type: Option<String>,
    pub branch_city: Option<String>,
}

impl From<order_item::Model> for OrderItemView {
    fn from(item: order_item::Model) -> Self {
        Self {
            id: item.id,
            product_id: item.product_id,
            product_code: item.product_code,
            product_name: item.product_name,
            price: item.price,
            quantity: item.quantity,
            amount: item.amount,
            segment: item.segment,
            tire_type: item.tire_type,
            branch_city: item.branch_city,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: i32,
    pub order_number: String,
    pub client_id: Uuid,
    pub client_name: Option<String>,
    pub responsible_id: Option<i32>,
    pub responsible_name: Option<String>,
    pub status: OrderStatus,
    pub status_label: String,
    pub source: OrderSource,
    pub payment_method: PaymentMethod,
    pub delivery_method: DeliveryMethod,
    pub price_level: PriceLevel,
    pub is_promo: bool,
    pub sale_number: Option<String>,
    pub notes: Option<String>,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub created_by: Option<i32>,
    pub updated_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

/// Parsed enum fields of a payload
#[derive(Debug)]
struct OrderAttributes {
    status: OrderStatus,
    source: OrderSource,
    payment_method: PaymentMethod,
    delivery_method: DeliveryMethod,
    price_level: PriceLevel,
}

fn parse_or<T: Labelled>(raw: &Option<String>, fallback: T) -> Result<T, ServiceError> {
    match raw.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => T::parse(value),
        None => Ok(fallback),
    }
}

/// Fields a caller may omit fall back to `base` (the defaults on create, the stored order on update)
fn parse_attributes(
    payload: &OrderPayload,
    base: &OrderAttributes,
) -> Result<OrderAttributes, ServiceError> {
    Ok(OrderAttributes {
        status: parse_or(&payload.status, base.status)?,
        source: parse_or(&payload.source, base.source)?,
        payment_method: parse_or(&payload.payment_method, base.payment_method)?,
        delivery_method: parse_or(&payload.delivery_method, base.delivery_method)?,
        price_level: parse_or(&payload.price_level, base.price_level)?,
    })
}

fn validate_payload(payload: &OrderPayload) -> Result<(), ServiceError> {
    payload.validate()?;
    let bad: Vec<String> = payload
        .items
        .iter()
        .enumerate()
        .filter(|(_, item)| item.quantity <= 0)
        .map(|(idx, _)| format!("items[{}].quantity: must be greater than zero", idx))
        .collect();
    if !bad.is_empty() {
        return Err(ServiceError::ValidationError(bad.join("; ")));
    }
    Ok(())
}

/// Snapshot each requested product into an unsaved item, returning the items and the order total
async fn build_items<C: ConnectionTrait>(
    db: &C,
    inputs: &[OrderItemInput],
    level: PriceLevel,
    is_promo: bool,
) -> Result<(Vec<order_item::ActiveModel>, Decimal), ServiceError> {
    let ids: Vec<i32> = inputs.iter().map(|i| i.product_id).collect();
    let products: HashMap<i32, product::Model> = product::Entity::find()
        .filter(product::Column::Id.is_in(ids))
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut items = Vec::with_capacity(inputs.len());
    let mut amounts = Vec::with_capacity(inputs.len());
    for input in inputs {
        let product = products
            .get(&input.product_id)
            .ok_or_else(|| ServiceError::not_found("Product", input.product_id))?;
        if !product.is_active {
            return Err(ServiceError::ValidationError(format!(
                "items: product {} is inactive",
                product.code
            )));
        }

        let price = pricing::resolve_price(product, level)?;
        let amount = pricing::line_amount(price, input.quantity);
        amounts.push(amount);

        let city = input
            .city
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .or_else(|| product.branch_city.clone());

        items.push(order_item::ActiveModel {
            product_id: Set(product.id),
            product_code: Set(product.code.clone()),
            product_name: Set(product.name.clone()),
            price: Set(price),
            quantity: Set(input.quantity),
            amount: Set(amount),
            segment: Set(product.assortment_group.clone()),
            tire_type: Set(product.tire_type.clone()),
            branch_city: Set(city),
            ..Default::default()
        });
    }

    Ok((items, pricing::order_total(amounts, is_promo)))
}

async fn insert_items<C: ConnectionTrait>(
    db: &C,
    order_id: i32,
    items: Vec<order_item::ActiveModel>,
) -> Result<(), ServiceError> {
    let items: Vec<order_item::ActiveModel> = items
        .into_iter()
        .map(|mut item| {
            item.order_id = Set(order_id);
            item
        })
        .collect();
    order_item::Entity::insert_many(items).exec(db).await?;
    Ok(())
}

/// Reserve the next order identity from the counter row
async fn reserve_order_id<C: ConnectionTrait>(db: &C) -> Result<i32, ServiceError> {
    let bumped = sequence::Entity::update_many()
        .col_expr(
            sequence::Column::Value,
            Expr::col(sequence::Column::Value).add(1),
        )
        .filter(sequence::Column::Name.eq(ORDER_SEQUENCE))
        .exec(db)
        .await?;

    if bumped.rows_affected == 0 {
        sequence::ActiveModel {
            name: Set(ORDER_SEQUENCE.to_string()),
            value: Set(1),
        }
        .insert(db)
        .await?;
    }

    let value = sequence::Entity::find_by_id(ORDER_SEQUENCE.to_string())
        .one(db)
        .await?
        .map(|s| s.value)
        .ok_or_else(|| ServiceError::InternalError("order sequence missing".to_string()))?;

    i32::try_from(value)
        .map_err(|_| ServiceError::InternalError(format!("order sequence overflow at {}", value)))
}

async fn ensure_client<C: ConnectionTrait>(db: &C, client_id: Uuid) -> Result<(), ServiceError> {
    client::Entity::find_by_id(client_id)
        .one(db)
        .await?
        .map(|_| ())
        .ok_or_else(|| ServiceError::not_found("Client", client_id))
}

/// The responsible user must exist and be manageable by the actor
async fn check_responsible<C: ConnectionTrait>(
    db: &C,
    actor: &user::Model,
    responsible_id: i32,
) -> Result<(), ServiceError> {
    user::Entity::find_by_id(responsible_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("User", responsible_id))?;
    if !hierarchy::can_act_for(db, actor, responsible_id).await? {
        return Err(ServiceError::Forbidden(format!(
            "user {} is not yours to assign orders to",
            responsible_id
        )));
    }
    Ok(())
}

/// Load an order for mutation, locking the row and enforcing visibility
async fn load_for_update<C: ConnectionTrait>(
    db: &C,
    actor: &user::Model,
    order_id: i32,
) -> Result<order::Model, ServiceError> {
    let order = order::Entity::find_by_id(order_id)
        .lock_exclusive()
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
    ensure_visible(db, actor, &order).await?;
    Ok(order)
}

async fn ensure_visible<C: ConnectionTrait>(
    db: &C,
    actor: &user::Model,
    order: &order::Model,
) -> Result<(), ServiceError> {
    if hierarchy::visibility(db, actor).await?.allows(order.responsible_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "order {} is outside your visibility",
            order.id
        )))
    }
}

/// Attach items, client and responsible names to a batch of orders
async fn hydrate<C: ConnectionTrait>(
    db: &C,
    orders: Vec<order::Model>,
) -> Result<Vec<OrderView>, ServiceError> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let order_ids: Vec<i32> = orders.iter().map(|o| o.id).collect();
    let client_ids: Vec<Uuid> = orders.iter().map(|o| o.client_id).collect();
    let user_ids: Vec<i32> = orders.iter().filter_map(|o| o.responsible_id).collect();

    let mut items: HashMap<i32, Vec<OrderItemView>> = HashMap::new();
    for item in order_item::Entity::find()
        .filter(order_item::Column::OrderId.is_in(order_ids))
        .order_by_asc(order_item::Column::Id)
        .all(db)
        .await?
    {
        items.entry(item.order_id).or_default().push(item.into());
    }

    let clients: HashMap<Uuid, String> = client::Entity::find()
        .filter(client::Column::Id.is_in(client_ids))
        .all(db)
        .await?
        .into_iter()
        .map(|c| (c.id, c.display_name()))
        .collect();

    let users: HashMap<i32, String> = if user_ids.is_empty() {
        HashMap::new()
    } else {
        user::Entity::find()
            .filter(user::Column::Id.is_in(user_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|u| (u.id, u.display_name()))
            .collect()
    };

    Ok(orders
        .into_iter()
        .map(|o| OrderView {
            client_name: clients.get(&o.client_id).cloned(),
            responsible_name: o.responsible_id.and_then(|id| users.get(&id).cloned()),
            status_label: o.status.label().to_string(),
            items: items.remove(&o.id).unwrap_or_default(),
            id: o.id,
            order_number: o.order_number,
            client_id: o.client_id,
            responsible_id: o.responsible_id,
            status: o.status,
            source: o.source,
            payment_method: o.payment_method,
            delivery_method: o.delivery_method,
            price_level: o.price_level,
            is_promo: o.is_promo,
            sale_number: o.sale_number,
            notes: o.notes,
            total_amount: o.total_amount,
            created_by: o.created_by,
            updated_by: o.updated_by,
            created_at: o.created_at,
            updated_at: o.updated_at,
        })
        .collect())
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Order ledger: every mutation writes the order, its items and the
/// affected plan progress in one transaction.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            let name = event.name();
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, event = name, "Failed to send order event");
            }
        }
    }

    #[instrument(skip(self, actor, payload), fields(actor_id = actor.id, client_id = %payload.client_id))]
    pub async fn create_order(
        &self,
        actor: &user::Model,
        payload: OrderPayload,
    ) -> Result<OrderRef, ServiceError> {
        validate_payload(&payload)?;
        let attrs = parse_attributes(
            &payload,
            &OrderAttributes {
                status: OrderStatus::default(),
                source: OrderSource::default(),
                payment_method: PaymentMethod::default(),
                delivery_method: DeliveryMethod::default(),
                price_level: PriceLevel::default(),
            },
        )?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        ensure_client(&txn, payload.client_id).await?;
        let responsible_id = payload.responsible_id.unwrap_or(actor.id);
        check_responsible(&txn, actor, responsible_id).await?;

        let (items, total) =
            build_items(&txn, &payload.items, attrs.price_level, payload.is_promo).await?;

        let order_id = reserve_order_id(&txn).await?;
        let order_number = order::format_order_number(order_id);
        let now = Utc::now();
        let created_at = payload.created_at.unwrap_or(now);

        let order = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            client_id: Set(payload.client_id),
            responsible_id: Set(Some(responsible_id)),
            status: Set(attrs.status),
            source: Set(attrs.source),
            payment_method: Set(attrs.payment_method),
            delivery_method: Set(attrs.delivery_method),
            price_level: Set(attrs.price_level),
            is_promo: Set(payload.is_promo),
            sale_number: Set(blank_to_none(payload.sale_number)),
            notes: Set(blank_to_none(payload.notes)),
            total_amount: Set(total),
            created_by: Set(Some(actor.id)),
            updated_by: Set(Some(actor.id)),
            created_at: Set(created_at),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id, "Failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        insert_items(&txn, order.id, items).await?;
        progress::notify_order_changed(&txn, order.responsible_id, order.order_date()).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        metrics::counter!("tirecrm.orders.created", 1);
        info!(order_id, %order_number, %total, "Order created");

        self.emit(Event::OrderCreated {
            order_id,
            order_number: order_number.clone(),
        })
        .await;

        Ok(OrderRef {
            order_id,
            order_number,
        })
    }

    /// Replace an order's fields and items, recomputing the total
    #[instrument(skip(self, actor, payload), fields(actor_id = actor.id))]
    pub async fn update_order(
        &self,
        actor: &user::Model,
        order_id: i32,
        payload: OrderPayload,
    ) -> Result<OrderRef, ServiceError> {
        validate_payload(&payload)?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to start transaction for order update");
            ServiceError::DatabaseError(e)
        })?;

        let existing = load_for_update(&txn, actor, order_id).await?;
        let attrs = parse_attributes(
            &payload,
            &OrderAttributes {
                status: existing.status,
                source: existing.source,
                payment_method: existing.payment_method,
                delivery_method: existing.delivery_method,
                price_level: existing.price_level,
            },
        )?;

        ensure_client(&txn, payload.client_id).await?;
        let responsible_id = payload
            .responsible_id
            .or(existing.responsible_id)
            .unwrap_or(actor.id);
        check_responsible(&txn, actor, responsible_id).await?;

        let before = (existing.responsible_id, existing.order_date());

        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        let (items, total) =
            build_items(&txn, &payload.items, attrs.price_level, payload.is_promo).await?;
        insert_items(&txn, order_id, items).await?;

        let mut active: order::ActiveModel = existing.into();
        active.client_id = Set(payload.client_id);
        active.responsible_id = Set(Some(responsible_id));
        active.status = Set(attrs.status);
        active.source = Set(attrs.source);
        active.payment_method = Set(attrs.payment_method);
        active.delivery_method = Set(attrs.delivery_method);
        active.price_level = Set(attrs.price_level);
        active.is_promo = Set(payload.is_promo);
        active.sale_number = Set(blank_to_none(payload.sale_number));
        active.notes = Set(blank_to_none(payload.notes));
        active.total_amount = Set(total);
        active.updated_by = Set(Some(actor.id));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id, "Failed to update order");
            ServiceError::DatabaseError(e)
        })?;

        progress::notify_orders_changed(
            &txn,
            &[before, (updated.responsible_id, updated.order_date())],
        )
        .await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to commit order update");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id, %total, "Order updated");
        self.emit(Event::OrderUpdated(order_id)).await;

        Ok(OrderRef {
            order_id,
            order_number: updated.order_number,
        })
    }

    /// Change only the status; no item or price recompute
    #[instrument(skip(self, actor), fields(actor_id = actor.id))]
    pub async fn set_status(
        &self,
        actor: &user::Model,
        order_id: i32,
        status: &str,
    ) -> Result<OrderStatusRef, ServiceError> {
        let new_status = OrderStatus::parse(status)?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to start transaction for status change");
            ServiceError::DatabaseError(e)
        })?;

        let existing = load_for_update(&txn, actor, order_id).await?;
        let old_status = existing.status;

        let mut active: order::ActiveModel = existing.into();
        active.status = Set(new_status);
        active.updated_by = Set(Some(actor.id));
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, order_id, "Failed to update order status");
            ServiceError::DatabaseError(e)
        })?;

        progress::notify_order_changed(&txn, updated.responsible_id, updated.order_date()).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to commit status change");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id, ?old_status, ?new_status, "Order status changed");
        if old_status != new_status {
            self.emit(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            })
            .await;
        }

        Ok(OrderStatusRef {
            order_id,
            status: new_status,
        })
    }

    /// Hard delete; plan progress for the captured manager and date is re-derived
    #[instrument(skip(self, actor), fields(actor_id = actor.id))]
    pub async fn delete_order(&self, actor: &user::Model, order_id: i32) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to start transaction for order deletion");
            ServiceError::DatabaseError(e)
        })?;

        let existing = load_for_update(&txn, actor, order_id).await?;
        let responsible_id = existing.responsible_id;
        let order_date: NaiveDate = existing.order_date();

        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order::Entity::delete_by_id(order_id)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, order_id, "Failed to delete order");
                ServiceError::DatabaseError(e)
            })?;

        progress::notify_order_changed(&txn, responsible_id, order_date).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to commit order deletion");
            ServiceError::DatabaseError(e)
        })?;

        metrics::counter!("tirecrm.orders.deleted", 1);
        info!(order_id, "Order deleted");
        self.emit(Event::OrderDeleted {
            order_id,
            responsible_id,
            order_date,
        })
        .await;

        Ok(())
    }

    #[instrument(skip(self, actor), fields(actor_id = actor.id))]
    pub async fn get_order(&self, actor: &user::Model, order_id: i32) -> Result<OrderView, ServiceError> {
        let db = &*self.db_pool;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;
        ensure_visible(db, actor, &order).await?;

        hydrate(db, vec![order])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::not_found("Order", order_id))
    }

    /// Visible orders, newest first
    #[instrument(skip(self, actor, filter), fields(actor_id = actor.id))]
    pub async fn list_orders(
        &self,
        actor: &user::Model,
        filter: &OrderFilter,
        page: u64,
        per_page: u64,
    ) -> Result<PaginatedResponse<OrderView>, ServiceError> {
        let db = &*self.db_pool;
        let page = page.max(1);
        let visibility: Visibility = hierarchy::visibility(db, actor).await?;

        let paginator = scoped_orders(&visibility, filter)?
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .paginate(db, per_page);

        let total = paginator.num_items().await.map_err(|e| {
            error!(error = %e, "Failed to count orders");
            ServiceError::DatabaseError(e)
        })?;
        let orders = paginator.fetch_page(page - 1).await.map_err(|e| {
            error!(error = %e, page, per_page, "Failed to fetch orders page");
            ServiceError::DatabaseError(e)
        })?;

        let items = hydrate(db, orders).await?;
        info!(total, page, per_page, returned = items.len(), "Orders listed");

        Ok(PaginatedResponse {
            items,
            total,
            page,
            limit: per_page,
            total_pages: total.div_ceil(per_page.max(1)),
        })
    }
}
