//! Role-scoped, optionally filtered selects over the order ledger.
//!
//! Listing, analytics and export all start from [`scoped_orders`] so the
//! visibility rule lives in one place.

use crate::{
    entities::{
        client, order, order_item, user, DeliveryMethod, Labelled, OrderSource, OrderStatus,
        PaymentMethod,
    },
    errors::ServiceError,
    services::{hierarchy::Visibility, progress::date_bounds},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Expr, Func, LikeExpr, Query, SelectStatement, SimpleExpr},
    ColumnTrait, Condition, EntityTrait, QueryFilter, Select,
};
use serde::Deserialize;
use utoipa::IntoParams;

/// Optional, AND-composed filters over orders
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    /// Substring of the order number
    pub order_number: Option<String>,
    /// Comma separated statuses; `cancelled` means every cancelled status
    #[serde(alias = "statuses")]
    pub status: Option<String>,
    pub source: Option<String>,
    pub payment_method: Option<String>,
    pub delivery_method: Option<String>,
    /// Responsible manager; ignored when outside the caller's visibility
    pub manager: Option<i32>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    #[param(value_type = Option<String>)]
    pub price_min: Option<Decimal>,
    #[param(value_type = Option<String>)]
    pub price_max: Option<Decimal>,
    pub quantity_min: Option<i32>,
    pub quantity_max: Option<i32>,
    #[param(value_type = Option<String>)]
    pub amount_min: Option<Decimal>,
    #[param(value_type = Option<String>)]
    pub amount_max: Option<Decimal>,
    /// Case-insensitive free text
    pub search: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

const LIKE_ESCAPE: char = '!';

/// Wildcards in user input match literally
fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// `lower(column) LIKE '%needle%'`
pub(crate) fn ilike<C: ColumnTrait>(column: C, needle: &str) -> SimpleExpr {
    Expr::expr(Func::lower(Expr::col(column.as_column_ref())))
        .like(LikeExpr::new(format!("%{}%", escape_like(needle))).escape(LIKE_ESCAPE))
}

fn item_subquery(predicate: SimpleExpr) -> SelectStatement {
    Query::select()
        .column(order_item::Column::OrderId)
        .from(order_item::Entity)
        .and_where(predicate)
        .to_owned()
}

fn search_condition(needle: &str) -> Condition {
    let clients = Query::select()
        .column(client::Column::Id)
        .from(client::Entity)
        .cond_where(
            Condition::any()
                .add(ilike(client::Column::FirstName, needle))
                .add(ilike(client::Column::LastName, needle))
                .add(ilike(client::Column::MiddleName, needle))
                .add(ilike(client::Column::CompanyName, needle))
                .add(ilike(client::Column::Phone, needle))
                .add(ilike(client::Column::City, needle)),
        )
        .to_owned();

    let items = Query::select()
        .column(order_item::Column::OrderId)
        .from(order_item::Entity)
        .cond_where(
            Condition::any()
                .add(ilike(order_item::Column::ProductCode, needle))
                .add(ilike(order_item::Column::ProductName, needle))
                .add(ilike(order_item::Column::Segment, needle))
                .add(ilike(order_item::Column::BranchCity, needle)),
        )
        .to_owned();

    let responsibles = Query::select()
        .column(user::Column::Id)
        .from(user::Entity)
        .cond_where(
            Condition::any()
                .add(ilike(user::Column::FirstName, needle))
                .add(ilike(user::Column::LastName, needle))
                .add(ilike(user::Column::Username, needle)),
        )
        .to_owned();

    let mut cond = Condition::any()
        .add(ilike(order::Column::OrderNumber, needle))
        .add(ilike(order::Column::Notes, needle))
        .add(ilike(order::Column::SaleNumber, needle))
        .add(order::Column::ClientId.in_subquery(clients))
        .add(order::Column::Id.in_subquery(items))
        .add(order::Column::ResponsibleId.in_subquery(responsibles));

    let statuses = OrderStatus::matching_label(needle);
    if !statuses.is_empty() {
        cond = cond.add(order::Column::Status.is_in(statuses));
    }
    let sources = OrderSource::matching_label(needle);
    if !sources.is_empty() {
        cond = cond.add(order::Column::Source.is_in(sources));
    }
    let payments = PaymentMethod::matching_label(needle);
    if !payments.is_empty() {
        cond = cond.add(order::Column::PaymentMethod.is_in(payments));
    }
    let deliveries = DeliveryMethod::matching_label(needle);
    if !deliveries.is_empty() {
        cond = cond.add(order::Column::DeliveryMethod.is_in(deliveries));
    }
    cond
}

/// Restrict a select to orders whose responsible user is visible
pub fn apply_visibility(select: Select<order::Entity>, visibility: &Visibility) -> Select<order::Entity> {
    match visibility.user_ids() {
        None => select,
        Some(ids) => select.filter(order::Column::ResponsibleId.is_in(ids.to_vec())),
    }
}

/// Orders `visibility` may see, narrowed by `filter`.
///
/// Unknown enum values in the filter are rejected; a manager outside the
/// visible set is dropped silently.
pub fn scoped_orders(
    visibility: &Visibility,
    filter: &OrderFilter,
) -> Result<Select<order::Entity>, ServiceError> {
    let mut select = apply_visibility(order::Entity::find(), visibility);

    if let Some(number) = non_blank(&filter.order_number) {
        select = select.filter(ilike(order::Column::OrderNumber, number));
    }
    if let Some(raw) = non_blank(&filter.status) {
        let statuses = OrderStatus::expand_filter(raw)?;
        if !statuses.is_empty() {
            select = select.filter(order::Column::Status.is_in(statuses));
        }
    }
    if let Some(raw) = non_blank(&filter.source) {
        select = select.filter(order::Column::Source.eq(OrderSource::parse(raw)?));
    }
    if let Some(raw) = non_blank(&filter.payment_method) {
        select = select.filter(order::Column::PaymentMethod.eq(PaymentMethod::parse(raw)?));
    }
    if let Some(raw) = non_blank(&filter.delivery_method) {
        select = select.filter(order::Column::DeliveryMethod.eq(DeliveryMethod::parse(raw)?));
    }
    if let Some(manager_id) = filter.manager {
        if visibility.allows(Some(manager_id)) {
            select = select.filter(order::Column::ResponsibleId.eq(manager_id));
        }
    }

    match (filter.start, filter.end) {
        (Some(start), Some(end)) => {
            if start > end {
                return Err(ServiceError::ValidationError(
                    "start: must not be after end".to_string(),
                ));
            }
            let (lower, upper) = date_bounds(start, end);
            select = select
                .filter(order::Column::CreatedAt.gte(lower))
                .filter(order::Column::CreatedAt.lt(upper));
        }
        (Some(start), None) => {
            let (lower, _) = date_bounds(start, start);
            select = select.filter(order::Column::CreatedAt.gte(lower));
        }
        (None, Some(end)) => {
            let (_, upper) = date_bounds(end, end);
            select = select.filter(order::Column::CreatedAt.lt(upper));
        }
        (None, None) => {}
    }

    let item_predicates = [
        filter.price_min.map(|v| order_item::Column::Price.gte(v)),
        filter.price_max.map(|v| order_item::Column::Price.lte(v)),
        filter.quantity_min.map(|v| order_item::Column::Quantity.gte(v)),
        filter.quantity_max.map(|v| order_item::Column::Quantity.lte(v)),
        filter.amount_min.map(|v| order_item::Column::Amount.gte(v)),
        filter.amount_max.map(|v| order_item::Column::Amount.lte(v)),
    ];
    for predicate in item_predicates.into_iter().flatten() {
        select = select.filter(order::Column::Id.in_subquery(item_subquery(predicate)));
    }

    if let Some(needle) = non_blank(&filter.search) {
        select = select.filter(search_condition(needle));
    }

    Ok(select)
}
