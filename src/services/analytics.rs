//! Role-scoped aggregates over the order ledger.
//!
//! Every report reads through [`scoped_orders`]; sums are computed over
//! `Decimal` in process so the SQLite and Postgres backends agree.

use crate::{
    db::DbPool,
    entities::{order, order_item, user, OrderStatus},
    errors::ServiceError,
    services::{
        hierarchy,
        order_query::{scoped_orders, OrderFilter},
    },
};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveEnum, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait, Select,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::{IntoParams, ToSchema};

pub const CSV_HEADER: &str = "order_number;created_at;status;responsible;client;total_amount";
pub const CSV_FILENAME: &str = "orders_report.csv";
const DEFAULT_TOP_LIMIT: u64 = 10;
const MAX_TOP_LIMIT: u64 = 100;

#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AnalyticsQuery {
    /// First day of the period; defaults to the first of the end date's month
    pub start: Option<NaiveDate>,
    /// Last day of the period; defaults to today
    pub end: Option<NaiveDate>,
    pub source: Option<String>,
    /// Comma separated statuses; `cancelled` means every cancelled status
    #[serde(alias = "statuses")]
    pub status: Option<String>,
    pub manager: Option<i32>,
    /// `day`, `week` or `month`
    pub interval: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Day,
    Week,
    Month,
}

impl Interval {
    /// Unknown or missing values fall back to `Day`
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(|r| r.trim().to_ascii_lowercase()).as_deref() {
            Some("week") => Interval::Week,
            Some("month") => Interval::Month,
            _ => Interval::Day,
        }
    }

    /// First day of the bucket containing `date`; weeks start on Monday
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Interval::Day => date,
            Interval::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
            Interval::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

/// Inclusive period, defaulting to month-to-date
pub fn resolve_period(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> (NaiveDate, NaiveDate) {
    let end = end.unwrap_or(today);
    let start = start.unwrap_or_else(|| end.with_day(1).unwrap_or(end));
    (start, end)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Overview {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub orders_total: u64,
    pub orders_completed: u64,
    pub orders_cancelled: u64,
    #[schema(value_type = String)]
    pub sum_total: Decimal,
    #[schema(value_type = String)]
    pub sum_completed: Decimal,
    #[schema(value_type = String)]
    pub sum_cancelled: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TimeseriesPoint {
    pub date: NaiveDate,
    pub orders: u64,
    #[schema(value_type = String)]
    pub revenue: Decimal,
    pub completed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ManagerStats {
    pub manager_id: Option<i32>,
    pub name: String,
    pub orders: u64,
    #[schema(value_type = String)]
    pub revenue: Decimal,
    pub completed: u64,
    pub cancelled: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProductStats {
    pub product_code: String,
    pub product_name: String,
    pub quantity: i64,
    #[schema(value_type = String)]
    pub revenue: Decimal,
}

/// Ledger row as the aggregates need it
#[derive(Debug, Clone)]
struct LedgerRow {
    responsible_id: Option<i32>,
    status: OrderStatus,
    total_amount: Decimal,
    created_at: DateTime<Utc>,
}

/// Running totals shared by every report
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    orders: u64,
    revenue: Decimal,
    completed: u64,
    completed_sum: Decimal,
    cancelled: u64,
    cancelled_sum: Decimal,
}

impl Tally {
    fn add(&mut self, row: &LedgerRow) {
        self.orders += 1;
        self.revenue += row.total_amount;
        if row.status == OrderStatus::Completed {
            self.completed += 1;
            self.completed_sum += row.total_amount;
        } else if row.status.is_cancelled() {
            self.cancelled += 1;
            self.cancelled_sum += row.total_amount;
        }
    }
}

fn overview_from(rows: &[LedgerRow], start: NaiveDate, end: NaiveDate) -> Overview {
    let mut tally = Tally::default();
    rows.iter().for_each(|r| tally.add(r));
    Overview {
        start: Some(start),
        end: Some(end),
        orders_total: tally.orders,
        orders_completed: tally.completed,
        orders_cancelled: tally.cancelled,
        sum_total: tally.revenue,
        sum_completed: tally.completed_sum,
        sum_cancelled: tally.cancelled_sum,
    }
}

fn timeseries_from(rows: &[LedgerRow], interval: Interval) -> Vec<TimeseriesPoint> {
    let mut buckets: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
    for row in rows {
        let key = interval.bucket_start(row.created_at.date_naive());
        buckets.entry(key).or_default().add(row);
    }
    buckets
        .into_iter()
        .map(|(date, t)| TimeseriesPoint {
            date,
            orders: t.orders,
            revenue: t.revenue,
            completed: t.completed,
            cancelled: t.cancelled,
        })
        .collect()
}

/// "Last First", falling back to the username
fn manager_label(user: &user::Model) -> String {
    let name = format!("{} {}", user.last_name.trim(), user.first_name.trim());
    let name = name.trim();
    if name.is_empty() {
        user.username.clone()
    } else {
        name.to_string()
    }
}

fn csv_line(
    out: &mut String,
    order: &order::Model,
    usernames: &HashMap<i32, String>,
) -> Result<(), ServiceError> {
    let responsible = order
        .responsible_id
        .and_then(|id| usernames.get(&id))
        .map(String::as_str)
        .unwrap_or("");
    writeln!(
        out,
        "{};{};{};{};{};{}",
        order.order_number,
        order.created_at.format("%Y-%m-%d %H:%M"),
        order.status.to_value(),
        responsible.replace(';', ","),
        order.client_id,
        order.total_amount
    )
    .map_err(|e| ServiceError::InternalError(format!("csv write failed: {}", e)))
}

#[derive(Clone)]
pub struct AnalyticsService {
    db_pool: Arc<DbPool>,
}

impl AnalyticsService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Scoped select plus the resolved period
    async fn scope(
        &self,
        actor: &user::Model,
        query: &AnalyticsQuery,
    ) -> Result<(Select<order::Entity>, NaiveDate, NaiveDate), ServiceError> {
        let (start, end) = resolve_period(query.start, query.end, Utc::now().date_naive());
        let filter = OrderFilter {
            status: query.status.clone(),
            source: query.source.clone(),
            manager: query.manager,
            start: Some(start),
            end: Some(end),
            ..Default::default()
        };
        let visibility = hierarchy::visibility(&*self.db_pool, actor).await?;
        Ok((scoped_orders(&visibility, &filter)?, start, end))
    }

    async fn ledger_rows(
        &self,
        actor: &user::Model,
        query: &AnalyticsQuery,
    ) -> Result<(Vec<LedgerRow>, NaiveDate, NaiveDate), ServiceError> {
        let (select, start, end) = self.scope(actor, query).await?;
        let rows: Vec<(Option<i32>, OrderStatus, Decimal, DateTime<Utc>)> = select
            .select_only()
            .column(order::Column::ResponsibleId)
            .column(order::Column::Status)
            .column(order::Column::TotalAmount)
            .column(order::Column::CreatedAt)
            .into_tuple()
            .all(&*self.db_pool)
            .await?;
        debug!(rows = rows.len(), %start, %end, "Ledger rows loaded for analytics");
        Ok((
            rows.into_iter()
                .map(|(responsible_id, status, total_amount, created_at)| LedgerRow {
                    responsible_id,
                    status,
                    total_amount,
                    created_at,
                })
                .collect(),
            start,
            end,
        ))
    }

    #[instrument(skip(self, actor, query), fields(actor_id = actor.id))]
    pub async fn overview(
        &self,
        actor: &user::Model,
        query: &AnalyticsQuery,
    ) -> Result<Overview, ServiceError> {
        let (rows, start, end) = self.ledger_rows(actor, query).await?;
        Ok(overview_from(&rows, start, end))
    }

    #[instrument(skip(self, actor, query), fields(actor_id = actor.id))]
    pub async fn timeseries(
        &self,
        actor: &user::Model,
        query: &AnalyticsQuery,
    ) -> Result<Vec<TimeseriesPoint>, ServiceError> {
        let interval = Interval::parse_lenient(query.interval.as_deref());
        let (rows, _, _) = self.ledger_rows(actor, query).await?;
        Ok(timeseries_from(&rows, interval))
    }

    /// Per responsible manager, highest revenue first
    #[instrument(skip(self, actor, query), fields(actor_id = actor.id))]
    pub async fn by_manager(
        &self,
        actor: &user::Model,
        query: &AnalyticsQuery,
    ) -> Result<Vec<ManagerStats>, ServiceError> {
        let (rows, _, _) = self.ledger_rows(actor, query).await?;

        let mut tallies: HashMap<Option<i32>, Tally> = HashMap::new();
        for row in &rows {
            tallies.entry(row.responsible_id).or_default().add(row);
        }

        let ids: Vec<i32> = tallies.keys().filter_map(|id| *id).collect();
        let names: HashMap<i32, String> = if ids.is_empty() {
            HashMap::new()
        } else {
            user::Entity::find()
                .filter(user::Column::Id.is_in(ids))
                .all(&*self.db_pool)
                .await?
                .iter()
                .map(|u| (u.id, manager_label(u)))
                .collect()
        };

        let mut stats: Vec<ManagerStats> = tallies
            .into_iter()
            .map(|(manager_id, t)| ManagerStats {
                name: manager_id
                    .and_then(|id| names.get(&id).cloned())
                    .unwrap_or_default(),
                manager_id,
                orders: t.orders,
                revenue: t.revenue,
                completed: t.completed,
                cancelled: t.cancelled,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.revenue
                .cmp(&a.revenue)
                .then_with(|| a.manager_id.cmp(&b.manager_id))
        });
        Ok(stats)
    }

    /// Best-selling products by line revenue within the scoped orders
    #[instrument(skip(self, actor, query), fields(actor_id = actor.id))]
    pub async fn top_products(
        &self,
        actor: &user::Model,
        query: &AnalyticsQuery,
    ) -> Result<Vec<ProductStats>, ServiceError> {
        let limit = query
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_TOP_LIMIT)
            .min(MAX_TOP_LIMIT) as usize;
        let (select, _, _) = self.scope(actor, query).await?;
        let order_ids = select
            .select_only()
            .column(order::Column::Id)
            .into_query();

        let lines: Vec<(String, String, Decimal, i32)> = order_item::Entity::find()
            .select_only()
            .column(order_item::Column::ProductCode)
            .column(order_item::Column::ProductName)
            .column(order_item::Column::Price)
            .column(order_item::Column::Quantity)
            .filter(order_item::Column::OrderId.in_subquery(order_ids))
            .into_tuple()
            .all(&*self.db_pool)
            .await?;

        let mut products: HashMap<(String, String), (i64, Decimal)> = HashMap::new();
        for (code, name, price, quantity) in lines {
            let entry = products.entry((code, name)).or_insert((0, Decimal::ZERO));
            entry.0 += i64::from(quantity);
            entry.1 += price * Decimal::from(quantity);
        }

        let mut stats: Vec<ProductStats> = products
            .into_iter()
            .map(|((product_code, product_name), (quantity, revenue))| ProductStats {
                product_code,
                product_name,
                quantity,
                revenue,
            })
            .collect();
        stats.sort_by(|a, b| {
            b.revenue
                .cmp(&a.revenue)
                .then_with(|| a.product_code.cmp(&b.product_code))
        });
        stats.truncate(limit);
        Ok(stats)
    }

    /// Semicolon separated report of the scoped orders, newest first
    #[instrument(skip(self, actor, query), fields(actor_id = actor.id))]
    pub async fn export_csv(
        &self,
        actor: &user::Model,
        query: &AnalyticsQuery,
    ) -> Result<String, ServiceError> {
        let (select, _, _) = self.scope(actor, query).await?;
        let orders = select
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .all(&*self.db_pool)
            .await?;

        let ids: Vec<i32> = orders.iter().filter_map(|o| o.responsible_id).collect();
        let usernames: HashMap<i32, String> = if ids.is_empty() {
            HashMap::new()
        } else {
            user::Entity::find()
                .filter(user::Column::Id.is_in(ids))
                .all(&*self.db_pool)
                .await?
                .into_iter()
                .map(|u| (u.id, u.username))
                .collect()
        };

        let mut out = String::with_capacity(64 * (orders.len() + 1));
        out.push_str(CSV_HEADER);
        out.push('\n');
        for order in &orders {
            csv_line(&mut out, order, &usernames)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(status: OrderStatus, total: Decimal, y: i32, m: u32, d: u32) -> LedgerRow {
        LedgerRow {
            responsible_id: Some(1),
            status,
            total_amount: total,
            created_at: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn default_period_is_month_to_date() {
        assert_eq!(
            resolve_period(None, None, day(2025, 6, 18)),
            (day(2025, 6, 1), day(2025, 6, 18))
        );
        assert_eq!(
            resolve_period(None, Some(day(2025, 3, 9)), day(2025, 6, 18)),
            (day(2025, 3, 1), day(2025, 3, 9))
        );
    }

    #[rstest]
    #[case(Some("week"), Interval::Week)]
    #[case(Some("MONTH"), Interval::Month)]
    #[case(Some("fortnight"), Interval::Day)]
    #[case(None, Interval::Day)]
    fn interval_parsing(#[case] raw: Option<&str>, #[case] expected: Interval) {
        assert_eq!(Interval::parse_lenient(raw), expected);
    }

    #[test]
    fn weeks_start_on_monday() {
        // 2025-06-18 is a Wednesday
        assert_eq!(Interval::Week.bucket_start(day(2025, 6, 18)), day(2025, 6, 16));
        assert_eq!(Interval::Month.bucket_start(day(2025, 6, 18)), day(2025, 6, 1));
    }

    #[test]
    fn overview_splits_completed_and_cancelled() {
        let rows = vec![
            row(OrderStatus::Completed, dec!(100), 2025, 6, 1),
            row(OrderStatus::CancelNoAnswer, dec!(40), 2025, 6, 2),
            row(OrderStatus::Refund, dec!(10), 2025, 6, 3),
            row(OrderStatus::New, dec!(5), 2025, 6, 3),
        ];
        let o = overview_from(&rows, day(2025, 6, 1), day(2025, 6, 30));
        assert_eq!(o.orders_total, 4);
        assert_eq!(o.orders_completed, 1);
        assert_eq!(o.orders_cancelled, 1);
        assert_eq!(o.sum_total, dec!(155));
        assert_eq!(o.sum_cancelled, dec!(40));
    }

    #[test]
    fn timeseries_buckets_are_sorted() {
        let rows = vec![
            row(OrderStatus::Completed, dec!(100), 2025, 6, 18),
            row(OrderStatus::New, dec!(50), 2025, 6, 2),
            row(OrderStatus::Cancelled, dec!(10), 2025, 6, 17),
        ];
        let points = timeseries_from(&rows, Interval::Week);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].date, day(2025, 6, 2));
        assert_eq!(points[1].date, day(2025, 6, 16));
        assert_eq!(points[1].orders, 2);
        assert_eq!(points[1].revenue, dec!(110));
        assert_eq!(points[1].cancelled, 1);
    }
}
