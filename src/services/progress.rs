//! Recalculation of the achieved_* cache on plan assignments.
//!
//! Every path recomputes from the order ledger rather than incrementing, so
//! running any of them twice in a row yields the same state.

use crate::{
    entities::{order, plan, plan_assignment, CriteriaOperator, OrderStatus},
    errors::ServiceError,
};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};
use utoipa::ToSchema;

/// Progress of one assignment as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AssignmentProgress {
    pub assignment_id: i32,
    pub plan_id: i32,
    pub manager_id: i32,
    pub target_count: i32,
    #[schema(value_type = String)]
    pub target_sum: Decimal,
    pub criteria_operator: CriteriaOperator,
    pub achieved_count: i32,
    #[schema(value_type = String)]
    pub achieved_sum: Decimal,
    pub is_achieved: bool,
    pub progress_percent: u32,
}

impl From<&plan_assignment::Model> for AssignmentProgress {
    fn from(a: &plan_assignment::Model) -> Self {
        Self {
            assignment_id: a.id,
            plan_id: a.plan_id,
            manager_id: a.manager_id,
            target_count: a.target_count,
            target_sum: a.target_sum,
            criteria_operator: a.criteria_operator,
            achieved_count: a.achieved_count,
            achieved_sum: a.achieved_sum,
            is_achieved: a.is_achieved,
            progress_percent: progress_percent(a.achieved_count, a.target_count),
        }
    }
}

/// Achieved count as a share of the target, capped at 100
pub fn progress_percent(achieved_count: i32, target_count: i32) -> u32 {
    if target_count <= 0 {
        return 100;
    }
    let pct = i64::from(achieved_count.max(0)) * 100 / i64::from(target_count);
    pct.min(100) as u32
}

/// Whether the achieved figures meet the targets under `operator`
pub fn evaluate(
    operator: CriteriaOperator,
    target_count: i32,
    target_sum: Decimal,
    achieved_count: i32,
    achieved_sum: Decimal,
) -> bool {
    let count_met = achieved_count >= target_count;
    // a zero sum target means there is no sum criterion
    let has_sum_target = target_sum > Decimal::ZERO;
    let sum_met = has_sum_target && achieved_sum >= target_sum;
    match operator {
        CriteriaOperator::Both => count_met && (sum_met || !has_sum_target),
        CriteriaOperator::Either => count_met || sum_met,
    }
}

/// Half-open UTC instant range covering the inclusive date window
pub fn date_bounds(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let lower = start.and_time(NaiveTime::MIN).and_utc();
    let upper = end
        .checked_add_days(Days::new(1))
        .unwrap_or(end)
        .and_time(NaiveTime::MIN)
        .and_utc();
    (lower, upper)
}

/// Count and total of completed orders for one manager in the window
async fn completed_totals<C: ConnectionTrait>(
    db: &C,
    manager_id: i32,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<(i32, Decimal), ServiceError> {
    let (lower, upper) = date_bounds(start, end);
    let totals: Vec<Decimal> = order::Entity::find()
        .select_only()
        .column(order::Column::TotalAmount)
        .filter(order::Column::ResponsibleId.eq(manager_id))
        .filter(order::Column::Status.eq(OrderStatus::Completed))
        .filter(order::Column::CreatedAt.gte(lower))
        .filter(order::Column::CreatedAt.lt(upper))
        .into_tuple()
        .all(db)
        .await?;

    Ok((totals.len() as i32, totals.into_iter().sum()))
}

async fn write_progress<C: ConnectionTrait>(
    db: &C,
    assignment: plan_assignment::Model,
    achieved_count: i32,
    achieved_sum: Decimal,
) -> Result<plan_assignment::Model, ServiceError> {
    let is_achieved = evaluate(
        assignment.criteria_operator,
        assignment.target_count,
        assignment.target_sum,
        achieved_count,
        achieved_sum,
    );
    let assignment_id = assignment.id;

    let mut active: plan_assignment::ActiveModel = assignment.into();
    active.achieved_count = Set(achieved_count);
    active.achieved_sum = Set(achieved_sum);
    active.is_achieved = Set(is_achieved);
    active.updated_at = Set(Utc::now());
    let updated = active.update(db).await?;

    debug!(
        assignment_id,
        achieved_count,
        %achieved_sum,
        is_achieved,
        "Assignment progress written"
    );
    metrics::counter!("tirecrm.recalc.assignments", 1);
    Ok(updated)
}

/// Recompute a single assignment against its plan window
#[instrument(skip(db, assignment, plan), fields(assignment_id = assignment.id, plan_id = plan.id))]
pub async fn recalc_assignment<C: ConnectionTrait>(
    db: &C,
    assignment: plan_assignment::Model,
    plan: &plan::Model,
) -> Result<plan_assignment::Model, ServiceError> {
    let (count, sum) =
        completed_totals(db, assignment.manager_id, plan.start_date, plan.end_date).await?;
    write_progress(db, assignment, count, sum).await
}

/// Recompute every assignment of a plan from one grouped pass over the ledger.
/// Assignments whose manager has no completed orders in the window are zeroed.
#[instrument(skip(db, plan), fields(plan_id = plan.id))]
pub async fn recalc_plan<C: ConnectionTrait>(
    db: &C,
    plan: &plan::Model,
) -> Result<Vec<plan_assignment::Model>, ServiceError> {
    let assignments = plan_assignment::Entity::find()
        .filter(plan_assignment::Column::PlanId.eq(plan.id))
        .order_by_asc(plan_assignment::Column::Id)
        .lock_exclusive()
        .all(db)
        .await?;

    if assignments.is_empty() {
        return Ok(Vec::new());
    }

    let manager_ids: Vec<i32> = assignments.iter().map(|a| a.manager_id).collect();
    let (lower, upper) = date_bounds(plan.start_date, plan.end_date);
    let rows: Vec<(Option<i32>, Decimal)> = order::Entity::find()
        .select_only()
        .column(order::Column::ResponsibleId)
        .column(order::Column::TotalAmount)
        .filter(order::Column::ResponsibleId.is_in(manager_ids))
        .filter(order::Column::Status.eq(OrderStatus::Completed))
        .filter(order::Column::CreatedAt.gte(lower))
        .filter(order::Column::CreatedAt.lt(upper))
        .into_tuple()
        .all(db)
        .await?;

    let mut grouped: HashMap<i32, (i32, Decimal)> = HashMap::new();
    for (responsible_id, total) in rows {
        if let Some(id) = responsible_id {
            let entry = grouped.entry(id).or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += total;
        }
    }

    let mut updated = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let (count, sum) = grouped
            .get(&assignment.manager_id)
            .copied()
            .unwrap_or((0, Decimal::ZERO));
        updated.push(write_progress(db, assignment, count, sum).await?);
    }
    Ok(updated)
}

/// Re-derive every assignment affected by an order of `responsible_id` dated `date`.
///
/// Called inside the mutating transaction after the ledger write, so the
/// recompute sees the new state. Orders without a responsible user touch nothing.
#[instrument(skip(db))]
pub async fn notify_order_changed<C: ConnectionTrait>(
    db: &C,
    responsible_id: Option<i32>,
    date: NaiveDate,
) -> Result<usize, ServiceError> {
    let Some(manager_id) = responsible_id else {
        return Ok(0);
    };

    let plans: HashMap<i32, plan::Model> = plan::Entity::find()
        .filter(plan::Column::StartDate.lte(date))
        .filter(plan::Column::EndDate.gte(date))
        .all(db)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    if plans.is_empty() {
        return Ok(0);
    }

    let assignments = plan_assignment::Entity::find()
        .filter(plan_assignment::Column::ManagerId.eq(manager_id))
        .filter(plan_assignment::Column::PlanId.is_in(plans.keys().copied().collect::<Vec<_>>()))
        .order_by_asc(plan_assignment::Column::Id)
        .lock_exclusive()
        .all(db)
        .await?;

    let mut touched = 0;
    for assignment in assignments {
        if let Some(plan) = plans.get(&assignment.plan_id) {
            recalc_assignment(db, assignment, plan).await?;
            touched += 1;
        }
    }
    Ok(touched)
}

/// Recalculate for each distinct (responsible, date) pair once
pub async fn notify_orders_changed<C: ConnectionTrait>(
    db: &C,
    touched: &[(Option<i32>, NaiveDate)],
) -> Result<usize, ServiceError> {
    let mut seen: Vec<(Option<i32>, NaiveDate)> = Vec::with_capacity(touched.len());
    let mut total = 0;
    for key in touched {
        if seen.contains(key) {
            continue;
        }
        seen.push(*key);
        total += notify_order_changed(db, key.0, key.1).await?;
    }
    Ok(total)
}
