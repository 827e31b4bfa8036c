use crate::{
    db::DbPool,
    entities::{plan, plan_assignment, user, CriteriaOperator, Labelled},
    errors::ServiceError,
    events::{Event, EventSender},
    retry::{with_retry, RetryConfig},
    services::{
        hierarchy::{self, Visibility},
        order_query,
        progress::{self, AssignmentProgress},
    },
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Query, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AssignmentInput {
    pub manager_id: i32,
    #[validate(range(min = 0, message = "target_count must not be negative"))]
    #[serde(default)]
    pub target_count: i32,
    #[schema(value_type = Option<String>)]
    pub target_sum: Option<Decimal>,
    pub criteria_operator: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PlanPayload {
    #[validate(length(min = 1, max = 255, message = "name is required"))]
    pub name: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub assignments: Vec<AssignmentInput>,
}

fn validate_plan(payload: &PlanPayload) -> Result<Vec<AssignmentSpec>, ServiceError> {
    payload.validate()?;
    if payload.name.trim().is_empty() {
        return Err(ServiceError::ValidationError("name: name is required".into()));
    }
    if payload.start_date > payload.end_date {
        return Err(ServiceError::ValidationError(
            "start_date: must not be after end_date".into(),
        ));
    }
    validate_assignments(&payload.assignments)
}

#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PlanListQuery {
    /// Substring of the plan name
    pub search: Option<String>,
    /// Only plans covering today
    #[serde(default)]
    pub active_only: bool,
}

#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AssignmentListQuery {
    pub plan_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanAssignmentView {
    #[serde(flatten)]
    pub progress: AssignmentProgress,
    pub manager_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PlanView {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub created_by: Option<i32>,
    pub is_active: bool,
    pub assignments: Vec<PlanAssignmentView>,
}

/// Validated assignment ready for insert
#[derive(Debug)]
struct AssignmentSpec {
    manager_id: i32,
    target_count: i32,
    target_sum: Decimal,
    criteria_operator: CriteriaOperator,
}

fn validate_assignments(inputs: &[AssignmentInput]) -> Result<Vec<AssignmentSpec>, ServiceError> {
    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(inputs.len());
    for (idx, input) in inputs.iter().enumerate() {
        input.validate().map_err(|e| match ServiceError::from(e) {
            ServiceError::ValidationError(msg) => {
                ServiceError::ValidationError(format!("assignments[{}].{}", idx, msg))
            }
            other => other,
        })?;
        if !seen.insert(input.manager_id) {
            return Err(ServiceError::ValidationError(format!(
                "assignments[{}].manager_id: manager {} is assigned twice",
                idx, input.manager_id
            )));
        }
        let target_sum = input.target_sum.unwrap_or(Decimal::ZERO);
        if target_sum < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "assignments[{}].target_sum: must not be negative",
                idx
            )));
        }
        let criteria_operator = match input.criteria_operator.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => CriteriaOperator::parse(raw)?,
            _ => CriteriaOperator::default(),
        };
        specs.push(AssignmentSpec {
            manager_id: input.manager_id,
            target_count: input.target_count,
            target_sum,
            criteria_operator,
        });
    }
    Ok(specs)
}

/// Managers must exist and be assignable by the actor
async fn check_managers<C: ConnectionTrait>(
    db: &C,
    actor: &user::Model,
    specs: &[AssignmentSpec],
) -> Result<(), ServiceError> {
    for spec in specs {
        user::Entity::find_by_id(spec.manager_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", spec.manager_id))?;
        if !hierarchy::can_act_for(db, actor, spec.manager_id).await? {
            return Err(ServiceError::Forbidden(format!(
                "manager {} is not your subordinate",
                spec.manager_id
            )));
        }
    }
    Ok(())
}

async fn insert_assignments<C: ConnectionTrait>(
    db: &C,
    plan_id: i32,
    specs: Vec<AssignmentSpec>,
) -> Result<(), ServiceError> {
    if specs.is_empty() {
        return Ok(());
    }
    let now = Utc::now();
    let rows = specs.into_iter().map(|s| plan_assignment::ActiveModel {
        plan_id: Set(plan_id),
        manager_id: Set(s.manager_id),
        target_count: Set(s.target_count),
        target_sum: Set(s.target_sum),
        criteria_operator: Set(s.criteria_operator),
        achieved_count: Set(0),
        achieved_sum: Set(Decimal::ZERO),
        is_achieved: Set(false),
        updated_at: Set(now),
        ..Default::default()
    });
    plan_assignment::Entity::insert_many(rows).exec(db).await?;
    Ok(())
}

fn can_edit(actor: &user::Model, plan: &plan::Model) -> bool {
    actor.is_superuser || plan.created_by == Some(actor.id)
}

/// Plans created by the actor or assigned to someone the actor can see
fn visible_plans_condition(actor: &user::Model, visibility: &Visibility) -> Condition {
    match visibility.user_ids() {
        None => Condition::all(),
        Some(ids) => Condition::any()
            .add(plan::Column::CreatedBy.eq(actor.id))
            .add(
                plan::Column::Id.in_subquery(
                    Query::select()
                        .column(plan_assignment::Column::PlanId)
                        .from(plan_assignment::Entity)
                        .and_where(plan_assignment::Column::ManagerId.is_in(ids.to_vec()))
                        .to_owned(),
                ),
            ),
    }
}

async fn find_plan<C: ConnectionTrait>(db: &C, plan_id: i32) -> Result<plan::Model, ServiceError> {
    plan::Entity::find_by_id(plan_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("Plan", plan_id))
}

/// Plan store and the standalone entry points into progress recalculation
#[derive(Clone)]
pub struct PlanService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    retry: RetryConfig,
}

impl PlanService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            retry,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            let name = event.name();
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, event = name, "Failed to send plan event");
            }
        }
    }

    async fn views<C: ConnectionTrait>(
        &self,
        db: &C,
        plans: Vec<plan::Model>,
    ) -> Result<Vec<PlanView>, ServiceError> {
        if plans.is_empty() {
            return Ok(Vec::new());
        }
        let plan_ids: Vec<i32> = plans.iter().map(|p| p.id).collect();
        let assignments = plan_assignment::Entity::find()
            .filter(plan_assignment::Column::PlanId.is_in(plan_ids))
            .order_by_asc(plan_assignment::Column::Id)
            .all(db)
            .await?;
        let mut grouped: HashMap<i32, Vec<PlanAssignmentView>> = HashMap::new();
        for view in self.assignment_views(db, assignments).await? {
            grouped.entry(view.progress.plan_id).or_default().push(view);
        }

        let today = Utc::now().date_naive();
        Ok(plans
            .into_iter()
            .map(|p| PlanView {
                is_active: p.covers(today),
                assignments: grouped.remove(&p.id).unwrap_or_default(),
                id: p.id,
                name: p.name,
                description: p.description,
                start_date: p.start_date,
                end_date: p.end_date,
                created_by: p.created_by,
            })
            .collect())
    }

    async fn assignment_views<C: ConnectionTrait>(
        &self,
        db: &C,
        assignments: Vec<plan_assignment::Model>,
    ) -> Result<Vec<PlanAssignmentView>, ServiceError> {
        let manager_ids: Vec<i32> = assignments.iter().map(|a| a.manager_id).collect();
        let names: HashMap<i32, String> = if manager_ids.is_empty() {
            HashMap::new()
        } else {
            user::Entity::find()
                .filter(user::Column::Id.is_in(manager_ids))
                .all(db)
                .await?
                .into_iter()
                .map(|u| (u.id, u.display_name()))
                .collect()
        };
        Ok(assignments
            .iter()
            .map(|a| PlanAssignmentView {
                progress: AssignmentProgress::from(a),
                manager_name: names.get(&a.manager_id).cloned(),
            })
            .collect())
    }

    async fn ensure_plan_visible<C: ConnectionTrait>(
        &self,
        db: &C,
        actor: &user::Model,
        plan_id: i32,
    ) -> Result<plan::Model, ServiceError> {
        let plan = find_plan(db, plan_id).await?;
        let visibility = hierarchy::visibility(db, actor).await?;
        let visible = plan::Entity::find_by_id(plan_id)
            .filter(visible_plans_condition(actor, &visibility))
            .one(db)
            .await?
            .is_some();
        if !visible {
            return Err(ServiceError::Forbidden(format!(
                "plan {} is outside your visibility",
                plan_id
            )));
        }
        Ok(plan)
    }

    /// Create a plan with its assignments and fill in their progress
    #[instrument(skip(self, actor, payload), fields(actor_id = actor.id, name = %payload.name))]
    pub async fn create_plan(
        &self,
        actor: &user::Model,
        payload: PlanPayload,
    ) -> Result<PlanView, ServiceError> {
        let specs = validate_plan(&payload)?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for plan creation");
            ServiceError::DatabaseError(e)
        })?;

        check_managers(&txn, actor, &specs).await?;

        let now = Utc::now();
        let plan = plan::ActiveModel {
            name: Set(payload.name.trim().to_string()),
            description: Set(payload.description),
            start_date: Set(payload.start_date),
            end_date: Set(payload.end_date),
            created_by: Set(Some(actor.id)),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert plan");
            ServiceError::DatabaseError(e)
        })?;

        insert_assignments(&txn, plan.id, specs).await?;
        progress::recalc_plan(&txn, &plan).await?;
        let view = self.views(&txn, vec![plan]).await?.pop();

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit plan creation");
            ServiceError::DatabaseError(e)
        })?;

        let view = view.ok_or_else(|| ServiceError::InternalError("plan vanished".into()))?;
        info!(plan_id = view.id, assignments = view.assignments.len(), "Plan created");
        self.emit(Event::PlanCreated(view.id)).await;
        Ok(view)
    }

    /// Replace plan fields and assignments, then recompute progress in the same transaction
    #[instrument(skip(self, actor, payload), fields(actor_id = actor.id))]
    pub async fn update_plan(
        &self,
        actor: &user::Model,
        plan_id: i32,
        payload: PlanPayload,
    ) -> Result<PlanView, ServiceError> {
        let specs = validate_plan(&payload)?;

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, plan_id, "Failed to start transaction for plan update");
            ServiceError::DatabaseError(e)
        })?;

        let existing = find_plan(&txn, plan_id).await?;
        if !can_edit(actor, &existing) {
            return Err(ServiceError::Forbidden(format!(
                "only the creator of plan {} may edit it",
                plan_id
            )));
        }
        check_managers(&txn, actor, &specs).await?;

        let mut active: plan::ActiveModel = existing.into();
        active.name = Set(payload.name.trim().to_string());
        active.description = Set(payload.description);
        active.start_date = Set(payload.start_date);
        active.end_date = Set(payload.end_date);
        active.updated_at = Set(Utc::now());
        let plan = active.update(&txn).await.map_err(|e| {
            error!(error = %e, plan_id, "Failed to update plan");
            ServiceError::DatabaseError(e)
        })?;

        plan_assignment::Entity::delete_many()
            .filter(plan_assignment::Column::PlanId.eq(plan_id))
            .exec(&txn)
            .await?;
        insert_assignments(&txn, plan_id, specs).await?;
        progress::recalc_plan(&txn, &plan).await?;
        let view = self.views(&txn, vec![plan]).await?.pop();

        txn.commit().await.map_err(|e| {
            error!(error = %e, plan_id, "Failed to commit plan update");
            ServiceError::DatabaseError(e)
        })?;

        info!(plan_id, "Plan updated");
        self.emit(Event::PlanUpdated(plan_id)).await;
        view.ok_or_else(|| ServiceError::InternalError("plan vanished".into()))
    }

    #[instrument(skip(self, actor), fields(actor_id = actor.id))]
    pub async fn delete_plan(&self, actor: &user::Model, plan_id: i32) -> Result<(), ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, plan_id, "Failed to start transaction for plan deletion");
            ServiceError::DatabaseError(e)
        })?;

        let existing = find_plan(&txn, plan_id).await?;
        if !can_edit(actor, &existing) {
            return Err(ServiceError::Forbidden(format!(
                "only the creator of plan {} may delete it",
                plan_id
            )));
        }

        plan_assignment::Entity::delete_many()
            .filter(plan_assignment::Column::PlanId.eq(plan_id))
            .exec(&txn)
            .await?;
        plan::Entity::delete_by_id(plan_id).exec(&txn).await?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, plan_id, "Failed to commit plan deletion");
            ServiceError::DatabaseError(e)
        })?;

        info!(plan_id, "Plan deleted");
        self.emit(Event::PlanDeleted(plan_id)).await;
        Ok(())
    }

    pub async fn get_plan(&self, actor: &user::Model, plan_id: i32) -> Result<PlanView, ServiceError> {
        let db = &*self.db_pool;
        let plan = self.ensure_plan_visible(db, actor, plan_id).await?;
        self.views(db, vec![plan])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::not_found("Plan", plan_id))
    }

    /// Plans visible to the actor, newest window first
    pub async fn list_plans(
        &self,
        actor: &user::Model,
        query: &PlanListQuery,
    ) -> Result<Vec<PlanView>, ServiceError> {
        let db = &*self.db_pool;
        let visibility = hierarchy::visibility(db, actor).await?;
        let mut select =
            plan::Entity::find().filter(visible_plans_condition(actor, &visibility));

        if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            select = select.filter(order_query::ilike(plan::Column::Name, search));
        }
        if query.active_only {
            let today = Utc::now().date_naive();
            select = select
                .filter(plan::Column::StartDate.lte(today))
                .filter(plan::Column::EndDate.gte(today));
        }

        let plans = select
            .order_by_desc(plan::Column::StartDate)
            .order_by_desc(plan::Column::Id)
            .all(db)
            .await?;
        self.views(db, plans).await
    }

    /// Plans in which the actor personally has an assignment
    pub async fn my_plans(&self, actor: &user::Model) -> Result<Vec<PlanView>, ServiceError> {
        let db = &*self.db_pool;
        let plans = plan::Entity::find()
            .filter(
                plan::Column::Id.in_subquery(
                    Query::select()
                        .column(plan_assignment::Column::PlanId)
                        .from(plan_assignment::Entity)
                        .and_where(plan_assignment::Column::ManagerId.eq(actor.id))
                        .to_owned(),
                ),
            )
            .order_by_desc(plan::Column::StartDate)
            .order_by_desc(plan::Column::Id)
            .all(db)
            .await?;
        self.views(db, plans).await
    }

    pub async fn active_plans(&self, actor: &user::Model) -> Result<Vec<PlanView>, ServiceError> {
        self.list_plans(
            actor,
            &PlanListQuery {
                search: None,
                active_only: true,
            },
        )
        .await
    }

    /// Assignments whose manager the actor can see
    pub async fn list_assignments(
        &self,
        actor: &user::Model,
        query: &AssignmentListQuery,
    ) -> Result<Vec<PlanAssignmentView>, ServiceError> {
        let db = &*self.db_pool;
        let visibility = hierarchy::visibility(db, actor).await?;
        let mut select = plan_assignment::Entity::find();
        if let Some(ids) = visibility.user_ids() {
            select = select.filter(plan_assignment::Column::ManagerId.is_in(ids.to_vec()));
        }
        if let Some(plan_id) = query.plan_id {
            select = select.filter(plan_assignment::Column::PlanId.eq(plan_id));
        }
        let assignments = select
            .order_by_asc(plan_assignment::Column::PlanId)
            .order_by_asc(plan_assignment::Column::Id)
            .all(db)
            .await?;
        self.assignment_views(db, assignments).await
    }

    async fn recalc_plan_once(&self, plan_id: i32) -> Result<Vec<AssignmentProgress>, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await?;
        let plan = find_plan(&txn, plan_id).await?;
        let updated = progress::recalc_plan(&txn, &plan).await?;
        txn.commit().await?;
        Ok(updated.iter().map(AssignmentProgress::from).collect())
    }

    /// Bulk recalculation in its own transaction, retried on database errors
    #[instrument(skip(self))]
    pub async fn recalc_plan_by_id(&self, plan_id: i32) -> Result<Vec<AssignmentProgress>, ServiceError> {
        let result = with_retry(&self.retry, "recalc_plan", || async move {
            self.recalc_plan_once(plan_id).await
        })
        .await?;

        info!(plan_id, assignments = result.len(), "Plan progress recalculated");
        self.emit(Event::PlanRecalculated {
            plan_id,
            assignments: result.len(),
        })
        .await;
        Ok(result)
    }

    /// `recalc_plan_by_id` for a plan the actor can see
    pub async fn recalc_plan(
        &self,
        actor: &user::Model,
        plan_id: i32,
    ) -> Result<Vec<AssignmentProgress>, ServiceError> {
        self.ensure_plan_visible(&*self.db_pool, actor, plan_id).await?;
        self.recalc_plan_by_id(plan_id).await
    }

    /// Recalculate every plan; returns (plan_id, assignments touched)
    pub async fn recalc_all(&self) -> Result<Vec<(i32, usize)>, ServiceError> {
        let plan_ids: Vec<i32> = plan::Entity::find()
            .select_only()
            .column(plan::Column::Id)
            .order_by_asc(plan::Column::Id)
            .into_tuple()
            .all(&*self.db_pool)
            .await?;

        let mut summary = Vec::with_capacity(plan_ids.len());
        for plan_id in plan_ids {
            let progress = self.recalc_plan_by_id(plan_id).await?;
            summary.push((plan_id, progress.len()));
        }
        Ok(summary)
    }

    async fn recalc_assignment_once(
        &self,
        assignment_id: i32,
    ) -> Result<AssignmentProgress, ServiceError> {
        let db = &*self.db_pool;
        let txn = db.begin().await?;
        let assignment = plan_assignment::Entity::find_by_id(assignment_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Plan assignment", assignment_id))?;
        let plan = find_plan(&txn, assignment.plan_id).await?;
        let updated = progress::recalc_assignment(&txn, assignment, &plan).await?;
        txn.commit().await?;
        Ok(AssignmentProgress::from(&updated))
    }

    /// Recompute one assignment whose manager the actor can see, with retry
    #[instrument(skip(self, actor), fields(actor_id = actor.id))]
    pub async fn recalc_assignment(
        &self,
        actor: &user::Model,
        assignment_id: i32,
    ) -> Result<AssignmentProgress, ServiceError> {
        let db = &*self.db_pool;
        let assignment = plan_assignment::Entity::find_by_id(assignment_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Plan assignment", assignment_id))?;
        if !hierarchy::visibility(db, actor)
            .await?
            .allows(Some(assignment.manager_id))
        {
            return Err(ServiceError::Forbidden(format!(
                "assignment {} is outside your visibility",
                assignment_id
            )));
        }

        with_retry(&self.retry, "recalc_assignment", || async move {
            self.recalc_assignment_once(assignment_id).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn assignment(manager_id: i32, target_count: i32) -> AssignmentInput {
        AssignmentInput {
            manager_id,
            target_count,
            target_sum: None,
            criteria_operator: None,
        }
    }

    fn plan_payload(start: NaiveDate, end: NaiveDate) -> PlanPayload {
        PlanPayload {
            name: "June".into(),
            description: None,
            start_date: start,
            end_date: end,
            assignments: vec![],
        }
    }

    #[test]
    fn inverted_window_fails_validation() {
        let start = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        assert_matches!(
            validate_plan(&plan_payload(start, end)),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("start_date")
        );
        assert!(validate_plan(&plan_payload(end, start)).is_ok());
        assert!(validate_plan(&plan_payload(end, end)).is_ok());
    }

    #[test]
    fn blank_name_is_rejected() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let mut payload = plan_payload(day, day);
        payload.name = "   ".into();
        assert_matches!(validate_plan(&payload), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn duplicate_managers_are_rejected() {
        assert_matches!(
            validate_assignments(&[assignment(1, 5), assignment(1, 3)]),
            Err(ServiceError::ValidationError(msg)) if msg.contains("assignments[1].manager_id")
        );
    }

    #[test]
    fn negative_targets_are_rejected() {
        assert_matches!(
            validate_assignments(&[assignment(1, -1)]),
            Err(ServiceError::ValidationError(msg)) if msg.starts_with("assignments[0]")
        );
        let mut a = assignment(1, 1);
        a.target_sum = Some(dec!(-5));
        assert_matches!(
            validate_assignments(&[a]),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn assignment_defaults() {
        let specs = validate_assignments(&[assignment(7, 5)]).unwrap();
        assert_eq!(specs[0].target_sum, Decimal::ZERO);
        assert_eq!(specs[0].criteria_operator, CriteriaOperator::Both);
    }
}
