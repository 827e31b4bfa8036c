//! Manager/subordinate graph over user records.
//!
//! Visibility looks only one level down: a department head sees
//! direct reports, not the reports of those reports. The upward
//! `get_manager_chain` walk is unbounded and is used for chain-of-command
//! display and cycle checks only.

use crate::{
    db::DbPool,
    entities::user,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

/// Set of users whose orders an actor may read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Unrestricted,
    Users(Vec<i32>),
}

impl Visibility {
    pub fn allows(&self, user_id: Option<i32>) -> bool {
        match (self, user_id) {
            (Visibility::Unrestricted, _) => true,
            (Visibility::Users(ids), Some(id)) => ids.contains(&id),
            (Visibility::Users(_), None) => false,
        }
    }

    /// `None` when unrestricted
    pub fn user_ids(&self) -> Option<&[i32]> {
        match self {
            Visibility::Unrestricted => None,
            Visibility::Users(ids) => Some(ids),
        }
    }
}

/// Direct, active reports of `user_id`
pub async fn get_subordinates<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<Vec<user::Model>, ServiceError> {
    user::Entity::find()
        .filter(user::Column::ManagerId.eq(user_id))
        .filter(user::Column::Active.eq(true))
        .order_by_asc(user::Column::Id)
        .all(db)
        .await
        .map_err(ServiceError::DatabaseError)
}

pub async fn is_manager_of<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
    candidate_id: i32,
) -> Result<bool, ServiceError> {
    Ok(get_subordinates(db, user_id)
        .await?
        .iter()
        .any(|s| s.id == candidate_id))
}

/// The actor itself or one of its direct reports
pub async fn can_manage<C: ConnectionTrait>(
    db: &C,
    actor: &user::Model,
    candidate_id: i32,
) -> Result<bool, ServiceError> {
    if actor.id == candidate_id {
        return Ok(true);
    }
    is_manager_of(db, actor.id, candidate_id).await
}

/// `can_manage`, with superusers allowed to act on anyone
pub async fn can_act_for<C: ConnectionTrait>(
    db: &C,
    actor: &user::Model,
    candidate_id: i32,
) -> Result<bool, ServiceError> {
    if actor.is_superuser {
        return Ok(true);
    }
    can_manage(db, actor, candidate_id).await
}

pub async fn visibility<C: ConnectionTrait>(
    db: &C,
    actor: &user::Model,
) -> Result<Visibility, ServiceError> {
    if actor.is_superuser {
        return Ok(Visibility::Unrestricted);
    }
    let mut ids = vec![actor.id];
    ids.extend(get_subordinates(db, actor.id).await?.into_iter().map(|u| u.id));
    Ok(Visibility::Users(ids))
}

/// Managers above `user_id`, nearest first. Stops if a cycle is found in existing data.
pub async fn get_manager_chain<C: ConnectionTrait>(
    db: &C,
    user_id: i32,
) -> Result<Vec<user::Model>, ServiceError> {
    let start = find_user(db, user_id).await?;
    let mut seen = HashSet::from([start.id]);
    let mut chain = Vec::new();
    let mut next = start.manager_id;

    while let Some(manager_id) = next {
        if !seen.insert(manager_id) {
            warn!(user_id, manager_id, "Manager cycle detected while walking chain");
            break;
        }
        let Some(manager) = user::Entity::find_by_id(manager_id).one(db).await? else {
            break;
        };
        next = manager.manager_id;
        chain.push(manager);
    }

    Ok(chain)
}

async fn find_user<C: ConnectionTrait>(db: &C, user_id: i32) -> Result<user::Model, ServiceError> {
    user::Entity::find_by_id(user_id)
        .one(db)
        .await?
        .ok_or_else(|| ServiceError::not_found("User", user_id))
}

/// Compact user view used in hierarchy responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserSummary {
    pub id: i32,
    pub username: String,
    pub name: String,
    pub role: String,
    pub manager_id: Option<i32>,
    pub active: bool,
}

impl From<user::Model> for UserSummary {
    fn from(user: user::Model) -> Self {
        Self {
            name: user.display_name(),
            id: user.id,
            username: user.username,
            role: user.role,
            manager_id: user.manager_id,
            active: user.active,
        }
    }
}

#[derive(Clone)]
pub struct HierarchyService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl HierarchyService {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    pub async fn subordinates(&self, actor: &user::Model) -> Result<Vec<UserSummary>, ServiceError> {
        let users = get_subordinates(&*self.db_pool, actor.id).await?;
        Ok(users.into_iter().map(UserSummary::from).collect())
    }

    /// Chain of command above `user_id`; the actor must be able to see that user
    pub async fn manager_chain(
        &self,
        actor: &user::Model,
        user_id: i32,
    ) -> Result<Vec<UserSummary>, ServiceError> {
        let db = &*self.db_pool;
        if !visibility(db, actor).await?.allows(Some(user_id)) {
            return Err(ServiceError::Forbidden(format!(
                "user {} is outside your visibility",
                user_id
            )));
        }
        let chain = get_manager_chain(db, user_id).await?;
        Ok(chain.into_iter().map(UserSummary::from).collect())
    }

    /// Reassign (or clear) a user's manager, rejecting self-management and cycles
    #[instrument(skip(self, actor), fields(actor_id = actor.id))]
    pub async fn set_manager(
        &self,
        actor: &user::Model,
        user_id: i32,
        manager_id: Option<i32>,
    ) -> Result<UserSummary, ServiceError> {
        if !actor.is_superuser {
            return Err(ServiceError::Forbidden(
                "only superusers may change the hierarchy".to_string(),
            ));
        }

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for manager change");
            ServiceError::DatabaseError(e)
        })?;

        let target = find_user(&txn, user_id).await?;

        if let Some(manager_id) = manager_id {
            if manager_id == user_id {
                return Err(ServiceError::ValidationError(
                    "manager_id: a user cannot manage themselves".to_string(),
                ));
            }
            find_user(&txn, manager_id).await?;
            let ancestors = get_manager_chain(&txn, manager_id).await?;
            if ancestors.iter().any(|a| a.id == user_id) {
                return Err(ServiceError::ValidationError(format!(
                    "manager_id: user {} already reports to user {}, assignment would create a cycle",
                    manager_id, user_id
                )));
            }
        }

        let mut active: user::ActiveModel = target.into();
        active.manager_id = Set(manager_id);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await.map_err(|e| {
            error!(error = %e, user_id, "Failed to update manager");
            ServiceError::DatabaseError(e)
        })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, user_id, "Failed to commit manager change");
            ServiceError::DatabaseError(e)
        })?;

        info!(user_id, ?manager_id, "Manager changed");

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender
                .send(Event::ManagerChanged {
                    user_id,
                    manager_id,
                })
                .await
            {
                warn!(error = %e, user_id, "Failed to send manager changed event");
            }
        }

        Ok(updated.into())
    }
}
