pub mod analytics;
pub mod orders;
pub mod plans;
pub mod users;

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    retry::RetryConfig,
    services::{
        analytics::AnalyticsService, hierarchy::HierarchyService, orders::OrderService,
        plans::PlanService,
    },
};
use std::sync::Arc;

pub use crate::AppState;

/// Services shared by the HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub auth: Arc<AuthService>,
    pub orders: Arc<OrderService>,
    pub plans: Arc<PlanService>,
    pub hierarchy: Arc<HierarchyService>,
    pub analytics: Arc<AnalyticsService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        config: &AppConfig,
    ) -> Self {
        let retry = RetryConfig::with_max_attempts(config.recalc_max_retries.saturating_add(1));
        Self {
            auth: Arc::new(AuthService::from_config(config)),
            orders: Arc::new(OrderService::new(db_pool.clone(), event_sender.clone())),
            plans: Arc::new(PlanService::new(
                db_pool.clone(),
                event_sender.clone(),
                retry,
            )),
            hierarchy: Arc::new(HierarchyService::new(db_pool.clone(), event_sender)),
            analytics: Arc::new(AnalyticsService::new(db_pool)),
        }
    }
}
