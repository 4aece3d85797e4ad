pub mod agents;
pub mod health;
pub mod orders;
pub mod payments;

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        agents::AgentService,
        assignments::AssignmentManager,
        catalog::{DbAddressBook, DbCart, DbProductCatalog},
        orders::OrderService,
        payments::{PaymentGateway, PaymentReconciler},
        status::StatusTracker,
        visibility::VisibilityFilter,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentReconciler>,
    pub assignments: Arc<AssignmentManager>,
    pub visibility: Arc<VisibilityFilter>,
    pub status: Arc<StatusTracker>,
    pub agents: Arc<AgentService>,
}

impl AppServices {
    /// Wires the lifecycle services over the shared pool. The gateway is
    /// injected so tests can substitute a local double.
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        auth_service: Arc<AuthService>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            Arc::new(DbProductCatalog::new(db_pool.clone())),
            Arc::new(DbAddressBook::new(db_pool.clone())),
            event_sender.clone(),
            config.currency.clone(),
            config.order_surcharge_percent,
        ));
        let payments = Arc::new(PaymentReconciler::new(
            db_pool.clone(),
            gateway,
            Arc::new(DbCart::new(db_pool.clone())),
            event_sender.clone(),
            config.payment_key_secret.clone(),
            config.currency.clone(),
        ));

        Self {
            orders,
            payments,
            assignments: Arc::new(AssignmentManager::new(db_pool.clone(), event_sender.clone())),
            visibility: Arc::new(VisibilityFilter::new(db_pool.clone())),
            status: Arc::new(StatusTracker::new(db_pool.clone(), event_sender)),
            agents: Arc::new(AgentService::new(db_pool, auth_service)),
        }
    }
}
