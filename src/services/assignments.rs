use crate::{
    db::DbPool,
    entities::{
        delivery_agent::{self, AgentStatus},
        order::{self, DeliveryStatus, Entity as OrderEntity, Model as OrderModel},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        orders::{fetch_order, require_order},
        visibility::claimable_condition,
    },
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Assignment Manager: at most one agent ever holds an order
#[derive(Clone)]
pub struct AssignmentManager {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl AssignmentManager {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Claims an unassigned order for `agent_id`.
    ///
    /// The claim is one conditional update on `assigned_agent_id IS NULL` plus
    /// the agent's visibility rule, so of any number of concurrent claimants
    /// exactly one wins and nobody takes an order outside their view.
    /// Re-claiming an order the agent already holds succeeds without changes.
    #[instrument(skip(self), fields(order_id = %order_id, agent_id = %agent_id))]
    pub async fn claim(&self, order_id: Uuid, agent_id: Uuid) -> Result<OrderModel, ServiceError> {
        let agent = delivery_agent::Entity::find_by_id(agent_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load agent");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Agent {} not found", agent_id)))?;
        if agent.status == AgentStatus::Inactive {
            return Err(ServiceError::Forbidden(
                "Inactive agents cannot claim orders".to_string(),
            ));
        }

        let now = Utc::now();
        let claimed = OrderEntity::update_many()
            .col_expr(order::Column::AssignedAgentId, Expr::value(agent_id))
            .col_expr(order::Column::AssignedAt, Expr::value(now))
            .col_expr(order::Column::UpdatedAt, Expr::value(now))
            .filter(order::Column::Id.eq(order_id))
            .filter(claimable_condition(&agent))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to claim order");
                ServiceError::DatabaseError(e)
            })?
            .rows_affected;

        if claimed == 1 {
            metrics::counter!("grocery_assignments.claims_won", 1);
            self.event_sender
                .send_or_log(Event::OrderClaimed { order_id, agent_id })
                .await;
            info!("Order claimed");
            return require_order(&self.db_pool, order_id).await;
        }

        let current = fetch_order(&self.db_pool, order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        match current.assigned_agent_id {
            Some(holder) if holder == agent_id => {
                info!("Order already held by this agent");
                Ok(current)
            }
            Some(_) => {
                metrics::counter!("grocery_assignments.claims_lost", 1);
                warn!("Claim lost; order already assigned");
                Err(ServiceError::AlreadyClaimed(order_id))
            }
            None if current.delivery_status == DeliveryStatus::Cancelled => {
                Err(ServiceError::OrderCancelled(order_id))
            }
            None => {
                warn!("Claim refused; order outside the agent's view");
                Err(ServiceError::Forbidden(
                    "Order is not available to this agent".to_string(),
                ))
            }
        }
    }
}
