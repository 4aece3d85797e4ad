use crate::{
    db::DbPool,
    entities::{
        delivery_agent::{self, Model as AgentModel},
        order::{self, DeliveryStatus, Entity as OrderEntity, Model as OrderModel},
    },
    errors::ServiceError,
    services::orders::listed_condition,
};
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Whether `order` belongs in `agent`'s view.
///
/// An agent sees every order assigned to them, plus unassigned orders placed
/// at or after their registration that are listed (cash, or paid online) and
/// not cancelled.
pub fn is_visible_to(order: &OrderModel, agent: &AgentModel) -> bool {
    match order.assigned_agent_id {
        Some(holder) => holder == agent.id,
        None => {
            order.created_at >= agent.created_at
                && order.is_listed()
                && order.delivery_status != DeliveryStatus::Cancelled
        }
    }
}

/// Unassigned orders `agent` may claim. Query form of the unassigned arm of
/// [`is_visible_to`].
pub fn claimable_condition(agent: &AgentModel) -> Condition {
    Condition::all()
        .add(order::Column::AssignedAgentId.is_null())
        .add(order::Column::CreatedAt.gte(agent.created_at))
        .add(order::Column::DeliveryStatus.ne(DeliveryStatus::Cancelled))
        .add(listed_condition())
}

fn visible_condition(agent: &AgentModel) -> Condition {
    Condition::any()
        .add(order::Column::AssignedAgentId.eq(agent.id))
        .add(claimable_condition(agent))
}

/// Visibility Filter: the order sets an agent may see and act on
#[derive(Clone)]
pub struct VisibilityFilter {
    db_pool: Arc<DbPool>,
}

impl VisibilityFilter {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    async fn agent(&self, agent_id: Uuid) -> Result<AgentModel, ServiceError> {
        delivery_agent::Entity::find_by_id(agent_id)
            .one(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, agent_id = %agent_id, "Failed to load agent");
                ServiceError::DatabaseError(e)
            })?
            .ok_or_else(|| ServiceError::NotFound(format!("Agent {} not found", agent_id)))
    }

    async fn query(&self, condition: Condition) -> Result<Vec<OrderModel>, ServiceError> {
        OrderEntity::find()
            .filter(condition)
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to query agent orders");
                ServiceError::DatabaseError(e)
            })
    }

    /// Orders assigned to the agent plus claimable ones, newest first.
    #[instrument(skip(self))]
    pub async fn visible_orders(&self, agent_id: Uuid) -> Result<Vec<OrderModel>, ServiceError> {
        let agent = self.agent(agent_id).await?;
        let orders = self.query(visible_condition(&agent)).await?;
        debug!(count = orders.len(), "Visible orders computed");
        Ok(orders)
    }

    /// Visible orders that still need work.
    #[instrument(skip(self))]
    pub async fn active_orders(&self, agent_id: Uuid) -> Result<Vec<OrderModel>, ServiceError> {
        let agent = self.agent(agent_id).await?;
        self.query(
            Condition::all()
                .add(visible_condition(&agent))
                .add(order::Column::DeliveryStatus.ne(DeliveryStatus::Delivered)),
        )
        .await
    }

    /// The agent's own completed deliveries.
    #[instrument(skip(self))]
    pub async fn history(&self, agent_id: Uuid) -> Result<Vec<OrderModel>, ServiceError> {
        let agent = self.agent(agent_id).await?;
        self.query(
            Condition::all()
                .add(order::Column::AssignedAgentId.eq(agent.id))
                .add(order::Column::DeliveryStatus.eq(DeliveryStatus::Delivered)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::delivery_agent::AgentStatus;
    use crate::entities::order::PaymentMethod;
    use chrono::{Duration, Utc};

    fn agent_registered_at(created_at: chrono::DateTime<chrono::Utc>) -> AgentModel {
        AgentModel {
            id: Uuid::new_v4(),
            name: "Ravi".into(),
            phone: "9876543210".into(),
            password_hash: String::new(),
            status: AgentStatus::Available,
            created_at,
        }
    }

    fn order_created_at(created_at: chrono::DateTime<chrono::Utc>) -> OrderModel {
        OrderModel {
            id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            total_amount: 500,
            currency: "INR".into(),
            address_id: Uuid::new_v4(),
            payment_method: PaymentMethod::CashOnDelivery,
            is_paid: false,
            payment_reference: None,
            gateway_order_id: None,
            delivery_status: DeliveryStatus::Placed,
            assigned_agent_id: None,
            assigned_at: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn registration_time_bounds_unassigned_orders() {
        let t = Utc::now();
        let agent = agent_registered_at(t);
        assert!(!is_visible_to(&order_created_at(t - Duration::seconds(1)), &agent));
        assert!(is_visible_to(&order_created_at(t), &agent));
        assert!(is_visible_to(&order_created_at(t + Duration::seconds(1)), &agent));
    }

    #[test]
    fn own_assignments_are_visible_regardless_of_age() {
        let t = Utc::now();
        let agent = agent_registered_at(t);
        let mut order = order_created_at(t - Duration::days(30));
        order.assigned_agent_id = Some(agent.id);
        assert!(is_visible_to(&order, &agent));

        order.assigned_agent_id = Some(Uuid::new_v4());
        assert!(!is_visible_to(&order, &agent));
    }

    #[test]
    fn unpaid_online_and_cancelled_orders_are_not_claimable() {
        let t = Utc::now();
        let agent = agent_registered_at(t);

        let mut online = order_created_at(t + Duration::seconds(5));
        online.payment_method = PaymentMethod::Online;
        assert!(!is_visible_to(&online, &agent));
        online.is_paid = true;
        assert!(is_visible_to(&online, &agent));

        let mut cancelled = order_created_at(t + Duration::seconds(5));
        cancelled.delivery_status = DeliveryStatus::Cancelled;
        assert!(!is_visible_to(&cancelled, &agent));
    }
}
