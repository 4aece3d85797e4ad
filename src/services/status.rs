use crate::{
    auth::{AuthUser, Role},
    db::DbPool,
    entities::order::{self, DeliveryStatus, Entity as OrderEntity, Model as OrderModel},
    errors::ServiceError,
    events::{CancelledBy, Event, EventSender},
    services::orders::require_order,
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Checks a delivery step against the state machine.
///
/// Allowed: the immediate successor of `current`, or `Cancelled` from any
/// non-terminal status. Nothing leaves `Delivered` or `Cancelled`.
pub fn validate_transition(
    current: DeliveryStatus,
    target: DeliveryStatus,
) -> Result<(), ServiceError> {
    if current.is_terminal() {
        return Err(ServiceError::InvalidTransition(format!(
            "order is already {}",
            current
        )));
    }
    if target == DeliveryStatus::Cancelled || current.successor() == Some(target) {
        return Ok(());
    }
    Err(ServiceError::InvalidTransition(format!(
        "{} -> {}",
        current, target
    )))
}

/// Status Tracker: drives delivery progression and cancellations
#[derive(Clone)]
pub struct StatusTracker {
    db_pool: Arc<DbPool>,
    event_sender: Arc<EventSender>,
}

impl StatusTracker {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            db_pool,
            event_sender,
        }
    }

    /// Moves an order one step forward (or to `Cancelled`) on behalf of its agent.
    #[instrument(skip(self), fields(order_id = %order_id, agent_id = %agent_id, target = %target))]
    pub async fn advance(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
        target: DeliveryStatus,
    ) -> Result<OrderModel, ServiceError> {
        let order = require_order(&self.db_pool, order_id).await?;
        if order.assigned_agent_id != Some(agent_id) {
            return Err(ServiceError::Forbidden(
                "Only the assigned agent can update this order".to_string(),
            ));
        }

        let current = order.delivery_status;
        if let Err(e) = validate_transition(current, target) {
            metrics::counter!("grocery_orders.transitions_rejected", 1);
            warn!(current = %current, "Rejected delivery status transition");
            return Err(e);
        }

        // Conditioned on the status we validated against
        let updated = OrderEntity::update_many()
            .col_expr(order::Column::DeliveryStatus, Expr::value(target))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::AssignedAgentId.eq(agent_id))
            .filter(order::Column::DeliveryStatus.eq(current))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to update delivery status");
                ServiceError::DatabaseError(e)
            })?
            .rows_affected;

        if updated == 0 {
            metrics::counter!("grocery_orders.transitions_rejected", 1);
            return Err(ServiceError::InvalidTransition(format!(
                "order status changed concurrently from {}",
                current
            )));
        }

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: current,
                new_status: target,
            })
            .await;
        if target == DeliveryStatus::Cancelled {
            self.event_sender
                .send_or_log(Event::OrderCancelled {
                    order_id,
                    by: CancelledBy::Agent,
                })
                .await;
        }

        info!(from = %current, "Delivery status advanced");
        require_order(&self.db_pool, order_id).await
    }

    /// Cancels a non-terminal order. Sellers may cancel any order regardless of
    /// assignment; customers only their own.
    #[instrument(skip(self, actor), fields(order_id = %order_id, role = %actor.role))]
    pub async fn cancel(&self, order_id: Uuid, actor: &AuthUser) -> Result<OrderModel, ServiceError> {
        let by = match actor.role {
            Role::Seller => CancelledBy::Seller,
            Role::Customer => CancelledBy::Customer,
            Role::Agent => {
                return Err(ServiceError::Forbidden(
                    "Agents cancel through the delivery status update".to_string(),
                ))
            }
        };

        let mut update = OrderEntity::update_many()
            .col_expr(
                order::Column::DeliveryStatus,
                Expr::value(DeliveryStatus::Cancelled),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::DeliveryStatus.is_in(DeliveryStatus::cancellable()));
        if by == CancelledBy::Customer {
            update = update.filter(order::Column::CustomerId.eq(actor.user_id));
        }

        let cancelled = update
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to cancel order");
                ServiceError::DatabaseError(e)
            })?
            .rows_affected;

        if cancelled == 0 {
            let current = require_order(&self.db_pool, order_id).await?;
            if by == CancelledBy::Customer && current.customer_id != actor.user_id {
                return Err(ServiceError::Forbidden(
                    "You can only cancel your own orders".to_string(),
                ));
            }
            metrics::counter!("grocery_orders.transitions_rejected", 1);
            return Err(ServiceError::InvalidTransition(format!(
                "order is already {}",
                current.delivery_status
            )));
        }

        let order = require_order(&self.db_pool, order_id).await?;
        self.event_sender
            .send_or_log(Event::OrderCancelled { order_id, by })
            .await;
        info!("Order cancelled");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;
    use sea_orm::Iterable;
    use crate::entities::order::DeliveryStatus::*;

    #[rstest]
    #[case(Placed, Picked)]
    #[case(Picked, OutForDelivery)]
    #[case(OutForDelivery, Arriving)]
    #[case(Arriving, ReachedLocation)]
    #[case(ReachedLocation, Delivered)]
    fn immediate_successor_is_allowed(#[case] from: DeliveryStatus, #[case] to: DeliveryStatus) {
        assert!(validate_transition(from, to).is_ok());
    }

    #[rstest]
    #[case(Placed, Delivered)]
    #[case(Picked, Arriving)]
    #[case(Placed, Placed)]
    #[case(Arriving, Picked)]
    #[case(ReachedLocation, OutForDelivery)]
    fn skips_and_reversals_are_rejected(#[case] from: DeliveryStatus, #[case] to: DeliveryStatus) {
        assert_matches!(
            validate_transition(from, to),
            Err(ServiceError::InvalidTransition(_))
        );
    }

    #[test]
    fn cancel_allowed_from_every_non_terminal_status() {
        for status in DeliveryStatus::cancellable() {
            assert!(validate_transition(status, Cancelled).is_ok(), "{status}");
        }
    }

    #[test]
    fn terminal_statuses_accept_nothing() {
        for target in DeliveryStatus::iter() {
            assert!(validate_transition(Delivered, target).is_err());
            assert!(validate_transition(Cancelled, target).is_err());
        }
    }

    #[test]
    fn exactly_one_forward_step_from_each_active_status() {
        for from in DeliveryStatus::cancellable() {
            let allowed: Vec<_> = DeliveryStatus::iter()
                .filter(|to| *to != Cancelled && validate_transition(from, *to).is_ok())
                .collect();
            assert_eq!(allowed, vec![from.successor().unwrap()]);
        }
    }
}
