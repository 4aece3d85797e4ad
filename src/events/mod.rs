use crate::entities::order::{DeliveryStatus, PaymentMethod};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Who initiated a cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelledBy {
    Seller,
    Customer,
    Agent,
}

/// Domain events emitted by the order lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderPlaced {
        order_id: Uuid,
        customer_id: Uuid,
        payment_method: PaymentMethod,
        total_amount: i64,
    },
    OrderPaid {
        order_id: Uuid,
        payment_reference: String,
    },
    OrderClaimed {
        order_id: Uuid,
        agent_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: DeliveryStatus,
        new_status: DeliveryStatus,
    },
    OrderCancelled {
        order_id: Uuid,
        by: CancelledBy,
    },
    OrderDeleted(Uuid),
}

impl Event {
    pub fn order_id(&self) -> Uuid {
        match self {
            Event::OrderPlaced { order_id, .. }
            | Event::OrderPaid { order_id, .. }
            | Event::OrderClaimed { order_id, .. }
            | Event::OrderStatusChanged { order_id, .. }
            | Event::OrderCancelled { order_id, .. } => *order_id,
            Event::OrderDeleted(order_id) => *order_id,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        let order_id = event.order_id();
        if let Err(e) = self.send(event).await {
            warn!(order_id = %order_id, error = %e, "dropping order event");
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderPlaced {
                order_id,
                customer_id,
                payment_method,
                total_amount,
            } => info!(
                order_id = %order_id,
                customer_id = %customer_id,
                payment_method = %payment_method,
                total_amount,
                "order placed"
            ),
            Event::OrderPaid {
                order_id,
                payment_reference,
            } => info!(order_id = %order_id, payment_reference = %payment_reference, "order paid"),
            Event::OrderClaimed { order_id, agent_id } => {
                info!(order_id = %order_id, agent_id = %agent_id, "order claimed")
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(
                order_id = %order_id,
                old_status = %old_status,
                new_status = %new_status,
                "delivery status changed"
            ),
            Event::OrderCancelled { order_id, by } => {
                info!(order_id = %order_id, by = ?by, "order cancelled")
            }
            Event::OrderDeleted(order_id) => info!(order_id = %order_id, "order deleted"),
        }
    }

    info!("Event channel closed; stopping event processing loop");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sender_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let order_id = Uuid::new_v4();

        sender.send(Event::OrderDeleted(order_id)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Event::OrderDeleted(order_id)));
    }

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(Event::OrderDeleted(Uuid::new_v4())).await.is_err());
        sender.send_or_log(Event::OrderDeleted(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn process_events_exits_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(process_events(rx));
        EventSender::new(tx.clone())
            .send(Event::OrderClaimed {
                order_id: Uuid::new_v4(),
                agent_id: Uuid::new_v4(),
            })
            .await
            .unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
