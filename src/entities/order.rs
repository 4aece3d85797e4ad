use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Delivery progression of an order.
///
/// The forward chain is `Placed -> Picked -> OutForDelivery -> Arriving ->
/// ReachedLocation -> Delivered`; `Cancelled` is reachable from every
/// non-terminal state.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum DeliveryStatus {
    #[sea_orm(string_value = "Placed")]
    Placed,
    #[sea_orm(string_value = "Picked")]
    Picked,
    #[sea_orm(string_value = "OutForDelivery")]
    OutForDelivery,
    #[sea_orm(string_value = "Arriving")]
    Arriving,
    #[sea_orm(string_value = "ReachedLocation")]
    ReachedLocation,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "Cancelled")]
    Cancelled,
}

impl DeliveryStatus {
    /// The single forward step from this status, if any.
    pub fn successor(self) -> Option<DeliveryStatus> {
        match self {
            Self::Placed => Some(Self::Picked),
            Self::Picked => Some(Self::OutForDelivery),
            Self::OutForDelivery => Some(Self::Arriving),
            Self::Arriving => Some(Self::ReachedLocation),
            Self::ReachedLocation => Some(Self::Delivered),
            Self::Delivered | Self::Cancelled => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Statuses from which a cancellation is still possible.
    pub fn cancellable() -> Vec<DeliveryStatus> {
        vec![
            Self::Placed,
            Self::Picked,
            Self::OutForDelivery,
            Self::Arriving,
            Self::ReachedLocation,
        ]
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "COD")]
    CashOnDelivery,
    #[sea_orm(string_value = "Online")]
    Online,
}

/// The `orders` table.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub customer_id: Uuid,

    /// Whole currency units, surcharge included.
    pub total_amount: i64,

    pub currency: String,

    pub address_id: Uuid,

    pub payment_method: PaymentMethod,

    pub is_paid: bool,

    /// Gateway payment id (online) or a cash receipt marker (COD).
    pub payment_reference: Option<String>,

    /// Gateway-side order handle the checkout signature is bound to.
    pub gateway_order_id: Option<String>,

    pub delivery_status: DeliveryStatus,

    pub assigned_agent_id: Option<Uuid>,

    pub assigned_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Orders paid online only surface in histories once settled.
    pub fn is_listed(&self) -> bool {
        self.payment_method == PaymentMethod::CashOnDelivery || self.is_paid
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItem,
    #[sea_orm(
        belongs_to = "super::delivery_agent::Entity",
        from = "Column::AssignedAgentId",
        to = "super::delivery_agent::Column::Id"
    )]
    DeliveryAgent,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItem.def()
    }
}

impl Related<super::delivery_agent::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeliveryAgent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Iterable;

    #[test]
    fn forward_chain_reaches_delivered_in_five_steps() {
        let mut status = DeliveryStatus::Placed;
        let mut steps = 0;
        while let Some(next) = status.successor() {
            status = next;
            steps += 1;
        }
        assert_eq!(status, DeliveryStatus::Delivered);
        assert_eq!(steps, 5);
    }

    #[test]
    fn only_delivered_and_cancelled_are_terminal() {
        for status in DeliveryStatus::iter() {
            let expected = matches!(status, DeliveryStatus::Delivered | DeliveryStatus::Cancelled);
            assert_eq!(status.is_terminal(), expected, "{status}");
            assert_eq!(
                DeliveryStatus::cancellable().contains(&status),
                !expected,
                "{status}"
            );
        }
    }
}
