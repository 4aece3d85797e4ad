use crate::{
    auth::{AuthUser, Role},
    db::DbPool,
    entities::{
        address,
        order::{self, DeliveryStatus, Entity as OrderEntity, Model as OrderModel, PaymentMethod},
        order_item::{self, Entity as OrderItemEntity},
        product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::catalog::{AddressBook, ProductCatalog},
};
use chrono::{DateTime, Utc};
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// A requested line: product reference and quantity. Prices are never taken from the client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct LineItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PlaceOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<LineItemInput>,
    pub address_id: Uuid,
}

/// A validated, priced order that has not been written yet.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub address_id: Uuid,
    pub lines: Vec<PricedLine>,
    pub total_amount: i64,
}

#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    /// Absent when the product has since been removed from the catalog
    pub product_name: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AddressResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zipcode: String,
    pub country: String,
    pub phone: String,
}

impl From<address::Model> for AddressResponse {
    fn from(model: address::Model) -> Self {
        Self {
            id: model.id,
            first_name: model.first_name,
            last_name: model.last_name,
            street: model.street,
            city: model.city,
            state: model.state,
            zipcode: model.zipcode,
            country: model.country,
            phone: model.phone,
        }
    }
}

/// Order with line items and address resolved to full records
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub total_amount: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    pub is_paid: bool,
    pub payment_reference: Option<String>,
    pub delivery_status: DeliveryStatus,
    pub assigned_agent_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemResponse>,
    pub address: Option<AddressResponse>,
}

/// Computes the charge for a set of priced lines, in whole currency units.
///
/// `total = round(sum(unit_price * quantity) * (1 + surcharge_percent / 100))`,
/// rounding halves away from zero.
pub fn compute_total_amount(
    lines: &[(Decimal, i32)],
    surcharge_percent: u32,
) -> Result<i64, ServiceError> {
    let overflow = || ServiceError::InvalidInput("Order total is out of range".to_string());

    let subtotal = lines.iter().try_fold(Decimal::ZERO, |acc, (price, qty)| {
        price
            .checked_mul(Decimal::from(*qty))
            .and_then(|line| acc.checked_add(line))
    });
    let subtotal = subtotal.ok_or_else(overflow)?;

    let factor = Decimal::ONE + Decimal::from(surcharge_percent) / Decimal::ONE_HUNDRED;
    subtotal
        .checked_mul(factor)
        .map(|total| total.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|total| total.to_i64())
        .ok_or_else(overflow)
}

/// Order Store: creation, listings, single reads and history purge
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    catalog: Arc<dyn ProductCatalog>,
    addresses: Arc<dyn AddressBook>,
    event_sender: Arc<EventSender>,
    currency: String,
    surcharge_percent: u32,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        catalog: Arc<dyn ProductCatalog>,
        addresses: Arc<dyn AddressBook>,
        event_sender: Arc<EventSender>,
        currency: String,
        surcharge_percent: u32,
    ) -> Self {
        Self {
            db_pool,
            catalog,
            addresses,
            event_sender,
            currency,
            surcharge_percent,
        }
    }

    /// Validates a checkout request and prices it from live catalog offer prices.
    #[instrument(skip(self, request), fields(customer_id = %customer_id, lines = request.items.len()))]
    pub async fn quote(
        &self,
        customer_id: Uuid,
        request: &PlaceOrderRequest,
    ) -> Result<OrderDraft, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::InvalidInput(
                "Order must contain at least one item".to_string(),
            ));
        }
        if let Some(bad) = request.items.iter().find(|item| item.quantity < 1) {
            return Err(ServiceError::InvalidInput(format!(
                "Quantity for product {} must be at least 1",
                bad.product_id
            )));
        }

        match self.addresses.get_address(request.address_id).await? {
            Some(addr) if addr.user_id == customer_id => {}
            _ => {
                return Err(ServiceError::InvalidInput(format!(
                    "Unknown address {}",
                    request.address_id
                )))
            }
        }

        let mut lines = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = self
                .catalog
                .get_product(item.product_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::InvalidInput(format!("Unknown product {}", item.product_id))
                })?;
            lines.push(PricedLine {
                product_id: item.product_id,
                quantity: item.quantity,
                unit_price: product.offer_price,
            });
        }

        let priced: Vec<(Decimal, i32)> = lines.iter().map(|l| (l.unit_price, l.quantity)).collect();
        let total_amount = compute_total_amount(&priced, self.surcharge_percent)?;

        Ok(OrderDraft {
            id: Uuid::new_v4(),
            customer_id,
            address_id: request.address_id,
            lines,
            total_amount,
        })
    }

    /// Persists a priced draft with its line items in one transaction.
    #[instrument(skip(self, draft), fields(order_id = %draft.id, customer_id = %draft.customer_id))]
    pub async fn place(
        &self,
        draft: OrderDraft,
        payment_method: PaymentMethod,
        gateway_order_id: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let db = &*self.db_pool;
        let now = Utc::now();

        let txn = db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order = order::ActiveModel {
            id: Set(draft.id),
            customer_id: Set(draft.customer_id),
            total_amount: Set(draft.total_amount),
            currency: Set(self.currency.clone()),
            address_id: Set(draft.address_id),
            payment_method: Set(payment_method),
            is_paid: Set(false),
            payment_reference: Set(None),
            gateway_order_id: Set(gateway_order_id),
            delivery_status: Set(DeliveryStatus::Placed),
            assigned_agent_id: Set(None),
            assigned_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        OrderEntity::insert(order).exec(&txn).await.map_err(|e| {
            error!(error = %e, "Failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        let items: Vec<order_item::ActiveModel> = draft
            .lines
            .iter()
            .enumerate()
            .map(|(position, line)| order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(draft.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                position: Set(position as i32),
            })
            .collect();
        OrderItemEntity::insert_many(items)
            .exec(&txn)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to insert order items");
                ServiceError::DatabaseError(e)
            })?;

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order creation");
            ServiceError::DatabaseError(e)
        })?;

        let created = self.find(draft.id).await?;

        metrics::counter!("grocery_orders.placed", 1);
        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: created.id,
                customer_id: created.customer_id,
                payment_method,
                total_amount: created.total_amount,
            })
            .await;

        info!(order_id = %created.id, total_amount = created.total_amount, "Order placed");
        Ok(created)
    }

    /// Quotes and persists in one step.
    pub async fn create_order(
        &self,
        customer_id: Uuid,
        request: &PlaceOrderRequest,
        payment_method: PaymentMethod,
    ) -> Result<OrderModel, ServiceError> {
        let draft = self.quote(customer_id, request).await?;
        self.place(draft, payment_method, None).await
    }

    pub async fn find(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        require_order(&self.db_pool, order_id).await
    }

    /// Orders in the customer's history: cash orders, and online orders once paid. Newest first.
    #[instrument(skip(self))]
    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(listed_condition())
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list customer orders");
                ServiceError::DatabaseError(e)
            })?;
        self.load_details(orders).await
    }

    /// Every listed order across all customers. Newest first.
    #[instrument(skip(self))]
    pub async fn list_for_seller(&self) -> Result<Vec<OrderResponse>, ServiceError> {
        let orders = OrderEntity::find()
            .filter(listed_condition())
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to list seller orders");
                ServiceError::DatabaseError(e)
            })?;
        self.load_details(orders).await
    }

    /// Single-order read for the owner, any seller, or the assigned agent.
    #[instrument(skip(self, actor), fields(order_id = %order_id, role = %actor.role))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.find(order_id).await?;
        let allowed = match actor.role {
            Role::Seller => true,
            Role::Customer => order.customer_id == actor.user_id,
            Role::Agent => order.assigned_agent_id == Some(actor.user_id),
        };
        if !allowed {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".to_string(),
            ));
        }

        self.load_details(vec![order])
            .await?
            .pop()
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    /// Removes a finished order from history.
    ///
    /// Owners may delete delivered or cancelled orders; the assigned agent and
    /// sellers may delete delivered ones.
    #[instrument(skip(self, actor), fields(order_id = %order_id, role = %actor.role))]
    pub async fn delete_order(&self, order_id: Uuid, actor: &AuthUser) -> Result<(), ServiceError> {
        let order = self.find(order_id).await?;

        let (owns, deletable): (bool, Vec<DeliveryStatus>) = match actor.role {
            Role::Customer => (
                order.customer_id == actor.user_id,
                vec![DeliveryStatus::Delivered, DeliveryStatus::Cancelled],
            ),
            Role::Agent => (
                order.assigned_agent_id == Some(actor.user_id),
                vec![DeliveryStatus::Delivered],
            ),
            Role::Seller => (true, vec![DeliveryStatus::Delivered]),
        };

        if !owns {
            return Err(ServiceError::Forbidden(
                "You cannot delete this order".to_string(),
            ));
        }
        if !deletable.contains(&order.delivery_status) {
            return Err(ServiceError::InvalidInput(format!(
                "Order in status {} cannot be deleted",
                order.delivery_status
            )));
        }

        let db = &*self.db_pool;
        let txn = db.begin().await.map_err(ServiceError::DatabaseError)?;

        let mut delete = OrderEntity::delete_many()
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::DeliveryStatus.is_in(deletable));
        delete = match actor.role {
            Role::Customer => delete.filter(order::Column::CustomerId.eq(actor.user_id)),
            Role::Agent => delete.filter(order::Column::AssignedAgentId.eq(actor.user_id)),
            Role::Seller => delete,
        };

        OrderItemEntity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?;
        let deleted = delete
            .exec(&txn)
            .await
            .map_err(ServiceError::DatabaseError)?
            .rows_affected;

        if deleted == 0 {
            txn.rollback().await.map_err(ServiceError::DatabaseError)?;
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order deletion");
            ServiceError::DatabaseError(e)
        })?;

        self.event_sender
            .send_or_log(Event::OrderDeleted(order_id))
            .await;
        info!(order_id = %order_id, "Order deleted");
        Ok(())
    }

    /// Resolves line items, products and addresses for a batch of orders,
    /// keeping the input order.
    pub async fn load_details(
        &self,
        orders: Vec<OrderModel>,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        if orders.is_empty() {
            return Ok(Vec::new());
        }

        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .order_by_asc(order_item::Column::Position)
            .all(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load order items");
                ServiceError::DatabaseError(e)
            })?;

        let product_ids: Vec<Uuid> = items
            .iter()
            .map(|i| i.product_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let address_ids: Vec<Uuid> = orders
            .iter()
            .map(|o| o.address_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let products: HashMap<Uuid, product::Model> = self
            .catalog
            .get_products(&product_ids)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();
        let addresses: HashMap<Uuid, address::Model> = self
            .addresses
            .get_addresses(&address_ids)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut items_by_order: HashMap<Uuid, Vec<OrderItemResponse>> = HashMap::new();
        for item in items {
            items_by_order
                .entry(item.order_id)
                .or_default()
                .push(OrderItemResponse {
                    product_id: item.product_id,
                    product_name: products.get(&item.product_id).map(|p| p.name.clone()),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                });
        }

        Ok(orders
            .into_iter()
            .map(|o| {
                // An address may back several orders in one batch.
                let address = addresses
                    .get(&o.address_id)
                    .cloned()
                    .map(AddressResponse::from);
                OrderResponse {
                    items: items_by_order.remove(&o.id).unwrap_or_default(),
                    address,
                    id: o.id,
                    customer_id: o.customer_id,
                    total_amount: o.total_amount,
                    currency: o.currency,
                    payment_method: o.payment_method,
                    is_paid: o.is_paid,
                    payment_reference: o.payment_reference,
                    delivery_status: o.delivery_status,
                    assigned_agent_id: o.assigned_agent_id,
                    assigned_at: o.assigned_at,
                    created_at: o.created_at,
                }
            })
            .collect())
    }
}

pub async fn fetch_order(db: &DbPool, order_id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
    OrderEntity::find_by_id(order_id).one(db).await.map_err(|e| {
        error!(error = %e, order_id = %order_id, "Failed to fetch order from database");
        ServiceError::DatabaseError(e)
    })
}

pub async fn require_order(db: &DbPool, order_id: Uuid) -> Result<OrderModel, ServiceError> {
    fetch_order(db, order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

/// Cash orders always; online orders once paid.
pub fn listed_condition() -> sea_orm::Condition {
    sea_orm::Condition::any()
        .add(order::Column::PaymentMethod.eq(PaymentMethod::CashOnDelivery))
        .add(order::Column::IsPaid.eq(true))
}
