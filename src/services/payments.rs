use crate::{
    config::AppConfig,
    db::DbPool,
    entities::order::{self, DeliveryStatus, Entity as OrderEntity, Model as OrderModel, PaymentMethod},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::Cart,
        orders::{fetch_order, require_order},
    },
};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sea_orm::{sea_query::Expr, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

type HmacSha256 = Hmac<Sha256>;

/// Charge intent created at the gateway, amount in minor units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GatewayIntent {
    pub gateway_order_id: String,
    pub amount: i64,
    pub currency: String,
}

/// Checkout callback payload forwarded by the client after the gateway returns
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PaymentVerification {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 128))]
    pub gateway_order_id: String,
    #[validate(length(min = 1, max = 128))]
    pub gateway_payment_id: String,
    #[validate(length(min = 1, max = 256))]
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettlementOutcome {
    pub order_id: Uuid,
    pub is_paid: bool,
    /// True when the order had already been settled and nothing changed
    pub already_settled: bool,
    pub payment_reference: Option<String>,
}

/// Which side of the delivery is settling the payment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementFlow {
    /// Customer checkout; clears the customer's cart once settled
    Customer(Uuid),
    /// Assigned agent collecting online at the door
    Agent(Uuid),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayIntent, ServiceError>;
}

#[derive(Debug, Serialize)]
struct CreateGatewayOrder<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GatewayOrder {
    id: String,
    amount: i64,
    currency: String,
}

/// REST client for a Razorpay-compatible orders API
#[derive(Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl RazorpayGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        Self::new(
            cfg.payment_gateway_url.clone(),
            cfg.payment_key_id.clone(),
            cfg.payment_key_secret.clone(),
            cfg.payment_timeout(),
        )
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    #[instrument(skip(self))]
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        receipt: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let url = format!("{}/v1/orders", self.base_url);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&CreateGatewayOrder {
                amount: amount_minor,
                currency,
                receipt,
            })
            .send()
            .await
            .map_err(|e| {
                metrics::counter!("grocery_payments.gateway_errors", 1);
                error!(error = %e, "Payment gateway request failed");
                ServiceError::GatewayError(format!("request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            metrics::counter!("grocery_payments.gateway_errors", 1);
            error!(status = %status, "Payment gateway rejected intent");
            return Err(ServiceError::GatewayError(format!(
                "gateway responded with {}",
                status
            )));
        }

        let created: GatewayOrder = response.json().await.map_err(|e| {
            ServiceError::GatewayError(format!("unreadable gateway response: {}", e))
        })?;

        if created.amount != amount_minor || !created.currency.eq_ignore_ascii_case(currency) {
            error!(
                requested = amount_minor,
                returned = created.amount,
                "Payment gateway returned a mismatched intent"
            );
            return Err(ServiceError::GatewayError(
                "gateway intent does not match the order amount".to_string(),
            ));
        }

        Ok(GatewayIntent {
            gateway_order_id: created.id,
            amount: created.amount,
            currency: created.currency,
        })
    }
}

/// Hex HMAC-SHA256 over `gateway_order_id|gateway_payment_id`.
pub fn compute_signature(gateway_order_id: &str, gateway_payment_id: &str, secret: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(gateway_order_id.as_bytes());
    mac.update(b"|");
    mac.update(gateway_payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a checkout signature in constant time.
pub fn verify_signature(
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
    secret: &str,
) -> bool {
    if secret.is_empty() {
        return false;
    }
    let expected = compute_signature(gateway_order_id, gateway_payment_id, secret);
    constant_time_eq(&expected, &signature.to_ascii_lowercase())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Binds gateway transactions and cash collections to orders, at most once.
#[derive(Clone)]
pub struct PaymentReconciler {
    db_pool: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    cart: Arc<dyn Cart>,
    event_sender: Arc<EventSender>,
    key_secret: String,
    currency: String,
}

impl PaymentReconciler {
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        cart: Arc<dyn Cart>,
        event_sender: Arc<EventSender>,
        key_secret: String,
        currency: String,
    ) -> Self {
        Self {
            db_pool,
            gateway,
            cart,
            event_sender,
            key_secret,
            currency,
        }
    }

    /// Requests an amount-matched intent for an order total in whole units.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn request_intent(
        &self,
        order_id: Uuid,
        total_amount: i64,
    ) -> Result<GatewayIntent, ServiceError> {
        let amount_minor = total_amount
            .checked_mul(100)
            .ok_or_else(|| ServiceError::InvalidInput("Order total is out of range".into()))?;
        self.gateway
            .create_intent(amount_minor, &self.currency, &order_id.to_string())
            .await
    }

    /// Creates a fresh intent for a persisted, unpaid order and records its handle.
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn create_gateway_intent(
        &self,
        order: &OrderModel,
    ) -> Result<GatewayIntent, ServiceError> {
        ensure_payable(order)?;
        let intent = self.request_intent(order.id, order.total_amount).await?;

        let bound = OrderEntity::update_many()
            .col_expr(
                order::Column::GatewayOrderId,
                Expr::value(intent.gateway_order_id.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::IsPaid.eq(false))
            .filter(order::Column::DeliveryStatus.ne(DeliveryStatus::Cancelled))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to record gateway order id");
                ServiceError::DatabaseError(e)
            })?
            .rows_affected;

        if bound == 0 {
            return Err(ServiceError::InvalidInput(
                "Order is already paid or cancelled".to_string(),
            ));
        }

        info!(gateway_order_id = %intent.gateway_order_id, "Gateway intent bound to order");
        Ok(intent)
    }

    /// New intent for the customer's own unpaid online order, e.g. after a gateway failure.
    pub async fn retry_gateway_intent(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<GatewayIntent, ServiceError> {
        let order = require_order(&self.db_pool, order_id).await?;
        if order.customer_id != customer_id {
            return Err(ServiceError::Forbidden(
                "You can only pay for your own orders".to_string(),
            ));
        }
        if order.payment_method != PaymentMethod::Online {
            return Err(ServiceError::InvalidInput(
                "Cash orders are paid on delivery".to_string(),
            ));
        }
        self.create_gateway_intent(&order).await
    }

    /// Intent requested by the assigned agent to collect an order online at the door.
    pub async fn agent_gateway_intent(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
    ) -> Result<GatewayIntent, ServiceError> {
        let order = require_order(&self.db_pool, order_id).await?;
        ensure_assignee(&order, agent_id)?;
        self.create_gateway_intent(&order).await
    }

    /// Verifies the gateway signature and marks the order paid exactly once.
    ///
    /// A repeat verification of a settled order succeeds without side effects.
    #[instrument(skip(self, verification), fields(order_id = %verification.order_id))]
    pub async fn verify_and_settle(
        &self,
        verification: &PaymentVerification,
        flow: SettlementFlow,
    ) -> Result<SettlementOutcome, ServiceError> {
        let order = require_order(&self.db_pool, verification.order_id).await?;
        match flow {
            SettlementFlow::Customer(customer_id) if order.customer_id != customer_id => {
                return Err(ServiceError::Forbidden(
                    "You can only pay for your own orders".to_string(),
                ))
            }
            SettlementFlow::Agent(agent_id) => ensure_assignee(&order, agent_id)?,
            _ => {}
        }

        let signature_ok = verify_signature(
            &verification.gateway_order_id,
            &verification.gateway_payment_id,
            &verification.signature,
            &self.key_secret,
        );
        let bound_to_order =
            order.gateway_order_id.as_deref() == Some(verification.gateway_order_id.as_str());
        if !signature_ok || !bound_to_order {
            metrics::counter!("grocery_payments.signature_mismatch", 1);
            warn!(
                signature_ok,
                bound_to_order, "Rejected payment verification"
            );
            return Err(ServiceError::SignatureMismatch(order.id));
        }

        let settled = OrderEntity::update_many()
            .col_expr(order::Column::IsPaid, Expr::value(true))
            .col_expr(
                order::Column::PaymentReference,
                Expr::value(verification.gateway_payment_id.clone()),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::IsPaid.eq(false))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to settle order payment");
                ServiceError::DatabaseError(e)
            })?
            .rows_affected;

        if settled == 0 {
            return match fetch_order(&self.db_pool, order.id).await? {
                Some(current) if current.is_paid => {
                    info!("Order already settled; verification is a no-op");
                    Ok(SettlementOutcome {
                        order_id: current.id,
                        is_paid: true,
                        already_settled: true,
                        payment_reference: current.payment_reference,
                    })
                }
                _ => Err(ServiceError::NotFound(format!(
                    "Order {} not found",
                    order.id
                ))),
            };
        }

        if let SettlementFlow::Customer(customer_id) = flow {
            // Payment is already recorded; a stale cart is not worth failing the request.
            if let Err(e) = self.cart.clear(customer_id).await {
                error!(error = %e, customer_id = %customer_id, "Failed to clear cart after payment");
            }
        }

        metrics::counter!("grocery_payments.settled", 1);
        self.event_sender
            .send_or_log(Event::OrderPaid {
                order_id: order.id,
                payment_reference: verification.gateway_payment_id.clone(),
            })
            .await;

        info!("Order payment settled");
        Ok(SettlementOutcome {
            order_id: order.id,
            is_paid: true,
            already_settled: false,
            payment_reference: Some(verification.gateway_payment_id.clone()),
        })
    }

    /// Marks a cash-on-delivery order paid. Only the assigned agent may do this;
    /// online orders settle through signature verification alone.
    #[instrument(skip(self), fields(order_id = %order_id, agent_id = %agent_id))]
    pub async fn collect_cash(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
    ) -> Result<SettlementOutcome, ServiceError> {
        let reference = format!("cash:{}", agent_id);
        let collected = OrderEntity::update_many()
            .col_expr(order::Column::IsPaid, Expr::value(true))
            .col_expr(order::Column::PaymentReference, Expr::value(reference.clone()))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::AssignedAgentId.eq(agent_id))
            .filter(order::Column::PaymentMethod.eq(PaymentMethod::CashOnDelivery))
            .filter(order::Column::IsPaid.eq(false))
            .filter(order::Column::DeliveryStatus.ne(DeliveryStatus::Cancelled))
            .exec(&*self.db_pool)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to record cash collection");
                ServiceError::DatabaseError(e)
            })?
            .rows_affected;

        if collected == 0 {
            let current = require_order(&self.db_pool, order_id).await?;
            ensure_assignee(&current, agent_id)?;
            if current.is_paid {
                return Ok(SettlementOutcome {
                    order_id,
                    is_paid: true,
                    already_settled: true,
                    payment_reference: current.payment_reference,
                });
            }
            if current.payment_method == PaymentMethod::Online {
                warn!("Cash collection attempted on an online order");
                return Err(ServiceError::InvalidInput(
                    "Online orders are settled through the payment gateway".to_string(),
                ));
            }
            return Err(ServiceError::InvalidInput(
                "Cancelled orders cannot be paid".to_string(),
            ));
        }

        metrics::counter!("grocery_payments.cash_collected", 1);
        self.event_sender
            .send_or_log(Event::OrderPaid {
                order_id,
                payment_reference: reference.clone(),
            })
            .await;

        info!("Cash collected");
        Ok(SettlementOutcome {
            order_id,
            is_paid: true,
            already_settled: false,
            payment_reference: Some(reference),
        })
    }
}

fn ensure_assignee(order: &OrderModel, agent_id: Uuid) -> Result<(), ServiceError> {
    if order.assigned_agent_id == Some(agent_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Only the assigned agent can act on this order".to_string(),
        ))
    }
}

fn ensure_payable(order: &OrderModel) -> Result<(), ServiceError> {
    if order.is_paid {
        return Err(ServiceError::InvalidInput("Order is already paid".to_string()));
    }
    if order.delivery_status == DeliveryStatus::Cancelled {
        return Err(ServiceError::InvalidInput(
            "Cancelled orders cannot be paid".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SECRET: &str = "gateway_test_secret";

    fn gateway(server: &MockServer, timeout: Duration) -> RazorpayGateway {
        RazorpayGateway::new(server.uri(), "rzp_test_key", SECRET, timeout).unwrap()
    }

    #[test]
    fn signature_over_order_and_payment_ids_verifies() {
        let sig = compute_signature("order_Abc", "pay_Xyz", SECRET);
        assert!(verify_signature("order_Abc", "pay_Xyz", &sig, SECRET));
        assert!(verify_signature(
            "order_Abc",
            "pay_Xyz",
            &sig.to_ascii_uppercase(),
            SECRET
        ));
    }

    #[test]
    fn tampered_inputs_do_not_verify() {
        let sig = compute_signature("order_Abc", "pay_Xyz", SECRET);
        assert!(!verify_signature("order_Abc", "pay_Other", &sig, SECRET));
        assert!(!verify_signature("order_Other", "pay_Xyz", &sig, SECRET));
        assert!(!verify_signature("order_Abc", "pay_Xyz", &sig, "other_secret"));
        assert!(!verify_signature("order_Abc", "pay_Xyz", "deadbeef", SECRET));
        assert!(!verify_signature("order_Abc", "pay_Xyz", &sig, ""));
    }

    #[tokio::test]
    async fn creates_intent_in_minor_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .and(basic_auth("rzp_test_key", SECRET))
            .and(body_partial_json(json!({"amount": 50000, "currency": "INR"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "order_Test123",
                "amount": 50000,
                "currency": "INR",
                "status": "created"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let intent = gateway(&server, Duration::from_secs(5))
            .create_intent(50000, "INR", "receipt-1")
            .await
            .unwrap();
        assert_eq!(
            intent,
            GatewayIntent {
                gateway_order_id: "order_Test123".into(),
                amount: 50000,
                currency: "INR".into(),
            }
        );
    }

    #[tokio::test]
    async fn provider_failure_is_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = gateway(&server, Duration::from_secs(5))
            .create_intent(100, "INR", "r")
            .await;
        assert_matches!(result, Err(ServiceError::GatewayError(_)));
    }

    #[tokio::test]
    async fn slow_provider_times_out_as_gateway_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "order_Slow", "amount": 100, "currency": "INR"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let result = gateway(&server, Duration::from_millis(100))
            .create_intent(100, "INR", "r")
            .await;
        assert_matches!(result, Err(ServiceError::GatewayError(_)));
    }

    #[tokio::test]
    async fn mismatched_amount_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "order_Wrong",
                "amount": 1,
                "currency": "INR"
            })))
            .mount(&server)
            .await;

        let result = gateway(&server, Duration::from_secs(5))
            .create_intent(100, "INR", "r")
            .await;
        assert_matches!(result, Err(ServiceError::GatewayError(_)));
    }
}
