#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use grocery_orders_api::{
    auth::{AuthConfig, AuthService, Role},
    config::AppConfig,
    db,
    entities::{
        address, cart_item,
        delivery_agent::{self, AgentStatus},
        order::{self, DeliveryStatus, PaymentMethod},
        product,
    },
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        agents::RegisterAgentRequest,
        payments::{compute_signature, GatewayIntent, PaymentGateway},
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const GATEWAY_SECRET: &str = "gateway_secret_for_tests";

/// In-process stand-in for the payment provider.
#[derive(Default)]
pub struct FakeGateway {
    pub failing: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        _receipt: &str,
    ) -> Result<GatewayIntent, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError("provider returned 503".into()));
        }
        Ok(GatewayIntent {
            gateway_order_id: format!("order_test_{call}"),
            amount: amount_minor,
            currency: currency.to_string(),
        })
    }
}

/// Application backed by a throwaway SQLite file with the full schema.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    pub customer_id: Uuid,
    pub address_id: Uuid,
    pub product_id: Uuid,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("orders.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "k3y_for_tests_0123456789_abcdefghijklmnop".to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_key_id = "rzp_test_key".to_string();
        cfg.payment_key_secret = GATEWAY_SECRET.to_string();

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&cfg)));
        let gateway = Arc::new(FakeGateway::default());
        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            auth_service.clone(),
            gateway.clone(),
            &cfg,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            auth: auth_service,
            services,
        };

        let mut app = Self {
            router: grocery_orders_api::app_router(state.clone()),
            state,
            gateway,
            customer_id: Uuid::new_v4(),
            address_id: Uuid::nil(),
            product_id: Uuid::nil(),
            _db_dir: db_dir,
            _event_task: event_task,
        };
        app.product_id = app
            .seed_product("Basmati Rice 1kg", Decimal::new(250, 0), Decimal::new(245, 0))
            .await;
        app.address_id = app.seed_address(app.customer_id).await;
        app
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, offer_price: Decimal) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            category: Set("Grains".to_string()),
            price: Set(price),
            offer_price: Set(offer_price),
            in_stock: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product");
        id
    }

    pub async fn seed_address(&self, user_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        address::ActiveModel {
            id: Set(id),
            user_id: Set(user_id),
            first_name: Set("Asha".to_string()),
            last_name: Set("Rao".to_string()),
            email: Set("asha@example.com".to_string()),
            street: Set("12 MG Road".to_string()),
            city: Set("Bengaluru".to_string()),
            state: Set("KA".to_string()),
            zipcode: Set("560001".to_string()),
            country: Set("IN".to_string()),
            phone: Set("9800000000".to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed address");
        id
    }

    pub async fn seed_cart_item(&self, user_id: Uuid) {
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(self.product_id),
            quantity: Set(1),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed cart item");
    }

    pub async fn cart_size(&self, user_id: Uuid) -> u64 {
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .count(&*self.state.db)
            .await
            .expect("count cart items")
    }

    pub fn token_for(&self, subject: Uuid, role: Role) -> String {
        self.state
            .auth
            .issue_token(subject, role)
            .expect("issue test token")
    }

    pub fn customer_token(&self) -> String {
        self.token_for(self.customer_id, Role::Customer)
    }

    pub fn seller_token(&self) -> String {
        self.token_for(Uuid::new_v4(), Role::Seller)
    }

    /// Registers an available agent and returns its id with a bearer token.
    pub async fn register_agent(&self, phone: &str) -> (Uuid, String) {
        let agent = self
            .state
            .services
            .agents
            .register(RegisterAgentRequest {
                name: format!("Agent {phone}"),
                phone: phone.to_string(),
                password: "secret-pass".to_string(),
            })
            .await
            .expect("register agent");
        let token = self.token_for(agent.id, Role::Agent);
        (agent.id, token)
    }

    pub fn order_body(&self, quantity: i32) -> Value {
        serde_json::json!({
            "items": [{ "product_id": self.product_id, "quantity": quantity }],
            "address_id": self.address_id,
        })
    }

    /// Places a cash-on-delivery order for the default customer and returns its id.
    pub async fn place_cod_order(&self, quantity: i32) -> Uuid {
        let response = self
            .request(
                Method::POST,
                "/api/v1/orders/cod",
                Some(self.order_body(quantity)),
                Some(&self.customer_token()),
            )
            .await;
        assert_eq!(response.status(), 201, "COD order should be created");
        let body = response_json(response).await;
        body["data"]["id"]
            .as_str()
            .and_then(|id| id.parse().ok())
            .expect("order id in response")
    }

    /// Inserts an agent row directly, registered at `created_at`.
    pub async fn seed_agent(&self, created_at: DateTime<Utc>, phone: &str) -> Uuid {
        let id = Uuid::new_v4();
        delivery_agent::ActiveModel {
            id: Set(id),
            name: Set("Ravi".to_string()),
            phone: Set(phone.to_string()),
            password_hash: Set("unused".to_string()),
            status: Set(AgentStatus::Available),
            created_at: Set(created_at),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed agent");
        id
    }

    /// Inserts an order row directly for the default customer.
    pub async fn seed_order(
        &self,
        created_at: DateTime<Utc>,
        method: PaymentMethod,
        is_paid: bool,
        status: DeliveryStatus,
        assigned_to: Option<Uuid>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        order::ActiveModel {
            id: Set(id),
            customer_id: Set(self.customer_id),
            total_amount: Set(100),
            currency: Set("INR".to_string()),
            address_id: Set(self.address_id),
            payment_method: Set(method),
            is_paid: Set(is_paid),
            payment_reference: Set(None),
            gateway_order_id: Set(None),
            delivery_status: Set(status),
            assigned_agent_id: Set(assigned_to),
            assigned_at: Set(assigned_to.map(|_| created_at)),
            created_at: Set(created_at),
            updated_at: Set(created_at),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed order");
        id
    }

    pub fn signature(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        compute_signature(gateway_order_id, gateway_payment_id, GATEWAY_SECRET)
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
