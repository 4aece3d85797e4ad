//! Grocery order lifecycle API
//!
//! Order placement, payment reconciliation and delivery assignment for a
//! grocery storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    extract::FromRef,
    response::Json,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::AuthService;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: Arc<events::EventSender>,
    pub auth: Arc<AuthService>,
    pub services: handlers::AppServices,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
        assert!(!response.success);
    }

    #[test]
    fn with_message_keeps_payload() {
        let response = ApiResponse::success(42).with_message("Order placed");
        assert!(response.success);
        assert_eq!(response.data, Some(42));
        assert_eq!(response.message.as_deref(), Some("Order placed"));
    }

    #[test]
    fn validation_errors_are_listed() {
        let response = ApiResponse::<()>::validation_errors(vec!["items: length".into()]);
        assert!(!response.success);
        assert_eq!(response.errors.map(|e| e.len()), Some(1));
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Versioned API routes. Role checks happen inside each handler through
/// [`auth::AuthUser::require_role`].
pub fn api_v1_routes() -> Router<AppState> {
    let orders = Router::new()
        .route("/orders/cod", post(handlers::orders::place_cod_order))
        .route("/orders/online", post(handlers::orders::place_online_order))
        .route("/orders/mine", get(handlers::orders::list_my_orders))
        .route(
            "/orders/:id",
            get(handlers::orders::get_order).delete(handlers::orders::delete_order),
        )
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route(
            "/orders/:id/payment-intent",
            post(handlers::orders::retry_payment_intent),
        )
        .route("/seller/orders", get(handlers::orders::list_seller_orders));

    let payments = Router::new()
        .route("/payments/verify", post(handlers::payments::verify_payment))
        .route(
            "/agents/payments/verify",
            post(handlers::payments::agent_verify_payment),
        );

    let agents = Router::new()
        .route("/agents/register", post(handlers::agents::register_agent))
        .route("/agents/login", post(handlers::agents::login_agent))
        .route("/agents/me/status", put(handlers::agents::update_my_status))
        .route("/agents/me/orders", get(handlers::agents::visible_orders))
        .route(
            "/agents/me/orders/active",
            get(handlers::agents::active_orders),
        )
        .route(
            "/agents/me/orders/history",
            get(handlers::agents::delivery_history),
        )
        .route(
            "/agents/orders/:id/claim",
            post(handlers::agents::claim_order),
        )
        .route(
            "/agents/orders/:id/status",
            put(handlers::agents::update_delivery_status),
        )
        .route(
            "/agents/orders/:id/collect-cash",
            put(handlers::agents::collect_cash),
        )
        .route(
            "/agents/orders/:id/payment-intent",
            post(handlers::agents::agent_payment_intent),
        );

    Router::new().merge(orders).merge(payments).merge(agents)
}

/// Full application router: health, the v1 API and Swagger UI.
pub fn app_router(state: AppState) -> Router {
    Router::<AppState>::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
