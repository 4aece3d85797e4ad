use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Grocery Orders API",
        version = "1.0.0",
        description = r#"
# Grocery Orders API

Order lifecycle and delivery assignment for a grocery storefront.

## Features

- **Checkout**: Cash-on-delivery and online-payment orders priced from the catalog
- **Payment reconciliation**: Gateway intents and signature-verified settlement
- **Delivery assignment**: First-claim-wins assignment of orders to agents
- **Status tracking**: Forward-only delivery progression with cancellation

## Authentication

Every endpoint except agent registration, agent login and health requires a
JWT bearer token:

```
Authorization: Bearer <your-jwt-token>
```

Tokens carry one of the roles `customer`, `seller` or `agent`.

## Error Handling

Errors share one JSON shape:

```json
{
  "error": "Conflict",
  "message": "Order 3f0c... already claimed by another agent",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-12-09T10:30:00.000Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Orders", description = "Order placement and management"),
        (name = "Payments", description = "Payment verification"),
        (name = "Agents", description = "Delivery agent endpoints"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Orders
        crate::handlers::orders::place_cod_order,
        crate::handlers::orders::place_online_order,
        crate::handlers::orders::retry_payment_intent,
        crate::handlers::orders::list_my_orders,
        crate::handlers::orders::list_seller_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::delete_order,

        // Payments
        crate::handlers::payments::verify_payment,
        crate::handlers::payments::agent_verify_payment,

        // Agents
        crate::handlers::agents::register_agent,
        crate::handlers::agents::login_agent,
        crate::handlers::agents::update_my_status,
        crate::handlers::agents::visible_orders,
        crate::handlers::agents::active_orders,
        crate::handlers::agents::delivery_history,
        crate::handlers::agents::claim_order,
        crate::handlers::agents::update_delivery_status,
        crate::handlers::agents::collect_cash,
        crate::handlers::agents::agent_payment_intent,

        crate::handlers::health::health,
    ),
    components(
        schemas(
            crate::entities::order::DeliveryStatus,
            crate::entities::order::PaymentMethod,
            crate::entities::delivery_agent::AgentStatus,

            // Order types
            crate::services::orders::LineItemInput,
            crate::services::orders::PlaceOrderRequest,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::AddressResponse,
            crate::handlers::orders::OnlineCheckoutResponse,

            // Payment types
            crate::services::payments::GatewayIntent,
            crate::services::payments::PaymentVerification,
            crate::services::payments::SettlementOutcome,

            // Agent types
            crate::services::agents::RegisterAgentRequest,
            crate::services::agents::AgentLoginRequest,
            crate::services::agents::AgentResponse,
            crate::services::agents::AgentSession,
            crate::handlers::agents::UpdateAgentStatusRequest,
            crate::handlers::agents::AdvanceStatusRequest,

            crate::handlers::health::HealthStatus,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerSecurity)
)]
pub struct ApiDocV1;

struct BearerSecurity;

impl Modify for BearerSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
