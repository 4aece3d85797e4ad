use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::{AuthUser, Role},
    entities::{delivery_agent::AgentStatus, order::DeliveryStatus},
    errors::ServiceError,
    services::{
        agents::{AgentLoginRequest, AgentResponse, AgentSession, RegisterAgentRequest},
        orders::OrderResponse,
        payments::{GatewayIntent, SettlementOutcome},
    },
    ApiResponse, AppState,
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateAgentStatusRequest {
    pub status: AgentStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdvanceStatusRequest {
    pub status: DeliveryStatus,
}

#[utoipa::path(
    post,
    path = "/api/v1/agents/register",
    request_body = RegisterAgentRequest,
    responses(
        (status = 201, description = "Agent registered", body = ApiResponse<AgentResponse>),
        (status = 400, description = "Invalid input or phone already registered", body = crate::errors::ErrorResponse),
    ),
    tag = "Agents"
)]
pub async fn register_agent(
    State(state): State<AppState>,
    Json(request): Json<RegisterAgentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AgentResponse>>), ServiceError> {
    let agent = state.services.agents.register(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(AgentResponse::from(agent))),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/agents/login",
    request_body = AgentLoginRequest,
    responses(
        (status = 200, description = "Logged in", body = ApiResponse<AgentSession>),
        (status = 401, description = "Invalid phone or password", body = crate::errors::ErrorResponse),
        (status = 403, description = "Agent is inactive", body = crate::errors::ErrorResponse),
    ),
    tag = "Agents"
)]
pub async fn login_agent(
    State(state): State<AppState>,
    Json(request): Json<AgentLoginRequest>,
) -> Result<Json<ApiResponse<AgentSession>>, ServiceError> {
    let session = state.services.agents.login(request).await?;
    Ok(Json(ApiResponse::success(session)))
}

#[utoipa::path(
    put,
    path = "/api/v1/agents/me/status",
    request_body = UpdateAgentStatusRequest,
    responses(
        (status = 200, description = "Availability updated", body = ApiResponse<AgentResponse>),
        (status = 403, description = "Agents only", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Agents"
)]
pub async fn update_my_status(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<UpdateAgentStatusRequest>,
) -> Result<Json<ApiResponse<AgentResponse>>, ServiceError> {
    auth_user.require_role(Role::Agent)?;
    let agent = state
        .services
        .agents
        .set_status(auth_user.user_id, request.status)
        .await?;
    Ok(Json(ApiResponse::success(agent.into())))
}

#[utoipa::path(
    get,
    path = "/api/v1/agents/me/orders",
    summary = "Orders visible to the agent",
    description = "Own assignments plus claimable orders placed since the agent registered, newest first",
    responses((status = 200, description = "Orders", body = ApiResponse<Vec<OrderResponse>>)),
    security(("Bearer" = [])),
    tag = "Agents"
)]
pub async fn visible_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    auth_user.require_role(Role::Agent)?;
    let services = &state.services;
    let orders = services.visibility.visible_orders(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(
        services.orders.load_details(orders).await?,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/agents/me/orders/active",
    summary = "Active tasks",
    responses((status = 200, description = "Visible orders not yet delivered", body = ApiResponse<Vec<OrderResponse>>)),
    security(("Bearer" = [])),
    tag = "Agents"
)]
pub async fn active_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    auth_user.require_role(Role::Agent)?;
    let services = &state.services;
    let orders = services.visibility.active_orders(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(
        services.orders.load_details(orders).await?,
    )))
}

#[utoipa::path(
    get,
    path = "/api/v1/agents/me/orders/history",
    summary = "Delivery history",
    responses((status = 200, description = "Orders this agent delivered", body = ApiResponse<Vec<OrderResponse>>)),
    security(("Bearer" = [])),
    tag = "Agents"
)]
pub async fn delivery_history(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    auth_user.require_role(Role::Agent)?;
    let services = &state.services;
    let orders = services.visibility.history(auth_user.user_id).await?;
    Ok(Json(ApiResponse::success(
        services.orders.load_details(orders).await?,
    )))
}

#[utoipa::path(
    post,
    path = "/api/v1/agents/orders/{id}/claim",
    summary = "Claim order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order assigned to the caller", body = ApiResponse<OrderResponse>),
        (status = 403, description = "Agent inactive or order outside the agent's view", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already taken or cancelled", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Agents"
)]
pub async fn claim_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    auth_user.require_role(Role::Agent)?;
    let services = &state.services;
    let order = services
        .assignments
        .claim(order_id, auth_user.user_id)
        .await?;
    let details = services.orders.get_order(order.id, &auth_user).await?;
    Ok(Json(
        ApiResponse::success(details).with_message("Order claimed"),
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/agents/orders/{id}/status",
    summary = "Advance delivery status",
    description = "Only the immediate next step, or Cancelled from an active status",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = AdvanceStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderResponse>),
        (status = 403, description = "Not the assigned agent", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Cannot skip delivery steps", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Agents"
)]
pub async fn update_delivery_status(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
    Json(request): Json<AdvanceStatusRequest>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    auth_user.require_role(Role::Agent)?;
    let services = &state.services;
    services
        .status
        .advance(order_id, auth_user.user_id, request.status)
        .await?;
    let details = services.orders.get_order(order_id, &auth_user).await?;
    Ok(Json(ApiResponse::success(details)))
}

#[utoipa::path(
    put,
    path = "/api/v1/agents/orders/{id}/collect-cash",
    summary = "Record cash collected",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order marked paid", body = ApiResponse<SettlementOutcome>),
        (status = 400, description = "Online or cancelled order", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the assigned agent", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Agents"
)]
pub async fn collect_cash(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<SettlementOutcome>>, ServiceError> {
    auth_user.require_role(Role::Agent)?;
    let outcome = state
        .services
        .payments
        .collect_cash(order_id, auth_user.user_id)
        .await?;
    Ok(Json(
        ApiResponse::success(outcome).with_message("Cash collected"),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/agents/orders/{id}/payment-intent",
    summary = "Collect payment online at the door",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Gateway intent", body = ApiResponse<GatewayIntent>),
        (status = 403, description = "Not the assigned agent", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Agents"
)]
pub async fn agent_payment_intent(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<GatewayIntent>>, ServiceError> {
    auth_user.require_role(Role::Agent)?;
    let intent = state
        .services
        .payments
        .agent_gateway_intent(order_id, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(intent)))
}
