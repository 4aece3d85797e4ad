use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    auth::{AuthUser, Role},
    entities::order::PaymentMethod,
    errors::ServiceError,
    services::{
        orders::{OrderResponse, PlaceOrderRequest},
        payments::GatewayIntent,
    },
    ApiResponse, AppState,
};

/// What the client needs to open the gateway checkout
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OnlineCheckoutResponse {
    pub order_id: Uuid,
    pub total_amount: i64,
    pub intent: GatewayIntent,
    /// Public gateway key for the checkout widget
    pub key_id: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/cod",
    summary = "Place cash-on-delivery order",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Empty order, unknown product or address", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Customers only", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn place_cod_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    auth_user.require_role(Role::Customer)?;
    request.validate()?;

    let orders = &state.services.orders;
    let order = orders
        .create_order(auth_user.user_id, &request, PaymentMethod::CashOnDelivery)
        .await?;
    let details = orders.get_order(order.id, &auth_user).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(details).with_message("Order placed successfully")),
    ))
}

/// Prices the order, opens a gateway intent and only then persists the order,
/// so a gateway failure leaves nothing behind.
#[utoipa::path(
    post,
    path = "/api/v1/orders/online",
    summary = "Place online-payment order",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order created; complete payment with the returned intent", body = ApiResponse<OnlineCheckoutResponse>),
        (status = 400, description = "Empty order, unknown product or address", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn place_online_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OnlineCheckoutResponse>>), ServiceError> {
    auth_user.require_role(Role::Customer)?;
    request.validate()?;

    let services = &state.services;
    let draft = services.orders.quote(auth_user.user_id, &request).await?;
    let intent = services
        .payments
        .request_intent(draft.id, draft.total_amount)
        .await?;
    let order = services
        .orders
        .place(
            draft,
            PaymentMethod::Online,
            Some(intent.gateway_order_id.clone()),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OnlineCheckoutResponse {
            order_id: order.id,
            total_amount: order.total_amount,
            intent,
            key_id: state.config.payment_key_id.clone(),
        })),
    ))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/payment-intent",
    summary = "Retry online payment",
    description = "Creates a new gateway intent for an unpaid online order without placing a new order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "New intent", body = ApiResponse<GatewayIntent>),
        (status = 400, description = "Order already paid, cancelled or cash", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn retry_payment_intent(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<GatewayIntent>>, ServiceError> {
    auth_user.require_role(Role::Customer)?;
    let intent = state
        .services
        .payments
        .retry_gateway_intent(order_id, auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(intent)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/mine",
    summary = "Customer order history",
    description = "Cash orders and paid online orders, newest first",
    responses(
        (status = 200, description = "Orders", body = ApiResponse<Vec<OrderResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_my_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    auth_user.require_role(Role::Customer)?;
    let orders = state
        .services
        .orders
        .list_for_customer(auth_user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/seller/orders",
    summary = "Seller order list",
    responses(
        (status = 200, description = "Orders", body = ApiResponse<Vec<OrderResponse>>),
        (status = 403, description = "Sellers only", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_seller_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    auth_user.require_role(Role::Seller)?;
    let orders = state.services.orders.list_for_seller().await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order", body = ApiResponse<OrderResponse>),
        (status = 403, description = "Not the owner, a seller or the assigned agent", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.services.orders.get_order(order_id, &auth_user).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    summary = "Cancel order",
    description = "Sellers may cancel any non-terminal order; customers their own",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order cancelled", body = ApiResponse<OrderResponse>),
        (status = 403, description = "Not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order already delivered or cancelled", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let services = &state.services;
    let cancelled = services.status.cancel(order_id, &auth_user).await?;
    let details = services
        .orders
        .load_details(vec![cancelled])
        .await?
        .pop()
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
    Ok(Json(
        ApiResponse::success(details).with_message("Order cancelled"),
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    summary = "Delete order from history",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 204, description = "Order deleted"),
        (status = 400, description = "Order is not finished", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not allowed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn delete_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state
        .services
        .orders
        .delete_order(order_id, &auth_user)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
