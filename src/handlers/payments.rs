use axum::{extract::State, response::Json};
use validator::Validate;

use crate::{
    auth::{AuthUser, Role},
    errors::ServiceError,
    services::payments::{PaymentVerification, SettlementFlow, SettlementOutcome},
    ApiResponse, AppState,
};

// POST /api/v1/payments/verify
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    summary = "Verify checkout payment",
    description = "Checks the gateway signature and settles the order. Repeating a successful verification is a no-op.",
    request_body = PaymentVerification,
    responses(
        (status = 200, description = "Order settled", body = ApiResponse<SettlementOutcome>),
        (status = 400, description = "Payment verification failed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the owner", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<PaymentVerification>,
) -> Result<Json<ApiResponse<SettlementOutcome>>, ServiceError> {
    auth_user.require_role(Role::Customer)?;
    request.validate()?;

    let outcome = state
        .services
        .payments
        .verify_and_settle(&request, SettlementFlow::Customer(auth_user.user_id))
        .await?;
    Ok(Json(
        ApiResponse::success(outcome).with_message("Payment verified"),
    ))
}

// POST /api/v1/agents/payments/verify
#[utoipa::path(
    post,
    path = "/api/v1/agents/payments/verify",
    summary = "Verify payment collected at the door",
    request_body = PaymentVerification,
    responses(
        (status = 200, description = "Order settled", body = ApiResponse<SettlementOutcome>),
        (status = 400, description = "Payment verification failed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Not the assigned agent", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Payments"
)]
pub async fn agent_verify_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<PaymentVerification>,
) -> Result<Json<ApiResponse<SettlementOutcome>>, ServiceError> {
    auth_user.require_role(Role::Agent)?;
    request.validate()?;

    let outcome = state
        .services
        .payments
        .verify_and_settle(&request, SettlementFlow::Agent(auth_user.user_id))
        .await?;
    Ok(Json(
        ApiResponse::success(outcome).with_message("Payment verified"),
    ))
}
