use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::middleware::UserId;
use crate::models::{ClientInvoiceStatus, ClientProfile};
use crate::services::evaluate;
use crate::startup::AppState;
use service_core::error::AppError;

#[derive(Debug, Deserialize, Validate)]
pub struct ClientRequest {
    #[validate(length(min = 1, max = 200, message = "Name cannot be empty"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(email(message = "Invalid cc email address"))]
    pub cc: Option<String>,
    #[validate(length(max = 2000, message = "Message is too long"))]
    pub message: Option<String>,
    pub cost: Decimal,
    pub late_fee: Decimal,
    #[validate(range(min = 0, message = "Grace period cannot be negative"))]
    pub grace_period_days: i64,
    #[validate(range(min = 1, message = "Fee interval must be at least one day"))]
    pub fee_interval_days: i64,
    #[validate(range(min = 1, max = 31, message = "Send day must be between 1 and 31"))]
    pub send_day: u32,
    #[validate(range(max = 23, message = "Send hour must be between 0 and 23"))]
    pub send_hour: Option<u32>,
}

impl From<ClientRequest> for ClientProfile {
    fn from(req: ClientRequest) -> Self {
        ClientProfile {
            name: req.name,
            email: req.email,
            cc: req.cc.filter(|cc| !cc.trim().is_empty()),
            message: req.message,
            cost: req.cost,
            late_fee: req.late_fee,
            grace_period_days: req.grace_period_days,
            fee_interval_days: req.fee_interval_days,
            send_day: req.send_day,
            send_hour: req.send_hour,
        }
    }
}

/// Explicit target state; omitted means flip the current one.
#[derive(Debug, Default, Deserialize)]
pub struct PaymentRequest {
    pub paid: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct RevenueResponse {
    pub owner_id: Uuid,
    pub total: Decimal,
}

#[tracing::instrument(skip(state, request), fields(user_id))]
pub async fn create_client(
    State(state): State<AppState>,
    UserId(actor): UserId,
    Json(request): Json<ClientRequest>,
) -> Result<(StatusCode, Json<ClientInvoiceStatus>), AppError> {
    request.validate()?;

    let client = state.engine.add_client(actor, request.into()).await?;
    let invoice = evaluate(&client, state.engine.now())?;

    Ok((StatusCode::CREATED, Json(ClientInvoiceStatus { client, invoice })))
}

#[tracing::instrument(skip(state), fields(user_id))]
pub async fn list_clients(
    State(state): State<AppState>,
    UserId(actor): UserId,
) -> Result<Json<Vec<ClientInvoiceStatus>>, AppError> {
    Ok(Json(state.engine.list_clients(actor).await?))
}

#[tracing::instrument(skip(state), fields(user_id))]
pub async fn get_client(
    State(state): State<AppState>,
    UserId(actor): UserId,
    Path(client_id): Path<Uuid>,
) -> Result<Json<ClientInvoiceStatus>, AppError> {
    Ok(Json(state.engine.invoice_status(actor, client_id).await?))
}

#[tracing::instrument(skip(state, request), fields(user_id))]
pub async fn update_client(
    State(state): State<AppState>,
    UserId(actor): UserId,
    Path(client_id): Path<Uuid>,
    Json(request): Json<ClientRequest>,
) -> Result<Json<ClientInvoiceStatus>, AppError> {
    request.validate()?;

    let client = state
        .engine
        .update_client(actor, client_id, request.into())
        .await?;
    let invoice = evaluate(&client, state.engine.now())?;

    Ok(Json(ClientInvoiceStatus { client, invoice }))
}

#[tracing::instrument(skip(state), fields(user_id))]
pub async fn delete_client(
    State(state): State<AppState>,
    UserId(actor): UserId,
    Path(client_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.engine.remove_client(actor, client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[tracing::instrument(skip(state, request), fields(user_id))]
pub async fn update_payment(
    State(state): State<AppState>,
    UserId(actor): UserId,
    Path(client_id): Path<Uuid>,
    request: Option<Json<PaymentRequest>>,
) -> Result<Json<ClientInvoiceStatus>, AppError> {
    let Json(request) = request.unwrap_or_default();

    let client = match request.paid {
        Some(true) => state.engine.mark_paid(actor, client_id).await?,
        Some(false) => state.engine.mark_unpaid(actor, client_id).await?,
        None => state.engine.toggle_payment(actor, client_id).await?,
    };
    let invoice = evaluate(&client, state.engine.now())?;

    Ok(Json(ClientInvoiceStatus { client, invoice }))
}

#[tracing::instrument(skip(state), fields(user_id))]
pub async fn revenue_total(
    State(state): State<AppState>,
    UserId(actor): UserId,
) -> Result<Json<RevenueResponse>, AppError> {
    let total = state.engine.revenue_total(actor).await?;
    Ok(Json(RevenueResponse {
        owner_id: actor,
        total,
    }))
}
