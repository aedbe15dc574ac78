use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::handlers::acting_user;
use crate::services::payments::{self, GatewayCheckout, PaymentConfirmation, WebhookOutcome};
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

// POST /api/payments/initialize/:booking_id
pub async fn initialize_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> AppResult<Json<GatewayCheckout>> {
    let customer_id = acting_user(&headers)?;
    let email = {
        let db = state.conn()?;
        queries::get_user(&db, &customer_id)?
            .ok_or_else(|| AppError::NotFound(format!("customer {customer_id}")))?
            .email
    };

    let checkout =
        payments::initialize_gateway_payment(&state, &booking_id, &customer_id, &email).await?;
    Ok(Json(checkout))
}

// POST /api/payments/verify/:reference
pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> AppResult<Json<PaymentConfirmation>> {
    let confirmation = payments::verify_gateway_payment(&state, &reference).await?;
    Ok(Json(confirmation))
}

// POST /api/payments/webhook
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookOutcome>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let mut db = state.conn()?;
    let outcome = payments::handle_webhook(
        &mut db,
        state.notifier.as_ref(),
        &state.config.paystack_secret_key,
        &body,
        signature,
    )?;
    Ok(Json(outcome))
}
