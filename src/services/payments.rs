use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;

use crate::db::{self, queries};
use crate::errors::{AppError, AppResult};
use crate::models::payment::generate_transaction_reference;
use crate::models::{
    Booking, BookingPaymentStatus, BookingStatus, Payment, PaymentMethod, PaymentState,
    TransactionKind,
};
use crate::services::gateway::{
    to_minor_units, verify_webhook_signature, ChargeRequest, ChargeVerification, WebhookEvent,
};
use crate::services::ledger;
use crate::services::notifications::{dispatch, Notification, NotificationKind, NotificationSink};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct GatewayCheckout {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentConfirmation {
    pub payment: Payment,
    pub booking: Booking,
    /// True when this call did not change anything (duplicate webhook etc).
    pub already_confirmed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Processed(PaymentConfirmation),
    Ignored { event: String },
}

fn new_reference() -> String {
    generate_transaction_reference(Utc::now().timestamp_millis(), &mut rand::thread_rng())
}

/// The payment row that accompanies a freshly created booking.
pub fn payment_for_booking(booking: &Booking, method: PaymentMethod) -> Payment {
    let now = booking.created_at;
    let paid = method == PaymentMethod::Wallet;
    Payment {
        id: uuid::Uuid::new_v4().to_string(),
        booking_id: booking.id.clone(),
        user_id: booking.user_id.clone(),
        amount: booking.total_amount,
        payment_method: method,
        transaction_reference: new_reference(),
        status: if paid {
            PaymentState::Successful
        } else {
            PaymentState::Pending
        },
        gateway_response: None,
        paid_at: paid.then_some(now),
        refunded_at: None,
        created_at: now,
        updated_at: now,
    }
}

fn load_payment(conn: &Connection, booking_id: &str) -> AppResult<Payment> {
    queries::get_payment_by_booking(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("payment for booking {booking_id}")))
}

/// Reverses a successful payment for a booking that is being cancelled.
///
/// Must run inside the transaction that marks the booking cancelled; an
/// error here aborts the cancellation. Wallet payments are credited back
/// through the ledger, gateway payments are only marked refunded.
pub fn refund(conn: &Connection, booking: &mut Booking) -> AppResult<Payment> {
    let mut payment = load_payment(conn, &booking.id)?;
    if !payment.status.can_transition_to(PaymentState::Refunded) {
        return Err(AppError::invalid_transition(
            payment.status.as_str(),
            PaymentState::Refunded.as_str(),
        ));
    }

    if payment.payment_method == PaymentMethod::Wallet && payment.amount > rust_decimal::Decimal::ZERO {
        ledger::apply_in(
            conn,
            &booking.user_id,
            TransactionKind::Credit,
            payment.amount,
            &format!("Refund for booking {}", booking.booking_number),
            &booking.id,
        )?;
    }

    let now = Utc::now().naive_utc();
    payment.status = PaymentState::Refunded;
    payment.refunded_at = Some(now);
    payment.updated_at = now;
    queries::save_payment_state(conn, &payment)?;

    booking.payment_status = BookingPaymentStatus::Refunded;

    tracing::info!(
        booking_id = %booking.id,
        payment_id = %payment.id,
        method = payment.payment_method.as_str(),
        amount = %payment.amount,
        "payment refunded"
    );
    Ok(payment)
}

/// Brings the payment in line with a booking that is being cancelled:
/// successful payments are refunded, unsettled ones are cancelled.
pub fn settle_for_cancellation(conn: &Connection, booking: &mut Booking) -> AppResult<Payment> {
    let mut payment = load_payment(conn, &booking.id)?;
    match payment.status {
        PaymentState::Successful => refund(conn, booking),
        PaymentState::Pending | PaymentState::Processing | PaymentState::Failed => {
            let now = Utc::now().naive_utc();
            payment.status = PaymentState::Cancelled;
            payment.updated_at = now;
            queries::save_payment_state(conn, &payment)?;
            Ok(payment)
        }
        PaymentState::Cancelled | PaymentState::Refunded => Err(AppError::invalid_transition(
            payment.status.as_str(),
            PaymentState::Cancelled.as_str(),
        )),
    }
}

/// Starts a gateway checkout for a booking's unpaid payment.
///
/// The database is not locked while the gateway is being called.
pub async fn initialize_gateway_payment(
    state: &AppState,
    booking_id: &str,
    customer_id: &str,
    email: &str,
) -> AppResult<GatewayCheckout> {
    let (booking, payment) = {
        let conn = state.conn()?;
        let booking = queries::get_booking(&conn, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        if booking.user_id != customer_id {
            return Err(AppError::Authorization(format!(
                "booking {booking_id} belongs to another customer"
            )));
        }
        let payment = load_payment(&conn, booking_id)?;
        check_can_initialize(&booking, &payment)?;
        (booking, payment)
    };

    let reference = new_reference();
    let request = ChargeRequest {
        email: email.to_string(),
        amount_minor: to_minor_units(payment.amount).map_err(AppError::Gateway)?,
        reference: reference.clone(),
        callback_url: state.config.payment_callback_url.clone(),
        metadata: serde_json::json!({
            "booking_id": booking.id,
            "booking_number": booking.booking_number,
            "payment_id": payment.id,
        }),
    };

    let init = state
        .gateway
        .initialize_charge(&request)
        .await
        .map_err(AppError::Gateway)?;

    {
        let mut conn = state.conn()?;
        db::atomic(&mut conn, |tx| {
            // Re-read: a webhook may have settled the payment while we waited.
            let booking = queries::get_booking(tx, booking_id)?
                .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
            let mut payment = load_payment(tx, booking_id)?;
            check_can_initialize(&booking, &payment)?;

            payment.transaction_reference = reference.clone();
            payment.status = PaymentState::Processing;
            payment.updated_at = Utc::now().naive_utc();
            queries::save_payment_state(tx, &payment)?;
            Ok(())
        })?;
    }

    tracing::info!(booking_id, reference = %reference, "gateway payment initialized");

    Ok(GatewayCheckout {
        authorization_url: init.authorization_url,
        access_code: init.access_code,
        reference,
    })
}

fn check_can_initialize(booking: &Booking, payment: &Payment) -> AppResult<()> {
    if booking.status == BookingStatus::Cancelled {
        return Err(AppError::invalid_transition(
            booking.status.as_str(),
            "payment initialization",
        ));
    }
    if payment.payment_method == PaymentMethod::Wallet {
        return Err(AppError::Validation(
            "wallet payments are settled at booking time".to_string(),
        ));
    }
    if !payment.status.can_transition_to(PaymentState::Processing) {
        return Err(AppError::invalid_transition(
            payment.status.as_str(),
            PaymentState::Processing.as_str(),
        ));
    }
    Ok(())
}

/// Asks the gateway about `reference`, then records the answer.
pub async fn verify_gateway_payment(
    state: &AppState,
    reference: &str,
) -> AppResult<PaymentConfirmation> {
    let verification = state
        .gateway
        .verify_charge(reference)
        .await
        .map_err(AppError::Gateway)?;

    let mut conn = state.conn()?;
    confirm_gateway_payment(&mut conn, state.notifier.as_ref(), reference, &verification)
}

/// Records a gateway verdict for the payment carrying `reference`.
///
/// Idempotent: confirming an already successful payment changes nothing.
pub fn confirm_gateway_payment(
    conn: &mut Connection,
    notifier: &dyn NotificationSink,
    reference: &str,
    verification: &ChargeVerification,
) -> AppResult<PaymentConfirmation> {
    let confirmation = db::atomic(conn, |tx| {
        let mut payment = queries::get_payment_by_reference(tx, reference)?
            .ok_or_else(|| AppError::NotFound(format!("payment with reference {reference}")))?;
        let mut booking = queries::get_booking(tx, &payment.booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {}", payment.booking_id)))?;

        // Refunded covers a late capture that was already recorded below
        if matches!(payment.status, PaymentState::Successful | PaymentState::Refunded) {
            return Ok(PaymentConfirmation {
                payment,
                booking,
                already_confirmed: true,
            });
        }

        let now = Utc::now().naive_utc();

        if !verification.success {
            if !payment.status.can_transition_to(PaymentState::Failed) {
                return Ok(PaymentConfirmation {
                    payment,
                    booking,
                    already_confirmed: true,
                });
            }
            payment.status = PaymentState::Failed;
            payment.gateway_response = Some(verification.raw_payload.clone());
            payment.updated_at = now;
            queries::save_payment_state(tx, &payment)?;
            tracing::warn!(reference, booking_id = %booking.id, "gateway reported failed charge");
            return Ok(PaymentConfirmation {
                payment,
                booking,
                already_confirmed: false,
            });
        }

        if payment.status == PaymentState::Cancelled {
            // Charge captured after the booking was cancelled: record it as
            // settled and immediately refunded.
            payment.status = PaymentState::Refunded;
            payment.paid_at = Some(now);
            payment.refunded_at = Some(now);
            payment.gateway_response = Some(verification.raw_payload.clone());
            payment.updated_at = now;
            queries::save_payment_state(tx, &payment)?;

            booking.payment_status = BookingPaymentStatus::Refunded;
            booking.updated_at = now;
            queries::save_booking_state(tx, &booking)?;

            tracing::warn!(
                reference,
                booking_id = %booking.id,
                amount = %payment.amount,
                "charge captured on cancelled booking, marked refunded"
            );
            return Ok(PaymentConfirmation {
                payment,
                booking,
                already_confirmed: false,
            });
        }

        if !payment.status.can_transition_to(PaymentState::Successful) {
            return Err(AppError::invalid_transition(
                payment.status.as_str(),
                PaymentState::Successful.as_str(),
            ));
        }

        payment.status = PaymentState::Successful;
        payment.paid_at = Some(now);
        payment.gateway_response = Some(verification.raw_payload.clone());
        payment.updated_at = now;
        queries::save_payment_state(tx, &payment)?;

        booking.payment_status = BookingPaymentStatus::Paid;
        if booking.status == BookingStatus::Pending {
            match queries::find_slot_holder(tx, &booking.slot(), Some(&booking.id))? {
                None => booking.status = BookingStatus::Confirmed,
                Some(holder) => tracing::warn!(
                    booking_id = %booking.id,
                    holder = %holder,
                    "paid booking left pending: slot already held"
                ),
            }
        }
        booking.updated_at = now;
        queries::save_booking_state(tx, &booking)?;

        Ok(PaymentConfirmation {
            payment,
            booking,
            already_confirmed: false,
        })
    })?;

    if confirmation.already_confirmed {
        tracing::info!(reference, "payment already settled, nothing to do");
        return Ok(confirmation);
    }

    let booking = &confirmation.booking;
    if confirmation.payment.status == PaymentState::Successful {
        tracing::info!(reference, booking_id = %booking.id, "gateway payment confirmed");
        dispatch(
            notifier,
            &booking.user_id,
            Notification::new(
                NotificationKind::Payment,
                "Payment successful",
                format!("Payment for booking {} was received", booking.booking_number),
                serde_json::json!({ "booking_id": booking.id, "reference": reference }),
            ),
        );
        if let Some(provider) = queries::get_provider(conn, &booking.provider_id).ok().flatten() {
            dispatch(
                notifier,
                &provider.user_id,
                Notification::new(
                    NotificationKind::Payment,
                    "Booking paid",
                    format!("Booking {} has been paid", booking.booking_number),
                    serde_json::json!({ "booking_id": booking.id }),
                ),
            );
        }
    } else if confirmation.payment.status == PaymentState::Refunded {
        dispatch(
            notifier,
            &booking.user_id,
            Notification::new(
                NotificationKind::Payment,
                "Payment refunded",
                format!(
                    "Payment for cancelled booking {} was received and will be refunded",
                    booking.booking_number
                ),
                serde_json::json!({ "booking_id": booking.id, "reference": reference }),
            ),
        );
    } else {
        dispatch(
            notifier,
            &booking.user_id,
            Notification::new(
                NotificationKind::Payment,
                "Payment failed",
                format!("Payment for booking {} did not go through", booking.booking_number),
                serde_json::json!({ "booking_id": booking.id, "reference": reference }),
            ),
        );
    }

    Ok(confirmation)
}

/// Verifies and applies an inbound gateway webhook.
///
/// The signature is checked over the raw body before anything in it is
/// trusted. Only `charge.success` is acted upon; repeats are no-ops.
pub fn handle_webhook(
    conn: &mut Connection,
    notifier: &dyn NotificationSink,
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> AppResult<WebhookOutcome> {
    let signature = signature.unwrap_or("");
    if !verify_webhook_signature(secret, body, signature) {
        tracing::warn!("rejected webhook with bad signature");
        return Err(AppError::SignatureVerification);
    }

    let event: WebhookEvent = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("malformed webhook body: {e}")))?;

    if event.event != WebhookEvent::CHARGE_SUCCESS {
        tracing::info!(event = %event.event, "ignoring webhook event");
        return Ok(WebhookOutcome::Ignored { event: event.event });
    }

    let reference = event
        .reference()
        .ok_or_else(|| AppError::Validation("webhook missing data.reference".to_string()))?
        .to_string();

    let verification = ChargeVerification {
        success: event.data.get("status").and_then(|s| s.as_str()).unwrap_or("success") == "success",
        gateway_reference: reference.clone(),
        raw_payload: event.data.clone(),
    };

    confirm_gateway_payment(conn, notifier, &reference, &verification).map(WebhookOutcome::Processed)
}
