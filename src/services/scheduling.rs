use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::db::{self, queries};
use crate::errors::{AppError, AppResult};
use crate::models::booking::{generate_booking_number, slot_time};
use crate::models::{
    Address, Booking, BookingDetails, BookingPaymentStatus, BookingStatus, PaymentMethod, Slot,
    TransactionKind,
};
use crate::services::notifications::{dispatch, Notification, NotificationKind, NotificationSink};
use crate::services::{ledger, payments};

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub service_id: String,
    pub scheduled_date: NaiveDate,
    #[serde(with = "slot_time")]
    pub scheduled_time: NaiveTime,
    pub address: Address,
    pub special_instructions: Option<String>,
    pub payment_method: PaymentMethod,
}

/// Fails with `Conflict` if another booking holds `slot`.
///
/// Only confirmed and in-progress bookings hold a slot; pending requests
/// for the same slot may coexist until the provider picks one.
pub fn ensure_slot_free(conn: &Connection, slot: &Slot<'_>, exclude: Option<&str>) -> AppResult<()> {
    match queries::find_slot_holder(conn, slot, exclude)? {
        Some(holder) => {
            tracing::info!(
                provider_id = slot.provider_id,
                date = %slot.date,
                time = %slot.time.format(slot_time::FORMAT),
                holder = %holder,
                "slot conflict"
            );
            Err(AppError::Conflict(format!(
                "provider {} is already booked on {} at {}",
                slot.provider_id,
                slot.date,
                slot.time.format(slot_time::FORMAT)
            )))
        }
        None => Ok(()),
    }
}

/// Loads the service, provider and payment that belong with `booking`.
pub fn hydrate(conn: &Connection, booking: Booking) -> AppResult<BookingDetails> {
    let service = queries::get_service(conn, &booking.service_id)?
        .ok_or_else(|| AppError::NotFound(format!("service {}", booking.service_id)))?;
    let provider = queries::get_provider(conn, &booking.provider_id)?
        .ok_or_else(|| AppError::NotFound(format!("provider {}", booking.provider_id)))?;
    let payment = queries::get_payment_by_booking(conn, &booking.id)?
        .ok_or_else(|| AppError::NotFound(format!("payment for booking {}", booking.id)))?;
    Ok(BookingDetails {
        booking,
        service,
        provider,
        payment,
    })
}

fn load_booking(conn: &Connection, booking_id: &str) -> AppResult<Booking> {
    queries::get_booking(conn, booking_id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))
}

pub fn create_booking(
    conn: &mut Connection,
    notifier: &dyn NotificationSink,
    customer_id: &str,
    request: NewBooking,
) -> AppResult<BookingDetails> {
    let details = db::atomic(conn, |tx| {
        let customer = queries::get_user(tx, customer_id)?
            .filter(|u| u.is_active)
            .ok_or_else(|| AppError::NotFound(format!("customer {customer_id}")))?;

        let service = queries::get_service(tx, &request.service_id)?
            .filter(|s| s.is_active)
            .ok_or_else(|| AppError::NotFound(format!("service {}", request.service_id)))?;

        let provider = queries::get_provider(tx, &service.provider_id)?
            .ok_or_else(|| AppError::NotFound(format!("provider {}", service.provider_id)))?;
        if !provider.accepts_bookings() {
            return Err(AppError::Validation(format!(
                "provider {} is not accepting bookings",
                provider.id
            )));
        }

        let slot = Slot {
            provider_id: &provider.id,
            date: request.scheduled_date,
            time: request.scheduled_time,
        };
        ensure_slot_free(tx, &slot, None)?;

        let wallet_paid = request.payment_method == PaymentMethod::Wallet;
        if wallet_paid && customer.wallet_balance < service.price {
            return Err(AppError::InsufficientFunds {
                balance: customer.wallet_balance,
                requested: service.price,
            });
        }

        let now = Utc::now().naive_utc();
        let booking = Booking {
            id: uuid::Uuid::new_v4().to_string(),
            booking_number: generate_booking_number(
                Utc::now().timestamp_millis(),
                &mut rand::thread_rng(),
            ),
            user_id: customer.id.clone(),
            provider_id: provider.id.clone(),
            service_id: service.id.clone(),
            scheduled_date: request.scheduled_date,
            scheduled_time: request.scheduled_time,
            address: request.address.clone(),
            special_instructions: request.special_instructions.clone(),
            total_amount: service.price,
            status: if wallet_paid {
                BookingStatus::Confirmed
            } else {
                BookingStatus::Pending
            },
            payment_status: if wallet_paid {
                BookingPaymentStatus::Paid
            } else {
                BookingPaymentStatus::Pending
            },
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        };
        queries::insert_booking(tx, &booking)?;

        let payment = payments::payment_for_booking(&booking, request.payment_method);
        queries::insert_payment(tx, &payment)?;

        if wallet_paid && booking.total_amount > Decimal::ZERO {
            ledger::apply_in(
                tx,
                &customer.id,
                TransactionKind::Debit,
                booking.total_amount,
                &format!("Payment for booking {}", booking.booking_number),
                &booking.id,
            )?;
        }

        Ok(BookingDetails {
            booking,
            service,
            provider,
            payment,
        })
    })?;

    let booking = &details.booking;
    tracing::info!(
        booking_id = %booking.id,
        booking_number = %booking.booking_number,
        provider_id = %booking.provider_id,
        status = booking.status.as_str(),
        method = details.payment.payment_method.as_str(),
        "booking created"
    );

    dispatch(
        notifier,
        &booking.user_id,
        Notification::new(
            NotificationKind::Booking,
            "Booking created",
            format!(
                "Your booking {} for {} has been {}",
                booking.booking_number,
                details.service.name,
                if booking.status == BookingStatus::Confirmed { "confirmed" } else { "received" }
            ),
            serde_json::json!({ "booking_id": booking.id, "status": booking.status }),
        ),
    );
    dispatch(
        notifier,
        &details.provider.user_id,
        Notification::new(
            NotificationKind::Booking,
            "New booking",
            format!(
                "New booking {} on {} at {}",
                booking.booking_number,
                booking.scheduled_date,
                booking.scheduled_time.format(slot_time::FORMAT)
            ),
            serde_json::json!({ "booking_id": booking.id }),
        ),
    );

    Ok(details)
}

/// Provider-driven status change.
pub fn update_status(
    conn: &mut Connection,
    notifier: &dyn NotificationSink,
    booking_id: &str,
    acting_provider_id: &str,
    new_status: BookingStatus,
) -> AppResult<BookingDetails> {
    let details = db::atomic(conn, |tx| {
        let mut booking = load_booking(tx, booking_id)?;
        if booking.provider_id != acting_provider_id {
            return Err(AppError::Authorization(format!(
                "booking {booking_id} is assigned to another provider"
            )));
        }
        if !booking.status.provider_can_move_to(new_status) {
            return Err(AppError::invalid_transition(
                booking.status.as_str(),
                new_status.as_str(),
            ));
        }

        let now = Utc::now().naive_utc();
        match new_status {
            BookingStatus::Confirmed => ensure_slot_free(tx, &booking.slot(), Some(&booking.id))?,
            BookingStatus::Completed => {
                booking.completed_at = Some(now);
                queries::increment_completed_jobs(tx, &booking.provider_id)?;
            }
            BookingStatus::Cancelled => {
                payments::settle_for_cancellation(tx, &mut booking)?;
                booking.cancelled_at = Some(now);
            }
            BookingStatus::Pending | BookingStatus::InProgress => {}
        }

        booking.status = new_status;
        booking.updated_at = now;
        queries::save_booking_state(tx, &booking)?;
        hydrate(tx, booking)
    })?;

    let booking = &details.booking;
    tracing::info!(booking_id, status = new_status.as_str(), "booking status updated");

    dispatch(
        notifier,
        &booking.user_id,
        Notification::new(
            NotificationKind::Booking,
            "Booking updated",
            format!(
                "Booking {} is now {}",
                booking.booking_number,
                new_status.as_str().replace('_', " ")
            ),
            serde_json::json!({ "booking_id": booking.id, "status": new_status }),
        ),
    );

    Ok(details)
}

/// Customer cancellation. A successful payment is refunded in the same
/// atomic unit; if the refund fails the booking is left untouched.
pub fn cancel_booking(
    conn: &mut Connection,
    notifier: &dyn NotificationSink,
    booking_id: &str,
    acting_customer_id: &str,
    reason: Option<&str>,
) -> AppResult<BookingDetails> {
    let details = db::atomic(conn, |tx| {
        let mut booking = load_booking(tx, booking_id)?;
        if booking.user_id != acting_customer_id {
            return Err(AppError::Authorization(format!(
                "booking {booking_id} belongs to another customer"
            )));
        }
        if !booking.status.customer_can_modify() {
            return Err(AppError::invalid_transition(
                booking.status.as_str(),
                BookingStatus::Cancelled.as_str(),
            ));
        }

        payments::settle_for_cancellation(tx, &mut booking)?;

        let now = Utc::now().naive_utc();
        booking.status = BookingStatus::Cancelled;
        booking.cancelled_at = Some(now);
        booking.cancellation_reason = reason.map(str::to_string);
        booking.updated_at = now;
        queries::save_booking_state(tx, &booking)?;
        hydrate(tx, booking)
    })?;

    let booking = &details.booking;
    tracing::info!(
        booking_id,
        payment_status = details.payment.status.as_str(),
        "booking cancelled by customer"
    );

    dispatch(
        notifier,
        &details.provider.user_id,
        Notification::new(
            NotificationKind::Booking,
            "Booking cancelled",
            format!("Booking {} was cancelled by the customer", booking.booking_number),
            serde_json::json!({ "booking_id": booking.id, "reason": reason }),
        ),
    );

    Ok(details)
}

pub fn reschedule_booking(
    conn: &mut Connection,
    notifier: &dyn NotificationSink,
    booking_id: &str,
    acting_customer_id: &str,
    new_date: NaiveDate,
    new_time: NaiveTime,
    reason: Option<&str>,
) -> AppResult<BookingDetails> {
    let details = db::atomic(conn, |tx| {
        let mut booking = load_booking(tx, booking_id)?;
        if booking.user_id != acting_customer_id {
            return Err(AppError::Authorization(format!(
                "booking {booking_id} belongs to another customer"
            )));
        }
        if !booking.status.customer_can_modify() {
            return Err(AppError::invalid_transition(
                booking.status.as_str(),
                "rescheduled",
            ));
        }

        let slot = Slot {
            provider_id: &booking.provider_id,
            date: new_date,
            time: new_time,
        };
        ensure_slot_free(tx, &slot, Some(&booking.id))?;

        booking.scheduled_date = new_date;
        booking.scheduled_time = new_time;
        booking.updated_at = Utc::now().naive_utc();
        queries::save_booking_state(tx, &booking)?;
        hydrate(tx, booking)
    })?;

    let booking = &details.booking;
    tracing::info!(
        booking_id,
        date = %new_date,
        time = %new_time.format(slot_time::FORMAT),
        "booking rescheduled"
    );

    dispatch(
        notifier,
        &details.provider.user_id,
        Notification::new(
            NotificationKind::Booking,
            "Booking rescheduled",
            format!(
                "Booking {} moved to {} at {}",
                booking.booking_number,
                new_date,
                new_time.format(slot_time::FORMAT)
            ),
            serde_json::json!({ "booking_id": booking.id, "reason": reason }),
        ),
    );

    Ok(details)
}

/// A booking as seen by its customer or its provider. Anyone else gets
/// `NotFound`.
pub fn booking_for_viewer(
    conn: &Connection,
    booking_id: &str,
    viewer_user_id: &str,
) -> AppResult<BookingDetails> {
    let booking = load_booking(conn, booking_id)?;
    let details = hydrate(conn, booking)?;
    if details.booking.user_id != viewer_user_id && details.provider.user_id != viewer_user_id {
        return Err(AppError::NotFound(format!("booking {booking_id}")));
    }
    Ok(details)
}

/// Bookings a user is party to: as customer, plus as provider if they have
/// a provider profile.
pub fn bookings_for_user(conn: &Connection, user_id: &str) -> AppResult<Vec<Booking>> {
    let mut bookings = queries::list_bookings_for_user(conn, user_id)?;
    if let Some(provider) = queries::get_provider_by_user(conn, user_id)? {
        bookings.extend(queries::list_bookings_for_provider(conn, &provider.id)?);
        // a provider may have booked their own service
        let mut seen = HashSet::new();
        bookings.retain(|b| seen.insert(b.id.clone()));
    }
    Ok(bookings)
}
