use std::str::FromStr;

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;

use crate::models::booking::slot_time;
use crate::models::{
    Address, Booking, BookingPaymentStatus, BookingStatus, Payment, PaymentMethod, PaymentState,
    Provider, Review, Role, Service, Slot, TransactionKind, User, WalletTransaction,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

fn ts(dt: &NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

fn opt_ts(dt: &Option<NaiveDateTime>) -> Option<String> {
    dt.as_ref().map(ts)
}

fn parse_ts(s: &str) -> anyhow::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TS_FORMAT).with_context(|| format!("bad timestamp: {s}"))
}

fn parse_opt_ts(s: Option<String>) -> anyhow::Result<Option<NaiveDateTime>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_decimal(s: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("bad decimal: {s}"))
}

fn parse_enum<T>(s: &str, parse: fn(&str) -> Option<T>, what: &str) -> anyhow::Result<T> {
    parse(s).ok_or_else(|| anyhow::anyhow!("unknown {what}: {s}"))
}

fn date_str(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn time_str(time: NaiveTime) -> String {
    time.format(slot_time::FORMAT).to_string()
}

// ── Users ──

pub fn create_user(
    conn: &Connection,
    id: &str,
    name: &str,
    email: &str,
    role: Role,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users (id, name, email, role) VALUES (?1, ?2, ?3, ?4)",
        params![id, name, email, role.as_str()],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, id: &str) -> anyhow::Result<Option<User>> {
    conn.query_row(
        "SELECT id, name, email, role, wallet_balance, is_active, created_at, updated_at
         FROM users WHERE id = ?1",
        params![id],
        |row| Ok(parse_user_row(row)),
    )
    .optional()?
    .transpose()
}

fn parse_user_row(row: &rusqlite::Row) -> anyhow::Result<User> {
    let role: String = row.get(3)?;
    let balance: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: parse_enum(&role, Role::parse, "role")?,
        wallet_balance: parse_decimal(&balance)?,
        is_active: row.get::<_, i32>(5)? != 0,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Current balance, read inside the caller's transaction.
pub fn get_wallet_balance(conn: &Connection, user_id: &str) -> anyhow::Result<Option<Decimal>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT wallet_balance FROM users WHERE id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    raw.as_deref().map(parse_decimal).transpose()
}

pub fn set_wallet_balance(
    conn: &Connection,
    user_id: &str,
    balance: Decimal,
    now: &NaiveDateTime,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE users SET wallet_balance = ?1, updated_at = ?2 WHERE id = ?3",
        params![balance.to_string(), ts(now), user_id],
    )?;
    Ok(count > 0)
}

// ── Providers ──

pub fn create_provider(
    conn: &Connection,
    id: &str,
    user_id: &str,
    business_name: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO providers (id, user_id, business_name) VALUES (?1, ?2, ?3)",
        params![id, user_id, business_name],
    )?;
    Ok(())
}

/// Verification is granted by an admin outside this service.
pub fn set_provider_flags(
    conn: &Connection,
    id: &str,
    is_verified: bool,
    is_available: bool,
) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE providers SET is_verified = ?1, is_available = ?2, updated_at = datetime('now') WHERE id = ?3",
        params![is_verified as i32, is_available as i32, id],
    )?;
    Ok(count > 0)
}

const PROVIDER_COLUMNS: &str = "id, user_id, business_name, is_verified, is_available, average_rating, total_reviews, completed_jobs, created_at, updated_at";

pub fn get_provider(conn: &Connection, id: &str) -> anyhow::Result<Option<Provider>> {
    conn.query_row(
        &format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = ?1"),
        params![id],
        |row| Ok(parse_provider_row(row)),
    )
    .optional()?
    .transpose()
}

pub fn get_provider_by_user(conn: &Connection, user_id: &str) -> anyhow::Result<Option<Provider>> {
    conn.query_row(
        &format!("SELECT {PROVIDER_COLUMNS} FROM providers WHERE user_id = ?1"),
        params![user_id],
        |row| Ok(parse_provider_row(row)),
    )
    .optional()?
    .transpose()
}

fn parse_provider_row(row: &rusqlite::Row) -> anyhow::Result<Provider> {
    let rating: String = row.get(5)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(Provider {
        id: row.get(0)?,
        user_id: row.get(1)?,
        business_name: row.get(2)?,
        is_verified: row.get::<_, i32>(3)? != 0,
        is_available: row.get::<_, i32>(4)? != 0,
        average_rating: parse_decimal(&rating)?,
        total_reviews: row.get(6)?,
        completed_jobs: row.get(7)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

pub fn update_provider_rating(
    conn: &Connection,
    id: &str,
    average_rating: Decimal,
    total_reviews: i64,
) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE providers SET average_rating = ?1, total_reviews = ?2, updated_at = datetime('now') WHERE id = ?3",
        params![average_rating.to_string(), total_reviews, id],
    )?;
    Ok(())
}

pub fn increment_completed_jobs(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE providers SET completed_jobs = completed_jobs + 1, updated_at = datetime('now') WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

// ── Services ──

pub fn create_service(
    conn: &Connection,
    id: &str,
    provider_id: &str,
    category: &str,
    name: &str,
    price: Decimal,
) -> anyhow::Result<()> {
    anyhow::ensure!(price >= Decimal::ZERO, "service price must not be negative");
    conn.execute(
        "INSERT INTO services (id, provider_id, category, name, price) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, provider_id, category, name, price.to_string()],
    )?;
    Ok(())
}

pub fn set_service_active(conn: &Connection, id: &str, is_active: bool) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE services SET is_active = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![is_active as i32, id],
    )?;
    Ok(count > 0)
}

pub fn get_service(conn: &Connection, id: &str) -> anyhow::Result<Option<Service>> {
    conn.query_row(
        "SELECT id, provider_id, category, name, price, is_active, created_at, updated_at
         FROM services WHERE id = ?1",
        params![id],
        |row| Ok(parse_service_row(row)),
    )
    .optional()?
    .transpose()
}

fn parse_service_row(row: &rusqlite::Row) -> anyhow::Result<Service> {
    let price: String = row.get(4)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;

    Ok(Service {
        id: row.get(0)?,
        provider_id: row.get(1)?,
        category: row.get(2)?,
        name: row.get(3)?,
        price: parse_decimal(&price)?,
        is_active: row.get::<_, i32>(5)? != 0,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Bookings ──

const BOOKING_COLUMNS: &str = "id, booking_number, user_id, provider_id, service_id, scheduled_date, scheduled_time, \
     street, city, state, landmark, special_instructions, total_amount, status, payment_status, \
     completed_at, cancelled_at, cancellation_reason, created_at, updated_at";

pub fn insert_booking(conn: &Connection, booking: &Booking) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
        ),
        params![
            booking.id,
            booking.booking_number,
            booking.user_id,
            booking.provider_id,
            booking.service_id,
            date_str(booking.scheduled_date),
            time_str(booking.scheduled_time),
            booking.address.street,
            booking.address.city,
            booking.address.state,
            booking.address.landmark,
            booking.special_instructions,
            booking.total_amount.to_string(),
            booking.status.as_str(),
            booking.payment_status.as_str(),
            opt_ts(&booking.completed_at),
            opt_ts(&booking.cancelled_at),
            booking.cancellation_reason,
            ts(&booking.created_at),
            ts(&booking.updated_at),
        ],
    )?;
    Ok(())
}

/// Writes every mutable column of a booking. `total_amount` is not among them.
pub fn save_booking_state(conn: &Connection, booking: &Booking) -> anyhow::Result<bool> {
    let count = conn.execute(
        "UPDATE bookings SET scheduled_date = ?1, scheduled_time = ?2, status = ?3, payment_status = ?4,
            completed_at = ?5, cancelled_at = ?6, cancellation_reason = ?7, updated_at = ?8
         WHERE id = ?9",
        params![
            date_str(booking.scheduled_date),
            time_str(booking.scheduled_time),
            booking.status.as_str(),
            booking.payment_status.as_str(),
            opt_ts(&booking.completed_at),
            opt_ts(&booking.cancelled_at),
            booking.cancellation_reason,
            ts(&booking.updated_at),
            booking.id,
        ],
    )?;
    Ok(count > 0)
}

pub fn get_booking(conn: &Connection, id: &str) -> anyhow::Result<Option<Booking>> {
    conn.query_row(
        &format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1"),
        params![id],
        |row| Ok(parse_booking_row(row)),
    )
    .optional()?
    .transpose()
}

/// Id of a booking other than `exclude` that holds `slot` (confirmed or in progress).
pub fn find_slot_holder(
    conn: &Connection,
    slot: &Slot<'_>,
    exclude: Option<&str>,
) -> anyhow::Result<Option<String>> {
    let holder = conn
        .query_row(
            "SELECT id FROM bookings
             WHERE provider_id = ?1 AND scheduled_date = ?2 AND scheduled_time = ?3
               AND status IN ('confirmed', 'in_progress')
               AND (?4 IS NULL OR id != ?4)
             LIMIT 1",
            params![
                slot.provider_id,
                date_str(slot.date),
                time_str(slot.time),
                exclude
            ],
            |row| row.get(0),
        )
        .optional()?;
    Ok(holder)
}

pub fn list_bookings_for_user(conn: &Connection, user_id: &str) -> anyhow::Result<Vec<Booking>> {
    list_bookings_where(conn, "user_id = ?1", user_id)
}

pub fn list_bookings_for_provider(
    conn: &Connection,
    provider_id: &str,
) -> anyhow::Result<Vec<Booking>> {
    list_bookings_where(conn, "provider_id = ?1", provider_id)
}

fn list_bookings_where(conn: &Connection, filter: &str, value: &str) -> anyhow::Result<Vec<Booking>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings WHERE {filter}
         ORDER BY scheduled_date DESC, scheduled_time DESC"
    ))?;
    let rows = stmt.query_map(params![value], |row| Ok(parse_booking_row(row)))?;

    let mut bookings = vec![];
    for row in rows {
        bookings.push(row??);
    }
    Ok(bookings)
}

fn parse_booking_row(row: &rusqlite::Row) -> anyhow::Result<Booking> {
    let scheduled_date: String = row.get(5)?;
    let scheduled_time: String = row.get(6)?;
    let total_amount: String = row.get(12)?;
    let status: String = row.get(13)?;
    let payment_status: String = row.get(14)?;
    let created_at: String = row.get(18)?;
    let updated_at: String = row.get(19)?;

    Ok(Booking {
        id: row.get(0)?,
        booking_number: row.get(1)?,
        user_id: row.get(2)?,
        provider_id: row.get(3)?,
        service_id: row.get(4)?,
        scheduled_date: NaiveDate::parse_from_str(&scheduled_date, DATE_FORMAT)
            .with_context(|| format!("bad date: {scheduled_date}"))?,
        scheduled_time: NaiveTime::parse_from_str(&scheduled_time, slot_time::FORMAT)
            .with_context(|| format!("bad time: {scheduled_time}"))?,
        address: Address {
            street: row.get(7)?,
            city: row.get(8)?,
            state: row.get(9)?,
            landmark: row.get(10)?,
        },
        special_instructions: row.get(11)?,
        total_amount: parse_decimal(&total_amount)?,
        status: parse_enum(&status, BookingStatus::parse, "booking status")?,
        payment_status: parse_enum(
            &payment_status,
            BookingPaymentStatus::parse,
            "booking payment status",
        )?,
        completed_at: parse_opt_ts(row.get(15)?)?,
        cancelled_at: parse_opt_ts(row.get(16)?)?,
        cancellation_reason: row.get(17)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Payments ──

const PAYMENT_COLUMNS: &str = "id, booking_id, user_id, amount, payment_method, transaction_reference, status, \
     gateway_response, paid_at, refunded_at, created_at, updated_at";

pub fn insert_payment(conn: &Connection, payment: &Payment) -> anyhow::Result<()> {
    let gateway_response = payment
        .gateway_response
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        &format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            payment.id,
            payment.booking_id,
            payment.user_id,
            payment.amount.to_string(),
            payment.payment_method.as_str(),
            payment.transaction_reference,
            payment.status.as_str(),
            gateway_response,
            opt_ts(&payment.paid_at),
            opt_ts(&payment.refunded_at),
            ts(&payment.created_at),
            ts(&payment.updated_at),
        ],
    )?;
    Ok(())
}

pub fn save_payment_state(conn: &Connection, payment: &Payment) -> anyhow::Result<bool> {
    let gateway_response = payment
        .gateway_response
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let count = conn.execute(
        "UPDATE payments SET transaction_reference = ?1, status = ?2, gateway_response = ?3,
            paid_at = ?4, refunded_at = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            payment.transaction_reference,
            payment.status.as_str(),
            gateway_response,
            opt_ts(&payment.paid_at),
            opt_ts(&payment.refunded_at),
            ts(&payment.updated_at),
            payment.id,
        ],
    )?;
    Ok(count > 0)
}

pub fn get_payment_by_booking(
    conn: &Connection,
    booking_id: &str,
) -> anyhow::Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = ?1"),
        params![booking_id],
        |row| Ok(parse_payment_row(row)),
    )
    .optional()?
    .transpose()
}

pub fn get_payment_by_reference(
    conn: &Connection,
    reference: &str,
) -> anyhow::Result<Option<Payment>> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_reference = ?1"),
        params![reference],
        |row| Ok(parse_payment_row(row)),
    )
    .optional()?
    .transpose()
}

fn parse_payment_row(row: &rusqlite::Row) -> anyhow::Result<Payment> {
    let amount: String = row.get(3)?;
    let method: String = row.get(4)?;
    let status: String = row.get(6)?;
    let gateway_response: Option<String> = row.get(7)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(Payment {
        id: row.get(0)?,
        booking_id: row.get(1)?,
        user_id: row.get(2)?,
        amount: parse_decimal(&amount)?,
        payment_method: parse_enum(&method, PaymentMethod::parse, "payment method")?,
        transaction_reference: row.get(5)?,
        status: parse_enum(&status, PaymentState::parse, "payment status")?,
        gateway_response: gateway_response
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        paid_at: parse_opt_ts(row.get(8)?)?,
        refunded_at: parse_opt_ts(row.get(9)?)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

// ── Wallet Transactions ──

pub fn insert_wallet_transaction(conn: &Connection, tx: &WalletTransaction) -> anyhow::Result<()> {
    let created_at = ts(&tx.created_at);
    conn.execute(
        "INSERT INTO wallet_transactions (id, user_id, kind, amount, description, reference, balance_before, balance_after, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            tx.id,
            tx.user_id,
            tx.kind.as_str(),
            tx.amount.to_string(),
            tx.description,
            tx.reference,
            tx.balance_before.to_string(),
            tx.balance_after.to_string(),
            created_at,
        ],
    )?;
    Ok(())
}

/// Ledger rows for a user, oldest first.
pub fn list_wallet_transactions(
    conn: &Connection,
    user_id: &str,
) -> anyhow::Result<Vec<WalletTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, kind, amount, description, reference, balance_before, balance_after, created_at
         FROM wallet_transactions WHERE user_id = ?1 ORDER BY rowid ASC",
    )?;
    let rows = stmt.query_map(params![user_id], |row| Ok(parse_wallet_row(row)))?;

    let mut transactions = vec![];
    for row in rows {
        transactions.push(row??);
    }
    Ok(transactions)
}

fn parse_wallet_row(row: &rusqlite::Row) -> anyhow::Result<WalletTransaction> {
    let kind: String = row.get(2)?;
    let amount: String = row.get(3)?;
    let before: String = row.get(6)?;
    let after: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(WalletTransaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: parse_enum(&kind, TransactionKind::parse, "transaction kind")?,
        amount: parse_decimal(&amount)?,
        description: row.get(4)?,
        reference: row.get(5)?,
        balance_before: parse_decimal(&before)?,
        balance_after: parse_decimal(&after)?,
        created_at: parse_ts(&created_at)?,
    })
}

// ── Reviews ──

pub fn insert_review(conn: &Connection, review: &Review) -> anyhow::Result<()> {
    let created_at = ts(&review.created_at);
    conn.execute(
        "INSERT INTO reviews (id, booking_id, user_id, provider_id, rating, comment, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            review.id,
            review.booking_id,
            review.user_id,
            review.provider_id,
            review.rating,
            review.comment,
            created_at,
        ],
    )?;
    Ok(())
}

pub fn review_exists_for_booking(conn: &Connection, booking_id: &str) -> anyhow::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM reviews WHERE booking_id = ?1",
        params![booking_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Every rating a provider has received.
pub fn provider_ratings(conn: &Connection, provider_id: &str) -> anyhow::Result<Vec<i32>> {
    let mut stmt = conn.prepare("SELECT rating FROM reviews WHERE provider_id = ?1")?;
    let rows = stmt.query_map(params![provider_id], |row| row.get(0))?;

    let mut ratings = vec![];
    for row in rows {
        ratings.push(row?);
    }
    Ok(ratings)
}
