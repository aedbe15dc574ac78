use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::handlers::acting_user;
use crate::models::booking::slot_time;
use crate::models::{Booking, BookingDetails, BookingStatus};
use crate::services::scheduling::{self, NewBooking};
use crate::state::AppState;

// POST /api/bookings
pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NewBooking>,
) -> AppResult<(StatusCode, Json<BookingDetails>)> {
    let customer_id = acting_user(&headers)?;
    let mut db = state.conn()?;
    let details = scheduling::create_booking(&mut db, state.notifier.as_ref(), &customer_id, body)?;
    Ok((StatusCode::CREATED, Json(details)))
}

// GET /api/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<Booking>>> {
    let user_id = acting_user(&headers)?;
    let db = state.conn()?;
    Ok(Json(scheduling::bookings_for_user(&db, &user_id)?))
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Json<BookingDetails>> {
    let user_id = acting_user(&headers)?;
    let db = state.conn()?;
    Ok(Json(scheduling::booking_for_viewer(&db, &id, &user_id)?))
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

// PUT /api/bookings/:id/status
pub async fn update_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<StatusRequest>,
) -> AppResult<Json<BookingDetails>> {
    let user_id = acting_user(&headers)?;
    let status = BookingStatus::parse(&body.status)
        .ok_or_else(|| AppError::Validation(format!("unknown booking status {:?}", body.status)))?;

    let mut db = state.conn()?;
    let provider = queries::get_provider_by_user(&db, &user_id)?
        .ok_or_else(|| AppError::Authorization(format!("user {user_id} is not a provider")))?;
    let details =
        scheduling::update_status(&mut db, state.notifier.as_ref(), &id, &provider.id, status)?;
    Ok(Json(details))
}

#[derive(Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> AppResult<Json<BookingDetails>> {
    let customer_id = acting_user(&headers)?;
    let reason = body.and_then(|Json(b)| b.reason);

    let mut db = state.conn()?;
    let details = scheduling::cancel_booking(
        &mut db,
        state.notifier.as_ref(),
        &id,
        &customer_id,
        reason.as_deref(),
    )?;
    Ok(Json(details))
}

#[derive(Deserialize)]
pub struct RescheduleRequest {
    pub scheduled_date: NaiveDate,
    #[serde(with = "slot_time")]
    pub scheduled_time: NaiveTime,
    pub reason: Option<String>,
}

// POST /api/bookings/:id/reschedule
pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RescheduleRequest>,
) -> AppResult<Json<BookingDetails>> {
    let customer_id = acting_user(&headers)?;
    let mut db = state.conn()?;
    let details = scheduling::reschedule_booking(
        &mut db,
        state.notifier.as_ref(),
        &id,
        &customer_id,
        body.scheduled_date,
        body.scheduled_time,
        body.reason.as_deref(),
    )?;
    Ok(Json(details))
}
