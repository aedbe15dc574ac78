use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use crate::errors::AppResult;
use crate::handlers::acting_user;
use crate::models::Review;
use crate::services::reviews;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub booking_id: String,
    pub rating: i32,
    pub comment: Option<String>,
}

// POST /api/reviews
pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ReviewRequest>,
) -> AppResult<(StatusCode, Json<Review>)> {
    let customer_id = acting_user(&headers)?;
    let mut db = state.conn()?;
    let review = reviews::submit_review(
        &mut db,
        state.notifier.as_ref(),
        &body.booking_id,
        &customer_id,
        body.rating,
        body.comment.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(review)))
}
