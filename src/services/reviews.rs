use chrono::Utc;
use rusqlite::Connection;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::db::{self, queries};
use crate::errors::{AppError, AppResult};
use crate::models::{BookingStatus, Review};
use crate::services::notifications::{dispatch, Notification, NotificationKind, NotificationSink};

/// Mean of `ratings` rounded half away from zero to two places. Zero for
/// a provider with no reviews.
pub fn average_rating(ratings: &[i32]) -> Decimal {
    if ratings.is_empty() {
        return Decimal::ZERO;
    }
    let sum: i64 = ratings.iter().map(|&r| i64::from(r)).sum();
    let mean = Decimal::from(sum) / Decimal::from(ratings.len() as i64);
    mean.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn submit_review(
    conn: &mut Connection,
    notifier: &dyn NotificationSink,
    booking_id: &str,
    customer_id: &str,
    rating: i32,
    comment: Option<&str>,
) -> AppResult<Review> {
    if !(1..=5).contains(&rating) {
        return Err(AppError::Validation(format!(
            "rating must be between 1 and 5, got {rating}"
        )));
    }

    let (review, provider_user_id, average, total) = db::atomic(conn, |tx| {
        let booking = queries::get_booking(tx, booking_id)?
            .ok_or_else(|| AppError::NotFound(format!("booking {booking_id}")))?;
        if booking.user_id != customer_id {
            return Err(AppError::Authorization(format!(
                "booking {booking_id} belongs to another customer"
            )));
        }
        if booking.status != BookingStatus::Completed {
            return Err(AppError::invalid_transition(booking.status.as_str(), "reviewed"));
        }
        if queries::review_exists_for_booking(tx, booking_id)? {
            return Err(AppError::DuplicateReview(booking_id.to_string()));
        }

        let review = Review {
            id: uuid::Uuid::new_v4().to_string(),
            booking_id: booking.id.clone(),
            user_id: customer_id.to_string(),
            provider_id: booking.provider_id.clone(),
            rating,
            comment: comment.map(str::to_string),
            created_at: Utc::now().naive_utc(),
        };
        queries::insert_review(tx, &review)?;

        // full recompute over every review, including the one just written
        let ratings = queries::provider_ratings(tx, &booking.provider_id)?;
        let average = average_rating(&ratings);
        let total = ratings.len() as i64;
        queries::update_provider_rating(tx, &booking.provider_id, average, total)?;

        let provider = queries::get_provider(tx, &booking.provider_id)?
            .ok_or_else(|| AppError::NotFound(format!("provider {}", booking.provider_id)))?;
        Ok((review, provider.user_id, average, total))
    })?;

    tracing::info!(
        booking_id,
        provider_id = %review.provider_id,
        rating,
        average_rating = %average,
        total_reviews = total,
        "review submitted"
    );

    dispatch(
        notifier,
        &provider_user_id,
        Notification::new(
            NotificationKind::Review,
            "New review",
            format!("You received a {rating}-star review"),
            serde_json::json!({
                "review_id": review.id,
                "booking_id": review.booking_id,
                "rating": rating,
            }),
        ),
    );

    Ok(review)
}
