pub mod bookings;
pub mod health;
pub mod notifications;
pub mod payments;
pub mod reviews;
pub mod wallet;

use axum::http::HeaderMap;

use crate::errors::{AppError, AppResult};

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_HEADER: &str = "x-user-id";

pub fn acting_user(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::Authorization(format!("missing {USER_HEADER} header")))
}
