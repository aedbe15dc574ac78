use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub user_id: String,
    pub business_name: String,
    pub is_verified: bool,
    pub is_available: bool,
    /// Derived from the provider's reviews; see `services::reviews`.
    pub average_rating: Decimal,
    pub total_reviews: i64,
    pub completed_jobs: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Provider {
    pub fn accepts_bookings(&self) -> bool {
        self.is_verified && self.is_available
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub provider_id: String,
    pub category: String,
    pub name: String,
    pub price: Decimal,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
