use chrono::NaiveDateTime;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub booking_id: String,
    pub user_id: String,
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub transaction_reference: String,
    pub status: PaymentState,
    pub gateway_response: Option<serde_json::Value>,
    pub paid_at: Option<NaiveDateTime>,
    pub refunded_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Wallet,
    Paystack,
    Flutterwave,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Paystack => "paystack",
            PaymentMethod::Flutterwave => "flutterwave",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "card" => Some(PaymentMethod::Card),
            "bank_transfer" => Some(PaymentMethod::BankTransfer),
            "wallet" => Some(PaymentMethod::Wallet),
            "paystack" => Some(PaymentMethod::Paystack),
            "flutterwave" => Some(PaymentMethod::Flutterwave),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Pending,
    Processing,
    Successful,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Pending => "pending",
            PaymentState::Processing => "processing",
            PaymentState::Successful => "successful",
            PaymentState::Failed => "failed",
            PaymentState::Cancelled => "cancelled",
            PaymentState::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentState::Pending),
            "processing" => Some(PaymentState::Processing),
            "successful" => Some(PaymentState::Successful),
            "failed" => Some(PaymentState::Failed),
            "cancelled" => Some(PaymentState::Cancelled),
            "refunded" => Some(PaymentState::Refunded),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        use PaymentState::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Failed, Processing)
                | (Pending | Processing | Failed, Successful)
                | (Pending | Processing, Failed)
                | (Pending | Processing | Failed, Cancelled)
                | (Successful, Refunded)
        )
    }
}

/// Gateway correlation key, e.g. `FXF_1718000000123_4821`.
pub fn generate_transaction_reference(now_millis: i64, rng: &mut impl Rng) -> String {
    format!("FXF_{now_millis}_{:04}", rng.gen_range(0..10_000))
}
