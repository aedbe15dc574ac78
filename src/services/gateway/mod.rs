pub mod paystack;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

pub use paystack::PaystackGateway;

#[derive(Debug, Clone, Serialize)]
pub struct ChargeRequest {
    pub email: String,
    /// Amount in the currency's minor unit (kobo).
    pub amount_minor: i64,
    pub reference: String,
    pub callback_url: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeInit {
    pub authorization_url: String,
    pub access_code: String,
}

#[derive(Debug, Clone)]
pub struct ChargeVerification {
    pub success: bool,
    pub gateway_reference: String,
    pub raw_payload: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_charge(&self, request: &ChargeRequest) -> anyhow::Result<ChargeInit>;

    async fn verify_charge(&self, reference: &str) -> anyhow::Result<ChargeVerification>;
}

/// Inbound webhook body.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: serde_json::Value,
}

impl WebhookEvent {
    pub const CHARGE_SUCCESS: &'static str = "charge.success";

    pub fn reference(&self) -> Option<&str> {
        self.data.get("reference").and_then(|v| v.as_str())
    }
}

/// Checks a hex HMAC-SHA512 of the raw request body against `secret`.
/// An empty secret never verifies.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let mut mac = match Hmac::<Sha512>::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Hex HMAC-SHA512 of `body`, as the gateway computes it.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> anyhow::Result<String> {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow::anyhow!("invalid key length"))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn to_minor_units(amount: Decimal) -> anyhow::Result<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| anyhow::anyhow!("amount out of range: {amount}"))
}
