use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;

use super::{ChargeInit, ChargeRequest, ChargeVerification, PaymentGateway};

pub struct PaystackGateway {
    secret_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl PaystackGateway {
    pub fn new(secret_key: String, base_url: String) -> Self {
        Self {
            secret_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

impl PaystackGateway {
    /// `{base}/transaction/verify/{reference}` with the reference encoded as
    /// a single path segment.
    fn verify_url(&self, reference: &str) -> anyhow::Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .with_context(|| format!("invalid Paystack base URL: {}", self.base_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Paystack base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(["transaction", "verify", reference]);
        Ok(url)
    }
}

/// Unwraps Paystack's `{status, message, data}` envelope.
fn envelope_data(status: reqwest::StatusCode, body: serde_json::Value) -> anyhow::Result<serde_json::Value> {
    let ok = body["status"].as_bool().unwrap_or(false);
    if !status.is_success() || !ok {
        let message = body["message"].as_str().unwrap_or("no message");
        anyhow::bail!("Paystack API error ({status}): {message}");
    }
    match body.get("data") {
        Some(data) if data.is_object() => Ok(data.clone()),
        _ => anyhow::bail!("missing data in Paystack response"),
    }
}

#[async_trait]
impl PaymentGateway for PaystackGateway {
    async fn initialize_charge(&self, request: &ChargeRequest) -> anyhow::Result<ChargeInit> {
        let body = json!({
            "email": request.email,
            "amount": request.amount_minor,
            "reference": request.reference,
            "callback_url": request.callback_url,
            "metadata": request.metadata,
        });

        let resp = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .context("failed to call Paystack initialize")?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Paystack initialize response")?;

        let data = envelope_data(status, payload)?;
        serde_json::from_value(data).context("unexpected Paystack initialize payload")
    }

    async fn verify_charge(&self, reference: &str) -> anyhow::Result<ChargeVerification> {
        let resp = self
            .client
            .get(self.verify_url(reference)?)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .context("failed to call Paystack verify")?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse Paystack verify response")?;

        let data = envelope_data(status, payload)?;
        let gateway_reference = data["reference"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing reference in Paystack verify response"))?
            .to_string();

        Ok(ChargeVerification {
            success: data["status"].as_str() == Some("success"),
            gateway_reference,
            raw_payload: data,
        })
    }
}
