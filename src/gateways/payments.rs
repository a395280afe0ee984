// Stripe - hosted checkout sessions and webhook signatures

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::{hmac_hex, hmac_verify};

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Maximum age of a signed webhook, in seconds
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub customer_email: String,
    pub customer_id: Option<String>,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;
}

pub struct StripeClient {
    client: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(client: reqwest::Client, secret_key: impl Into<String>) -> Self {
        Self {
            client,
            secret_key: secret_key.into(),
            api_base: STRIPE_API_BASE.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        if self.secret_key.is_empty() {
            anyhow::bail!("STRIPE_SECRET_KEY is not configured");
        }

        let mut form: Vec<(&str, &str)> = vec![
            ("mode", "subscription"),
            ("line_items[0][price]", request.price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("success_url", request.success_url.as_str()),
            ("cancel_url", request.cancel_url.as_str()),
            ("client_reference_id", request.customer_email.as_str()),
            ("metadata[user_email]", request.customer_email.as_str()),
        ];
        // Stripe rejects customer and customer_email together
        match &request.customer_id {
            Some(customer) => form.push(("customer", customer.as_str())),
            None => form.push(("customer_email", request.customer_email.as_str())),
        }

        let response = self
            .client
            .post(format!("{}/checkout/sessions", self.api_base))
            .basic_auth(&self.secret_key, Some(""))
            .form(&form)
            .send()
            .await
            .context("Stripe request failed")?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message)
                .unwrap_or_else(|| status.to_string());
            anyhow::bail!("Stripe returned {status}: {message}");
        }

        let session: CheckoutSession = response.json().await.context("invalid Stripe response")?;
        info!(session_id = %session.id, email = %request.customer_email, "checkout session created");
        Ok(session)
    }
}

// ============================================================================
// WEBHOOK SIGNATURES
// ============================================================================

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Webhook signing secret is not configured")]
    NoSecret,
    #[error("Missing or malformed Stripe-Signature header")]
    Malformed,
    #[error("Webhook timestamp outside tolerance")]
    Expired,
    #[error("No matching webhook signature")]
    Mismatch,
}

/// Verify a `Stripe-Signature: t=<unix>,v1=<hex>[,v1=...]` header against
/// the raw request body.
pub fn verify_stripe_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now_unix: i64,
) -> Result<(), SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::NoSecret);
    }

    let mut timestamp: Option<&str> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now_unix - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    let signed = [timestamp.as_bytes(), b".", payload];
    if signatures.iter().any(|sig| hmac_verify(secret.as_bytes(), &signed, sig)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a header the way Stripe signs webhooks.
pub fn sign_stripe_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String> {
    let ts = timestamp.to_string();
    let signature = hmac_hex(secret.as_bytes(), &[ts.as_bytes(), b".", payload])?;
    Ok(format!("t={ts},v1={signature}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_700_000_000;

    #[test]
    fn test_valid_signature() {
        let body = br#"{"type":"invoice.payment_succeeded"}"#;
        let header = sign_stripe_payload(body, SECRET, NOW - 10).unwrap();
        assert_eq!(verify_stripe_signature(body, &header, SECRET, NOW), Ok(()));

        // extra schemes and a rotated secret's signature are tolerated
        let rotated = format!("{header},v0=abc,v1=deadbeef");
        assert_eq!(verify_stripe_signature(body, &rotated, SECRET, NOW), Ok(()));
    }

    #[test]
    fn test_rejections() {
        let body = b"{}";
        let header = sign_stripe_payload(body, SECRET, NOW).unwrap();

        assert_eq!(
            verify_stripe_signature(b"{ }", &header, SECRET, NOW),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_stripe_signature(body, &header, "whsec_other", NOW),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_stripe_signature(body, &header, SECRET, NOW + SIGNATURE_TOLERANCE_SECS + 1),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            verify_stripe_signature(body, "v1=abc", SECRET, NOW),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_stripe_signature(body, "t=abc,v1=abc", SECRET, NOW),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn test_empty_secret_never_verifies() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let header = sign_stripe_payload(body, "", NOW).unwrap();
        assert_eq!(
            verify_stripe_signature(body, &header, "", NOW),
            Err(SignatureError::NoSecret)
        );
    }
}
