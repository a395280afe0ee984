// Transactional email over an HTTP API, plus signed unsubscribe links

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{hmac_hex, hmac_verify};

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait EmailGateway: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<()>;
}

pub struct HttpEmailGateway {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    sender: String,
}

impl HttpEmailGateway {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl EmailGateway for HttpEmailGateway {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        if self.api_key.is_empty() {
            anyhow::bail!("EMAIL_API_KEY is not configured");
        }

        let body = json!({
            "sender": { "email": self.sender },
            "to": [{ "email": email.to }],
            "subject": email.subject,
            "htmlContent": email.html,
        });

        let response = self
            .client
            .post(&self.api_url)
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("email request for {} failed", email.to))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("email API returned {status}: {text}");
        }
        Ok(())
    }
}

// ============================================================================
// UNSUBSCRIBE TOKENS
// ============================================================================

fn canonical(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn unsubscribe_token(secret: &str, email: &str) -> Result<String> {
    hmac_hex(secret.as_bytes(), &[canonical(email).as_bytes()])
}

pub fn verify_unsubscribe_token(secret: &str, email: &str, token: &str) -> bool {
    !secret.is_empty() && hmac_verify(secret.as_bytes(), &[canonical(email).as_bytes()], token)
}

pub fn unsubscribe_link(base_url: &str, secret: &str, email: &str) -> Result<String> {
    let token = unsubscribe_token(secret, email)?;
    Ok(format!(
        "{}/api/email/unsubscribe?email={}&token={token}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(&canonical(email)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsubscribe_tokens() {
        let token = unsubscribe_token("s3cret", "Ana@Example.com").unwrap();
        assert!(verify_unsubscribe_token("s3cret", "ana@example.com", &token));
        assert!(!verify_unsubscribe_token("s3cret", "bob@example.com", &token));
        assert!(!verify_unsubscribe_token("", "ana@example.com", &token));

        let link = unsubscribe_link("https://rates.example/", "s3cret", "ana+x@example.com").unwrap();
        assert!(link.starts_with("https://rates.example/api/email/unsubscribe?email=ana%2Bx%40example.com&token="));
    }
}
