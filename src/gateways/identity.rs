// Identity provider - bearer token → verified email
//
// Sessions are owned by the hosted identity service. We only ask its
// OIDC userinfo endpoint who a token belongs to.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Identity {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
}

impl Identity {
    pub fn display_name(&self) -> Option<String> {
        if let Some(name) = self.name.as_ref().filter(|n| !n.trim().is_empty()) {
            return Some(name.clone());
        }
        let parts: Vec<&str> = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.trim().is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `Ok(None)` for tokens the provider rejects.
    async fn resolve(&self, token: &str) -> Result<Option<Identity>>;
}

pub struct OidcUserInfo {
    client: reqwest::Client,
    userinfo_url: String,
}

impl OidcUserInfo {
    pub fn new(client: reqwest::Client, userinfo_url: impl Into<String>) -> Self {
        Self {
            client,
            userinfo_url: userinfo_url.into(),
        }
    }
}

#[derive(Deserialize)]
struct UserInfo {
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
}

#[async_trait]
impl IdentityProvider for OidcUserInfo {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>> {
        if self.userinfo_url.is_empty() {
            anyhow::bail!("IDENTITY_USERINFO_URL is not configured");
        }

        let response = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(token)
            .send()
            .await
            .context("userinfo request failed")?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                debug!("identity provider rejected token");
                return Ok(None);
            }
            status if !status.is_success() => anyhow::bail!("userinfo returned {status}"),
            _ => {}
        }

        let info: UserInfo = response.json().await.context("invalid userinfo body")?;
        if info.email_verified == Some(false) {
            return Ok(None);
        }

        Ok(info.email.filter(|e| !e.trim().is_empty()).map(|email| Identity {
            email: email.trim().to_lowercase(),
            name: info.name,
            given_name: info.given_name,
            family_name: info.family_name,
        }))
    }
}
