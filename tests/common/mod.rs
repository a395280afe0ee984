// Shared harness: in-memory database, fake gateways, oneshot requests

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use rusqlite::Connection;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

use rate_watch::gateways::{
    CheckoutRequest, CheckoutSession, EmailGateway, Identity, IdentityProvider, OutgoingEmail,
    PaymentGateway,
};
use rate_watch::{build_router, setup_database, AppState, Config};

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const UNSUBSCRIBE_SECRET: &str = "unsub_test";

/// Signing in as this address simulates an identity provider outage.
pub const IDENTITY_DOWN: &str = "identity-down@rates.test";

/// Accepts tokens of the form "token:<email>".
pub struct FakeIdentity;

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>> {
        if token == format!("token:{IDENTITY_DOWN}") {
            anyhow::bail!("userinfo endpoint unreachable");
        }
        Ok(token.strip_prefix("token:").map(|email| Identity {
            email: email.to_string(),
            name: Some(format!("User {email}")),
            given_name: None,
            family_name: None,
        }))
    }
}

#[derive(Default)]
pub struct FakePayments {
    pub requests: Mutex<Vec<CheckoutRequest>>,
}

#[async_trait]
impl PaymentGateway for FakePayments {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(CheckoutSession {
            id: "cs_test_1".to_string(),
            url: Some("https://checkout.stripe.test/cs_test_1".to_string()),
        })
    }
}

#[derive(Default)]
pub struct FakeEmail {
    pub sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl EmailGateway for FakeEmail {
    async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub payments: Arc<FakePayments>,
    pub email: Arc<FakeEmail>,
    pub data_dir: TempDir,
}

pub fn token(email: &str) -> String {
    format!("token:{email}")
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Same fixture with config overrides applied on top.
    pub fn with_config(adjust: impl FnOnce(&mut Config)) -> Self {
        let data_dir = TempDir::new().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let mut config = Config {
            static_data_dir: data_dir.path().to_path_buf(),
            stripe_webhook_secret: WEBHOOK_SECRET.to_string(),
            stripe_price_id: "price_test".to_string(),
            unsubscribe_secret: UNSUBSCRIBE_SECRET.to_string(),
            app_base_url: "https://rates.test".to_string(),
            ..Config::default()
        };
        adjust(&mut config);

        let payments = Arc::new(FakePayments::default());
        let email = Arc::new(FakeEmail::default());
        let state = AppState::new(
            conn,
            config,
            Arc::new(FakeIdentity),
            payments.clone(),
            email.clone(),
        );

        Self {
            router: build_router(state.clone()),
            state,
            payments,
            email,
            data_dir,
        }
    }

    /// Run a closure against the database directly.
    pub fn with_db<R>(&self, f: impl FnOnce(&Connection) -> R) -> R {
        let conn = self.state.db.lock().unwrap();
        f(&conn)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(email) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(email)));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn get(&self, uri: &str, user: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::GET, uri, user, None).await
    }

    pub async fn post(&self, uri: &str, user: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, user, Some(body)).await
    }

    pub async fn put(&self, uri: &str, user: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.call(Method::PUT, uri, user, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, user: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::DELETE, uri, user, None).await
    }

    pub async fn post_text(
        &self,
        uri: &str,
        user: &str,
        content_type: &str,
        body: &str,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token(user)))
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }
}
