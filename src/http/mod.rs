// HTTP API - router, shared state and the response envelope
//
// Handlers lock the connection only for synchronous queries and release it
// before awaiting any third-party call.

pub mod account;
pub mod admin;
pub mod auth;
pub mod community;
pub mod content;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Json, Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::gateways::{EmailGateway, IdentityProvider, PaymentGateway};
use crate::progress::ProgressTracker;

/// Spreadsheet exports run well past axum's 2 MB default
const UPLOAD_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<Config>,
    pub progress: Arc<ProgressTracker>,
    pub identity: Arc<dyn IdentityProvider>,
    pub payments: Arc<dyn PaymentGateway>,
    pub email: Arc<dyn EmailGateway>,
}

impl AppState {
    pub fn new(
        conn: Connection,
        config: Config,
        identity: Arc<dyn IdentityProvider>,
        payments: Arc<dyn PaymentGateway>,
        email: Arc<dyn EmailGateway>,
    ) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            progress: Arc::new(ProgressTracker::new(config.upload_progress_ttl)),
            config: Arc::new(config),
            identity,
            payments,
            email,
        }
    }

    pub fn db(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

/// API Response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

/// GET /api/health
async fn health_check() -> Json<ApiResponse<&'static str>> {
    ApiResponse::ok("OK")
}

pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health_check))
        .route("/state-metrics", get(content::state_metrics))
        .route("/enhanced-metrics", get(content::enhanced_metrics))
        .route("/recent-rate-changes", get(content::recent_rate_changes))
        .route("/stripe/webhook", post(account::stripe_webhook))
        .route("/email/unsubscribe", get(account::unsubscribe));

    let subscriber = Router::new()
        .route("/provider-alerts", get(content::provider_alerts))
        .route("/legislative-updates", get(content::legislative_updates));

    let account = Router::new()
        .route("/user/me", get(account::me))
        .route("/subscription/status", get(account::subscription_status))
        .route(
            "/subscription/sub-users",
            get(account::list_sub_users).post(account::add_sub_user),
        )
        .route("/subscription/sub-users/:email", delete(account::remove_sub_user))
        .route("/stripe/create-checkout-session", post(account::create_checkout_session))
        .route(
            "/email-preferences",
            get(account::get_email_preferences).put(account::update_email_preferences),
        );

    let community = Router::new()
        .route(
            "/community/posts",
            get(community::list_posts).post(community::create_post),
        )
        .route(
            "/community/posts/:id",
            put(community::update_post).delete(community::delete_post),
        )
        .route("/community/posts/:id/vote", post(community::vote))
        .route(
            "/community/comments",
            get(community::list_comments).post(community::create_comment),
        )
        .route(
            "/community/comments/:id",
            put(community::update_comment).delete(community::delete_comment),
        )
        .route(
            "/community/bookmarks",
            get(community::list_bookmarks).post(community::add_bookmark),
        )
        .route("/community/bookmarks/:post_id", delete(community::remove_bookmark));

    let admin = Router::new()
        .route("/admin/check-access", post(admin::check_access))
        .route(
            "/admin/update-database",
            post(admin::update_database).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/admin/upload-progress/:upload_id", get(admin::upload_progress))
        .route("/admin/update-bill", put(admin::update_bill))
        .route("/admin/update-provider-alert", put(admin::update_provider_alert))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/community/posts/:id/flags", put(admin::set_post_flags))
        .route("/admin/marketing-email", post(admin::marketing_email))
        .route("/admin/events", get(admin::events));

    let api = public
        .merge(subscriber)
        .merge(account)
        .merge(community)
        .merge(admin)
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
