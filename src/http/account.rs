// Account endpoints - profile, subscription, sub-users, Stripe, email preferences

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Html,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::{auth::SessionUser, ApiResponse, AppState};
use crate::billing::apply_stripe_event;
use crate::db::record_event;
use crate::entities::accounts::{
    self, ensure_user, find_user, latest_subscription, resolve_access, Access, SubUserOutcome,
    Subscription, User,
};
use crate::entities::admin::check_admin_access;
use crate::entities::email_prefs::{
    get_preferences, unsubscribe_marketing, update_preferences, EmailPreferences, PreferenceChanges,
};
use crate::error::{AppError, AppResult};
use crate::gateways::email::verify_unsubscribe_token;
use crate::gateways::{verify_stripe_signature, CheckoutRequest, SignatureError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: User,
    pub is_admin: bool,
    pub has_access: bool,
    /// Primary holder's email when access comes through a team
    pub access_via: Option<String>,
}

/// GET /api/user/me
pub async fn me(State(state): State<AppState>, session: SessionUser) -> AppResult<Json<ApiResponse<MeResponse>>> {
    let conn = state.db()?;
    let identity = &session.identity;
    let user = ensure_user(
        &conn,
        &session.email,
        identity.given_name.as_deref(),
        identity.family_name.as_deref(),
    )?;
    let access = resolve_access(&conn, &session.email)?;
    let is_admin = check_admin_access(&conn, &session.email)?.is_granted();

    Ok(ApiResponse::ok(MeResponse {
        user,
        is_admin,
        has_access: access.has_access(),
        access_via: match access {
            Access::ViaPrimary { primary_email, .. } => Some(primary_email),
            _ => None,
        },
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub has_access: bool,
    pub is_sub_user: bool,
    pub subscription: Option<Subscription>,
}

/// GET /api/subscription/status
pub async fn subscription_status(
    State(state): State<AppState>,
    session: SessionUser,
) -> AppResult<Json<ApiResponse<SubscriptionStatus>>> {
    let conn = state.db()?;
    let access = resolve_access(&conn, &session.email)?;

    let status = match access {
        Access::Own(subscription) => SubscriptionStatus {
            has_access: true,
            is_sub_user: false,
            subscription: Some(subscription),
        },
        Access::ViaPrimary { subscription, .. } => SubscriptionStatus {
            has_access: true,
            is_sub_user: true,
            subscription: Some(subscription),
        },
        // lapsed or canceled subscriptions are still reported
        Access::None => SubscriptionStatus {
            has_access: false,
            is_sub_user: false,
            subscription: latest_subscription(&conn, &session.email)?,
        },
    };
    Ok(ApiResponse::ok(status))
}

/// GET /api/subscription/sub-users
pub async fn list_sub_users(
    State(state): State<AppState>,
    session: SessionUser,
) -> AppResult<Json<ApiResponse<Vec<User>>>> {
    let conn = state.db()?;
    let users = accounts::list_sub_users(&conn, &session.email)?;
    Ok(ApiResponse::ok(users))
}

#[derive(Debug, Deserialize)]
pub struct SubUserRequest {
    pub email: String,
}

/// POST /api/subscription/sub-users
pub async fn add_sub_user(
    State(state): State<AppState>,
    session: SessionUser,
    Json(request): Json<SubUserRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let email = request.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(AppError::bad_request("A valid email is required"));
    }

    let conn = state.db()?;
    match accounts::add_sub_user(&conn, &session.email, &email, state.config.max_sub_users)? {
        SubUserOutcome::Added(user) => {
            info!(primary = %session.email, sub_user = %email, "sub-user added");
            record_event(
                &conn,
                "sub_user_added",
                "user",
                &session.email,
                serde_json::json!({ "sub_user": email }),
                &session.email,
            );
            Ok(ApiResponse::ok(user))
        }
        SubUserOutcome::NotSubscribed => Err(AppError::forbidden("An active subscription is required")),
        SubUserOutcome::LimitReached(max) => {
            Err(AppError::bad_request(format!("Sub-user limit of {max} reached")))
        }
        SubUserOutcome::AlreadyLinked => {
            Err(AppError::bad_request("That email already belongs to another subscription"))
        }
        SubUserOutcome::SelfReference => Err(AppError::bad_request("You cannot add yourself")),
    }
}

/// DELETE /api/subscription/sub-users/:email
pub async fn remove_sub_user(
    State(state): State<AppState>,
    session: SessionUser,
    Path(email): Path<String>,
) -> AppResult<Json<ApiResponse<bool>>> {
    let conn = state.db()?;
    if !accounts::remove_sub_user(&conn, &session.email, &email)? {
        return Err(AppError::not_found("Sub-user not found"));
    }
    record_event(
        &conn,
        "sub_user_removed",
        "user",
        &session.email,
        serde_json::json!({ "sub_user": email }),
        &session.email,
    );
    Ok(ApiResponse::ok(true))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

/// POST /api/stripe/create-checkout-session
pub async fn create_checkout_session(
    State(state): State<AppState>,
    session: SessionUser,
) -> AppResult<Json<ApiResponse<CheckoutResponse>>> {
    let customer_id = {
        let conn = state.db()?;
        find_user(&conn, &session.email)?.and_then(|u| u.stripe_customer_id)
    };

    let base = state.config.app_base_url.trim_end_matches('/');
    let request = CheckoutRequest {
        customer_email: session.email.clone(),
        customer_id,
        price_id: state.config.stripe_price_id.clone(),
        success_url: format!("{base}/subscribe/success?session_id={{CHECKOUT_SESSION_ID}}"),
        cancel_url: format!("{base}/subscribe"),
    };

    let checkout = state
        .payments
        .create_checkout_session(&request)
        .await
        .map_err(|e| AppError::upstream("stripe", e.to_string()))?;

    Ok(ApiResponse::ok(CheckoutResponse {
        session_id: checkout.id,
        url: checkout.url,
    }))
}

/// POST /api/stripe/webhook - raw body, verified against Stripe-Signature
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::bad_request("Missing Stripe-Signature header"))?;

    match verify_stripe_signature(
        &body,
        signature,
        &state.config.stripe_webhook_secret,
        Utc::now().timestamp(),
    ) {
        Ok(()) => {}
        Err(SignatureError::NoSecret) => {
            error!("STRIPE_WEBHOOK_SECRET is not set; refusing webhook");
            return Err(AppError::Internal("webhook secret not configured".to_string()));
        }
        Err(e) => {
            warn!(error = %e, "rejected stripe webhook");
            return Err(AppError::bad_request(e.to_string()));
        }
    }

    let event: Value = serde_json::from_slice(&body)?;
    let conn = state.db()?;
    apply_stripe_event(&conn, &event)?;

    Ok(Json(serde_json::json!({ "received": true })))
}

/// GET /api/email-preferences
pub async fn get_email_preferences(
    State(state): State<AppState>,
    session: SessionUser,
) -> AppResult<Json<ApiResponse<EmailPreferences>>> {
    let conn = state.db()?;
    Ok(ApiResponse::ok(get_preferences(&conn, &session.email)?))
}

/// PUT /api/email-preferences
pub async fn update_email_preferences(
    State(state): State<AppState>,
    session: SessionUser,
    Json(changes): Json<PreferenceChanges>,
) -> AppResult<Json<ApiResponse<EmailPreferences>>> {
    let conn = state.db()?;
    let prefs = update_preferences(&conn, &session.email, &changes)?;
    Ok(ApiResponse::ok(prefs))
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeQuery {
    pub email: String,
    pub token: String,
}

/// GET /api/email/unsubscribe?email=&token= - link target in marketing mail
pub async fn unsubscribe(
    State(state): State<AppState>,
    Query(query): Query<UnsubscribeQuery>,
) -> AppResult<Html<String>> {
    if !verify_unsubscribe_token(&state.config.unsubscribe_secret, &query.email, &query.token) {
        return Err(AppError::bad_request("Invalid unsubscribe link"));
    }

    let conn = state.db()?;
    unsubscribe_marketing(&conn, &query.email)?;
    record_event(
        &conn,
        "marketing_unsubscribed",
        "user",
        &query.email,
        serde_json::json!({}),
        &query.email,
    );
    info!(email = %query.email, "unsubscribed from marketing email");

    Ok(Html(
        "<html><body><h1>You have been unsubscribed</h1>\
         <p>You will no longer receive marketing emails.</p></body></html>"
            .to_string(),
    ))
}
