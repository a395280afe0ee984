// Request identity - bearer sessions, admin and subscriber gates
//
// Extractors reject with AppError, so a handler that names `AdminSession`
// never runs for anyone but an active admin.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};

use super::AppState;
use crate::entities::accounts::{resolve_access, Access};
use crate::entities::admin::{check_admin_access, AdminAccess, AdminUser};
use crate::error::AppError;
use crate::gateways::Identity;

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// A signed-in user, verified with the identity provider.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub email: String,
    pub identity: Identity,
}

impl SessionUser {
    pub fn display_name(&self) -> Option<String> {
        self.identity.display_name()
    }

    pub fn is(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AppError::Unauthenticated)?;

        let identity = state
            .identity
            .resolve(token)
            .await
            .map_err(|e| AppError::upstream("identity", e.to_string()))?
            .ok_or(AppError::Unauthenticated)?;

        debug!(email = %identity.email, "session resolved");
        Ok(SessionUser {
            email: identity.email.clone(),
            identity,
        })
    }
}

/// Active admin. Absent or deactivated rows get 403.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub user: SessionUser,
    pub admin: AdminUser,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = SessionUser::from_request_parts(parts, state).await?;

        let access = {
            let conn = state.db()?;
            check_admin_access(&conn, &user.email)?
        };

        match access {
            AdminAccess::Granted(admin) => Ok(AdminSession { user, admin }),
            AdminAccess::Inactive(_) => {
                warn!(email = %user.email, "inactive admin denied");
                Err(AppError::forbidden("Admin access is inactive"))
            }
            AdminAccess::Unknown => {
                warn!(email = %user.email, "non-admin denied");
                Err(AppError::forbidden("Admin access required"))
            }
        }
    }
}

/// Signed-in user whose own or primary holder's subscription is active.
#[derive(Debug, Clone)]
pub struct SubscriberSession {
    pub user: SessionUser,
    pub access: Access,
}

#[async_trait]
impl FromRequestParts<AppState> for SubscriberSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = SessionUser::from_request_parts(parts, state).await?;

        let access = {
            let conn = state.db()?;
            resolve_access(&conn, &user.email)?
        };

        if !access.has_access() {
            return Err(AppError::forbidden("An active subscription is required"));
        }
        Ok(SubscriberSession { user, access })
    }
}

/// The acting user owns the row, or is an active admin.
pub fn can_moderate(
    conn: &rusqlite::Connection,
    user: &SessionUser,
    owner_email: &str,
) -> Result<bool, AppError> {
    if user.is(owner_email) {
        return Ok(true);
    }
    Ok(check_admin_access(conn, &user.email)?.is_granted())
}
