// Accounts - end users, Stripe subscriptions, payments and sub-users
//
// A user has access when they hold an active (or trialing) subscription,
// or when they are a sub-user of someone who does.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::now_timestamp;

/// Subscription statuses that grant access
pub const ACTIVE_STATUSES: &[&str] = &["active", "trialing"];

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub stripe_customer_id: Option<String>,
    /// Set when this account rides on someone else's subscription
    pub primary_user_email: Option<String>,
    pub created_at: String,
}

const USER_SELECT: &str = "SELECT id, email, first_name, last_name, stripe_customer_id,
        primary_user_email, created_at FROM users";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        stripe_customer_id: row.get(4)?,
        primary_user_email: row.get(5)?,
        created_at: row.get(6)?,
    })
}

pub fn find_user(conn: &Connection, email: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(&format!("{USER_SELECT} WHERE email = ?1"), [email.trim()], row_to_user)
        .optional()?;
    Ok(user)
}

pub fn find_user_by_customer(conn: &Connection, customer_id: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            &format!("{USER_SELECT} WHERE stripe_customer_id = ?1"),
            [customer_id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

/// Create the user row on first sight; names fill in when they were unknown.
pub fn ensure_user(
    conn: &Connection,
    email: &str,
    first_name: Option<&str>,
    last_name: Option<&str>,
) -> Result<User> {
    conn.execute(
        "INSERT INTO users (email, first_name, last_name, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(email) DO UPDATE SET
            first_name = COALESCE(users.first_name, excluded.first_name),
            last_name = COALESCE(users.last_name, excluded.last_name)",
        params![email.trim(), first_name, last_name, now_timestamp()],
    )?;
    find_user(conn, email)?.ok_or_else(|| anyhow::anyhow!("user {email} vanished after upsert"))
}

pub fn set_stripe_customer(conn: &Connection, email: &str, customer_id: &str) -> Result<User> {
    let user = ensure_user(conn, email, None, None)?;
    conn.execute(
        "UPDATE users SET stripe_customer_id = ?1 WHERE id = ?2",
        params![customer_id, user.id],
    )?;
    find_user(conn, email)?.ok_or_else(|| anyhow::anyhow!("user {email} vanished"))
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(flatten)]
    pub user: User,
    pub subscription_status: Option<String>,
    pub current_period_end: Option<String>,
}

/// All users with the status of their most recently updated subscription.
pub fn list_users(conn: &Connection) -> Result<Vec<UserSummary>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.email, u.first_name, u.last_name, u.stripe_customer_id,
                u.primary_user_email, u.created_at,
                (SELECT s.status FROM subscriptions s WHERE s.user_email = u.email
                 ORDER BY s.updated_at DESC LIMIT 1),
                (SELECT s.current_period_end FROM subscriptions s WHERE s.user_email = u.email
                 ORDER BY s.updated_at DESC LIMIT 1)
         FROM users u
         ORDER BY u.created_at DESC, u.id DESC",
    )?;

    let users = stmt
        .query_map([], |row| {
            Ok(UserSummary {
                user: row_to_user(row)?,
                subscription_status: row.get(7)?,
                current_period_end: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

// ============================================================================
// SUBSCRIPTIONS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: i64,
    pub stripe_subscription_id: String,
    pub user_email: String,
    pub status: String,
    pub plan: Option<String>,
    pub price_id: Option<String>,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
    pub updated_at: String,
}

impl Subscription {
    pub fn grants_access(&self) -> bool {
        ACTIVE_STATUSES.contains(&self.status.as_str())
    }
}

/// Fields synchronized from a Stripe subscription object
#[derive(Debug, Clone, Default)]
pub struct SubscriptionUpdate {
    pub stripe_subscription_id: String,
    pub user_email: String,
    pub status: String,
    pub plan: Option<String>,
    pub price_id: Option<String>,
    pub current_period_end: Option<String>,
    pub cancel_at_period_end: bool,
}

const SUBSCRIPTION_SELECT: &str = "SELECT id, stripe_subscription_id, user_email, status, plan,
        price_id, current_period_end, cancel_at_period_end, updated_at FROM subscriptions";

fn row_to_subscription(row: &rusqlite::Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        stripe_subscription_id: row.get(1)?,
        user_email: row.get(2)?,
        status: row.get(3)?,
        plan: row.get(4)?,
        price_id: row.get(5)?,
        current_period_end: row.get(6)?,
        cancel_at_period_end: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

pub fn upsert_subscription(conn: &Connection, update: &SubscriptionUpdate) -> Result<Subscription> {
    conn.execute(
        "INSERT INTO subscriptions (
            stripe_subscription_id, user_email, status, plan, price_id,
            current_period_end, cancel_at_period_end, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(stripe_subscription_id) DO UPDATE SET
            status = excluded.status,
            plan = COALESCE(excluded.plan, subscriptions.plan),
            price_id = COALESCE(excluded.price_id, subscriptions.price_id),
            current_period_end = COALESCE(excluded.current_period_end, subscriptions.current_period_end),
            cancel_at_period_end = excluded.cancel_at_period_end,
            updated_at = excluded.updated_at",
        params![
            update.stripe_subscription_id,
            update.user_email.trim(),
            update.status,
            update.plan,
            update.price_id,
            update.current_period_end,
            update.cancel_at_period_end,
            now_timestamp(),
        ],
    )?;

    let subscription = conn.query_row(
        &format!("{SUBSCRIPTION_SELECT} WHERE stripe_subscription_id = ?1"),
        [&update.stripe_subscription_id],
        row_to_subscription,
    )?;
    Ok(subscription)
}

/// Most recently updated subscription for the email, whatever its status.
pub fn latest_subscription(conn: &Connection, email: &str) -> Result<Option<Subscription>> {
    let subscription = conn
        .query_row(
            &format!("{SUBSCRIPTION_SELECT} WHERE user_email = ?1 ORDER BY updated_at DESC, id DESC LIMIT 1"),
            [email.trim()],
            row_to_subscription,
        )
        .optional()?;
    Ok(subscription)
}

pub fn active_subscription(conn: &Connection, email: &str) -> Result<Option<Subscription>> {
    let subscription = conn
        .query_row(
            &format!(
                "{SUBSCRIPTION_SELECT} WHERE user_email = ?1 AND status IN ('active', 'trialing')
                 ORDER BY updated_at DESC, id DESC LIMIT 1"
            ),
            [email.trim()],
            row_to_subscription,
        )
        .optional()?;
    Ok(subscription)
}

/// Where a user's access comes from
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    Own(Subscription),
    ViaPrimary {
        primary_email: String,
        subscription: Subscription,
    },
    None,
}

impl Access {
    pub fn has_access(&self) -> bool {
        !matches!(self, Access::None)
    }

    pub fn subscription(&self) -> Option<&Subscription> {
        match self {
            Access::Own(s) | Access::ViaPrimary { subscription: s, .. } => Some(s),
            Access::None => None,
        }
    }
}

pub fn resolve_access(conn: &Connection, email: &str) -> Result<Access> {
    if let Some(subscription) = active_subscription(conn, email)? {
        return Ok(Access::Own(subscription));
    }

    let primary = find_user(conn, email)?.and_then(|u| u.primary_user_email);
    if let Some(primary_email) = primary {
        if let Some(subscription) = active_subscription(conn, &primary_email)? {
            return Ok(Access::ViaPrimary {
                primary_email,
                subscription,
            });
        }
    }

    Ok(Access::None)
}

// ============================================================================
// PAYMENTS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub stripe_payment_id: String,
    pub user_email: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub created_at: String,
}

/// Record a payment, or move a known one to its latest outcome.
///
/// Returns false when nothing changed: a re-delivered outcome, or a stale
/// failure arriving after the payment already succeeded.
pub fn record_payment(conn: &Connection, payment: &Payment) -> Result<bool> {
    let changed = conn.execute(
        "INSERT INTO payments (stripe_payment_id, user_email, amount_cents, currency, status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(stripe_payment_id) DO UPDATE SET
            status = excluded.status,
            amount_cents = excluded.amount_cents,
            created_at = excluded.created_at
         WHERE payments.status <> excluded.status AND payments.status <> 'succeeded'",
        params![
            payment.stripe_payment_id,
            payment.user_email,
            payment.amount_cents,
            payment.currency,
            payment.status,
            payment.created_at,
        ],
    )?;
    Ok(changed > 0)
}

pub fn payments_for(conn: &Connection, email: &str) -> Result<Vec<Payment>> {
    let mut stmt = conn.prepare(
        "SELECT stripe_payment_id, user_email, amount_cents, currency, status, created_at
         FROM payments WHERE user_email = ?1 ORDER BY created_at DESC",
    )?;
    let payments = stmt
        .query_map([email.trim()], |row| {
            Ok(Payment {
                stripe_payment_id: row.get(0)?,
                user_email: row.get(1)?,
                amount_cents: row.get(2)?,
                currency: row.get(3)?,
                status: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(payments)
}

// ============================================================================
// SUB-USERS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SubUserOutcome {
    Added(User),
    NotSubscribed,
    LimitReached(usize),
    /// Email already belongs to another subscription holder's team
    AlreadyLinked,
    SelfReference,
}

pub fn list_sub_users(conn: &Connection, primary_email: &str) -> Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "{USER_SELECT} WHERE primary_user_email = ?1 ORDER BY created_at, id"
    ))?;
    let users = stmt
        .query_map([primary_email.trim()], row_to_user)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn add_sub_user(
    conn: &Connection,
    primary_email: &str,
    sub_email: &str,
    max_sub_users: usize,
) -> Result<SubUserOutcome> {
    let primary_email = primary_email.trim();
    let sub_email = sub_email.trim();

    if primary_email.eq_ignore_ascii_case(sub_email) {
        return Ok(SubUserOutcome::SelfReference);
    }
    if active_subscription(conn, primary_email)?.is_none() {
        return Ok(SubUserOutcome::NotSubscribed);
    }

    if let Some(existing) = find_user(conn, sub_email)? {
        match existing.primary_user_email.as_deref() {
            Some(p) if p.eq_ignore_ascii_case(primary_email) => {
                return Ok(SubUserOutcome::Added(existing));
            }
            Some(_) => return Ok(SubUserOutcome::AlreadyLinked),
            None => {}
        }
    }

    let current = list_sub_users(conn, primary_email)?.len();
    if current >= max_sub_users {
        return Ok(SubUserOutcome::LimitReached(max_sub_users));
    }

    let user = ensure_user(conn, sub_email, None, None)?;
    conn.execute(
        "UPDATE users SET primary_user_email = ?1 WHERE id = ?2",
        params![primary_email, user.id],
    )?;

    let user = find_user(conn, sub_email)?.ok_or_else(|| anyhow::anyhow!("sub-user {sub_email} vanished"))?;
    Ok(SubUserOutcome::Added(user))
}

/// Detach a sub-user. Returns false when the email was not on this team.
pub fn remove_sub_user(conn: &Connection, primary_email: &str, sub_email: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE users SET primary_user_email = NULL
         WHERE email = ?1 AND primary_user_email = ?2",
        params![sub_email.trim(), primary_email.trim()],
    )?;
    Ok(changed > 0)
}
