// Email preferences - per-address opt-outs, everything on by default

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::now_timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailPreferences {
    pub email: String,
    pub marketing: bool,
    pub rate_alerts: bool,
    pub legislative_updates: bool,
}

impl EmailPreferences {
    pub fn defaults_for(email: &str) -> Self {
        Self {
            email: email.trim().to_string(),
            marketing: true,
            rate_alerts: true,
            legislative_updates: true,
        }
    }
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceChanges {
    pub marketing: Option<bool>,
    pub rate_alerts: Option<bool>,
    pub legislative_updates: Option<bool>,
}

pub fn get_preferences(conn: &Connection, email: &str) -> Result<EmailPreferences> {
    let stored = conn
        .query_row(
            "SELECT email, marketing, rate_alerts, legislative_updates
             FROM email_preferences WHERE email = ?1",
            [email.trim()],
            |row| {
                Ok(EmailPreferences {
                    email: row.get(0)?,
                    marketing: row.get(1)?,
                    rate_alerts: row.get(2)?,
                    legislative_updates: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(stored.unwrap_or_else(|| EmailPreferences::defaults_for(email)))
}

pub fn update_preferences(
    conn: &Connection,
    email: &str,
    changes: &PreferenceChanges,
) -> Result<EmailPreferences> {
    let current = get_preferences(conn, email)?;
    let next = EmailPreferences {
        email: current.email,
        marketing: changes.marketing.unwrap_or(current.marketing),
        rate_alerts: changes.rate_alerts.unwrap_or(current.rate_alerts),
        legislative_updates: changes.legislative_updates.unwrap_or(current.legislative_updates),
    };

    conn.execute(
        "INSERT INTO email_preferences (email, marketing, rate_alerts, legislative_updates, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(email) DO UPDATE SET
            marketing = excluded.marketing,
            rate_alerts = excluded.rate_alerts,
            legislative_updates = excluded.legislative_updates,
            updated_at = excluded.updated_at",
        params![next.email, next.marketing, next.rate_alerts, next.legislative_updates, now_timestamp()],
    )?;
    Ok(next)
}

pub fn unsubscribe_marketing(conn: &Connection, email: &str) -> Result<EmailPreferences> {
    update_preferences(
        conn,
        email,
        &PreferenceChanges { marketing: Some(false), ..Default::default() },
    )
}
