use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Audit trail entry for admin actions (uploads, bill edits, email blasts)
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Current time in the format every timestamp column uses.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery; in-memory databases silently keep "memory"
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Accounts
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS admin_users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT UNIQUE NOT NULL COLLATE NOCASE,
            name TEXT,
            role TEXT NOT NULL DEFAULT 'admin',
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT UNIQUE NOT NULL COLLATE NOCASE,
            first_name TEXT,
            last_name TEXT,
            stripe_customer_id TEXT,
            primary_user_email TEXT COLLATE NOCASE,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS subscriptions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stripe_subscription_id TEXT UNIQUE NOT NULL,
            user_email TEXT NOT NULL COLLATE NOCASE,
            status TEXT NOT NULL,
            plan TEXT,
            price_id TEXT,
            current_period_end TEXT,
            cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stripe_payment_id TEXT UNIQUE NOT NULL,
            user_email TEXT NOT NULL COLLATE NOCASE,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS email_preferences (
            email TEXT PRIMARY KEY COLLATE NOCASE,
            marketing INTEGER NOT NULL DEFAULT 1,
            rate_alerts INTEGER NOT NULL DEFAULT 1,
            legislative_updates INTEGER NOT NULL DEFAULT 1,
            updated_at TEXT NOT NULL
        );",
    )?;

    // ==========================================================================
    // Rate-change content
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS bills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT UNIQUE NOT NULL,
            state TEXT,
            bill_number TEXT,
            name TEXT,
            last_action TEXT,
            action_date TEXT,
            sponsor_list TEXT,
            bill_progress TEXT,
            ai_summary TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS provider_alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            state TEXT NOT NULL,
            subject TEXT NOT NULL,
            announcement_date TEXT NOT NULL,
            link TEXT,
            service_lines_impacted TEXT,
            summary TEXT,
            is_new INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(state, subject, announcement_date)
        );",
    )?;

    // ==========================================================================
    // Community
    // ==========================================================================
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS community_posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            author_email TEXT NOT NULL COLLATE NOCASE,
            author_name TEXT,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'general',
            score INTEGER NOT NULL DEFAULT 0,
            is_pinned INTEGER NOT NULL DEFAULT 0,
            is_trending INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS community_comments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id INTEGER NOT NULL REFERENCES community_posts(id) ON DELETE CASCADE,
            parent_id INTEGER REFERENCES community_comments(id) ON DELETE CASCADE,
            author_email TEXT NOT NULL COLLATE NOCASE,
            author_name TEXT,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS community_votes (
            post_id INTEGER NOT NULL REFERENCES community_posts(id) ON DELETE CASCADE,
            user_email TEXT NOT NULL COLLATE NOCASE,
            value INTEGER NOT NULL,
            PRIMARY KEY (post_id, user_email)
        );

        CREATE TABLE IF NOT EXISTS community_bookmarks (
            post_id INTEGER NOT NULL REFERENCES community_posts(id) ON DELETE CASCADE,
            user_email TEXT NOT NULL COLLATE NOCASE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (post_id, user_email)
        );",
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_bills_state ON bills(state);
        CREATE INDEX IF NOT EXISTS idx_alerts_state ON provider_alerts(state);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_email ON subscriptions(user_email);
        CREATE INDEX IF NOT EXISTS idx_users_primary ON users(primary_user_email);
        CREATE INDEX IF NOT EXISTS idx_comments_post ON community_comments(post_id);
        CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);",
    )?;

    Ok(())
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Record an admin action. Audit failures are logged, never surfaced.
pub fn record_event(
    conn: &Connection,
    event_type: &str,
    entity_type: &str,
    entity_id: &str,
    data: serde_json::Value,
    actor: &str,
) {
    let event = Event::new(event_type, entity_type, entity_id, data, actor);
    if let Err(e) = insert_event(conn, &event) {
        tracing::warn!(error = %e, event_type, "failed to record audit event");
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let timestamp_str: String = row.get(1)?;
    let data_json: String = row.get(5)?;

    Ok(Event {
        event_id: row.get(0)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
            })?
            .with_timezone(&Utc),
        event_type: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        data: serde_json::from_str(&data_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        actor: row.get(6)?,
    })
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Most recent events of one entity type, newest first
pub fn get_recent_events(conn: &Connection, entity_type: &str, limit: usize) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;

    let events = stmt
        .query_map(params![entity_type, limit as i64], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn table_count(conn: &Connection, table: &str) -> Result<i64> {
    // Table names come from code, never from requests
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        assert_eq!(table_count(&conn, "bills").unwrap(), 0);
        assert_eq!(table_count(&conn, "community_posts").unwrap(), 0);
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let event = Event::new(
            "bill_updated",
            "bill",
            "https://legiscan.com/TX/bill/HB1",
            serde_json::json!({"fields": ["action_date"]}),
            "admin@example.com",
        );

        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "bill", "https://legiscan.com/TX/bill/HB1").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "bill_updated");
        assert_eq!(events[0].actor, "admin@example.com");
        assert_eq!(events[0].data["fields"][0], "action_date");
    }

    #[test]
    fn test_recent_events_limit() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        for i in 0..5 {
            record_event(&conn, "upload", "upload", &format!("u{i}"), serde_json::json!({}), "a@b.c");
        }

        let events = get_recent_events(&conn, "upload", 3).unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].entity_id, "u4");
    }
}
