// Rate-change content - legislative bills and provider alerts
//
// Both tables are fed by admin spreadsheet uploads and edited one row at a
// time from the dashboard. Column sets are whitelisted here; request
// payloads never reach SQL as identifiers.

use anyhow::Result;
use rusqlite::{params, types::Value as SqlValue, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::now_timestamp;

// ============================================================================
// CONTENT KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Bills,
    ProviderAlerts,
}

const BILL_COLUMNS: &[&str] = &[
    "url",
    "state",
    "bill_number",
    "name",
    "last_action",
    "action_date",
    "sponsor_list",
    "bill_progress",
    "ai_summary",
];

const ALERT_COLUMNS: &[&str] = &[
    "state",
    "subject",
    "announcement_date",
    "link",
    "service_lines_impacted",
    "summary",
    "is_new",
];

impl ContentKind {
    /// Parse the `type` query parameter of the upload endpoint.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "billtrack" | "bills" => Some(ContentKind::Bills),
            "provider_alerts" | "provider-alerts" => Some(ContentKind::ProviderAlerts),
            _ => None,
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            ContentKind::Bills => "bills",
            ContentKind::ProviderAlerts => "provider_alerts",
        }
    }

    pub fn entity_type(&self) -> &'static str {
        match self {
            ContentKind::Bills => "bill",
            ContentKind::ProviderAlerts => "provider_alert",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            ContentKind::Bills => BILL_COLUMNS,
            ContentKind::ProviderAlerts => ALERT_COLUMNS,
        }
    }

    /// Columns that identify a row for upserts.
    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            ContentKind::Bills => &["url"],
            ContentKind::ProviderAlerts => &["state", "subject", "announcement_date"],
        }
    }

    pub fn date_columns(&self) -> &'static [&'static str] {
        match self {
            ContentKind::Bills => &["action_date"],
            ContentKind::ProviderAlerts => &["announcement_date"],
        }
    }

    /// Columns an edit may change but never clear.
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            ContentKind::Bills => &["url"],
            ContentKind::ProviderAlerts => &["state", "subject", "announcement_date", "is_new"],
        }
    }

    /// Reject fields that are not columns of this table, and blanks in
    /// required columns.
    pub fn check_fields(&self, fields: &Map<String, Value>) -> std::result::Result<(), String> {
        let unknown: Vec<&str> = fields
            .keys()
            .map(String::as_str)
            .filter(|k| !self.columns().contains(k))
            .collect();
        if !unknown.is_empty() {
            return Err(format!("Unknown fields for {}: {}", self.table(), unknown.join(", ")));
        }

        let cleared: Vec<&str> = self
            .required_columns()
            .iter()
            .copied()
            .filter(|column| match fields.get(*column) {
                Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                _ => false,
            })
            .collect();
        if cleared.is_empty() {
            Ok(())
        } else {
            Err(format!("Fields cannot be empty: {}", cleared.join(", ")))
        }
    }
}

/// JSON → SQLite value. Arrays and objects are stored as JSON text.
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Key cell as text; blank or missing keys yield None.
fn key_text(row: &Map<String, Value>, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    }
}

// ============================================================================
// ROWS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    pub id: i64,
    pub url: String,
    pub state: Option<String>,
    pub bill_number: Option<String>,
    pub name: Option<String>,
    pub last_action: Option<String>,
    pub action_date: Option<String>,
    pub sponsor_list: Option<String>,
    pub bill_progress: Option<String>,
    pub ai_summary: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAlert {
    pub id: i64,
    pub state: String,
    pub subject: String,
    pub announcement_date: String,
    pub link: Option<String>,
    pub service_lines_impacted: Option<String>,
    pub summary: Option<String>,
    pub is_new: bool,
    pub created_at: String,
    pub updated_at: String,
}

const BILL_SELECT: &str = "SELECT id, url, state, bill_number, name, last_action, action_date,
        sponsor_list, bill_progress, ai_summary, created_at, updated_at FROM bills";

const ALERT_SELECT: &str = "SELECT id, state, subject, announcement_date, link,
        service_lines_impacted, summary, is_new, created_at, updated_at FROM provider_alerts";

fn row_to_bill(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bill> {
    Ok(Bill {
        id: row.get(0)?,
        url: row.get(1)?,
        state: row.get(2)?,
        bill_number: row.get(3)?,
        name: row.get(4)?,
        last_action: row.get(5)?,
        action_date: row.get(6)?,
        sponsor_list: row.get(7)?,
        bill_progress: row.get(8)?,
        ai_summary: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn row_to_alert(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProviderAlert> {
    Ok(ProviderAlert {
        id: row.get(0)?,
        state: row.get(1)?,
        subject: row.get(2)?,
        announcement_date: row.get(3)?,
        link: row.get(4)?,
        service_lines_impacted: row.get(5)?,
        summary: row.get(6)?,
        is_new: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

// ============================================================================
// UPSERT
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Row lacks a key column; nothing written
    Skipped(String),
}

/// Insert or update one uploaded row. Unknown columns are ignored.
pub fn upsert_row(conn: &Connection, kind: ContentKind, row: &Map<String, Value>) -> Result<UpsertOutcome> {
    let mut keys = Vec::new();
    for column in kind.key_columns() {
        match key_text(row, column) {
            Some(value) => keys.push(value),
            None => return Ok(UpsertOutcome::Skipped(format!("missing {column}"))),
        }
    }

    let where_clause = kind
        .key_columns()
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{c} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");

    let existing: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE {where_clause}", kind.table()),
            rusqlite::params_from_iter(keys.iter()),
            |r| r.get(0),
        )
        .optional()?;

    let now = now_timestamp();

    // Key columns are written from their trimmed form
    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    for column in kind.columns() {
        if let Some(pos) = kind.key_columns().iter().position(|k| k == column) {
            columns.push(column);
            values.push(SqlValue::Text(keys[pos].clone()));
        } else if let Some(value) = row.get(*column) {
            columns.push(column);
            values.push(json_to_sql(value));
        }
    }

    match existing {
        Some(id) => {
            let assignments = columns
                .iter()
                .enumerate()
                .map(|(i, c)| format!("{c} = ?{}", i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            values.push(SqlValue::Text(now));
            values.push(SqlValue::Integer(id));
            let n = values.len();
            conn.execute(
                &format!(
                    "UPDATE {} SET {assignments}, updated_at = ?{} WHERE id = ?{n}",
                    kind.table(),
                    n - 1
                ),
                rusqlite::params_from_iter(values),
            )?;
            Ok(UpsertOutcome::Updated)
        }
        None => {
            columns.push("created_at");
            columns.push("updated_at");
            values.push(SqlValue::Text(now.clone()));
            values.push(SqlValue::Text(now));
            let placeholders = (1..=values.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ");
            conn.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES ({placeholders})",
                    kind.table(),
                    columns.join(", ")
                ),
                rusqlite::params_from_iter(values),
            )?;
            Ok(UpsertOutcome::Inserted)
        }
    }
}

/// Apply a partial update to one row. Callers validate with `check_fields` first.
fn update_by(
    conn: &Connection,
    table: &str,
    where_column: &str,
    where_value: SqlValue,
    fields: &Map<String, Value>,
) -> Result<usize> {
    let mut assignments = Vec::new();
    let mut values = Vec::new();
    for (i, (column, value)) in fields.iter().enumerate() {
        assignments.push(format!("{column} = ?{}", i + 1));
        values.push(json_to_sql(value));
    }
    values.push(SqlValue::Text(now_timestamp()));
    assignments.push(format!("updated_at = ?{}", values.len()));
    values.push(where_value);

    let changed = conn.execute(
        &format!(
            "UPDATE {table} SET {} WHERE {where_column} = ?{}",
            assignments.join(", "),
            values.len()
        ),
        rusqlite::params_from_iter(values),
    )?;
    Ok(changed)
}

// ============================================================================
// BILLS
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ContentFilter {
    pub state: Option<String>,
    pub search: Option<String>,
    pub limit: usize,
}

pub const DEFAULT_LIMIT: usize = 100;
pub const MAX_LIMIT: usize = 500;

impl ContentFilter {
    fn effective_limit(&self) -> i64 {
        match self.limit {
            0 => DEFAULT_LIMIT as i64,
            n => n.min(MAX_LIMIT) as i64,
        }
    }

    fn search_pattern(&self) -> Option<String> {
        self.search
            .as_ref()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"))
    }
}

pub fn find_bill_by_url(conn: &Connection, url: &str) -> Result<Option<Bill>> {
    let bill = conn
        .query_row(&format!("{BILL_SELECT} WHERE url = ?1"), [url], row_to_bill)
        .optional()?;
    Ok(bill)
}

/// Update the bill identified by `url`. Returns None when no such bill exists.
pub fn update_bill(conn: &Connection, url: &str, fields: &Map<String, Value>) -> Result<Option<Bill>> {
    if fields.is_empty() {
        return find_bill_by_url(conn, url);
    }
    let changed = update_by(conn, "bills", "url", SqlValue::Text(url.to_string()), fields)?;
    if changed == 0 {
        return Ok(None);
    }
    // url itself may have been edited
    let lookup = fields.get("url").and_then(Value::as_str).unwrap_or(url);
    find_bill_by_url(conn, lookup)
}

pub fn list_bills(conn: &Connection, filter: &ContentFilter) -> Result<Vec<Bill>> {
    let mut stmt = conn.prepare(&format!(
        "{BILL_SELECT}
         WHERE (?1 IS NULL OR state = ?1 COLLATE NOCASE)
           AND (?2 IS NULL OR name LIKE ?2 OR bill_number LIKE ?2 OR last_action LIKE ?2 OR ai_summary LIKE ?2)
         ORDER BY action_date DESC, id DESC
         LIMIT ?3"
    ))?;

    let bills = stmt
        .query_map(
            params![filter.state, filter.search_pattern(), filter.effective_limit()],
            row_to_bill,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(bills)
}

// ============================================================================
// PROVIDER ALERTS
// ============================================================================

pub fn find_alert(conn: &Connection, id: i64) -> Result<Option<ProviderAlert>> {
    let alert = conn
        .query_row(&format!("{ALERT_SELECT} WHERE id = ?1"), [id], row_to_alert)
        .optional()?;
    Ok(alert)
}

pub fn update_alert(conn: &Connection, id: i64, fields: &Map<String, Value>) -> Result<Option<ProviderAlert>> {
    if !fields.is_empty() {
        let changed = update_by(conn, "provider_alerts", "id", SqlValue::Integer(id), fields)?;
        if changed == 0 {
            return Ok(None);
        }
    }
    find_alert(conn, id)
}

pub fn list_alerts(conn: &Connection, filter: &ContentFilter) -> Result<Vec<ProviderAlert>> {
    let mut stmt = conn.prepare(&format!(
        "{ALERT_SELECT}
         WHERE (?1 IS NULL OR state = ?1 COLLATE NOCASE)
           AND (?2 IS NULL OR subject LIKE ?2 OR summary LIKE ?2 OR service_lines_impacted LIKE ?2)
         ORDER BY announcement_date DESC, id DESC
         LIMIT ?3"
    ))?;

    let alerts = stmt
        .query_map(
            params![filter.state, filter.search_pattern(), filter.effective_limit()],
            row_to_alert,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(alerts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use serde_json::json;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(ContentKind::parse("billtrack"), Some(ContentKind::Bills));
        assert_eq!(ContentKind::parse("PROVIDER_ALERTS"), Some(ContentKind::ProviderAlerts));
        assert_eq!(ContentKind::parse("users"), None);
    }

    #[test]
    fn test_upsert_bill_inserts_then_updates() {
        let conn = test_db();
        let row = obj(json!({
            "url": "https://legiscan.com/TX/bill/HB1",
            "state": "TX",
            "name": "Medicaid rates",
            "not_a_column": "ignored"
        }));

        assert_eq!(upsert_row(&conn, ContentKind::Bills, &row).unwrap(), UpsertOutcome::Inserted);

        let mut changed = row.clone();
        changed.insert("last_action".into(), json!("Passed House"));
        assert_eq!(upsert_row(&conn, ContentKind::Bills, &changed).unwrap(), UpsertOutcome::Updated);

        let bill = find_bill_by_url(&conn, "https://legiscan.com/TX/bill/HB1").unwrap().unwrap();
        assert_eq!(bill.last_action.as_deref(), Some("Passed House"));
        assert_eq!(bill.name.as_deref(), Some("Medicaid rates"));
    }

    #[test]
    fn test_upsert_skips_rows_without_key() {
        let conn = test_db();
        let row = obj(json!({"state": "TX", "subject": "Rate cut"}));
        let outcome = upsert_row(&conn, ContentKind::ProviderAlerts, &row).unwrap();
        assert_eq!(outcome, UpsertOutcome::Skipped("missing announcement_date".into()));
    }

    #[test]
    fn test_alert_composite_key() {
        let conn = test_db();
        let row = obj(json!({
            "state": "CA",
            "subject": "ABA rate update",
            "announcement_date": "2024-03-15T00:00:00Z",
            "is_new": true
        }));
        upsert_row(&conn, ContentKind::ProviderAlerts, &row).unwrap();

        let mut other_day = row.clone();
        other_day.insert("announcement_date".into(), json!("2024-04-01T00:00:00Z"));
        assert_eq!(
            upsert_row(&conn, ContentKind::ProviderAlerts, &other_day).unwrap(),
            UpsertOutcome::Inserted
        );

        let alerts = list_alerts(&conn, &ContentFilter { state: Some("ca".into()), ..Default::default() }).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].announcement_date, "2024-04-01T00:00:00Z");
        assert!(alerts[0].is_new);
    }

    #[test]
    fn test_update_bill_missing_returns_none() {
        let conn = test_db();
        let fields = obj(json!({"name": "x"}));
        assert!(update_bill(&conn, "https://nope", &fields).unwrap().is_none());
    }

    #[test]
    fn test_check_fields_rejects_unknown() {
        let fields = obj(json!({"name": "x", "drop_table": 1}));
        let err = ContentKind::Bills.check_fields(&fields).unwrap_err();
        assert!(err.contains("drop_table"));
        assert!(ContentKind::Bills.check_fields(&obj(json!({"ai_summary": "y"}))).is_ok());
    }

    #[test]
    fn test_check_fields_rejects_cleared_keys() {
        let alerts = ContentKind::ProviderAlerts;
        let err = alerts.check_fields(&obj(json!({"state": null, "subject": " "}))).unwrap_err();
        assert!(err.contains("state") && err.contains("subject"));
        assert!(alerts.check_fields(&obj(json!({"summary": null}))).is_ok());
        assert!(alerts.check_fields(&obj(json!({"state": "OK"}))).is_ok());
    }

    #[test]
    fn test_list_bills_search_and_limit() {
        let conn = test_db();
        for i in 0..3 {
            let row = obj(json!({
                "url": format!("https://legiscan.com/NY/bill/S{i}"),
                "state": "NY",
                "name": if i == 1 { "Home health wage floor" } else { "Other" },
                "action_date": format!("2024-0{}-01T00:00:00Z", i + 1)
            }));
            upsert_row(&conn, ContentKind::Bills, &row).unwrap();
        }

        let found = list_bills(&conn, &ContentFilter { search: Some("home health".into()), ..Default::default() }).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].url.ends_with("S1"));

        let limited = list_bills(&conn, &ContentFilter { limit: 2, ..Default::default() }).unwrap();
        assert_eq!(limited.len(), 2);
        assert!(limited[0].url.ends_with("S2"));
    }
}
