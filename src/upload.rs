// Bulk upload - spreadsheet rows into the bills / provider_alerts tables
//
// Rows arrive as JSON (an array, or {rows, uploadId}) or as CSV text.
// Each row is normalized, then upserted by the table's natural key.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use csv::ReaderBuilder;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Mutex;
use std::thread;
use tracing::{info, warn};

use crate::dates::normalize_date_fields;
use crate::entities::content::{upsert_row, ContentKind, UpsertOutcome};
use crate::progress::ProgressTracker;

/// Columns stored as 0/1 flags
const FLAG_COLUMNS: &[&str] = &["is_new"];

#[derive(Debug, Clone, Default)]
pub struct ParsedUpload {
    pub upload_id: Option<String>,
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub inserted_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    pub logs: Vec<String>,
}

/// "Bill Number" / "bill-number" / "billNumber" → "bill_number"
pub fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len() + 4);
    let mut after_lower = false;
    for c in header.trim().trim_start_matches('\u{feff}').chars() {
        if c == ' ' || c == '-' || c == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            after_lower = false;
        } else if c.is_uppercase() {
            if after_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            after_lower = false;
        } else {
            out.push(c);
            after_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Keys of a JSON object in column form.
pub fn normalize_keys(row: Map<String, Value>) -> Map<String, Value> {
    row.into_iter().map(|(k, v)| (normalize_header(&k), v)).collect()
}

fn parse_csv(text: &str) -> Result<Vec<Map<String, Value>>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for (line_num, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV line {}", line_num + 2))?;

        let mut row = Map::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            if header.is_empty() {
                continue;
            }
            let value = if cell.is_empty() { Value::Null } else { Value::String(cell.to_string()) };
            row.insert(header.clone(), value);
        }

        // blank spreadsheet lines
        if row.values().all(Value::is_null) {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

fn rows_from_json(values: Vec<Value>) -> Result<Vec<Map<String, Value>>> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| match value {
            Value::Object(row) => Ok(normalize_keys(row)),
            other => anyhow::bail!("Row {} is not an object: {other}", i + 1),
        })
        .collect()
}

/// Parse an upload body. JSON is tried first when the content type says so
/// or the body looks like JSON; anything else is read as CSV.
pub fn parse_rows(body: &str, content_type: Option<&str>) -> Result<ParsedUpload> {
    let trimmed = body.trim_start();
    let looks_json = content_type.is_some_and(|ct| ct.contains("json"))
        || trimmed.starts_with('[')
        || trimmed.starts_with('{');

    if !looks_json {
        return Ok(ParsedUpload {
            upload_id: None,
            rows: parse_csv(body)?,
        });
    }

    let value: Value = serde_json::from_str(body).context("Invalid JSON upload body")?;
    match value {
        Value::Array(values) => Ok(ParsedUpload {
            upload_id: None,
            rows: rows_from_json(values)?,
        }),
        Value::Object(mut object) => {
            let upload_id = object
                .remove("uploadId")
                .and_then(|v| v.as_str().map(str::to_string));
            let rows = match object.remove("rows").or_else(|| object.remove("data")) {
                Some(Value::Array(values)) => rows_from_json(values)?,
                _ => anyhow::bail!("Expected a \"rows\" array"),
            };
            Ok(ParsedUpload { upload_id, rows })
        }
        _ => anyhow::bail!("Expected a JSON array or object"),
    }
}

fn coerce_flag(value: &Value) -> Value {
    match value {
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Value::Bool(true),
            "false" | "no" | "n" | "0" | "" => Value::Bool(false),
            _ => value.clone(),
        },
        Value::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        other => other.clone(),
    }
}

/// Dates and flags into their stored shape
pub fn prepare_row(kind: ContentKind, mut row: Map<String, Value>, now: DateTime<Utc>) -> Map<String, Value> {
    normalize_date_fields(&mut row, kind.date_columns(), now);
    for column in FLAG_COLUMNS {
        if let Some(value) = row.get_mut(*column) {
            *value = coerce_flag(value);
        }
    }
    row
}

/// Upsert every row, reporting progress when an upload id is given.
///
/// Rows without their key columns are skipped and logged; a database error
/// aborts the upload and marks it failed.
pub fn upsert_rows(
    conn: &Connection,
    kind: ContentKind,
    rows: Vec<Map<String, Value>>,
    progress: Option<(&ProgressTracker, &str)>,
) -> Result<UploadSummary> {
    let chunk_rows = rows.len().max(1);
    upsert_in_chunks(kind, rows, progress, chunk_rows, |write| write(conn))
}

/// `upsert_rows` against the server's shared connection. The lock is held
/// for one chunk at a time so progress polls and other requests get in
/// between chunks.
pub fn upsert_rows_shared(
    db: &Mutex<Connection>,
    kind: ContentKind,
    rows: Vec<Map<String, Value>>,
    progress: Option<(&ProgressTracker, &str)>,
    chunk_rows: usize,
) -> Result<UploadSummary> {
    upsert_in_chunks(kind, rows, progress, chunk_rows.max(1), |write| {
        let result = {
            let conn = db.lock().map_err(|_| anyhow!("database mutex poisoned"))?;
            write(&*conn)
        };
        thread::yield_now();
        result
    })
}

type ChunkWriter<'a> = dyn FnMut(&Connection) -> Result<()> + 'a;

fn upsert_in_chunks(
    kind: ContentKind,
    rows: Vec<Map<String, Value>>,
    progress: Option<(&ProgressTracker, &str)>,
    chunk_rows: usize,
    mut with_conn: impl FnMut(&mut ChunkWriter<'_>) -> Result<()>,
) -> Result<UploadSummary> {
    let now = Utc::now();
    let total = rows.len();
    let mut summary = UploadSummary::default();

    if let Some((tracker, id)) = progress {
        tracker.start(id, format!("Processing {total} {} rows", kind.table()));
    }

    let mut rows = rows.into_iter().enumerate().peekable();
    while rows.peek().is_some() {
        // normalize outside the lock
        let chunk: Vec<(usize, Map<String, Value>)> = rows
            .by_ref()
            .take(chunk_rows)
            .map(|(i, row)| (i, prepare_row(kind, row, now)))
            .collect();

        let written = with_conn(&mut |conn: &Connection| -> Result<()> {
            for (i, row) in &chunk {
                let outcome = upsert_row(conn, kind, row)
                    .with_context(|| format!("Failed to upsert row {}", i + 1))?;
                match outcome {
                    UpsertOutcome::Inserted => summary.inserted_count += 1,
                    UpsertOutcome::Updated => summary.updated_count += 1,
                    UpsertOutcome::Skipped(reason) => {
                        summary.skipped_count += 1;
                        warn!(table = kind.table(), row = i + 1, %reason, "skipping upload row");
                        summary.logs.push(format!("Row {}: skipped ({reason})", i + 1));
                    }
                }
            }
            Ok(())
        });

        if let Err(e) = written {
            if let Some((tracker, id)) = progress {
                tracker.fail(id, format!("{e:#}"));
            }
            return Err(e);
        }

        if let Some((tracker, id)) = progress {
            let done = chunk.last().map_or(0, |(i, _)| i + 1);
            let percent = (done * 100 / total.max(1)) as u8;
            tracker.update(id, percent, format!("Processed {done} of {total}"));
        }
    }

    summary.logs.push(format!(
        "{}: {} inserted, {} updated, {} skipped",
        kind.table(),
        summary.inserted_count,
        summary.updated_count,
        summary.skipped_count
    ));
    info!(
        table = kind.table(),
        inserted = summary.inserted_count,
        updated = summary.updated_count,
        skipped = summary.skipped_count,
        "upload applied"
    );

    if let Some((tracker, id)) = progress {
        tracker.complete(
            id,
            summary.inserted_count,
            summary.updated_count,
            format!("Completed: {} rows", total),
        );
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::content::{find_bill_by_url, list_alerts, ContentFilter};
    use crate::progress::UploadStatus;
    use std::time::Duration;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_headers_normalized() {
        assert_eq!(normalize_header(" Bill Number "), "bill_number");
        assert_eq!(normalize_header("Service-Lines Impacted"), "service_lines_impacted");
        assert_eq!(normalize_header("\u{feff}URL"), "url");
        assert_eq!(normalize_header("announcementDate"), "announcement_date");
        assert_eq!(normalize_header("isNew"), "is_new");
        assert_eq!(normalize_header("ai_summary"), "ai_summary");
    }

    #[test]
    fn test_parse_csv_body() {
        let body = "URL,State,Bill Number,Action Date\n\
                    https://a.example/1,TX,HB 1,03/15/2024\n\
                    ,,,\n\
                    https://a.example/2,CA,SB 2,\n";
        let parsed = parse_rows(body, Some("text/csv")).unwrap();

        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0]["bill_number"], "HB 1");
        assert_eq!(parsed.rows[1]["action_date"], Value::Null);
    }

    #[test]
    fn test_parse_json_bodies() {
        let parsed = parse_rows(r#"[{"URL": "u1", "Bill Number": "HB 1"}]"#, None).unwrap();
        assert_eq!(parsed.rows[0]["url"], "u1");
        assert!(parsed.upload_id.is_none());

        let parsed = parse_rows(r#"{"uploadId": "up-1", "rows": [{"url": "u2"}]}"#, None).unwrap();
        assert_eq!(parsed.upload_id.as_deref(), Some("up-1"));
        assert_eq!(parsed.rows.len(), 1);

        assert!(parse_rows(r#"{"nothing": 1}"#, None).is_err());
        assert!(parse_rows("[1, 2]", None).is_err());
    }

    #[test]
    fn test_upsert_counts_and_progress() {
        let conn = test_db();
        let tracker = ProgressTracker::new(Duration::from_secs(300));
        let today = Utc::now().format("%Y-%m-%d").to_string();

        let first = parse_rows(
            &format!("url,state,action_date\nhttps://a/1,TX,{today}\nhttps://a/2,CA,\n,NY,\n"),
            None,
        )
        .unwrap();
        let summary = upsert_rows(&conn, ContentKind::Bills, first.rows, Some((&tracker, "up-1"))).unwrap();
        assert_eq!(summary.inserted_count, 2);
        assert_eq!(summary.updated_count, 0);
        assert_eq!(summary.skipped_count, 1);
        assert!(summary.logs.iter().any(|l| l.contains("missing url")));

        let progress = tracker.get("up-1").unwrap();
        assert_eq!(progress.status, UploadStatus::Completed);
        assert_eq!(progress.inserted_count, 2);

        let second = parse_rows("url,state\nhttps://a/1,OK\n", None).unwrap();
        let summary = upsert_rows(&conn, ContentKind::Bills, second.rows, None).unwrap();
        assert_eq!(summary.updated_count, 1);

        let bill = find_bill_by_url(&conn, "https://a/1").unwrap().unwrap();
        assert_eq!(bill.state.as_deref(), Some("OK"));
        assert_eq!(bill.action_date, Some(format!("{today}T00:00:00Z")));
    }

    #[test]
    fn test_alert_dates_and_flags() {
        let conn = test_db();
        let now = Utc::now();
        let iso = now.format("%Y-%m-%d").to_string();
        let us = now.format("%m/%d/%Y").to_string();
        let rows = rows_from_json(vec![
            serde_json::json!({"State": "TX", "Subject": "Dental", "Announcement Date": iso, "is_new": "yes"}),
            serde_json::json!({"state": "TX", "subject": "Dental", "announcement_date": us, "summary": "dup"}),
        ])
        .unwrap();

        let summary = upsert_rows(&conn, ContentKind::ProviderAlerts, rows, None).unwrap();
        // same key once both dates are normalized
        assert_eq!(summary.inserted_count, 1);
        assert_eq!(summary.updated_count, 1);

        let alerts = list_alerts(&conn, &ContentFilter::default()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].is_new);
        assert_eq!(alerts[0].summary.as_deref(), Some("dup"));
        assert_eq!(alerts[0].announcement_date, format!("{iso}T00:00:00Z"));
    }
}
