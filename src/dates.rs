// Date normalization for admin edits and spreadsheet uploads
//
// Spreadsheets hand us dates either as serial day counts (44197) or as
// free text ("March 15, 2024", "3/15/24"). Everything accepted is emitted
// as an RFC 3339 UTC timestamp; anything implausible is left untouched.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// Smallest day count treated as a spreadsheet serial (1954-10-03).
pub const SERIAL_MIN: i64 = 20_000;
/// Largest day count treated as a spreadsheet serial (2146-05-31).
pub const SERIAL_MAX: i64 = 90_000;
/// Accepted dates must fall within this many days of "now".
pub const PLAUSIBLE_WINDOW_DAYS: i64 = 730;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    // two-digit years first; "%Y" would read "24" as year 24
    "%m/%d/%y",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%Y/%m/%d",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%m/%d/%Y %H:%M"];

/// Spreadsheet epoch: day 0 is 1899-12-30 (accounts for the 1900 leap-year bug).
fn spreadsheet_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1899, 12, 30, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn is_plausible(date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let window = Duration::days(PLAUSIBLE_WINDOW_DAYS);
    let offset = date - now;
    -window <= offset && offset <= window
}

fn to_iso(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Convert a spreadsheet serial day count into a UTC timestamp.
/// Fractional parts are the time of day.
pub fn serial_to_datetime(serial: f64) -> Option<DateTime<Utc>> {
    let whole = serial.trunc() as i64;
    if !(SERIAL_MIN..=SERIAL_MAX).contains(&whole) {
        return None;
    }
    let seconds = ((serial - serial.trunc()) * 86_400.0).round() as i64;
    Some(spreadsheet_epoch() + Duration::days(whole) + Duration::seconds(seconds))
}

/// Parse free-text dates in the formats seen in billtrack and alert sheets.
pub fn parse_date_text(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
        }
    }

    None
}

/// Numeric view of a value, if it is a number or a purely numeric string.
fn as_serial(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Normalize one date field.
///
/// 1. Serial numbers in `SERIAL_MIN..=SERIAL_MAX` that land within two years of `now`.
/// 2. Date strings that parse and land within two years of `now`.
/// 3. Otherwise the original value.
pub fn normalize_date_value(value: &Value, now: DateTime<Utc>) -> Value {
    if let Some(serial) = as_serial(value) {
        if let Some(date) = serial_to_datetime(serial) {
            if is_plausible(date, now) {
                return Value::String(to_iso(date));
            }
        }
    }

    if let Value::String(text) = value {
        if let Some(date) = parse_date_text(text) {
            if is_plausible(date, now) {
                return Value::String(to_iso(date));
            }
        }
    }

    value.clone()
}

/// Normalize the named fields of a JSON object in place.
pub fn normalize_date_fields(
    fields: &mut serde_json::Map<String, Value>,
    names: &[&str],
    now: DateTime<Utc>,
) {
    for name in names {
        if let Some(value) = fields.get_mut(*name) {
            if value.is_null() {
                continue;
            }
            *value = normalize_date_value(value, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_window_edges_are_exact() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let window = Duration::days(PLAUSIBLE_WINDOW_DAYS);

        assert!(is_plausible(now + window, now));
        assert!(is_plausible(now - window, now));
        assert!(!is_plausible(now + window + Duration::hours(1), now));
        assert!(!is_plausible(now - window - Duration::seconds(1), now));
    }

    #[test]
    fn test_serial_maps_to_new_year_2021() {
        let now = at(2021, 3, 1);
        let normalized = normalize_date_value(&json!(44197), now);
        let text = normalized.as_str().expect("serial should become a string");
        let parsed = DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc);
        let target = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        assert!((parsed - target).num_hours().abs() <= 12, "got {text}");
    }

    #[test]
    fn test_serial_as_string_and_float() {
        let now = at(2021, 3, 1);
        assert_eq!(
            normalize_date_value(&json!("44197"), now),
            json!("2021-01-01T00:00:00Z")
        );
        assert_eq!(
            normalize_date_value(&json!(44197.5), now),
            json!("2021-01-01T12:00:00Z")
        );
    }

    #[test]
    fn test_iso_date_string() {
        let now = at(2024, 6, 1);
        assert_eq!(
            normalize_date_value(&json!("2024-03-15"), now),
            json!("2024-03-15T00:00:00Z")
        );
    }

    #[test]
    fn test_free_text_formats() {
        let now = at(2024, 6, 1);
        assert_eq!(
            normalize_date_value(&json!("March 15, 2024"), now),
            json!("2024-03-15T00:00:00Z")
        );
        assert_eq!(
            normalize_date_value(&json!("3/15/2024"), now),
            json!("2024-03-15T00:00:00Z")
        );
        assert_eq!(
            normalize_date_value(&json!("2024-03-15T09:30:00-05:00"), now),
            json!("2024-03-15T14:30:00Z")
        );
    }

    #[test]
    fn test_unparseable_is_unchanged() {
        let now = at(2024, 6, 1);
        assert_eq!(
            normalize_date_value(&json!("not a date"), now),
            json!("not a date")
        );
    }

    #[test]
    fn test_implausible_dates_are_unchanged() {
        let now = at(2024, 6, 1);
        // Valid serial, but 2021 is more than two years before mid-2024
        assert_eq!(normalize_date_value(&json!(44197), now), json!(44197));
        // Out of serial range entirely
        assert_eq!(normalize_date_value(&json!(12), now), json!(12));
        assert_eq!(
            normalize_date_value(&json!("1999-01-01"), now),
            json!("1999-01-01")
        );
    }

    #[test]
    fn test_normalize_fields_skips_nulls_and_other_keys() {
        let now = at(2024, 6, 1);
        let mut fields = json!({
            "action_date": "2024-03-15",
            "announcement_date": null,
            "name": "2024-03-15"
        });
        let map = fields.as_object_mut().unwrap();
        normalize_date_fields(map, &["action_date", "announcement_date"], now);

        assert_eq!(map["action_date"], json!("2024-03-15T00:00:00Z"));
        assert_eq!(map["announcement_date"], Value::Null);
        assert_eq!(map["name"], json!("2024-03-15"));
    }
}
