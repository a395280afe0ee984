// Static rate metrics - gzipped JSON files produced by the offline pipeline
//
// Each endpoint has a preferred file and a fallback. Files are read per
// request so a redeploy of the data directory needs no restart.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    StateMetrics,
    EnhancedMetrics,
    RecentRateChanges,
}

impl MetricKind {
    /// (preferred, fallback)
    pub fn files(&self) -> (&'static str, &'static str) {
        match self {
            MetricKind::StateMetrics => ("state_metrics.json.gz", "state_metrics_fallback.json.gz"),
            MetricKind::EnhancedMetrics => ("enhanced_metrics.json.gz", "state_metrics.json.gz"),
            MetricKind::RecentRateChanges => ("recent_rate_changes.json.gz", "rate_changes_fallback.json.gz"),
        }
    }
}

/// Read and gunzip one file. `Ok(None)` when it does not exist.
fn read_gz_json(path: &Path) -> Result<Option<Value>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("Failed to open {}", path.display())),
    };

    let mut text = String::new();
    GzDecoder::new(file)
        .read_to_string(&mut text)
        .with_context(|| format!("Failed to decompress {}", path.display()))?;

    let value = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse JSON in {}", path.display()))?;
    Ok(Some(value))
}

/// Load a metric file, falling back when the preferred file is absent.
///
/// `Ok(None)` when neither file exists. A corrupt preferred file is an
/// error; it does not silently fall through to stale fallback data.
pub fn load_metric(dir: &Path, kind: MetricKind) -> Result<Option<Value>> {
    let (preferred, fallback) = kind.files();

    if let Some(value) = read_gz_json(&dir.join(preferred))? {
        debug!(file = preferred, "serving metrics");
        return Ok(Some(value));
    }

    let value = read_gz_json(&dir.join(fallback))?;
    match &value {
        Some(_) => warn!(preferred, fallback, "preferred metrics file missing, serving fallback"),
        None => warn!(preferred, fallback, "no metrics file available"),
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{write::GzEncoder, Compression};
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_gz(dir: &Path, name: &str, body: &[u8]) {
        let mut encoder = GzEncoder::new(File::create(dir.join(name)).unwrap(), Compression::default());
        encoder.write_all(body).unwrap();
        encoder.finish().unwrap();
    }

    #[test]
    fn test_preferred_then_fallback() {
        let dir = TempDir::new().unwrap();
        write_gz(dir.path(), "state_metrics_fallback.json.gz", br#"{"source": "fallback"}"#);

        let value = load_metric(dir.path(), MetricKind::StateMetrics).unwrap().unwrap();
        assert_eq!(value, json!({"source": "fallback"}));

        write_gz(dir.path(), "state_metrics.json.gz", br#"{"source": "preferred"}"#);
        let value = load_metric(dir.path(), MetricKind::StateMetrics).unwrap().unwrap();
        assert_eq!(value["source"], "preferred");

        // enhanced falls back to the plain state metrics
        let value = load_metric(dir.path(), MetricKind::EnhancedMetrics).unwrap().unwrap();
        assert_eq!(value["source"], "preferred");
    }

    #[test]
    fn test_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        assert!(load_metric(dir.path(), MetricKind::RecentRateChanges).unwrap().is_none());

        std::fs::write(dir.path().join("recent_rate_changes.json.gz"), b"not gzip").unwrap();
        assert!(load_metric(dir.path(), MetricKind::RecentRateChanges).is_err());

        write_gz(dir.path(), "recent_rate_changes.json.gz", b"{ truncated");
        assert!(load_metric(dir.path(), MetricKind::RecentRateChanges).is_err());
    }
}
