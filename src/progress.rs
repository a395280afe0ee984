// Upload progress tracking
//
// In-memory, per process. Finished entries stay readable for a grace period
// so a polling dashboard sees the final state, then they are purged.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Processing,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UploadStatus::Processing)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub upload_id: String,
    pub status: UploadStatus,
    /// 0..=100
    pub percent: u8,
    pub message: String,
    pub inserted_count: usize,
    pub updated_count: usize,
}

struct Entry {
    progress: UploadProgress,
    finished_at: Option<Instant>,
}

pub struct ProgressTracker {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl ProgressTracker {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn with_entries<R>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> R) -> R {
        // A poisoned map only ever holds progress snapshots; keep using it.
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.finished_at.map_or(true, |at| at.elapsed() < ttl));
        f(&mut entries)
    }

    pub fn start(&self, upload_id: &str, message: impl Into<String>) {
        let progress = UploadProgress {
            upload_id: upload_id.to_string(),
            status: UploadStatus::Processing,
            percent: 0,
            message: message.into(),
            inserted_count: 0,
            updated_count: 0,
        };
        self.with_entries(|entries| {
            entries.insert(upload_id.to_string(), Entry { progress, finished_at: None });
        });
    }

    /// No-op for unknown or already finished uploads.
    pub fn update(&self, upload_id: &str, percent: u8, message: impl Into<String>) {
        let message = message.into();
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(upload_id) {
                if !entry.progress.status.is_terminal() {
                    entry.progress.percent = percent.min(100);
                    entry.progress.message = message;
                }
            }
        });
    }

    pub fn complete(&self, upload_id: &str, inserted: usize, updated: usize, message: impl Into<String>) {
        let message = message.into();
        self.finish(upload_id, UploadStatus::Completed, message, |progress| {
            progress.percent = 100;
            progress.inserted_count = inserted;
            progress.updated_count = updated;
        });
    }

    pub fn fail(&self, upload_id: &str, message: impl Into<String>) {
        self.finish(upload_id, UploadStatus::Error, message.into(), |_| {});
    }

    fn finish(
        &self,
        upload_id: &str,
        status: UploadStatus,
        message: String,
        apply: impl FnOnce(&mut UploadProgress),
    ) {
        self.with_entries(|entries| {
            let entry = entries.entry(upload_id.to_string()).or_insert_with(|| Entry {
                progress: UploadProgress {
                    upload_id: upload_id.to_string(),
                    status,
                    percent: 0,
                    message: String::new(),
                    inserted_count: 0,
                    updated_count: 0,
                },
                finished_at: None,
            });
            entry.progress.status = status;
            entry.progress.message = message;
            apply(&mut entry.progress);
            entry.finished_at = Some(Instant::now());
        });
    }

    /// None when the id was never seen or its entry expired.
    pub fn get(&self, upload_id: &str) -> Option<UploadProgress> {
        self.with_entries(|entries| entries.get(upload_id).map(|entry| entry.progress.clone()))
    }

    pub fn len(&self) -> usize {
        self.with_entries(|entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
