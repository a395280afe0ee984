// Rate Watch - Core Library
// Exposes all modules for use in the CLI, the API server, and tests

pub mod config;
pub mod db;
pub mod error;
pub mod logging;

pub mod dates;    // Spreadsheet serial + free-text date normalization
pub mod entities; // Table rows and their SQL
pub mod progress; // Upload progress table
pub mod upload;   // Bulk spreadsheet upserts
pub mod metrics;  // Gzipped static metric files

pub mod billing;   // Stripe webhook events
pub mod community; // Comment threading and feed ranking
pub mod marketing; // Marketing campaigns

pub mod gateways; // Identity, payments and email behind traits
pub mod http;     // axum router and handlers

// Re-export commonly used types
pub use config::{Config, LogSettings};
pub use db::{
    get_events_for_entity, get_recent_events, insert_event, now_timestamp, open_database,
    record_event, setup_database, Event,
};
pub use error::{AppError, AppResult};
pub use logging::init_logging;
pub use dates::{normalize_date_fields, normalize_date_value, parse_date_text, serial_to_datetime};
pub use progress::{ProgressTracker, UploadProgress, UploadStatus};
pub use upload::{parse_rows, upsert_rows, ParsedUpload, UploadSummary};
pub use metrics::{load_metric, MetricKind};
pub use billing::{apply_stripe_event, WebhookOutcome};
pub use community::{build_comment_tree, rank_posts, CommentNode, FeedSort};
pub use marketing::{plan_recipients, send_campaign, Audience, Campaign, CampaignReport};
pub use http::{build_router, ApiResponse, AppState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
