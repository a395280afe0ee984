// Entity Models - one module per table family
//
// Each module owns its row structs and the SQL that reads and writes them.
// Functions take a plain &Connection so the CLI, the server and the tests
// share the same code.

pub mod accounts;
pub mod admin;
pub mod community;
pub mod content;
pub mod email_prefs;

pub use accounts::{Access, Payment, SubUserOutcome, Subscription, SubscriptionUpdate, User, UserSummary};
pub use admin::{AdminAccess, AdminUser};
pub use community::{Comment, NewPost, Post, PostChanges};
pub use content::{Bill, ContentFilter, ContentKind, ProviderAlert, UpsertOutcome};
pub use email_prefs::{EmailPreferences, PreferenceChanges};
