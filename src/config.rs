// Configuration - environment variables with defaults

use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use tracing::{info, warn};

/// Runtime configuration for the server and the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: PathBuf,
    pub static_data_dir: PathBuf,

    // Identity provider
    pub identity_userinfo_url: String,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_price_id: String,

    // Transactional email
    pub email_api_url: String,
    pub email_api_key: String,
    pub email_sender: String,

    pub app_base_url: String,
    pub unsubscribe_secret: String,

    pub upload_progress_ttl: Duration,
    /// Rows written per database lock during an upload
    pub upload_chunk_rows: usize,
    pub max_sub_users: usize,

    pub logging: LogSettings,
}

/// Log level and format. Read before the subscriber exists, so reading them
/// logs nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl LogSettings {
    pub fn from_env() -> Self {
        Self {
            level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            json: var("LOG_FORMAT").is_some_and(|format| format.eq_ignore_ascii_case("json")),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("PORT", 3000),
            database_path: PathBuf::from(load_or("DATABASE_PATH", "rate_watch.db")),
            static_data_dir: PathBuf::from(load_or("STATIC_DATA_DIR", "data")),
            identity_userinfo_url: load_or("IDENTITY_USERINFO_URL", ""),
            stripe_secret_key: load_or("STRIPE_SECRET_KEY", ""),
            stripe_webhook_secret: load_or("STRIPE_WEBHOOK_SECRET", ""),
            stripe_price_id: load_or("STRIPE_PRICE_ID", ""),
            email_api_url: load_or("EMAIL_API_URL", "https://api.brevo.com/v3/smtp/email"),
            email_api_key: load_or("EMAIL_API_KEY", ""),
            email_sender: load_or("EMAIL_SENDER", "alerts@localhost"),
            app_base_url: load_or("APP_BASE_URL", "http://localhost:3000"),
            unsubscribe_secret: load_or("UNSUBSCRIBE_SECRET", ""),
            upload_progress_ttl: Duration::from_secs(try_load("UPLOAD_PROGRESS_TTL_SECS", 300)),
            upload_chunk_rows: try_load("UPLOAD_CHUNK_ROWS", 200),
            max_sub_users: try_load("MAX_SUB_USERS", 3),
            logging: LogSettings::from_env(),
        }
    }
}

impl Default for Config {
    /// Local-development defaults, no environment lookups.
    fn default() -> Self {
        Self {
            port: 3000,
            database_path: PathBuf::from("rate_watch.db"),
            static_data_dir: PathBuf::from("data"),
            identity_userinfo_url: String::new(),
            stripe_secret_key: String::new(),
            stripe_webhook_secret: String::new(),
            stripe_price_id: String::new(),
            email_api_url: "https://api.brevo.com/v3/smtp/email".to_string(),
            email_api_key: String::new(),
            email_sender: "alerts@localhost".to_string(),
            app_base_url: "http://localhost:3000".to_string(),
            unsubscribe_secret: String::new(),
            upload_progress_ttl: Duration::from_secs(300),
            upload_chunk_rows: 200,
            max_sub_users: 3,
            logging: LogSettings::default(),
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_or(key: &str, default: &str) -> String {
    var(key).unwrap_or_else(|| {
        if default.is_empty() {
            warn!("{key} not set");
        } else {
            info!("{key} not set, using default: {default}");
        }
        default.to_string()
    })
}

fn try_load<T: FromStr + Display>(key: &str, default: T) -> T
where
    T::Err: Display,
{
    match var(key) {
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(e) => {
                warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
                default
            }
        },
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn test_try_load_falls_back_on_garbage() {
        env::set_var("RATE_WATCH_TEST_PORT", "not-a-port");
        let port: u16 = try_load("RATE_WATCH_TEST_PORT", 3000);
        assert_eq!(port, 3000);
        env::remove_var("RATE_WATCH_TEST_PORT");
    }

    #[test]
    fn test_blank_values_use_default() {
        env::set_var("RATE_WATCH_TEST_BLANK", "   ");
        assert_eq!(load_or("RATE_WATCH_TEST_BLANK", "fallback"), "fallback");
        env::remove_var("RATE_WATCH_TEST_BLANK");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.upload_progress_ttl, Duration::from_secs(300));
        assert_eq!(config.max_sub_users, 3);
        assert!(!config.logging.json);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn captured_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
        let sink = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(sink.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        let text = String::from_utf8_lossy(&sink.0.lock().unwrap()).into_owned();
        (result, text)
    }

    #[test]
    fn test_log_settings_are_read_quietly() {
        let (settings, logs) = captured_logs(LogSettings::from_env);
        assert!(!settings.level.is_empty());
        assert!(logs.is_empty(), "{logs}");
    }

    #[test]
    fn test_missing_values_are_reported_once_logging_is_up() {
        let (_, logs) = captured_logs(|| load_or("RATE_WATCH_TEST_UNSET_SECRET", ""));
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("RATE_WATCH_TEST_UNSET_SECRET not set"), "{logs}");
    }
}
