// Rate Watch - Web Server

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use rate_watch::gateways::{http_client, HttpEmailGateway, OidcUserInfo, StripeClient};
use rate_watch::{build_router, init_logging, open_database, AppState, Config, LogSettings};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LogSettings::from_env());
    let config = Config::load();

    let conn = open_database(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database opened");

    let client = http_client()?;
    let identity = Arc::new(OidcUserInfo::new(client.clone(), config.identity_userinfo_url.clone()));
    let payments = Arc::new(StripeClient::new(client.clone(), config.stripe_secret_key.clone()));
    let email = Arc::new(HttpEmailGateway::new(
        client,
        config.email_api_url.clone(),
        config.email_api_key.clone(),
        config.email_sender.clone(),
    ));

    let addr = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(conn, config, identity, payments, email);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!(%addr, "Server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
