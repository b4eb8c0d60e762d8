//! Ratna API server.
//!
//! Serves the storefront and admin JSON API on `RATNA_HOST:RATNA_PORT`
//! (default 127.0.0.1:3000).
//!
//! Migrations are NOT run on startup. Run them with
//! `cargo run -p ratna-cli -- migrate`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::net::SocketAddr;

use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ratna_api::config::ApiConfig;
use ratna_api::db::{self, PgStore};
use ratna_api::state::AppState;

/// Sentry is only enabled when a DSN is configured.
fn init_sentry(config: &ApiConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.sentry_environment.clone().into()),
            attach_stacktrace: true,
            // Customer emails stay out of Sentry.
            send_default_pii: false,
            ..Default::default()
        },
    ));
    Some(guard)
}

/// Warnings and errors become Sentry events, info and debug become breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    use sentry_tracing::EventFilter;
    use tracing::Level;

    match *metadata.level() {
        Level::ERROR | Level::WARN => EventFilter::Event,
        Level::INFO | Level::DEBUG => EventFilter::Breadcrumb,
        Level::TRACE => EventFilter::Ignore,
    }
}

/// Text logs locally, flattened JSON when running on Fly.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "ratna_api=info,tower_http=debug".into());
    let on_fly = std::env::var_os("FLY_APP_NAME").is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(on_fly.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true)))
        .with((!on_fly).then(tracing_subscriber::fmt::layer))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ApiConfig::from_env()?;

    // The guard has to outlive the subscriber.
    let _sentry = init_sentry(&config);
    init_tracing();

    let pool = db::create_pool(&config.database_url).await?;
    let state = AppState::from_config(&config, PgStore::new(pool))?;

    let app = ratna_api::app(state)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "ratna api listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;

    tracing::info!("shutdown signal received, draining connections");
}
