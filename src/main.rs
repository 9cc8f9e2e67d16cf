//! ProdReady Audit - production readiness auditing service
//!
//! A Rust backend that drives an authenticated browser through bounded,
//! non-destructive audits of live web applications.

mod api;
mod audit;
mod browser;
mod config;
mod evidence;
mod pdf;
mod sanitize;
mod security;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use api::{create_router, AppState};
use axum::http::{header, Method};
use config::Settings;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Arc::new(Settings::from_env());

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "prodready_audit={},tower_http=info",
                    settings.log_level
                ))
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    tracing::info!(
        name = %settings.app_name,
        version = %settings.app_version,
        "Starting service"
    );

    std::fs::create_dir_all(&settings.artifacts_dir)?;

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    // Composition root: every process-wide service is constructed here and
    // handed down; teardown reverses this order below.
    let state = AppState::new(settings.clone());

    if let Err(e) = state.browser.initialize().await {
        tracing::warn!(error = %e, "Browser initialization deferred (will retry on first use)");
    }

    state.sessions.start_cleanup_loop(SESSION_CLEANUP_INTERVAL);

    let origins: Vec<_> = settings
        .cors_origins_list()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    // Credentialed CORS forbids wildcards, so methods are listed and request
    // headers mirrored. Content-Disposition is exposed so a cross-origin
    // frontend can read the PDF/evidence download filenames.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .expose_headers([header::CONTENT_DISPOSITION]);

    let app = create_router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutting down...");
    state.sessions.stop_cleanup_loop();
    state.browser.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("Failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
}
