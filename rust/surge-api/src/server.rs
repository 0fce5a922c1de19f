//! HTTP server setup and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::database::{Database, ScheduleStore};
use crate::logging::OpTimer;
use crate::scheduler::{DatabaseScheduler, SurgeTaskDispatcher, TaskDispatcher};
use crate::sync::{HttpPageSource, PageSource, SurgeAlertSync};
use crate::{AppState, api, log_banner, log_init_step, log_init_warning};

/// Surge API version (from Cargo.toml).
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Open the store and build the shared sync pipeline.
pub async fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let timer = OpTimer::new("server", "build_state");

    let db = Database::open(&config.database.path).await?;
    log_init_step!(1, 3, "Database", format!("🗄️  {}", config.database.path.display()));

    let source: Arc<dyn PageSource> =
        Arc::new(HttpPageSource::new(config.ifrc.request_timeout())?);
    let sync = Arc::new(SurgeAlertSync::new(source, db.clone(), config.ifrc.api_url.clone()));
    log_init_step!(2, 3, "IFRC Client", format!("🌍 {}", config.ifrc.api_url));

    timer.finish();
    Ok(AppState {
        config: Arc::new(config),
        db,
        sync,
    })
}

/// Build the router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.timeout_secs);

    api::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the periodic scheduler over the state's store and sync.
pub fn build_scheduler(state: &AppState) -> DatabaseScheduler {
    let store: Arc<dyn ScheduleStore> = Arc::new(state.db.clone());
    let dispatcher: Arc<dyn TaskDispatcher> =
        Arc::new(SurgeTaskDispatcher::new(Arc::clone(&state.sync)));

    DatabaseScheduler::new(store, dispatcher)
        .with_sync_every(state.config.scheduler.sync_every())
        .with_max_interval(state.config.scheduler.max_interval())
}

/// Run the HTTP server, plus the scheduler when enabled, until a shutdown
/// signal arrives.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    log_banner!(
        format!("🚨 Surge API v{VERSION}"),
        format!("Source: {}", config.ifrc.api_url)
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_state(config).await?;
    let shutdown = CancellationToken::new();

    let scheduler_handle = if state.config.scheduler.enabled {
        let scheduler = build_scheduler(&state);
        log_init_step!(
            3,
            3,
            "Scheduler",
            format!(
                "⏱️  resync every {}s, max sleep {}s",
                state.config.scheduler.sync_every_secs, state.config.scheduler.max_interval_secs
            )
        );
        let token = shutdown.clone();
        Some(tokio::spawn(async move { scheduler.run(token).await }))
    } else {
        log_init_warning!("Scheduler disabled, schedules only run when triggered manually");
        None
    };

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = scheduler_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Scheduler task ended abnormally");
        }
    }

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
