use crate::config::Config;
use crate::jobs;
use crate::state::AppState;
use crate::web::routes::create_router;
use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Arc<Config>,
    app_state: AppState,
}

impl App {
    /// Create a new App instance with all necessary components initialized
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let config = Arc::new(config);

        // Create database connection pool
        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect(&config.database_url)
            .await
            .context("Failed to create database pool")?;

        info!(
            min_connections = 0,
            max_connections = 8,
            acquire_timeout = "4s",
            idle_timeout = "2m",
            max_lifetime = "30m",
            "database pool established"
        );

        // Run database migrations
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        let app_state = AppState::new(db_pool, config.clone());

        Ok(App { config, app_state })
    }

    /// Run the web server and background jobs until a shutdown signal.
    pub async fn run(self) -> ExitCode {
        let cancel = CancellationToken::new();
        let jobs_handle = jobs::spawn_expiry_sync(self.app_state.clone(), cancel.clone());

        let router = create_router(self.app_state.clone());
        let addr = format!("0.0.0.0:{}", self.config.port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %addr, error = ?e, "Failed to bind listener");
                return ExitCode::FAILURE;
            }
        };
        info!(addr = %addr, "Web server listening");

        let shutdown_cancel = cancel.clone();
        let serve_result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                shutdown_cancel.cancel();
            })
            .await;

        if let Err(e) = serve_result {
            error!(error = ?e, "Web server exited with error");
            return ExitCode::FAILURE;
        }

        // Give background jobs a bounded window to wind down.
        cancel.cancel();
        let timeout = Duration::from_secs(self.config.shutdown_timeout);
        if tokio::time::timeout(timeout, jobs_handle).await.is_err() {
            warn!(timeout = ?timeout, "Background jobs did not stop in time; abandoning");
        }

        info!("Shutdown complete");
        ExitCode::SUCCESS
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
