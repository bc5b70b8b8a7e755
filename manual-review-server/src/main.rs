use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};

use manual_review_server::config::Config;
use manual_review_server::jobs::job_loop;
use manual_review_server::review::{Manager, SqliteRepository};
use manual_review_server::routes::app_router;
use manual_review_server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!(
        "Starting manual review service {}",
        manual_review_server::get_service_version()
    );

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    if config.admin_auth_token.is_none() {
        info!("ADMIN_AUTH_TOKEN not set; the admin API is disabled");
    }

    let db_path = config.state_dir.join("manual-review.db");
    info!("Using state database: {}", db_path.display());
    let repo = SqliteRepository::new(&db_path).context("Failed to initialize SQLite database")?;

    let manager = Arc::new(Manager::new(Arc::new(repo), config.assignment));

    let app_state = Arc::new(AppState {
        manager: manager.clone(),
        admin_auth_token: config.admin_auth_token,
        review_window: config.review_window,
    });

    match config.job_interval {
        Some(period) => {
            info!("Running background jobs every {:?}", period);
            let review_window = config.review_window;
            tokio::spawn(async move {
                job_loop(manager, period, review_window).await;
            });
        }
        None => info!("Background jobs disabled"),
    }

    let app = app_router(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
