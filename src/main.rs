use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedmark::config::Config;
use feedmark::db::Database;
use feedmark::ingest::{start_background_refresh, Ingestor};
use feedmark::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "feedmark=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load("feedmark.toml")?;
    info!("Loaded {} feeds from configuration", config.feeds.len());

    // Initialize database
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "sqlite:feedmark.db?mode=rwc".to_string());
    let db = Database::new(&database_url).await?;
    db.initialize().await?;
    db.register_feeds(&config.feeds).await?;
    info!("Database initialized");

    let db = Arc::new(db);

    // Create ingestor
    let ingestor = Arc::new(Ingestor::new(db.clone()));

    // Start background refresh task
    let bg_ingestor = ingestor.clone();
    let refresh_interval = config.refresh_interval;
    tokio::spawn(async move {
        start_background_refresh(bg_ingestor, refresh_interval).await;
    });

    // Create app state and router
    let state = Arc::new(AppState {
        db: db.clone(),
        ingestor: ingestor.clone(),
    });
    let app = routes::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!("Server starting on http://{}", config.listen_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
