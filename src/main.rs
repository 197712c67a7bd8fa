use std::sync::Arc;

use chat_hub::config::Config;
use chat_hub::db;
use chat_hub::hub::Hub;
use chat_hub::metrics::HubMetrics;
use chat_hub::routes::build_router;
use chat_hub::utils::auth::PgTokenValidator;
use chat_hub::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_hub=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = db::init_pool(&config.database_url)?;
    let applied = db::run_migrations(&pool)?;
    tracing::info!(applied, "migrations up to date");

    let registry = prometheus::Registry::new();
    let (hub, _hub_task) = Hub::spawn(HubMetrics::new(&registry)?);

    let state = AppState {
        db: pool.clone(),
        hub,
        validator: Arc::new(PgTokenValidator::new(pool)),
        session: config.session.clone(),
        metrics: registry,
    };
    let app = build_router(state, &config.cors_origins);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("install ctrl-c handler: {}", e);
        return;
    }
    tracing::info!("shutting down");
}
