use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use payflow_backend::api::{self, AppState};
use payflow_backend::config::Config;
use payflow_backend::database::{self, PgPaymentStore, PoolConfig};
use payflow_backend::payments::{InMemoryStore, PaymentProcessor, PaymentStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::from_env()?;

    tracing::info!("Starting payflow backend");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("Payment backends: {}", config.backends.join(", "));

    let registry = Arc::new(config.build_registry()?);

    let store: Arc<dyn PaymentStore> = match &config.database.url {
        Some(url) => {
            let pool_config = PoolConfig {
                max_connections: config.database.max_connections,
                ..PoolConfig::default()
            };
            let pool = database::init_pool(url, Some(pool_config))
                .await
                .context("Failed to connect to the database")?;
            database::health_check(&pool).await?;
            let stats = database::get_pool_stats(&pool);
            tracing::info!("Database ready: {} connections, {} idle", stats.size, stats.num_idle);
            Arc::new(PgPaymentStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, payments are kept in memory");
            Arc::new(InMemoryStore::new())
        }
    };

    let processor = Arc::new(PaymentProcessor::new(
        registry,
        store,
        config.server.public_url.clone(),
    ));
    let app = api::router(AppState::new(processor, config.server.environment.clone()));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("HOST and PORT must form a valid socket address")?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
