mod auth;
mod config;
mod delivery;
mod queue;
mod routes;
mod state;
mod status;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use config::{generate_config_template, Config};
use delivery::{DeliveryStats, Router};
use queue::{MemoryQueueStore, QueueStore, QueueTtls, RedisQueueStore};
use ws::registry::ConnectionRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "haven_notify=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "haven_notify=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Haven notify v{} starting", env!("CARGO_PKG_VERSION"));

    // Key shared with the auth service; this server only validates tokens
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let queue_settings = config.queue.clone().unwrap_or_default();
    let ttls = QueueTtls {
        critical: Duration::from_secs(queue_settings.critical_ttl_secs),
        normal: Duration::from_secs(queue_settings.normal_ttl_secs),
    };

    // Offline queue store: Redis when configured, in-memory otherwise.
    // A Redis that is down at boot degrades to in-memory rather than
    // refusing to start — the queue is best-effort by contract.
    let queue_store: Arc<dyn QueueStore> = match &config.redis_url {
        Some(url) => match RedisQueueStore::connect(url, ttls).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Redis unavailable, falling back to in-memory queue store"
                );
                Arc::new(MemoryQueueStore::new(ttls))
            }
        },
        None => {
            tracing::info!("No Redis URL configured, using in-memory queue store");
            Arc::new(MemoryQueueStore::new(ttls))
        }
    };

    // Background TTL expiry sweep, independent of flush calls
    queue::spawn_expiry_sweep(
        queue_store.clone(),
        Duration::from_secs(queue_settings.sweep_interval_secs),
    );

    // Build application state: one construction point, injected everywhere
    let registry = Arc::new(ConnectionRegistry::new());
    let stats = Arc::new(DeliveryStats::default());
    let router = Arc::new(Router::new(
        registry.clone(),
        queue_store.clone(),
        stats.clone(),
    ));

    let app_state = state::AppState {
        registry: registry.clone(),
        queue: queue_store,
        router,
        stats,
        jwt_secret,
        ws: config.ws.clone().unwrap_or_default(),
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received, closing live connections");
        registry.close_all(1001, "Server shutting down");
    })
    .await?;

    Ok(())
}
