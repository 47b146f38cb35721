use std::{net::SocketAddr, sync::Arc, time::Duration};

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use codedrop::{
    code::CodeGenerator,
    config::Config,
    database::init_db,
    rate_limit::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore},
    routes::create_router,
    service::{TransferService, TransferSettings},
    state::AppState,
    storage::init_storage,
    store::{MemoryTransferStore, PgTransferStore, TransferStore},
    sweeper,
};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // .env is read before the subscriber so RUST_LOG from it applies
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn TransferStore> = match &config.database_url {
        Some(url) => Arc::new(PgTransferStore::new(
            init_db(url, config.database_max_connections).await?,
        )),
        None => {
            warn!("DATABASE_URL not set; transfers are kept in memory and lost on restart");
            Arc::new(MemoryTransferStore::new())
        }
    };

    let counters: Arc<dyn CounterStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisCounterStore::new(url)?),
        None => {
            warn!("REDIS_URL not set; rate limit counters are local to this process");
            Arc::new(MemoryCounterStore::new())
        }
    };

    let storage = init_storage(&config).await?;

    let service = TransferService::new(
        store,
        storage,
        CodeGenerator::default(),
        TransferSettings {
            ttl: chrono::Duration::seconds(config.transfer_ttl_secs),
            max_downloads: config.max_downloads,
            max_file_size: config.max_file_size,
        },
    );

    let limiter = RateLimiter::new(
        counters,
        config.rate_limit_max,
        Duration::from_secs(config.rate_limit_window_secs),
    );

    if config.sweep_interval_secs > 0 {
        sweeper::spawn(
            service.clone(),
            Duration::from_secs(config.sweep_interval_secs),
            chrono::Duration::seconds(config.sweep_grace_secs),
        );
    }

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("Server listening on {}", listener.local_addr()?);

    let app = create_router(AppState {
        service,
        limiter,
        config,
    });

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
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
                warn!("Failed to listen for SIGTERM: {}", e);
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

    info!("Shutting down server...");
}
