//! Room Service
//!
//! Signaling and room-session coordination for Huddle video calls.
//!
//! # Configuration
//!
//! See `config.rs`. Without `REDIS_URL` and `DATABASE_URL` the service runs
//! self-contained with in-memory backends.

use common::clock::{Clock, SystemClock};
use room_service::config::Config;
use room_service::observability::metrics::init_metrics_recorder;
use room_service::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    room_service::init_tracing(config.log_format);

    info!(
        bind_address = %config.bind_address,
        room_ttl_secs = config.room_ttl.as_secs(),
        stale_room_secs = config.stale_room_after.as_secs(),
        default_max_participants = config.default_max_participants,
        "Starting Room Service"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        anyhow::anyhow!(e)
    })?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = room_service::connect_session_store(&config, Arc::clone(&clock))
        .await
        .map_err(|e| {
            error!("Failed to connect session store: {}", e);
            e
        })?;
    let history = room_service::connect_history_log(&config)
        .await
        .map_err(|e| {
            error!("Failed to connect history log: {}", e);
            e
        })?;

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let drain = Duration::from_secs(config.drain_seconds);

    let state = Arc::new(AppState::new(config, store, history, clock));
    let broker = Arc::clone(&state.broker);
    let app = routes::build_routes(state, metrics_handle);

    info!("Room Service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        broker.shutdown();
        if drain.is_zero() {
            info!("Skipping drain period (DRAIN_SECONDS=0)");
        } else {
            warn!("Draining connections for {} seconds...", drain.as_secs());
            tokio::time::sleep(drain).await;
            info!("Drain period complete");
        }
    })
    .await?;

    info!("Room Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
