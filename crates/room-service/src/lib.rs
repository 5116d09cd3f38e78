//! Huddle Room Service Library
//!
//! Signaling and room-session coordination for multi-party video calls.
//! Media flows peer-to-peer; this service only tracks who is in which room,
//! gates entry and relays negotiation messages.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs ──┐
//! broker/ws.rs  -> broker/mod.rs ──┴-> services/*.rs -> store/*.rs (ephemeral)
//!                                                     -> history/*.rs (durable)
//! ```
//!
//! # Modules
//!
//! - `broker` - Signaling broker, session registry, WebSocket transport
//! - `config` - Service configuration from environment
//! - `errors` - Error types with wire code and HTTP status mapping
//! - `handlers` - HTTP request handlers
//! - `history` - Durable room and meeting-history log
//! - `middleware` - HTTP metrics middleware
//! - `models` - Stored records and HTTP bodies
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router and application state
//! - `services` - Room lifecycle, waiting room, settings
//! - `store` - Session store trait with Redis and in-memory backends

pub mod broker;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod history;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
pub mod store;

use common::clock::Clock;
use common::secret::ExposeSecret;
use config::{Config, LogFormat};
use history::{HistoryLog, MemoryHistoryLog, PgHistoryLog};
use std::sync::Arc;
use store::{MemorySessionStore, RedisSessionStore, SessionStore};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "room_service=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Connect the session store named by the config, or fall back to memory.
///
/// # Errors
///
/// Returns the store error if a Redis URL is configured but unreachable.
pub async fn connect_session_store(
    config: &Config,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn SessionStore>, errors::StoreError> {
    match &config.redis_url {
        Some(url) => {
            info!("Connecting to Redis session store...");
            let store = RedisSessionStore::connect(url.expose_secret()).await?;
            info!("Redis session store connected");
            Ok(Arc::new(store))
        }
        None => {
            warn!("REDIS_URL not set, using in-memory session store (single instance only)");
            Ok(Arc::new(MemorySessionStore::new(clock)))
        }
    }
}

/// Connect the history log named by the config and run migrations, or fall
/// back to memory.
///
/// # Errors
///
/// Returns the history error if a database URL is configured but the
/// connection or migrations fail.
pub async fn connect_history_log(
    config: &Config,
) -> Result<Arc<dyn HistoryLog>, errors::HistoryError> {
    match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let log = PgHistoryLog::connect(url.expose_secret()).await?;
            log.migrate().await?;
            info!("Database connection established, migrations applied");
            Ok(Arc::new(log))
        }
        None => {
            warn!("DATABASE_URL not set, meeting history is kept in memory only");
            Ok(Arc::new(MemoryHistoryLog::new()))
        }
    }
}
