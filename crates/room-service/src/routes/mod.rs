//! HTTP routes for the room service.
//!
//! Defines the Axum router and application state.

use crate::broker::{ws, SignalingBroker};
use crate::config::Config;
use crate::handlers;
use crate::history::HistoryLog;
use crate::middleware::http_metrics_middleware;
use crate::services::{RoomLifecycle, SettingsEngine, WaitingRoomGate};
use crate::store::{SessionStore, Ttls};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use common::clock::Clock;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout for plain HTTP routes. WebSocket connections are
/// long-lived and sit outside it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Session store, used directly by the readiness check.
    pub store: Arc<dyn SessionStore>,

    pub lifecycle: Arc<RoomLifecycle>,
    pub settings: Arc<SettingsEngine>,
    pub waiting: Arc<WaitingRoomGate>,

    /// Signaling broker behind `/ws`.
    pub broker: Arc<SignalingBroker>,
}

impl AppState {
    /// Wire the services over the given backends.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        history: Arc<dyn HistoryLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttls = Ttls {
            room: config.room_ttl,
            participant: config.participant_ttl,
        };
        let lifecycle = Arc::new(RoomLifecycle::new(
            Arc::clone(&store),
            history,
            Arc::clone(&clock),
            ttls,
            config.stale_room_after,
            config.default_max_participants,
        ));
        let settings = Arc::new(SettingsEngine::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.room_ttl,
            config.bcrypt_cost,
            config.default_max_participants,
        ));
        let waiting = Arc::new(WaitingRoomGate::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.participant_ttl,
        ));
        let broker = Arc::new(SignalingBroker::new(
            Arc::clone(&lifecycle),
            Arc::clone(&waiting),
            Arc::clone(&settings),
            clock,
            // Several refreshes fit in one participant TTL
            config.participant_ttl / 4,
        ));

        Self {
            config,
            store,
            lifecycle,
            settings,
            waiting,
            broker,
        }
    }
}

/// Build the application routes.
///
/// - `/health` - Liveness check
/// - `/ready` - Readiness check (pings the session store)
/// - `/metrics` - Prometheus metrics
/// - `/ws` - Signaling WebSocket
/// - `/rooms` and `/rooms/:id/*` - Room lifecycle and settings
/// - TraceLayer for request logging, 30 second timeout on HTTP routes,
///   HTTP metrics on everything
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/rooms", post(handlers::create_room))
        .route(
            "/rooms/:id/settings",
            get(handlers::get_room_settings).put(handlers::update_room_settings),
        )
        .route(
            "/rooms/:id/validate-password",
            post(handlers::validate_password),
        )
        .route("/rooms/:id/check-access", get(handlers::check_access))
        .route("/rooms/:id/host", get(handlers::get_host))
        .route("/rooms/:id/history", get(handlers::get_history))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(Arc::clone(&state));

    let ws_routes = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    api_routes
        .merge(ws_routes)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
