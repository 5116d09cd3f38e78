//! In-memory service wiring.

use common::clock::{Clock, ManualClock};
use common::types::RoomCode;
use room_service::broker::SignalingBroker;
use room_service::config::Config;
use room_service::history::{HistoryLog, MemoryHistoryLog};
use room_service::routes::AppState;
use room_service::services::{RoomLifecycle, SettingsEngine, WaitingRoomGate};
use room_service::store::{MemorySessionStore, SessionStore};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::test_client::TestClient;

/// Fixed start time for manual clocks (2025-03-01T00:00:00Z).
pub const TEST_EPOCH_MS: i64 = 1_740_787_200_000;

/// Config for tests: in-memory backends, cheapest bcrypt cost, no drain.
pub fn test_config() -> Config {
    test_config_with(&[])
}

/// Test config with overrides, given as environment variable pairs.
pub fn test_config_with(overrides: &[(&str, &str)]) -> Config {
    let mut vars = HashMap::from([
        ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ("BCRYPT_COST".to_string(), "4".to_string()),
        ("DRAIN_SECONDS".to_string(), "0".to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).expect("test config should be valid")
}

/// A room code for tests.
pub fn room(code: &str) -> RoomCode {
    RoomCode::parse(code).expect("test room code should be valid")
}

/// Fully wired service graph over in-memory backends.
pub struct TestEnv {
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemorySessionStore>,
    pub history: Arc<MemoryHistoryLog>,
    pub state: Arc<AppState>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let clock = Arc::new(ManualClock::new(TEST_EPOCH_MS));
        let store = Arc::new(MemorySessionStore::new(clock.clone() as Arc<dyn Clock>));
        let history = Arc::new(MemoryHistoryLog::new());
        let state = Arc::new(AppState::new(
            config,
            store.clone() as Arc<dyn SessionStore>,
            history.clone() as Arc<dyn HistoryLog>,
            clock.clone() as Arc<dyn Clock>,
        ));
        Self {
            clock,
            store,
            history,
            state,
        }
    }

    /// Wire the services over a caller-supplied clock, store and history
    /// log. The store should share `clock` so expiry follows it.
    pub fn with_backends(
        config: Config,
        clock: Arc<ManualClock>,
        store: Arc<dyn SessionStore>,
        history: Arc<dyn HistoryLog>,
    ) -> Arc<AppState> {
        Arc::new(AppState::new(
            config,
            store,
            history,
            clock as Arc<dyn Clock>,
        ))
    }

    pub fn broker(&self) -> &Arc<SignalingBroker> {
        &self.state.broker
    }

    pub fn lifecycle(&self) -> &Arc<RoomLifecycle> {
        &self.state.lifecycle
    }

    pub fn settings(&self) -> &Arc<SettingsEngine> {
        &self.state.settings
    }

    pub fn waiting(&self) -> &Arc<WaitingRoomGate> {
        &self.state.waiting
    }

    /// Open a scripted connection to the broker.
    pub fn client(&self) -> TestClient {
        TestClient::connect(Arc::clone(&self.state.broker))
    }

    /// Meeting-history records written so far.
    pub fn meetings(&self) -> Vec<room_service::history::MeetingHistoryRecord> {
        self.history.meetings().expect("history lock")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
