//! Test server harness for end-to-end HTTP tests.
//!
//! Provides `TestRoomServer`, a real room service on a random local port
//! backed by in-memory stores.

use crate::fixtures::{test_config, TestEnv};
use room_service::observability::metrics::detached_handle;
use room_service::routes::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Running room service.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health() -> Result<(), anyhow::Error> {
///     let server = TestRoomServer::spawn().await?;
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestRoomServer {
    addr: SocketAddr,
    env: TestEnv,
    _handle: JoinHandle<()>,
}

impl TestRoomServer {
    /// Spawn with the default test config.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(TestEnv::with_config(test_config())).await
    }

    /// Spawn over an existing environment.
    pub async fn spawn_with(env: TestEnv) -> Result<Self, anyhow::Error> {
        let handle = detached_handle().map_err(|e| anyhow::anyhow!(e))?;
        let app = routes::build_routes(Arc::clone(&env.state), handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let server = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            env,
            _handle: server,
        })
    }

    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn env(&self) -> &TestEnv {
        &self.env
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.env.state
    }
}

impl Drop for TestRoomServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_and_answers_health() -> Result<(), anyhow::Error> {
        let server = TestRoomServer::spawn().await?;
        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.addr().port() > 0);

        let response = reqwest::get(format!("{}/health", server.url())).await?;
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await?, "OK");
        Ok(())
    }
}
