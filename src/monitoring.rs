//! Monitoring endpoint run alongside the worker.
//!
//! The coordinator only needs `run` and `shutdown`; [`MonitoringServer`] is the
//! built-in implementation, a small HTTP server exposing a liveness check.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use axum_server::Handle;
use tokio::sync::watch;

use crate::config::MonitoringConfig;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Invalid monitoring address: {0}")]
    Address(String),

    #[error("Monitoring server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error("Monitoring server did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

#[async_trait]
pub trait Monitor: Send + Sync + 'static {
    /// Serve until shut down.
    async fn run(&self) -> Result<(), MonitorError>;

    /// Stop serving, waiting at most `deadline` for open connections.
    async fn shutdown(&self, deadline: Duration) -> Result<(), MonitorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeState {
    Idle,
    Serving,
    Stopped,
}

pub struct MonitoringServer {
    config: MonitoringConfig,
    host: String,
    handle: Handle,
    state: watch::Sender<ServeState>,
}

impl MonitoringServer {
    pub fn new(config: MonitoringConfig, host: impl Into<String>) -> Self {
        Self {
            config,
            host: host.into(),
            handle: Handle::new(),
            state: watch::channel(ServeState::Idle).0,
        }
    }

    /// Path of the liveness route under the configured prefix.
    pub fn health_path(&self) -> String {
        format!("{}/healthz", self.config.url_prefix.trim_end_matches('/'))
    }

    pub fn router(&self) -> Router {
        Router::new().route(&self.health_path(), get(health))
    }

    /// Bound address once serving, `None` if the server stopped without binding.
    pub async fn listening(&self) -> Option<SocketAddr> {
        self.handle.listening().await
    }
}

/// Liveness check: the process can still answer HTTP.
async fn health() -> &'static str {
    "ok"
}

#[async_trait]
impl Monitor for MonitoringServer {
    async fn run(&self) -> Result<(), MonitorError> {
        if !self.config.enabled {
            tracing::info!("Monitoring server disabled");
            self.state.send_replace(ServeState::Stopped);
            return Ok(());
        }

        let addr: SocketAddr = match format!("{}:{}", self.host, self.config.port).parse() {
            Ok(addr) => addr,
            Err(e) => {
                self.state.send_replace(ServeState::Stopped);
                return Err(MonitorError::Address(format!(
                    "{}:{}: {}",
                    self.host, self.config.port, e
                )));
            }
        };

        tracing::info!(%addr, health = %self.health_path(), "Starting monitoring server");
        self.state.send_replace(ServeState::Serving);

        let result = axum_server::bind(addr)
            .handle(self.handle.clone())
            .serve(self.router().into_make_service())
            .await;
        self.state.send_replace(ServeState::Stopped);
        result?;

        tracing::debug!("Monitoring server stopped");
        Ok(())
    }

    /// Resolves once `run` has returned, i.e. every connection is drained.
    async fn shutdown(&self, deadline: Duration) -> Result<(), MonitorError> {
        self.handle.graceful_shutdown(Some(deadline));

        let mut state = self.state.subscribe();
        if *state.borrow() == ServeState::Idle {
            return Ok(());
        }
        let result = match tokio::time::timeout(deadline, state.wait_for(|s| *s == ServeState::Stopped)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(MonitorError::ShutdownTimeout(deadline)),
        };
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;
    use tower::ServiceExt;

    fn config(enabled: bool, port: u16, url_prefix: &str) -> MonitoringConfig {
        MonitoringConfig {
            enabled,
            port,
            url_prefix: url_prefix.to_string(),
        }
    }

    #[test]
    fn test_health_path_respects_prefix() {
        let server = MonitoringServer::new(config(true, 0, ""), "127.0.0.1");
        assert_eq!(server.health_path(), "/healthz");

        let server = MonitoringServer::new(config(true, 0, "/worker/"), "127.0.0.1");
        assert_eq!(server.health_path(), "/worker/healthz");
    }

    #[tokio::test]
    async fn test_health_route_answers_ok() {
        let server = MonitoringServer::new(config(true, 0, "/worker"), "127.0.0.1");
        let request = Request::builder()
            .uri("/worker/healthz")
            .body(Body::empty())
            .unwrap();
        let response = server.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_disabled_monitoring_returns_immediately() {
        let server = MonitoringServer::new(config(false, 0, ""), "127.0.0.1");
        tokio::time::timeout(Duration::from_secs(1), server.run())
            .await
            .expect("returns at once")
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_after_shutdown() {
        let server = Arc::new(MonitoringServer::new(config(true, 0, ""), "127.0.0.1"));
        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        assert!(server.listening().await.is_some());
        server.shutdown(Duration::from_secs(1)).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("run returns after shutdown")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_open_connection() {
        let server = Arc::new(MonitoringServer::new(config(true, 0, ""), "127.0.0.1"));
        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });
        let addr = server.listening().await.expect("monitoring bound");

        // A half-sent request keeps the server draining until the deadline forces it closed
        let mut held = tokio::net::TcpStream::connect(addr).await.unwrap();
        held.write_all(b"GET /healthz HTTP/1.1\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = tokio::time::Instant::now();
        let result = server.shutdown(Duration::from_millis(300)).await;
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(
            matches!(result, Ok(()) | Err(MonitorError::ShutdownTimeout(_))),
            "{result:?}"
        );

        tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("run returns after the deadline")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns_at_once() {
        let server = MonitoringServer::new(config(true, 0, ""), "127.0.0.1");
        tokio::time::timeout(Duration::from_millis(100), server.shutdown(Duration::from_secs(5)))
            .await
            .expect("nothing to drain")
            .unwrap();
    }

    #[tokio::test]
    async fn test_invalid_host_is_reported() {
        let server = MonitoringServer::new(config(true, 6601, ""), "not a host");
        assert!(matches!(server.run().await, Err(MonitorError::Address(_))));
    }
}
