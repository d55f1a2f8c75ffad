//! Worker lifecycle coordinator.
//!
//! `run` starts the monitoring server and the handler concurrently, waits for the
//! handler to finish preparing, and only then opens the public listeners:
//! - TLS environments: HTTPS (echo) plus an HTTP listener redirecting to it
//! - otherwise: a single plain HTTP (echo) listener
//!
//! Every spawned task and listener handle is owned by the [`Worker`].

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::handler::{Handler, HandlerError};
use crate::http::{
    echo_router, redirect_router, BindError, ListenerError, ListenerHandle, ListenerRole,
    PortWindow, ServerInstance, Transport,
};
use crate::monitoring::{Monitor, MonitoringServer};
use crate::tls::{self, CertStore, DirStore};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

pub struct Worker {
    config: Arc<WorkerConfig>,
    handler: Arc<dyn Handler>,
    monitor: Arc<dyn Monitor>,
    cert_store: Arc<dyn CertStore>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    listeners: Mutex<HashMap<ListenerRole, ListenerHandle>>,
}

impl Worker {
    /// Create a worker with the built-in monitoring server and an on-disk
    /// certificate cache at `server.acme.cache_dir`.
    pub fn new(config: WorkerConfig, handler: Arc<dyn Handler>) -> Self {
        let monitor = MonitoringServer::new(config.monitoring.clone(), config.server.host.clone());
        let cert_store = DirStore::new(&config.server.acme.cache_dir);
        Self {
            config: Arc::new(config),
            handler,
            monitor: Arc::new(monitor),
            cert_store: Arc::new(cert_store),
            tasks: Mutex::new(Vec::new()),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_cert_store(mut self, cert_store: Arc<dyn CertStore>) -> Self {
        self.cert_store = cert_store;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Start the worker.
    ///
    /// Returns once the handler is prepared and the listeners are spawned.
    /// A failing `prepare` is returned and no listener is opened.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let policy = self.config.environment.listen_policy();
        tracing::info!(
            environment = %self.config.environment,
            policy = ?policy,
            "Starting worker"
        );

        let monitor = self.monitor.clone();
        self.track(tokio::spawn(async move {
            if let Err(e) = monitor.run().await {
                tracing::error!(error = %e, "Failed to start monitoring server");
            }
        }));

        let handler = self.handler.clone();
        self.track(tokio::spawn(async move {
            handler.run().await;
        }));

        // Readiness gate: nothing public opens before this returns
        if let Err(e) = self.handler.prepare().await {
            tracing::error!(error = %e, "Handler failed to prepare, closing");
            self.handler.close().await;
            return Err(e.into());
        }
        tracing::info!("Handler prepared, opening listeners");

        self.spawn_listeners();
        Ok(())
    }

    /// Handle of a spawned listener, `None` before `run` opened it.
    pub fn listener(&self, role: ListenerRole) -> Option<ListenerHandle> {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&role)
            .cloned()
    }

    /// Wait for a listener to bind; `None` if it was never spawned or never bound.
    pub async fn listening(&self, role: ListenerRole) -> Option<SocketAddr> {
        self.listener(role)?.listening().await
    }

    /// Number of spawned tasks (monitoring, handler, listeners) still running.
    pub fn active_tasks(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Shut the worker down.
    ///
    /// Only the monitoring server is stopped; a failure there is logged.
    pub async fn shutdown(&self, deadline: Duration) {
        // TODO: gracefully stop the HTTPS/HTTP listeners in `self.listeners` and close the
        // handler, once the handler tolerates `close` while its `run` loop is active.
        if let Err(e) = self.monitor.shutdown(deadline).await {
            tracing::error!(error = %e, "Failed to shutdown monitoring server");
        }
    }

    fn spawn_listeners(&self) {
        let server = &self.config.server;
        let tls = tls::provision(self.config.environment, server, self.cert_store.clone());

        let http_router = match &tls {
            Some(source) => {
                let redirect = redirect_router(server.https_port);
                match source.certificate_manager() {
                    Some(manager) => manager.wrap_http(redirect),
                    None => redirect,
                }
            }
            None => echo_router(),
        };

        if let Some(source) = tls {
            let https = ServerInstance::new(
                ListenerRole::Https,
                server.host.clone(),
                PortWindow::new(server.https_port),
                echo_router(),
            );
            self.register(&https);
            self.track(tokio::spawn(async move {
                let result = match Transport::from_source(source).await {
                    Ok(transport) => https.serve(transport).await,
                    Err(e) => {
                        https.abandon();
                        Err(e.into())
                    }
                };
                log_listener_exit(ListenerRole::Https, result);
            }));
        }

        let http = ServerInstance::new(
            ListenerRole::Http,
            server.host.clone(),
            PortWindow::new(server.port),
            http_router,
        );
        self.register(&http);

        let handler = self.handler.clone();
        self.track(tokio::spawn(async move {
            let result = http.serve(Transport::Plain).await;
            log_listener_exit(ListenerRole::Http, result);

            tracing::info!("Close worker");
            handler.close().await;
        }));
    }

    fn register(&self, instance: &ServerInstance) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(instance.role(), instance.listener_handle());
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(task);
    }
}

/// Listener failures stay local: the worker keeps running without that listener.
fn log_listener_exit(role: ListenerRole, result: Result<(), ListenerError>) {
    match result {
        Ok(()) => {}
        Err(ListenerError::Bind(e @ BindError::Exhausted { .. })) => {
            tracing::warn!(role = %role, error = %e, "Listener unreachable: no port bound");
        }
        Err(e) => {
            tracing::error!(role = %role, error = %e, "Listener failed");
        }
    }
}
