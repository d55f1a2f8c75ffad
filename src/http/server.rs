//! Listener instances.
//!
//! A [`ServerInstance`] pairs a router with a port window and fixed timeouts.
//! Serving binds the first open port of the window and then blocks until the
//! listener is closed through its [`ListenerHandle`] or fails.
//!
//! Transports:
//! - Plain: HTTP
//! - Rustls: static certificate pair
//! - Acme: on-demand certificates from the ACME acceptor

use std::fmt;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use axum::http::StatusCode;
use axum::middleware;
use axum::Router;
use axum_server::accept::DefaultAcceptor;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::{Handle, Server};
use hyper_util::rt::TokioTimer;
use rustls_acme::axum::AxumAcceptor;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;

use crate::config::{HTTP_IDLE_TIMEOUT, HTTP_READ_TIMEOUT, HTTP_WRITE_TIMEOUT};
use crate::middleware::request_id_layer;
use crate::tls::{TlsError, TlsSource};

use super::bind::{bind_first_open, BindError, PortWindow};
use super::idle::IdleTimeoutAcceptor;
use super::shutdown;

/// Port the ACME TLS-ALPN-01 challenge is validated on.
const ACME_CHALLENGE_PORT: u16 = 443;

/// Listener error
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error(transparent)]
    Bind(#[from] BindError),

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("{role} listener on port {port} failed: {source}")]
    Serve {
        role: ListenerRole,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Which public listener an instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerRole {
    Https,
    Http,
}

impl fmt::Display for ListenerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerRole::Https => f.write_str("https"),
            ListenerRole::Http => f.write_str("http"),
        }
    }
}

/// Where a listener is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Not bound yet
    Pending,
    Bound(SocketAddr),
    /// Gave up without binding (window exhausted or TLS setup failed)
    Unbound,
    /// Stopped serving
    Closed,
}

/// Fixed per-connection limits so slow clients cannot hold resources forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimeouts {
    pub read: Duration,
    pub write: Duration,
    pub idle: Duration,
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self {
            read: HTTP_READ_TIMEOUT,
            write: HTTP_WRITE_TIMEOUT,
            idle: HTTP_IDLE_TIMEOUT,
        }
    }
}

impl ServerTimeouts {
    /// Header read limit. The idle limit is enforced by [`ServerTimeouts::acceptor`].
    fn apply<A>(&self, server: &mut Server<A>) {
        server
            .http_builder()
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.read);
    }

    /// Close connections with no read or write progress for `idle`.
    fn acceptor<A>(&self, inner: A) -> IdleTimeoutAcceptor<A> {
        IdleTimeoutAcceptor::new(inner, self.idle)
    }

    /// Request-level limit: responses not produced in time become 408.
    fn layer(&self, router: Router) -> Router {
        router.layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            self.write,
        ))
    }
}

/// How accepted connections are wrapped.
pub enum Transport {
    Plain,
    Rustls(RustlsConfig),
    Acme(AxumAcceptor),
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Plain => f.write_str("Plain"),
            Transport::Rustls(_) => f.write_str("Rustls"),
            Transport::Acme(_) => f.write_str("Acme"),
        }
    }
}

impl Transport {
    /// Build the TLS transport for a certificate source.
    ///
    /// Static pairs are loaded now and reloaded on SIGHUP; an ACME manager is
    /// started and issues certificates on the first handshake.
    pub async fn from_source(source: TlsSource) -> Result<Self, TlsError> {
        match source {
            TlsSource::Static { chain, key } => {
                let config = RustlsConfig::from_pem_file(&chain, &key)
                    .await
                    .map_err(|source| TlsError::StaticLoad {
                        chain: chain.clone(),
                        key: key.clone(),
                        source,
                    })?;
                shutdown::setup_reload_handler(config.clone(), chain, key);
                Ok(Transport::Rustls(config))
            }
            TlsSource::Acme(manager) => Ok(Transport::Acme(manager.into_acceptor())),
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Transport::Plain)
    }
}

/// Caller-side view of a spawned listener.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    role: ListenerRole,
    handle: Handle,
    state: watch::Receiver<ListenerState>,
}

impl ListenerHandle {
    pub fn role(&self) -> ListenerRole {
        self.role
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Wait until the listener has bound or given up.
    ///
    /// Returns the bound address, or `None` if it never bound.
    pub async fn listening(&self) -> Option<SocketAddr> {
        let mut state = self.state.clone();
        let settled = *state
            .wait_for(|s| *s != ListenerState::Pending)
            .await
            .ok()?;
        match settled {
            ListenerState::Bound(addr) => Some(addr),
            _ => None,
        }
    }

    /// Stop accepting and drain open connections for at most `timeout`.
    pub fn graceful_shutdown(&self, timeout: Option<Duration>) {
        self.handle.graceful_shutdown(timeout);
    }
}

/// A listener waiting to be served.
pub struct ServerInstance {
    role: ListenerRole,
    host: String,
    window: PortWindow,
    router: Router,
    timeouts: ServerTimeouts,
    handle: Handle,
    state: watch::Sender<ListenerState>,
}

impl ServerInstance {
    pub fn new(role: ListenerRole, host: impl Into<String>, window: PortWindow, router: Router) -> Self {
        let (state, _) = watch::channel(ListenerState::Pending);
        Self {
            role,
            host: host.into(),
            window,
            router,
            timeouts: ServerTimeouts::default(),
            handle: Handle::new(),
            state,
        }
    }

    pub fn with_timeouts(mut self, timeouts: ServerTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn role(&self) -> ListenerRole {
        self.role
    }

    pub fn listener_handle(&self) -> ListenerHandle {
        ListenerHandle {
            role: self.role,
            handle: self.handle.clone(),
            state: self.state.subscribe(),
        }
    }

    /// Mark the listener as given up without serving (e.g. TLS setup failed).
    pub fn abandon(self) {
        self.state.send_replace(ListenerState::Unbound);
    }

    /// Bind within the port window and serve until closed.
    ///
    /// A deliberate close through the handle returns `Ok(())`.
    pub async fn serve(self, transport: Transport) -> Result<(), ListenerError> {
        let ServerInstance {
            role,
            host,
            window,
            router,
            timeouts,
            handle,
            state,
        } = self;

        let (listener, addr) = match bind_in_window(&host, window) {
            Ok(bound) => bound,
            Err(e) => {
                state.send_replace(ListenerState::Unbound);
                return Err(e.into());
            }
        };

        tracing::info!(role = %role, %addr, tls = transport.is_tls(), "Starting listener");
        if matches!(transport, Transport::Acme(_)) && !acme_challenge_reachable(addr.port()) {
            tracing::warn!(
                role = %role,
                %addr,
                challenge_port = ACME_CHALLENGE_PORT,
                "ACME listener is not on the challenge port; certificates will only be issued if it is forwarded there"
            );
        }
        state.send_replace(ListenerState::Bound(addr));

        let app = timeouts
            .layer(router)
            .layer(middleware::from_fn(request_id_layer));

        let result = match transport {
            Transport::Plain => {
                let mut server = axum_server::from_tcp(listener)
                    .acceptor(timeouts.acceptor(DefaultAcceptor::new()));
                timeouts.apply(&mut server);
                server.handle(handle).serve(app.into_make_service()).await
            }
            Transport::Rustls(config) => {
                let mut server = axum_server::from_tcp(listener)
                    .acceptor(timeouts.acceptor(RustlsAcceptor::new(config)));
                timeouts.apply(&mut server);
                server.handle(handle).serve(app.into_make_service()).await
            }
            Transport::Acme(acceptor) => {
                let mut server =
                    axum_server::from_tcp(listener).acceptor(timeouts.acceptor(acceptor));
                timeouts.apply(&mut server);
                server.handle(handle).serve(app.into_make_service()).await
            }
        };
        state.send_replace(ListenerState::Closed);

        result.map_err(|source| ListenerError::Serve {
            role,
            port: addr.port(),
            source,
        })?;

        tracing::info!(role = %role, %addr, "HTTP(S) server was closed");
        Ok(())
    }
}

/// TLS-ALPN-01 validation always connects to the challenge port.
fn acme_challenge_reachable(port: u16) -> bool {
    port == ACME_CHALLENGE_PORT
}

fn bind_in_window(host: &str, window: PortWindow) -> Result<(TcpListener, SocketAddr), BindError> {
    let listener = bind_first_open(host, window)?;
    let addr = listener.local_addr().map_err(|source| BindError::Setup {
        port: window.start(),
        source,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| BindError::Setup {
            port: addr.port(),
            source,
        })?;
    Ok((listener, addr))
}
