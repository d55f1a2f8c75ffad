//! Port window scanning.
//!
//! Several workers may run on one host. Instead of allocating ports externally,
//! each listener scans a fixed window above its configured port and takes the
//! first one it can bind.

use std::io;
use std::net::TcpListener;

use crate::config::PORT_WINDOW_LEN;

#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("No open port found in range {start}-{end}")]
    Exhausted { start: u16, end: u16 },

    #[error("Failed to prepare listener on port {port}: {source}")]
    Setup {
        port: u16,
        #[source]
        source: io::Error,
    },
}

/// Candidate ports `[start, start + len)`, clamped to the valid port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortWindow {
    start: u16,
    len: u16,
}

impl PortWindow {
    pub fn new(start: u16) -> Self {
        Self::with_len(start, PORT_WINDOW_LEN)
    }

    pub fn with_len(start: u16, len: u16) -> Self {
        Self { start, len }
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    /// Last candidate port (inclusive).
    pub fn last(&self) -> u16 {
        self.ports().last().unwrap_or(self.start)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ports().any(|p| p == port)
    }

    /// Each candidate port, in order, exactly once.
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        let start = u32::from(self.start);
        let end = (start + u32::from(self.len)).min(u32::from(u16::MAX) + 1);
        (start..end).map(|port| port as u16)
    }
}

/// Bind the first free port of the window on `host`.
///
/// Ports held by another process (normally a sibling worker) are logged and
/// skipped. Returns [`BindError::Exhausted`] when none is left. Any other bind
/// failure (bad host, address not local, permission) would fail the same way on
/// every port and is returned at once as [`BindError::Setup`].
pub fn bind_first_open(host: &str, window: PortWindow) -> Result<TcpListener, BindError> {
    for port in window.ports() {
        match TcpListener::bind((host, port)) {
            Ok(listener) => {
                tracing::debug!(host = %host, port, "Bound port");
                return Ok(listener);
            }
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                tracing::warn!(host = %host, port, "Port in use, trying next");
            }
            Err(source) => {
                tracing::error!(host = %host, port, error = %source, "Failed to bind port");
                return Err(BindError::Setup { port, source });
            }
        }
    }

    tracing::error!(
        host = %host,
        start = window.start(),
        end = window.last(),
        "Couldn't find an open port in range"
    );
    Err(BindError::Exhausted {
        start: window.start(),
        end: window.last(),
    })
}
