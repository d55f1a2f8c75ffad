//! worker-net: network bootstrap for a game-streaming worker.
//!
//! Turns a configured worker into a reachable endpoint: resolves the listen
//! policy from the deployment environment, provisions TLS (static pair or ACME),
//! scans a port window so sibling workers can share a host, and coordinates the
//! handler and monitoring lifecycles around the listeners.

pub mod config;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod mode;
pub mod monitoring;
pub mod tls;
pub mod worker;

pub use config::{ConfigError, WorkerConfig};
pub use handler::{Handler, HandlerError, StandbyHandler};
pub use mode::{Environment, ListenPolicy};
pub use monitoring::{Monitor, MonitorError, MonitoringServer};
pub use worker::{Worker, WorkerError};
