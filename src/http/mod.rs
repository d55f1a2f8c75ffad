//! Network listeners for the worker.
//!
//! - `echo` / `redirect`: the two routers a listener can serve
//! - `bind`: port window scanning, tolerant of sibling workers on one host
//! - `idle`: per-connection idle timeout wrapped around every transport
//! - `server`: a listener instance with fixed timeouts and its transport
//!   (plain, static TLS, or ACME)
//! - `shutdown`: signal handling and static certificate reload

pub mod bind;
pub mod echo;
pub mod idle;
pub mod redirect;
pub mod server;
pub mod shutdown;

pub use bind::{bind_first_open, BindError, PortWindow};
pub use echo::echo_router;
pub use idle::{IdleStream, IdleTimeoutAcceptor};
pub use redirect::redirect_router;
pub use server::{ListenerError, ListenerHandle, ListenerRole, ListenerState, ServerInstance, ServerTimeouts, Transport};
