//! The request handler collaborator.
//!
//! The handler serves the worker's actual traffic; the bootstrap only drives its
//! lifecycle. `prepare` is the readiness gate: no listener is opened before it
//! returns.

use async_trait::async_trait;
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler failed to prepare: {0}")]
    Prepare(String),
}

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Block until the handler can accept work.
    async fn prepare(&self) -> Result<(), HandlerError>;

    /// Run the handler's own loop. Returns when the handler stops.
    async fn run(&self);

    /// Release resources and stop `run`.
    async fn close(&self);
}

/// Handler with nothing to set up: ready at once, idle until closed.
#[derive(Debug)]
pub struct StandbyHandler {
    closed: watch::Sender<bool>,
}

impl StandbyHandler {
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self { closed }
    }
}

impl Default for StandbyHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for StandbyHandler {
    async fn prepare(&self) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn run(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
        tracing::debug!("Standby handler stopped");
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}
