//! TLS provisioning for the public listener.
//!
//! Decides where certificates come from once the listen policy calls for TLS:
//! - **Static**: a configured chain/key pair loaded from disk (reloadable on SIGHUP)
//! - **ACME**: automatic on-demand certificates, cached in a [`CertStore`]

pub mod acme;
pub mod store;

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::mode::{Environment, ListenPolicy};

pub use acme::CertificateManager;
pub use store::{CertStore, DirStore, MemoryStore, StoreError};

/// Certificate source for the HTTPS listener.
#[derive(Debug)]
pub enum TlsSource {
    /// Operator-supplied PEM files
    Static { chain: String, key: String },
    /// Certificates issued on demand
    Acme(CertificateManager),
}

impl TlsSource {
    pub fn certificate_manager(&self) -> Option<&CertificateManager> {
        match self {
            TlsSource::Acme(manager) => Some(manager),
            TlsSource::Static { .. } => None,
        }
    }
}

/// Resolve the certificate source for an environment.
///
/// Returns `None` when the environment serves plain HTTP. A certificate manager
/// is built only when TLS is required and neither chain nor key is configured;
/// otherwise the static pair is used as given.
pub fn provision(
    environment: Environment,
    server: &ServerConfig,
    store: Arc<dyn CertStore>,
) -> Option<TlsSource> {
    if environment.listen_policy() != ListenPolicy::TlsWithRedirect {
        return None;
    }

    if server.wants_static_certificate() {
        tracing::info!(
            chain = %server.https_chain,
            key = %server.https_key,
            "Using static TLS certificate"
        );
        return Some(TlsSource::Static {
            chain: server.https_chain.clone(),
            key: server.https_key.clone(),
        });
    }

    Some(TlsSource::Acme(CertificateManager::new(
        environment.acme_directory(),
        &server.acme,
        store,
    )))
}

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Failed to load TLS certificate {chain} / {key}: {source}")]
    StaticLoad {
        chain: String,
        key: String,
        #[source]
        source: std::io::Error,
    },
}
