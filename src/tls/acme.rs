//! Automatic certificate management via ACME (Let's Encrypt).
//!
//! Certificates are issued on demand: the first TLS handshake for a configured
//! domain triggers issuance, so failures show up when a client connects rather
//! than at startup. Renewal is scheduled by `rustls-acme`; this module only
//! configures it and drives its event stream.

use std::sync::Arc;

use axum::Router;
use futures::StreamExt;
use rustls_acme::axum::AxumAcceptor;
use rustls_acme::AcmeConfig;

use crate::config::AcmeConfig as AcmeSettings;
use crate::mode::AcmeDirectory;

use super::store::{AcmeCache, CertStore};

/// Configured, not yet running, automatic certificate manager.
pub struct CertificateManager {
    directory: AcmeDirectory,
    domains: Vec<String>,
    contact: Option<String>,
    store: Arc<dyn CertStore>,
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("directory", &self.directory)
            .field("domains", &self.domains)
            .field("contact", &self.contact)
            .finish_non_exhaustive()
    }
}

impl CertificateManager {
    pub fn new(directory: AcmeDirectory, settings: &AcmeSettings, store: Arc<dyn CertStore>) -> Self {
        Self {
            directory,
            domains: settings.domains.clone(),
            contact: settings.email.clone(),
            store,
        }
    }

    pub fn directory(&self) -> AcmeDirectory {
        self.directory
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Put challenge handling in front of an HTTP router.
    ///
    /// Validation uses TLS-ALPN-01, which the acceptor answers on the HTTPS
    /// listener, so the wrapped router is returned unchanged.
    pub fn wrap_http(&self, router: Router) -> Router {
        tracing::debug!(
            domains = ?self.domains,
            challenge = "tls-alpn-01",
            "ACME challenges served by the HTTPS acceptor"
        );
        router
    }

    /// Start the manager and return the acceptor for the HTTPS listener.
    ///
    /// Spawns the task driving certificate issuance and renewal; must be called
    /// inside a Tokio runtime.
    pub fn into_acceptor(self) -> AxumAcceptor {
        tracing::info!(
            domains = ?self.domains,
            directory = %self.directory.url(),
            contact = self.contact.as_deref().unwrap_or("-"),
            "Starting ACME certificate manager"
        );

        if !self.directory.is_production() {
            tracing::warn!(
                "Using Let's Encrypt staging environment - certificates will NOT be trusted by browsers"
            );
        }

        let mut config = AcmeConfig::new(self.domains)
            .cache(AcmeCache::new(self.store))
            .directory_lets_encrypt(self.directory.is_production());
        if let Some(email) = &self.contact {
            config = config.contact_push(format!("mailto:{}", email));
        }

        let mut acme_state = config.state();
        let acceptor = acme_state.axum_acceptor(acme_state.default_rustls_config());

        tokio::spawn(async move {
            loop {
                match acme_state.next().await {
                    Some(Ok(event)) => {
                        tracing::info!(event = ?event, "ACME event");
                    }
                    Some(Err(err)) => {
                        tracing::error!(error = %err, "ACME error");
                    }
                    None => {
                        tracing::debug!("ACME state stream ended");
                        break;
                    }
                }
            }
        });

        acceptor
    }
}
