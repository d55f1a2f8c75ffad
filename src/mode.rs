//! Deployment environment and the listener policy derived from it.
//!
//! The environment is resolved once at startup into a [`ListenPolicy`] that every
//! downstream component consumes, instead of re-checking environment membership
//! wherever TLS matters.

use std::fmt;

use serde::Deserialize;

use crate::config::{LETS_ENCRYPT_PRODUCTION_URL, LETS_ENCRYPT_STAGING_URL};

/// Deployment environment of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum Environment {
    Production,
    Staging,
    #[default]
    Development,
}

impl Environment {
    /// Parse an environment name. Total: unrecognized names resolve to Development.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "staging" | "stage" => Environment::Staging,
            _ => Environment::Development,
        }
    }

    /// Resolve the listener policy for this environment.
    pub fn listen_policy(self) -> ListenPolicy {
        match self {
            Environment::Production | Environment::Staging => ListenPolicy::TlsWithRedirect,
            Environment::Development => ListenPolicy::PlainOnly,
        }
    }

    /// ACME directory certificates are requested from.
    /// Only staging uses the staging directory.
    pub fn acme_directory(self) -> AcmeDirectory {
        match self {
            Environment::Staging => AcmeDirectory::Staging,
            Environment::Production | Environment::Development => AcmeDirectory::Production,
        }
    }
}

impl From<String> for Environment {
    fn from(value: String) -> Self {
        Environment::parse(&value)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Development => "development",
        };
        f.write_str(name)
    }
}

/// How the worker exposes itself on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenPolicy {
    /// HTTPS listener plus an HTTP listener that redirects to it
    TlsWithRedirect,
    /// A single plain HTTP listener is the public endpoint
    PlainOnly,
}

impl ListenPolicy {
    pub fn uses_tls(self) -> bool {
        self == ListenPolicy::TlsWithRedirect
    }
}

/// Let's Encrypt directory selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcmeDirectory {
    Production,
    Staging,
}

impl AcmeDirectory {
    pub fn url(self) -> &'static str {
        match self {
            AcmeDirectory::Production => LETS_ENCRYPT_PRODUCTION_URL,
            AcmeDirectory::Staging => LETS_ENCRYPT_STAGING_URL,
        }
    }

    pub fn is_production(self) -> bool {
        self == AcmeDirectory::Production
    }
}
