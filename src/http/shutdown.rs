//! Signal handling.
//!
//! Handles:
//! - SIGTERM/SIGINT: resolves [`shutdown_signal`] so the worker can shut down
//! - SIGHUP: static certificate reload

use axum_server::tls_rustls::RustlsConfig;

/// Wait for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down worker");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down worker");
        }
    }
}

/// Reload the static certificate pair from disk on SIGHUP.
#[cfg(unix)]
pub fn setup_reload_handler(tls_config: RustlsConfig, chain_path: String, key_path: String) {
    tokio::spawn(async move {
        let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .expect("Failed to install SIGHUP handler");

        loop {
            sighup.recv().await;
            tracing::info!("Received SIGHUP, reloading TLS certificates");

            match tls_config.reload_from_pem_file(&chain_path, &key_path).await {
                Ok(()) => {
                    tracing::info!(chain = %chain_path, key = %key_path, "TLS certificates reloaded");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        chain = %chain_path,
                        key = %key_path,
                        "Failed to reload TLS certificates, keeping previous pair"
                    );
                }
            }
        }
    });
}

#[cfg(not(unix))]
pub fn setup_reload_handler(_tls_config: RustlsConfig, _chain_path: String, _key_path: String) {
    tracing::warn!("Certificate hot-reload via SIGHUP not supported on this platform");
}
