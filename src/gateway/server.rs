//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::handler::ProxyHandler;
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::issuer::CertificateIssuer;
use crate::{Error, Result};

/// Certificate proxy HTTP server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Proxy handler shared by all requests
    handler: Arc<ProxyHandler>,
}

impl Gateway {
    /// Create a new gateway
    ///
    /// Builds the stores and issuer, and creates the server certificate up
    /// front when `certificates.bootstrap_server_cert` is set.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate_backend()?;

        let issuer = Arc::new(CertificateIssuer::from_config(&config)?);
        if config.certificates.bootstrap_server_cert {
            let info = issuer.ensure_server_certificate(false).await?;
            info!(
                subject = info.common_name.as_deref().unwrap_or_default(),
                expires_at = %info.not_after,
                "Server certificate ready"
            );
        }

        let handler = Arc::new(ProxyHandler::from_config(&config, issuer));
        Ok(Self { config, handler })
    }

    /// Run the gateway
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let state = Arc::new(AppState {
            handler: Arc::clone(&self.handler),
            request_timeout: self.config.server.request_timeout,
        });
        let app = create_router(state, &self.config.server);

        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("SAP CERTIFICATE PROXY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            backend = %format!("{}:{}", self.config.backend.host, self.config.backend.port),
            verify_backend_certificate = self.config.backend.verify_backend_certificate,
            "Backend"
        );
        info!(
            store = ?self.config.store.kind,
            expiry_in_days = self.config.certificates.expiry_in_days,
            "Certificates"
        );
        if !self.config.backend.verify_backend_certificate {
            warn!("Backend certificate verification DISABLED");
        }
        if self.config.certificates.force_create_new_user_cert {
            warn!("A new user certificate is generated for EVERY request");
        }
        if self.config.identity.development_user.is_some() {
            warn!("Development user fallback enabled - do not use in production");
        }
        info!(
            "  POST http://{}:{}/invoke",
            self.config.server.host, self.config.server.port
        );
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?;

        info!("Shutdown complete");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
