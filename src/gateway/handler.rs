//! Proxy handler — resolver, issuer, and proxy behind one call.
//!
//! ```text
//! event → IdentityResolver → CertificateIssuer → MtlsProxy → ResponseEnvelope
//! ```
//!
//! Every outcome, success or failure, leaves as a [`ResponseEnvelope`];
//! fatal errors are converted here.

use std::sync::Arc;

use serde_json::Value;
use tracing::{Instrument, Level, error, info_span, warn};

use super::envelope::ResponseEnvelope;
use super::event::RequestContext;
use super::proxy::MtlsProxy;
use crate::config::Config;
use crate::identity::IdentityResolver;
use crate::issuer::CertificateIssuer;
use crate::{Error, Result};

/// Handles gateway proxy events end to end.
pub struct ProxyHandler {
    resolver: IdentityResolver,
    issuer: Arc<CertificateIssuer>,
    proxy: MtlsProxy,
    force_regenerate: bool,
    console_log: bool,
}

impl ProxyHandler {
    /// Assemble a handler from its parts.
    #[must_use]
    pub fn new(resolver: IdentityResolver, issuer: Arc<CertificateIssuer>, proxy: MtlsProxy) -> Self {
        Self {
            resolver,
            issuer,
            proxy,
            force_regenerate: false,
            console_log: false,
        }
    }

    /// Build a handler from configuration over an existing issuer.
    #[must_use]
    pub fn from_config(config: &Config, issuer: Arc<CertificateIssuer>) -> Self {
        let console_log = config.logging.write_console_log;
        Self::new(
            IdentityResolver::new().with_development_user(config.identity.development_user.clone()),
            issuer,
            MtlsProxy::new(config.backend.clone()).with_console_log(console_log),
        )
        .with_force_regenerate(config.certificates.force_create_new_user_cert)
        .with_console_log(console_log)
    }

    /// Regenerate the user's certificate on every request.
    #[must_use]
    pub fn with_force_regenerate(mut self, force: bool) -> Self {
        self.force_regenerate = force;
        self
    }

    /// Log per-request diagnostics at `info` instead of `debug`.
    #[must_use]
    pub fn with_console_log(mut self, enabled: bool) -> Self {
        self.console_log = enabled;
        self
    }

    /// The issuer behind this handler.
    #[must_use]
    pub fn issuer(&self) -> &Arc<CertificateIssuer> {
        &self.issuer
    }

    /// Handle one event. Never fails: errors become failure envelopes.
    pub async fn handle(&self, event: &Value) -> ResponseEnvelope {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!("invoke", %request_id);

        async {
            match self.process(event).await {
                Ok(envelope) => envelope,
                Err(e) => {
                    if failure_level(&e) == Level::ERROR {
                        error!(error = %e, status = e.status_code(), "Request failed");
                    } else {
                        warn!(error = %e, status = e.status_code(), "Request rejected");
                    }
                    ResponseEnvelope::from_error(&e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn process(&self, event: &Value) -> Result<ResponseEnvelope> {
        let user_id = self.resolver.resolve(event)?;
        diagnostic!(self.console_log, user = %user_id, "Caller identified");

        let ctx = RequestContext::from_event(event, user_id, self.force_regenerate)?;
        let credential = self
            .issuer
            .issue_certificate(&ctx.user_id, ctx.force_regenerate)
            .await?;
        self.proxy.forward(&ctx, &credential).await
    }
}

/// Caller mistakes and unreachable backends are warnings; the rest are ours.
fn failure_level(error: &Error) -> Level {
    if error.status_code() < 500 || !error.is_fatal() {
        Level::WARN
    } else {
        Level::ERROR
    }
}
