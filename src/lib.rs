//! SAP Certificate Proxy Library
//!
//! Authenticated callers arrive through an API gateway; each identity is
//! mapped to a short-lived X.509 client certificate, and that certificate is
//! used for a mutually authenticated TLS call to SAP on the caller's behalf.
//!
//! # Features
//!
//! - **Identity resolution**: federated, pool, IAM, and direct-invocation claims
//! - **Certificate lifecycle**: issue, reuse, rotate per user, signed by a server CA
//! - **Sealed keys**: private keys at rest are passphrase protected; passphrases
//!   live in a separate secret store
//! - **Mutual-TLS proxy**: header allow-list, cookie lifting, uniform envelopes
//!
//! # Flow
//!
//! ```text
//! event → identity → issuer (store + secrets) → mTLS proxy → envelope
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Log at `info` when per-request diagnostics are enabled, `debug` otherwise.
macro_rules! diagnostic {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            ::tracing::info!($($arg)+);
        } else {
            ::tracing::debug!($($arg)+);
        }
    };
}

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod issuer;
pub mod mtls;
pub mod secrets;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to install subscriber: {e}")))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to install subscriber: {e}")))?,
    }

    Ok(())
}
