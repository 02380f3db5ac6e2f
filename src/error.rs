//! Error types for the SAP certificate proxy

use std::io;

use thiserror::Error;

/// Result type alias for the SAP certificate proxy
pub type Result<T> = std::result::Result<T, Error>;

/// SAP certificate proxy errors
///
/// Messages never carry passphrases or private key material; callers may
/// surface them verbatim in a failure envelope.
#[derive(Error, Debug)]
pub enum Error {
    /// No usable caller identity in the request context
    #[error("{0}")]
    IdentityResolution(String),

    /// Certificate store read or write failed
    #[error("Certificate store unavailable: {0}")]
    StoreUnavailable(String),

    /// Passphrase lookup failed or returned the wrong number of values
    #[error("Secret unavailable: {0}")]
    SecretUnavailable(String),

    /// Key pair or certificate generation failed
    #[error("Certificate generation failed: {0}")]
    CertGeneration(String),

    /// Outbound mutual-TLS call to the backend failed
    #[error("Backend transport error: {0}")]
    BackendTransport(String),

    /// Inbound request could not be turned into a backend call
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an identity resolution error
    pub fn identity(message: impl Into<String>) -> Self {
        Self::IdentityResolution(message.into())
    }

    /// HTTP status used when this error is rendered into a failure envelope.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::IdentityResolution(_) => 401,
            Self::InvalidRequest(_) | Self::Json(_) => 400,
            _ => 500,
        }
    }

    /// Whether the error aborts the request.
    ///
    /// Backend transport failures are translated into a 500 envelope by the
    /// proxy and never abort the handler.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::BackendTransport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_error_displays_bare_message() {
        let err = Error::identity("Unknown User ID");
        assert_eq!(err.to_string(), "Unknown User ID");
        assert_eq!(err.status_code(), 401);
    }

    #[test]
    fn issuer_errors_map_to_internal_server_error() {
        assert_eq!(Error::StoreUnavailable("down".into()).status_code(), 500);
        assert_eq!(Error::SecretUnavailable("missing".into()).status_code(), 500);
        assert_eq!(Error::CertGeneration("no ca".into()).status_code(), 500);
    }

    #[test]
    fn only_backend_transport_is_recoverable() {
        assert!(!Error::BackendTransport("refused".into()).is_fatal());
        assert!(Error::StoreUnavailable("down".into()).is_fatal());
        assert!(Error::identity("x").is_fatal());
    }

    #[test]
    fn invalid_request_is_bad_request() {
        assert_eq!(Error::InvalidRequest("bad json".into()).status_code(), 400);
    }
}
