//! Configuration management
//!
//! Configuration is layered with `figment`: an optional YAML file, then the
//! flat environment variable names used by existing deployments
//! (`SAP_HOST`, `SAP_PORT`, …), then `SAP_CERT_PROXY_`-prefixed variables
//! (nested with `__`, e.g. `SAP_CERT_PROXY_BACKEND__PORT=8443`).
//!
//! Components never read the environment themselves; they receive the
//! relevant section of [`Config`] at construction.

use std::{fmt, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Legacy flat environment variables and the config path they populate.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("SAP_HOST", "backend.host"),
    ("SAP_PORT", "backend.port"),
    ("REJECT_SELF_SIGNED_CERTS", "backend.verify_backend_certificate"),
    ("CERT_EXPIRY_IN_DAYS", "certificates.expiry_in_days"),
    ("FORCE_CREATE_NEW_USER_CERT", "certificates.force_create_new_user_cert"),
    ("WRITE_CONSOLE_LOG", "logging.write_console_log"),
];

/// Main configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before the environment layers are read.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// HTTP front-end configuration
    pub server: ServerConfig,
    /// SAP backend configuration
    pub backend: BackendConfig,
    /// Certificate lifecycle configuration
    pub certificates: CertificateConfig,
    /// Certificate and secret store configuration
    pub store: StoreConfig,
    /// Identity resolution configuration
    pub identity: IdentityConfig,
    /// Diagnostic logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Env files must land in the process environment before the env
        // providers below snapshot it.
        let env_files: Vec<String> = figment.extract_inner("env_files").unwrap_or_default();
        load_env_files(&env_files);

        figment = figment
            .merge(Env::raw().filter_map(|key| {
                LEGACY_ENV
                    .iter()
                    .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
                    .map(|(_, path)| (*path).into())
            }))
            .merge(Env::prefixed("SAP_CERT_PROXY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that every command relies on.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.certificates.expiry_in_days == 0 {
            return Err(Error::Config(
                "certificates.expiry_in_days must be at least 1".to_string(),
            ));
        }
        if self.certificates.server_expiry_in_days == 0 {
            return Err(Error::Config(
                "certificates.server_expiry_in_days must be at least 1".to_string(),
            ));
        }
        if self.certificates.server_key_name.is_empty()
            || self.certificates.user_key_prefix.is_empty()
        {
            return Err(Error::Config(
                "certificates.server_key_name and certificates.user_key_prefix must be set"
                    .to_string(),
            ));
        }
        if self.store.kind == StoreKind::File && self.store.master_passphrase.is_none() {
            return Err(Error::Config(
                "store.master_passphrase is required for the file store".to_string(),
            ));
        }
        Ok(())
    }

    /// Check the settings needed to reach the backend.
    ///
    /// Only the proxying commands call this; certificate management works
    /// without a backend.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the backend host or port is unusable.
    pub fn validate_backend(&self) -> Result<()> {
        if self.backend.host.trim().is_empty() {
            return Err(Error::Config(
                "backend.host (or SAP_HOST) must be set".to_string(),
            ));
        }
        if self.backend.port == 0 {
            return Err(Error::Config("backend.port must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Load environment files into the process environment.
/// Supports ~ expansion. Files that don't exist are silently skipped.
fn load_env_files(paths: &[String]) {
    for path_str in paths {
        let expanded = if path_str.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                path_str.replacen('~', &home.display().to_string(), 1)
            } else {
                path_str.clone()
            }
        } else {
            path_str.clone()
        };

        let path = Path::new(&expanded);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
            }
        } else {
            tracing::debug!("Env file not found (skipped): {expanded}");
        }
    }
}

/// HTTP front-end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Whole-invocation timeout, mirroring the platform's per-invocation limit
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum inbound event size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39480,
            request_timeout: Duration::from_secs(29),
            max_body_size: 6 * 1024 * 1024,
        }
    }
}

/// SAP backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend host name; must match the backend certificate when verifying
    pub host: String,
    /// Backend HTTPS port
    pub port: u16,
    /// Validate the backend certificate against the server certificate.
    ///
    /// Only disable for self-signed test backends.
    pub verify_backend_certificate: bool,
    /// Bound on the whole outbound round trip
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 443,
            verify_backend_certificate: true,
            timeout: Duration::from_secs(25),
        }
    }
}

/// Certificate lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// Validity window of user certificates
    pub expiry_in_days: u32,
    /// Regenerate the user certificate on every request
    pub force_create_new_user_cert: bool,
    /// Certificate store key of the server CA record
    pub server_record_id: String,
    /// Secret name of the server CA key passphrase
    pub server_key_name: String,
    /// Prefix of per-user passphrase secret names
    pub user_key_prefix: String,
    /// Common Name of the server CA
    pub server_subject: String,
    /// Validity window of the server CA
    pub server_expiry_in_days: u32,
    /// Create the server CA at startup when it is missing or expired
    pub bootstrap_server_cert: bool,
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            expiry_in_days: 1,
            force_create_new_user_cert: false,
            server_record_id: "$server".to_string(),
            server_key_name: "sap-cert-proxy/server-key-pass".to_string(),
            user_key_prefix: "sap-cert-proxy/user-key-pass/".to_string(),
            server_subject: "SAP Certificate Proxy CA".to_string(),
            server_expiry_in_days: 3650,
            bootstrap_server_cert: false,
        }
    }
}

/// Store backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local maps; state is lost on restart
    #[default]
    Memory,
    /// JSON documents under `store.directory`
    File,
}

/// Certificate and secret store configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend kind
    pub kind: StoreKind,
    /// Root directory for the file store
    pub directory: String,
    /// Passphrase sealing secrets at rest in the file store
    pub master_passphrase: Option<String>,
    /// Bound on each store or secret operation
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            directory: ".sap-cert-proxy".to_string(),
            master_passphrase: None,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("kind", &self.kind)
            .field("directory", &self.directory)
            .field(
                "master_passphrase",
                &self.master_passphrase.as_ref().map(|_| "[REDACTED]"),
            )
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

/// Identity resolution configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Placeholder identity used when no claim resolves.
    ///
    /// Development only. Leave unset in production so unresolvable
    /// requests are rejected.
    pub development_user: Option<String>,
}

/// Diagnostic logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Promote per-request diagnostics from `debug` to `info`
    pub write_console_log: bool,
}
