//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// SAP certificate proxy - per-user client certificates and mutual TLS to SAP
#[derive(Parser, Debug)]
#[command(name = "sap-cert-proxy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "SAP_CERT_PROXY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "SAP_CERT_PROXY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "SAP_CERT_PROXY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "SAP_CERT_PROXY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "SAP_CERT_PROXY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,

    /// Run one gateway proxy event and print the response envelope
    Invoke {
        /// Path to the event JSON (`-` for stdin)
        #[arg(short, long, required = true)]
        event: PathBuf,
    },

    /// Issue (or reuse) a user certificate and print its details
    Issue {
        /// User id the certificate is bound to
        #[arg(short, long, required = true)]
        user: String,

        /// Regenerate even if a valid certificate exists
        #[arg(long)]
        force: bool,
    },

    /// Create the server CA certificate used to sign user certificates
    ServerCert {
        /// Subject common name (overrides `certificates.server_subject`)
        #[arg(long)]
        subject: Option<String>,

        /// Replace an existing, still valid server certificate
        #[arg(long)]
        force: bool,
    },
}
