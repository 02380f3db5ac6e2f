//! SAP Certificate Proxy - per-user client certificates and mutual TLS to SAP

use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use tracing::{error, info, warn};

use sap_cert_proxy::{
    cli::{Cli, Command},
    config::{Config, StoreKind},
    gateway::{Gateway, ProxyHandler},
    issuer::CertificateIssuer,
    mtls::CertificateInfo,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    match cli.command {
        Some(Command::Invoke { ref event }) => run_invoke(config, event).await,
        Some(Command::Issue { ref user, force }) => run_issue(config, user, force).await,
        Some(Command::ServerCert { ref subject, force }) => {
            run_server_cert(config, subject.clone(), force).await
        }
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    let path = cli.config.clone().or_else(default_config_path);
    match Config::load(path.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// `~/.config/sap-cert-proxy/config.yaml`, if present
fn default_config_path() -> Option<std::path::PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("sap-cert-proxy").join("config.yaml"))
        .filter(|path| path.is_file())
}

/// A memory store starts from nothing on every run, so it needs a CA.
fn with_memory_bootstrap(mut config: Config) -> Config {
    if config.store.kind == StoreKind::Memory && !config.certificates.bootstrap_server_cert {
        warn!("Memory store: certificates are discarded on exit, bootstrapping a throwaway server certificate");
        config.certificates.bootstrap_server_cert = true;
    }
    config
}

/// Run one proxy event through the full handler
async fn run_invoke(config: Config, event_path: &Path) -> ExitCode {
    let config = with_memory_bootstrap(config);
    if let Err(e) = config.validate_backend() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    let event = match read_event(event_path) {
        Ok(event) => event,
        Err(e) => {
            eprintln!("❌ Failed to read event: {e}");
            return ExitCode::FAILURE;
        }
    };

    let issuer = match CertificateIssuer::from_config(&config) {
        Ok(issuer) => Arc::new(issuer),
        Err(e) => {
            error!("Failed to create issuer: {e}");
            return ExitCode::FAILURE;
        }
    };
    let handler = ProxyHandler::from_config(&config, issuer);
    let envelope = handler.handle(&event).await;

    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("❌ Failed to serialize envelope: {e}");
            return ExitCode::FAILURE;
        }
    }

    if envelope.status_code < 400 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn read_event(path: &Path) -> Result<Value, String> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| e.to_string())?;
        buf
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?
    };
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

/// Issue or reuse a user certificate
async fn run_issue(config: Config, user: &str, force: bool) -> ExitCode {
    let config = with_memory_bootstrap(config);
    let issuer = match CertificateIssuer::from_config(&config) {
        Ok(issuer) => issuer,
        Err(e) => {
            error!("Failed to create issuer: {e}");
            return ExitCode::FAILURE;
        }
    };

    let credential = match issuer.issue_certificate(user, force).await {
        Ok(credential) => credential,
        Err(e) => {
            eprintln!("❌ Issuance failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    match CertificateInfo::from_pem(credential.certificate_pem()) {
        Ok(info) => {
            print_certificate(&info);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Failed to inspect certificate: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Create or reuse the server CA
async fn run_server_cert(mut config: Config, subject: Option<String>, force: bool) -> ExitCode {
    if let Some(subject) = subject {
        config.certificates.server_subject = subject;
    }
    if config.store.kind == StoreKind::Memory {
        warn!("Memory store: the server certificate is discarded on exit");
    }

    let issuer = match CertificateIssuer::from_config(&config) {
        Ok(issuer) => issuer,
        Err(e) => {
            error!("Failed to create issuer: {e}");
            return ExitCode::FAILURE;
        }
    };

    match issuer.ensure_server_certificate(force).await {
        Ok(info) => {
            print_certificate(&info);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Server certificate failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_certificate(info: &CertificateInfo) {
    println!("✅ {}", info.common_name.as_deref().unwrap_or("<no CN>"));
    if let Some(ref issuer) = info.issuer_common_name {
        println!("   Issuer:      {issuer}");
    }
    println!("   Serial:      {}", info.serial);
    println!("   Not before:  {}", info.not_before);
    println!("   Not after:   {}", info.not_after);
    println!("   SHA-256:     {}", info.fingerprint_sha256);
    if info.is_ca {
        println!("   CA:          yes");
    }
}

/// Run the HTTP server
async fn run_server(config: Config) -> ExitCode {
    let config = with_memory_bootstrap(config);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        backend = %config.backend.host,
        "Starting SAP certificate proxy"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
