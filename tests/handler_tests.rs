//! Handler and router tests without a reachable backend
//!
//! Covers:
//! - Identity precedence deciding whose certificate is issued
//! - Failure envelopes for rejected requests
//! - Envelope wire shape
//! - `/invoke` over the axum router

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use sap_cert_proxy::config::{BackendConfig, CertificateConfig, Config};
use sap_cert_proxy::gateway::router::{AppState, create_router};
use sap_cert_proxy::gateway::{MtlsProxy, ProxyHandler, ResponseEnvelope};
use sap_cert_proxy::identity::IdentityResolver;
use sap_cert_proxy::issuer::CertificateIssuer;
use sap_cert_proxy::secrets::InMemorySecretStore;
use sap_cert_proxy::store::{CertificateStore, InMemoryCertificateStore};
use sap_cert_proxy::Error;

// ─── Fixtures ──────────────────────────────────────────────────────────────

struct Fixture {
    handler: ProxyHandler,
    certificates: Arc<InMemoryCertificateStore>,
}

/// Handler over in-memory stores whose backend refuses connections.
fn fixture(resolver: IdentityResolver) -> Fixture {
    let certificates = Arc::new(InMemoryCertificateStore::new());
    let issuer = CertificateIssuer::new(
        certificates.clone(),
        Arc::new(InMemorySecretStore::new()),
        CertificateConfig {
            bootstrap_server_cert: true,
            ..CertificateConfig::default()
        },
        Duration::from_secs(5),
    );
    let proxy = MtlsProxy::new(BackendConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        verify_backend_certificate: false,
        timeout: Duration::from_secs(2),
    });
    Fixture {
        handler: ProxyHandler::new(resolver, Arc::new(issuer), proxy),
        certificates,
    }
}

fn cors(envelope: &ResponseEnvelope) -> Option<&str> {
    envelope
        .headers
        .get("Access-Control-Allow-Origin")
        .map(String::as_str)
}

// ─── Identity precedence ───────────────────────────────────────────────────

#[tokio::test]
async fn federated_claim_wins_over_pool_username() {
    // GIVEN: claims from a federated login
    let f = fixture(IdentityResolver::new());
    let event = json!({
        "path": "/sap/bc/ping",
        "requestContext": {"authorizer": {"claims": {
            "identities": "{\"userId\":\"S0002\"}",
            "cognito:username": "corp-idp_s0002"
        }}}
    });

    // WHEN: the request is handled (backend unreachable)
    let envelope = f.handler.handle(&event).await;

    // THEN: the certificate was issued for the federated id only
    assert_eq!(envelope.status_code, 500);
    assert!(f.certificates.get("S0002").await.unwrap().is_some());
    assert!(f.certificates.get("corp-idp_s0002").await.unwrap().is_none());
}

#[tokio::test]
async fn caller_arn_names_the_user() {
    let f = fixture(IdentityResolver::new());
    let event = json!({
        "path": "/",
        "requestContext": {"identity": {"userArn": "arn:aws:iam::123456789012:user/alice"}}
    });

    f.handler.handle(&event).await;

    assert!(f.certificates.get("alice").await.unwrap().is_some());
}

#[tokio::test]
async fn development_user_only_applies_without_claims() {
    let f = fixture(IdentityResolver::new().with_development_user(Some("DEV".to_string())));

    f.handler.handle(&json!({"path": "/"})).await;
    f.handler
        .handle(&json!({"path": "/", "sapdemo": {"userid": "S0004"}}))
        .await;

    assert!(f.certificates.get("DEV").await.unwrap().is_some());
    assert!(f.certificates.get("S0004").await.unwrap().is_some());
}

// ─── Failure envelopes ─────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_user_is_401_with_cors_and_no_certificate() {
    let f = fixture(IdentityResolver::new());

    let envelope = f.handler.handle(&json!({"httpMethod": "GET", "path": "/"})).await;

    assert_eq!(envelope.status_code, 401);
    assert_eq!(envelope.error_message(), Some("Unknown User ID"));
    assert_eq!(cors(&envelope), Some("*"));
    assert!(f.certificates.is_empty());
}

#[tokio::test]
async fn undecodable_base64_body_is_400() {
    let f = fixture(IdentityResolver::new());
    let event = json!({
        "sapdemo": {"userid": "S0001"},
        "body": "%%%",
        "isBase64Encoded": true
    });

    let envelope = f.handler.handle(&event).await;

    assert_eq!(envelope.status_code, 400);
    assert_eq!(cors(&envelope), Some("*"));
}

#[tokio::test]
async fn unreachable_backend_is_500_with_error_body() {
    let f = fixture(IdentityResolver::new());

    let envelope = f
        .handler
        .handle(&json!({"sapdemo": {"userid": "S0001"}}))
        .await;

    assert_eq!(envelope.status_code, 500);
    assert!(envelope.error_message().is_some_and(|m| !m.is_empty()));
    assert_eq!(cors(&envelope), Some("*"));
}

// ─── Wire shape ────────────────────────────────────────────────────────────

#[test]
fn failure_envelope_serialises_in_gateway_shape() {
    let envelope = ResponseEnvelope::from_error(&Error::identity("Unknown User ID"));

    let value = serde_json::to_value(&envelope).unwrap();

    assert_eq!(
        value,
        json!({
            "statusCode": 401,
            "headers": {
                "Access-Control-Allow-Origin": "*",
                "content-type": "application/json"
            },
            "body": {"error": "Unknown User ID"},
            "isBase64Encoded": false
        })
    );
}

// ─── Router ────────────────────────────────────────────────────────────────

fn router() -> axum::Router {
    let config = Config::default();
    let issuer = Arc::new(CertificateIssuer::from_config(&config).unwrap());
    let state = Arc::new(AppState {
        handler: Arc::new(ProxyHandler::from_config(&config, issuer)),
        request_timeout: config.server.request_timeout,
    });
    create_router(state, &config.server)
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn invoke_returns_envelope_as_json() {
    let request = Request::builder()
        .method("POST")
        .uri("/invoke")
        .header("content-type", "application/json")
        .body(Body::from(json!({"httpMethod": "GET", "path": "/"}).to_string()))
        .unwrap();

    let response = router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["statusCode"], 401);
    assert_eq!(body["headers"]["Access-Control-Allow-Origin"], "*");
    assert_eq!(body["body"]["error"], "Unknown User ID");
}

#[tokio::test]
async fn invoke_without_json_content_type_is_rejected() {
    let request = Request::builder()
        .method("POST")
        .uri("/invoke")
        .body(Body::from("sapdemo=S0001"))
        .unwrap();

    let response = router().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}
