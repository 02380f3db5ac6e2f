//! Mutual-TLS proxy — one authenticated round trip to the backend.
//!
//! A client is built per call from the caller's credential, so connections
//! are never shared between identities. Transport failures (connect, TLS,
//! timeout, truncated body) are recovered into a `500` envelope; only
//! problems with the inbound request or the credential itself are returned
//! as errors.

use std::error::Error as StdError;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{HeaderName, HeaderValue, HeaderMap};
use reqwest::{Client, Method};
use serde_json::Value;
use tracing::warn;
use url::Url;

use super::envelope::{EnvelopeBody, ResponseEnvelope};
use super::event::RequestContext;
use super::filter::{filter_request_headers, lift_set_cookie};
use crate::config::BackendConfig;
use crate::mtls::ClientCredential;
use crate::{Error, Result};

/// Forwards requests to the configured backend over mutual TLS.
#[derive(Debug, Clone)]
pub struct MtlsProxy {
    backend: BackendConfig,
    console_log: bool,
}

impl MtlsProxy {
    /// Create a proxy for `backend`.
    #[must_use]
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            console_log: false,
        }
    }

    /// Log per-request diagnostics at `info` instead of `debug`.
    #[must_use]
    pub fn with_console_log(mut self, enabled: bool) -> Self {
        self.console_log = enabled;
        self
    }

    /// `https://{host}:{port}{path}?{query}` for `ctx`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRequest` if the result is not a valid URL.
    pub fn backend_url(&self, ctx: &RequestContext) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "https://{}:{}",
            self.backend.host, self.backend.port
        ))
        .map_err(|e| Error::InvalidRequest(format!("Invalid backend address: {e}")))?;
        url.set_path(&ctx.path);
        if !ctx.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&ctx.query);
        }
        Ok(url)
    }

    /// Forward `ctx` to the backend, presenting `credential`.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidRequest` for an unusable method, header, or JSON body
    /// - `Error::SecretUnavailable` / `Error::CertGeneration` if the
    ///   credential cannot be turned into a TLS client
    pub async fn forward(
        &self,
        ctx: &RequestContext,
        credential: &ClientCredential,
    ) -> Result<ResponseEnvelope> {
        let url = self.backend_url(ctx)?;
        let method = Method::from_bytes(ctx.method.as_bytes())
            .map_err(|_| Error::InvalidRequest(format!("Invalid HTTP method '{}'", ctx.method)))?;

        let headers = filter_request_headers(ctx.headers.iter().cloned());
        let json = negotiates_json(&headers);
        let header_map = to_header_map(&headers)?;
        let body = match &ctx.body {
            Some(body) if json && !body.is_empty() => {
                let value: Value = serde_json::from_slice(body).map_err(|e| {
                    Error::InvalidRequest(format!("Body is not valid JSON: {e}"))
                })?;
                Some(serde_json::to_vec(&value)?)
            }
            other => other.clone(),
        };

        let tls = credential
            .tls_client_config(self.backend.verify_backend_certificate)
            .await?;
        let client = match Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(self.backend.timeout)
            // 30x goes back to the caller with its cookies; the certificate
            // never leaves the configured backend.
            .redirect(reqwest::redirect::Policy::none())
            .build()
        {
            Ok(client) => client,
            Err(e) => return Ok(self.transport_failure(ctx, &e)),
        };

        diagnostic!(
            self.console_log,
            user = %ctx.user_id,
            method = %method,
            url = %url,
            "Calling backend"
        );

        let mut request = client.request(method, url).headers(header_map);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Ok(self.transport_failure(ctx, &e)),
        };

        let status = response.status().as_u16();
        let (headers, cookies) = lift_set_cookie(response.headers());
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(self.transport_failure(ctx, &e)),
        };

        diagnostic!(
            self.console_log,
            user = %ctx.user_id,
            status,
            bytes = bytes.len(),
            "Backend responded"
        );

        let (body, is_base64_encoded) = decode_body(&bytes, json);
        Ok(ResponseEnvelope::from_backend(
            status,
            headers,
            cookies,
            body,
            is_base64_encoded,
        ))
    }

    fn transport_failure(&self, ctx: &RequestContext, error: &reqwest::Error) -> ResponseEnvelope {
        let message = if error.is_timeout() {
            format!("Backend request timed out after {:?}", self.backend.timeout)
        } else {
            error_chain(error)
        };
        warn!(user = %ctx.user_id, error = %message, "Backend transport failure");
        ResponseEnvelope::transport_failure(&message)
    }
}

/// Whether the filtered headers negotiate a JSON body.
fn negotiates_json(headers: &[(String, String)]) -> bool {
    headers.iter().any(|(name, value)| {
        name.eq_ignore_ascii_case("content-type")
            && value
                .split(';')
                .next()
                .is_some_and(|media| media.trim().eq_ignore_ascii_case("application/json"))
    })
}

fn to_header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::InvalidRequest(format!("Invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::InvalidRequest(format!("Invalid value for header '{name}'")))?;
        map.append(name, value);
    }
    Ok(map)
}

/// JSON when negotiated and parseable, UTF-8 text otherwise, base64 for
/// anything else.
fn decode_body(bytes: &[u8], json: bool) -> (EnvelopeBody, bool) {
    if json && !bytes.is_empty() {
        if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
            return (EnvelopeBody::Json(value), false);
        }
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => (EnvelopeBody::Text(text.to_string()), false),
        Err(_) => (EnvelopeBody::Text(STANDARD.encode(bytes)), true),
    }
}

/// `reqwest` errors hide the cause (refused, TLS alert, ...) in their source
/// chain.
fn error_chain(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn proxy() -> MtlsProxy {
        MtlsProxy::new(BackendConfig {
            host: "sap.example.com".to_string(),
            port: 44300,
            verify_backend_certificate: true,
            timeout: Duration::from_secs(5),
        })
    }

    fn ctx(path: &str, query: &[(&str, &str)]) -> RequestContext {
        RequestContext {
            user_id: "S0001".to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            headers: vec![],
            body: None,
            force_regenerate: false,
        }
    }

    #[test]
    fn backend_url_joins_host_port_path_and_query() {
        let url = proxy()
            .backend_url(&ctx("/sap/opu/odata/X", &[("$top", "2"), ("sap-client", "100")]))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sap.example.com:44300/sap/opu/odata/X?%24top=2&sap-client=100"
        );
    }

    #[test]
    fn backend_url_without_query_has_no_question_mark() {
        let url = proxy().backend_url(&ctx("/ping", &[])).unwrap();
        assert_eq!(url.as_str(), "https://sap.example.com:44300/ping");
    }

    #[test]
    fn json_is_negotiated_by_media_type() {
        let yes = vec![("Content-Type".to_string(), "application/json; charset=utf-8".to_string())];
        let no = vec![("content-type".to_string(), "text/plain".to_string())];
        assert!(negotiates_json(&yes));
        assert!(!negotiates_json(&no));
        assert!(!negotiates_json(&[]));
    }

    #[test]
    fn decode_body_prefers_json_when_negotiated() {
        assert_eq!(
            decode_body(br#"{"d":1}"#, true),
            (EnvelopeBody::Json(serde_json::json!({"d": 1})), false)
        );
        assert_eq!(
            decode_body(br#"{"d":1}"#, false),
            (EnvelopeBody::Text(r#"{"d":1}"#.to_string()), false)
        );
    }

    #[test]
    fn decode_body_falls_back_to_text_for_invalid_json() {
        assert_eq!(
            decode_body(b"<html/>", true),
            (EnvelopeBody::Text("<html/>".to_string()), false)
        );
    }

    #[test]
    fn decode_body_base64_encodes_binary() {
        assert_eq!(
            decode_body(&[0xff, 0x00], false),
            (EnvelopeBody::Text("/wA=".to_string()), true)
        );
    }

    #[test]
    fn invalid_header_value_is_invalid_request() {
        let err = to_header_map(&[("accept".to_string(), "a\nb".to_string())]).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }
}
