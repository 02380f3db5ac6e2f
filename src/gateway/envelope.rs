//! Response envelope returned to the API gateway.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};

use super::filter::SET_COOKIE_KEY;
use crate::Error;

/// CORS header present on every envelope.
pub const ALLOW_ORIGIN: (&str, &str) = ("Access-Control-Allow-Origin", "*");

/// Envelope body: JSON when JSON was negotiated, raw text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnvelopeBody {
    /// Decoded JSON document.
    Json(Value),
    /// Raw text, or base64 when `is_base64_encoded` is set.
    Text(String),
}

impl Default for EnvelopeBody {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

/// Uniform response handed back to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    /// HTTP status.
    pub status_code: u16,
    /// Single-valued response headers.
    pub headers: BTreeMap<String, String>,
    /// Multi-valued headers; only `Set-Cookie` is ever placed here.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    /// Response body.
    pub body: EnvelopeBody,
    /// Whether `body` is base64 text.
    pub is_base64_encoded: bool,
}

impl ResponseEnvelope {
    /// Envelope for a backend response.
    #[must_use]
    pub fn from_backend(
        status_code: u16,
        headers: BTreeMap<String, String>,
        cookies: Vec<String>,
        body: EnvelopeBody,
        is_base64_encoded: bool,
    ) -> Self {
        let mut multi_value_headers = BTreeMap::new();
        if !cookies.is_empty() {
            multi_value_headers.insert(SET_COOKIE_KEY.to_string(), cookies);
        }
        Self {
            status_code,
            headers,
            multi_value_headers,
            body,
            is_base64_encoded,
        }
        .with_cors()
    }

    /// `500 {"error": message}` for a backend that could not be reached.
    #[must_use]
    pub fn transport_failure(message: &str) -> Self {
        Self::failure(500, message)
    }

    /// Failure envelope for an error raised before or around the backend call.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self::failure(error.status_code(), &error.to_string())
    }

    fn failure(status_code: u16, message: &str) -> Self {
        Self {
            status_code,
            headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            multi_value_headers: BTreeMap::new(),
            body: EnvelopeBody::Json(json!({ "error": message })),
            is_base64_encoded: false,
        }
        .with_cors()
    }

    /// Set `Access-Control-Allow-Origin: *`, replacing any backend value.
    #[must_use]
    pub fn with_cors(mut self) -> Self {
        self.headers
            .retain(|name, _| !name.eq_ignore_ascii_case(ALLOW_ORIGIN.0));
        self.headers
            .insert(ALLOW_ORIGIN.0.to_string(), ALLOW_ORIGIN.1.to_string());
        self
    }

    /// Error message of a failure envelope.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match &self.body {
            EnvelopeBody::Json(body) => body.get("error").and_then(Value::as_str),
            EnvelopeBody::Text(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn backend_envelope_carries_cors_and_cookies() {
        let envelope = ResponseEnvelope::from_backend(
            200,
            BTreeMap::from([("access-control-allow-origin".to_string(), "https://x".to_string())]),
            vec!["a=1".to_string(), "b=2".to_string()],
            EnvelopeBody::Text("ok".to_string()),
            false,
        );

        assert_eq!(
            envelope.headers,
            BTreeMap::from([("Access-Control-Allow-Origin".to_string(), "*".to_string())])
        );
        assert_eq!(
            envelope.multi_value_headers.get("Set-Cookie"),
            Some(&vec!["a=1".to_string(), "b=2".to_string()])
        );
    }

    #[test]
    fn serializes_with_gateway_field_names() {
        let envelope = ResponseEnvelope::transport_failure("connection refused");
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["statusCode"], 500);
        assert_eq!(json["body"]["error"], "connection refused");
        assert_eq!(json["isBase64Encoded"], false);
        assert_eq!(json["headers"]["Access-Control-Allow-Origin"], "*");
        assert!(json.get("multiValueHeaders").is_none());
    }

    #[test]
    fn identity_error_becomes_401() {
        let envelope = ResponseEnvelope::from_error(&Error::identity("Unknown User ID"));
        assert_eq!(envelope.status_code, 401);
        assert_eq!(envelope.error_message(), Some("Unknown User ID"));
    }

    #[test]
    fn text_body_serializes_as_string() {
        let envelope = ResponseEnvelope::from_backend(
            204,
            BTreeMap::new(),
            vec![],
            EnvelopeBody::default(),
            false,
        );
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["body"], "");
    }
}
