//! Inbound gateway proxy event and the request context derived from it.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

/// The HTTP part of an API gateway proxy event.
///
/// Only the fields the proxy forwards are modelled; identity claims are read
/// from the raw event by the identity resolver.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEvent {
    /// HTTP method (`GET` if absent).
    #[serde(default)]
    pub http_method: Option<String>,
    /// Request path (`/` if absent).
    #[serde(default)]
    pub path: Option<String>,
    /// Query string parameters; the gateway sends `null` when there are none.
    #[serde(default)]
    pub query_string_parameters: Option<BTreeMap<String, String>>,
    /// Request headers, original casing.
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
    /// Request body.
    #[serde(default)]
    pub body: Option<String>,
    /// Whether `body` is base64.
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// Everything the proxy needs to make one backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Resolved identity.
    pub user_id: String,
    /// HTTP method, upper case.
    pub method: String,
    /// Request path, always starting with `/`.
    pub path: String,
    /// Query parameters.
    pub query: BTreeMap<String, String>,
    /// Inbound headers, unfiltered.
    pub headers: Vec<(String, String)>,
    /// Decoded request body.
    pub body: Option<Vec<u8>>,
    /// Regenerate the certificate even if the stored one is valid.
    pub force_regenerate: bool,
}

impl RequestContext {
    /// Build the context for `user_id` from a raw gateway event.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidRequest` if the event is not a proxy event or a
    /// base64 body does not decode.
    pub fn from_event(event: &Value, user_id: String, force_regenerate: bool) -> Result<Self> {
        let event: ProxyEvent = serde_json::from_value(event.clone())
            .map_err(|e| Error::InvalidRequest(format!("Malformed proxy event: {e}")))?;

        let body = match event.body {
            Some(body) if event.is_base64_encoded => Some(
                STANDARD
                    .decode(body.trim())
                    .map_err(|e| Error::InvalidRequest(format!("Body is not valid base64: {e}")))?,
            ),
            Some(body) => Some(body.into_bytes()),
            None => None,
        };

        let path = match event.path {
            Some(path) if path.starts_with('/') => path,
            Some(path) => format!("/{path}"),
            None => "/".to_string(),
        };

        Ok(Self {
            user_id,
            method: event
                .http_method
                .map_or_else(|| "GET".to_string(), |m| m.to_ascii_uppercase()),
            path,
            query: event.query_string_parameters.unwrap_or_default(),
            headers: event.headers.unwrap_or_default().into_iter().collect(),
            body,
            force_regenerate,
        })
    }
}
