//! Header filtering on the way in, cookie lifting on the way out.

use std::collections::BTreeMap;

use reqwest::header::{HeaderMap, SET_COOKIE};

/// Inbound headers forwarded to the backend (compared case-insensitively).
pub const ALLOWED_REQUEST_HEADERS: [&str; 7] = [
    "accept",
    "accept-language",
    "dataserviceversion",
    "maxdataserviceversion",
    "content-type",
    "x-csrf-token",
    "cookie",
];

/// Encoding negotiated with the backend on every request.
pub const ACCEPT_ENCODING: (&str, &str) = ("accept-encoding", "deflate br");

/// Multi-value key that carries backend cookies in the envelope.
pub const SET_COOKIE_KEY: &str = "Set-Cookie";

/// Keep allow-listed headers with their original casing and append
/// `accept-encoding: deflate br`.
pub fn filter_request_headers<I, K, V>(headers: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut kept: Vec<(String, String)> = headers
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .filter(|(name, _)| is_allowed(name))
        .collect();
    kept.push((ACCEPT_ENCODING.0.to_string(), ACCEPT_ENCODING.1.to_string()));
    kept
}

/// Whether an inbound header name is on the allow-list.
#[must_use]
pub fn is_allowed(name: &str) -> bool {
    ALLOWED_REQUEST_HEADERS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(name))
}

/// Split backend headers into single-valued headers and `Set-Cookie` values.
///
/// Repeated non-cookie headers are joined with `", "`. Values that are not
/// valid UTF-8 are converted lossily.
#[must_use]
pub fn lift_set_cookie(headers: &HeaderMap) -> (BTreeMap<String, String>, Vec<String>) {
    let mut single: BTreeMap<String, String> = BTreeMap::new();
    let mut cookies = Vec::new();

    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        if name == SET_COOKIE {
            cookies.push(value);
            continue;
        }
        single
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    (single, cookies)
}
