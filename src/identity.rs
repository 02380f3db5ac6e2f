//! Caller identity resolution.
//!
//! The gateway has already authenticated the caller; this module only
//! extracts a stable user id from whichever claim shape the upstream
//! authenticator produced. Extraction is an ordered list of strategies, each
//! returning `Option<String>`, and the resolver takes the first hit.

use serde_json::Value;
use tracing::debug;

use crate::{Error, Result};

/// Message of the error raised when no strategy yields an identity.
pub const UNKNOWN_USER: &str = "Unknown User ID";

/// One way of locating the caller's user id in an inbound event.
pub trait IdentityStrategy: Send + Sync {
    /// Short label used in diagnostics.
    fn name(&self) -> &'static str;

    /// Extract a non-empty user id, or `None` to fall through.
    fn extract(&self, event: &Value) -> Option<String>;
}

/// Federated identity claim: `requestContext.authorizer.claims.identities.userId`.
///
/// API Gateway forwards Cognito claims as strings, so `identities` is
/// accepted either as an object or as a JSON-encoded object/array.
pub struct FederatedIdentityClaim;

impl IdentityStrategy for FederatedIdentityClaim {
    fn name(&self) -> &'static str {
        "federated_identity"
    }

    fn extract(&self, event: &Value) -> Option<String> {
        let identities = event.pointer("/requestContext/authorizer/claims/identities")?;
        match identities {
            Value::String(raw) => {
                let parsed: Value = serde_json::from_str(raw).ok()?;
                user_id_from_identities(&parsed)
            }
            other => user_id_from_identities(other),
        }
    }
}

fn user_id_from_identities(identities: &Value) -> Option<String> {
    match identities {
        Value::Object(_) => non_empty(identities.get("userId")?),
        Value::Array(entries) => entries
            .iter()
            .find_map(|entry| entry.get("userId").and_then(non_empty)),
        _ => None,
    }
}

/// User pool username claim: `requestContext.authorizer.claims["cognito:username"]`.
pub struct PoolUsernameClaim;

impl IdentityStrategy for PoolUsernameClaim {
    fn name(&self) -> &'static str {
        "pool_username"
    }

    fn extract(&self, event: &Value) -> Option<String> {
        event
            .pointer("/requestContext/authorizer/claims")?
            .get("cognito:username")
            .and_then(non_empty)
    }
}

/// IAM caller ARN: `requestContext.identity.userArn`.
///
/// `arn:aws:iam::123456789012:user/alice` resolves to `alice`.
pub struct CallerArn;

impl IdentityStrategy for CallerArn {
    fn name(&self) -> &'static str {
        "caller_arn"
    }

    fn extract(&self, event: &Value) -> Option<String> {
        let arn = event.pointer("/requestContext/identity/userArn")?.as_str()?;
        let resource = arn.splitn(6, ':').nth(5)?;
        let name = resource.strip_prefix("user/").unwrap_or(resource);
        (!name.is_empty()).then(|| name.to_string())
    }
}

/// Explicit identity for direct (non-gateway) invocations: `sapdemo.userid`.
pub struct DirectInvocationField;

impl IdentityStrategy for DirectInvocationField {
    fn name(&self) -> &'static str {
        "direct_invocation"
    }

    fn extract(&self, event: &Value) -> Option<String> {
        event.pointer("/sapdemo/userid").and_then(non_empty)
    }
}

fn non_empty(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Ordered fold over identity strategies.
pub struct IdentityResolver {
    strategies: Vec<Box<dyn IdentityStrategy>>,
    development_user: Option<String>,
}

impl IdentityResolver {
    /// Resolver with the standard strategy order and no fallback identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: vec![
                Box::new(FederatedIdentityClaim),
                Box::new(PoolUsernameClaim),
                Box::new(CallerArn),
                Box::new(DirectInvocationField),
            ],
            development_user: None,
        }
    }

    /// Substitute `user` when no strategy matches.
    ///
    /// Development only; production configurations leave this unset.
    #[must_use]
    pub fn with_development_user(mut self, user: Option<String>) -> Self {
        self.development_user = user.filter(|u| !u.trim().is_empty());
        self
    }

    /// Resolve the caller's user id from an inbound event.
    ///
    /// # Errors
    ///
    /// Returns `Error::IdentityResolution("Unknown User ID")` when every
    /// strategy falls through and no development user is configured.
    pub fn resolve(&self, event: &Value) -> Result<String> {
        let found = self.strategies.iter().find_map(|strategy| {
            strategy.extract(event).inspect(|user| {
                debug!(strategy = strategy.name(), user = %user, "Resolved caller identity");
            })
        });

        if let Some(user) = found {
            return Ok(user);
        }

        if let Some(ref user) = self.development_user {
            tracing::warn!(user = %user, "No identity claim present, using development user");
            return Ok(user.clone());
        }

        Err(Error::identity(UNKNOWN_USER))
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}
