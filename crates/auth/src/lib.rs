//! Bearer-token verification for the gateway.
//!
//! The gateway is the single point of authentication: it verifies the
//! inbound bearer token, consults the revocation blacklist in the counting
//! store, and attaches the resolved [`Identity`] to the request so later
//! stages (rate limiting, header propagation) can key off the subject.
//! Downstream services trust the propagated identity header and never see
//! the raw token verification mechanics.
//!
//! Blacklist lookups depend on the counting store being reachable. What
//! happens when it is not is a named policy decision
//! (`SecurityConfig.blacklist_check`), not an inlined judgment call: the
//! shipped default fails open, matching the rate limiter.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use thiserror::Error;
use tollgate_common::DependencyPolicy;
use tollgate_counter::CountingStore;
use tracing::{debug, warn};

/// A validated caller identity.
#[derive(Debug, Clone)]
pub struct Identity {
    /// The token's `sub` claim.
    pub subject: String,
    /// The full claim set, opaque to the pipeline.
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// Why a credential was rejected.
///
/// The display strings double as the client-visible error messages; they
/// carry no verifier internals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,

    #[error("Invalid authorization format")]
    InvalidFormat,

    #[error("Token has been revoked")]
    Revoked,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Unable to validate token")]
    BlacklistUnavailable,
}

/// Verifies bearer tokens and checks revocation.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    store: Arc<dyn CountingStore>,
    blacklist_policy: DependencyPolicy,
}

impl TokenVerifier {
    pub fn new(
        secret: &str,
        store: Arc<dyn CountingStore>,
        blacklist_policy: DependencyPolicy,
    ) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            store,
            blacklist_policy,
        }
    }

    /// Verify the `Authorization` header value and resolve an identity.
    pub async fn verify(&self, authorization: Option<&str>) -> Result<Identity, AuthError> {
        let header = authorization.ok_or(AuthError::MissingHeader)?;
        let token = header
            .strip_prefix("Bearer ")
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::InvalidFormat)?;

        self.check_blacklist(token).await?;

        let data = jsonwebtoken::decode::<serde_json::Map<String, serde_json::Value>>(
            token,
            &self.decoding_key,
            &self.validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => {
                debug!(error = %e, "token validation failed");
                AuthError::InvalidToken
            }
        })?;

        let claims = data.claims;
        let subject = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .ok_or(AuthError::InvalidToken)?
            .to_string();

        debug!(subject = %subject, "request authenticated");
        Ok(Identity { subject, claims })
    }

    async fn check_blacklist(&self, token: &str) -> Result<(), AuthError> {
        let key = format!("blacklist:{}", token);
        match self.store.key_exists(&key).await {
            Ok(true) => Err(AuthError::Revoked),
            Ok(false) => Ok(()),
            Err(e) => {
                warn!(error = %e, "token blacklist check failed");
                if self.blacklist_policy.allows() {
                    Ok(())
                } else {
                    Err(AuthError::BlacklistUnavailable)
                }
            }
        }
    }
}
