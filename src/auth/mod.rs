use std::fmt;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::{AppError, Result};

/// Opaque bearer token issued by the identity provider.
///
/// Only ever placed in the channel address query string, never in a message body
/// and never in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// What the identity provider hands over at mount time.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub credential: Credential,
    /// Opaque to the client; only used for diagnostics.
    pub credential_expiry: Option<DateTime<Utc>>,
}

/// Claims we read from the provider's access token
#[derive(Debug, Deserialize)]
struct AccessTokenClaims {
    sub: String,
    #[serde(default)]
    exp: Option<i64>,
}

impl Identity {
    pub fn new(
        user_id: impl Into<String>,
        credential: Credential,
        credential_expiry: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            credential,
            credential_expiry,
        }
    }

    /// Build an identity from a bare access token by reading its `sub` and `exp`
    /// claims. The signature is not checked here; the signaling service does that
    /// when the channel is opened.
    pub fn from_access_token(token: &str) -> Result<Self> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<AccessTokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;

        if data.claims.sub.is_empty() {
            return Err(AppError::InvalidCredential(
                "Token has an empty subject".to_string(),
            ));
        }

        Ok(Self {
            user_id: data.claims.sub,
            credential: Credential::new(token),
            credential_expiry: data
                .claims
                .exp
                .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0)),
        })
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.credential_expiry.is_some_and(|expiry| expiry <= now)
    }
}
