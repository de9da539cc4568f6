use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_core::LedgerId;

/// Token claims model (transport-agnostic).
///
/// The minimal set of claims expected once a bearer token has been decoded
/// and its signature verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the credential identifier (opaque to this service).
    pub sub: String,

    /// Ledger the credential is authoritative for.
    pub ledger_id: LedgerId,

    /// Issued-at timestamp.
    #[serde(rename = "iat", with = "chrono::serde::ts_seconds")]
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    #[serde(rename = "exp", with = "chrono::serde::ts_seconds")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate token claims.
///
/// This validates the *claims* only; signature verification happens in the
/// [`TokenValidator`] implementation.
pub fn validate_claims(
    claims: &TokenClaims,
    now: DateTime<Utc>,
) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

/// Token validator abstraction (keeps the API decoupled from token decoding).
pub trait TokenValidator: Send + Sync {
    fn validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenValidationError>;
}

/// Minimal HS256 validator (signature verification + claims validation).
#[derive(Debug, Clone)]
pub struct Hs256TokenValidator {
    secret: Vec<u8>,
}

impl Hs256TokenValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl TokenValidator for Hs256TokenValidator {
    fn validate(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenValidationError> {
        if token.trim().is_empty() {
            return Err(TokenValidationError::MissingToken);
        }

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        // exp/iat are validated deterministically above, against the caller's
        // clock, so tests can pin `now`.
        validation.validate_exp = false;
        validation.validate_nbf = false;

        let decoded = jsonwebtoken::decode::<TokenClaims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(&self.secret),
            &validation,
        )
        .map_err(|e| TokenValidationError::InvalidToken(e.to_string()))?;

        validate_claims(&decoded.claims, now)?;
        Ok(decoded.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(now: DateTime<Utc>) -> TokenClaims {
        TokenClaims {
            sub: "key-1".to_string(),
            ledger_id: LedgerId::new(),
            issued_at: now,
            expires_at: now + Duration::minutes(10),
        }
    }

    fn encode(claims: &TokenClaims, secret: &str) -> String {
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            claims,
            &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_resolves_claims() {
        let now = Utc::now();
        let c = claims(now);
        let token = encode(&c, "secret");

        let validator = Hs256TokenValidator::new("secret".as_bytes().to_vec());
        let decoded = validator.validate(&token, now + Duration::seconds(1)).unwrap();
        assert_eq!(decoded.ledger_id, c.ledger_id);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let token = encode(&claims(now), "secret");

        let validator = Hs256TokenValidator::new("other".as_bytes().to_vec());
        assert!(matches!(
            validator.validate(&token, now),
            Err(TokenValidationError::InvalidToken(_))
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let c = claims(now);
        let token = encode(&c, "secret");

        let validator = Hs256TokenValidator::new("secret".as_bytes().to_vec());
        assert_eq!(
            validator.validate(&token, now + Duration::hours(1)),
            Err(TokenValidationError::Expired)
        );
    }

    #[test]
    fn inverted_time_window_is_rejected() {
        let now = Utc::now();
        let mut c = claims(now);
        c.expires_at = c.issued_at - Duration::seconds(1);
        assert_eq!(
            validate_claims(&c, now),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }
}
