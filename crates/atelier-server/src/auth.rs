//! Bearer token verification.

use std::time::Duration;

use atelier_protocol::{HandshakeRejection, UserId};
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("no auth token supplied")]
    Missing,
    #[error("auth token is not a JWT: {0}")]
    Malformed(String),
    #[error("auth token rejected: {0}")]
    Invalid(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl AuthError {
    /// What the client is told.
    pub fn rejection(&self) -> HandshakeRejection {
        match self {
            Self::Missing | Self::Malformed(_) => HandshakeRejection::Unauthenticated,
            Self::Invalid(_) | Self::Signing(_) => HandshakeRejection::InvalidToken,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// HS256 token issuer and verifier.
#[derive(Clone)]
pub struct JwtAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
}

impl JwtAuthority {
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss"]);
        validation.set_issuer(&[issuer.as_str()]);
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            issuer,
        }
    }

    /// Resolve a handshake token to the user it was issued for.
    pub fn verify(&self, token: Option<&str>) -> Result<UserId, AuthError> {
        let token = token.map(str::trim).filter(|t| !t.is_empty());
        let token = token.ok_or(AuthError::Missing)?;

        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => AuthError::Malformed(e.to_string()),
                _ => AuthError::Invalid(e.to_string()),
            }
        })?;

        let sub = data.claims.sub.trim();
        if sub.is_empty() {
            return Err(AuthError::Invalid("empty subject".into()));
        }
        Ok(UserId::new(sub))
    }

    /// Mint a token for `user`, valid for `ttl`.
    pub fn issue(&self, user: &UserId, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: user.as_str().to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now.saturating_add(ttl),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority() -> JwtAuthority {
        JwtAuthority::new(b"test-secret", "atelier")
    }

    #[test]
    fn issued_tokens_verify() {
        let auth = authority();
        let token = auth.issue(&UserId::new("alice"), Duration::from_secs(60)).unwrap();
        assert_eq!(auth.verify(Some(&token)).unwrap(), UserId::new("alice"));
    }

    #[test]
    fn missing_and_garbage_are_unauthenticated() {
        let auth = authority();
        for token in [None, Some(""), Some("   "), Some("not-a-token"), Some("a.b.c")] {
            let err = auth.verify(token).unwrap_err();
            assert_eq!(
                err.rejection(),
                HandshakeRejection::Unauthenticated,
                "{token:?}: {err}"
            );
        }
    }

    #[test]
    fn bad_signature_and_expiry_are_invalid() {
        let auth = authority();
        let other = JwtAuthority::new(b"other-secret", "atelier");
        let forged = other.issue(&UserId::new("mallory"), Duration::from_secs(60)).unwrap();
        assert_eq!(
            auth.verify(Some(&forged)).unwrap_err().rejection(),
            HandshakeRejection::InvalidToken
        );

        let now = Utc::now().timestamp();
        let expired = encode(
            &Header::new(Algorithm::HS256),
            &Claims {
                sub: "alice".into(),
                iss: "atelier".into(),
                iat: now - 7_200,
                exp: now - 3_600,
            },
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(
            auth.verify(Some(&expired)).unwrap_err().rejection(),
            HandshakeRejection::InvalidToken
        );

        let wrong_issuer = JwtAuthority::new(b"test-secret", "someone-else")
            .issue(&UserId::new("alice"), Duration::from_secs(60))
            .unwrap();
        assert_eq!(
            auth.verify(Some(&wrong_issuer)).unwrap_err().rejection(),
            HandshakeRejection::InvalidToken
        );
    }
}
