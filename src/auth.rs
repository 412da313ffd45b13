//! Bearer token validation.

use std::time::Duration;

use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Resolves a bearer token to a user id.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<String, AuthError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,
    /// Expiration time (as Unix timestamp).
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// HS256 tokens signed with a shared secret.
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    pub fn issue(&self, user_id: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            exp: now + ttl.as_secs() as i64,
            iat: Some(now),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> Result<String, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::MissingSubject);
        }
        Ok(data.claims.sub)
    }
}

/// Extracts `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn issued_token_round_trips() {
        let jwt = JwtValidator::new("secret");
        let token = jwt.issue("alice", Duration::from_secs(60)).unwrap();
        assert_eq!(jwt.validate(&token).unwrap(), "alice");
    }

    #[test]
    fn foreign_secret_and_garbage_are_rejected() {
        let ours = JwtValidator::new("secret");
        let theirs = JwtValidator::new("other");
        let token = theirs.issue("mallory", Duration::from_secs(60)).unwrap();
        assert!(ours.validate(&token).is_err());
        assert!(ours.validate("not-a-token").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let jwt = JwtValidator::new("secret");
        let claims = Claims {
            sub: "alice".into(),
            exp: Utc::now().timestamp() - 3600,
            iat: None,
        };
        let token = encode(&Header::default(), &claims, &jwt.encoding).unwrap();
        assert!(matches!(
            jwt.validate(&token),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn bearer_header_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
