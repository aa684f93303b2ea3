//! Bearer token verification
//!
//! Tokens are HS256-signed. The principal forwarded to backends is the
//! token's `id` claim.

use hyper::header::AUTHORIZATION;
use hyper::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

/// Claims the gateway reads; `exp` is checked by the validator when present
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    /// User id, a string or a number depending on the issuer
    pub id: serde_json::Value,
}

impl Claims {
    pub fn principal(&self) -> Option<String> {
        match &self.id {
            serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("Token missing")]
    Missing,

    #[error("Malformed token")]
    Malformed,

    #[error("Invalid or expired token")]
    Invalid(String),
}

impl AuthError {
    /// 401 for an absent credential, 403 for a rejected one
    pub fn status(&self) -> u16 {
        match self {
            AuthError::Missing | AuthError::Malformed => 401,
            AuthError::Invalid(_) => 403,
        }
    }
}

#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is checked when present but not required
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::Invalid(e.to_string()))
    }

    /// Principal carried by the `Authorization: Bearer` header
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, AuthError> {
        let header = headers
            .get(AUTHORIZATION)
            .ok_or(AuthError::Missing)?
            .to_str()
            .map_err(|_| AuthError::Malformed)?;

        let token = header
            .split_whitespace()
            .nth(1)
            .ok_or(AuthError::Malformed)?;

        self.verify(token)?
            .principal()
            .ok_or_else(|| AuthError::Invalid("token carries no user id".to_string()))
    }
}
