use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Claims carried by a relay credential.
/// Only `username` is required; `exp` is enforced when present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Validates bearer credentials against the process-wide HMAC secret.
///
/// Any HS256/HS384/HS512 signature is accepted; every other algorithm family
/// is rejected before the signature is checked.
#[derive(Clone)]
pub struct IdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl IdentityVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.required_spec_claims = HashSet::new();
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Return the `username` claim of a valid credential.
    /// A leading `Bearer ` is tolerated.
    pub fn verify(&self, credential: &str) -> Result<String, AuthError> {
        let token = credential.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Credential rejected");
            AuthError
        })?;

        match data.claims.username {
            Some(username) if !username.is_empty() => Ok(username),
            _ => {
                tracing::debug!("Credential has no username claim");
                Err(AuthError)
            }
        }
    }
}

/// Issue an HS256 credential for `username`.
/// `ttl_secs` of `None` produces a credential without expiry.
pub fn issue_token(
    secret: &[u8],
    username: &str,
    ttl_secs: Option<i64>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        username: Some(username.to_string()),
        iat: Some(now),
        exp: ttl_secs.map(|ttl| now + ttl),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
}

/// Resolve the verification secret: the configured value when present,
/// otherwise a 256-bit key persisted in data_dir/jwt_secret.
pub fn resolve_secret(
    configured: Option<&str>,
    data_dir: &str,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    match configured {
        Some(secret) if !secret.is_empty() => {
            tracing::info!("Using configured JWT secret");
            Ok(secret.as_bytes().to_vec())
        }
        _ => load_or_generate_jwt_secret(data_dir),
    }
}

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT secret loaded from {}", key_path.display());
            return Ok(key);
        }
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT secret generated at {}", key_path.display());
    Ok(key.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret-test-secret-test-sec";

    fn sign_with(header: Header, claims: &serde_json::Value, secret: &[u8]) -> String {
        encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[test]
    fn test_valid_token_yields_username() {
        let verifier = IdentityVerifier::new(SECRET);
        let token = issue_token(SECRET, "alice", Some(60)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn test_bearer_prefix_tolerated() {
        let verifier = IdentityVerifier::new(SECRET);
        let token = issue_token(SECRET, "alice", None).unwrap();
        assert_eq!(verifier.verify(&format!("Bearer {}", token)).unwrap(), "alice");
    }

    #[test]
    fn test_hs512_accepted() {
        let verifier = IdentityVerifier::new(SECRET);
        let token = sign_with(
            Header::new(Algorithm::HS512),
            &serde_json::json!({ "username": "bob" }),
            SECRET,
        );
        assert_eq!(verifier.verify(&token).unwrap(), "bob");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let verifier = IdentityVerifier::new(SECRET);
        let token = issue_token(b"some-other-secret", "alice", None).unwrap();
        assert_eq!(verifier.verify(&token), Err(AuthError));
    }

    #[test]
    fn test_missing_or_empty_username_rejected() {
        let verifier = IdentityVerifier::new(SECRET);
        let missing = sign_with(Header::default(), &serde_json::json!({ "sub": "alice" }), SECRET);
        let empty = sign_with(Header::default(), &serde_json::json!({ "username": "" }), SECRET);
        assert_eq!(verifier.verify(&missing), Err(AuthError));
        assert_eq!(verifier.verify(&empty), Err(AuthError));
    }

    #[test]
    fn test_non_string_username_rejected() {
        let verifier = IdentityVerifier::new(SECRET);
        let token = sign_with(Header::default(), &serde_json::json!({ "username": 42 }), SECRET);
        assert_eq!(verifier.verify(&token), Err(AuthError));
    }

    #[test]
    fn test_expired_token_rejected() {
        let verifier = IdentityVerifier::new(SECRET);
        let token = issue_token(SECRET, "alice", Some(-3600)).unwrap();
        assert_eq!(verifier.verify(&token), Err(AuthError));
    }

    #[test]
    fn test_garbage_rejected() {
        let verifier = IdentityVerifier::new(SECRET);
        assert_eq!(verifier.verify("not-a-jwt"), Err(AuthError));
        assert_eq!(verifier.verify(""), Err(AuthError));
    }

    #[test]
    fn test_secret_persisted_across_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();

        let first = load_or_generate_jwt_secret(dir).unwrap();
        let second = load_or_generate_jwt_secret(dir).unwrap();
        assert_eq!(first.len(), 32);
        assert_eq!(first, second);
    }

    #[test]
    fn test_configured_secret_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_str().unwrap();

        let secret = resolve_secret(Some("from-env"), dir).unwrap();
        assert_eq!(secret, b"from-env");
        assert!(!tmp.path().join("jwt_secret").exists());
    }
}
