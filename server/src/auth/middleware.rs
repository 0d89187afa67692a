use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use super::jwt::IdentityVerifier;

/// Authenticated username extracted from `Authorization: Bearer <token>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        // Set by the inject_verifier layer in routes
        let verifier = parts
            .extensions
            .get::<Verifier>()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

        let username = verifier
            .0
            .verify(token)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser(username))
    }
}

/// Identity verifier stored in request extensions for the AuthUser extractor.
#[derive(Clone)]
pub struct Verifier(pub Arc<IdentityVerifier>);
