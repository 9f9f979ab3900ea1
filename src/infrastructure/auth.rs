//! Bearer-token authentication for the HTTP surface.
//!
//! Sessions are stateless HS256 JWTs carrying the user id and role. Handlers
//! take an `AuthenticatedUser` extractor that reads the shared state from
//! request extensions, honours the development bypass user when one is
//! configured, and otherwise validates the `Authorization` header.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::{
    domain::models::{Role, User},
    infrastructure::state::AppState,
    services::errors::ServiceError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    fn for_user(user: &User, valid_for: Duration) -> Result<Self, ServiceError> {
        let ttl = chrono::Duration::from_std(valid_for)
            .map_err(|_| ServiceError::Internal("session lifetime out of range".into()))?;
        Ok(Self {
            sub: user.id,
            role: user.role,
            exp: (chrono::Utc::now() + ttl).timestamp() as usize,
        })
    }
}

/// Signing and verification keys derived from the configured secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map(|data| data.claims)
    }
}

pub fn issue_token(state: &AppState, user: &User) -> Result<String, ServiceError> {
    let claims = Claims::for_user(user, state.config.jwt_ttl())?;
    state
        .jwt_keys
        .sign(&claims)
        .map_err(|err| ServiceError::Internal(err.to_string()))
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,
    #[error("invalid authorization token")]
    BadToken,
    #[error("application state unavailable")]
    NoState,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Identity attached to a request once authentication has passed.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub role: Role,
}

#[async_trait]
impl FromRequestParts<()> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &()) -> Result<Self, Self::Rejection> {
        let Some(state) = parts.extensions.get::<Arc<AppState>>() else {
            return Err(AuthError::NoState);
        };

        match state.resolve_bypass_user().await {
            Ok(Some(user)) => return Ok(user),
            Ok(None) => {}
            Err(err) => warn!(error = ?err, "bypass user lookup failed"),
        }

        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            return Err(AuthError::MissingHeader);
        };
        let token = bearer_token(value).ok_or(AuthError::BadToken)?;
        match state.jwt_keys.verify(token) {
            Ok(claims) => Ok(AuthenticatedUser {
                user_id: claims.sub,
                role: claims.role,
            }),
            Err(err) => {
                warn!(error = ?err, "token verification failed");
                Err(AuthError::BadToken)
            }
        }
    }
}

fn bearer_token(value: &HeaderValue) -> Option<&str> {
    let text = value.to_str().ok()?;
    let (scheme, token) = text.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
