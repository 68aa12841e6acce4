use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    models::TokenData,
};

/// Claims
///
/// Payload of an access token. The identity fields are optional on the wire so a
/// token missing any of them decodes and is then rejected with `InvalidToken`
/// instead of a generic deserialization error.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Numeric user id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i32>,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
    /// Issued at (seconds since epoch).
    pub iat: i64,
}

// --- Passwords ---

/// Hashes with bcrypt at `DEFAULT_COST`. Every call uses a fresh salt.
pub fn hash_password(plain: &str) -> AppResult<String> {
    hash_password_with_cost(plain, bcrypt::DEFAULT_COST)
}

pub fn hash_password_with_cost(plain: &str, cost: u32) -> AppResult<String> {
    bcrypt::hash(plain, cost)
        .map_err(|e| AppError::Internal(format!("Failed to hash password: {}", e)))
}

/// Checks `plain` against a stored bcrypt hash. A malformed hash never verifies.
pub fn verify_password(plain: &str, hashed: &str) -> bool {
    match bcrypt::verify(plain, hashed) {
        Ok(valid) => valid,
        Err(e) => {
            tracing::warn!("Password verification failed on stored hash: {}", e);
            false
        }
    }
}

// --- Tokens ---

/// Signs a token for `data` that expires `ttl` after issuance.
pub fn issue_token(config: &AppConfig, data: &TokenData, ttl: Duration) -> AppResult<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: Some(data.email.clone()),
        role: Some(data.role.clone()),
        id: Some(data.id),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::new(config.jwt_algorithm),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

/// Verifies signature and expiry and extracts the identity claims.
pub fn decode_token(config: &AppConfig, token: &str) -> AppResult<TokenData> {
    let mut validation = Validation::new(config.jwt_algorithm);
    validation.validate_exp = true;
    // Expiry is exact; no grace window past `exp`.
    validation.leeway = 0;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!("Token rejected: {:?}", e.kind());
        AppError::InvalidToken
    })?;

    match token_data.claims {
        Claims {
            sub: Some(email),
            role: Some(role),
            id: Some(id),
            ..
        } => Ok(TokenData { email, role, id }),
        _ => {
            tracing::debug!("Token rejected: email, role, or id missing from payload");
            Err(AppError::InvalidToken)
        }
    }
}

// --- Request Extractor ---

/// AuthUser
///
/// The resolved identity of an authenticated request, decoded from the bearer
/// token. Any handler taking an `AuthUser` argument is authenticated; a missing or
/// invalid token rejects the request with 401 and `WWW-Authenticate: Bearer`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case("admin")
    }

    /// Fails with `Forbidden` unless the caller's role is admin (case-insensitive).
    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            tracing::warn!(user_id = self.id, role = %self.role, "Admin privileges required");
            Err(AppError::Forbidden("Admin privileges required".to_string()))
        }
    }
}

impl From<TokenData> for AuthUser {
    fn from(data: TokenData) -> Self {
        AuthUser {
            id: data.id,
            email: data.email,
            role: data.role,
        }
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or_else(|| AppError::Unauthenticated("Not authenticated".to_string()))?;

        decode_token(&config, token).map(AuthUser::from)
    }
}

/// Strips a case-insensitive `Bearer ` scheme prefix.
fn bearer_token(header_value: &str) -> Option<&str> {
    let (scheme, token) = header_value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
