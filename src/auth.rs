// Authentication: verification of identity-provider JWTs and the axum
// extractor that resolves them to local user rows.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config;
use crate::db::Database;

// ── JWT ──────────────────────────────────────────────────────────────

/// Shared secret the identity provider signs tokens with.
fn jwt_secret() -> Vec<u8> {
    std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "wargames-dev-secret-change-in-production".to_string())
        .into_bytes()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Identity-provider subject; mapped to a local user row on first sight.
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize, // expiry (unix timestamp)
}

/// Mint a token the way the identity provider would. Used by tests and
/// local tooling; production tokens arrive from the outside.
pub fn create_token(subject: &str, email: Option<&str>) -> Result<String, String> {
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: subject.to_string(),
        email: email.map(|e| e.to_string()),
        exp: expiration,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(&jwt_secret()),
    )
    .map_err(|e| format!("Failed to create token: {e}"))
}

pub fn verify_token(token: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(&jwt_secret()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| format!("Invalid token: {e}"))
}

// ── Axum extractor: AuthUser ─────────────────────────────────────────

/// The authenticated caller, resolved to a local user row.
/// Usage: `user: AuthUser` in handler parameters.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub subject: String,
}

// Same error envelope the handlers emit, so clients can key on `code`
// for every status
fn rejection(
    status: StatusCode,
    code: &str,
    message: &str,
) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({ "error": message, "code": code })),
    )
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = match bearer_claims(parts) {
            Ok(claims) => claims,
            Err(denied) => {
                // Local mode serves a fixed development identity instead
                // of rejecting unauthenticated requests
                if config::is_local_mode() {
                    Claims {
                        sub: config::LOCAL_SUBJECT.to_string(),
                        email: None,
                        exp: 0,
                    }
                } else {
                    return Err(denied);
                }
            }
        };

        let db = parts.extensions.get::<Arc<Database>>().cloned().ok_or_else(|| {
            rejection(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Database not available",
            )
        })?;

        match db.ensure_user(&claims.sub).await {
            Ok(user) => Ok(AuthUser {
                user_id: user.id,
                subject: user.subject,
            }),
            Err(e) => {
                tracing::error!("Failed to resolve user for subject {}: {e}", claims.sub);
                Err(rejection(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal error",
                ))
            }
        }
    }
}

fn bearer_claims(parts: &Parts) -> Result<Claims, (StatusCode, Json<serde_json::Value>)> {
    let auth_header = parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            rejection(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Missing Authorization header",
            )
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        rejection(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Invalid Authorization header format",
        )
    })?;

    verify_token(token)
        .map_err(|_| rejection(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid token"))
}
