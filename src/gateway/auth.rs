//! Identity token validation and authentication middleware.

use axum::{body::Body, extract::{Request, State}, middleware::Next, response::Response};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::AppState;

/// Identity token claims.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,
    /// Username, which keys the tenant database.
    pub username: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
}

/// Authenticated user extracted from a validated identity token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// User ID from the identity database.
    pub user_id: i64,
    /// Username.
    pub username: String,
}

impl AuthenticatedUser {
    /// Name of this user's tenant database.
    pub fn tenant_name(&self) -> String {
        format!("note_{}", self.username)
    }
}

/// Generate a signed identity token.
pub fn generate_jwt(
    user_id: i64,
    username: &str,
    secret: &str,
    expiry_secs: u64,
) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: now + expiry_secs as i64,
        iat: now,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

/// Validate an identity token and return its claims.
pub fn validate_jwt(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;

    Ok(token_data.claims)
}

/// Turn validated claims into an [`AuthenticatedUser`].
pub fn user_from_claims(claims: Claims) -> Result<AuthenticatedUser, ApiError> {
    let user_id = claims.sub.parse().map_err(|_| ApiError::Unauthorized)?;
    Ok(AuthenticatedUser {
        user_id,
        username: claims.username,
    })
}

/// Paths that never require an identity token.
fn is_public_path(path: &str) -> bool {
    matches!(
        path,
        "/health"
            | "/ready"
            | "/api/auth/login"
            | "/api/auth/signup"
            | "/api/auth/social"
            | "/api/auth/logout"
    ) || path.starts_with("/uploads/")
        // The sync channel validates its own upgrade-time token.
        || path == "/ws"
}

/// Authentication middleware validating the bearer identity token.
///
/// On success the [`AuthenticatedUser`] is attached to the request
/// extensions for handlers to extract.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if is_public_path(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let secret = state
        .config
        .auth
        .jwt_secret
        .as_deref()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("JWT secret not configured")))?;

    let claims = validate_jwt(token, secret).map_err(|_| ApiError::Unauthorized)?;
    let user = user_from_claims(claims)?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
