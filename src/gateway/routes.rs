//! Auth endpoints: signup, login, social login, logout, me.
//!
//! These are the only routes that do not require an identity token; a token
//! is their output.

use anyhow::{anyhow, Context};
use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::{
    extract::State,
    routing::{get, post},
    Extension, Json, Router,
};
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::gateway::auth::{generate_jwt, AuthenticatedUser};
use crate::AppState;

/// Auth routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/auth/social", post(social))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

#[derive(Debug, Deserialize)]
struct Credentials {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SocialLogin {
    provider: String,
    social_id: String,
    username: String,
}

fn issue_token(state: &AppState, user_id: i64, username: &str) -> Result<String, ApiError> {
    let secret = state
        .config
        .auth
        .jwt_secret
        .as_deref()
        .ok_or_else(|| ApiError::Internal(anyhow!("JWT secret not configured")))?;
    let token = generate_jwt(user_id, username, secret, state.config.auth.token_expiry_secs)?;
    Ok(token)
}

fn hash_password(password: &str) -> anyhow::Result<(String, String)> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {e}"))?
        .to_string();
    Ok((hash, salt.to_string()))
}

fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn valid_username(username: &str) -> bool {
    !username.is_empty() && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

async fn signup(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<Value>, ApiError> {
    if !valid_username(&body.username) {
        return Err(ApiError::Validation(
            "Username may only contain letters, digits and underscores".into(),
        ));
    }

    let db = state.registry.identity().await?;
    let username = body.username.clone();
    let password = body.password.clone();

    let user_id = db
        .call(move |conn| {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT id FROM users WHERE username = ?1",
                    params![&username],
                    |row| row.get(0),
                )
                .optional()
                .context("Failed to check username")?;
            if existing.is_some() {
                return Ok(None);
            }

            let (hash, salt) = hash_password(&password)?;
            conn.execute(
                "INSERT INTO users (username, password, salt) VALUES (?1, ?2, ?3)",
                params![&username, &hash, &salt],
            )
            .context("Failed to insert user")?;
            Ok(Some(conn.last_insert_rowid()))
        })
        .await?
        .ok_or_else(|| ApiError::Validation("Username already exists".into()))?;

    let token = issue_token(&state, user_id, &body.username)?;
    Ok(Json(json!({
        "success": true,
        "token": token,
        "user": { "id": user_id, "username": body.username },
    })))
}

async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<Value>, ApiError> {
    let db = state.registry.identity().await?;
    let username = body.username.clone();

    let row: Option<(i64, Option<String>)> = db
        .call(move |conn| {
            conn.query_row(
                "SELECT id, password FROM users WHERE username = ?1",
                params![&username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("Failed to look up user")
        })
        .await?;

    let (user_id, stored_hash) = row.ok_or_else(|| ApiError::AuthFailed("User not found".into()))?;
    let stored_hash =
        stored_hash.ok_or_else(|| ApiError::AuthFailed("Password does not match".into()))?;

    if !verify_password(&body.password, &stored_hash) {
        return Err(ApiError::AuthFailed("Password does not match".into()));
    }

    let token = issue_token(&state, user_id, &body.username)?;
    Ok(Json(json!({
        "success": true,
        "token": token,
        "user": { "id": user_id, "username": body.username },
    })))
}

async fn social(
    State(state): State<AppState>,
    Json(body): Json<SocialLogin>,
) -> Result<Json<Value>, ApiError> {
    // Provider column is allow-listed; never built from caller input.
    let column = match body.provider.as_str() {
        "naver" => "naver_id",
        "kakao" => "kakao_id",
        "google" => "google_id",
        other => {
            return Err(ApiError::Validation(format!("Unknown provider: {other}")));
        }
    };

    let db = state.registry.identity().await?;
    let social_id = body.social_id.clone();
    let display_name = body.username.clone();
    let provider = body.provider.clone();

    let (user_id, username) = db
        .call(move |conn| {
            let existing: Option<(i64, String)> = conn
                .query_row(
                    &format!("SELECT id, username FROM users WHERE {column} = ?1"),
                    params![&social_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .context("Failed to look up social user")?;

            if let Some(found) = existing {
                return Ok(found);
            }

            // First sign-in: derive a unique username from the social name.
            let mut sanitized: String = display_name
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if sanitized.is_empty() {
                sanitized = format!("user_{provider}");
            }

            let mut candidate = sanitized.clone();
            loop {
                let taken: Option<i64> = conn
                    .query_row(
                        "SELECT id FROM users WHERE username = ?1",
                        params![&candidate],
                        |row| row.get(0),
                    )
                    .optional()
                    .context("Failed to check username")?;
                if taken.is_none() {
                    break;
                }
                candidate = format!("{sanitized}{}", rand::rng().random_range(0..1000));
            }

            conn.execute(
                &format!("INSERT INTO users (username, {column}) VALUES (?1, ?2)"),
                params![&candidate, &social_id],
            )
            .context("Failed to insert social user")?;
            Ok((conn.last_insert_rowid(), candidate))
        })
        .await?;

    let token = issue_token(&state, user_id, &username)?;
    Ok(Json(json!({
        "success": true,
        "token": token,
        "user": { "id": user_id, "username": username },
    })))
}

/// Tokens are stateless; logout is an acknowledgment for the client to
/// discard its copy.
async fn logout() -> Json<Value> {
    Json(json!({ "success": true }))
}

async fn me(Extension(user): Extension<AuthenticatedUser>) -> Json<Value> {
    Json(json!({
        "success": true,
        "user": { "id": user.user_id, "username": user.username },
    }))
}
