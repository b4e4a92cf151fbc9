use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    audit,
    dto::auth::{
        Claims, ForgotPasswordRequest, LoginRequest, LoginResponse, PublicUser,
        ResetPasswordRequest, SignupRequest,
    },
    error::{AppError, AppResult},
    mailer::Email,
    middleware::auth::{ROLE_ADMIN, ROLE_BUYER},
    models::User,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Reset tokens are valid for one hour from issuance.
const RESET_TOKEN_TTL_HOURS: i64 = 1;

pub async fn signup_buyer(
    state: &AppState,
    payload: SignupRequest,
) -> AppResult<ApiResponse<PublicUser>> {
    create_user(state, payload, ROLE_BUYER).await
}

pub async fn signup_admin(
    state: &AppState,
    payload: SignupRequest,
) -> AppResult<ApiResponse<PublicUser>> {
    create_user(state, payload, ROLE_ADMIN).await
}

async fn create_user(
    state: &AppState,
    payload: SignupRequest,
    role: &str,
) -> AppResult<ApiResponse<PublicUser>> {
    let SignupRequest {
        name,
        email,
        password,
        contact,
    } = payload;

    if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
        return Err(AppError::Validation(
            "Name, email and password are required".into(),
        ));
    }

    let exist: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    if exist.is_some() {
        return Err(AppError::Conflict(
            "A user with this email already exists".into(),
        ));
    }

    let password_hash = hash_password(&password)?;

    let user: User = sqlx::query_as(
        r#"
        INSERT INTO users (id, name, email, password_hash, role, contact)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name.as_str())
    .bind(email.as_str())
    .bind(password_hash)
    .bind(role)
    .bind(contact.as_deref())
    .fetch_one(&state.pool)
    .await?;

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.id),
        "user_signup",
        serde_json::json!({ "user_id": user.id, "role": role }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    Ok(ApiResponse::success(
        "User created",
        PublicUser::from(user),
        None,
    ))
}

pub async fn login(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    let LoginRequest { email, password } = payload;
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&state.pool)
        .await?;

    // Unknown email and wrong password produce the same response so the
    // failure mode is not observable from outside.
    let user = match user {
        Some(u) => u,
        None => return Err(AppError::Unauthorized("Invalid credentials".into())),
    };

    if !verify_password(&password, &user.password_hash)? {
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    let token = issue_token(&user)?;

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.id),
        "user_login",
        serde_json::json!({ "user_id": user.id }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    let resp = LoginResponse {
        token: format!("Bearer {}", token),
        user: PublicUser::from(user),
    };

    Ok(ApiResponse::success("Logged in", resp, Some(Meta::empty())))
}

pub async fn forgot_password(
    state: &AppState,
    payload: ForgotPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
        .bind(payload.email.as_str())
        .fetch_optional(&state.pool)
        .await?;
    let user = match user {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    // The plaintext token leaves the process only inside the email; the row
    // stores its hash. Issuing again overwrites any previous token.
    let token = generate_reset_token();
    let expires_at = Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS);

    let mut tx = state.pool.begin().await?;
    sqlx::query(
        r#"
        UPDATE users
        SET reset_token_hash = $1, reset_token_expires_at = $2
        WHERE id = $3
        "#,
    )
    .bind(hash_reset_token(&token))
    .bind(expires_at)
    .bind(user.id)
    .execute(&mut *tx)
    .await?;

    // Send before commit: if delivery fails the token write rolls back, so a
    // token the user never received cannot linger as a valid credential.
    let base_url =
        std::env::var("APP_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());
    let email = Email {
        to: user.email.clone(),
        subject: "Password reset request".into(),
        html: format!(
            "<p>Hello {},</p>\
             <p>We received a request to reset your password. \
             The link below is valid for one hour:</p>\
             <p><a href=\"{}/auth/reset-password?user_id={}&token={}\">Reset your password</a></p>\
             <p>If you did not request this, you can ignore this email.</p>",
            user.name, base_url, user.id, token
        ),
    };
    state.mailer.send(&email).await.map_err(AppError::Internal)?;

    tx.commit().await?;

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.id),
        "password_reset_requested",
        serde_json::json!({ "user_id": user.id }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    Ok(ApiResponse::success(
        "Reset email sent",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn reset_password(
    state: &AppState,
    payload: ResetPasswordRequest,
) -> AppResult<ApiResponse<serde_json::Value>> {
    if payload.new_password.is_empty() {
        return Err(AppError::Validation("New password is required".into()));
    }

    let mut tx = state.pool.begin().await?;

    // Lock the row so two concurrent resets cannot both consume the token.
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1 FOR UPDATE")
        .bind(payload.user_id)
        .fetch_optional(&mut *tx)
        .await?;
    let user = match user {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    let (stored_hash, expires_at) = match (&user.reset_token_hash, user.reset_token_expires_at) {
        (Some(hash), Some(expires_at)) => (hash.as_str(), expires_at),
        _ => return Err(AppError::InvalidToken("No reset token issued".into())),
    };
    if Utc::now() > expires_at {
        return Err(AppError::InvalidToken("Reset token expired".into()));
    }
    if hash_reset_token(&payload.token) != stored_hash {
        return Err(AppError::InvalidToken("Invalid reset token".into()));
    }

    let password_hash = hash_password(&payload.new_password)?;
    sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $1, reset_token_hash = NULL, reset_token_expires_at = NULL
        WHERE id = $2
        "#,
    )
    .bind(password_hash)
    .bind(user.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    // The password change is already committed; a failed confirmation email
    // must not undo it.
    let confirmation = Email {
        to: user.email.clone(),
        subject: "Your password was changed".into(),
        html: format!(
            "<p>Hello {},</p>\
             <p>Your password was just changed. If this was not you, \
             contact support immediately.</p>",
            user.name
        ),
    };
    if let Err(err) = state.mailer.send(&confirmation).await {
        tracing::warn!(error = %err, "confirmation email failed");
    }

    if let Err(err) = audit::record(
        &state.pool,
        Some(user.id),
        "password_reset",
        serde_json::json!({ "user_id": user.id }),
    )
    .await
    {
        tracing::warn!(error = %err, "audit write failed");
    }

    Ok(ApiResponse::success(
        "Password updated",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

fn verify_password(password: &str, stored_hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

fn issue_token(user: &User) -> AppResult<String> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| AppError::Internal(anyhow::anyhow!("JWT_SECRET is not set")))?;

    let ttl_hours = std::env::var("TOKEN_EXPIRY_HOURS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(24);
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(ttl_hours))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.id.to_string(),
        role: user.role.clone(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

/// Opaque 64-character hex token from 32 bytes of OS randomness.
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Only this digest is persisted, never the token itself.
pub fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
