use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation, decode};
use storefront_api::{
    db::create_pool,
    dto::auth::{
        Claims, ForgotPasswordRequest, LoginRequest, ResetPasswordRequest, SignupRequest,
    },
    error::AppError,
    mailer::{Email, Mailer},
    services::auth_service,
    state::AppState,
};
use uuid::Uuid;

/// Captures outbound email so tests can read the plaintext reset token the
/// way a real recipient would.
#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &Email) -> Result<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Always fails, standing in for an unreachable SMTP relay.
struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _email: &Email) -> Result<()> {
        Err(anyhow::anyhow!("smtp relay unreachable"))
    }
}

const TEST_JWT_SECRET: &str = "auth-flow-test-secret";

fn test_database_url() -> Option<String> {
    match std::env::var("TEST_DATABASE_URL").or_else(|_| std::env::var("DATABASE_URL")) {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!(
                "Skipping test: set TEST_DATABASE_URL or DATABASE_URL to run integration flow tests."
            );
            None
        }
    }
}

fn ensure_jwt_secret() {
    if std::env::var("JWT_SECRET").is_err() {
        // Safe enough in tests: every test that sets it writes the same value.
        unsafe { std::env::set_var("JWT_SECRET", TEST_JWT_SECRET) };
    }
}

async fn setup_state(mailer: Arc<dyn Mailer>) -> Result<Option<AppState>> {
    let Some(database_url) = test_database_url() else {
        return Ok(None);
    };
    ensure_jwt_secret();

    let pool = create_pool(&database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(Some(AppState { pool, mailer }))
}

fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.com", prefix, Uuid::new_v4())
}

fn signup_payload(email: &str, password: &str) -> SignupRequest {
    SignupRequest {
        name: "Test User".into(),
        email: email.into(),
        password: password.into(),
        contact: Some("555-0100".into()),
    }
}

fn extract_reset_token(email: &Email) -> String {
    let marker = "token=";
    let start = email.html.find(marker).expect("reset link in email") + marker.len();
    let rest = &email.html[start..];
    let end = rest.find('"').expect("closing quote");
    rest[..end].to_string()
}

#[tokio::test]
async fn signup_then_login_round_trips_identity() -> Result<()> {
    let Some(state) = setup_state(Arc::new(RecordingMailer::default())).await? else {
        return Ok(());
    };

    let email = unique_email("buyer");
    let created = auth_service::signup_buyer(&state, signup_payload(&email, "hunter2xyz"))
        .await?
        .data
        .expect("created user");
    assert_eq!(created.role, "buyer");

    let resp = auth_service::login(
        &state,
        LoginRequest {
            email: email.clone(),
            password: "hunter2xyz".into(),
        },
    )
    .await?
    .data
    .expect("login response");

    assert!(resp.token.starts_with("Bearer "));
    let raw_token = resp.token.trim_start_matches("Bearer ").trim();
    let secret = std::env::var("JWT_SECRET")?;
    let decoded = decode::<Claims>(
        raw_token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    assert_eq!(decoded.claims.sub, created.id.to_string());
    assert_eq!(decoded.claims.role, "buyer");

    // The response user object is the public projection.
    let user_json = serde_json::to_value(&resp.user)?;
    assert!(user_json.get("password_hash").is_none());

    Ok(())
}

#[tokio::test]
async fn login_failure_does_not_reveal_which_check_failed() -> Result<()> {
    let Some(state) = setup_state(Arc::new(RecordingMailer::default())).await? else {
        return Ok(());
    };

    let email = unique_email("buyer");
    auth_service::signup_buyer(&state, signup_payload(&email, "correct-horse")).await?;

    let wrong_password = auth_service::login(
        &state,
        LoginRequest {
            email: email.clone(),
            password: "battery-staple".into(),
        },
    )
    .await
    .expect_err("wrong password must fail");

    let unknown_email = auth_service::login(
        &state,
        LoginRequest {
            email: unique_email("nobody"),
            password: "battery-staple".into(),
        },
    )
    .await
    .expect_err("unknown email must fail");

    assert!(matches!(wrong_password, AppError::Unauthorized(_)));
    assert!(matches!(unknown_email, AppError::Unauthorized(_)));
    assert_eq!(wrong_password.to_string(), unknown_email.to_string());

    Ok(())
}

#[tokio::test]
async fn duplicate_signup_conflicts() -> Result<()> {
    let Some(state) = setup_state(Arc::new(RecordingMailer::default())).await? else {
        return Ok(());
    };

    let email = unique_email("buyer");
    auth_service::signup_buyer(&state, signup_payload(&email, "first-password")).await?;

    let err = auth_service::signup_buyer(&state, signup_payload(&email, "second-password"))
        .await
        .expect_err("duplicate email must conflict");
    assert!(matches!(err, AppError::Conflict(_)));

    let err = auth_service::signup_admin(&state, signup_payload("", "pw"))
        .await
        .expect_err("blank fields must fail validation");
    assert!(matches!(err, AppError::Validation(_)));

    Ok(())
}

#[tokio::test]
async fn forgot_and_reset_password_flow() -> Result<()> {
    let mailbox = Arc::new(RecordingMailer::default());
    let Some(state) = setup_state(mailbox.clone()).await? else {
        return Ok(());
    };

    let email = unique_email("buyer");
    let user = auth_service::signup_buyer(&state, signup_payload(&email, "old-password"))
        .await?
        .data
        .expect("created user");

    auth_service::forgot_password(
        &state,
        ForgotPasswordRequest {
            email: email.clone(),
        },
    )
    .await?;

    let token = {
        let sent = mailbox.sent.lock().unwrap();
        let reset_mail = sent.last().expect("reset email");
        assert_eq!(reset_mail.to, email);
        assert!(reset_mail.html.contains(&user.id.to_string()));
        extract_reset_token(reset_mail)
    };
    assert!(token.len() >= 20);

    // Wrong token leaves the password untouched.
    let err = auth_service::reset_password(
        &state,
        ResetPasswordRequest {
            user_id: user.id,
            token: "not-the-token".into(),
            new_password: "new-password".into(),
        },
    )
    .await
    .expect_err("wrong token must fail");
    assert!(matches!(err, AppError::InvalidToken(_)));
    auth_service::login(
        &state,
        LoginRequest {
            email: email.clone(),
            password: "old-password".into(),
        },
    )
    .await?;

    // Unknown user id is a distinct failure.
    let err = auth_service::reset_password(
        &state,
        ResetPasswordRequest {
            user_id: Uuid::new_v4(),
            token: token.clone(),
            new_password: "new-password".into(),
        },
    )
    .await
    .expect_err("unknown user must fail");
    assert!(matches!(err, AppError::NotFound));

    // Correct token swaps the password exactly once.
    auth_service::reset_password(
        &state,
        ResetPasswordRequest {
            user_id: user.id,
            token: token.clone(),
            new_password: "new-password".into(),
        },
    )
    .await?;

    auth_service::login(
        &state,
        LoginRequest {
            email: email.clone(),
            password: "new-password".into(),
        },
    )
    .await?;
    let err = auth_service::login(
        &state,
        LoginRequest {
            email: email.clone(),
            password: "old-password".into(),
        },
    )
    .await
    .expect_err("old password must stop working");
    assert!(matches!(err, AppError::Unauthorized(_)));

    // The token was cleared on use.
    let err = auth_service::reset_password(
        &state,
        ResetPasswordRequest {
            user_id: user.id,
            token,
            new_password: "third-password".into(),
        },
    )
    .await
    .expect_err("token must be single use");
    assert!(matches!(err, AppError::InvalidToken(_)));

    // A confirmation email followed the successful reset.
    let sent = mailbox.sent.lock().unwrap();
    assert!(sent.len() >= 2);

    Ok(())
}

#[tokio::test]
async fn expired_reset_token_is_rejected() -> Result<()> {
    let mailbox = Arc::new(RecordingMailer::default());
    let Some(state) = setup_state(mailbox.clone()).await? else {
        return Ok(());
    };

    let email = unique_email("buyer");
    let user = auth_service::signup_buyer(&state, signup_payload(&email, "old-password"))
        .await?
        .data
        .expect("created user");

    auth_service::forgot_password(
        &state,
        ForgotPasswordRequest {
            email: email.clone(),
        },
    )
    .await?;
    let token = {
        let sent = mailbox.sent.lock().unwrap();
        extract_reset_token(sent.last().expect("reset email"))
    };

    // Age the token past its one-hour window.
    sqlx::query(
        "UPDATE users SET reset_token_expires_at = NOW() - INTERVAL '2 hours' WHERE id = $1",
    )
    .bind(user.id)
    .execute(&state.pool)
    .await?;

    let err = auth_service::reset_password(
        &state,
        ResetPasswordRequest {
            user_id: user.id,
            token,
            new_password: "new-password".into(),
        },
    )
    .await
    .expect_err("expired token must fail");
    assert!(matches!(err, AppError::InvalidToken(_)));

    auth_service::login(
        &state,
        LoginRequest {
            email,
            password: "old-password".into(),
        },
    )
    .await?;

    Ok(())
}

#[tokio::test]
async fn failed_reset_email_rolls_back_token_issuance() -> Result<()> {
    let Some(state) = setup_state(Arc::new(FailingMailer)).await? else {
        return Ok(());
    };

    let email = unique_email("buyer");
    let user = auth_service::signup_buyer(&state, signup_payload(&email, "old-password"))
        .await?
        .data
        .expect("created user");

    auth_service::forgot_password(&state, ForgotPasswordRequest { email })
        .await
        .expect_err("mailer failure must surface");

    // The token write was rolled back, so no orphaned-but-valid token exists.
    let row: (Option<String>,) =
        sqlx::query_as("SELECT reset_token_hash FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_one(&state.pool)
            .await?;
    assert!(row.0.is_none());

    Ok(())
}
