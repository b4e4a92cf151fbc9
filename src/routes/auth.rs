use axum::{Json, Router, extract::State, routing::post};

use crate::{
    dto::auth::{
        ForgotPasswordRequest, LoginRequest, LoginResponse, PublicUser, ResetPasswordRequest,
        SignupRequest,
    },
    error::AppResult,
    response::ApiResponse,
    services::auth_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        // Open like the rest of /auth; deployments are expected to restrict
        // it at the edge.
        .route("/admin/signup", post(admin_signup))
        .route("/login", post(login))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Buyer signup", body = ApiResponse<PublicUser>),
        (status = 400, description = "Missing fields"),
        (status = 409, description = "Email already registered"),
    ),
    tag = "Auth"
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<Json<ApiResponse<PublicUser>>> {
    let resp = auth_service::signup_buyer(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/auth/admin/signup",
    request_body = SignupRequest,
    responses(
        (status = 200, description = "Admin signup", body = ApiResponse<PublicUser>),
        (status = 400, description = "Missing fields"),
        (status = 409, description = "Email already registered"),
    ),
    tag = "Auth"
)]
pub async fn admin_signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> AppResult<Json<ApiResponse<PublicUser>>> {
    let resp = auth_service::signup_admin(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login", body = ApiResponse<LoginResponse>),
        (status = 401, description = "Invalid credentials"),
    ),
    tag = "Auth"
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let resp = auth_service::login(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset email sent"),
        (status = 404, description = "Unknown email"),
    ),
    tag = "Auth"
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = auth_service::forgot_password(&state, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated"),
        (status = 400, description = "Invalid or expired token"),
        (status = 404, description = "Unknown user"),
    ),
    tag = "Auth"
)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = auth_service::reset_password(&state, payload).await?;
    Ok(Json(resp))
}
