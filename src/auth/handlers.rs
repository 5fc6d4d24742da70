use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Router,
};
use tracing::{error, instrument, warn};

use crate::{
    api::{self, JsonBody},
    auth::{
        dto::{AuthResponse, LoginRequest, PublicUser, RegisterRequest},
        extractors::AuthUser,
        jwt::TokenIssuer,
        repo_types::User,
        services::{is_valid_email, normalize_email, Credentials},
    },
    error::{AppError, AppResult},
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 6;
const MIN_USERNAME_LEN: usize = 3;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(get_me))
}

fn session(tokens: &TokenIssuer, user: User) -> AppResult<AuthResponse> {
    let token = tokens.issue(&user).map_err(|e| {
        error!(error = %e, user_id = %user.id, "jwt sign failed");
        AppError::internal("Failed to generate token")
    })?;
    Ok(AuthResponse {
        token,
        user: user.into(),
    })
}

#[instrument(skip(state, tokens, payload))]
pub async fn register(
    State(state): State<AppState>,
    State(tokens): State<TokenIssuer>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<Response> {
    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::invalid_input("Invalid email"));
    }
    let username = api::required(&payload.username, "username")?;
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(AppError::invalid_input("Username too short"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AppError::invalid_input("Password too short"));
    }

    let user = Credentials::new(state.store.users(), &state.hasher)
        .create(&email, &username, payload.password)
        .await?;

    Ok(api::created(session(&tokens, user)?))
}

#[instrument(skip(state, tokens, payload))]
pub async fn login(
    State(state): State<AppState>,
    State(tokens): State<TokenIssuer>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Response> {
    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::invalid_input("Invalid email"));
    }

    let user = Credentials::new(state.store.users(), &state.hasher)
        .authenticate(&email, &payload.password)
        .await?;

    Ok(api::ok(session(&tokens, user)?))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> AppResult<Response> {
    Ok(api::ok(PublicUser::from(user)))
}
