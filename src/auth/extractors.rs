use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};

use super::repo_types::User;
use crate::{error::AppError, state::AppState};

/// Authenticated principal. Rejects the request when the bearer token is
/// missing, invalid or belongs to an unknown or disabled user.
pub struct AuthUser(pub User);

/// Like [`AuthUser`] but never rejects; `None` when no valid principal.
pub struct MaybeAuthUser(pub Option<User>);

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("Missing authorization header"))?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or_else(|| AppError::unauthorized("Invalid authorization scheme"))?
        .trim();

    if token.is_empty() {
        return Err(AppError::unauthorized("Missing token"));
    }
    Ok(token)
}

async fn resolve(parts: &Parts, state: &AppState) -> Result<User, AppError> {
    let token = bearer_token(parts)?;
    let claims = state.tokens.verify(token)?;

    let user = match state.store.users().get_by_id(claims.sub).await {
        Ok(user) => user,
        Err(e) if e.is_not_found() => {
            warn!(user_id = %claims.sub, "token for unknown user");
            return Err(AppError::unauthorized("User not found"));
        }
        Err(e) => return Err(e),
    };

    if !user.authenticated {
        warn!(user_id = %user.id, "token for unauthenticated user");
        return Err(AppError::unauthorized("User not authenticated"));
    }
    Ok(user)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve(parts, state).await.map(AuthUser)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match resolve(parts, state).await {
            Ok(user) => Ok(MaybeAuthUser(Some(user))),
            Err(e) => {
                debug!(reason = %e, "optional auth skipped");
                Ok(MaybeAuthUser(None))
            }
        }
    }
}
