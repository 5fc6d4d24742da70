use crate::state::AppState;
use axum::Router;

mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod policy;
pub mod repo;
pub mod repo_types;
pub mod services;
mod claims;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
