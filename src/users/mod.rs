use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod services;
#[cfg(test)]
pub mod test_support;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::user_routes())
}
