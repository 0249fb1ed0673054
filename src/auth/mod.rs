use crate::state::AppState;
use axum::Router;

mod claims;
mod dto;
pub mod gate;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod principal;
pub mod resolver;
pub mod services;

pub use principal::Principal;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
