use axum::{extract::State, routing::post, Json, Router};
use tracing::instrument;

use crate::{
    auth::{
        dto::{LoginRequest, LoginResponse},
        services::Authenticator,
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/api/auth/login", post(login))
}

#[instrument(skip(auth, payload))]
pub async fn login(
    State(auth): State<Authenticator>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let identifier = payload.identifier.trim();
    let (jwt, _principal) = auth.login(identifier, &payload.password).await?;
    Ok(Json(LoginResponse {
        jwt,
        message: "Login successful".into(),
    }))
}
