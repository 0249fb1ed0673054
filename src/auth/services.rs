use std::sync::Arc;

use axum::extract::FromRef;
use tracing::{debug, info, warn};

use super::{
    jwt::JwtKeys,
    password::{verify_password, verify_unknown_user},
    principal::Principal,
    resolver::resolve,
};
use crate::{error::AppError, state::AppState, users::repo::UserStore};

/// Turns credentials or a bearer token into a [`Principal`].
#[derive(Clone)]
pub struct Authenticator {
    users: Arc<dyn UserStore>,
    keys: JwtKeys,
}

impl FromRef<AppState> for Authenticator {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.users.clone(), state.jwt.clone())
    }
}

impl Authenticator {
    pub fn new(users: Arc<dyn UserStore>, keys: JwtKeys) -> Self {
        Self { users, keys }
    }

    /// Unknown identifier and wrong password fail identically.
    pub async fn authenticate_with_credentials(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<Principal, AppError> {
        let Some(user) = resolve(self.users.as_ref(), identifier).await? else {
            verify_unknown_user(password);
            warn!(identifier = %identifier, "login unknown identifier");
            return Err(AppError::InvalidCredentials);
        };

        if !verify_password(password, &user.password_hash) {
            warn!(user_id = user.id, "login invalid password");
            return Err(AppError::InvalidCredentials);
        }

        Ok(Principal::new(user.username(), user.roles.iter().copied()))
    }

    pub fn authenticate_with_token(&self, token: &str) -> Result<Principal, AppError> {
        self.keys.validate(token).map_err(|e| {
            debug!(error = %e, "bearer token rejected");
            AppError::Unauthenticated
        })
    }

    /// Credential check followed by token issuance.
    pub async fn login(&self, identifier: &str, password: &str) -> Result<(String, Principal), AppError> {
        let principal = self.authenticate_with_credentials(identifier, password).await?;
        let roles: Vec<_> = principal.roles.iter().copied().collect();
        let token = self.keys.issue(&principal.username, &roles)?;
        info!(username = %principal.username, "user logged in");
        Ok((token, principal))
    }
}
