use serde::{Deserialize, Serialize};

/// Request body for login. `identifier` is a username, email or phone number.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

/// Response returned after a successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub jwt: String,
    pub message: String,
}
