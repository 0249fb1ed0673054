use std::collections::BTreeMap;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// A field whose value must not repeat across users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
    Phone,
}

impl UniqueField {
    pub fn as_str(self) -> &'static str {
        match self {
            UniqueField::Username => "username",
            UniqueField::Email => "email",
            UniqueField::Phone => "phone",
        }
    }
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field validation messages, keyed by the form field name.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict { field: UniqueField, message: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication is required to access this resource.")]
    Unauthenticated,

    #[error("You do not have permission to access this resource.")]
    Forbidden,

    #[error("{0}")]
    InvalidPayload(String),

    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error("internal storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl AppError {
    pub fn conflict(field: UniqueField, value: &str) -> Self {
        let label = match field {
            UniqueField::Username => "Username",
            UniqueField::Email => "Email",
            UniqueField::Phone => "Phone number",
        };
        AppError::Conflict {
            field,
            message: format!("{} '{}' already exists", label, value),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::InvalidCredentials | AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::InvalidPayload(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::Storage(e) => {
                // Only this class carries internal detail; it stays in the log.
                error!(error = ?e, "internal storage failure");
                json!({ "message": "An internal server error occurred" })
            }
            AppError::Conflict { field, message } => {
                json!({ "message": message, "field": field.as_str() })
            }
            AppError::Validation(errors) => {
                json!({ "message": self.to_string(), "errors": errors })
            }
            _ => json!({ "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
