use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Form, Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{services::Authenticator, Principal},
    error::AppError,
    state::AppState,
    users::{
        dto::{read_file_field, CredentialsForm, MessageResponse, UserEnvelope, UserForm, UsersEnvelope},
        services::UserService,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/api/users/create", post(create_user))
        .route("/api/users/update/:id", put(update_user))
        .route("/api/users/id/:id", get(get_user_by_id))
        .route("/api/users/email/:email", get(get_user_by_email))
        .route("/api/users/username/:username", get(get_user_by_username))
        .route("/api/users/all", get(list_users))
        .route("/api/users/delete/:id", delete(delete_user))
        .route("/api/users/login", post(check_credentials))
        .route("/api/users/upload-profile-picture/:id", post(upload_profile_picture))
        .route("/api/users/me", get(me))
}

#[instrument(skip(users, multipart))]
pub async fn create_user(
    State(users): State<UserService>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UserEnvelope>), AppError> {
    let input = UserForm::from_multipart(multipart).await?.into_create()?;
    let user = users.create(input).await?;
    let message = format!("User '{}' created successfully", user.username());
    let user = users.view(user).await?;
    Ok((StatusCode::CREATED, Json(UserEnvelope { message, user })))
}

#[instrument(skip(users, principal, multipart))]
pub async fn update_user(
    State(users): State<UserService>,
    principal: Principal,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<UserEnvelope>, AppError> {
    let input = UserForm::from_multipart(multipart).await?.into_update()?;
    let user = users.update(&principal, id, input).await?;
    let message = format!("User '{}' updated successfully", user.username());
    let user = users.view(user).await?;
    Ok(Json(UserEnvelope { message, user }))
}

#[instrument(skip(users, _principal))]
pub async fn get_user_by_id(
    State(users): State<UserService>,
    _principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<UserEnvelope>, AppError> {
    let user = users.view(users.find_by_id(id).await?).await?;
    Ok(Json(UserEnvelope {
        message: format!("User with id {} fetched successfully", id),
        user,
    }))
}

#[instrument(skip(users, _principal))]
pub async fn get_user_by_email(
    State(users): State<UserService>,
    _principal: Principal,
    Path(email): Path<String>,
) -> Result<Json<UserEnvelope>, AppError> {
    let user = users.view(users.find_by_email(&email).await?).await?;
    Ok(Json(UserEnvelope {
        message: format!("User with email '{}' fetched successfully", email),
        user,
    }))
}

#[instrument(skip(users, _principal))]
pub async fn get_user_by_username(
    State(users): State<UserService>,
    _principal: Principal,
    Path(username): Path<String>,
) -> Result<Json<UserEnvelope>, AppError> {
    let user = users.view(users.find_by_username(&username).await?).await?;
    Ok(Json(UserEnvelope {
        message: format!("User with username '{}' fetched successfully", username),
        user,
    }))
}

#[instrument(skip(users, _principal))]
pub async fn list_users(
    State(users): State<UserService>,
    _principal: Principal,
) -> Result<Json<UsersEnvelope>, AppError> {
    let records = users.list_all().await?;
    Ok(Json(UsersEnvelope {
        message: "All users fetched successfully".into(),
        users: users.views(records).await?,
    }))
}

#[instrument(skip(users, principal))]
pub async fn delete_user(
    State(users): State<UserService>,
    principal: Principal,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, AppError> {
    let removed = users.delete(&principal, id).await?;
    Ok(Json(MessageResponse {
        message: format!("User '{}' deleted successfully", removed.username()),
    }))
}

/// Credential check without a token: answers with the matching user.
#[instrument(skip(auth, users, _principal, form))]
pub async fn check_credentials(
    State(auth): State<Authenticator>,
    State(users): State<UserService>,
    _principal: Principal,
    Form(form): Form<CredentialsForm>,
) -> Result<Json<UserEnvelope>, AppError> {
    let principal = auth
        .authenticate_with_credentials(form.identifier.trim(), &form.password)
        .await?;
    let user = users.view(users.find_by_username(&principal.username).await?).await?;
    Ok(Json(UserEnvelope {
        message: format!("User '{}' authenticated successfully", principal.username),
        user,
    }))
}

#[instrument(skip(users, principal, multipart))]
pub async fn upload_profile_picture(
    State(users): State<UserService>,
    principal: Principal,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<MessageResponse>, AppError> {
    let upload = read_file_field(multipart, "file").await?;
    users.associate_profile_picture(&principal, id, upload).await?;
    Ok(Json(MessageResponse {
        message: "Profile picture uploaded successfully".into(),
    }))
}

#[instrument(skip(users, principal), fields(username = %principal.username))]
pub async fn me(
    State(users): State<UserService>,
    principal: Principal,
) -> Result<Json<UserEnvelope>, AppError> {
    let user = users.view(users.find_by_username(&principal.username).await?).await?;
    Ok(Json(UserEnvelope {
        message: format!("User '{}' fetched successfully", principal.username),
        user,
    }))
}
