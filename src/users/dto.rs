use std::collections::BTreeSet;

use axum::extract::Multipart;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{AppError, FieldErrors};
use crate::images::services::PictureUpload;
use crate::users::repo_types::{Gender, Profile, RelationshipStatus, Role, UserRecord};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Validated input for `create`.
#[derive(Debug)]
pub struct CreateUser {
    pub profile: Profile,
    pub password: String,
    pub picture: Option<PictureUpload>,
}

/// Validated input for `update`. The password is not part of an update.
#[derive(Debug)]
pub struct UpdateUser {
    pub profile: Profile,
    pub picture: Option<PictureUpload>,
}

/// Raw multipart form for create and update, field names as clients send them.
#[derive(Debug, Default)]
pub struct UserForm {
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
    pub gender: Option<String>,
    pub relationship_status: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<PictureUpload>,
}

impl UserForm {
    pub async fn from_multipart(mut mp: Multipart) -> Result<Self, AppError> {
        let mut form = UserForm::default();
        while let Some(field) = mp.next_field().await.map_err(malformed)? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "profilePicture" {
                form.profile_picture = Some(read_upload(field).await?);
                continue;
            }
            let value = field.text().await.map_err(malformed)?;
            let slot = match name.as_str() {
                "firstName" => &mut form.first_name,
                "middleName" => &mut form.middle_name,
                "lastName" => &mut form.last_name,
                "username" => &mut form.username,
                "email" => &mut form.email,
                "password" => &mut form.password,
                "phone" => &mut form.phone,
                "country" => &mut form.country,
                "gender" => &mut form.gender,
                "relationshipStatus" => &mut form.relationship_status,
                "bio" => &mut form.bio,
                // roles are assigned server-side; anything else is ignored
                _ => continue,
            };
            *slot = Some(value);
        }
        Ok(form)
    }

    pub fn into_create(self) -> Result<CreateUser, AppError> {
        let mut errors = FieldErrors::new();
        let profile = self.profile(&mut errors);
        let password = match self.password.as_deref() {
            None | Some("") => {
                errors.insert("password".into(), "Password is mandatory".into());
                String::new()
            }
            Some(p) if p.chars().count() < 8 => {
                errors.insert(
                    "password".into(),
                    "Password should be at least 8 characters long".into(),
                );
                String::new()
            }
            Some(p) => p.to_string(),
        };
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        Ok(CreateUser {
            profile,
            password,
            picture: self.profile_picture,
        })
    }

    pub fn into_update(self) -> Result<UpdateUser, AppError> {
        let mut errors = FieldErrors::new();
        let profile = self.profile(&mut errors);
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        Ok(UpdateUser {
            profile,
            picture: self.profile_picture,
        })
    }

    fn profile(&self, errors: &mut FieldErrors) -> Profile {
        let first_name = required(errors, "firstName", &self.first_name, "First name is mandatory");
        let last_name = required(errors, "lastName", &self.last_name, "Last name is mandatory");

        let username = required(errors, "username", &self.username, "Username is mandatory");
        let len = username.chars().count();
        if !username.is_empty() && !(3..=30).contains(&len) {
            errors.insert("username".into(), "size must be between 3 and 30".into());
        }

        let email = required(errors, "email", &self.email, "Email is mandatory");
        if !email.is_empty() && !is_valid_email(&email) {
            errors.insert("email".into(), "Email should be valid".into());
        }

        let phone = required(errors, "phone", &self.phone, "Phone is mandatory");

        let gender = optional(&self.gender).and_then(|g| match g.parse::<Gender>() {
            Ok(g) => Some(g),
            Err(e) => {
                errors.insert("gender".into(), e.to_string());
                None
            }
        });
        let relationship_status =
            optional(&self.relationship_status).and_then(|s| match s.parse::<RelationshipStatus>() {
                Ok(s) => Some(s),
                Err(e) => {
                    errors.insert("relationshipStatus".into(), e.to_string());
                    None
                }
            });

        Profile {
            first_name,
            middle_name: optional(&self.middle_name),
            last_name,
            username,
            email,
            phone,
            country: optional(&self.country),
            gender,
            relationship_status,
            bio: optional(&self.bio),
        }
    }
}

fn optional(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn required(errors: &mut FieldErrors, key: &str, value: &Option<String>, message: &str) -> String {
    match optional(value) {
        Some(v) => v,
        None => {
            errors.insert(key.into(), message.into());
            String::new()
        }
    }
}

fn malformed(e: axum::extract::multipart::MultipartError) -> AppError {
    AppError::InvalidPayload(format!("Malformed multipart body: {}", e))
}

async fn read_upload(field: axum::extract::multipart::Field<'_>) -> Result<PictureUpload, AppError> {
    let file_name = field.file_name().map(str::to_string);
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".into());
    let body = field.bytes().await.map_err(malformed)?;
    Ok(PictureUpload {
        body,
        content_type,
        file_name,
    })
}

/// Pulls the single file field `name` out of a multipart body.
pub async fn read_file_field(mut mp: Multipart, name: &str) -> Result<PictureUpload, AppError> {
    while let Some(field) = mp.next_field().await.map_err(malformed)? {
        if field.name() == Some(name) {
            return read_upload(field).await;
        }
    }
    Err(AppError::InvalidPayload(format!("Multipart field '{}' is required", name)))
}

/// Credentials for the form-encoded credential check.
#[derive(Debug, Deserialize)]
pub struct CredentialsForm {
    pub identifier: String,
    pub password: String,
}

/// Public projection of a user: no password hash, picture as a URL.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: i64,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<Gender>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_status: Option<RelationshipStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture_url: Option<String>,
    pub roles: BTreeSet<Role>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserView {
    pub fn new(user: UserRecord, profile_picture_url: Option<String>) -> Self {
        let p = user.profile;
        Self {
            id: user.id,
            first_name: p.first_name,
            middle_name: p.middle_name,
            last_name: p.last_name,
            username: p.username,
            email: p.email,
            phone: p.phone,
            country: p.country,
            gender: p.gender,
            relationship_status: p.relationship_status,
            bio: p.bio,
            profile_picture_url,
            roles: user.roles,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserEnvelope {
    pub message: String,
    pub user: UserView,
}

#[derive(Debug, Serialize)]
pub struct UsersEnvelope {
    pub message: String,
    pub users: Vec<UserView>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
