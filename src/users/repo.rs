use std::collections::BTreeSet;

use anyhow::Context;
use axum::async_trait;
use sqlx::PgPool;
use thiserror::Error;

use crate::error::{AppError, UniqueField};
use crate::users::repo_types::{NewUser, Profile, Role, UserRecord, UserRow};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("duplicate {field} '{value}'")]
    Duplicate { field: UniqueField, value: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate { field, value } => AppError::conflict(field, &value),
            StoreError::Other(e) => AppError::Storage(e),
        }
    }
}

impl StoreError {
    pub fn duplicate(field: UniqueField, candidate: &Profile) -> Self {
        StoreError::Duplicate {
            field,
            value: candidate.unique_value(field).to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Credential store: user records keyed by id, username, email and phone.
///
/// Implementations must enforce uniqueness of username, email and phone
/// themselves and report a violation as [`StoreError::Duplicate`]; callers'
/// existence checks are only advisory.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserRecord>>;
    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>>;
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>>;
    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<UserRecord>>;
    async fn list(&self) -> StoreResult<Vec<UserRecord>>;
    async fn insert(&self, user: NewUser) -> StoreResult<UserRecord>;
    /// Persists every column except `id`, `created_at` and `password_hash`.
    async fn update(&self, user: &UserRecord) -> StoreResult<UserRecord>;
    /// Returns false when no record had that id.
    async fn delete(&self, id: i64) -> StoreResult<bool>;

    async fn exists_by_username(&self, username: &str) -> StoreResult<bool> {
        Ok(self.find_by_username(username).await?.is_some())
    }

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    async fn exists_by_phone(&self, phone: &str) -> StoreResult<bool> {
        Ok(self.find_by_phone(phone).await?.is_some())
    }
}

const SELECT_USER: &str = r#"
    SELECT id, first_name, middle_name, last_name, username, email, phone,
           password_hash, country, gender, relationship_status, bio,
           profile_picture, roles, created_at, updated_at
      FROM users
"#;

const RETURNING_USER: &str = r#"
    RETURNING id, first_name, middle_name, last_name, username, email, phone,
              password_hash, country, gender, relationship_status, bio,
              profile_picture, roles, created_at, updated_at
"#;

/// Postgres-backed store. Uniqueness is backed by the `users_*_key` constraints.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn find_one(&self, column: &str, value: &str) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{} WHERE {} = $1", SELECT_USER, column))
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| classify(e, "find user"))?;
        row.map(into_record).transpose()
    }

    async fn exists(&self, column: &str, value: &str) -> StoreResult<bool> {
        let found: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS (SELECT 1 FROM users WHERE {} = $1)",
            column
        ))
        .bind(value)
        .fetch_one(&self.db)
        .await
        .map_err(|e| classify(e, "user exists"))?;
        Ok(found)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!("{} WHERE id = $1", SELECT_USER))
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| classify(e, "find user by id"))?;
        row.map(into_record).transpose()
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        self.find_one("username", username).await
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        self.find_one("email", email).await
    }

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<UserRecord>> {
        self.find_one("phone", phone).await
    }

    async fn list(&self) -> StoreResult<Vec<UserRecord>> {
        let rows = sqlx::query_as::<_, UserRow>(SELECT_USER)
            .fetch_all(&self.db)
            .await
            .map_err(|e| classify(e, "list users"))?;
        rows.into_iter().map(into_record).collect()
    }

    async fn insert(&self, user: NewUser) -> StoreResult<UserRecord> {
        let p = &user.profile;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (first_name, middle_name, last_name, username, email, phone,
                               password_hash, country, gender, relationship_status, bio,
                               profile_picture, roles, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            {}
            "#,
            RETURNING_USER
        ))
        .bind(&p.first_name)
        .bind(&p.middle_name)
        .bind(&p.last_name)
        .bind(&p.username)
        .bind(&p.email)
        .bind(&p.phone)
        .bind(&user.password_hash)
        .bind(&p.country)
        .bind(p.gender.map(|g| g.as_str()))
        .bind(p.relationship_status.map(|s| s.as_str()))
        .bind(&p.bio)
        .bind(&user.profile_picture)
        .bind(role_names(&user.roles))
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(|e| classify_write(e, "insert user", p))?;
        into_record(row)
    }

    async fn update(&self, user: &UserRecord) -> StoreResult<UserRecord> {
        let p = &user.profile;
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET first_name = $2, middle_name = $3, last_name = $4, username = $5,
                   email = $6, phone = $7, country = $8, gender = $9,
                   relationship_status = $10, bio = $11, profile_picture = $12,
                   roles = $13, updated_at = $14
             WHERE id = $1
            {}
            "#,
            RETURNING_USER
        ))
        .bind(user.id)
        .bind(&p.first_name)
        .bind(&p.middle_name)
        .bind(&p.last_name)
        .bind(&p.username)
        .bind(&p.email)
        .bind(&p.phone)
        .bind(&p.country)
        .bind(p.gender.map(|g| g.as_str()))
        .bind(p.relationship_status.map(|s| s.as_str()))
        .bind(&p.bio)
        .bind(&user.profile_picture)
        .bind(role_names(&user.roles))
        .bind(user.updated_at)
        .fetch_one(&self.db)
        .await
        .map_err(|e| classify_write(e, "update user", p))?;
        into_record(row)
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| classify(e, "delete user"))?;
        Ok(res.rows_affected() > 0)
    }

    async fn exists_by_username(&self, username: &str) -> StoreResult<bool> {
        self.exists("username", username).await
    }

    async fn exists_by_email(&self, email: &str) -> StoreResult<bool> {
        self.exists("email", email).await
    }

    async fn exists_by_phone(&self, phone: &str) -> StoreResult<bool> {
        self.exists("phone", phone).await
    }
}

fn role_names(roles: &BTreeSet<Role>) -> Vec<String> {
    roles.iter().map(|r| r.as_str().to_string()).collect()
}

fn into_record(row: UserRow) -> StoreResult<UserRecord> {
    UserRecord::try_from(row)
        .context("decode user row")
        .map_err(StoreError::Other)
}

fn classify(e: sqlx::Error, what: &'static str) -> StoreError {
    StoreError::Other(anyhow::Error::new(e).context(what))
}

/// Maps unique-constraint violations to the field they guard.
fn classify_write(e: sqlx::Error, what: &'static str, candidate: &Profile) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            if let Some(field) = db.constraint().and_then(field_for_constraint) {
                return StoreError::duplicate(field, candidate);
            }
        }
    }
    classify(e, what)
}

fn field_for_constraint(name: &str) -> Option<UniqueField> {
    match name {
        "users_username_key" => Some(UniqueField::Username),
        "users_email_key" => Some(UniqueField::Email),
        "users_phone_key" => Some(UniqueField::Phone),
        _ => None,
    }
}
