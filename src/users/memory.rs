use std::collections::BTreeMap;

use axum::async_trait;
use tokio::sync::RwLock;

use crate::error::UniqueField;
use crate::users::repo::{StoreError, StoreResult, UserStore};
use crate::users::repo_types::{NewUser, Profile, UserRecord};

#[derive(Default)]
struct Inner {
    next_id: i64,
    rows: BTreeMap<i64, UserRecord>,
}

/// Test store enforcing the same unique constraints as the `users` table.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record as-is, bypassing every lifecycle rule. Seeds admins in tests.
    pub async fn seed(&self, user: NewUser) -> UserRecord {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let record = with_id(user, inner.next_id);
        inner.rows.insert(record.id, record.clone());
        record
    }
}

fn with_id(user: NewUser, id: i64) -> UserRecord {
    UserRecord {
        id,
        profile: user.profile,
        password_hash: user.password_hash,
        profile_picture: user.profile_picture,
        roles: user.roles,
        created_at: user.created_at,
        updated_at: user.updated_at,
    }
}

fn collision(rows: &BTreeMap<i64, UserRecord>, candidate: &Profile, own_id: Option<i64>) -> Option<UniqueField> {
    rows.values()
        .filter(|r| Some(r.id) != own_id)
        .find_map(|r| {
            if r.profile.username == candidate.username {
                Some(UniqueField::Username)
            } else if r.profile.email == candidate.email {
                Some(UniqueField::Email)
            } else if r.profile.phone == candidate.phone {
                Some(UniqueField::Phone)
            } else {
                None
            }
        })
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserRecord>> {
        Ok(self.inner.read().await.rows.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.values().find(|r| r.profile.username == username).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.values().find(|r| r.profile.email == email).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<UserRecord>> {
        let inner = self.inner.read().await;
        Ok(inner.rows.values().find(|r| r.profile.phone == phone).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<UserRecord>> {
        Ok(self.inner.read().await.rows.values().cloned().collect())
    }

    async fn insert(&self, user: NewUser) -> StoreResult<UserRecord> {
        let mut inner = self.inner.write().await;
        if let Some(field) = collision(&inner.rows, &user.profile, None) {
            return Err(StoreError::duplicate(field, &user.profile));
        }
        inner.next_id += 1;
        let record = with_id(user, inner.next_id);
        inner.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update(&self, user: &UserRecord) -> StoreResult<UserRecord> {
        let mut inner = self.inner.write().await;
        if let Some(field) = collision(&inner.rows, &user.profile, Some(user.id)) {
            return Err(StoreError::duplicate(field, &user.profile));
        }
        let stored = inner
            .rows
            .get_mut(&user.id)
            .ok_or_else(|| StoreError::Other(anyhow::anyhow!("user {} vanished", user.id)))?;
        stored.profile = user.profile.clone();
        stored.profile_picture = user.profile_picture.clone();
        stored.roles = user.roles.clone();
        stored.updated_at = user.updated_at;
        Ok(stored.clone())
    }

    async fn delete(&self, id: i64) -> StoreResult<bool> {
        Ok(self.inner.write().await.rows.remove(&id).is_some())
    }
}
