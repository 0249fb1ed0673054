use std::sync::Arc;

use axum::extract::FromRef;
use tracing::{info, warn};

use crate::{
    auth::{password::hash_password, Principal},
    error::{AppError, UniqueField},
    images::services::{
        discard_picture, key_for_user, presign_picture, random_key, store_picture, PictureUpload,
    },
    state::AppState,
    storage::StorageClient,
    users::{
        dto::{CreateUser, UpdateUser, UserView},
        repo::UserStore,
        repo_types::{next_updated_at, now_utc, NewUser, Role, UserRecord},
    },
};

/// Lifecycle of user records: create, update, lookups, delete and pictures.
#[derive(Clone)]
pub struct UserService {
    users: Arc<dyn UserStore>,
    storage: Arc<dyn StorageClient>,
    url_ttl_secs: u64,
}

impl FromRef<AppState> for UserService {
    fn from_ref(state: &AppState) -> Self {
        Self::new(
            state.users.clone(),
            state.storage.clone(),
            state.config.storage.url_ttl_secs,
        )
    }
}

impl UserService {
    pub fn new(users: Arc<dyn UserStore>, storage: Arc<dyn StorageClient>, url_ttl_secs: u64) -> Self {
        Self {
            users,
            storage,
            url_ttl_secs,
        }
    }

    /// Uniqueness is checked username, then email, then phone; the first
    /// collision wins.
    pub async fn create(&self, input: CreateUser) -> Result<UserRecord, AppError> {
        let CreateUser {
            profile,
            password,
            picture,
        } = input;

        if self.users.exists_by_username(&profile.username).await? {
            return Err(conflict(UniqueField::Username, &profile.username));
        }
        if self.users.exists_by_email(&profile.email).await? {
            return Err(conflict(UniqueField::Email, &profile.email));
        }
        if self.users.exists_by_phone(&profile.phone).await? {
            return Err(conflict(UniqueField::Phone, &profile.phone));
        }

        let picture = picture
            .filter(|p| !p.is_empty())
            .filter(|p| p.file_name.as_deref().is_some_and(|n| !n.trim().is_empty()))
            .ok_or_else(|| AppError::InvalidPayload("Profile picture is required".into()))?;

        let password_hash = hash_password(&password)?;
        let key = random_key(&picture);
        store_picture(self.storage.as_ref(), &key, picture).await?;

        let now = now_utc();
        let inserted = self
            .users
            .insert(NewUser {
                profile,
                password_hash,
                profile_picture: Some(key.clone()),
                roles: Role::default_set(),
                created_at: now,
                updated_at: now,
            })
            .await;
        let user = match inserted {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "user insert rejected by store");
                discard_picture(self.storage.as_ref(), &key).await;
                return Err(e.into());
            }
        };

        info!(user_id = user.id, username = %user.username(), "user created");
        Ok(user)
    }

    /// Full replace of the profile. Roles are reset to the default set and the
    /// password hash is left alone.
    pub async fn update(
        &self,
        actor: &Principal,
        id: i64,
        input: UpdateUser,
    ) -> Result<UserRecord, AppError> {
        let mut user = self.find_by_id(id).await?;
        let UpdateUser { profile, picture } = input;

        if let Some(other) = self.users.find_by_username(&profile.username).await? {
            if other.id != id {
                return Err(conflict(UniqueField::Username, &profile.username));
            }
        }
        if let Some(other) = self.users.find_by_email(&profile.email).await? {
            if other.id != id {
                return Err(conflict(UniqueField::Email, &profile.email));
            }
        }

        let mut new_key = None;
        if let Some(picture) = picture.filter(|p| !p.is_empty()) {
            let key = random_key(&picture);
            store_picture(self.storage.as_ref(), &key, picture).await?;
            user.profile_picture = Some(key.clone());
            new_key = Some(key);
        }

        user.profile = profile;
        user.roles = Role::default_set();
        user.updated_at = next_updated_at(user.updated_at, now_utc());

        let user = match self.users.update(&user).await {
            Ok(user) => user,
            Err(e) => {
                warn!(user_id = id, error = %e, "user update rejected by store");
                if let Some(key) = new_key {
                    discard_picture(self.storage.as_ref(), &key).await;
                }
                return Err(e.into());
            }
        };

        info!(user_id = id, actor = %actor.username, "user updated");
        Ok(user)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<UserRecord, AppError> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", id)))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<UserRecord, AppError> {
        self.users
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User not found with email {}", email)))
    }

    pub async fn find_by_username(&self, username: &str) -> Result<UserRecord, AppError> {
        self.users
            .find_by_username(username)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User not found with username {}", username)))
    }

    pub async fn list_all(&self) -> Result<Vec<UserRecord>, AppError> {
        Ok(self.users.list().await?)
    }

    /// Removes the record and returns it. The stored picture is left in place.
    pub async fn delete(&self, actor: &Principal, id: i64) -> Result<UserRecord, AppError> {
        let user = self.find_by_id(id).await?;
        if !self.users.delete(id).await? {
            // lost a race with another delete
            return Err(AppError::NotFound(format!("User with id {} not found", id)));
        }
        info!(user_id = id, actor = %actor.username, "user deleted");
        Ok(user)
    }

    pub async fn associate_profile_picture(
        &self,
        actor: &Principal,
        id: i64,
        upload: PictureUpload,
    ) -> Result<UserRecord, AppError> {
        if upload.is_empty() {
            return Err(AppError::InvalidPayload("Uploaded file is empty".into()));
        }
        let mut user = self.find_by_id(id).await?;

        let key = key_for_user(id, &upload);
        store_picture(self.storage.as_ref(), &key, upload).await?;

        user.profile_picture = Some(key);
        user.updated_at = next_updated_at(user.updated_at, now_utc());
        let user = self.users.update(&user).await?;

        info!(user_id = id, actor = %actor.username, "profile picture updated");
        Ok(user)
    }

    /// Public projection with a presigned picture URL.
    pub async fn view(&self, user: UserRecord) -> Result<UserView, AppError> {
        let url = match user.profile_picture.as_deref() {
            Some(key) => Some(presign_picture(self.storage.as_ref(), key, self.url_ttl_secs).await?),
            None => None,
        };
        Ok(UserView::new(user, url))
    }

    pub async fn views(&self, users: Vec<UserRecord>) -> Result<Vec<UserView>, AppError> {
        let mut out = Vec::with_capacity(users.len());
        for user in users {
            out.push(self.view(user).await?);
        }
        Ok(out)
    }
}

fn conflict(field: UniqueField, value: &str) -> AppError {
    warn!(field = %field, "uniqueness check failed");
    AppError::conflict(field, value)
}

#[cfg(test)]
mod tests {
    use axum::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::storage::fake::FakeStorage;
    use crate::users::{
        memory::MemoryUserStore,
        repo::StoreResult,
        repo_types::Profile,
        test_support::{new_user, profile},
    };

    struct Fixture {
        service: UserService,
        users: Arc<MemoryUserStore>,
        storage: Arc<FakeStorage>,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MemoryUserStore::new());
        let storage = Arc::new(FakeStorage::default());
        let service = UserService::new(users.clone(), storage.clone(), 60);
        Fixture {
            service,
            users,
            storage,
        }
    }

    fn admin() -> Principal {
        Principal::new("root", [Role::Admin, Role::Normal])
    }

    fn picture(name: &str) -> PictureUpload {
        PictureUpload {
            body: Bytes::from_static(b"\x89PNG\r\n"),
            content_type: "image/png".into(),
            file_name: Some(name.into()),
        }
    }

    fn candidate(username: &str, email: &str, phone: &str) -> CreateUser {
        CreateUser {
            profile: profile(username, email, phone),
            password: "longenough1".into(),
            picture: Some(picture("me.png")),
        }
    }

    fn replacement(p: Profile) -> UpdateUser {
        UpdateUser {
            profile: p,
            picture: None,
        }
    }

    fn conflict_field(err: AppError) -> UniqueField {
        match err {
            AppError::Conflict { field, .. } => field,
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn create_assigns_normal_role_and_equal_timestamps() {
        let f = fixture();
        let user = f.service.create(candidate("alice", "alice@x.com", "+1000")).await.unwrap();

        assert_eq!(user.roles, Role::default_set());
        assert_eq!(user.created_at, user.updated_at);
        assert_ne!(user.password_hash, "longenough1");
        let key = user.profile_picture.clone().unwrap();
        assert!(key.starts_with("profile-pictures/") && key.ends_with(".png"));
        assert!(f.storage.objects.lock().await.contains_key(&key));
    }

    #[tokio::test]
    async fn duplicates_are_reported_username_then_email_then_phone() {
        let f = fixture();
        f.service.create(candidate("alice", "alice@x.com", "+1000")).await.unwrap();

        let all_same = f.service.create(candidate("alice", "alice@x.com", "+1000")).await;
        assert_eq!(conflict_field(all_same.unwrap_err()), UniqueField::Username);

        let same_email = f.service.create(candidate("bob", "alice@x.com", "+1000")).await;
        assert_eq!(conflict_field(same_email.unwrap_err()), UniqueField::Email);

        let same_phone = f.service.create(candidate("bob", "bob@x.com", "+1000")).await;
        let err = same_phone.unwrap_err();
        assert_eq!(err.to_string(), "Phone number '+1000' already exists");
        assert_eq!(conflict_field(err), UniqueField::Phone);
    }

    #[tokio::test]
    async fn create_requires_a_named_non_empty_picture() {
        let f = fixture();

        let mut missing = candidate("alice", "alice@x.com", "+1000");
        missing.picture = None;
        assert!(matches!(f.service.create(missing).await, Err(AppError::InvalidPayload(_))));

        let mut empty = candidate("alice", "alice@x.com", "+1000");
        empty.picture = Some(PictureUpload {
            body: Bytes::new(),
            ..picture("me.png")
        });
        assert!(matches!(f.service.create(empty).await, Err(AppError::InvalidPayload(_))));

        let mut unnamed = candidate("alice", "alice@x.com", "+1000");
        unnamed.picture = Some(PictureUpload {
            file_name: Some("".into()),
            ..picture("me.png")
        });
        assert!(matches!(f.service.create(unnamed).await, Err(AppError::InvalidPayload(_))));

        assert!(f.users.list().await.unwrap().is_empty());
        assert!(f.storage.objects.lock().await.is_empty());
    }

    #[tokio::test]
    async fn update_to_another_users_email_conflicts_and_leaves_record_alone() {
        let f = fixture();
        let one = f.users.seed(new_user("alice", "alice@x.com", "+1000")).await;
        f.users.seed(new_user("bob", "bob@x.com", "+2000")).await;

        let mut p = one.profile.clone();
        p.email = "bob@x.com".into();
        let err = f.service.update(&admin(), one.id, replacement(p)).await.unwrap_err();
        assert_eq!(conflict_field(err), UniqueField::Email);

        assert_eq!(f.users.find_by_id(one.id).await.unwrap().unwrap(), one);
    }

    #[tokio::test]
    async fn update_phone_collision_comes_back_from_the_store() {
        let f = fixture();
        let one = f.users.seed(new_user("alice", "alice@x.com", "+1000")).await;
        f.users.seed(new_user("bob", "bob@x.com", "+2000")).await;

        let mut p = one.profile.clone();
        p.phone = "+2000".into();
        let err = f.service.update(&admin(), one.id, replacement(p)).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "Phone number '+2000' already exists");
        assert_eq!(conflict_field(err), UniqueField::Phone);
    }

    #[tokio::test]
    async fn rejected_update_leaves_no_stored_picture() {
        let f = fixture();
        let one = f.users.seed(new_user("alice", "alice@x.com", "+1000")).await;
        f.users.seed(new_user("bob", "bob@x.com", "+2000")).await;

        let mut p = one.profile.clone();
        p.phone = "+2000".into();
        let update = UpdateUser {
            profile: p,
            picture: Some(picture("new.png")),
        };
        let err = f.service.update(&admin(), one.id, update).await.unwrap_err();
        assert_eq!(conflict_field(err), UniqueField::Phone);

        assert!(f.storage.objects.lock().await.is_empty());
        assert_eq!(f.users.find_by_id(one.id).await.unwrap().unwrap(), one);
    }

    /// Store whose existence checks always miss, as if a concurrent insert
    /// landed between the check and the write.
    struct LateDuplicateStore(MemoryUserStore);

    #[async_trait]
    impl UserStore for LateDuplicateStore {
        async fn find_by_id(&self, id: i64) -> StoreResult<Option<UserRecord>> {
            self.0.find_by_id(id).await
        }
        async fn find_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
            self.0.find_by_username(username).await
        }
        async fn find_by_email(&self, email: &str) -> StoreResult<Option<UserRecord>> {
            self.0.find_by_email(email).await
        }
        async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<UserRecord>> {
            self.0.find_by_phone(phone).await
        }
        async fn list(&self) -> StoreResult<Vec<UserRecord>> {
            self.0.list().await
        }
        async fn insert(&self, user: NewUser) -> StoreResult<UserRecord> {
            self.0.insert(user).await
        }
        async fn update(&self, user: &UserRecord) -> StoreResult<UserRecord> {
            self.0.update(user).await
        }
        async fn delete(&self, id: i64) -> StoreResult<bool> {
            self.0.delete(id).await
        }
        async fn exists_by_username(&self, _: &str) -> StoreResult<bool> {
            Ok(false)
        }
        async fn exists_by_email(&self, _: &str) -> StoreResult<bool> {
            Ok(false)
        }
        async fn exists_by_phone(&self, _: &str) -> StoreResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn create_losing_the_insert_race_removes_its_picture() {
        let inner = MemoryUserStore::new();
        inner.seed(new_user("alice", "alice@x.com", "+1000")).await;
        let storage = Arc::new(FakeStorage::default());
        let service = UserService::new(Arc::new(LateDuplicateStore(inner)), storage.clone(), 60);

        let err = service
            .create(candidate("alice", "other@x.com", "+9999"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Username 'alice' already exists");
        assert_eq!(conflict_field(err), UniqueField::Username);
        assert!(storage.objects.lock().await.is_empty());
    }

    #[tokio::test]
    async fn update_replaces_profile_resets_roles_and_keeps_password() {
        let f = fixture();
        let mut seeded = new_user("alice", "alice@x.com", "+1000");
        seeded.roles.insert(Role::Admin);
        let one = f.users.seed(seeded).await;

        let mut p = one.profile.clone();
        p.username = "alice2".into();
        p.bio = Some("hello".into());
        let updated = f.service.update(&admin(), one.id, replacement(p.clone())).await.unwrap();

        assert_eq!(updated.profile, p);
        assert_eq!(updated.roles, Role::default_set());
        assert_eq!(updated.password_hash, one.password_hash);
        assert_eq!(updated.created_at, one.created_at);
        assert!(updated.updated_at > one.updated_at);
        assert_eq!(updated.profile_picture, one.profile_picture);
    }

    #[tokio::test]
    async fn update_keeping_own_username_and_email_is_allowed() {
        let f = fixture();
        let one = f.users.seed(new_user("alice", "alice@x.com", "+1000")).await;
        let update = UpdateUser {
            profile: one.profile.clone(),
            picture: Some(picture("new.png")),
        };
        let updated = f.service.update(&admin(), one.id, update).await.unwrap();
        assert!(updated.profile_picture.is_some());
        assert_eq!(f.storage.objects.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let f = fixture();
        let err = f
            .service
            .update(&admin(), 42, replacement(profile("x", "x@x.com", "1")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn lookups_report_the_missing_key() {
        let f = fixture();
        let seeded = f.users.seed(new_user("alice", "alice@x.com", "+1000")).await;

        assert_eq!(f.service.find_by_id(seeded.id).await.unwrap().id, seeded.id);
        assert_eq!(f.service.find_by_email("alice@x.com").await.unwrap().id, seeded.id);
        assert_eq!(f.service.find_by_username("alice").await.unwrap().id, seeded.id);

        let err = f.service.find_by_id(99).await.unwrap_err();
        assert!(err.to_string().contains("99"));
        let err = f.service.find_by_email("ghost@x.com").await.unwrap_err();
        assert!(err.to_string().contains("ghost@x.com"));
        let err = f.service.find_by_username("ghost").await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn list_all_returns_every_record() {
        let f = fixture();
        f.users.seed(new_user("alice", "alice@x.com", "+1000")).await;
        f.users.seed(new_user("bob", "bob@x.com", "+2000")).await;
        assert_eq!(f.service.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_removes_the_record_and_unknown_id_is_not_found() {
        let f = fixture();
        let seeded = f.users.seed(new_user("alice", "alice@x.com", "+1000")).await;

        let removed = f.service.delete(&admin(), seeded.id).await.unwrap();
        assert_eq!(removed.username(), "alice");
        assert!(f.users.find_by_id(seeded.id).await.unwrap().is_none());

        let err = f.service.delete(&admin(), 99).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn picture_association_stores_blob_and_bumps_updated_at() {
        let f = fixture();
        let seeded = f.users.seed(new_user("alice", "alice@x.com", "+1000")).await;

        let updated = f
            .service
            .associate_profile_picture(&admin(), seeded.id, picture("holiday pic.jpg"))
            .await
            .unwrap();

        let key = format!("profile-pictures/profile_{}_holiday_pic.jpg", seeded.id);
        assert_eq!(updated.profile_picture.as_deref(), Some(key.as_str()));
        assert!(updated.updated_at > seeded.updated_at);
        assert!(f.storage.objects.lock().await.contains_key(&key));
    }

    #[tokio::test]
    async fn empty_picture_is_rejected_before_lookup() {
        let f = fixture();
        let empty = PictureUpload {
            body: Bytes::new(),
            ..picture("a.png")
        };
        let err = f.service.associate_profile_picture(&admin(), 99, empty).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidPayload(_)));

        let err = f
            .service
            .associate_profile_picture(&admin(), 99, picture("a.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn view_presigns_the_picture_and_hides_the_hash() {
        let f = fixture();
        let user = f.service.create(candidate("alice", "alice@x.com", "+1000")).await.unwrap();
        let key = user.profile_picture.clone().unwrap();

        let view = f.service.view(user).await.unwrap();
        assert_eq!(view.profile_picture_url, Some(format!("https://fake.local/{}", key)));

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["username"], "alice");
        assert_eq!(json["roles"], serde_json::json!(["NORMAL"]));
    }
}
