use crate::users::{
    repo::{StoreResult, UserStore},
    repo_types::UserRecord,
};

/// Resolves a login identifier as a username, then an email, then a phone number.
///
/// Each of the three fields is unique on its own, so at most one record can
/// answer and the lookup order only decides which query finds it.
pub async fn resolve(store: &dyn UserStore, identifier: &str) -> StoreResult<Option<UserRecord>> {
    if let Some(user) = store.find_by_username(identifier).await? {
        return Ok(Some(user));
    }
    if let Some(user) = store.find_by_email(identifier).await? {
        return Ok(Some(user));
    }
    store.find_by_phone(identifier).await
}
