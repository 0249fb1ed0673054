use crate::auth::{jwt::JwtKeys, password::hash_password};
use crate::config::JwtConfig;
use crate::users::repo_types::{now_utc, NewUser, Profile, Role};

pub const TEST_PASSWORD: &str = "longenough1";

pub fn profile(username: &str, email: &str, phone: &str) -> Profile {
    Profile {
        first_name: "Test".into(),
        middle_name: None,
        last_name: "User".into(),
        username: username.into(),
        email: email.into(),
        phone: phone.into(),
        country: None,
        gender: None,
        relationship_status: None,
        bio: None,
    }
}

pub fn new_user(username: &str, email: &str, phone: &str) -> NewUser {
    let now = now_utc();
    NewUser {
        profile: profile(username, email, phone),
        password_hash: hash_password(TEST_PASSWORD).unwrap(),
        profile_picture: None,
        roles: Role::default_set(),
        created_at: now,
        updated_at: now,
    }
}

pub fn new_admin(username: &str, email: &str, phone: &str) -> NewUser {
    let mut user = new_user(username, email, phone);
    user.roles.insert(Role::Admin);
    user
}

pub fn test_jwt_config() -> JwtConfig {
    JwtConfig {
        secret: "test-secret".into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        ttl_minutes: 5,
    }
}

pub fn test_jwt_keys() -> JwtKeys {
    JwtKeys::new(&test_jwt_config())
}
