use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::{error, warn};

const DUMMY_PASSWORD: &str = "no-such-user-placeholder";

lazy_static! {
    static ref DUMMY_HASH: String = hash_password(DUMMY_PASSWORD).unwrap_or_default();
}

/// Hashes into a PHC string carrying algorithm, cost parameters and salt.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// False on mismatch and on a digest that does not parse.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "stored password hash is malformed");
            return false;
        }
    };
    Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok()
}

/// Spends one verification on a fixed hash when no user matched, so an unknown
/// identifier costs as much as a wrong password. Always false.
pub fn verify_unknown_user(plain: &str) -> bool {
    let _ = verify_password(plain, &DUMMY_HASH);
    false
}
