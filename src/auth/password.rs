use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use rand::rngs::OsRng;
use tracing::warn;

lazy_static! {
    // Verified against when the email is unknown so both login failures cost one argon2 run.
    static ref UNKNOWN_USER_HASH: Option<String> = hash_password("unknown-user").ok();
}

/// Argon2id hash in PHC string form with a fresh random salt.
pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    if plain.is_empty() {
        anyhow::bail!("refusing to hash an empty password");
    }
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hash: {e}"))?;
    Ok(hash.to_string())
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is unreadable.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("stored password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Burns one verification for a login attempt against a missing account.
pub fn verify_unknown_user(plain: &str) {
    match UNKNOWN_USER_HASH.as_deref() {
        Some(hash) => {
            let _ = verify_password(plain, hash);
        }
        None => warn!("placeholder password hash unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_password("testpass123").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("testpass123", &hash).unwrap());
        assert!(!verify_password("testpass124", &hash).unwrap());
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        assert_ne!(hash_password("pw12345").unwrap(), hash_password("pw12345").unwrap());
    }

    #[test]
    fn verify_is_case_sensitive() {
        let hash = hash_password("TestPass123").unwrap();
        assert!(!verify_password("testpass123", &hash).unwrap());
    }

    #[test]
    fn empty_password_is_never_hashed() {
        assert!(hash_password("").is_err());
    }

    #[test]
    fn unreadable_hash_is_an_error() {
        assert!(verify_password("anything", "not-a-valid-hash").is_err());
    }

    #[test]
    fn placeholder_hash_exists_and_matches_nothing_real() {
        let hash = UNKNOWN_USER_HASH.as_deref().unwrap();
        assert!(!verify_password("testpass123", hash).unwrap());
        verify_unknown_user("testpass123");
    }
}
