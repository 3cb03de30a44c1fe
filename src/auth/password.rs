use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD as BASE64};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::Sha256;

use crate::error::CoreResult;

const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

/// Produces `pbkdf2-sha256$<iterations>$<salt>$<hash>`.
pub fn hash_password(password: &str, iterations: u32) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill(&mut salt);

    let hash = derive(password, &salt, iterations);
    format!("{SCHEME}${iterations}${}${}", BASE64.encode(salt), BASE64.encode(hash))
}

pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(iterations), Some(salt), Some(hash), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (BASE64.decode(salt), BASE64.decode(hash)) else {
        return false;
    };
    if expected.len() != HASH_LEN {
        return false;
    }

    let actual = derive(password, &salt, iterations);
    actual.iter().zip(&expected).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// [`hash_password`] on the blocking pool, off the async workers.
pub async fn hash_password_blocking(password: String, iterations: u32) -> CoreResult<String> {
    let hashed = tokio::task::spawn_blocking(move || hash_password(&password, iterations))
        .await
        .map_err(anyhow::Error::from)?;
    Ok(hashed)
}

/// [`verify_password`] on the blocking pool, off the async workers.
pub async fn verify_password_blocking(stored: String, password: String) -> CoreResult<bool> {
    let matches = tokio::task::spawn_blocking(move || verify_password(&stored, &password))
        .await
        .map_err(anyhow::Error::from)?;
    Ok(matches)
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_password_verifies() {
        let stored = hash_password("hunter22", 10);
        assert!(stored.starts_with("pbkdf2-sha256$10$"));
        assert!(verify_password(&stored, "hunter22"));
        assert!(!verify_password(&stored, "hunter23"));
    }

    #[tokio::test]
    async fn blocking_pool_variants_agree() {
        let stored = hash_password_blocking("hunter22".into(), 10).await.unwrap();
        assert!(verify_password_blocking(stored.clone(), "hunter22".into()).await.unwrap());
        assert!(!verify_password_blocking(stored, "nope".into()).await.unwrap());
    }

    #[test]
    fn salts_differ_between_hashes() {
        assert_ne!(hash_password("same", 10), hash_password("same", 10));
    }

    #[test]
    fn garbage_never_verifies() {
        assert!(!verify_password("", "x"));
        assert!(!verify_password("plain-text", "plain-text"));
        assert!(!verify_password("pbkdf2-sha256$ten$AAAA$AAAA", "x"));
    }
}
