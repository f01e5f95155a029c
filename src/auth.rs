//src/auth.rs
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt::Write;

const SALT_LEN: usize = 16;
const TOKEN_LEN: usize = 32;

pub const LOGIN_TOKEN: &str = "login";

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn digest(salt_hex: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt_hex.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Hashes a password with a fresh random salt, stored as `salt_hex$digest_hex`.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt_hex = to_hex(&salt);
    let digest_hex = digest(&salt_hex, password);
    format!("{salt_hex}${digest_hex}")
}

/// Checks a password against a stored `salt$digest` value. Malformed values never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt_hex, digest_hex)) if !salt_hex.is_empty() && !digest_hex.is_empty() => {
            let candidate = digest(salt_hex, password);
            // Length is fixed, so compare every byte
            candidate.len() == digest_hex.len()
                && candidate
                    .bytes()
                    .zip(digest_hex.bytes())
                    .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                    == 0
        }
        _ => false,
    }
}

/// Generates a random opaque token, hex encoded. Only its `hash_token` is ever stored.
pub fn generate_token() -> String {
    let mut raw = [0u8; TOKEN_LEN];
    rand::thread_rng().fill_bytes(&mut raw);
    to_hex(&raw)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_password_verifies() {
        let stored = hash_password("s3nha-forte");
        assert!(verify_password("s3nha-forte", &stored));
        assert!(!verify_password("s3nha-fraca", &stored));
    }

    #[test]
    fn same_password_gets_different_salts() {
        let a = hash_password("abc");
        let b = hash_password("abc");
        assert_ne!(a, b);
        let (salt, digest) = a.split_once('$').unwrap();
        assert_eq!(salt.len(), SALT_LEN * 2);
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("abc", ""));
        assert!(!verify_password("abc", "no-separator"));
        assert!(!verify_password("abc", "$"));
        assert!(!verify_password("abc", "00ff$short"));
    }

    #[test]
    fn tokens_are_unique_and_hash_stably() {
        let t1 = generate_token();
        let t2 = generate_token();
        assert_ne!(t1, t2);
        assert_eq!(t1.len(), TOKEN_LEN * 2);
        assert_eq!(hash_token(&t1), hash_token(&t1));
        assert_ne!(hash_token(&t1), t1);
    }
}
