//! Salted PBKDF2-HMAC-SHA256 password digests.
//!
//! Digests use the `pbkdf2:sha256:<iterations>$<salt>$<hex>` layout, so accounts
//! created by older deployments of the site keep verifying.

use pbkdf2::pbkdf2_hmac;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::Sha256;

pub const DEFAULT_ITERATIONS: u32 = 600_000;
const SALT_LENGTH: usize = 8;
const DIGEST_LEN: usize = 32;
const METHOD: &str = "pbkdf2:sha256";

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self { iterations: iterations.max(1) }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Hashes `password` under a fresh random salt.
    pub fn hash(&self, password: &str) -> String {
        let salt: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SALT_LENGTH)
            .map(char::from)
            .collect();
        let digest = derive(password, &salt, self.iterations);
        format!("{METHOD}:{}${salt}${}", self.iterations, hex::encode(digest))
    }

    /// Recomputes the digest with the salt and cost embedded in `stored`.
    /// Malformed or foreign digests never verify.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let Some((method, salt, expected_hex)) = split_digest(stored) else { return false };
        let Some(iterations) = method
            .strip_prefix(METHOD)
            .and_then(|rest| rest.strip_prefix(':'))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            return false;
        };
        let Ok(expected) = hex::decode(expected_hex) else { return false };
        if expected.len() != DIGEST_LEN || iterations == 0 {
            return false;
        }
        let actual = derive(password, salt, iterations);
        constant_time_eq(&actual, &expected)
    }
}

fn split_digest(stored: &str) -> Option<(&str, &str, &str)> {
    let mut parts = stored.splitn(3, '$');
    let method = parts.next()?;
    let salt = parts.next()?;
    let hash = parts.next()?;
    Some((method, salt, hash))
}

fn derive(password: &str, salt: &str, iterations: u32) -> [u8; DIGEST_LEN] {
    let mut out = [0u8; DIGEST_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut out);
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(1_000)
    }

    #[test]
    fn hash_and_verify() {
        let h = hasher();
        let digest = h.hash("pw123");
        assert_ne!(digest, "pw123");
        assert!(digest.starts_with("pbkdf2:sha256:1000$"));
        assert!(h.verify("pw123", &digest));
        assert!(!h.verify("pw124", &digest));
    }

    #[test]
    fn salts_differ_between_calls() {
        let h = hasher();
        let a = h.hash("same");
        let b = h.hash("same");
        assert_ne!(a, b);
        let salt = a.split('$').nth(1).unwrap();
        assert_eq!(salt.len(), SALT_LENGTH);
    }

    #[test]
    fn cost_is_read_from_the_digest() {
        let digest = PasswordHasher::new(10).hash("pw");
        // a hasher configured with another cost still verifies older digests
        assert!(hasher().verify("pw", &digest));
    }

    #[test]
    fn known_vector_verifies() {
        // PBKDF2-HMAC-SHA256("password", "salt", c = 1)
        let stored = "pbkdf2:sha256:1$salt$120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b";
        assert!(hasher().verify("password", stored));
        assert!(!hasher().verify("Password", stored));
    }

    #[test]
    fn malformed_digests_are_rejected() {
        let h = hasher();
        for bad in ["", "plaintext", "pbkdf2:sha256$salt$00", "scrypt:32768:8:1$salt$00", "pbkdf2:sha256:10$salt$zz"] {
            assert!(!h.verify("pw", bad), "{bad} should not verify");
        }
    }
}
