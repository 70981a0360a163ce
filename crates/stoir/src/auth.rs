use sha2::{Digest, Sha256};

use crate::id::generate_salt;

pub struct PasswordHash {
    pub salt: String,
    pub hash: String,
}

pub fn hash_password(password: &str) -> PasswordHash {
    let salt = generate_salt();
    let hash = digest(&salt, password);
    PasswordHash { salt, hash }
}

pub fn verify_password(password: &str, salt: &str, expected: &str) -> bool {
    let actual = digest(salt, password);
    // Compare every byte so timing does not depend on the first mismatch.
    actual.len() == expected.len()
        && actual
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifies_correct_password() {
        let h = hash_password("rahasia");
        assert!(verify_password("rahasia", &h.salt, &h.hash));
        assert!(!verify_password("Rahasia", &h.salt, &h.hash));
        assert!(!verify_password("", &h.salt, &h.hash));
    }

    #[test]
    fn same_password_hashes_differently() {
        let a = hash_password("secret");
        let b = hash_password("secret");
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
    }
}
