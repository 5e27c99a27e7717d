//! Password derivation
//!
//! One process-wide salt is generated on first start, persisted, and
//! loaded read-only on every later start. Passwords are derived with
//! PBKDF2-HMAC-SHA256 under that salt and a fixed iteration count, so
//! the same password always yields the same `PasswordHash`.

use std::fs;
use std::path::Path;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{error, info};

use crate::error::StoreError;

/// Salt length in bytes for newly generated salts
pub const SALT_LEN: usize = 32;

/// Derived key length in bytes
const HASH_LEN: usize = 32;

/// Global password salt
#[derive(Clone)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Generate a fresh random salt
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Load the salt from `path`, creating and persisting it if absent.
    ///
    /// `users_file` is only consulted to warn when a fresh salt orphans
    /// an existing credential table.
    pub fn load_or_create(path: &Path, users_file: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            let bytes = fs::read(path)?;
            if bytes.is_empty() {
                return Err(StoreError::EmptySalt);
            }
            return Ok(Self(bytes));
        }

        if users_file.exists() {
            error!(
                salt = %path.display(),
                users = %users_file.display(),
                "Salt file missing; existing credentials can no longer be verified"
            );
        }

        let salt = Self::generate();
        fs::write(path, &salt.0)?;
        info!(salt = %path.display(), "Generated new password salt");
        Ok(salt)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Salt(<{} bytes>)", self.0.len())
    }
}

/// Hex-encoded derived password hash, as stored in the credential table
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    /// Wrap an already-encoded hash
    pub fn from_hex(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Constant-time equality
    pub fn matches(&self, other: &PasswordHash) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl PartialEq for PasswordHash {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl Eq for PasswordHash {}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordHash(<redacted>)")
    }
}

/// Derives password hashes with the global salt
///
/// Immutable for the process lifetime; share it behind an `Arc`.
#[derive(Debug)]
pub struct PasswordHasher {
    salt: Salt,
    iterations: u32,
}

impl PasswordHasher {
    pub fn new(salt: Salt, iterations: u32) -> Self {
        Self {
            salt,
            iterations: iterations.max(1),
        }
    }

    /// Derive the hash of `password`. CPU-bound; call from a blocking context.
    pub fn hash(&self, password: &str) -> PasswordHash {
        let mut out = [0u8; HASH_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(
            password.as_bytes(),
            self.salt.as_bytes(),
            self.iterations,
            &mut out,
        );
        PasswordHash(hex::encode(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(Salt::generate(), 10)
    }

    #[test]
    fn test_hash_is_not_plaintext() {
        let h = hasher().hash("pw1");
        assert_ne!(h.as_str(), "pw1");
        assert_eq!(h.as_str().len(), HASH_LEN * 2);
    }

    #[test]
    fn test_hash_deterministic_per_salt() {
        let hasher = hasher();
        assert_eq!(hasher.hash("pw1"), hasher.hash("pw1"));
        assert_ne!(hasher.hash("pw1"), hasher.hash("pw2"));
    }

    #[test]
    fn test_different_salts_differ() {
        let a = PasswordHasher::new(Salt::generate(), 10);
        let b = PasswordHasher::new(Salt::generate(), 10);
        assert_ne!(a.hash("pw1"), b.hash("pw1"));
    }

    #[test]
    fn test_known_vector() {
        // RFC 7914 section 11 PBKDF2-HMAC-SHA256 vector, first 32 bytes
        let hasher = PasswordHasher::new(Salt(b"salt".to_vec()), 1);
        assert_eq!(
            hasher.hash("passwd").as_str(),
            "55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc"
        );
    }

    #[test]
    fn test_salt_persisted_once() {
        let dir = tempfile::tempdir().unwrap();
        let salt_path = dir.path().join("server.salt");
        let users_path = dir.path().join("users.json");

        let first = Salt::load_or_create(&salt_path, &users_path).unwrap();
        let second = Salt::load_or_create(&salt_path, &users_path).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
        assert_eq!(first.as_bytes().len(), SALT_LEN);

        let a = PasswordHasher::new(first, 10);
        let b = PasswordHasher::new(second, 10);
        assert_eq!(a.hash("pw"), b.hash("pw"));
    }

    #[test]
    fn test_empty_salt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let salt_path = dir.path().join("server.salt");
        fs::write(&salt_path, b"").unwrap();

        let err = Salt::load_or_create(&salt_path, &dir.path().join("users.json")).unwrap_err();
        assert!(matches!(err, StoreError::EmptySalt));
    }

    #[test]
    fn test_debug_redacts() {
        let h = hasher().hash("secret");
        assert_eq!(format!("{:?}", h), "PasswordHash(<redacted>)");
    }
}
