//! Credential store
//!
//! Owns the durable user records: username → password hash, display
//! name and contact list. The whole table is rewritten on every
//! mutation, through a temporary file and a rename so a crash never
//! leaves a half-written table behind. A failed write rolls the
//! in-memory change back.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CredentialError, StoreError};
use crate::password::PasswordHash;

/// Durable identity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Derived hash, never the raw password
    #[serde(rename = "password")]
    pub password_hash: PasswordHash,
    pub display_name: String,
    #[serde(default)]
    pub contacts: Vec<String>,
}

/// Result of a successful `add_contact`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactAdded {
    Added,
    AlreadyPresent,
}

/// Username-keyed user table backed by a JSON file
#[derive(Debug)]
pub struct CredentialStore {
    path: Option<PathBuf>,
    users: HashMap<String, User>,
}

impl CredentialStore {
    /// Open the store at `path`.
    ///
    /// A missing file is an empty store. An unreadable or corrupt file is
    /// logged and also treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let users = match load_users(&path) {
            Ok(users) => users,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load users, starting empty");
                HashMap::new()
            }
        };
        info!(path = %path.display(), users = users.len(), "Credential store opened");
        Self {
            path: Some(path),
            users,
        }
    }

    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            users: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn get(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// Display name of a registered user, if the record still exists
    pub fn display_name(&self, username: &str) -> Option<&str> {
        self.users.get(username).map(|u| u.display_name.as_str())
    }

    /// Create a new user
    pub fn register(
        &mut self,
        username: &str,
        password_hash: PasswordHash,
        display_name: &str,
    ) -> Result<(), CredentialError> {
        if self.users.contains_key(username) {
            return Err(CredentialError::AlreadyExists);
        }

        self.users.insert(
            username.to_string(),
            User {
                password_hash,
                display_name: display_name.to_string(),
                contacts: Vec::new(),
            },
        );

        if let Err(e) = self.save() {
            self.users.remove(username);
            return Err(e.into());
        }
        Ok(())
    }

    /// Check a derived password hash against the stored one.
    ///
    /// Unknown user and wrong password are the same error.
    pub fn authenticate(
        &self,
        username: &str,
        password_hash: &PasswordHash,
    ) -> Result<&User, CredentialError> {
        match self.users.get(username) {
            Some(user) if user.password_hash.matches(password_hash) => Ok(user),
            _ => Err(CredentialError::InvalidCredentials),
        }
    }

    /// Replace the password after re-checking the old one.
    ///
    /// `new` and `confirm` are compared first, before any lookup.
    pub fn change_password(
        &mut self,
        username: &str,
        old: &PasswordHash,
        new: PasswordHash,
        confirm: &PasswordHash,
    ) -> Result<(), CredentialError> {
        if !new.matches(confirm) {
            return Err(CredentialError::Mismatch);
        }

        let user = match self.users.get_mut(username) {
            Some(user) if user.password_hash.matches(old) => user,
            _ => return Err(CredentialError::InvalidOldPassword),
        };
        let previous = std::mem::replace(&mut user.password_hash, new);

        if let Err(e) = self.save() {
            if let Some(user) = self.users.get_mut(username) {
                user.password_hash = previous;
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Add `target` to the user's contacts (idempotent)
    pub fn add_contact(
        &mut self,
        username: &str,
        target: &str,
    ) -> Result<ContactAdded, CredentialError> {
        if !self.users.contains_key(target) {
            return Err(CredentialError::TargetNotFound);
        }
        if username == target {
            return Err(CredentialError::SelfContact);
        }
        let user = self
            .users
            .get_mut(username)
            .ok_or(CredentialError::UnknownUser)?;

        if user.contacts.iter().any(|c| c == target) {
            return Ok(ContactAdded::AlreadyPresent);
        }
        user.contacts.push(target.to_string());

        if let Err(e) = self.save() {
            if let Some(user) = self.users.get_mut(username) {
                user.contacts.retain(|c| c != target);
            }
            return Err(e.into());
        }
        Ok(ContactAdded::Added)
    }

    /// Remove `target` from the user's contacts
    pub fn remove_contact(&mut self, username: &str, target: &str) -> Result<(), CredentialError> {
        let user = self
            .users
            .get_mut(username)
            .ok_or(CredentialError::UnknownUser)?;

        let Some(index) = user.contacts.iter().position(|c| c == target) else {
            return Err(CredentialError::ContactNotFound);
        };
        let removed = user.contacts.remove(index);

        if let Err(e) = self.save() {
            if let Some(user) = self.users.get_mut(username) {
                user.contacts.insert(index, removed);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Contacts of `username` that still resolve to a user, with display names
    pub fn resolved_contacts(&self, username: &str) -> Vec<(&str, &str)> {
        let Some(user) = self.users.get(username) else {
            return Vec::new();
        };
        user.contacts
            .iter()
            .filter_map(|c| {
                self.users
                    .get(c)
                    .map(|u| (c.as_str(), u.display_name.as_str()))
            })
            .collect()
    }

    /// Rewrite the whole table
    fn save(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec(&self.users)?;
        write_atomic(path, &json)
    }
}

fn load_users(path: &Path) -> Result<HashMap<String, User>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::{PasswordHasher, Salt};

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(Salt::generate(), 10)
    }

    #[test]
    fn test_register_then_authenticate() {
        let hasher = hasher();
        let mut store = CredentialStore::in_memory();
        store.register("alice", hasher.hash("pw1"), "Alice").unwrap();

        let user = store.authenticate("alice", &hasher.hash("pw1")).unwrap();
        assert_eq!(user.display_name, "Alice");
        assert_ne!(user.password_hash.as_str(), "pw1");

        assert!(matches!(
            store.authenticate("alice", &hasher.hash("pw2")),
            Err(CredentialError::InvalidCredentials)
        ));
        assert!(matches!(
            store.authenticate("nobody", &hasher.hash("pw1")),
            Err(CredentialError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_register_duplicate() {
        let hasher = hasher();
        let mut store = CredentialStore::in_memory();
        store.register("alice", hasher.hash("pw1"), "Alice").unwrap();
        assert!(matches!(
            store.register("alice", hasher.hash("other"), "Other"),
            Err(CredentialError::AlreadyExists)
        ));
        assert_eq!(store.display_name("alice"), Some("Alice"));
    }

    #[test]
    fn test_change_password() {
        let hasher = hasher();
        let mut store = CredentialStore::in_memory();
        store.register("alice", hasher.hash("old"), "Alice").unwrap();

        assert!(matches!(
            store.change_password("alice", &hasher.hash("old"), hasher.hash("a"), &hasher.hash("b")),
            Err(CredentialError::Mismatch)
        ));
        assert!(matches!(
            store.change_password("alice", &hasher.hash("bad"), hasher.hash("new"), &hasher.hash("new")),
            Err(CredentialError::InvalidOldPassword)
        ));
        store
            .change_password("alice", &hasher.hash("old"), hasher.hash("new"), &hasher.hash("new"))
            .unwrap();

        assert!(store.authenticate("alice", &hasher.hash("new")).is_ok());
        assert!(store.authenticate("alice", &hasher.hash("old")).is_err());
        assert_eq!(store.display_name("alice"), Some("Alice"));
    }

    #[test]
    fn test_add_contact_idempotent() {
        let hasher = hasher();
        let mut store = CredentialStore::in_memory();
        store.register("alice", hasher.hash("pw"), "Alice").unwrap();
        store.register("bob", hasher.hash("pw"), "Bob").unwrap();

        assert_eq!(store.add_contact("alice", "bob").unwrap(), ContactAdded::Added);
        assert_eq!(
            store.add_contact("alice", "bob").unwrap(),
            ContactAdded::AlreadyPresent
        );
        assert_eq!(store.get("alice").unwrap().contacts, vec!["bob".to_string()]);
    }

    #[test]
    fn test_add_contact_rejections() {
        let hasher = hasher();
        let mut store = CredentialStore::in_memory();
        store.register("alice", hasher.hash("pw"), "Alice").unwrap();

        assert!(matches!(
            store.add_contact("alice", "carol"),
            Err(CredentialError::TargetNotFound)
        ));
        assert!(matches!(
            store.add_contact("alice", "alice"),
            Err(CredentialError::SelfContact)
        ));
    }

    #[test]
    fn test_remove_contact() {
        let hasher = hasher();
        let mut store = CredentialStore::in_memory();
        store.register("alice", hasher.hash("pw"), "Alice").unwrap();
        store.register("bob", hasher.hash("pw"), "Bob").unwrap();
        store.add_contact("alice", "bob").unwrap();

        store.remove_contact("alice", "bob").unwrap();
        assert!(store.get("alice").unwrap().contacts.is_empty());
        assert!(matches!(
            store.remove_contact("alice", "bob"),
            Err(CredentialError::ContactNotFound)
        ));
    }

    #[test]
    fn test_resolved_contacts_skips_dangling() {
        let hasher = hasher();
        let mut store = CredentialStore::in_memory();
        store.register("alice", hasher.hash("pw"), "Alice").unwrap();
        store.register("bob", hasher.hash("pw"), "Bob").unwrap();
        store.add_contact("alice", "bob").unwrap();
        store
            .users
            .get_mut("alice")
            .unwrap()
            .contacts
            .push("ghost".to_string());

        assert_eq!(store.resolved_contacts("alice"), vec![("bob", "Bob")]);
        assert!(store.resolved_contacts("nobody").is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let users_path = dir.path().join("users.json");
        let salt_path = dir.path().join("server.salt");

        {
            let hasher = PasswordHasher::new(Salt::load_or_create(&salt_path, &users_path).unwrap(), 10);
            let mut store = CredentialStore::open(&users_path);
            store.register("alice", hasher.hash("pw1"), "Alice").unwrap();
            store.register("bob", hasher.hash("pw2"), "Bob").unwrap();
            store.add_contact("alice", "bob").unwrap();
        }

        // Simulated restart: salt and table reloaded from disk
        let hasher = PasswordHasher::new(Salt::load_or_create(&salt_path, &users_path).unwrap(), 10);
        let store = CredentialStore::open(&users_path);
        assert_eq!(store.len(), 2);
        assert!(store.authenticate("alice", &hasher.hash("pw1")).is_ok());
        assert_eq!(store.get("alice").unwrap().contacts, vec!["bob".to_string()]);
        assert!(!dir.path().join("users.json.tmp").exists());
    }

    #[test]
    fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let users_path = dir.path().join("users.json");
        let mut store = CredentialStore::open(&users_path);
        store
            .register("alice", PasswordHash::from_hex("abcd".to_string()), "Alice")
            .unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&fs::read(&users_path).unwrap()).unwrap();
        assert_eq!(value["alice"]["password"], "abcd");
        assert_eq!(value["alice"]["display_name"], "Alice");
        assert_eq!(value["alice"]["contacts"], serde_json::json!([]));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let users_path = dir.path().join("users.json");
        fs::write(&users_path, b"{not json").unwrap();

        let store = CredentialStore::open(&users_path);
        assert!(store.is_empty());
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        // Parent directory does not exist, so every save fails
        let users_path = dir.path().join("missing").join("users.json");
        let hasher = hasher();
        let mut store = CredentialStore::open(&users_path);

        assert!(matches!(
            store.register("alice", hasher.hash("pw"), "Alice"),
            Err(CredentialError::Persist(_))
        ));
        assert!(!store.contains("alice"));
    }
}
