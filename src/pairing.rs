//! Pairing table
//!
//! Symmetric partner relation stored as two reciprocal entries.
//! A username belongs to at most one pairing; both entries are
//! installed and removed together.

use std::collections::HashMap;

use crate::error::PairingError;

#[derive(Debug, Default)]
pub struct PairingTable {
    partners: HashMap<String, String>,
}

impl PairingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair `a` with `b`.
    ///
    /// Fails without changing anything if either side is already paired.
    pub fn pair(&mut self, a: &str, b: &str) -> Result<(), PairingError> {
        if a == b {
            return Err(PairingError::SelfPairing);
        }
        for user in [a, b] {
            if self.partners.contains_key(user) {
                return Err(PairingError::AlreadyPaired(user.to_string()));
            }
        }
        self.partners.insert(a.to_string(), b.to_string());
        self.partners.insert(b.to_string(), a.to_string());
        Ok(())
    }

    pub fn partner_of(&self, username: &str) -> Option<&str> {
        self.partners.get(username).map(String::as_str)
    }

    pub fn is_paired(&self, username: &str) -> bool {
        self.partners.contains_key(username)
    }

    /// Dissolve the pairing containing `username`.
    ///
    /// Returns the former partner so the caller can notify them.
    pub fn unpair(&mut self, username: &str) -> Option<String> {
        let partner = self.partners.remove(username)?;
        if self.partners.get(&partner).map(String::as_str) == Some(username) {
            self.partners.remove(&partner);
        }
        Some(partner)
    }

    /// Number of active pairings
    pub fn pair_count(&self) -> usize {
        self.partners.len() / 2
    }
}
