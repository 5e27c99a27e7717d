//! Presence registry
//!
//! Maps logged-in usernames to the connection currently serving them.
//! A username appears at most once; the latest login wins.

use std::collections::HashMap;

use crate::types::{ClientId, Status};

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    online: HashMap<String, ClientId>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `username` on `handle`.
    ///
    /// Returns the previous handle if a different connection was evicted.
    pub fn mark_online(&mut self, username: &str, handle: ClientId) -> Option<ClientId> {
        self.online
            .insert(username.to_string(), handle)
            .filter(|previous| *previous != handle)
    }

    /// Remove `username` regardless of handle (idempotent)
    pub fn mark_offline(&mut self, username: &str) -> Option<ClientId> {
        self.online.remove(username)
    }

    /// Remove `username` only if it is still served by `handle`
    pub fn release(&mut self, username: &str, handle: ClientId) -> bool {
        if self.online.get(username) == Some(&handle) {
            self.online.remove(username);
            true
        } else {
            false
        }
    }

    pub fn lookup(&self, username: &str) -> Option<ClientId> {
        self.online.get(username).copied()
    }

    pub fn is_online(&self, username: &str) -> bool {
        self.online.contains_key(username)
    }

    pub fn status(&self, username: &str) -> Status {
        if self.is_online(username) {
            Status::Online
        } else {
            Status::Offline
        }
    }

    /// Live status for each of `usernames`
    pub fn snapshot_status<'a, I>(&self, usernames: I) -> HashMap<String, Status>
    where
        I: IntoIterator<Item = &'a str>,
    {
        usernames
            .into_iter()
            .map(|u| (u.to_string(), self.status(u)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_offline() {
        let mut presence = PresenceRegistry::new();
        let id = ClientId::new();

        assert!(presence.mark_online("alice", id).is_none());
        assert_eq!(presence.lookup("alice"), Some(id));
        assert_eq!(presence.status("alice"), Status::Online);

        assert_eq!(presence.mark_offline("alice"), Some(id));
        assert!(presence.mark_offline("alice").is_none());
        assert_eq!(presence.status("alice"), Status::Offline);
    }

    #[test]
    fn test_last_login_wins() {
        let mut presence = PresenceRegistry::new();
        let first = ClientId::new();
        let second = ClientId::new();

        presence.mark_online("alice", first);
        assert_eq!(presence.mark_online("alice", second), Some(first));
        assert_eq!(presence.lookup("alice"), Some(second));
        assert_eq!(presence.len(), 1);

        // Same handle again is not an eviction
        assert!(presence.mark_online("alice", second).is_none());
    }

    #[test]
    fn test_release_only_matching_handle() {
        let mut presence = PresenceRegistry::new();
        let stale = ClientId::new();
        let current = ClientId::new();
        presence.mark_online("alice", current);

        assert!(!presence.release("alice", stale));
        assert!(presence.is_online("alice"));
        assert!(presence.release("alice", current));
        assert!(presence.is_empty());
    }

    #[test]
    fn test_snapshot_status() {
        let mut presence = PresenceRegistry::new();
        presence.mark_online("bob", ClientId::new());

        let snapshot = presence.snapshot_status(["bob", "carol"]);
        assert_eq!(snapshot["bob"], Status::Online);
        assert_eq!(snapshot["carol"], Status::Offline);
    }
}
