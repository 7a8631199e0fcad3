//! The PA's session map: a concurrent map keyed by opaque
//! session token, with per-entry expiry and a background sweeper.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Debug, Clone)]
pub struct Session {
    pub sku: String,
    pub authorized_methods: HashSet<String>,
    pub expires_at: Instant,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Concurrent session table. Creation is rare relative to lookup (spec
/// §9: "a single writer lock around 'create session' is sufficient");
/// `DashMap` gives fine-grained per-shard locking for both paths without
/// a dedicated global writer lock.
pub struct SessionMap {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionMap {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    pub fn create(&self, token: String, sku: String, authorized_methods: HashSet<String>) {
        self.sessions.insert(
            token,
            Session {
                sku,
                authorized_methods,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get(&self, token: &str) -> Option<Session> {
        let session = self.sessions.get(token)?;
        if session.is_expired() {
            return None;
        }
        Some(session.clone())
    }

    pub fn remove_for_sku(&self, token: &str, sku: &str) -> bool {
        let matched = self
            .sessions
            .get(token)
            .map(|s| s.sku == sku)
            .unwrap_or(false);
        if matched {
            self.sessions.remove(token);
        }
        matched
    }

    /// Remove every expired entry. Run periodically by a background
    /// sweeper task.
    pub fn sweep_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_expired());
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_sessions_are_not_returned() {
        let map = SessionMap::new(Duration::from_millis(1));
        map.create("tok".to_string(), "sival".to_string(), HashSet::new());
        std::thread::sleep(Duration::from_millis(5));
        assert!(map.get("tok").is_none());
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let map = SessionMap::new(Duration::from_secs(60));
        map.create("fresh".to_string(), "sival".to_string(), HashSet::new());
        let expired_map = SessionMap::new(Duration::from_millis(1));
        expired_map.create("stale".to_string(), "sival".to_string(), HashSet::new());
        std::thread::sleep(Duration::from_millis(5));

        assert_eq!(map.sweep_expired(), 0);
        assert_eq!(expired_map.sweep_expired(), 1);
        assert!(map.get("fresh").is_some());
    }

    #[test]
    fn remove_for_sku_only_removes_a_matching_session() {
        let map = SessionMap::new(Duration::from_secs(60));
        map.create("tok".to_string(), "sival".to_string(), HashSet::new());
        assert!(!map.remove_for_sku("tok", "cr01"));
        assert!(map.get("tok").is_some());
        assert!(map.remove_for_sku("tok", "sival"));
        assert!(map.get("tok").is_none());
    }
}
