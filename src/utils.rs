//! Utility functions for the map selection core

use crate::types::{EpochSeconds, SessionId};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Get the current wall clock as epoch seconds.
///
/// All timeout comparisons in the core operate at this granularity; the
/// periodic tick is the only driver of time-based behavior.
pub fn epoch_now() -> EpochSeconds {
    chrono::Utc::now().timestamp()
}

/// Normalize a login for case-insensitive comparisons and vote keys.
pub fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

/// Generator for session identifiers, injectable for reproducible tests.
pub trait IdGenerator: Send + Sync {
    fn next_session_id(&self) -> SessionId;
}

/// Default generator backed by random UUIDs
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_session_id(&self) -> SessionId {
        Uuid::new_v4()
    }
}

/// Deterministic generator producing a monotonic sequence of UUIDs.
///
/// Used in tests so session ids are stable across runs.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_session_id(&self) -> SessionId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Uuid::from_u128(n as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_login() {
        assert_eq!(normalize_login("Player1"), "player1");
        assert_eq!(normalize_login("  PLAYER1  "), "player1");
        assert_eq!(normalize_login("player1"), "player1");
    }

    #[test]
    fn test_uuid_generator_uniqueness() {
        let generator = UuidGenerator;
        assert_ne!(generator.next_session_id(), generator.next_session_id());
    }

    #[test]
    fn test_sequential_generator_is_monotonic() {
        let generator = SequentialIdGenerator::new();
        let first = generator.next_session_id();
        let second = generator.next_session_id();
        assert_ne!(first, second);
        assert_eq!(first, Uuid::from_u128(1));
        assert_eq!(second, Uuid::from_u128(2));
    }
}
