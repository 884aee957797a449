//! In-memory host implementation
//!
//! `LocalHost` backs the demo binary and the integration tests. It keeps the
//! whole host surface (map pool, queue, roster, chat, mode-script dispatch)
//! in plain mutex-guarded state and records every call so tests can assert on
//! the exact side effects the core performed.

use crate::error::{Result, VetoError};
use crate::host::{
    ChatBroadcaster, MapPoolProvider, MapQueueApplier, MapRuntime, ModeScriptDispatch,
    PlayerKicker, PlayerTracker,
};
use crate::types::{ApplyBranch, MapInfo, MapUid, PlayerIdentity, QueueApplyReport};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory game host with controllable failure switches
#[derive(Debug, Default)]
pub struct LocalHost {
    maps: Mutex<Vec<MapInfo>>,
    current_map: Mutex<MapUid>,
    queued: Mutex<Vec<MapUid>>,
    players: Mutex<Vec<PlayerIdentity>>,

    public_messages: Mutex<Vec<String>>,
    admin_messages: Mutex<Vec<String>>,
    kicked: Mutex<Vec<String>>,
    dispatched: Mutex<Vec<String>>,
    apply_calls: AtomicUsize,

    pub fail_queue_apply: AtomicBool,
    pub fail_send_event: AtomicBool,
    pub fail_command_batch: AtomicBool,
    pub fail_stop_warmup: AtomicBool,
    pub fail_skip_map: AtomicBool,
    pub fail_force_next: AtomicBool,
    pub fail_kick: AtomicBool,
    pub fail_roster: AtomicBool,
}

impl LocalHost {
    pub fn new(maps: Vec<MapInfo>) -> Self {
        let current = maps.first().map(|m| m.uid.clone()).unwrap_or_default();
        Self {
            maps: Mutex::new(maps),
            current_map: Mutex::new(current),
            ..Default::default()
        }
    }

    fn lock_err(what: &str) -> VetoError {
        VetoError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }

    pub fn set_current_map(&self, uid: &str) {
        if let Ok(mut current) = self.current_map.lock() {
            *current = uid.to_string();
        }
    }

    pub fn set_players(&self, players: Vec<PlayerIdentity>) {
        if let Ok(mut roster) = self.players.lock() {
            *roster = players;
        }
    }

    /// Recorded public broadcast lines (for testing)
    pub fn public_messages(&self) -> Vec<String> {
        self.public_messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Recorded admin broadcast lines (for testing)
    pub fn admin_messages(&self) -> Vec<String> {
        self.admin_messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Logins kicked so far (for testing)
    pub fn kicked_logins(&self) -> Vec<String> {
        self.kicked.lock().map(|k| k.clone()).unwrap_or_default()
    }

    /// Mode-script entrypoints invoked so far (for testing)
    pub fn dispatched_entrypoints(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    /// Number of queue-apply calls observed (for testing)
    pub fn queue_apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::Relaxed)
    }

    /// Map uids currently queued (for testing)
    pub fn queued_uids(&self) -> Vec<MapUid> {
        self.queued.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MapPoolProvider for LocalHost {
    async fn map_pool(&self) -> Result<Vec<MapInfo>> {
        let maps = self.maps.lock().map_err(|_| Self::lock_err("map pool"))?;
        Ok(maps.clone())
    }
}

#[async_trait]
impl PlayerTracker for LocalHost {
    async fn connected_human_count(&self) -> Result<usize> {
        if self.fail_roster.load(Ordering::Relaxed) {
            return Err(VetoError::RuntimeUnavailable {
                reason: "roster query rejected by host".to_string(),
            }
            .into());
        }
        let players = self.players.lock().map_err(|_| Self::lock_err("roster"))?;
        Ok(players.iter().filter(|p| !p.is_fake_player()).count())
    }

    async fn connected_players(&self) -> Result<Vec<PlayerIdentity>> {
        if self.fail_roster.load(Ordering::Relaxed) {
            return Err(VetoError::RuntimeUnavailable {
                reason: "roster query rejected by host".to_string(),
            }
            .into());
        }
        let players = self.players.lock().map_err(|_| Self::lock_err("roster"))?;
        Ok(players.clone())
    }
}

#[async_trait]
impl MapQueueApplier for LocalHost {
    async fn apply_map_order(&self, order: &[MapInfo]) -> Result<QueueApplyReport> {
        self.apply_calls.fetch_add(1, Ordering::Relaxed);

        if self.fail_queue_apply.load(Ordering::Relaxed) {
            return Err(VetoError::RuntimeUnavailable {
                reason: "queue applier rejected the order".to_string(),
            }
            .into());
        }
        let opener = order
            .first()
            .ok_or_else(|| VetoError::InvalidParameters {
                reason: "empty map order".to_string(),
            })?;

        let current = self
            .current_map
            .lock()
            .map_err(|_| Self::lock_err("current map"))?
            .clone();

        let branch = if current == opener.uid {
            ApplyBranch::OpenerAlreadyCurrent
        } else {
            ApplyBranch::OpenerDiffers
        };

        let uids: Vec<MapUid> = order.iter().map(|m| m.uid.clone()).collect();
        {
            let mut queued = self.queued.lock().map_err(|_| Self::lock_err("queue"))?;
            *queued = uids.clone();
        }

        Ok(QueueApplyReport {
            branch,
            queued_map_uids: uids,
            current_map_uid: current,
        })
    }
}

#[async_trait]
impl MapRuntime for LocalHost {
    async fn current_map_uid(&self) -> Result<MapUid> {
        let current = self
            .current_map
            .lock()
            .map_err(|_| Self::lock_err("current map"))?;
        Ok(current.clone())
    }

    async fn skip_current_map(&self) -> Result<()> {
        if self.fail_skip_map.load(Ordering::Relaxed) {
            return Err(VetoError::RuntimeUnavailable {
                reason: "skip rejected by host".to_string(),
            }
            .into());
        }
        self.advance_map()
    }

    async fn force_next_map(&self) -> Result<()> {
        if self.fail_force_next.load(Ordering::Relaxed) {
            return Err(VetoError::RuntimeUnavailable {
                reason: "force-next rejected by host".to_string(),
            }
            .into());
        }
        self.advance_map()
    }
}

impl LocalHost {
    /// Load the next queued map, mirroring what the host does on a skip.
    fn advance_map(&self) -> Result<()> {
        let mut queued = self.queued.lock().map_err(|_| Self::lock_err("queue"))?;
        let mut current = self
            .current_map
            .lock()
            .map_err(|_| Self::lock_err("current map"))?;

        if let Some(next) = queued.first().cloned() {
            if next == *current {
                queued.remove(0);
                if let Some(following) = queued.first().cloned() {
                    *current = following;
                }
            } else {
                *current = next;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlayerKicker for LocalHost {
    async fn kick_player(&self, login: &str, _reason: &str) -> Result<()> {
        if self.fail_kick.load(Ordering::Relaxed) {
            return Err(VetoError::RuntimeUnavailable {
                reason: format!("kick rejected for {}", login),
            }
            .into());
        }
        let mut kicked = self.kicked.lock().map_err(|_| Self::lock_err("kicked"))?;
        kicked.push(login.to_string());
        let mut players = self.players.lock().map_err(|_| Self::lock_err("roster"))?;
        players.retain(|p| p.login != login);
        Ok(())
    }
}

#[async_trait]
impl ModeScriptDispatch for LocalHost {
    async fn send_event(&self, event: &str) -> Result<()> {
        if self.fail_send_event.load(Ordering::Relaxed) {
            return Err(VetoError::RuntimeUnavailable {
                reason: "mode script event channel down".to_string(),
            }
            .into());
        }
        let mut dispatched = self
            .dispatched
            .lock()
            .map_err(|_| Self::lock_err("dispatched"))?;
        dispatched.push(format!("event:{}", event));
        Ok(())
    }

    async fn send_command_batch(&self, commands: &serde_json::Value) -> Result<()> {
        if self.fail_command_batch.load(Ordering::Relaxed) {
            return Err(VetoError::RuntimeUnavailable {
                reason: "mode script command channel down".to_string(),
            }
            .into());
        }
        let mut dispatched = self
            .dispatched
            .lock()
            .map_err(|_| Self::lock_err("dispatched"))?;
        dispatched.push(format!("commands:{}", commands));
        Ok(())
    }

    async fn stop_warmup(&self) -> Result<()> {
        if self.fail_stop_warmup.load(Ordering::Relaxed) {
            return Err(VetoError::RuntimeUnavailable {
                reason: "warmup control unavailable".to_string(),
            }
            .into());
        }
        let mut dispatched = self
            .dispatched
            .lock()
            .map_err(|_| Self::lock_err("dispatched"))?;
        dispatched.push("warmup_stop".to_string());
        Ok(())
    }
}

#[async_trait]
impl ChatBroadcaster for LocalHost {
    async fn broadcast_public(&self, message: &str) -> Result<()> {
        let mut messages = self
            .public_messages
            .lock()
            .map_err(|_| Self::lock_err("public messages"))?;
        messages.push(message.to_string());
        Ok(())
    }

    async fn broadcast_admins(&self, message: &str) -> Result<()> {
        let mut messages = self
            .admin_messages
            .lock()
            .map_err(|_| Self::lock_err("admin messages"))?;
        messages.push(message.to_string());
        Ok(())
    }
}
