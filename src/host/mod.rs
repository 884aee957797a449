//! Host adapter contracts
//!
//! The core never talks to the game server directly. Every host capability is
//! behind one of these traits so failures become structured results and tests
//! can substitute in-memory implementations.

pub mod local;

use crate::error::Result;
use crate::types::{MapInfo, MapUid, PlayerIdentity, QueueApplyReport};
use async_trait::async_trait;

pub use local::LocalHost;

/// Ordered enumeration of the host's map pool
#[async_trait]
pub trait MapPoolProvider: Send + Sync {
    async fn map_pool(&self) -> Result<Vec<MapInfo>>;
}

/// Connectivity queries against the host's roster
#[async_trait]
pub trait PlayerTracker: Send + Sync {
    /// Number of connected human players (fakes excluded).
    async fn connected_human_count(&self) -> Result<usize>;

    /// All connected identities, fakes included.
    async fn connected_players(&self) -> Result<Vec<PlayerIdentity>>;
}

/// External collaborator that mutates the host's map queue to the decided order
#[async_trait]
pub trait MapQueueApplier: Send + Sync {
    async fn apply_map_order(&self, order: &[MapInfo]) -> Result<QueueApplyReport>;
}

/// Map runtime primitives
#[async_trait]
pub trait MapRuntime: Send + Sync {
    async fn current_map_uid(&self) -> Result<MapUid>;

    /// Skip the currently loaded map (primary map-change path).
    async fn skip_current_map(&self) -> Result<()>;

    /// Manager-level fallback when the direct skip fails.
    async fn force_next_map(&self) -> Result<()>;
}

/// Player disconnect primitive
#[async_trait]
pub trait PlayerKicker: Send + Sync {
    async fn kick_player(&self, login: &str, reason: &str) -> Result<()>;
}

/// Mode-script event/command dispatch primitives.
///
/// The lifecycle engine walks these as an ordered strategy list, stopping at
/// the first entrypoint that succeeds.
#[async_trait]
pub trait ModeScriptDispatch: Send + Sync {
    async fn send_event(&self, event: &str) -> Result<()>;

    async fn send_command_batch(&self, commands: &serde_json::Value) -> Result<()>;

    async fn stop_warmup(&self) -> Result<()>;
}

/// Role-aware chat broadcasting
#[async_trait]
pub trait ChatBroadcaster: Send + Sync {
    async fn broadcast_public(&self, message: &str) -> Result<()>;

    async fn broadcast_admins(&self, message: &str) -> Result<()>;
}
