//! Map Veto - multiplayer map selection core
//!
//! This crate provides the session, coordination, autostart and lifecycle
//! machinery for deciding the next map (or map series) on a game server:
//! crowd votes for matchmaking, captain pick/ban drafts for tournaments, and
//! the post-selection match cycle in between.

pub mod autostart;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handoff;
pub mod host;
pub mod lifecycle;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{Result, VetoError};
pub use types::*;

// Re-export key components
pub use coordinator::VetoDraftCoordinator;
pub use service::{HostAdapters, VetoService};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
