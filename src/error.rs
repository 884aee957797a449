//! Error types for the map selection core
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Every variant carries a stable string code that
//! mutating operations surface in their structured replies.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific map-selection scenarios
#[derive(Debug, thiserror::Error)]
pub enum VetoError {
    #[error("Another session is already active: {session_id}")]
    SessionActive { session_id: String },

    #[error("No session is currently running")]
    SessionNotRunning,

    #[error("Invalid mode: {mode}")]
    InvalidMode { mode: String },

    #[error("Invalid parameters: {reason}")]
    InvalidParameters { reason: String },

    #[error("Actor '{login}' is not allowed to act: {reason}")]
    ActorNotAllowed { login: String, reason: String },

    #[error("Matchmaking ready gate is not armed")]
    MatchmakingReadyRequired,

    #[error("Required capability is not wired: {capability}")]
    CapabilityUnavailable { capability: String },

    #[error("Host runtime is unavailable: {reason}")]
    RuntimeUnavailable { reason: String },

    #[error("All match start entrypoints failed")]
    MatchStartDispatchFailed,

    #[error("Map change failed: {reason}")]
    MapChangeFailed { reason: String },

    #[error("Some player kicks failed: {failed} of {attempted}")]
    KickAllPartialFailure { failed: usize, attempted: usize },

    #[error("All match end entrypoints failed")]
    MatchEndMarkFailed,

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl VetoError {
    /// Stable machine-readable code surfaced in command/RPC replies.
    pub fn code(&self) -> &'static str {
        match self {
            VetoError::SessionActive { .. } => "session_active",
            VetoError::SessionNotRunning => "session_not_running",
            VetoError::InvalidMode { .. } => "invalid_mode",
            VetoError::InvalidParameters { .. } => "invalid_parameters",
            VetoError::ActorNotAllowed { .. } => "actor_not_allowed",
            VetoError::MatchmakingReadyRequired => "matchmaking_ready_required",
            VetoError::CapabilityUnavailable { .. } => "capability_unavailable",
            VetoError::RuntimeUnavailable { .. } => "runtime_unavailable",
            VetoError::MatchStartDispatchFailed => "match_start_dispatch_failed",
            VetoError::MapChangeFailed { .. } => "map_change_failed",
            VetoError::KickAllPartialFailure { .. } => "kick_all_partial_failure",
            VetoError::MatchEndMarkFailed => "match_end_mark_failed",
            VetoError::InternalError { .. } => "internal_error",
        }
    }
}
