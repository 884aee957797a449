//! Post-selection lifecycle
//!
//! Once a completed matchmaking session's winner has been applied to the
//! host's map queue, this module drives the mandatory runtime sequence
//! (match start, fake-player cleanup, map change, match end) until the server
//! is ready for the next group of players.

pub mod context;
pub mod engine;

pub use context::{ContextStatus, LifecycleContext, LifecycleStage, StageTransition};
pub use engine::{LifecycleSignal, MatchmakingLifecycleEngine};
