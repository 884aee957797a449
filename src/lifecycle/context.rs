//! Lifecycle context and ordered stage model

use crate::types::{
    ActionOutcome, ApplyBranch, EpochSeconds, MapInfo, MapUid, SessionId,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// History entries kept per context; older transitions fall off the front.
const MAX_HISTORY_ENTRIES: usize = 64;

/// Ordered stages of the post-selection sequence.
///
/// Transitions are only ever accepted forward; the numeric discriminant is
/// the ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Idle = 0,
    VetoCompleted = 1,
    SelectedMapLoaded = 2,
    MatchStarted = 3,
    SelectedMapFinished = 4,
    PlayersRemoved = 5,
    MapChanged = 6,
    MatchEnded = 7,
    ReadyForNextPlayers = 8,
}

impl LifecycleStage {
    pub fn index(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LifecycleStage::Idle => "idle",
            LifecycleStage::VetoCompleted => "veto_completed",
            LifecycleStage::SelectedMapLoaded => "selected_map_loaded",
            LifecycleStage::MatchStarted => "match_started",
            LifecycleStage::SelectedMapFinished => "selected_map_finished",
            LifecycleStage::PlayersRemoved => "players_removed",
            LifecycleStage::MapChanged => "map_changed",
            LifecycleStage::MatchEnded => "match_ended",
            LifecycleStage::ReadyForNextPlayers => "ready_for_next_players",
        };
        write!(f, "{}", name)
    }
}

/// Terminal/active status of one context instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    Active,
    Completed,
    Failed,
}

/// One recorded stage transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: LifecycleStage,
    pub at: EpochSeconds,
    pub source: String,
    pub details: String,
}

/// State of one armed post-selection cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleContext {
    pub session_id: SessionId,
    pub selected_map: MapInfo,
    pub stage: LifecycleStage,
    pub status: ContextStatus,
    pub armed_at: EpochSeconds,
    /// Map that was loaded when the queue apply happened.
    pub current_map_at_apply: MapUid,
    pub apply_branch: ApplyBranch,

    pub match_start: ActionOutcome,
    pub kick_all_players: ActionOutcome,
    pub map_change: ActionOutcome,
    pub match_end_mark: ActionOutcome,

    pub history: VecDeque<StageTransition>,
    pub ready_for_next_players: bool,
    pub resolution_reason: Option<String>,

    /// Runtime-poll cycles observed while still below `SelectedMapLoaded`.
    pub polls_below_loaded: u32,
}

impl LifecycleContext {
    pub fn new(
        session_id: SessionId,
        selected_map: MapInfo,
        current_map_at_apply: MapUid,
        apply_branch: ApplyBranch,
        now: EpochSeconds,
    ) -> Self {
        let mut context = Self {
            session_id,
            selected_map,
            stage: LifecycleStage::Idle,
            status: ContextStatus::Active,
            armed_at: now,
            current_map_at_apply,
            apply_branch,
            match_start: ActionOutcome::default(),
            kick_all_players: ActionOutcome::default(),
            map_change: ActionOutcome::default(),
            match_end_mark: ActionOutcome::default(),
            history: VecDeque::new(),
            ready_for_next_players: false,
            resolution_reason: None,
            polls_below_loaded: 0,
        };
        context.record_stage(LifecycleStage::VetoCompleted, now, "queue_apply", "armed");
        context
    }

    /// Record a forward stage transition.
    ///
    /// Idempotent: a stage at or below the current one changes nothing and
    /// appends no history entry. Returns whether the stage advanced.
    pub fn record_stage(
        &mut self,
        stage: LifecycleStage,
        now: EpochSeconds,
        source: &str,
        details: &str,
    ) -> bool {
        if stage.index() <= self.stage.index() {
            return false;
        }
        self.stage = stage;
        if self.history.len() >= MAX_HISTORY_ENTRIES {
            self.history.pop_front();
        }
        self.history.push_back(StageTransition {
            stage,
            at: now,
            source: source.to_string(),
            details: details.to_string(),
        });
        true
    }
}
