//! Tournament draft session
//!
//! Structured ban/pick sequence between two team captains. The step plan is
//! fixed at session start from the pool size and series length; the final
//! remaining map is locked by the system as the decider.

use crate::error::{Result, VetoError};
use crate::session::resolve_selection;
use crate::types::{
    ActionKind, ActionSource, ActionStatus, EpochSeconds, MapInfo, SessionId, SessionStatus, Team,
};
use crate::utils::normalize_login;
use serde::{Deserialize, Serialize};

/// One planned step of the draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftStep {
    pub order_index: usize,
    pub phase: String,
    pub team: Team,
    pub action_kind: ActionKind,
}

/// One performed draft action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftAction {
    pub order_index: usize,
    pub action_kind: ActionKind,
    pub action_status: ActionStatus,
    pub actor: String,
    pub action_source: ActionSource,
    pub auto_action: bool,
    pub map: MapInfo,
    pub timestamp: EpochSeconds,
}

/// Captain pair for the draft
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Captains {
    pub team_a: String,
    pub team_b: String,
}

/// Read-only projection of a tournament draft session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub started_at: EpochSeconds,
    pub captains: Captains,
    pub action_timeout_seconds: u64,
    pub steps: Vec<DraftStep>,
    pub actions: Vec<DraftAction>,
    pub remaining_pool: Vec<MapInfo>,
    /// Picks in pick order, decider last once locked.
    pub series_order: Vec<MapInfo>,
    pub decider_map: Option<MapInfo>,
    pub current_step_index: Option<usize>,
    pub resolution_reason: Option<String>,
}

/// Captain pick/ban map selection session
#[derive(Debug, Clone)]
pub struct TournamentDraftSession {
    id: SessionId,
    map_pool: Vec<MapInfo>,
    status: SessionStatus,
    started_at: EpochSeconds,
    captains: Captains,
    steps: Vec<DraftStep>,
    action_timeout_seconds: u64,
    actions: Vec<DraftAction>,
    remaining: Vec<MapInfo>,
    series_order: Vec<MapInfo>,
    decider_map: Option<MapInfo>,
    cursor: usize,
    current_step_started_at: EpochSeconds,
    resolution_reason: Option<String>,
}

impl TournamentDraftSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: SessionId,
        map_pool: Vec<MapInfo>,
        captain_a: &str,
        captain_b: &str,
        best_of: usize,
        starter: &str,
        action_timeout_seconds: u64,
        now: EpochSeconds,
    ) -> Result<Self> {
        if map_pool.len() < 2 {
            return Err(VetoError::InvalidParameters {
                reason: "tournament draft needs at least two maps".to_string(),
            }
            .into());
        }
        if best_of == 0 || best_of > map_pool.len() {
            return Err(VetoError::InvalidParameters {
                reason: format!(
                    "best_of must be between 1 and the pool size ({})",
                    map_pool.len()
                ),
            }
            .into());
        }
        let captain_a_key = normalize_login(captain_a);
        let captain_b_key = normalize_login(captain_b);
        if captain_a_key.is_empty() || captain_b_key.is_empty() || captain_a_key == captain_b_key {
            return Err(VetoError::InvalidParameters {
                reason: "two distinct captains are required".to_string(),
            }
            .into());
        }
        let starter_team = match normalize_login(starter) {
            key if key == captain_a_key => Team::TeamA,
            key if key == captain_b_key => Team::TeamB,
            _ => {
                return Err(VetoError::InvalidParameters {
                    reason: format!("starter '{}' is not one of the captains", starter),
                }
                .into())
            }
        };

        let steps = build_step_plan(map_pool.len(), best_of, starter_team);

        Ok(Self {
            id,
            remaining: map_pool.clone(),
            map_pool,
            status: SessionStatus::Running,
            started_at: now,
            captains: Captains {
                team_a: captain_a.to_string(),
                team_b: captain_b.to_string(),
            },
            steps,
            action_timeout_seconds,
            actions: Vec::new(),
            series_order: Vec::new(),
            decider_map: None,
            cursor: 0,
            current_step_started_at: now,
            resolution_reason: None,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn current_step(&self) -> Option<&DraftStep> {
        self.steps.get(self.cursor)
    }

    fn captain_for(&self, team: Team) -> Option<&str> {
        match team {
            Team::TeamA => Some(self.captains.team_a.as_str()),
            Team::TeamB => Some(self.captains.team_b.as_str()),
            Team::System => None,
        }
    }

    /// Whether the current step has sat unanswered past the action timeout.
    pub fn is_step_timed_out(&self, now: EpochSeconds) -> bool {
        self.status == SessionStatus::Running
            && now - self.current_step_started_at >= self.action_timeout_seconds as i64
    }

    /// Apply a ban/pick from `actor` against the remaining pool.
    ///
    /// Rejects an actor that is not the current step's captain unless the
    /// caller has already granted an override. When the explicit action
    /// leaves exactly one map, a system lock step is auto-appended and the
    /// session completes.
    pub fn apply_action(
        &mut self,
        actor: &str,
        selection: &str,
        now: EpochSeconds,
        source: ActionSource,
        allow_override: bool,
    ) -> Result<DraftAction> {
        if self.status != SessionStatus::Running {
            return Err(VetoError::SessionNotRunning.into());
        }

        let step = self
            .current_step()
            .cloned()
            .ok_or_else(|| VetoError::InternalError {
                message: "running draft has no current step".to_string(),
            })?;

        let expected = self.captain_for(step.team);
        let actor_matches = expected
            .map(|captain| normalize_login(captain) == normalize_login(actor))
            .unwrap_or(false);
        if !actor_matches && !allow_override {
            return Err(VetoError::ActorNotAllowed {
                login: actor.to_string(),
                reason: format!(
                    "step {} belongs to {} ({})",
                    step.order_index,
                    step.team,
                    expected.unwrap_or("system")
                ),
            }
            .into());
        }

        let map = resolve_selection(&self.remaining, selection)
            .cloned()
            .ok_or_else(|| VetoError::InvalidParameters {
                reason: format!("'{}' does not match a remaining map", selection),
            })?;

        let action = self.perform(
            &step,
            actor,
            map,
            now,
            ActionStatus::Explicit,
            source,
            false,
        );
        Ok(action)
    }

    /// Deterministic stand-in for a captain that never acted: performs the
    /// same action an on-time actor would, on the first remaining map.
    pub fn apply_timeout_fallback(&mut self, now: EpochSeconds) -> Result<DraftAction> {
        if self.status != SessionStatus::Running {
            return Err(VetoError::SessionNotRunning.into());
        }
        let step = self
            .current_step()
            .cloned()
            .ok_or_else(|| VetoError::InternalError {
                message: "running draft has no current step".to_string(),
            })?;

        let map = self
            .remaining
            .first()
            .cloned()
            .ok_or_else(|| VetoError::InternalError {
                message: "running draft has no remaining maps".to_string(),
            })?;
        let actor = self
            .captain_for(step.team)
            .unwrap_or("system")
            .to_string();

        let action = self.perform(
            &step,
            &actor,
            map,
            now,
            ActionStatus::Explicit,
            ActionSource::TimeoutAuto,
            true,
        );
        Ok(action)
    }

    #[allow(clippy::too_many_arguments)]
    fn perform(
        &mut self,
        step: &DraftStep,
        actor: &str,
        map: MapInfo,
        now: EpochSeconds,
        status: ActionStatus,
        source: ActionSource,
        auto_action: bool,
    ) -> DraftAction {
        self.remaining.retain(|m| m.uid != map.uid);
        if step.action_kind == ActionKind::Pick {
            self.series_order.push(map.clone());
        }

        let action = DraftAction {
            order_index: step.order_index,
            action_kind: step.action_kind,
            action_status: status,
            actor: actor.to_string(),
            action_source: source,
            auto_action,
            map,
            timestamp: now,
        };
        self.actions.push(action.clone());
        self.cursor += 1;
        self.current_step_started_at = now;

        if self.remaining.len() == 1 {
            self.lock_decider(now, source);
        }

        action
    }

    /// Exactly one map remains: append the system lock step and complete.
    fn lock_decider(&mut self, now: EpochSeconds, source: ActionSource) {
        let decider = self.remaining.remove(0);
        let lock_step = DraftStep {
            order_index: self.steps.len(),
            phase: "decider".to_string(),
            team: Team::System,
            action_kind: ActionKind::Lock,
        };
        self.actions.push(DraftAction {
            order_index: lock_step.order_index,
            action_kind: ActionKind::Lock,
            action_status: ActionStatus::Inferred,
            actor: "system".to_string(),
            action_source: source,
            auto_action: false,
            map: decider.clone(),
            timestamp: now,
        });
        self.steps.push(lock_step);
        self.cursor = self.steps.len();

        self.series_order.push(decider.clone());
        self.decider_map = Some(decider);
        self.status = SessionStatus::Completed;
        self.resolution_reason = Some("draft_completed".to_string());
    }

    pub fn cancel(&mut self, reason: &str) {
        self.status = SessionStatus::Cancelled;
        self.resolution_reason = Some(reason.to_string());
    }

    pub fn snapshot(&self) -> TournamentSnapshot {
        TournamentSnapshot {
            session_id: self.id,
            status: self.status,
            started_at: self.started_at,
            captains: self.captains.clone(),
            action_timeout_seconds: self.action_timeout_seconds,
            steps: self.steps.clone(),
            actions: self.actions.clone(),
            remaining_pool: self.remaining.clone(),
            series_order: self.series_order.clone(),
            decider_map: self.decider_map.clone(),
            current_step_index: if self.status == SessionStatus::Running {
                Some(self.cursor)
            } else {
                None
            },
            resolution_reason: self.resolution_reason.clone(),
        }
    }
}

/// Build the explicit step plan: alternating bans until `best_of` maps could
/// remain, then alternating picks for all but the decider. The lock step for
/// the last remaining map is appended dynamically when it happens.
fn build_step_plan(pool_size: usize, best_of: usize, starter: Team) -> Vec<DraftStep> {
    let other = match starter {
        Team::TeamA => Team::TeamB,
        _ => Team::TeamA,
    };

    let bans = pool_size - best_of;
    let picks = best_of - 1;

    (0..bans + picks)
        .map(|i| DraftStep {
            order_index: i,
            phase: if i < bans { "ban" } else { "pick" }.to_string(),
            team: if i % 2 == 0 { starter } else { other },
            action_kind: if i < bans {
                ActionKind::Ban
            } else {
                ActionKind::Pick
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_pool(n: usize) -> Vec<MapInfo> {
        (0..n)
            .map(|i| MapInfo::new(&format!("MAP-{}", i), &format!("Map {}", i)))
            .collect()
    }

    fn bo1_session(pool_size: usize) -> TournamentDraftSession {
        TournamentDraftSession::new(
            Uuid::from_u128(2),
            test_pool(pool_size),
            "capA",
            "capB",
            1,
            "capA",
            30,
            100,
        )
        .unwrap()
    }

    #[test]
    fn test_step_plan_alternates_from_starter() {
        let plan = build_step_plan(5, 1, Team::TeamA);
        assert_eq!(plan.len(), 4);
        assert!(plan.iter().all(|s| s.action_kind == ActionKind::Ban));
        let teams: Vec<Team> = plan.iter().map(|s| s.team).collect();
        assert_eq!(teams, vec![Team::TeamA, Team::TeamB, Team::TeamA, Team::TeamB]);
    }

    #[test]
    fn test_step_plan_bans_then_picks_for_series() {
        let plan = build_step_plan(5, 3, Team::TeamB);
        // 2 bans, then 2 picks; decider lock is dynamic.
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0].action_kind, ActionKind::Ban);
        assert_eq!(plan[1].action_kind, ActionKind::Ban);
        assert_eq!(plan[2].action_kind, ActionKind::Pick);
        assert_eq!(plan[3].action_kind, ActionKind::Pick);
        assert_eq!(plan[0].team, Team::TeamB);
    }

    #[test]
    fn test_rejects_invalid_setup() {
        // pool too small
        assert!(TournamentDraftSession::new(
            Uuid::from_u128(2), test_pool(1), "a", "b", 1, "a", 30, 100
        )
        .is_err());
        // best_of beyond pool
        assert!(TournamentDraftSession::new(
            Uuid::from_u128(2), test_pool(3), "a", "b", 4, "a", 30, 100
        )
        .is_err());
        // same captain twice
        assert!(TournamentDraftSession::new(
            Uuid::from_u128(2), test_pool(3), "a", "A", 1, "a", 30, 100
        )
        .is_err());
        // starter not a captain
        assert!(TournamentDraftSession::new(
            Uuid::from_u128(2), test_pool(3), "a", "b", 1, "c", 30, 100
        )
        .is_err());
    }

    #[test]
    fn test_rejects_actor_off_turn() {
        let mut session = bo1_session(3);
        let err = session
            .apply_action("capB", "MAP-0", 101, ActionSource::Chat, false)
            .unwrap_err();
        assert!(err.to_string().contains("not allowed"));

        // Override lets a privileged caller act for the captain.
        let action = session
            .apply_action("adminX", "MAP-0", 101, ActionSource::Rpc, true)
            .unwrap();
        assert_eq!(action.map.uid, "MAP-0");
    }

    #[test]
    fn test_draft_completes_with_inferred_system_lock() {
        let mut session = bo1_session(3);

        let first = session
            .apply_action("capA", "MAP-0", 101, ActionSource::Chat, false)
            .unwrap();
        assert_eq!(first.action_status, ActionStatus::Explicit);
        assert_eq!(session.status(), SessionStatus::Running);

        session
            .apply_action("capB", "MAP-1", 102, ActionSource::Chat, false)
            .unwrap();

        // Two bans left one map: the system locked it and completed the draft.
        assert_eq!(session.status(), SessionStatus::Completed);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.decider_map.as_ref().unwrap().uid, "MAP-2");

        let lock = snapshot.actions.last().unwrap();
        assert_eq!(lock.action_kind, ActionKind::Lock);
        assert_eq!(lock.action_status, ActionStatus::Inferred);
        assert_eq!(lock.actor, "system");
        // The explicit ban before it stayed explicit.
        assert_eq!(
            snapshot.actions[snapshot.actions.len() - 2].action_status,
            ActionStatus::Explicit
        );
        assert_eq!(snapshot.series_order.len(), 1);
    }

    #[test]
    fn test_series_order_places_decider_last() {
        let mut session = TournamentDraftSession::new(
            Uuid::from_u128(3),
            test_pool(5),
            "capA",
            "capB",
            3,
            "capA",
            30,
            100,
        )
        .unwrap();

        session
            .apply_action("capA", "MAP-4", 101, ActionSource::Chat, false)
            .unwrap();
        session
            .apply_action("capB", "MAP-3", 102, ActionSource::Chat, false)
            .unwrap();
        session
            .apply_action("capA", "MAP-1", 103, ActionSource::Chat, false)
            .unwrap();
        session
            .apply_action("capB", "MAP-2", 104, ActionSource::Chat, false)
            .unwrap();

        assert_eq!(session.status(), SessionStatus::Completed);
        let order: Vec<_> = session
            .snapshot()
            .series_order
            .iter()
            .map(|m| m.uid.clone())
            .collect();
        assert_eq!(order, vec!["MAP-1", "MAP-2", "MAP-0"]);
    }

    #[test]
    fn test_timeout_fallback_matches_on_time_behavior() {
        let mut explicit = bo1_session(4);
        let mut timed_out = bo1_session(4);

        // On-time captain bans the first remaining map.
        let on_time = explicit
            .apply_action("capA", "MAP-0", 130, ActionSource::Chat, false)
            .unwrap();

        assert!(timed_out.is_step_timed_out(130));
        let fallback = timed_out.apply_timeout_fallback(130).unwrap();

        assert_eq!(fallback.map.uid, on_time.map.uid);
        assert_eq!(fallback.action_kind, on_time.action_kind);
        assert!(fallback.auto_action);
        assert_eq!(fallback.action_source, ActionSource::TimeoutAuto);
        assert_eq!(fallback.actor, "capA");
        assert_eq!(
            timed_out.snapshot().remaining_pool,
            explicit.snapshot().remaining_pool
        );
    }

    #[test]
    fn test_step_timeout_clock() {
        let mut session = bo1_session(4);
        assert!(!session.is_step_timed_out(129));
        assert!(session.is_step_timed_out(130));

        session
            .apply_action("capA", "MAP-0", 120, ActionSource::Chat, false)
            .unwrap();
        // Acting resets the step clock.
        assert!(!session.is_step_timed_out(130));
        assert!(session.is_step_timed_out(150));
    }
}
