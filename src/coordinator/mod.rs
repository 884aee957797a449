//! Session lifecycle ownership and dispatch
//!
//! `VetoDraftCoordinator` owns at most one active session, validates the
//! single-active-session invariant on every entry point, delegates votes and
//! draft actions to the active variant, and drives deadline/timeout behavior
//! from the periodic tick.

use crate::error::{Result, VetoError};
use crate::session::{
    MatchmakingSnapshot, MatchmakingVoteSession, SessionSnapshot, TournamentDraftSession,
    TournamentSnapshot, VoteReceipt,
};
use crate::types::{ActionSource, EpochSeconds, MapInfo, SessionId, SessionMode, SessionStatus};
use crate::utils::IdGenerator;
use crate::session::tournament::DraftAction;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Read-only projection of coordinator state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub active: bool,
    pub mode: Option<SessionMode>,
    pub session: Option<SessionSnapshot>,
}

/// Events emitted by the periodic tick and by completing actions
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A matchmaking vote hit its deadline and was finalized.
    MatchmakingCompleted { snapshot: MatchmakingSnapshot },
    /// A draft step timed out and the fallback acted in the captain's place.
    TournamentTimeoutAutoAction {
        session_id: SessionId,
        action: DraftAction,
    },
    /// A tournament draft resolved its full series order.
    TournamentCompleted { snapshot: TournamentSnapshot },
}

enum ActiveSession {
    Matchmaking(MatchmakingVoteSession),
    Tournament(TournamentDraftSession),
}

impl ActiveSession {
    fn session_id(&self) -> SessionId {
        match self {
            ActiveSession::Matchmaking(s) => s.id(),
            ActiveSession::Tournament(s) => s.id(),
        }
    }

    fn mode(&self) -> SessionMode {
        match self {
            ActiveSession::Matchmaking(_) => SessionMode::Matchmaking,
            ActiveSession::Tournament(_) => SessionMode::Tournament,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        match self {
            ActiveSession::Matchmaking(s) => SessionSnapshot::Matchmaking(s.snapshot()),
            ActiveSession::Tournament(s) => SessionSnapshot::Tournament(s.snapshot()),
        }
    }
}

/// Owner of the single active selection session
#[derive(Clone)]
pub struct VetoDraftCoordinator {
    active: Arc<RwLock<Option<ActiveSession>>>,
    id_generator: Arc<dyn IdGenerator>,
}

impl VetoDraftCoordinator {
    pub fn new(id_generator: Arc<dyn IdGenerator>) -> Self {
        Self {
            active: Arc::new(RwLock::new(None)),
            id_generator,
        }
    }

    fn lock_err() -> VetoError {
        VetoError::InternalError {
            message: "Failed to acquire session lock".to_string(),
        }
    }

    /// Whether a session is currently running
    pub fn has_active_session(&self) -> bool {
        self.active
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Start a matchmaking vote over `map_pool`.
    pub fn start_matchmaking(
        &self,
        map_pool: Vec<MapInfo>,
        duration_seconds: u64,
        now: EpochSeconds,
    ) -> Result<MatchmakingSnapshot> {
        let mut slot = self.active.write().map_err(|_| Self::lock_err())?;
        if let Some(active) = slot.as_ref() {
            return Err(VetoError::SessionActive {
                session_id: active.session_id().to_string(),
            }
            .into());
        }

        let session = MatchmakingVoteSession::new(
            self.id_generator.next_session_id(),
            map_pool,
            duration_seconds,
            now,
        )?;
        let snapshot = session.snapshot();

        info!(
            "Started matchmaking vote {} - {} maps, deadline t={}",
            session.id(),
            snapshot.map_pool.len(),
            snapshot.deadline
        );
        *slot = Some(ActiveSession::Matchmaking(session));
        Ok(snapshot)
    }

    /// Start a tournament draft between two captains.
    #[allow(clippy::too_many_arguments)]
    pub fn start_tournament(
        &self,
        map_pool: Vec<MapInfo>,
        captain_a: &str,
        captain_b: &str,
        best_of: usize,
        starter: &str,
        timeout_seconds: u64,
        now: EpochSeconds,
    ) -> Result<TournamentSnapshot> {
        let mut slot = self.active.write().map_err(|_| Self::lock_err())?;
        if let Some(active) = slot.as_ref() {
            return Err(VetoError::SessionActive {
                session_id: active.session_id().to_string(),
            }
            .into());
        }

        let session = TournamentDraftSession::new(
            self.id_generator.next_session_id(),
            map_pool,
            captain_a,
            captain_b,
            best_of,
            starter,
            timeout_seconds,
            now,
        )?;
        let snapshot = session.snapshot();

        info!(
            "Started tournament draft {} - captains '{}' vs '{}', best of {}",
            session.id(),
            captain_a,
            captain_b,
            best_of
        );
        *slot = Some(ActiveSession::Tournament(session));
        Ok(snapshot)
    }

    /// Cast or overwrite a matchmaking vote.
    pub fn cast_matchmaking_vote(&self, login: &str, selection: &str) -> Result<VoteReceipt> {
        let mut slot = self.active.write().map_err(|_| Self::lock_err())?;
        match slot.as_mut() {
            Some(ActiveSession::Matchmaking(session)) => {
                let receipt = session.cast_vote(login, selection)?;
                debug!(
                    "Vote from '{}' for {} ({} distinct voters)",
                    login, receipt.map.uid, receipt.vote_count
                );
                Ok(receipt)
            }
            Some(ActiveSession::Tournament(_)) => Err(VetoError::InvalidMode {
                mode: "tournament session does not accept votes".to_string(),
            }
            .into()),
            None => Err(VetoError::SessionNotRunning.into()),
        }
    }

    /// Apply a draft ban/pick. Returns the performed action plus the
    /// completion snapshot when this action finished the draft (in which case
    /// the active slot is cleared).
    pub fn apply_tournament_action(
        &self,
        actor: &str,
        selection: &str,
        now: EpochSeconds,
        source: ActionSource,
        allow_override: bool,
    ) -> Result<(DraftAction, Option<TournamentSnapshot>)> {
        let mut slot = self.active.write().map_err(|_| Self::lock_err())?;
        match slot.as_mut() {
            Some(ActiveSession::Tournament(session)) => {
                let action = session.apply_action(actor, selection, now, source, allow_override)?;
                if session.status() == SessionStatus::Completed {
                    let snapshot = session.snapshot();
                    info!(
                        "Tournament draft {} completed - decider {}",
                        snapshot.session_id,
                        snapshot
                            .decider_map
                            .as_ref()
                            .map(|m| m.uid.as_str())
                            .unwrap_or("?")
                    );
                    *slot = None;
                    Ok((action, Some(snapshot)))
                } else {
                    Ok((action, None))
                }
            }
            Some(ActiveSession::Matchmaking(_)) => Err(VetoError::InvalidMode {
                mode: "matchmaking session does not accept draft actions".to_string(),
            }
            .into()),
            None => Err(VetoError::SessionNotRunning.into()),
        }
    }

    /// Drive deadline expiry and step timeouts. The periodic tick is the sole
    /// source of time-based transitions.
    pub fn tick(&self, now: EpochSeconds) -> Result<Vec<CoordinatorEvent>> {
        let mut slot = self.active.write().map_err(|_| Self::lock_err())?;
        let mut events = Vec::new();

        match slot.as_mut() {
            Some(ActiveSession::Matchmaking(session)) if session.is_expired(now) => {
                let snapshot = session.finalize("vote_deadline_reached")?;
                info!(
                    "Matchmaking vote {} finalized - winner {} (tie_break: {})",
                    snapshot.session_id,
                    snapshot
                        .winner_map
                        .as_ref()
                        .map(|m| m.uid.as_str())
                        .unwrap_or("?"),
                    snapshot.tie_break_applied
                );
                events.push(CoordinatorEvent::MatchmakingCompleted { snapshot });
                *slot = None;
            }
            Some(ActiveSession::Tournament(session)) if session.is_step_timed_out(now) => {
                let action = session.apply_timeout_fallback(now)?;
                warn!(
                    "Draft step {} timed out; auto-{:?} of {} applied for '{}'",
                    action.order_index, action.action_kind, action.map.uid, action.actor
                );
                events.push(CoordinatorEvent::TournamentTimeoutAutoAction {
                    session_id: session.id(),
                    action,
                });
                if session.status() == SessionStatus::Completed {
                    let snapshot = session.snapshot();
                    events.push(CoordinatorEvent::TournamentCompleted { snapshot });
                    *slot = None;
                }
            }
            _ => {}
        }

        Ok(events)
    }

    /// Cancel whatever session is running and clear the active slot.
    pub fn cancel_active_session(
        &self,
        _now: EpochSeconds,
        reason: &str,
    ) -> Result<SessionSnapshot> {
        let mut slot = self.active.write().map_err(|_| Self::lock_err())?;
        let active = slot.take().ok_or(VetoError::SessionNotRunning)?;

        let snapshot = match active {
            ActiveSession::Matchmaking(mut session) => {
                session.cancel(reason);
                SessionSnapshot::Matchmaking(session.snapshot())
            }
            ActiveSession::Tournament(mut session) => {
                session.cancel(reason);
                SessionSnapshot::Tournament(session.snapshot())
            }
        };
        info!(
            "Cancelled {} session {} ({})",
            snapshot.mode(),
            snapshot.session_id(),
            reason
        );
        Ok(snapshot)
    }

    /// Read-only projection of {active, mode, session}.
    pub fn status_snapshot(&self) -> Result<StatusSnapshot> {
        let slot = self.active.read().map_err(|_| Self::lock_err())?;
        Ok(match slot.as_ref() {
            Some(active) => StatusSnapshot {
                active: true,
                mode: Some(active.mode()),
                session: Some(active.snapshot()),
            },
            None => StatusSnapshot {
                active: false,
                mode: None,
                session: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::SequentialIdGenerator;

    fn test_pool() -> Vec<MapInfo> {
        vec![
            MapInfo::new("MAP-A", "Alpine"),
            MapInfo::new("MAP-B", "Bay"),
            MapInfo::new("MAP-C", "Canyon"),
        ]
    }

    fn test_coordinator() -> VetoDraftCoordinator {
        VetoDraftCoordinator::new(Arc::new(SequentialIdGenerator::new()))
    }

    #[test]
    fn test_single_active_session_invariant() {
        let coordinator = test_coordinator();
        coordinator
            .start_matchmaking(test_pool(), 60, 100)
            .unwrap();

        let err = coordinator
            .start_matchmaking(test_pool(), 60, 101)
            .unwrap_err();
        assert!(err.to_string().contains("already active"));

        let err = coordinator
            .start_tournament(test_pool(), "a", "b", 1, "a", 30, 101)
            .unwrap_err();
        assert!(err.to_string().contains("already active"));

        // Cancelling frees the slot.
        coordinator.cancel_active_session(102, "operator").unwrap();
        assert!(coordinator
            .start_tournament(test_pool(), "a", "b", 1, "a", 30, 103)
            .is_ok());
    }

    #[test]
    fn test_vote_requires_matchmaking_session() {
        let coordinator = test_coordinator();
        assert!(coordinator.cast_matchmaking_vote("p1", "MAP-A").is_err());

        coordinator
            .start_tournament(test_pool(), "a", "b", 1, "a", 30, 100)
            .unwrap();
        let err = coordinator.cast_matchmaking_vote("p1", "MAP-A").unwrap_err();
        assert!(err.to_string().contains("Invalid mode"));
    }

    #[test]
    fn test_tick_finalizes_expired_vote() {
        let coordinator = test_coordinator();
        coordinator
            .start_matchmaking(test_pool(), 60, 100)
            .unwrap();
        coordinator.cast_matchmaking_vote("p1", "MAP-B").unwrap();
        coordinator.cast_matchmaking_vote("p2", "MAP-B").unwrap();
        coordinator.cast_matchmaking_vote("p3", "MAP-A").unwrap();

        // Before the deadline nothing happens.
        assert!(coordinator.tick(159).unwrap().is_empty());
        assert!(coordinator.has_active_session());

        let events = coordinator.tick(160).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            CoordinatorEvent::MatchmakingCompleted { snapshot } => {
                assert_eq!(snapshot.winner_map.as_ref().unwrap().uid, "MAP-B");
                assert_eq!(snapshot.status, SessionStatus::Completed);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(!coordinator.has_active_session());
    }

    #[test]
    fn test_tick_applies_timeout_fallback_and_completion() {
        let coordinator = test_coordinator();
        coordinator
            .start_tournament(test_pool(), "capA", "capB", 1, "capA", 30, 100)
            .unwrap();

        // First step times out at t=130.
        let events = coordinator.tick(130).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            CoordinatorEvent::TournamentTimeoutAutoAction { action, .. } => {
                assert!(action.auto_action);
                assert_eq!(action.action_source, ActionSource::TimeoutAuto);
                assert_eq!(action.map.uid, "MAP-A");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Second (last) ban times out as well; the draft completes.
        let events = coordinator.tick(160).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            CoordinatorEvent::TournamentCompleted { .. }
        ));
        assert!(!coordinator.has_active_session());
    }

    #[test]
    fn test_explicit_completion_clears_slot() {
        let coordinator = test_coordinator();
        coordinator
            .start_tournament(test_pool(), "capA", "capB", 1, "capA", 30, 100)
            .unwrap();

        let (_, completed) = coordinator
            .apply_tournament_action("capA", "MAP-A", 101, ActionSource::Chat, false)
            .unwrap();
        assert!(completed.is_none());

        let (_, completed) = coordinator
            .apply_tournament_action("capB", "MAP-B", 102, ActionSource::Chat, false)
            .unwrap();
        let snapshot = completed.expect("draft should have completed");
        assert_eq!(snapshot.decider_map.unwrap().uid, "MAP-C");
        assert!(!coordinator.has_active_session());
    }

    #[test]
    fn test_status_snapshot_projection() {
        let coordinator = test_coordinator();
        let status = coordinator.status_snapshot().unwrap();
        assert!(!status.active);
        assert!(status.mode.is_none());

        coordinator
            .start_matchmaking(test_pool(), 60, 100)
            .unwrap();
        let status = coordinator.status_snapshot().unwrap();
        assert!(status.active);
        assert_eq!(status.mode, Some(SessionMode::Matchmaking));
        assert!(status.session.is_some());
    }

    #[test]
    fn test_cancel_without_session_fails() {
        let coordinator = test_coordinator();
        assert!(coordinator.cancel_active_session(100, "nothing").is_err());
    }
}
