//! Post-selection lifecycle engine
//!
//! Advances the armed context from two independent input channels (explicit
//! host map-begin/map-end callbacks and the periodic runtime poll), both
//! converging on the same idempotent stage-recording primitive. Irreversible
//! side effects (kicks, map change, match signals) happen exactly once per
//! transition no matter which channel re-enters first.

use crate::error::{Result, VetoError};
use crate::host::{MapRuntime, ModeScriptDispatch, PlayerKicker, PlayerTracker};
use crate::lifecycle::context::{ContextStatus, LifecycleContext, LifecycleStage};
use crate::types::{
    AttemptRecord, EpochSeconds, MapInfo, QueueApplyReport, SessionId,
};
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Mode-script event names tried first by the dispatch strategies
const MATCH_START_EVENT: &str = "Match.Start";
const MATCH_END_EVENT: &str = "Match.End";

/// Terminal outcome the service layer reacts to (gate re-arm or suppression)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleSignal {
    Completed,
    Failed { code: String },
}

/// Driver of the post-selection stage machine
#[derive(Clone)]
pub struct MatchmakingLifecycleEngine {
    context: Arc<RwLock<Option<LifecycleContext>>>,
    last_snapshot: Arc<RwLock<Option<LifecycleContext>>>,
    runtime: Arc<dyn MapRuntime>,
    kicker: Arc<dyn PlayerKicker>,
    mode_script: Arc<dyn ModeScriptDispatch>,
    players: Arc<dyn PlayerTracker>,
    grace_cycles: u32,
}

impl MatchmakingLifecycleEngine {
    pub fn new(
        runtime: Arc<dyn MapRuntime>,
        kicker: Arc<dyn PlayerKicker>,
        mode_script: Arc<dyn ModeScriptDispatch>,
        players: Arc<dyn PlayerTracker>,
        grace_cycles: u32,
    ) -> Self {
        Self {
            context: Arc::new(RwLock::new(None)),
            last_snapshot: Arc::new(RwLock::new(None)),
            runtime,
            kicker,
            mode_script,
            players,
            grace_cycles,
        }
    }

    fn lock_err() -> VetoError {
        VetoError::InternalError {
            message: "Failed to acquire lifecycle lock".to_string(),
        }
    }

    /// Arm a fresh context from a successfully queue-applied matchmaking win.
    pub fn arm(
        &self,
        session_id: SessionId,
        selected_map: MapInfo,
        report: &QueueApplyReport,
        now: EpochSeconds,
    ) -> Result<()> {
        let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
        if let Some(existing) = slot.as_ref() {
            warn!(
                "Replacing still-active lifecycle context for session {}",
                existing.session_id
            );
        }
        info!(
            "Lifecycle armed for session {} - selected {} ({:?})",
            session_id, selected_map.uid, report.branch
        );
        *slot = Some(LifecycleContext::new(
            session_id,
            selected_map,
            report.current_map_uid.clone(),
            report.branch,
            now,
        ));
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.context
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Clone of the active context, if any
    pub fn active_context(&self) -> Option<LifecycleContext> {
        self.context.read().ok().and_then(|slot| slot.clone())
    }

    /// Snapshot retained from the most recently finished context
    pub fn last_snapshot(&self) -> Option<LifecycleContext> {
        self.last_snapshot.read().ok().and_then(|slot| slot.clone())
    }

    /// The idempotent stage-recording primitive both input channels converge on.
    pub fn record_stage(
        &self,
        stage: LifecycleStage,
        now: EpochSeconds,
        source: &str,
        details: &str,
    ) -> Result<bool> {
        let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
        match slot.as_mut() {
            Some(context) => {
                let advanced = context.record_stage(stage, now, source, details);
                if advanced {
                    info!("Lifecycle stage -> {} (source: {})", stage, source);
                }
                Ok(advanced)
            }
            None => Ok(false),
        }
    }

    /// Host reported a map starting. Matching uid ensures the match start.
    pub async fn on_map_begin(
        &self,
        map_uid: &str,
        now: EpochSeconds,
    ) -> Result<Option<LifecycleSignal>> {
        let matches = {
            let slot = self.context.read().map_err(|_| Self::lock_err())?;
            match slot.as_ref() {
                Some(context) => {
                    context.selected_map.uid == map_uid
                        && context.stage < LifecycleStage::MatchStarted
                }
                None => false,
            }
        };
        if !matches {
            return Ok(None);
        }

        self.record_stage(
            LifecycleStage::SelectedMapLoaded,
            now,
            "map_begin_callback",
            map_uid,
        )?;
        self.ensure_match_start(now, "map_begin_callback").await?;
        Ok(None)
    }

    /// Host reported a map ending. Matching uid runs the finalize path.
    pub async fn on_map_end(
        &self,
        map_uid: &str,
        now: EpochSeconds,
    ) -> Result<Option<LifecycleSignal>> {
        let matches = {
            let slot = self.context.read().map_err(|_| Self::lock_err())?;
            match slot.as_ref() {
                Some(context) => {
                    context.selected_map.uid == map_uid
                        && context.stage < LifecycleStage::SelectedMapFinished
                }
                None => false,
            }
        };
        if !matches {
            return Ok(None);
        }

        self.finalize_after_selected_map(now, "map_end_callback", false)
            .await
    }

    /// Runtime-poll fallback, driven by the same periodic tick as autostart.
    ///
    /// Reconciles the host's actually-loaded map against the armed context
    /// when the explicit callbacks never arrived.
    pub async fn poll(&self, now: EpochSeconds) -> Result<Option<LifecycleSignal>> {
        {
            let slot = self.context.read().map_err(|_| Self::lock_err())?;
            if slot.is_none() {
                return Ok(None);
            }
        }
        let observed = match self.runtime.current_map_uid().await {
            Ok(uid) => uid,
            Err(e) => {
                warn!("Runtime poll could not read current map: {}", e);
                return Ok(None);
            }
        };

        enum PollAction {
            None,
            EnsureStart { inferred: bool },
            Finalize,
        }

        let action = {
            let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
            match slot.as_mut() {
                None => PollAction::None,
                Some(context) => {
                    if context.stage < LifecycleStage::MatchStarted
                        && observed == context.selected_map.uid
                    {
                        PollAction::EnsureStart { inferred: false }
                    } else if context.stage < LifecycleStage::SelectedMapLoaded {
                        context.polls_below_loaded += 1;
                        if context.polls_below_loaded >= self.grace_cycles {
                            debug!(
                                "Lifecycle stuck below map-loaded for {} polls; forcing start",
                                context.polls_below_loaded
                            );
                            PollAction::EnsureStart { inferred: true }
                        } else {
                            PollAction::None
                        }
                    } else if context.stage >= LifecycleStage::MatchStarted
                        && context.stage < LifecycleStage::SelectedMapFinished
                        && observed != context.selected_map.uid
                        && observed != context.current_map_at_apply
                    {
                        // The host moved on from the selected map without an
                        // explicit end callback: the map change already happened.
                        PollAction::Finalize
                    } else {
                        PollAction::None
                    }
                }
            }
        };

        match action {
            PollAction::None => Ok(None),
            PollAction::EnsureStart { inferred } => {
                if inferred {
                    self.record_stage(
                        LifecycleStage::SelectedMapLoaded,
                        now,
                        "runtime_poll",
                        "inferred after grace period",
                    )?;
                }
                self.ensure_match_start(now, "runtime_poll").await?;
                Ok(None)
            }
            PollAction::Finalize => {
                self.finalize_after_selected_map(now, "runtime_poll", true)
                    .await
            }
        }
    }

    /// Dispatch a match-start signal through the ordered entrypoint list,
    /// short-circuiting on the first success.
    pub async fn ensure_match_start(&self, now: EpochSeconds, source: &str) -> Result<()> {
        let needed = {
            let slot = self.context.read().map_err(|_| Self::lock_err())?;
            matches!(
                slot.as_ref(),
                Some(context) if context.stage < LifecycleStage::MatchStarted
            )
        };
        if !needed {
            return Ok(());
        }

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut winner: Option<&str> = None;

        match self.mode_script.send_event(MATCH_START_EVENT).await {
            Ok(()) => {
                attempts.push(AttemptRecord::succeeded("mode_script_event"));
                winner = Some("mode_script_event");
            }
            Err(e) => attempts.push(AttemptRecord::failed("mode_script_event", e.to_string())),
        }
        if winner.is_none() {
            match self
                .mode_script
                .send_command_batch(&json!({ "commands": ["match_start"] }))
                .await
            {
                Ok(()) => {
                    attempts.push(AttemptRecord::succeeded("mode_script_commands"));
                    winner = Some("mode_script_commands");
                }
                Err(e) => {
                    attempts.push(AttemptRecord::failed("mode_script_commands", e.to_string()))
                }
            }
        }
        if winner.is_none() {
            match self.mode_script.stop_warmup().await {
                Ok(()) => {
                    attempts.push(AttemptRecord::succeeded("warmup_stop"));
                    winner = Some("warmup_stop");
                }
                Err(e) => attempts.push(AttemptRecord::failed("warmup_stop", e.to_string())),
            }
        }

        let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
        if let Some(context) = slot.as_mut() {
            match winner {
                Some(strategy) => {
                    context
                        .match_start
                        .record_success(format!("dispatched via {}", strategy));
                    context.record_stage(LifecycleStage::SelectedMapLoaded, now, source, "");
                    context.record_stage(LifecycleStage::MatchStarted, now, source, strategy);
                    info!("Match start dispatched via {} (source: {})", strategy, source);
                }
                None => {
                    let summary = attempts
                        .iter()
                        .map(|a| format!("{}: {}", a.strategy, a.message))
                        .collect::<Vec<_>>()
                        .join("; ");
                    context
                        .match_start
                        .record_failure(VetoError::MatchStartDispatchFailed.code(), summary.clone());
                    warn!("All match start entrypoints failed: {}", summary);
                }
            }
        }
        Ok(())
    }

    /// The strict post-map sequence: fake-player cleanup, map change, match
    /// end signal, then ready-for-next-players.
    pub async fn finalize_after_selected_map(
        &self,
        now: EpochSeconds,
        source: &str,
        map_change_observed: bool,
    ) -> Result<Option<LifecycleSignal>> {
        if !self.is_active() {
            return Ok(None);
        }
        self.record_stage(LifecycleStage::SelectedMapFinished, now, source, "")?;

        // (a) Cleanup: disconnect only fake identities. Failures are logged
        // per player and never halt progression.
        let mut kick_attempted = 0usize;
        let mut kick_failed = 0usize;
        let mut roster_error: Option<String> = None;
        match self.players.connected_players().await {
            Ok(roster) => {
                for identity in roster {
                    if !identity.is_fake_player() {
                        debug!("Cleanup skip '{}': human player", identity.login);
                        continue;
                    }
                    kick_attempted += 1;
                    match self
                        .kicker
                        .kick_player(&identity.login, "match cycle cleanup")
                        .await
                    {
                        Ok(()) => debug!("Cleanup kicked fake '{}'", identity.login),
                        Err(e) => {
                            kick_failed += 1;
                            warn!("Cleanup kick failed for '{}': {}", identity.login, e);
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Cleanup could not read roster: {}", e);
                roster_error = Some(e.to_string());
            }
        }
        {
            let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
            if let Some(context) = slot.as_mut() {
                if let Some(reason) = roster_error {
                    let err = VetoError::RuntimeUnavailable {
                        reason: format!("roster unavailable: {}", reason),
                    };
                    context
                        .kick_all_players
                        .record_failure(err.code(), err.to_string());
                } else if kick_failed == 0 {
                    context
                        .kick_all_players
                        .record_success(format!("{} fake players removed", kick_attempted));
                } else {
                    let err = VetoError::KickAllPartialFailure {
                        failed: kick_failed,
                        attempted: kick_attempted,
                    };
                    context
                        .kick_all_players
                        .record_failure(err.code(), err.to_string());
                }
                context.record_stage(LifecycleStage::PlayersRemoved, now, source, "");
            }
        }

        // (b) Map change, unless it was already independently observed.
        if map_change_observed {
            let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
            if let Some(context) = slot.as_mut() {
                context
                    .map_change
                    .record_success("map change observed independently");
                context.record_stage(
                    LifecycleStage::MapChanged,
                    now,
                    source,
                    "already_observed",
                );
            }
        } else {
            let mut attempts: Vec<AttemptRecord> = Vec::new();
            let mut changed = false;
            match self.runtime.skip_current_map().await {
                Ok(()) => {
                    attempts.push(AttemptRecord::succeeded("skip_current_map"));
                    changed = true;
                }
                Err(e) => attempts.push(AttemptRecord::failed("skip_current_map", e.to_string())),
            }
            if !changed {
                match self.runtime.force_next_map().await {
                    Ok(()) => {
                        attempts.push(AttemptRecord::succeeded("force_next_map"));
                        changed = true;
                    }
                    Err(e) => attempts.push(AttemptRecord::failed("force_next_map", e.to_string())),
                }
            }

            if changed {
                let strategy = attempts
                    .iter()
                    .find(|a| a.success)
                    .map(|a| a.strategy.clone())
                    .unwrap_or_default();
                let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
                if let Some(context) = slot.as_mut() {
                    context
                        .map_change
                        .record_success(format!("changed via {}", strategy));
                    context.record_stage(LifecycleStage::MapChanged, now, source, &strategy);
                }
            } else {
                let err = VetoError::MapChangeFailed {
                    reason: attempts
                        .iter()
                        .map(|a| format!("{}: {}", a.strategy, a.message))
                        .collect::<Vec<_>>()
                        .join("; "),
                };
                warn!("Map change failed on all entrypoints: {}", err);
                let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
                if let Some(context) = slot.as_mut() {
                    context.map_change.record_failure(err.code(), err.to_string());
                }
                let failed = slot.take();
                drop(slot);
                return self.retire(failed, err.code());
            }
        }

        // (c) Match end signal, first-success-wins like the start dispatch.
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut winner: Option<&str> = None;
        match self.mode_script.send_event(MATCH_END_EVENT).await {
            Ok(()) => {
                attempts.push(AttemptRecord::succeeded("mode_script_event"));
                winner = Some("mode_script_event");
            }
            Err(e) => attempts.push(AttemptRecord::failed("mode_script_event", e.to_string())),
        }
        if winner.is_none() {
            match self
                .mode_script
                .send_command_batch(&json!({ "commands": ["match_end"] }))
                .await
            {
                Ok(()) => {
                    attempts.push(AttemptRecord::succeeded("mode_script_commands"));
                    winner = Some("mode_script_commands");
                }
                Err(e) => {
                    attempts.push(AttemptRecord::failed("mode_script_commands", e.to_string()))
                }
            }
        }

        let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
        if slot.is_none() {
            return Ok(None);
        }
        if let Some(context) = slot.as_mut() {
            match winner {
                Some(strategy) => {
                    context
                        .match_end_mark
                        .record_success(format!("dispatched via {}", strategy));
                    context.record_stage(LifecycleStage::MatchEnded, now, source, strategy);
                }
                None => {
                    let summary = attempts
                        .iter()
                        .map(|a| format!("{}: {}", a.strategy, a.message))
                        .collect::<Vec<_>>()
                        .join("; ");
                    context
                        .match_end_mark
                        .record_failure(VetoError::MatchEndMarkFailed.code(), summary.clone());
                    warn!("Match end mark failed on all entrypoints: {}", summary);
                }
            }
        }
        if winner.is_none() {
            let failed = slot.take();
            drop(slot);
            return self.retire(failed, VetoError::MatchEndMarkFailed.code());
        }

        // Terminal: the server may take the next group of players.
        if let Some(context) = slot.as_mut() {
            context.record_stage(LifecycleStage::ReadyForNextPlayers, now, source, "");
            context.status = ContextStatus::Completed;
            context.ready_for_next_players = true;
            context.resolution_reason = Some("cycle_completed".to_string());
            info!(
                "Lifecycle for session {} completed; ready for next players",
                context.session_id
            );
        }
        let completed = slot.take();
        drop(slot);
        self.retain_snapshot(completed);
        Ok(Some(LifecycleSignal::Completed))
    }

    /// Mark a context failed, keep its snapshot, and clear the active slot.
    fn retire(
        &self,
        mut context: Option<LifecycleContext>,
        code: &str,
    ) -> Result<Option<LifecycleSignal>> {
        if let Some(context) = context.as_mut() {
            context.status = ContextStatus::Failed;
            context.resolution_reason = Some(code.to_string());
        }
        self.retain_snapshot(context);
        Ok(Some(LifecycleSignal::Failed {
            code: code.to_string(),
        }))
    }

    fn retain_snapshot(&self, context: Option<LifecycleContext>) {
        if let Ok(mut last) = self.last_snapshot.write() {
            *last = context;
        }
    }

    /// Clear an active context (manual cancel path).
    pub fn reset_context(
        &self,
        reason: &str,
        source: &str,
        preserve_last_snapshot: bool,
    ) -> Result<bool> {
        let mut slot = self.context.write().map_err(|_| Self::lock_err())?;
        match slot.take() {
            Some(mut context) => {
                info!(
                    "Lifecycle context for session {} reset ({}, source: {})",
                    context.session_id, reason, source
                );
                context.resolution_reason = Some(reason.to_string());
                if preserve_last_snapshot {
                    drop(slot);
                    self.retain_snapshot(Some(context));
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
