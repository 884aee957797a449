//! Service composition
//!
//! `VetoService` wires the coordinator, autostart gate, lifecycle engine and
//! completion handoff over a set of host adapters and exposes the two command
//! surfaces (chat-style invocations and typed RPC requests) plus the periodic
//! tick that drives deadlines, the gate and the lifecycle poll.

use crate::autostart::{AutostartGate, GateTick};
use crate::config::AppConfig;
use crate::coordinator::{CoordinatorEvent, VetoDraftCoordinator};
use crate::error::{Result, VetoError};
use crate::handoff::CompletionHandoff;
use crate::host::{
    ChatBroadcaster, MapPoolProvider, MapQueueApplier, MapRuntime, ModeScriptDispatch,
    PlayerKicker, PlayerTracker,
};
use crate::lifecycle::{LifecycleSignal, MatchmakingLifecycleEngine};
use crate::session::SessionSnapshot;
use crate::types::{
    ActionSource, CommandInvocation, CommandReply, EpochSeconds, RpcRequest, SessionMode,
};
use crate::utils::IdGenerator;
use serde_json::json;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Host adapter bundle the service is built over
#[derive(Clone)]
pub struct HostAdapters {
    pub pool_provider: Arc<dyn MapPoolProvider>,
    pub players: Arc<dyn PlayerTracker>,
    pub queue_applier: Arc<dyn MapQueueApplier>,
    pub runtime: Arc<dyn MapRuntime>,
    pub kicker: Arc<dyn PlayerKicker>,
    pub mode_script: Arc<dyn ModeScriptDispatch>,
    pub chat: Arc<dyn ChatBroadcaster>,
}

impl HostAdapters {
    /// Build the bundle from one object implementing every host trait.
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: MapPoolProvider
            + PlayerTracker
            + MapQueueApplier
            + MapRuntime
            + PlayerKicker
            + ModeScriptDispatch
            + ChatBroadcaster
            + 'static,
    {
        Self {
            pool_provider: host.clone(),
            players: host.clone(),
            queue_applier: host.clone(),
            runtime: host.clone(),
            kicker: host.clone(),
            mode_script: host.clone(),
            chat: host,
        }
    }
}

/// The map selection core behind both command surfaces
#[derive(Clone)]
pub struct VetoService {
    config: AppConfig,
    coordinator: VetoDraftCoordinator,
    gate: AutostartGate,
    engine: MatchmakingLifecycleEngine,
    handoff: CompletionHandoff,
    adapters: HostAdapters,
    server_mode: Arc<RwLock<SessionMode>>,
    /// Completion waiting for a queue-apply retry after a host failure
    pending_completion: Arc<RwLock<Option<SessionSnapshot>>>,
}

impl VetoService {
    pub fn new(
        config: AppConfig,
        adapters: HostAdapters,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        let coordinator = VetoDraftCoordinator::new(id_generator);
        let gate = AutostartGate::new(
            config.autostart.min_players_threshold,
            config.autostart.prestart_seconds,
        );
        let engine = MatchmakingLifecycleEngine::new(
            adapters.runtime.clone(),
            adapters.kicker.clone(),
            adapters.mode_script.clone(),
            adapters.players.clone(),
            config.matchmaking.lifecycle_grace_cycles,
        );
        let handoff =
            CompletionHandoff::new(adapters.queue_applier.clone(), adapters.chat.clone());
        let server_mode = Arc::new(RwLock::new(config.service.default_mode));

        Self {
            config,
            coordinator,
            gate,
            engine,
            handoff,
            adapters,
            server_mode,
            pending_completion: Arc::new(RwLock::new(None)),
        }
    }

    fn lock_err() -> VetoError {
        VetoError::InternalError {
            message: "Failed to acquire service lock".to_string(),
        }
    }

    fn reply_from_error(err: &anyhow::Error) -> CommandReply {
        match err.downcast_ref::<VetoError>() {
            Some(veto) => CommandReply::from_error(veto),
            None => CommandReply::failure("internal_error", err.to_string()),
        }
    }

    pub fn server_mode(&self) -> SessionMode {
        self.server_mode
            .read()
            .map(|mode| *mode)
            .unwrap_or(SessionMode::Matchmaking)
    }

    pub fn set_server_mode(&self, mode: SessionMode) -> Result<()> {
        let mut current = self.server_mode.write().map_err(|_| Self::lock_err())?;
        if *current != mode {
            info!("Server mode changed: {} -> {}", current, mode);
            *current = mode;
        }
        Ok(())
    }

    pub fn coordinator(&self) -> &VetoDraftCoordinator {
        &self.coordinator
    }

    pub fn gate(&self) -> &AutostartGate {
        &self.gate
    }

    pub fn engine(&self) -> &MatchmakingLifecycleEngine {
        &self.engine
    }

    // ---- command surfaces -------------------------------------------------

    /// Typed RPC entrypoint. RPC callers are trusted (admin-level).
    pub async fn handle_rpc(&self, request: RpcRequest, now: EpochSeconds) -> CommandReply {
        match request {
            RpcRequest::Start {
                mode,
                actor,
                duration_seconds,
                captain_a,
                captain_b,
                best_of,
                timeout_seconds,
            } => match mode {
                SessionMode::Matchmaking => {
                    self.start_matchmaking(&actor, duration_seconds, now).await
                }
                SessionMode::Tournament => {
                    let (Some(a), Some(b)) = (captain_a, captain_b) else {
                        return CommandReply::failure(
                            "invalid_parameters",
                            "Tournament start requires captain_a and captain_b",
                        );
                    };
                    self.start_tournament(&actor, &a, &b, best_of, timeout_seconds, now)
                        .await
                }
            },
            RpcRequest::Action {
                actor,
                selection,
                allow_override,
            } => {
                self.apply_action(&actor, &selection, allow_override, ActionSource::Rpc, now)
                    .await
            }
            RpcRequest::Status => self.status_reply(),
            RpcRequest::Cancel { actor, reason } => {
                self.cancel(&actor, reason.as_deref().unwrap_or("operator_cancel"), now)
                    .await
            }
            RpcRequest::Ready { actor } => self.arm_ready(&actor),
        }
    }

    /// Chat-style entrypoint. Mutating operations require the admin flag.
    pub async fn handle_command(
        &self,
        invocation: CommandInvocation,
        now: EpochSeconds,
    ) -> CommandReply {
        let first = invocation.positionals.first().map(String::as_str);
        match invocation.operation.as_str() {
            "start" => {
                if !invocation.is_admin {
                    return CommandReply::from_error(&VetoError::ActorNotAllowed {
                        login: invocation.actor.clone(),
                        reason: "start requires admin".to_string(),
                    });
                }
                match first {
                    Some("tournament") => {
                        let captain_a = invocation.positionals.get(1).cloned();
                        let captain_b = invocation.positionals.get(2).cloned();
                        let (Some(a), Some(b)) = (captain_a, captain_b) else {
                            return CommandReply::failure(
                                "invalid_parameters",
                                "Usage: start tournament <captain_a> <captain_b> [best_of]",
                            );
                        };
                        let best_of = invocation
                            .positionals
                            .get(3)
                            .and_then(|v| v.parse::<usize>().ok());
                        self.start_tournament(&invocation.actor, &a, &b, best_of, None, now)
                            .await
                    }
                    _ => {
                        let duration = match first {
                            Some(raw) => match raw.parse::<u64>() {
                                Ok(seconds) => Some(seconds),
                                Err(_) => {
                                    return CommandReply::failure(
                                        "invalid_parameters",
                                        format!("'{}' is not a duration in seconds", raw),
                                    )
                                }
                            },
                            None => None,
                        };
                        self.start_matchmaking(&invocation.actor, duration, now)
                            .await
                    }
                }
            }
            "vote" | "pick" | "ban" | "action" => {
                let Some(selection) = first else {
                    return CommandReply::failure(
                        "invalid_parameters",
                        "A map uid or 1-based index is required",
                    );
                };
                self.apply_action(
                    &invocation.actor,
                    selection,
                    invocation.is_admin,
                    ActionSource::Chat,
                    now,
                )
                .await
            }
            "status" => self.status_reply(),
            "cancel" => {
                if !invocation.is_admin {
                    return CommandReply::from_error(&VetoError::ActorNotAllowed {
                        login: invocation.actor.clone(),
                        reason: "cancel requires admin".to_string(),
                    });
                }
                self.cancel(&invocation.actor, first.unwrap_or("operator_cancel"), now)
                    .await
            }
            "ready" => {
                if !invocation.is_admin {
                    return CommandReply::from_error(&VetoError::ActorNotAllowed {
                        login: invocation.actor.clone(),
                        reason: "ready requires admin".to_string(),
                    });
                }
                self.arm_ready(&invocation.actor)
            }
            "mode" => {
                if !invocation.is_admin {
                    return CommandReply::from_error(&VetoError::ActorNotAllowed {
                        login: invocation.actor.clone(),
                        reason: "mode requires admin".to_string(),
                    });
                }
                let mode = match first {
                    Some("matchmaking") => SessionMode::Matchmaking,
                    Some("tournament") => SessionMode::Tournament,
                    other => {
                        return CommandReply::from_error(&VetoError::InvalidMode {
                            mode: other.unwrap_or("").to_string(),
                        })
                    }
                };
                match self.set_server_mode(mode) {
                    Ok(()) => CommandReply::ok("mode_set", format!("Server mode set to {}", mode)),
                    Err(e) => Self::reply_from_error(&e),
                }
            }
            other => CommandReply::failure(
                "unknown_operation",
                format!("Unknown operation '{}'", other),
            ),
        }
    }

    // ---- operations -------------------------------------------------------

    async fn start_matchmaking(
        &self,
        actor: &str,
        duration_seconds: Option<u64>,
        now: EpochSeconds,
    ) -> CommandReply {
        let pool = match self.adapters.pool_provider.map_pool().await {
            Ok(pool) => pool,
            Err(e) => return Self::reply_from_error(&e),
        };
        if pool.is_empty() {
            return CommandReply::from_error(&VetoError::CapabilityUnavailable {
                capability: "map_pool".to_string(),
            });
        }
        let duration =
            duration_seconds.unwrap_or(self.config.matchmaking.vote_duration_seconds);

        match self.coordinator.start_matchmaking(pool, duration, now) {
            Ok(snapshot) => {
                let summary = format!(
                    "Map vote started ({} maps, {}s). Vote with a map name or number.",
                    snapshot.map_pool.len(),
                    duration
                );
                if let Err(e) = self.adapters.chat.broadcast_public(&summary).await {
                    warn!("Could not announce vote start: {}", e);
                }
                info!("Matchmaking vote {} started by {}", snapshot.session_id, actor);
                CommandReply::ok("session_started", summary)
                    .with_detail("session_id", json!(snapshot.session_id))
                    .with_detail("mode", json!("matchmaking"))
                    .with_detail("deadline", json!(snapshot.deadline))
            }
            Err(e) => Self::reply_from_error(&e),
        }
    }

    async fn start_tournament(
        &self,
        actor: &str,
        captain_a: &str,
        captain_b: &str,
        best_of: Option<usize>,
        timeout_seconds: Option<u64>,
        now: EpochSeconds,
    ) -> CommandReply {
        let pool = match self.adapters.pool_provider.map_pool().await {
            Ok(pool) => pool,
            Err(e) => return Self::reply_from_error(&e),
        };
        if pool.is_empty() {
            return CommandReply::from_error(&VetoError::CapabilityUnavailable {
                capability: "map_pool".to_string(),
            });
        }
        let best_of = best_of.unwrap_or(self.config.tournament.default_best_of);
        let timeout =
            timeout_seconds.unwrap_or(self.config.tournament.action_timeout_seconds);

        match self.coordinator.start_tournament(
            pool,
            captain_a,
            captain_b,
            best_of,
            captain_a,
            timeout,
            now,
        ) {
            Ok(snapshot) => {
                let summary = format!(
                    "Draft started: {} vs {} (best of {})",
                    captain_a, captain_b, best_of
                );
                if let Err(e) = self.adapters.chat.broadcast_public(&summary).await {
                    warn!("Could not announce draft start: {}", e);
                }
                info!("Tournament draft {} started by {}", snapshot.session_id, actor);
                CommandReply::ok("session_started", summary)
                    .with_detail("session_id", json!(snapshot.session_id))
                    .with_detail("mode", json!("tournament"))
                    .with_detail("steps", json!(snapshot.steps))
            }
            Err(e) => Self::reply_from_error(&e),
        }
    }

    /// Vote or draft action against whatever session is running.
    async fn apply_action(
        &self,
        actor: &str,
        selection: &str,
        allow_override: bool,
        source: ActionSource,
        now: EpochSeconds,
    ) -> CommandReply {
        let status = match self.coordinator.status_snapshot() {
            Ok(status) => status,
            Err(e) => return Self::reply_from_error(&e),
        };
        match status.mode {
            Some(SessionMode::Matchmaking) => {
                match self.coordinator.cast_matchmaking_vote(actor, selection) {
                    Ok(receipt) => CommandReply::ok(
                        "vote_recorded",
                        format!("Vote recorded for {}", receipt.map.name),
                    )
                    .with_detail("map_uid", json!(receipt.map.uid))
                    .with_detail("overwrote_previous", json!(receipt.overwrote_previous))
                    .with_detail("vote_count", json!(receipt.vote_count)),
                    Err(e) => Self::reply_from_error(&e),
                }
            }
            Some(SessionMode::Tournament) => {
                match self.coordinator.apply_tournament_action(
                    actor,
                    selection,
                    now,
                    source,
                    allow_override,
                ) {
                    Ok((action, completed)) => {
                        let reply = CommandReply::ok(
                            "action_applied",
                            format!("{:?} {}", action.action_kind, action.map.name),
                        )
                        .with_detail("action", json!(action));
                        if let Some(snapshot) = completed {
                            if let Err(e) = self
                                .handle_completion(SessionSnapshot::Tournament(snapshot), now)
                                .await
                            {
                                warn!("Draft completion handoff failed: {}", e);
                            }
                        }
                        reply
                    }
                    Err(e) => Self::reply_from_error(&e),
                }
            }
            None => CommandReply::from_error(&VetoError::SessionNotRunning),
        }
    }

    fn status_reply(&self) -> CommandReply {
        let coordinator = match self.coordinator.status_snapshot() {
            Ok(status) => status,
            Err(e) => return Self::reply_from_error(&e),
        };
        CommandReply::ok("status", "Current selection state")
            .with_detail("server_mode", json!(self.server_mode()))
            .with_detail("coordinator", json!(coordinator))
            .with_detail("gate", json!(self.gate.snapshot()))
            .with_detail("lifecycle", json!(self.engine.active_context()))
            .with_detail("last_lifecycle", json!(self.engine.last_snapshot()))
    }

    /// Cancel everything in flight: the session, any pending prestart window,
    /// the ready gate and the lifecycle context.
    async fn cancel(&self, actor: &str, reason: &str, now: EpochSeconds) -> CommandReply {
        // Decide the failure before touching anything: a no-op cancel must
        // leave the gate and pending state exactly as they were.
        if !self.coordinator.has_active_session() && !self.engine.is_active() {
            return CommandReply::from_error(&VetoError::SessionNotRunning);
        }

        let session = self.coordinator.cancel_active_session(now, reason).ok();
        let context_reset = self
            .engine
            .reset_context(reason, "cancel_command", true)
            .unwrap_or(false);
        if let Err(e) = self.gate.clear_pending_window() {
            warn!("Could not clear pending window on cancel: {}", e);
        }
        if let Err(e) = self.gate.disarm_ready(reason) {
            warn!("Could not disarm ready gate on cancel: {}", e);
        }
        {
            if let Ok(mut pending) = self.pending_completion.write() {
                *pending = None;
            }
        }

        let summary = format!("Selection cancelled by {} ({})", actor, reason);
        if let Err(e) = self.adapters.chat.broadcast_public(&summary).await {
            warn!("Could not announce cancel: {}", e);
        }
        let mut reply = CommandReply::ok("cancelled", summary)
            .with_detail("lifecycle_reset", json!(context_reset));
        if let Some(snapshot) = session {
            reply = reply.with_detail("session_id", json!(snapshot.session_id()));
        }
        reply
    }

    fn arm_ready(&self, actor: &str) -> CommandReply {
        if self.server_mode() != SessionMode::Matchmaking {
            return CommandReply::from_error(&VetoError::MatchmakingReadyRequired);
        }
        let busy = self.coordinator.has_active_session() || self.engine.is_active();
        match self.gate.arm_ready(busy) {
            Ok(()) => {
                info!("Ready gate armed by {}", actor);
                CommandReply::ok("ready_armed", "Autostart ready gate armed")
            }
            Err(e) => Self::reply_from_error(&e),
        }
    }

    // ---- tick -------------------------------------------------------------

    /// One scheduler tick: retries, session deadlines, the lifecycle poll and
    /// the autostart gate, in that order.
    pub async fn tick(&self, now: EpochSeconds) -> Result<()> {
        self.retry_pending_completion(now).await?;

        let events = self.coordinator.tick(now)?;
        for event in events {
            match event {
                CoordinatorEvent::MatchmakingCompleted { snapshot } => {
                    self.handle_completion(SessionSnapshot::Matchmaking(snapshot), now)
                        .await?;
                }
                CoordinatorEvent::TournamentCompleted { snapshot } => {
                    self.handle_completion(SessionSnapshot::Tournament(snapshot), now)
                        .await?;
                }
                CoordinatorEvent::TournamentTimeoutAutoAction { session_id, action } => {
                    debug!(
                        "Draft {} timeout fallback: {:?} {}",
                        session_id, action.action_kind, action.map.uid
                    );
                    let line = format!(
                        "{} ran out of time; {} was auto-{}",
                        action.actor,
                        action.map.name,
                        match action.action_kind {
                            crate::types::ActionKind::Ban => "banned",
                            _ => "picked",
                        }
                    );
                    if let Err(e) = self.adapters.chat.broadcast_public(&line).await {
                        warn!("Could not announce timeout action: {}", e);
                    }
                }
            }
        }

        if let Some(signal) = self.engine.poll(now).await? {
            self.apply_lifecycle_signal(&signal)?;
        }

        self.evaluate_gate(now).await
    }

    /// Host reported a map starting.
    pub async fn on_map_begin(&self, map_uid: &str, now: EpochSeconds) -> Result<()> {
        if let Some(signal) = self.engine.on_map_begin(map_uid, now).await? {
            self.apply_lifecycle_signal(&signal)?;
        }
        Ok(())
    }

    /// Host reported a map ending.
    pub async fn on_map_end(&self, map_uid: &str, now: EpochSeconds) -> Result<()> {
        if let Some(signal) = self.engine.on_map_end(map_uid, now).await? {
            self.apply_lifecycle_signal(&signal)?;
        }
        Ok(())
    }

    async fn evaluate_gate(&self, now: EpochSeconds) -> Result<()> {
        let session_active = self.coordinator.has_active_session() || self.engine.is_active();
        let player_count = match self.adapters.players.connected_human_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!("Gate evaluation skipped; roster unavailable: {}", e);
                return Ok(());
            }
        };

        match self
            .gate
            .evaluate(now, self.server_mode(), session_active, player_count, "tick")?
        {
            GateTick::Hold { .. } => {}
            GateTick::WindowOpened { window } => {
                let line = format!(
                    "Enough players are ready - map vote starts in {}s",
                    window.deadline_at.saturating_sub(window.armed_at)
                );
                if let Err(e) = self.adapters.chat.broadcast_public(&line).await {
                    warn!("Could not announce prestart window: {}", e);
                }
            }
            GateTick::WindowCancelled { reason } => {
                let line = format!("Automatic start cancelled: {}", reason);
                if let Err(e) = self.adapters.chat.broadcast_public(&line).await {
                    warn!("Could not announce window cancel: {}", e);
                }
            }
            GateTick::Fire => {
                self.gate.on_autostart_fired()?;
                info!("Autostart fired; starting matchmaking vote");
                let reply = self.start_matchmaking("autostart", None, now).await;
                if !reply.success {
                    warn!("Autostart could not start a vote: {}", reply.message);
                    // The session never started; allow a later attempt.
                    self.gate.re_arm()?;
                }
            }
        }
        Ok(())
    }

    fn apply_lifecycle_signal(&self, signal: &LifecycleSignal) -> Result<()> {
        match signal {
            LifecycleSignal::Completed => {
                info!("Lifecycle completed; re-arming autostart gate");
                self.gate.re_arm()
            }
            LifecycleSignal::Failed { code } => {
                warn!("Lifecycle failed ({}); suppressing autostart gate", code);
                self.gate.suppress(code)
            }
        }
    }

    /// Route a completed session through the handoff; on queue-apply failure
    /// the snapshot is parked and retried on the next tick.
    async fn handle_completion(
        &self,
        snapshot: SessionSnapshot,
        now: EpochSeconds,
    ) -> Result<()> {
        match self.handoff.process_completion(&snapshot).await {
            Ok(Some(outcome)) => {
                if outcome.mode == SessionMode::Matchmaking {
                    if let Some(map) = outcome.selected_map {
                        self.engine
                            .arm(outcome.session_id, map, &outcome.report, now)?;
                    }
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(
                    "Completion handoff for session {} parked for retry: {}",
                    snapshot.session_id(),
                    e
                );
                let mut pending = self
                    .pending_completion
                    .write()
                    .map_err(|_| Self::lock_err())?;
                *pending = Some(snapshot);
                Ok(())
            }
        }
    }

    async fn retry_pending_completion(&self, now: EpochSeconds) -> Result<()> {
        let parked = {
            let mut pending = self
                .pending_completion
                .write()
                .map_err(|_| Self::lock_err())?;
            pending.take()
        };
        if let Some(snapshot) = parked {
            debug!(
                "Retrying parked completion for session {}",
                snapshot.session_id()
            );
            self.handle_completion(snapshot, now).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalHost;
    use crate::types::{MapInfo, PlayerIdentity};
    use crate::utils::SequentialIdGenerator;
    use std::sync::atomic::Ordering;

    fn test_pool() -> Vec<MapInfo> {
        vec![
            MapInfo::new("MAP-A", "Alpine"),
            MapInfo::new("MAP-B", "Bay"),
            MapInfo::new("MAP-C", "Canyon"),
        ]
    }

    fn test_service(host: &Arc<LocalHost>) -> VetoService {
        VetoService::new(
            AppConfig::default(),
            HostAdapters::from_host(host.clone()),
            Arc::new(SequentialIdGenerator::default()),
        )
    }

    fn humans(count: usize) -> Vec<PlayerIdentity> {
        (0..count)
            .map(|i| PlayerIdentity {
                login: format!("player{}", i),
                pid: i as i64 + 1,
                is_fake: Some(false),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_rpc_start_vote_and_status() {
        let host = Arc::new(LocalHost::new(test_pool()));
        let service = test_service(&host);

        let reply = service
            .handle_rpc(
                RpcRequest::Start {
                    mode: SessionMode::Matchmaking,
                    actor: "admin".to_string(),
                    duration_seconds: Some(30),
                    captain_a: None,
                    captain_b: None,
                    best_of: None,
                    timeout_seconds: None,
                },
                100,
            )
            .await;
        assert!(reply.success);
        assert_eq!(reply.code, "session_started");
        assert_eq!(reply.details["deadline"], 130);

        let status = service.handle_rpc(RpcRequest::Status, 101).await;
        assert!(status.success);
        assert_eq!(status.details["coordinator"]["active"], true);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let host = Arc::new(LocalHost::new(test_pool()));
        let service = test_service(&host);

        let invocation = CommandInvocation {
            operation: "start".to_string(),
            parameters: serde_json::Map::new(),
            positionals: vec![],
            actor: "admin".to_string(),
            is_admin: true,
        };
        assert!(service.handle_command(invocation.clone(), 100).await.success);

        let second = service.handle_command(invocation, 101).await;
        assert!(!second.success);
        assert_eq!(second.code, "session_active");
    }

    #[tokio::test]
    async fn test_non_admin_cannot_start_or_cancel() {
        let host = Arc::new(LocalHost::new(test_pool()));
        let service = test_service(&host);

        for operation in ["start", "cancel", "ready"] {
            let reply = service
                .handle_command(
                    CommandInvocation {
                        operation: operation.to_string(),
                        parameters: serde_json::Map::new(),
                        positionals: vec![],
                        actor: "randomplayer".to_string(),
                        is_admin: false,
                    },
                    100,
                )
                .await;
            assert!(!reply.success, "{} must require admin", operation);
            assert_eq!(reply.code, "actor_not_allowed");
        }
    }

    #[tokio::test]
    async fn test_vote_completion_arms_lifecycle() {
        let host = Arc::new(LocalHost::new(test_pool()));
        host.set_players(humans(3));
        let service = test_service(&host);

        service
            .handle_rpc(
                RpcRequest::Start {
                    mode: SessionMode::Matchmaking,
                    actor: "admin".to_string(),
                    duration_seconds: Some(60),
                    captain_a: None,
                    captain_b: None,
                    best_of: None,
                    timeout_seconds: None,
                },
                100,
            )
            .await;
        let vote = service
            .handle_rpc(
                RpcRequest::Action {
                    actor: "player0".to_string(),
                    selection: "MAP-B".to_string(),
                    allow_override: false,
                },
                110,
            )
            .await;
        assert!(vote.success);

        // Deadline passes; the tick finalizes, applies the queue and arms
        // the lifecycle engine for the winner.
        service.tick(160).await.unwrap();
        assert!(!service.coordinator().has_active_session());
        assert_eq!(host.queued_uids(), vec!["MAP-B"]);
        let context = service.engine().active_context().unwrap();
        assert_eq!(context.selected_map.uid, "MAP-B");
    }

    #[tokio::test]
    async fn test_failed_queue_apply_retries_next_tick() {
        let host = Arc::new(LocalHost::new(test_pool()));
        host.set_players(humans(3));
        let service = test_service(&host);

        service
            .handle_rpc(
                RpcRequest::Start {
                    mode: SessionMode::Matchmaking,
                    actor: "admin".to_string(),
                    duration_seconds: Some(60),
                    captain_a: None,
                    captain_b: None,
                    best_of: None,
                    timeout_seconds: None,
                },
                100,
            )
            .await;
        service
            .handle_rpc(
                RpcRequest::Action {
                    actor: "player0".to_string(),
                    selection: "MAP-B".to_string(),
                    allow_override: false,
                },
                110,
            )
            .await;

        host.fail_queue_apply.store(true, Ordering::Relaxed);
        service.tick(160).await.unwrap();
        assert!(!service.engine().is_active());

        host.fail_queue_apply.store(false, Ordering::Relaxed);
        service.tick(161).await.unwrap();
        assert!(service.engine().is_active());
        assert_eq!(host.queued_uids(), vec!["MAP-B"]);
    }

    #[tokio::test]
    async fn test_cancel_resets_everything() {
        let host = Arc::new(LocalHost::new(test_pool()));
        let service = test_service(&host);

        service
            .handle_rpc(
                RpcRequest::Start {
                    mode: SessionMode::Matchmaking,
                    actor: "admin".to_string(),
                    duration_seconds: Some(60),
                    captain_a: None,
                    captain_b: None,
                    best_of: None,
                    timeout_seconds: None,
                },
                100,
            )
            .await;

        let reply = service
            .handle_rpc(
                RpcRequest::Cancel {
                    actor: "admin".to_string(),
                    reason: None,
                },
                110,
            )
            .await;
        assert!(reply.success);
        assert!(!service.coordinator().has_active_session());
        assert!(!service.gate().is_ready_armed());

        // Nothing left to cancel.
        let again = service
            .handle_rpc(
                RpcRequest::Cancel {
                    actor: "admin".to_string(),
                    reason: None,
                },
                111,
            )
            .await;
        assert!(!again.success);
        assert_eq!(again.code, "session_not_running");
    }

    #[tokio::test]
    async fn test_failed_cancel_leaves_gate_untouched() {
        let host = Arc::new(LocalHost::new(test_pool()));
        let service = test_service(&host);

        let armed = service
            .handle_rpc(
                RpcRequest::Ready {
                    actor: "admin".to_string(),
                },
                100,
            )
            .await;
        assert!(armed.success);

        // Nothing to cancel: the reply fails and the ready gate stays armed.
        let reply = service
            .handle_rpc(
                RpcRequest::Cancel {
                    actor: "admin".to_string(),
                    reason: None,
                },
                101,
            )
            .await;
        assert!(!reply.success);
        assert_eq!(reply.code, "session_not_running");
        assert!(service.gate().is_ready_armed());
    }

    #[tokio::test]
    async fn test_start_with_non_numeric_duration_is_rejected() {
        let host = Arc::new(LocalHost::new(test_pool()));
        let service = test_service(&host);

        let reply = service
            .handle_command(
                CommandInvocation {
                    operation: "start".to_string(),
                    parameters: serde_json::Map::new(),
                    positionals: vec!["soon".to_string()],
                    actor: "admin".to_string(),
                    is_admin: true,
                },
                100,
            )
            .await;
        assert!(!reply.success);
        assert_eq!(reply.code, "invalid_parameters");
        assert!(!service.coordinator().has_active_session());
    }

    #[tokio::test]
    async fn test_start_fails_without_a_map_pool() {
        let host = Arc::new(LocalHost::new(vec![]));
        let service = test_service(&host);

        let reply = service
            .handle_rpc(
                RpcRequest::Start {
                    mode: SessionMode::Matchmaking,
                    actor: "admin".to_string(),
                    duration_seconds: None,
                    captain_a: None,
                    captain_b: None,
                    best_of: None,
                    timeout_seconds: None,
                },
                100,
            )
            .await;
        assert!(!reply.success);
        assert_eq!(reply.code, "capability_unavailable");
    }

    #[tokio::test]
    async fn test_ready_rejected_while_lifecycle_active() {
        let host = Arc::new(LocalHost::new(test_pool()));
        host.set_players(humans(3));
        let service = test_service(&host);

        service
            .handle_rpc(
                RpcRequest::Start {
                    mode: SessionMode::Matchmaking,
                    actor: "admin".to_string(),
                    duration_seconds: Some(60),
                    captain_a: None,
                    captain_b: None,
                    best_of: None,
                    timeout_seconds: None,
                },
                100,
            )
            .await;
        service
            .handle_rpc(
                RpcRequest::Action {
                    actor: "player0".to_string(),
                    selection: "MAP-B".to_string(),
                    allow_override: false,
                },
                110,
            )
            .await;
        service.tick(160).await.unwrap();
        assert!(service.engine().is_active());

        // The vote is gone but the lifecycle still runs: ready is rejected.
        let reply = service
            .handle_rpc(
                RpcRequest::Ready {
                    actor: "admin".to_string(),
                },
                170,
            )
            .await;
        assert!(!reply.success);
        assert_eq!(reply.code, "session_active");
    }

    #[tokio::test]
    async fn test_ready_rejected_while_session_active() {
        let host = Arc::new(LocalHost::new(test_pool()));
        let service = test_service(&host);

        service
            .handle_rpc(
                RpcRequest::Start {
                    mode: SessionMode::Matchmaking,
                    actor: "admin".to_string(),
                    duration_seconds: Some(60),
                    captain_a: None,
                    captain_b: None,
                    best_of: None,
                    timeout_seconds: None,
                },
                100,
            )
            .await;

        let reply = service
            .handle_rpc(
                RpcRequest::Ready {
                    actor: "admin".to_string(),
                },
                101,
            )
            .await;
        assert!(!reply.success);
        assert_eq!(reply.code, "session_active");
    }

    #[tokio::test]
    async fn test_autostart_fires_through_prestart_window() {
        let host = Arc::new(LocalHost::new(test_pool()));
        host.set_players(humans(3));
        let service = test_service(&host);

        service
            .handle_rpc(
                RpcRequest::Ready {
                    actor: "admin".to_string(),
                },
                99,
            )
            .await;

        // First tick opens the prestart window (threshold 2, prestart 10s).
        service.tick(100).await.unwrap();
        assert!(service.gate().snapshot().pending_window.is_some());
        assert!(!service.coordinator().has_active_session());

        // Deadline passes: the gate fires and the vote starts.
        service.tick(110).await.unwrap();
        assert!(service.coordinator().has_active_session());
        let gate = service.gate().snapshot();
        assert!(gate.suppressed);
        assert!(!gate.ready_armed);
    }

    #[tokio::test]
    async fn test_tournament_flow_over_rpc() {
        let host = Arc::new(LocalHost::new(test_pool()));
        let service = test_service(&host);
        service.set_server_mode(SessionMode::Tournament).unwrap();

        let reply = service
            .handle_rpc(
                RpcRequest::Start {
                    mode: SessionMode::Tournament,
                    actor: "admin".to_string(),
                    duration_seconds: None,
                    captain_a: Some("capa".to_string()),
                    captain_b: Some("capb".to_string()),
                    best_of: Some(1),
                    timeout_seconds: None,
                },
                100,
            )
            .await;
        assert!(reply.success);

        // Pool of 3, best of 1: two bans then the decider locks.
        for (actor, selection) in [("capa", "MAP-A"), ("capb", "MAP-C")] {
            let action = service
                .handle_rpc(
                    RpcRequest::Action {
                        actor: actor.to_string(),
                        selection: selection.to_string(),
                        allow_override: false,
                    },
                    110,
                )
                .await;
            assert!(action.success, "{}", action.message);
        }

        // Completion was handed off: the decider is queued.
        assert!(!service.coordinator().has_active_session());
        assert_eq!(host.queued_uids(), vec!["MAP-B"]);
        // Tournament completions never arm the matchmaking lifecycle.
        assert!(!service.engine().is_active());
    }
}
