//! Completion handoff
//!
//! Bridges a finished session to the host's map queue exactly once. The
//! coordinator may report the same completion more than once (explicit final
//! action and a later tick can both observe it), so applications are deduped
//! by session id and a session is only marked applied after the host accepts
//! the order.

use crate::error::{Result, VetoError};
use crate::host::{ChatBroadcaster, MapQueueApplier};
use crate::session::SessionSnapshot;
use crate::types::{QueueApplyReport, SessionId, SessionMode, SessionStatus};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// What a processed completion produced
#[derive(Debug, Clone)]
pub struct HandoffOutcome {
    pub session_id: SessionId,
    pub mode: SessionMode,
    pub report: QueueApplyReport,
    /// Set for matchmaking completions so the lifecycle engine can be armed
    pub selected_map: Option<crate::types::MapInfo>,
}

/// Applies decided map orders to the host queue, once per session
#[derive(Clone)]
pub struct CompletionHandoff {
    applier: Arc<dyn MapQueueApplier>,
    chat: Arc<dyn ChatBroadcaster>,
    applied: Arc<RwLock<HashSet<SessionId>>>,
}

impl CompletionHandoff {
    pub fn new(applier: Arc<dyn MapQueueApplier>, chat: Arc<dyn ChatBroadcaster>) -> Self {
        Self {
            applier,
            chat,
            applied: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    fn lock_err() -> VetoError {
        VetoError::InternalError {
            message: "Failed to acquire handoff lock".to_string(),
        }
    }

    /// Whether a session's completion has already been applied
    pub fn is_applied(&self, session_id: &SessionId) -> bool {
        self.applied
            .read()
            .map(|set| set.contains(session_id))
            .unwrap_or(false)
    }

    /// Apply a completed session's decided map order to the host queue.
    ///
    /// Returns `Ok(None)` when the completion was already applied or the
    /// snapshot is not a successful completion. A failed apply leaves the
    /// session unmarked so a later tick retries.
    pub async fn process_completion(
        &self,
        snapshot: &SessionSnapshot,
    ) -> Result<Option<HandoffOutcome>> {
        if snapshot.status() != SessionStatus::Completed {
            debug!(
                "Handoff ignoring non-completed session {} ({:?})",
                snapshot.session_id(),
                snapshot.status()
            );
            return Ok(None);
        }

        let session_id = snapshot.session_id();
        {
            let applied = self.applied.read().map_err(|_| Self::lock_err())?;
            if applied.contains(&session_id) {
                debug!("Handoff already applied for session {}", session_id);
                return Ok(None);
            }
        }

        let order = snapshot.decided_map_order();
        if order.is_empty() {
            warn!(
                "Completed session {} carries no decided map order",
                session_id
            );
            return Ok(None);
        }

        let report = match self.applier.apply_map_order(&order).await {
            Ok(report) => report,
            Err(e) => {
                warn!(
                    "Queue apply failed for session {}; will retry: {}",
                    session_id, e
                );
                let line = "Could not send the selected maps to the server queue; retrying";
                if let Err(chat_err) = self.chat.broadcast_public(line).await {
                    warn!("Could not broadcast the apply failure: {}", chat_err);
                }
                if let Err(chat_err) = self
                    .chat
                    .broadcast_admins(&format!(
                        "Queue apply failed for session {}: {}",
                        session_id, e
                    ))
                    .await
                {
                    warn!("Could not broadcast the apply failure to admins: {}", chat_err);
                }
                return Err(e);
            }
        };

        {
            let mut applied = self.applied.write().map_err(|_| Self::lock_err())?;
            applied.insert(session_id);
        }
        info!(
            "Queue applied for session {} ({:?}): {:?}",
            session_id, report.branch, report.queued_map_uids
        );

        let summary = match snapshot {
            SessionSnapshot::Matchmaking(s) => {
                let winner = s
                    .winner_map
                    .as_ref()
                    .map(|m| m.name.as_str())
                    .unwrap_or("?");
                format!("Map vote decided: {} is up next", winner)
            }
            SessionSnapshot::Tournament(s) => format!(
                "Draft complete: series order {}",
                s.series_order
                    .iter()
                    .map(|m| m.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };
        if let Err(e) = self.chat.broadcast_public(&summary).await {
            warn!("Could not broadcast completion publicly: {}", e);
        }
        if let Err(e) = self
            .chat
            .broadcast_admins(&format!(
                "Session {} applied to queue ({:?})",
                session_id, report.branch
            ))
            .await
        {
            warn!("Could not broadcast completion to admins: {}", e);
        }

        let selected_map = match snapshot.mode() {
            SessionMode::Matchmaking => order.first().cloned(),
            SessionMode::Tournament => None,
        };

        Ok(Some(HandoffOutcome {
            session_id,
            mode: snapshot.mode(),
            report,
            selected_map,
        }))
    }
}
