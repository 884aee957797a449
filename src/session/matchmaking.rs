//! Matchmaking vote session
//!
//! Connected players vote for one map from the pool inside a fixed time
//! window. One vote per login (case-insensitive, overwritable); the tick
//! finalizes the session once the deadline passes.

use crate::error::{Result, VetoError};
use crate::session::resolve_selection;
use crate::types::{EpochSeconds, MapInfo, MapUid, SessionId, SessionStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of casting a single vote
#[derive(Debug, Clone)]
pub struct VoteReceipt {
    pub map: MapInfo,
    /// True when this login had voted before and the vote was replaced.
    pub overwrote_previous: bool,
    /// Distinct logins that have voted so far.
    pub vote_count: usize,
}

/// Read-only projection of a matchmaking vote session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchmakingSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub started_at: EpochSeconds,
    pub deadline: EpochSeconds,
    pub map_pool: Vec<MapInfo>,
    /// Per-map counts in original pool order.
    pub vote_totals: Vec<(MapUid, usize)>,
    /// Distinct logins that voted.
    pub vote_count: usize,
    pub winner_map: Option<MapInfo>,
    pub tie_break_applied: bool,
    pub resolution_reason: Option<String>,
}

/// Crowd-vote map selection session
#[derive(Debug, Clone)]
pub struct MatchmakingVoteSession {
    id: SessionId,
    map_pool: Vec<MapInfo>,
    status: SessionStatus,
    started_at: EpochSeconds,
    deadline: EpochSeconds,
    /// Normalized login -> voted map uid. BTreeMap keeps iteration deterministic.
    votes: BTreeMap<String, MapUid>,
    winner_map: Option<MapInfo>,
    tie_break_applied: bool,
    resolution_reason: Option<String>,
}

impl MatchmakingVoteSession {
    pub fn new(
        id: SessionId,
        map_pool: Vec<MapInfo>,
        duration_seconds: u64,
        now: EpochSeconds,
    ) -> Result<Self> {
        if map_pool.is_empty() {
            return Err(VetoError::InvalidParameters {
                reason: "map pool is empty".to_string(),
            }
            .into());
        }
        if duration_seconds == 0 {
            return Err(VetoError::InvalidParameters {
                reason: "vote duration must be at least one second".to_string(),
            }
            .into());
        }

        Ok(Self {
            id,
            map_pool,
            status: SessionStatus::Running,
            started_at: now,
            deadline: now + duration_seconds as i64,
            votes: BTreeMap::new(),
            winner_map: None,
            tie_break_applied: false,
            resolution_reason: None,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn deadline(&self) -> EpochSeconds {
        self.deadline
    }

    pub fn is_expired(&self, now: EpochSeconds) -> bool {
        now >= self.deadline
    }

    /// Register or overwrite the vote for `login`.
    ///
    /// `selection` is either a map uid (case-insensitive) or a 1-based pool
    /// index. Re-voting replaces the previous vote rather than duplicating it.
    pub fn cast_vote(&mut self, login: &str, selection: &str) -> Result<VoteReceipt> {
        if self.status != SessionStatus::Running {
            return Err(VetoError::SessionNotRunning.into());
        }

        let map = resolve_selection(&self.map_pool, selection)
            .cloned()
            .ok_or_else(|| VetoError::InvalidParameters {
                reason: format!("'{}' is neither a map uid nor a pool index", selection),
            })?;

        let key = crate::utils::normalize_login(login);
        if key.is_empty() {
            return Err(VetoError::InvalidParameters {
                reason: "empty login".to_string(),
            }
            .into());
        }

        let overwrote_previous = self.votes.insert(key, map.uid.clone()).is_some();

        Ok(VoteReceipt {
            map,
            overwrote_previous,
            vote_count: self.votes.len(),
        })
    }

    /// Per-map vote counts in original pool order. Maps without votes are
    /// included at zero so the totals always cover the whole pool.
    pub fn vote_totals(&self) -> Vec<(MapUid, usize)> {
        self.map_pool
            .iter()
            .map(|map| {
                let count = self.votes.values().filter(|uid| **uid == map.uid).count();
                (map.uid.clone(), count)
            })
            .collect()
    }

    /// Resolve the winner and complete the session.
    ///
    /// Winner is the map with the highest total; ties are broken by the
    /// earliest position in the original pool ordering, and the tie-break
    /// flag is recorded whenever more than one map shares the top count.
    /// Deterministic and pure given the accumulated votes.
    pub fn finalize(&mut self, reason: &str) -> Result<MatchmakingSnapshot> {
        if self.status != SessionStatus::Running {
            return Err(VetoError::SessionNotRunning.into());
        }

        let totals = self.vote_totals();
        let top = totals.iter().map(|(_, count)| *count).max().unwrap_or(0);
        let shared_top = totals.iter().filter(|(_, count)| *count == top).count();

        // First pool position holding the top count wins.
        let winner_uid = totals
            .iter()
            .find(|(_, count)| *count == top)
            .map(|(uid, _)| uid.clone())
            .ok_or_else(|| VetoError::InternalError {
                message: "vote totals empty for a non-empty pool".to_string(),
            })?;

        self.winner_map = self
            .map_pool
            .iter()
            .find(|m| m.uid == winner_uid)
            .cloned();
        self.tie_break_applied = shared_top > 1;
        self.status = SessionStatus::Completed;
        self.resolution_reason = Some(reason.to_string());

        Ok(self.snapshot())
    }

    pub fn cancel(&mut self, reason: &str) {
        self.status = SessionStatus::Cancelled;
        self.resolution_reason = Some(reason.to_string());
    }

    pub fn snapshot(&self) -> MatchmakingSnapshot {
        MatchmakingSnapshot {
            session_id: self.id,
            status: self.status,
            started_at: self.started_at,
            deadline: self.deadline,
            map_pool: self.map_pool.clone(),
            vote_totals: self.vote_totals(),
            vote_count: self.votes.len(),
            winner_map: self.winner_map.clone(),
            tie_break_applied: self.tie_break_applied,
            resolution_reason: self.resolution_reason.clone(),
        }
    }
}
