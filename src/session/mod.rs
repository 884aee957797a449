//! Session state machines for map selection
//!
//! Two independent variants: the crowd-vote `MatchmakingVoteSession` and the
//! captain pick/ban `TournamentDraftSession`. The coordinator owns at most
//! one of either at a time.

pub mod matchmaking;
pub mod tournament;

pub use matchmaking::{MatchmakingSnapshot, MatchmakingVoteSession, VoteReceipt};
pub use tournament::{
    DraftAction, DraftStep, TournamentDraftSession, TournamentSnapshot,
};

use crate::types::{MapInfo, SessionId, SessionMode, SessionStatus};
use serde::{Deserialize, Serialize};

/// Read-only projection of the active (or just-completed) session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SessionSnapshot {
    Matchmaking(MatchmakingSnapshot),
    Tournament(TournamentSnapshot),
}

impl SessionSnapshot {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionSnapshot::Matchmaking(s) => s.session_id,
            SessionSnapshot::Tournament(s) => s.session_id,
        }
    }

    pub fn mode(&self) -> SessionMode {
        match self {
            SessionSnapshot::Matchmaking(_) => SessionMode::Matchmaking,
            SessionSnapshot::Tournament(_) => SessionMode::Tournament,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            SessionSnapshot::Matchmaking(s) => s.status,
            SessionSnapshot::Tournament(s) => s.status,
        }
    }

    /// The decided map order this session resolved to, once completed.
    ///
    /// Matchmaking resolves to the single winner; a tournament draft resolves
    /// to the full series order with the decider last.
    pub fn decided_map_order(&self) -> Vec<MapInfo> {
        match self {
            SessionSnapshot::Matchmaking(s) => s
                .winner_map
                .clone()
                .map(|m| vec![m])
                .unwrap_or_default(),
            SessionSnapshot::Tournament(s) => s.series_order.clone(),
        }
    }
}

/// Resolve a user-supplied selection against an ordered set of maps.
///
/// A selection is either a map uid (case-insensitive) or a 1-based index into
/// the list. Shared by both session variants.
pub(crate) fn resolve_selection<'a>(
    maps: &'a [MapInfo],
    selection: &str,
) -> Option<&'a MapInfo> {
    let trimmed = selection.trim();
    if let Some(found) = maps
        .iter()
        .find(|m| m.uid.eq_ignore_ascii_case(trimmed))
    {
        return Some(found);
    }
    if let Ok(index) = trimmed.parse::<usize>() {
        if index >= 1 && index <= maps.len() {
            return Some(&maps[index - 1]);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_selection_by_uid_case_insensitive() {
        let maps = vec![MapInfo::new("MAP-A", "Alpine"), MapInfo::new("MAP-B", "Bay")];
        assert_eq!(resolve_selection(&maps, "map-b").unwrap().uid, "MAP-B");
        assert_eq!(resolve_selection(&maps, " MAP-A ").unwrap().uid, "MAP-A");
    }

    #[test]
    fn test_resolve_selection_by_index_is_one_based() {
        let maps = vec![MapInfo::new("MAP-A", "Alpine"), MapInfo::new("MAP-B", "Bay")];
        assert_eq!(resolve_selection(&maps, "1").unwrap().uid, "MAP-A");
        assert_eq!(resolve_selection(&maps, "2").unwrap().uid, "MAP-B");
        assert!(resolve_selection(&maps, "0").is_none());
        assert!(resolve_selection(&maps, "3").is_none());
        assert!(resolve_selection(&maps, "garbage").is_none());
    }
}
