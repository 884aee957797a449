//! Shared fixtures for integration tests

use map_veto::config::AppConfig;
use map_veto::host::LocalHost;
use map_veto::service::{HostAdapters, VetoService};
use map_veto::types::{MapInfo, PlayerIdentity, RpcRequest, SessionMode};
use map_veto::utils::SequentialIdGenerator;
use std::sync::Arc;

/// Standard two-map pool used by the vote scenarios
pub fn two_map_pool() -> Vec<MapInfo> {
    vec![
        MapInfo::new("MAP-A", "Alpine Heights"),
        MapInfo::new("MAP-B", "Sunset Bay"),
    ]
}

/// Larger pool for draft scenarios
pub fn five_map_pool() -> Vec<MapInfo> {
    vec![
        MapInfo::new("MAP-A", "Alpine Heights"),
        MapInfo::new("MAP-B", "Sunset Bay"),
        MapInfo::new("MAP-C", "Red Canyon"),
        MapInfo::new("MAP-D", "Delta Works"),
        MapInfo::new("MAP-E", "Emerald Coast"),
    ]
}

pub fn human(login: &str, pid: i64) -> PlayerIdentity {
    PlayerIdentity {
        login: login.to_string(),
        pid,
        is_fake: Some(false),
    }
}

pub fn fake(login: &str, pid: i64) -> PlayerIdentity {
    PlayerIdentity {
        login: login.to_string(),
        pid,
        is_fake: Some(true),
    }
}

/// A complete system over the in-memory host with deterministic session ids
pub fn create_test_system(pool: Vec<MapInfo>) -> (Arc<LocalHost>, VetoService) {
    let host = Arc::new(LocalHost::new(pool));
    let service = VetoService::new(
        AppConfig::default(),
        HostAdapters::from_host(host.clone()),
        Arc::new(SequentialIdGenerator::new()),
    );
    (host, service)
}

/// RPC request starting a matchmaking vote
pub fn start_vote(duration_seconds: u64) -> RpcRequest {
    RpcRequest::Start {
        mode: SessionMode::Matchmaking,
        actor: "admin".to_string(),
        duration_seconds: Some(duration_seconds),
        captain_a: None,
        captain_b: None,
        best_of: None,
        timeout_seconds: None,
    }
}

/// RPC request starting a tournament draft
pub fn start_draft(captain_a: &str, captain_b: &str, best_of: usize) -> RpcRequest {
    RpcRequest::Start {
        mode: SessionMode::Tournament,
        actor: "admin".to_string(),
        duration_seconds: None,
        captain_a: Some(captain_a.to_string()),
        captain_b: Some(captain_b.to_string()),
        best_of: Some(best_of),
        timeout_seconds: None,
    }
}

/// RPC vote or draft action
pub fn action(actor: &str, selection: &str) -> RpcRequest {
    RpcRequest::Action {
        actor: actor.to_string(),
        selection: selection.to_string(),
        allow_override: false,
    }
}
