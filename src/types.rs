//! Common types used throughout the map selection core

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Player login as reported by the host server
pub type Login = String;

/// Stable map identifier assigned by the host
pub type MapUid = String;

/// Unique identifier for selection sessions
pub type SessionId = Uuid;

/// Epoch timestamp in whole seconds (tick granularity)
pub type EpochSeconds = i64;

/// A single map as enumerated from the host's map pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapInfo {
    pub uid: MapUid,
    pub name: String,
    pub file: String,
    pub environment: String,
    pub rotation_index: usize,
}

impl MapInfo {
    /// Minimal constructor used heavily in tests and the local host.
    pub fn new(uid: &str, name: &str) -> Self {
        Self {
            uid: uid.to_string(),
            name: name.to_string(),
            file: format!("{}.Map.Gbx", name),
            environment: "Stadium".to_string(),
            rotation_index: 0,
        }
    }
}

/// Selection mode for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Matchmaking,
    Tournament,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Matchmaking => write!(f, "matchmaking"),
            SessionMode::Tournament => write!(f, "tournament"),
        }
    }
}

/// Lifecycle status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Which side a tournament draft step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    TeamA,
    TeamB,
    System,
}

impl std::fmt::Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Team::TeamA => write!(f, "team_a"),
            Team::TeamB => write!(f, "team_b"),
            Team::System => write!(f, "system"),
        }
    }
}

/// Kind of draft action a step expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Ban,
    Pick,
    Lock,
}

/// Whether an action was performed explicitly or inferred by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Explicit,
    Inferred,
}

/// Channel through which a draft action arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionSource {
    Chat,
    Rpc,
    TimeoutAuto,
}

impl std::fmt::Display for ActionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionSource::Chat => write!(f, "chat"),
            ActionSource::Rpc => write!(f, "rpc"),
            ActionSource::TimeoutAuto => write!(f, "timeout_auto"),
        }
    }
}

/// Structured result of every mutating operation.
///
/// Validation failures come back as `success = false` with a stable code and
/// no side effects; callers never have to parse messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl CommandReply {
    pub fn ok(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: code.to_string(),
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }

    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            code: code.to_string(),
            message: message.into(),
            details: serde_json::Map::new(),
        }
    }

    pub fn from_error(err: &crate::error::VetoError) -> Self {
        Self::failure(err.code(), err.to_string())
    }

    /// Attach a detail value, consuming and returning self for chaining.
    pub fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

/// One recorded attempt against a host entrypoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub strategy: String,
    pub success: bool,
    pub message: String,
}

impl AttemptRecord {
    pub fn succeeded(strategy: &str) -> Self {
        Self {
            strategy: strategy.to_string(),
            success: true,
            message: String::new(),
        }
    }

    pub fn failed(strategy: &str, message: impl Into<String>) -> Self {
        Self {
            strategy: strategy.to_string(),
            success: false,
            message: message.into(),
        }
    }
}

/// Tracked outcome of one lifecycle side effect
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub attempted: bool,
    pub success: bool,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl ActionOutcome {
    pub fn record_success(&mut self, message: impl Into<String>) {
        self.attempted = true;
        self.success = true;
        self.code = None;
        self.message = Some(message.into());
    }

    pub fn record_failure(&mut self, code: &str, message: impl Into<String>) {
        self.attempted = true;
        self.success = false;
        self.code = Some(code.to_string());
        self.message = Some(message.into());
    }
}

/// Which branch the queue applier took for the decided opener map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyBranch {
    /// The decided opener differs from the currently loaded map; a skip is required.
    OpenerDiffers,
    /// The decided opener is already the current map; no skip needed.
    OpenerAlreadyCurrent,
}

/// Report returned by the external map queue applier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueApplyReport {
    pub branch: ApplyBranch,
    pub queued_map_uids: Vec<MapUid>,
    pub current_map_uid: MapUid,
}

/// A connected identity as reported by the host roster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerIdentity {
    pub login: Login,
    pub pid: i64,
    /// Host-provided fake-player flag, when the host exposes one.
    pub is_fake: Option<bool>,
}

impl PlayerIdentity {
    /// Classify a fake/bot identity. Order of evidence: explicit host flag,
    /// negative pid, then the login prefix convention for spawned fakes.
    pub fn is_fake_player(&self) -> bool {
        if let Some(flag) = self.is_fake {
            return flag;
        }
        if self.pid < 0 {
            return true;
        }
        self.login.starts_with('*')
    }
}

/// Parsed chat command delivered by the admin/command front-end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandInvocation {
    pub operation: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub positionals: Vec<String>,
    pub actor: Login,
    #[serde(default)]
    pub is_admin: bool,
}

/// Union type for RPC requests on the communication channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcRequest {
    Start {
        mode: SessionMode,
        actor: Login,
        #[serde(default)]
        duration_seconds: Option<u64>,
        #[serde(default)]
        captain_a: Option<Login>,
        #[serde(default)]
        captain_b: Option<Login>,
        #[serde(default)]
        best_of: Option<usize>,
        #[serde(default)]
        timeout_seconds: Option<u64>,
    },
    Action {
        actor: Login,
        selection: String,
        #[serde(default)]
        allow_override: bool,
    },
    Status,
    Cancel {
        actor: Login,
        #[serde(default)]
        reason: Option<String>,
    },
    Ready {
        actor: Login,
    },
}
