//! Autostart / ready-gate
//!
//! Threshold- and timer-gated automatic start of matchmaking votes. An
//! operator must explicitly arm the ready gate before autostart may ever
//! trigger; eligibility opens an announced prestart window and the actual
//! start is deferred to the tick where the window deadline passes.
//!
//! The armed/suppressed/pending flags are folded into one phase enum so
//! illegal combinations are unrepresentable.

use crate::error::{Result, VetoError};
use crate::types::{EpochSeconds, SessionMode};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// The single guard reason produced by each tick evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    ModeNotMatchmaking,
    SessionActive,
    BelowThreshold,
    ReadyGateUnarmed,
    Eligible,
}

/// Why a pending prestart window was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowCancelReason {
    BelowThreshold,
    ReadyGateDisarmed,
    ModeChanged,
    SessionStarted,
}

impl std::fmt::Display for WindowCancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowCancelReason::BelowThreshold => write!(f, "player count dropped below threshold"),
            WindowCancelReason::ReadyGateDisarmed => write!(f, "ready gate was disarmed"),
            WindowCancelReason::ModeChanged => write!(f, "server mode changed"),
            WindowCancelReason::SessionStarted => write!(f, "a session started elsewhere"),
        }
    }
}

/// An announced, pending automatic start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrestartWindow {
    pub armed_at: EpochSeconds,
    pub deadline_at: EpochSeconds,
    pub source: String,
}

/// Gate phase; pending-prestart carries its window
///
/// `failure_latched` distinguishes suppression after a failed lifecycle
/// cycle from ordinary post-fire suppression: the latched form survives
/// roster churn and only an explicit operator arm clears it.
#[derive(Debug, Clone)]
enum GatePhase {
    Armed,
    Suppressed { failure_latched: bool },
    PendingPrestart(PrestartWindow),
}

/// What the caller must do after one gate evaluation
#[derive(Debug, Clone)]
pub enum GateTick {
    /// Nothing to do this tick; the guard reason explains why.
    Hold { reason: GateReason },
    /// A prestart window was just opened; announce the imminent start.
    WindowOpened { window: PrestartWindow },
    /// The pending window was cancelled; announce it.
    WindowCancelled { reason: WindowCancelReason },
    /// The window deadline passed; start the session now.
    Fire,
}

#[derive(Debug)]
struct GateInner {
    phase: GatePhase,
    ready_armed: bool,
}

/// Status projection of the gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSnapshot {
    pub armed: bool,
    pub suppressed: bool,
    pub failure_latched: bool,
    pub ready_armed: bool,
    pub pending_window: Option<PrestartWindow>,
    pub min_players_threshold: usize,
}

/// Threshold/timer-gated autostart state machine
#[derive(Clone)]
pub struct AutostartGate {
    inner: Arc<RwLock<GateInner>>,
    min_players_threshold: usize,
    prestart_seconds: u64,
}

impl AutostartGate {
    pub fn new(min_players_threshold: usize, prestart_seconds: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(GateInner {
                phase: GatePhase::Armed,
                ready_armed: false,
            })),
            min_players_threshold,
            prestart_seconds,
        }
    }

    fn lock_err() -> VetoError {
        VetoError::InternalError {
            message: "Failed to acquire gate lock".to_string(),
        }
    }

    /// Operator arms the ready gate. Fails while a session is running.
    pub fn arm_ready(&self, session_active: bool) -> Result<()> {
        if session_active {
            return Err(VetoError::SessionActive {
                session_id: "running".to_string(),
            }
            .into());
        }
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        inner.ready_armed = true;
        if matches!(
            inner.phase,
            GatePhase::Suppressed {
                failure_latched: true
            }
        ) {
            info!("Operator arm cleared the failure latch");
            inner.phase = GatePhase::Armed;
        }
        info!("Ready gate armed by operator");
        Ok(())
    }

    /// Operator disarms the ready gate; a pending window is cancelled on the
    /// next evaluation.
    pub fn disarm_ready(&self, reason: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        inner.ready_armed = false;
        info!("Ready gate disarmed ({})", reason);
        Ok(())
    }

    pub fn is_ready_armed(&self) -> bool {
        self.inner
            .read()
            .map(|inner| inner.ready_armed)
            .unwrap_or(false)
    }

    /// The exactly-one guard reason for the current conditions.
    fn guard_reason(
        &self,
        inner: &GateInner,
        mode: SessionMode,
        session_active: bool,
        player_count: usize,
    ) -> GateReason {
        if mode != SessionMode::Matchmaking {
            GateReason::ModeNotMatchmaking
        } else if session_active {
            GateReason::SessionActive
        } else if player_count < self.min_players_threshold {
            GateReason::BelowThreshold
        } else if !inner.ready_armed {
            GateReason::ReadyGateUnarmed
        } else {
            GateReason::Eligible
        }
    }

    /// Evaluate the gate for one tick.
    pub fn evaluate(
        &self,
        now: EpochSeconds,
        mode: SessionMode,
        session_active: bool,
        player_count: usize,
        source: &str,
    ) -> Result<GateTick> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;

        match &inner.phase {
            GatePhase::PendingPrestart(window) => {
                let cancel = if mode != SessionMode::Matchmaking {
                    Some(WindowCancelReason::ModeChanged)
                } else if !inner.ready_armed {
                    Some(WindowCancelReason::ReadyGateDisarmed)
                } else if player_count < self.min_players_threshold {
                    Some(WindowCancelReason::BelowThreshold)
                } else if session_active {
                    Some(WindowCancelReason::SessionStarted)
                } else {
                    None
                };

                if let Some(reason) = cancel {
                    info!("Prestart window cancelled: {}", reason);
                    inner.phase = GatePhase::Armed;
                    return Ok(GateTick::WindowCancelled { reason });
                }

                if now >= window.deadline_at {
                    // Window consumed; the caller starts the session and
                    // reports back via on_autostart_fired.
                    inner.phase = GatePhase::Armed;
                    return Ok(GateTick::Fire);
                }

                Ok(GateTick::Hold {
                    reason: GateReason::Eligible,
                })
            }
            GatePhase::Suppressed { failure_latched } => {
                let latched = *failure_latched;
                let reason = self.guard_reason(&inner, mode, session_active, player_count);
                // Only ordinary post-fire suppression lifts on roster churn;
                // the failure latch waits for an operator arm.
                if !latched && player_count < self.min_players_threshold {
                    debug!("Player count below threshold; autostart gate re-armed");
                    inner.phase = GatePhase::Armed;
                }
                Ok(GateTick::Hold { reason })
            }
            GatePhase::Armed => {
                let reason = self.guard_reason(&inner, mode, session_active, player_count);
                if reason == GateReason::Eligible {
                    let window = PrestartWindow {
                        armed_at: now,
                        deadline_at: now + self.prestart_seconds as i64,
                        source: source.to_string(),
                    };
                    info!(
                        "Autostart eligible - prestart window open until t={}",
                        window.deadline_at
                    );
                    inner.phase = GatePhase::PendingPrestart(window.clone());
                    Ok(GateTick::WindowOpened { window })
                } else {
                    Ok(GateTick::Hold { reason })
                }
            }
        }
    }

    /// A start triggered by the gate succeeded: suppress further triggers and
    /// require a fresh operator arm for the next cycle.
    pub fn on_autostart_fired(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        inner.phase = GatePhase::Suppressed {
            failure_latched: false,
        };
        inner.ready_armed = false;
        Ok(())
    }

    /// Lifecycle cycle finished cleanly: re-arm for the next group.
    pub fn re_arm(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        inner.phase = GatePhase::Armed;
        inner.ready_armed = false;
        info!("Autostart gate re-armed; ready gate requires explicit arm");
        Ok(())
    }

    /// Lifecycle failed: latch the suppression until an operator arms ready
    /// again. Roster churn never lifts this form.
    pub fn suppress(&self, reason: &str) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        inner.phase = GatePhase::Suppressed {
            failure_latched: true,
        };
        info!("Autostart gate suppressed ({})", reason);
        Ok(())
    }

    /// Drop any pending window without firing (explicit cancel path).
    pub fn clear_pending_window(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(|_| Self::lock_err())?;
        if matches!(inner.phase, GatePhase::PendingPrestart(_)) {
            inner.phase = GatePhase::Armed;
        }
        Ok(())
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let inner = self.inner.read().ok();
        let (phase, ready_armed) = inner
            .map(|i| (i.phase.clone(), i.ready_armed))
            .unwrap_or((
                GatePhase::Suppressed {
                    failure_latched: false,
                },
                false,
            ));
        GateSnapshot {
            armed: matches!(phase, GatePhase::Armed | GatePhase::PendingPrestart(_)),
            suppressed: matches!(phase, GatePhase::Suppressed { .. }),
            failure_latched: matches!(
                phase,
                GatePhase::Suppressed {
                    failure_latched: true
                }
            ),
            ready_armed,
            pending_window: match phase {
                GatePhase::PendingPrestart(window) => Some(window),
                _ => None,
            },
            min_players_threshold: self.min_players_threshold,
        }
    }
}
