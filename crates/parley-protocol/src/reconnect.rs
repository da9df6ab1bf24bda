//! Client-side reconnect state machine.
//!
//! An explicit machine with a counter and a backoff policy parameter —
//! not recursive timer callbacks. The transport layer reports events
//! (`on_open`, `on_loss`, `on_clean_close`) and acts on the returned
//! directive; the machine never schedules anything itself.

use std::time::Duration;

use parley_core::config::{
    RECONNECT_BASE_DELAY_MS, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_DELAY_MS,
};

/// Connection liveness states. `Reconnecting` carries the attempt number
/// of the retry currently in flight (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Reconnecting { attempt: u32 },
    Closed,
}

/// What the transport should do after a connection loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDirective {
    /// Wait this long, then attempt to reconnect.
    RetryAfter(Duration),
    /// Budget exhausted — a fresh connection must be initiated
    /// deliberately, never automatically.
    GiveUp,
}

/// Backoff parameters. Delay doubles per attempt, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RECONNECT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given 1-based attempt: base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}

/// Tracks one session connection through its lifecycle:
/// `Connecting → Open → {Closed | Reconnecting → Open}`.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: SessionState,
    policy: BackoffPolicy,
}

impl ConnectionSupervisor {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: SessionState::Connecting,
            policy,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Authenticated handshake completed. Resets the attempt counter, so a
    /// later loss starts a fresh reconnect budget.
    pub fn on_open(&mut self) {
        self.state = SessionState::Open;
    }

    /// Transient network loss (or failed reconnect attempt). Returns the
    /// next directive; after `max_attempts` consecutive failures the
    /// session transitions to `Closed` and no further retry is issued.
    pub fn on_loss(&mut self) -> ReconnectDirective {
        let next_attempt = match self.state {
            SessionState::Open | SessionState::Connecting => 1,
            SessionState::Reconnecting { attempt } => attempt + 1,
            SessionState::Closed => return ReconnectDirective::GiveUp,
        };

        if next_attempt > self.policy.max_attempts {
            self.state = SessionState::Closed;
            return ReconnectDirective::GiveUp;
        }

        self.state = SessionState::Reconnecting {
            attempt: next_attempt,
        };
        ReconnectDirective::RetryAfter(self.policy.delay_for(next_attempt))
    }

    /// Explicit client disconnect or server-initiated close.
    pub fn on_clean_close(&mut self) {
        self.state = SessionState::Closed;
    }
}
