//! Relay session phase.
//!
//! ```text
//! Idle -> Polling -> Translating -> Publishing -> Polling -> ...
//!                 (any) -> Terminating -> Terminated
//! ```
//!
//! Workers report the phase they enter; nothing reads it to make decisions.
//! It exists for logs and for callers waiting on a session to finish.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    #[default]
    Idle,
    Polling,
    Translating,
    Publishing,
    Terminating,
    Terminated,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Polling => "polling",
            SessionPhase::Translating => "translating",
            SessionPhase::Publishing => "publishing",
            SessionPhase::Terminating => "terminating",
            SessionPhase::Terminated => "terminated",
        }
    }

    /// Whether `next` may follow this phase.
    pub fn can_enter(&self, next: SessionPhase) -> bool {
        match (self, next) {
            (SessionPhase::Terminated, _) => false,
            (SessionPhase::Terminating, next) => next == SessionPhase::Terminated,
            (_, SessionPhase::Idle) => false,
            _ => true,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable session phase.
#[derive(Debug, Clone)]
pub struct PhaseTracker {
    tx: Arc<watch::Sender<SessionPhase>>,
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionPhase::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> SessionPhase {
        *self.tx.borrow()
    }

    /// Move to `phase`. Returns `false` if the transition is not allowed
    /// (the phase is left unchanged).
    pub fn enter(&self, phase: SessionPhase) -> bool {
        let mut from = SessionPhase::Idle;
        let changed = self.tx.send_if_modified(|current| {
            from = *current;
            if *current != phase && current.can_enter(phase) {
                *current = phase;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::trace!(from = %from, to = %phase, "Session phase");
        }
        changed || from == phase
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.tx.subscribe()
    }

    /// Wait until the session reaches `phase`.
    pub async fn reached(&self, phase: SessionPhase) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|current| *current == phase).await;
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_then_termination() {
        let phase = PhaseTracker::new();
        assert_eq!(phase.current(), SessionPhase::Idle);

        for next in [
            SessionPhase::Polling,
            SessionPhase::Translating,
            SessionPhase::Publishing,
            SessionPhase::Polling,
        ] {
            assert!(phase.enter(next));
            assert_eq!(phase.current(), next);
        }

        assert!(phase.enter(SessionPhase::Terminating));
        assert!(!phase.enter(SessionPhase::Polling));
        assert_eq!(phase.current(), SessionPhase::Terminating);

        assert!(phase.enter(SessionPhase::Terminated));
        assert!(!phase.enter(SessionPhase::Terminating));
        assert_eq!(phase.current(), SessionPhase::Terminated);
    }

    #[test]
    fn test_terminating_reachable_from_idle() {
        let phase = PhaseTracker::new();
        assert!(phase.enter(SessionPhase::Terminating));
        assert!(phase.enter(SessionPhase::Terminating));
        assert!(!phase.enter(SessionPhase::Idle));
    }

    #[tokio::test]
    async fn test_reached() {
        let phase = PhaseTracker::new();
        let waiter = {
            let phase = phase.clone();
            tokio::spawn(async move { phase.reached(SessionPhase::Terminated).await })
        };

        phase.enter(SessionPhase::Terminating);
        phase.enter(SessionPhase::Terminated);
        waiter.await.unwrap();
    }
}
