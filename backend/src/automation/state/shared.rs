use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scraping { account: String },
    Sleeping,
    PausedForAction,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Scraping { .. } => f.write_str("scraping"),
            Phase::Sleeping => f.write_str("sleeping"),
            Phase::PausedForAction => f.write_str("paused_for_action"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArbiterSnapshot {
    pub phase: Phase,
    pub pending_actions: usize,
    pub sweeps_completed: u64,
}

impl Default for ArbiterSnapshot {
    fn default() -> Self {
        Self { phase: Phase::Idle, pending_actions: 0, sweeps_completed: 0 }
    }
}

/// Coordination state shared by the sweep loop and action requests. Waiters
/// block on a predicate over the state instead of polling flags.
#[derive(Clone)]
pub struct ArbiterState {
    tx: Arc<watch::Sender<ArbiterSnapshot>>,
}

impl Default for ArbiterState {
    fn default() -> Self {
        Self::new()
    }
}

impl ArbiterState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ArbiterSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> ArbiterSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ArbiterSnapshot> {
        self.tx.subscribe()
    }

    pub fn set_phase(&self, phase: Phase) {
        self.tx.send_if_modified(|s| {
            if s.phase == phase {
                return false;
            }
            s.phase = phase;
            true
        });
    }

    /// Sets `phase` and returns the one it replaced.
    pub fn replace_phase(&self, phase: Phase) -> Phase {
        let mut previous = phase.clone();
        self.tx.send_if_modified(|s| {
            std::mem::swap(&mut s.phase, &mut previous);
            s.phase != previous
        });
        previous
    }

    /// Moves from `from` to `to`, leaving the phase alone if someone else
    /// changed it in the meantime.
    pub fn finish_phase(&self, from: &Phase, to: Phase) {
        self.tx.send_if_modified(|s| {
            if s.phase != *from || s.phase == to {
                return false;
            }
            s.phase = to;
            true
        });
    }

    pub fn complete_sweep(&self) {
        self.tx.send_modify(|s| s.sweeps_completed += 1);
    }

    pub fn action_pending(&self) -> bool {
        self.tx.borrow().pending_actions > 0
    }

    /// Registers an in-flight action until the ticket is dropped.
    pub fn action_ticket(&self) -> ActionTicket {
        self.tx.send_modify(|s| s.pending_actions += 1);
        ActionTicket { state: self.clone() }
    }

    pub async fn wait_for_no_actions(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| s.pending_actions == 0).await;
    }

    /// Waits up to `limit` for any in-flight scrape to finish. Returns whether
    /// the arbiter was out of the scraping phase in time.
    pub async fn wait_for_scrape_idle(&self, limit: Duration) -> bool {
        let mut rx = self.subscribe();
        let idle = rx.wait_for(|s| !matches!(s.phase, Phase::Scraping { .. }));
        let reached = matches!(tokio::time::timeout(limit, idle).await, Ok(Ok(_)));
        reached
    }
}

pub struct ActionTicket {
    state: ArbiterState,
}

impl Drop for ActionTicket {
    fn drop(&mut self) {
        self.state
            .tx
            .send_modify(|s| s.pending_actions = s.pending_actions.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tickets_count_pending_actions() {
        let state = ArbiterState::new();
        assert!(!state.action_pending());

        let first = state.action_ticket();
        let second = state.action_ticket();
        assert_eq!(state.snapshot().pending_actions, 2);

        drop(first);
        assert!(state.action_pending());
        drop(second);
        assert!(!state.action_pending());
    }

    #[tokio::test]
    async fn test_wait_for_no_actions_wakes_on_drop() {
        let state = ArbiterState::new();
        let ticket = state.action_ticket();

        let waiter = {
            let state = state.clone();
            tokio::spawn(async move { state.wait_for_no_actions().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(ticket);
        waiter.await.unwrap();
    }

    #[test]
    fn test_finish_phase_keeps_foreign_transitions() {
        let state = ArbiterState::new();
        state.set_phase(Phase::Sleeping);
        let scraping = Phase::Scraping { account: "a".into() };

        assert_eq!(state.replace_phase(scraping.clone()), Phase::Sleeping);
        state.finish_phase(&scraping, Phase::Sleeping);
        assert_eq!(state.snapshot().phase, Phase::Sleeping);

        state.replace_phase(scraping.clone());
        state.set_phase(Phase::PausedForAction);
        state.finish_phase(&scraping, Phase::Idle);
        assert_eq!(state.snapshot().phase, Phase::PausedForAction);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrape_idle_wait_is_bounded() {
        let state = ArbiterState::new();
        state.set_phase(Phase::Scraping { account: "a".into() });
        assert!(!state.wait_for_scrape_idle(Duration::from_secs(3)).await);

        state.set_phase(Phase::Sleeping);
        assert!(state.wait_for_scrape_idle(Duration::from_secs(3)).await);
    }
}
