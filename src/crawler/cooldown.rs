//! Run-scoped cooldown gate shared by all page workers
//!
//! When the upstream starts failing, the first worker to notice closes the
//! gate, sleeps the recovery delay, and reopens it. Every other worker parks
//! on the gate instead of hammering the registry, and all of them resume
//! together when it reopens.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// State of a [`CooldownGate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Open,
    Cooling,
}

/// What a call to [`CooldownGate::report_failure`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownOutcome {
    /// This caller started the cooldown and slept through it
    Triggered,
    /// A cooldown was already running; the caller waited for it to end
    Waited,
}

/// Pause/resume signal for the workers of one crawl
#[derive(Debug)]
pub struct CooldownGate {
    state: watch::Sender<GateState>,
    delay: Duration,
    cycles: AtomicUsize,
}

impl CooldownGate {
    pub fn new(delay: Duration) -> Self {
        let (state, _) = watch::channel(GateState::Open);
        Self {
            state,
            delay,
            cycles: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of completed cooldown cycles
    pub fn cycles(&self) -> usize {
        self.cycles.load(Ordering::SeqCst)
    }

    /// Returns once the gate is open
    pub async fn wait_open(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| *state == GateState::Open).await;
    }

    /// Reports an upstream failure
    ///
    /// Starts a cooldown if the gate is open, otherwise waits for the
    /// running one to end. Either way, returns with the gate open.
    pub async fn report_failure(&self) -> CooldownOutcome {
        let triggered = self.state.send_if_modified(|state| {
            if *state == GateState::Open {
                *state = GateState::Cooling;
                true
            } else {
                false
            }
        });

        if !triggered {
            self.wait_open().await;
            return CooldownOutcome::Waited;
        }

        let reopen = ReopenOnDrop { gate: self };
        warn!(
            "Upstream failing, pausing all page workers for {:?}",
            self.delay
        );
        tokio::time::sleep(self.delay).await;
        drop(reopen);

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Cooldown #{} finished, resuming page workers", cycle);
        CooldownOutcome::Triggered
    }
}

/// Reopens the gate even if the cooling worker is cancelled mid-sleep
struct ReopenOnDrop<'a> {
    gate: &'a CooldownGate,
}

impl Drop for ReopenOnDrop<'_> {
    fn drop(&mut self) {
        self.gate.state.send_replace(GateState::Open);
    }
}
