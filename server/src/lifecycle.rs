//! Match phase and lobby countdown
//!
//! The phase lives in a `watch` channel so tasks can sleep until it changes
//! instead of polling. Transitions follow a fixed cycle:
//! `Lobby -> Running -> Finished -> Lobby`.

use log::info;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Lobby,
    Running,
    Finished,
}

/// Server-wide match phase.
pub struct MatchLifecycle {
    tx: watch::Sender<MatchPhase>,
}

impl MatchLifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(MatchPhase::Lobby);
        Self { tx }
    }

    pub fn current(&self) -> MatchPhase {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MatchPhase> {
        self.tx.subscribe()
    }

    /// Lobby -> Running
    pub fn start_race(&self) -> bool {
        self.transition(MatchPhase::Lobby, MatchPhase::Running)
    }

    /// Running -> Finished
    pub fn finish(&self) -> bool {
        self.transition(MatchPhase::Running, MatchPhase::Finished)
    }

    /// Finished -> Lobby
    pub fn reset_to_lobby(&self) -> bool {
        self.transition(MatchPhase::Finished, MatchPhase::Lobby)
    }

    fn transition(&self, from: MatchPhase, to: MatchPhase) -> bool {
        let changed = self.tx.send_if_modified(|phase| {
            if *phase == from {
                *phase = to;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Match phase {:?} -> {:?}", from, to);
        }
        changed
    }

    /// Waits until the phase equals `phase`. Returns immediately if it already does.
    pub async fn wait_for(&self, phase: MatchPhase) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we borrow it
        let _ = rx.wait_for(|current| *current == phase).await;
    }
}

impl Default for MatchLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Time left in the lobby before the race starts.
///
/// Starts when the first client joins an empty lobby and freezes while the
/// lobby is empty.
#[derive(Debug)]
pub struct LobbyCountdown {
    duration: Duration,
    started: Option<Instant>,
}

impl LobbyCountdown {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            started: None,
        }
    }

    /// Starts the countdown from the full duration.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn freeze(&mut self) {
        self.started = None;
    }

    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    pub fn remaining(&self) -> Duration {
        match self.started {
            Some(started) => self.duration.saturating_sub(started.elapsed()),
            None => self.duration,
        }
    }

    /// Remaining whole seconds, rounded up so a running countdown only reads
    /// zero once it has actually expired.
    pub fn remaining_secs(&self) -> u32 {
        let remaining = self.remaining();
        let secs = remaining.as_secs() as u32;
        if remaining.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    pub fn expired(&self) -> bool {
        self.is_running() && self.remaining().is_zero()
    }

    pub fn reset(&mut self) {
        self.freeze();
    }
}
