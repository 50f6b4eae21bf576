//! Cancellable timer interface.
//!
//! The engine never sleeps. It asks a [`TimerScheduler`] for a token, keeps
//! at most one active timer, and expects the host to call
//! `GameSession::handle_timer` with that token once the deadline passes.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fixed pause between a resolved vote and whatever comes next
pub const RESOLUTION_DELAY: Duration = Duration::from_millis(2000);

/// Opaque handle identifying one scheduled timer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimerToken(pub u64);

/// Which phase deadline a timer represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Turn holder has not revealed yet
    RevealTimeout,
    /// Discussion after a reveal
    RevealDiscussion,
    /// Discussion before voting opens
    PreVote,
    /// Special-condition window after all votes are in
    PostVote,
    /// Auto-advance after a resolved vote
    Resolution,
}

/// The one timer a session may have running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTimer {
    pub kind: TimerKind,
    pub ends_at_ms: u64,
    #[serde(skip)]
    pub token: TimerToken,
}

/// Host-provided clock and timer facility
pub trait TimerScheduler {
    /// Milliseconds on the host clock
    fn now_ms(&self) -> u64;

    /// Arrange for `kind` to fire after `delay`
    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerToken;

    /// Cancel a pending timer. Unknown tokens are ignored.
    fn cancel(&mut self, token: TimerToken);
}

#[derive(Debug, Default)]
struct ManualInner {
    now_ms: u64,
    next_token: u64,
    pending: Vec<(TimerToken, TimerKind, u64)>,
}

/// Virtual-time scheduler. Clones share the same clock, so a test can keep
/// one handle while the session owns another.
#[derive(Debug, Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut ManualInner) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Move the clock forward and return the timers that came due, in
    /// deadline order
    pub fn advance(&self, by: Duration) -> Vec<TimerToken> {
        self.with(|inner| {
            inner.now_ms += by.as_millis() as u64;
            let now = inner.now_ms;
            let mut due: Vec<_> = inner.pending.iter().filter(|(_, _, at)| *at <= now).copied().collect();
            inner.pending.retain(|(_, _, at)| *at > now);
            due.sort_by_key(|(token, _, at)| (*at, *token));
            due.into_iter().map(|(token, _, _)| token).collect()
        })
    }

    /// Timers still waiting to fire
    pub fn pending(&self) -> Vec<(TimerToken, TimerKind)> {
        self.with(|inner| inner.pending.iter().map(|(t, k, _)| (*t, *k)).collect())
    }
}

impl TimerScheduler for ManualScheduler {
    fn now_ms(&self) -> u64 {
        self.with(|inner| inner.now_ms)
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerToken {
        self.with(|inner| {
            inner.next_token += 1;
            let token = TimerToken(inner.next_token);
            let at = inner.now_ms + delay.as_millis() as u64;
            inner.pending.push((token, kind, at));
            token
        })
    }

    fn cancel(&mut self, token: TimerToken) {
        self.with(|inner| inner.pending.retain(|(t, _, _)| *t != token));
    }
}
