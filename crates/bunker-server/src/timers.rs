//! Real-time timers and session notifications for a room.
//!
//! A session talks to its room through one unbounded channel: state changes,
//! feed events and fired timers all arrive as [`RoomSignal`]s and are
//! handled in order by the room's driver task.

use bunker_core::{GameEvent, SessionObserver, TimerKind, TimerScheduler, TimerToken};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

/// What a room's driver task reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomSignal {
    StateChanged,
    Event(GameEvent),
    TimerFired(TimerToken),
}

/// Forwards session notifications to the room's driver.
pub struct ChannelObserver {
    tx: UnboundedSender<RoomSignal>,
}

impl ChannelObserver {
    pub fn new(tx: UnboundedSender<RoomSignal>) -> Self {
        Self { tx }
    }
}

impl SessionObserver for ChannelObserver {
    fn on_state_change(&mut self) {
        let _ = self.tx.send(RoomSignal::StateChanged);
    }

    fn on_event(&mut self, event: &GameEvent) {
        let _ = self.tx.send(RoomSignal::Event(event.clone()));
    }
}

/// Timer scheduler backed by tokio sleeps. Must be used inside a runtime.
pub struct TokioTimers {
    tx: UnboundedSender<RoomSignal>,
    next_token: u64,
    tasks: HashMap<TimerToken, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new(tx: UnboundedSender<RoomSignal>) -> Self {
        Self {
            tx,
            next_token: 0,
            tasks: HashMap::new(),
        }
    }
}

impl TimerScheduler for TokioTimers {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerToken {
        self.tasks.retain(|_, task| !task.is_finished());
        self.next_token += 1;
        let token = TimerToken(self.next_token);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(?kind, token = token.0, "timer fired");
            let _ = tx.send(RoomSignal::TimerFired(token));
        });
        self.tasks.insert(token, task);
        token
    }

    fn cancel(&mut self, token: TimerToken) {
        if let Some(task) = self.tasks.remove(&token) {
            task.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}
