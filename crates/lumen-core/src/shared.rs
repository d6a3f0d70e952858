//! State shared between the arbiter, the actuator and the tray.
//!
//! The goal and its timestamp sit behind one mutex so readers never see a goal
//! paired with a timestamp from a different adoption. The current brightness
//! has a single writer (the actuator) and is published through an atomic.

use std::sync::atomic::{AtomicU16, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::model::StatusSnapshot;

const UNSET: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoalState {
    pub goal: Option<u8>,
    pub last_change: Option<Instant>,
}

#[derive(Debug)]
pub struct SharedState {
    goal: Mutex<GoalState>,
    goal_changed: Notify,
    current: AtomicU16,
    light_level: Mutex<Option<f64>>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            goal: Mutex::new(GoalState::default()),
            goal_changed: Notify::new(),
            current: AtomicU16::new(UNSET),
            light_level: Mutex::new(None),
        }
    }

    pub fn goal_state(&self) -> GoalState {
        *self.goal.lock()
    }

    pub fn goal(&self) -> Option<u8> {
        self.goal.lock().goal
    }

    /// Current brightness as last written by the actuator, `None` before startup.
    pub fn current(&self) -> Option<u8> {
        match self.current.load(Ordering::Acquire) {
            UNSET => None,
            v => Some(v as u8),
        }
    }

    pub fn light_level(&self) -> Option<f64> {
        *self.light_level.lock()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            light_level: self.light_level(),
            brightness: self.current(),
            goal: self.goal(),
        }
    }

    pub fn publish_light_level(&self, lux: f64) {
        *self.light_level.lock() = Some(lux);
    }

    /// Swap in a new goal and stamp it. Only the arbiter calls this.
    pub(crate) fn adopt_goal(&self, goal: u8, now: Instant) {
        {
            let mut state = self.goal.lock();
            state.goal = Some(goal);
            state.last_change = Some(now);
        }
        self.goal_changed.notify_one();
    }

    /// Only the actuator calls this.
    pub(crate) fn set_current(&self, value: u8) {
        self.current.store(value as u16, Ordering::Release);
    }

    /// Resolves after the next goal adoption (or immediately if one happened
    /// since the last wait).
    pub(crate) async fn goal_changed(&self) {
        self.goal_changed.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        let s = SharedState::new();
        assert_eq!(s.goal_state(), GoalState::default());
        assert_eq!(s.current(), None);
        assert_eq!(s.snapshot(), StatusSnapshot::default());
    }

    #[test]
    fn adopt_updates_goal_and_timestamp_together() {
        let s = SharedState::new();
        let now = Instant::now();
        s.adopt_goal(42, now);
        let g = s.goal_state();
        assert_eq!(g.goal, Some(42));
        assert_eq!(g.last_change, Some(now));
    }

    #[test]
    fn snapshot_reflects_published_values() {
        let s = SharedState::new();
        s.set_current(0);
        s.publish_light_level(123.5);
        let snap = s.snapshot();
        assert_eq!(snap.brightness, Some(0));
        assert_eq!(snap.light_level, Some(123.5));
        assert_eq!(snap.goal, None);
    }

    #[tokio::test]
    async fn goal_change_wakes_waiter() {
        let s = std::sync::Arc::new(SharedState::new());
        let waiter = {
            let s = s.clone();
            tokio::spawn(async move { s.goal_changed().await })
        };
        tokio::task::yield_now().await;
        s.adopt_goal(10, Instant::now());
        waiter.await.unwrap();
    }
}
