//! Goal arbiter: decides when a freshly sampled brightness becomes the goal.
//!
//! Rules, first match wins:
//! 1. no goal has been adopted yet
//! 2. the delta to the current brightness reaches the drop or rise threshold
//! 3. the last adoption is older than `stale_after` and current != desired
//!
//! Deltas inside the band are ignored. Rule 3 bounds how long the band can
//! hold back a pending change.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::mapping::MAX_BRIGHTNESS;
use crate::shared::{GoalState, SharedState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hysteresis {
    /// Adopt when desired is at least this far below current.
    pub drop_threshold: u8,
    /// Adopt when desired is at least this far above current.
    pub rise_threshold: u8,
    /// Force adoption once the goal has been left alone this long.
    pub stale_after: Duration,
}

impl Default for Hysteresis {
    fn default() -> Self {
        Self {
            drop_threshold: 3,
            rise_threshold: 5,
            stale_after: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    NoGoal,
    LargeDelta,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Adopt(Rule),
    Hold,
}

/// Evaluate the rule set.
///
/// `since_change` is `None` when no goal was ever adopted. `current` is `None`
/// until the actuator has read the hardware; only rule 1 can fire before that.
pub fn evaluate(
    hysteresis: &Hysteresis,
    goal: Option<u8>,
    current: Option<u8>,
    desired: u8,
    since_change: Option<Duration>,
) -> Decision {
    if goal.is_none() {
        return Decision::Adopt(Rule::NoGoal);
    }
    let Some(current) = current else {
        return Decision::Hold;
    };

    let delta = desired as i16 - current as i16;
    if delta <= -(hysteresis.drop_threshold as i16) || delta >= hysteresis.rise_threshold as i16 {
        return Decision::Adopt(Rule::LargeDelta);
    }

    let stale = since_change.map_or(true, |elapsed| elapsed > hysteresis.stale_after);
    if stale && current != desired {
        return Decision::Adopt(Rule::Stale);
    }

    Decision::Hold
}

pub struct GoalArbiter {
    hysteresis: Hysteresis,
    shared: Arc<SharedState>,
}

impl GoalArbiter {
    pub fn new(hysteresis: Hysteresis, shared: Arc<SharedState>) -> Self {
        Self { hysteresis, shared }
    }

    /// Evaluate `desired` against the shared state and adopt it if a rule fires.
    pub fn maybe_update_goal(&self, desired: u8) -> Decision {
        self.maybe_update_goal_at(desired, Instant::now())
    }

    pub fn maybe_update_goal_at(&self, desired: u8, now: Instant) -> Decision {
        let desired = desired.min(MAX_BRIGHTNESS);
        let GoalState { goal, last_change } = self.shared.goal_state();
        let current = self.shared.current();
        let since_change = last_change.map(|t| now.saturating_duration_since(t));

        let decision = evaluate(&self.hysteresis, goal, current, desired, since_change);
        match decision {
            Decision::Adopt(rule) => {
                if rule == Rule::Stale {
                    info!(
                        desired,
                        ?current,
                        "brightness change wanted for longer than {:?}",
                        self.hysteresis.stale_after
                    );
                }
                if goal != Some(desired) {
                    info!(?rule, from = ?goal, to = desired, ?current, "brightness goal updated");
                } else {
                    debug!(?rule, goal = desired, "brightness goal re-adopted");
                }
                self.shared.adopt_goal(desired, now);
            }
            Decision::Hold => {
                debug!(desired, ?goal, ?current, "desired brightness inside hysteresis band");
            }
        }
        decision
    }
}
