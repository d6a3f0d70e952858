//! Background loops: sampler + arbiter, actuator, and the status publisher.
//!
//! Every loop takes a `watch::Receiver<bool>` and exits once it flips to `true`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::actuator::{Actuator, StepOutcome};
use crate::arbiter::GoalArbiter;
use crate::model::StatusSnapshot;
use crate::ports::{BrightnessBackend, LightSource};
use crate::sampler::LightSampler;
use crate::shared::SharedState;

/// Loop periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub sample: Duration,
    pub step: Duration,
    pub status: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            sample: Duration::from_millis(500),
            step: Duration::from_millis(5),
            status: Duration::from_millis(500),
        }
    }
}

/// Sample the light level and feed the arbiter every `period`.
pub async fn run_sampler<S: LightSource>(
    mut sampler: LightSampler<S>,
    arbiter: GoalArbiter,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(?period, "sampler loop starting");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(desired) = sampler.sample_desired_brightness().await {
                    arbiter.maybe_update_goal(desired);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("sampler loop stopped");
}

/// Step the actuator every `period` while converging; park while idle.
pub async fn run_actuator<B: BrightnessBackend>(
    mut actuator: Actuator<B>,
    shared: Arc<SharedState>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(?period, "actuator loop starting");

    loop {
        if *shutdown.borrow() {
            break;
        }
        match actuator.step().await {
            StepOutcome::Stepped { .. } => {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = shutdown.changed() => break,
                }
            }
            StepOutcome::Idle => {
                tokio::select! {
                    _ = shared.goal_changed() => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    debug!(current = actuator.current(), "actuator loop stopped");
}

/// Push a snapshot of the shared state to `sink` every `period`.
pub async fn run_status<F>(
    shared: Arc<SharedState>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut sink: F,
) where
    F: FnMut(StatusSnapshot),
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snap = shared.snapshot();
                if last != Some(snap) {
                    sink(snap);
                    last = Some(snap);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
