//! Brightness actuator: walks the displays toward the goal one percent at a time.
//!
//! The actuator owns the current brightness. Each step moves it by exactly one
//! unit and writes the new absolute value to every display. A display that
//! fails or times out is logged and skipped for that step; the step still
//! counts.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::error::ControlError;
use crate::mapping::MAX_BRIGHTNESS;
use crate::model::DisplayHandle;
use crate::ports::BrightnessBackend;
use crate::shared::SharedState;

/// Next value on the way from `current` to `goal`, `None` once there.
pub fn next_step(current: u8, goal: u8) -> Option<u8> {
    match goal.cmp(&current) {
        std::cmp::Ordering::Greater => Some(current + 1),
        std::cmp::Ordering::Less => Some(current - 1),
        std::cmp::Ordering::Equal => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Current brightness equals the goal, or no goal is set.
    Idle,
    Stepped {
        from: u8,
        to: u8,
        /// Displays whose write failed during this step.
        failed: Vec<u8>,
    },
}

pub struct Actuator<B> {
    backend: Arc<B>,
    displays: Vec<DisplayHandle>,
    shared: Arc<SharedState>,
    write_timeout: Duration,
    current: u8,
}

impl<B: BrightnessBackend> Actuator<B> {
    /// Discover the displays and read the starting brightness from the first one.
    ///
    /// Both steps are fatal on failure: without them there is no starting state.
    pub async fn start(
        backend: Arc<B>,
        shared: Arc<SharedState>,
        write_timeout: Duration,
    ) -> Result<Self, ControlError> {
        let displays = backend.list_displays().await.map_err(ControlError::Discovery)?;
        let first = displays.first().ok_or(ControlError::NoDisplays)?;

        let value = backend
            .get_brightness(first)
            .await
            .map_err(|source| ControlError::InitialRead {
                display: first.label(),
                source,
            })?;
        if value > MAX_BRIGHTNESS {
            warn!(
                display = %first.label(),
                value,
                "display reported brightness above 100, clamping"
            );
        }
        let current = value.min(MAX_BRIGHTNESS);

        info!(
            displays = displays.len(),
            current,
            "brightness actuator started: {}",
            displays.iter().map(DisplayHandle::label).collect::<Vec<_>>().join(", ")
        );
        shared.set_current(current);

        Ok(Self {
            backend,
            displays,
            shared,
            write_timeout,
            current,
        })
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn displays(&self) -> &[DisplayHandle] {
        &self.displays
    }

    /// Move one unit toward the goal and fan the new value out to every display.
    pub async fn step(&mut self) -> StepOutcome {
        let Some(goal) = self.shared.goal() else {
            return StepOutcome::Idle;
        };
        let Some(next) = next_step(self.current, goal) else {
            return StepOutcome::Idle;
        };

        let from = self.current;
        self.current = next;
        let failed = self.write_all(next).await;
        self.shared.set_current(next);
        debug!(brightness = next, goal, "setting brightness to {}%", next);

        StepOutcome::Stepped { from, to: next, failed }
    }

    async fn write_all(&self, value: u8) -> Vec<u8> {
        let writes = self.displays.iter().map(|handle| async move {
            let write = self.backend.set_brightness(handle, value);
            match tokio::time::timeout(self.write_timeout, write).await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    warn!(
                        display = %handle.label(),
                        value,
                        error = %format!("{e:#}"),
                        "brightness write failed"
                    );
                    Some(handle.index)
                }
                Err(_) => {
                    warn!(
                        display = %handle.label(),
                        value,
                        timeout = ?self.write_timeout,
                        "brightness write timed out"
                    );
                    Some(handle.index)
                }
            }
        });
        join_all(writes).await.into_iter().flatten().collect()
    }
}
