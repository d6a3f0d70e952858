//! Ambient light driven brightness control.
//!
//! A [`LightSampler`] turns lux readings into a desired brightness, the
//! [`GoalArbiter`] decides when that becomes the shared goal, and the
//! [`Actuator`] walks every display toward the goal one percent per step.
//! The three only meet through [`SharedState`].

pub mod actuator;
pub mod arbiter;
pub mod error;
pub mod mapping;
pub mod model;
pub mod ports;
pub mod runtime;
pub mod sampler;
pub mod shared;

pub use actuator::{next_step, Actuator, StepOutcome};
pub use arbiter::{evaluate, Decision, GoalArbiter, Hysteresis, Rule};
pub use error::ControlError;
pub use mapping::{LuxMapping, MAX_BRIGHTNESS};
pub use model::{DisplayHandle, StatusSnapshot};
pub use ports::{BrightnessBackend, LightSource};
pub use runtime::{run_actuator, run_sampler, run_status, Cadence};
pub use sampler::{LightSampler, MissingReading};
pub use shared::{GoalState, SharedState};
