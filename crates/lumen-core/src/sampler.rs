//! Light sampler: turns the latest lux reading into a desired brightness.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::mapping::LuxMapping;
use crate::ports::LightSource;
use crate::shared::SharedState;

/// What to do when the trailing window holds no sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingReading {
    /// Treat the window as 0 lux.
    #[default]
    Zero,
    /// Keep the previous desired brightness.
    Hold,
}

pub struct LightSampler<S> {
    source: S,
    mapping: LuxMapping,
    on_missing: MissingReading,
    shared: Arc<SharedState>,
    last_desired: Option<u8>,
}

impl<S: LightSource> LightSampler<S> {
    pub fn new(
        source: S,
        mapping: LuxMapping,
        on_missing: MissingReading,
        shared: Arc<SharedState>,
    ) -> Self {
        Self {
            source,
            mapping,
            on_missing,
            shared,
            last_desired: None,
        }
    }

    /// Query the source once and return the desired brightness.
    ///
    /// Query errors are logged and answered with the previous value, `None`
    /// if nothing has been sampled yet.
    pub async fn sample_desired_brightness(&mut self) -> Option<u8> {
        let lux = match self.source.latest_lux().await {
            Ok(Some(lux)) => lux,
            Ok(None) => match self.on_missing {
                MissingReading::Zero => {
                    debug!("no light reading in window, assuming darkness");
                    0.0
                }
                MissingReading::Hold => {
                    debug!(last = ?self.last_desired, "no light reading in window, holding");
                    return self.last_desired;
                }
            },
            Err(e) => {
                warn!(
                    error = %format!("{e:#}"),
                    last = ?self.last_desired,
                    "light level query failed"
                );
                return self.last_desired;
            }
        };

        self.shared.publish_light_level(lux);
        let desired = self.mapping.to_brightness(lux);
        debug!(lux, desired, "sampled light level");
        self.last_desired = Some(desired);
        Some(desired)
    }
}
