//! Seams to the outside world: the light sensor store and the display hardware.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::DisplayHandle;

/// Source of ambient light readings.
#[async_trait]
pub trait LightSource: Send + Sync {
    /// Most recent lux value inside the configured trailing window.
    ///
    /// `Ok(None)` means the query succeeded but the window held no samples.
    async fn latest_lux(&self) -> Result<Option<f64>>;
}

/// Get/set access to the brightness register of attached displays.
#[async_trait]
pub trait BrightnessBackend: Send + Sync {
    async fn list_displays(&self) -> Result<Vec<DisplayHandle>>;

    async fn get_brightness(&self, display: &DisplayHandle) -> Result<u8>;

    async fn set_brightness(&self, display: &DisplayHandle, value: u8) -> Result<()>;
}
