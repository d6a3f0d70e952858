//! Brightness backends speaking DDC/CI to external monitors.

pub mod ddcutil;
#[cfg(target_os = "linux")]
pub mod i2c;

/// VCP feature code for luminance.
pub const VCP_BRIGHTNESS: u8 = 0x10;

pub use ddcutil::DdcutilBackend;
#[cfg(target_os = "linux")]
pub use i2c::I2cBackend;
