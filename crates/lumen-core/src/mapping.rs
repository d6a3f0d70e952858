//! Lux to brightness conversion.
//!
//! The quotient `lux / lux_per_percent` is clamped to 0..=100, the offset is
//! added, and the sum is clamped to 100 again. With the defaults a pitch dark
//! room still yields 5% and 475 lux is the first reading that reaches 100%.

use serde::{Deserialize, Serialize};

pub const MAX_BRIGHTNESS: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LuxMapping {
    /// Lux per brightness percent.
    pub lux_per_percent: f64,
    /// Added after the first clamp so the displays never go fully dark.
    pub offset: u8,
}

impl Default for LuxMapping {
    fn default() -> Self {
        Self {
            lux_per_percent: 5.0,
            offset: 5,
        }
    }
}

impl LuxMapping {
    pub fn to_brightness(&self, lux: f64) -> u8 {
        let scaled = lux / self.lux_per_percent;
        // NaN and negative readings land on 0 before the offset.
        let base = if scaled.is_nan() || scaled <= 0.0 {
            0
        } else {
            scaled.trunc().min(MAX_BRIGHTNESS as f64) as u8
        };
        base.saturating_add(self.offset).min(MAX_BRIGHTNESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn darkness_maps_to_offset() {
        let m = LuxMapping::default();
        assert_eq!(m.to_brightness(0.0), 5);
        assert_eq!(m.to_brightness(4.9), 5);
        assert_eq!(m.to_brightness(-12.0), 5);
    }

    #[test]
    fn linear_region_truncates() {
        let m = LuxMapping::default();
        assert_eq!(m.to_brightness(250.0), 55);
        assert_eq!(m.to_brightness(254.9), 55);
        assert_eq!(m.to_brightness(255.0), 56);
    }

    #[test]
    fn upper_boundary_after_offset() {
        let m = LuxMapping::default();
        assert_eq!(m.to_brightness(470.0), 99);
        assert_eq!(m.to_brightness(474.9), 99);
        assert_eq!(m.to_brightness(475.0), 100);
        assert_eq!(m.to_brightness(600.0), 100);
        assert_eq!(m.to_brightness(1000.0), 100);
    }

    #[test]
    fn output_stays_in_range() {
        let m = LuxMapping::default();
        for lux in (0..5000).step_by(7) {
            let b = m.to_brightness(lux as f64);
            assert!((5..=100).contains(&b), "lux {} gave {}", lux, b);
        }
        assert_eq!(m.to_brightness(f64::NAN), 5);
        assert_eq!(m.to_brightness(f64::INFINITY), 100);
    }

    #[test]
    fn custom_mapping() {
        let m = LuxMapping {
            lux_per_percent: 2.0,
            offset: 0,
        };
        assert_eq!(m.to_brightness(0.0), 0);
        assert_eq!(m.to_brightness(100.0), 50);
        assert_eq!(m.to_brightness(500.0), 100);
    }
}
