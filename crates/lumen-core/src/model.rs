use serde::{Deserialize, Serialize};

/// One physical display as seen by a brightness backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayHandle {
    pub index: u8, // ddcutil display number or i2c bus, depending on backend
    pub mfg: Option<String>,
    pub model: Option<String>,
}

impl DisplayHandle {
    pub fn new(index: u8) -> Self {
        Self { index, mfg: None, model: None }
    }

    /// Human readable name used in log lines.
    pub fn label(&self) -> String {
        match (&self.mfg, &self.model) {
            (Some(mfg), Some(model)) => format!("{} {} (display {})", mfg, model, self.index),
            (None, Some(model)) => format!("{} (display {})", model, self.index),
            _ => format!("display {}", self.index),
        }
    }
}

/// Point-in-time view of the published values, read by the tray.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub light_level: Option<f64>, // lux
    pub brightness: Option<u8>,   // 0..100
    pub goal: Option<u8>,         // 0..100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_prefers_model_information() {
        let mut d = DisplayHandle::new(2);
        assert_eq!(d.label(), "display 2");
        d.model = Some("VG270U".into());
        assert_eq!(d.label(), "VG270U (display 2)");
        d.mfg = Some("ACR".into());
        assert_eq!(d.label(), "ACR VG270U (display 2)");
    }
}
