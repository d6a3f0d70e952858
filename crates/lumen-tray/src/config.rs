use std::{
    fs,
    path::Path,
    time::Duration,
};

use anyhow::{bail, ensure, Context};
use lumen_core::{Cadence, Hysteresis, LuxMapping, MissingReading, MAX_BRIGHTNESS};
use lumen_influx::SeriesKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Log filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub influx: RawInflux,
    #[serde(default)]
    pub mapping: RawMapping,
    #[serde(default)]
    pub hysteresis: RawHysteresis,
    #[serde(default)]
    pub timing: RawTiming,
    #[serde(default)]
    pub displays: RawDisplays,
    #[serde(default)]
    pub tray: RawTray,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl RawConfig {
    /// Parse the config file at the specified path.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents =
            fs::read_to_string(path).context(format!("Failed to open config file at {:?}", path))?;
        toml::from_str(&contents).context("Failed to parse config file")
    }

    pub fn example() -> Self {
        Self {
            log_level: default_log_level(),
            influx: RawInflux {
                url: "http://192.168.0.22:8086".to_string(),
                org: "home".to_string(),
                token: Some("your-influxdb-api-token".to_string()),
                bucket: "Flat-Prod".to_string(),
                measurement: "ambient_light_level".to_string(),
                field: "intensity".to_string(),
                tag_key: "device".to_string(),
                tag_value: "living-room-1".to_string(),
                window_secs: 30,
                timeout_ms: 5000,
            },
            mapping: RawMapping::default(),
            hysteresis: RawHysteresis::default(),
            timing: RawTiming::default(),
            displays: RawDisplays::default(),
            tray: RawTray::default(),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawInflux {
    /// Base URL of the InfluxDB 2.x server.
    pub url: String,
    /// Organization the bucket belongs to.
    pub org: String,
    /// API token; may also be given on the command line or in `LUMEN_INFLUX_TOKEN`.
    pub token: Option<String>,
    pub bucket: String,
    pub measurement: String,
    pub field: String,
    /// Tag that selects the sensor, e.g. `device = "living-room-1"`.
    pub tag_key: String,
    pub tag_value: String,
    /// Trailing window searched for the latest reading.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_influx_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_window_secs() -> u64 {
    30
}

fn default_influx_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawMapping {
    /// Lux per brightness percent.
    pub lux_per_percent: f64,
    /// Added to every mapped value; keeps the screens from going fully dark.
    pub offset: u8,
    /// `zero` treats an empty window as darkness, `hold` keeps the last value.
    pub on_missing: MissingReading,
}

impl Default for RawMapping {
    fn default() -> Self {
        let m = LuxMapping::default();
        Self {
            lux_per_percent: m.lux_per_percent,
            offset: m.offset,
            on_missing: MissingReading::default(),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawHysteresis {
    pub drop_threshold: u8,
    pub rise_threshold: u8,
    pub stale_after_secs: u64,
}

impl Default for RawHysteresis {
    fn default() -> Self {
        let h = Hysteresis::default();
        Self {
            drop_threshold: h.drop_threshold,
            rise_threshold: h.rise_threshold,
            stale_after_secs: h.stale_after.as_secs(),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawTiming {
    pub sample_interval_ms: u64,
    pub step_interval_ms: u64,
    pub status_interval_ms: u64,
    /// Upper bound for a single display write before it counts as failed.
    pub write_timeout_ms: u64,
    /// Upper bound for display discovery and the startup brightness read.
    pub command_timeout_ms: u64,
}

impl Default for RawTiming {
    fn default() -> Self {
        let c = Cadence::default();
        Self {
            sample_interval_ms: c.sample.as_millis() as u64,
            step_interval_ms: c.step.as_millis() as u64,
            status_interval_ms: c.status.as_millis() as u64,
            write_timeout_ms: 1000,
            command_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Ddcutil,
    I2c,
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawDisplays {
    pub backend: BackendKind,
    /// i2c buses to drive; scanned when empty.
    pub buses: Vec<u8>,
    /// Highest bus number probed when scanning.
    pub max_bus: u8,
}

impl Default for RawDisplays {
    fn default() -> Self {
        Self {
            backend: BackendKind::Ddcutil,
            buses: Vec::new(),
            max_bus: 10,
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawTray {
    pub enabled: bool,
}

impl Default for RawTray {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug)]
pub struct Config {
    pub influx: Influx,
    pub mapping: LuxMapping,
    pub on_missing: MissingReading,
    pub hysteresis: Hysteresis,
    pub cadence: Cadence,
    pub write_timeout: Duration,
    pub command_timeout: Duration,
    pub displays: Displays,
    pub tray: bool,
    pub log_level: String,
}

#[derive(Debug)]
pub struct Influx {
    pub url: String,
    pub org: String,
    pub token: String,
    pub series: SeriesKey,
    pub window: Duration,
    pub timeout: Duration,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Displays {
    Ddcutil,
    I2c { buses: Vec<u8>, max_bus: u8 },
}

fn non_empty(name: &str, value: String) -> anyhow::Result<String> {
    ensure!(!value.trim().is_empty(), "{} must not be empty", name);
    Ok(value)
}

fn millis(name: &str, ms: u64) -> anyhow::Result<Duration> {
    ensure!(ms > 0, "{} must be greater than zero", name);
    Ok(Duration::from_millis(ms))
}

impl TryFrom<RawConfig> for Config {
    type Error = anyhow::Error;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let RawConfig {
            log_level,
            influx,
            mapping,
            hysteresis,
            timing,
            displays,
            tray,
        } = raw;

        let token = match influx.token {
            Some(token) => non_empty("influx.token", token)?,
            None => bail!(
                "influx.token is not set (use the config file, --influx-token or LUMEN_INFLUX_TOKEN)"
            ),
        };
        ensure!(influx.window_secs > 0, "influx.window_secs must be greater than zero");
        let influx = Influx {
            url: non_empty("influx.url", influx.url)?,
            org: non_empty("influx.org", influx.org)?,
            token,
            series: SeriesKey {
                bucket: non_empty("influx.bucket", influx.bucket)?,
                measurement: non_empty("influx.measurement", influx.measurement)?,
                field: non_empty("influx.field", influx.field)?,
                tag_key: non_empty("influx.tag_key", influx.tag_key)?,
                tag_value: influx.tag_value,
            },
            window: Duration::from_secs(influx.window_secs),
            timeout: millis("influx.timeout_ms", influx.timeout_ms)?,
        };

        ensure!(
            mapping.lux_per_percent.is_finite() && mapping.lux_per_percent > 0.0,
            "mapping.lux_per_percent must be a positive number"
        );
        ensure!(mapping.offset <= MAX_BRIGHTNESS, "mapping.offset must be at most 100");

        ensure!(hysteresis.drop_threshold >= 1, "hysteresis.drop_threshold must be at least 1");
        ensure!(hysteresis.rise_threshold >= 1, "hysteresis.rise_threshold must be at least 1");
        ensure!(hysteresis.stale_after_secs >= 1, "hysteresis.stale_after_secs must be at least 1");

        let displays = match displays.backend {
            BackendKind::Ddcutil => Displays::Ddcutil,
            BackendKind::I2c => Displays::I2c {
                buses: displays.buses,
                max_bus: displays.max_bus,
            },
        };

        Ok(Config {
            influx,
            mapping: LuxMapping {
                lux_per_percent: mapping.lux_per_percent,
                offset: mapping.offset,
            },
            on_missing: mapping.on_missing,
            hysteresis: Hysteresis {
                drop_threshold: hysteresis.drop_threshold,
                rise_threshold: hysteresis.rise_threshold,
                stale_after: Duration::from_secs(hysteresis.stale_after_secs),
            },
            cadence: Cadence {
                sample: millis("timing.sample_interval_ms", timing.sample_interval_ms)?,
                step: millis("timing.step_interval_ms", timing.step_interval_ms)?,
                status: millis("timing.status_interval_ms", timing.status_interval_ms)?,
            },
            write_timeout: millis("timing.write_timeout_ms", timing.write_timeout_ms)?,
            command_timeout: millis("timing.command_timeout_ms", timing.command_timeout_ms)?,
            displays,
            tray: tray.enabled,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[influx]
url = "http://localhost:8086"
org = "home"
token = "t0ken"
bucket = "sensors"
measurement = "ambient_light_level"
field = "intensity"
tag_key = "device"
tag_value = "office"
"#;

    #[test]
    fn example_round_trips_through_toml() {
        let text = toml::to_string(&RawConfig::example()).unwrap();
        let parsed: RawConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, RawConfig::example());
        let config: Config = parsed.try_into().unwrap();
        assert_eq!(config.influx.series.tag_value, "living-room-1");
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let raw: RawConfig = toml::from_str(MINIMAL).unwrap();
        let config: Config = raw.try_into().unwrap();
        assert_eq!(config.mapping, LuxMapping::default());
        assert_eq!(config.hysteresis, Hysteresis::default());
        assert_eq!(config.cadence, Cadence::default());
        assert_eq!(config.on_missing, MissingReading::Zero);
        assert_eq!(config.write_timeout, Duration::from_secs(1));
        assert_eq!(config.command_timeout, Duration::from_secs(10));
        assert_eq!(config.displays, Displays::Ddcutil);
        assert_eq!(config.influx.window, Duration::from_secs(30));
        assert!(config.tray);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn sections_override_defaults() {
        let text = format!(
            "{}{}",
            MINIMAL,
            r#"
[mapping]
offset = 0
on_missing = "hold"

[hysteresis]
rise_threshold = 8

[timing]
write_timeout_ms = 250
command_timeout_ms = 30000

[displays]
backend = "i2c"
buses = [3, 6]
"#
        );
        let config: Config = toml::from_str::<RawConfig>(&text).unwrap().try_into().unwrap();
        assert_eq!(config.mapping.offset, 0);
        assert_eq!(config.on_missing, MissingReading::Hold);
        assert_eq!(config.hysteresis.rise_threshold, 8);
        assert_eq!(config.hysteresis.drop_threshold, 3);
        assert_eq!(config.write_timeout, Duration::from_millis(250));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.displays, Displays::I2c { buses: vec![3, 6], max_bus: 10 });
    }

    #[test]
    fn missing_token_is_rejected() {
        let mut raw: RawConfig = toml::from_str(MINIMAL).unwrap();
        raw.influx.token = None;
        let err = Config::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("influx.token"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut raw: RawConfig = toml::from_str(MINIMAL).unwrap();
        raw.mapping.lux_per_percent = 0.0;
        assert!(Config::try_from(raw).is_err());

        let mut raw: RawConfig = toml::from_str(MINIMAL).unwrap();
        raw.mapping.offset = 101;
        assert!(Config::try_from(raw).is_err());

        let mut raw: RawConfig = toml::from_str(MINIMAL).unwrap();
        raw.timing.step_interval_ms = 0;
        assert!(Config::try_from(raw).is_err());

        let mut raw: RawConfig = toml::from_str(MINIMAL).unwrap();
        raw.timing.command_timeout_ms = 0;
        assert!(Config::try_from(raw).is_err());

        let mut raw: RawConfig = toml::from_str(MINIMAL).unwrap();
        raw.hysteresis.drop_threshold = 0;
        assert!(Config::try_from(raw).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = format!("{}\n[mapping]\ngain = 2\n", MINIMAL);
        assert!(toml::from_str::<RawConfig>(&text).is_err());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let raw = RawConfig::load(file.path()).unwrap();
        assert_eq!(raw.influx.org, "home");

        assert!(RawConfig::load(Path::new("/nonexistent/lumen.toml")).is_err());
    }
}
