use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use lumen_core::{BrightnessBackend, DisplayHandle};
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

lazy_static! {
    static ref DISPLAY_RE: Regex = Regex::new(r"^Display\s+(\d+)").unwrap();
    static ref INVALID_RE: Regex = Regex::new(r"^Invalid display").unwrap();
    // "Mfg: XXX Model: YYY" (older ddcutil) or "Monitor: MFG:Model:Serial" (terse)
    static ref MFG_MODEL_RE: Regex = Regex::new(r"Mfg:\s*([^\s]+)\s+Model:\s*(.+)$").unwrap();
    static ref MONITOR_RE: Regex = Regex::new(r"^\s*Monitor:\s*([^:]*):([^:]*):").unwrap();
    static ref CURRENT_RE: Regex = Regex::new(r"current value =\s*(\d+)").unwrap();
}

/// Drives monitors through the `ddcutil` command line tool.
///
/// `detect` and `getvcp` run under `command_timeout`; `setvcp` under the
/// shorter `write_timeout`.
#[derive(Debug, Clone)]
pub struct DdcutilBackend {
    program: PathBuf,
    command_timeout: Duration,
    write_timeout: Duration,
}

impl DdcutilBackend {
    /// Locate `ddcutil` on `PATH`.
    pub fn new(command_timeout: Duration, write_timeout: Duration) -> Result<Self> {
        let program = which::which("ddcutil")
            .context("ddcutil not found in PATH; install ddcutil or use the i2c backend")?;
        Ok(Self::with_program(program, command_timeout, write_timeout))
    }

    pub fn with_program(
        program: impl Into<PathBuf>,
        command_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            command_timeout,
            write_timeout,
        }
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        debug!(program = %self.program.display(), ?args, "running ddcutil");

        let out = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("ddcutil {} timed out after {:?}", args.join(" "), timeout))?
            .context("failed to run ddcutil")?;
        if !out.status.success() {
            return Err(anyhow!(
                "ddcutil {} failed: status {:?}: {}",
                args.join(" "),
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

#[async_trait]
impl BrightnessBackend for DdcutilBackend {
    async fn list_displays(&self) -> Result<Vec<DisplayHandle>> {
        let out = self
            .run(&["detect".into(), "--terse".into()], self.command_timeout)
            .await?;
        Ok(parse_detect(&out))
    }

    async fn get_brightness(&self, display: &DisplayHandle) -> Result<u8> {
        let args = ["getvcp".into(), "0x10".into(), "--display".into(), display.index.to_string()];
        let out = self.run(&args, self.command_timeout).await?;
        parse_current_value(&out)
    }

    async fn set_brightness(&self, display: &DisplayHandle, value: u8) -> Result<()> {
        let args = [
            "setvcp".into(),
            "0x10".into(),
            value.to_string(),
            "--display".into(),
            display.index.to_string(),
        ];
        self.run(&args, self.write_timeout).await?;
        Ok(())
    }
}

/// Parse `ddcutil detect --terse`, skipping displays without DDC support.
pub fn parse_detect(output: &str) -> Vec<DisplayHandle> {
    let mut res = Vec::new();
    let mut cur: Option<DisplayHandle> = None;
    let mut in_invalid = false;

    for line in output.lines() {
        if let Some(c) = DISPLAY_RE.captures(line) {
            if let Some(d) = cur.take() {
                res.push(d);
            }
            in_invalid = false;
            if let Ok(idx) = c[1].parse() {
                cur = Some(DisplayHandle::new(idx));
            }
            continue;
        }
        if INVALID_RE.is_match(line) {
            if let Some(d) = cur.take() {
                res.push(d);
            }
            in_invalid = true;
            continue;
        }
        if in_invalid {
            continue;
        }
        let Some(d) = cur.as_mut() else { continue };
        if let Some(c) = MONITOR_RE.captures(line).or_else(|| MFG_MODEL_RE.captures(line)) {
            d.mfg = non_empty(&c[1]);
            d.model = non_empty(&c[2]);
        }
    }
    if let Some(d) = cur.take() {
        res.push(d);
    }
    res
}

/// Parse `ddcutil getvcp 0x10` output, e.g.
/// `VCP code 0x10 (Brightness): current value =    50, max value =   100`.
pub fn parse_current_value(output: &str) -> Result<u8> {
    let caps = CURRENT_RE
        .captures(output)
        .ok_or_else(|| anyhow!("failed to parse ddcutil output: {}", output.trim()))?;
    let value: u16 = caps[1].parse().context("brightness value out of range")?;
    u8::try_from(value).map_err(|_| anyhow!("brightness value {} out of range", value))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
