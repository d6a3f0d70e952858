//! DDC/CI over `/dev/i2c-N`, without going through ddcutil.
//!
//! Needs read/write access to the i2c device nodes (usually the `i2c` group).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use i2cdev::core::I2CDevice;
use i2cdev::linux::LinuxI2CDevice;
use lumen_core::{BrightnessBackend, DisplayHandle};
use parking_lot::Mutex;
use tokio::sync::Mutex as BusMutex;
use tracing::{debug, info};

use crate::VCP_BRIGHTNESS;

const DDC_ADDR: u16 = 0x37;
const HOST_ADDR: u8 = 0x51;
/// Destination address byte folded into every checksum.
const DEST_ADDR: u8 = 0x6E;
const REPLY_DELAY: Duration = Duration::from_millis(50);

fn checksum(bytes: &[u8]) -> u8 {
    DEST_ADDR ^ bytes.iter().fold(0u8, |acc, &x| acc ^ x)
}

/// Get VCP request for `code`: [source, length, opcode, code, checksum].
pub fn get_vcp_request(code: u8) -> [u8; 5] {
    let body = [HOST_ADDR, 0x82, 0x01, code];
    [body[0], body[1], body[2], body[3], checksum(&body)]
}

/// Set VCP request for `code`: [source, length, opcode, code, hi, lo, checksum].
pub fn set_vcp_request(code: u8, value: u16) -> [u8; 7] {
    let [hi, lo] = value.to_be_bytes();
    let body = [HOST_ADDR, 0x84, 0x03, code, hi, lo];
    [body[0], body[1], body[2], body[3], body[4], body[5], checksum(&body)]
}

/// Parse a VCP feature reply.
///
/// Layout: [dest, length, opcode, result, code, type, max_hi, max_lo, cur_hi, cur_lo, checksum].
pub fn parse_vcp_reply(code: u8, reply: &[u8]) -> Result<u16> {
    if reply.len() < 10 {
        return Err(anyhow!("short DDC reply ({} bytes)", reply.len()));
    }
    if reply[2] != 0x02 {
        return Err(anyhow!("unexpected DDC reply opcode {:#04x}", reply[2]));
    }
    if reply[3] != 0x00 {
        return Err(anyhow!("monitor rejected VCP {:#04x} (result {:#04x})", code, reply[3]));
    }
    if reply[4] != code {
        return Err(anyhow!("DDC reply for VCP {:#04x}, expected {:#04x}", reply[4], code));
    }
    Ok(u16::from_be_bytes([reply[8], reply[9]]))
}

fn device_path(bus: u8) -> String {
    format!("/dev/i2c-{}", bus)
}

fn read_brightness(bus: u8) -> Result<u8> {
    let path = device_path(bus);
    let mut dev = LinuxI2CDevice::new(&path, DDC_ADDR)
        .with_context(|| format!("failed to open {}", path))?;
    dev.write(&get_vcp_request(VCP_BRIGHTNESS))
        .with_context(|| format!("failed to write DDC request to {}", path))?;
    thread::sleep(REPLY_DELAY);

    let mut reply = [0u8; 12];
    dev.read(&mut reply)
        .with_context(|| format!("failed to read DDC reply from {}", path))?;
    let value = parse_vcp_reply(VCP_BRIGHTNESS, &reply)?;
    u8::try_from(value).map_err(|_| anyhow!("brightness value {} out of range on {}", value, path))
}

fn write_brightness(bus: u8, value: u8) -> Result<()> {
    let path = device_path(bus);
    let mut dev = LinuxI2CDevice::new(&path, DDC_ADDR)
        .with_context(|| format!("failed to open {}", path))?;
    dev.write(&set_vcp_request(VCP_BRIGHTNESS, value as u16))
        .with_context(|| format!("failed to write DDC set request to {}", path))?;
    Ok(())
}

/// One lock per bus. A transfer holds its bus from start to finish, even
/// after the caller has stopped waiting for it.
#[derive(Debug, Clone, Default)]
struct BusLocks(Arc<Mutex<HashMap<u8, Arc<BusMutex<()>>>>>);

impl BusLocks {
    fn bus(&self, bus: u8) -> Arc<BusMutex<()>> {
        self.0.lock().entry(bus).or_default().clone()
    }

    /// Run `op` on the blocking pool once `bus` is free.
    async fn run<T, F>(&self, bus: u8, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let guard = self.bus(bus).lock_owned().await;
        Self::spawn(guard, op).await
    }

    /// Like `run`, but fail right away while an earlier transfer still holds `bus`.
    async fn try_run<T, F>(&self, bus: u8, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let guard = self
            .bus(bus)
            .try_lock_owned()
            .map_err(|_| anyhow!("{} busy with an earlier transfer", device_path(bus)))?;
        Self::spawn(guard, op).await
    }

    async fn spawn<T, F>(guard: tokio::sync::OwnedMutexGuard<()>, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            op()
        })
        .await
        .context("i2c task panicked")?
    }
}

/// Talks DDC/CI directly to the configured (or scanned) i2c buses.
#[derive(Debug, Clone)]
pub struct I2cBackend {
    buses: Option<Vec<u8>>,
    max_bus: u8,
    locks: BusLocks,
}

impl I2cBackend {
    /// Use exactly these buses, in this order.
    pub fn with_buses(buses: Vec<u8>) -> Self {
        Self {
            buses: Some(buses),
            max_bus: 0,
            locks: BusLocks::default(),
        }
    }

    /// Probe `/dev/i2c-0` through `/dev/i2c-{max_bus}` for DDC capable monitors.
    pub fn scan(max_bus: u8) -> Self {
        Self {
            buses: None,
            max_bus,
            locks: BusLocks::default(),
        }
    }

    fn discover(&self) -> Vec<DisplayHandle> {
        if let Some(buses) = &self.buses {
            return buses.iter().copied().map(DisplayHandle::new).collect();
        }
        (0..=self.max_bus)
            .filter(|bus| Path::new(&device_path(*bus)).exists())
            .filter(|bus| match read_brightness(*bus) {
                Ok(_) => true,
                Err(e) => {
                    debug!(bus, error = %format!("{e:#}"), "no DDC monitor on bus");
                    false
                }
            })
            .map(DisplayHandle::new)
            .collect()
    }
}

#[async_trait]
impl BrightnessBackend for I2cBackend {
    async fn list_displays(&self) -> Result<Vec<DisplayHandle>> {
        let this = self.clone();
        let displays = tokio::task::spawn_blocking(move || this.discover())
            .await
            .context("i2c discovery task panicked")?;
        info!(buses = ?displays.iter().map(|d| d.index).collect::<Vec<_>>(), "i2c displays");
        Ok(displays)
    }

    async fn get_brightness(&self, display: &DisplayHandle) -> Result<u8> {
        let bus = display.index;
        self.locks.run(bus, move || read_brightness(bus)).await
    }

    /// A bus still stuck in an earlier write fails this step instead of
    /// queueing another blocked write behind it.
    async fn set_brightness(&self, display: &DisplayHandle, value: u8) -> Result<()> {
        let bus = display.index;
        self.locks.try_run(bus, move || write_brightness(bus, value)).await
    }
}
