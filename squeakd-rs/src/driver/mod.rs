/* Driver framework: DeviceDriver trait, DeviceIo hidraw helpers, the
 * context-scoped driver registry, and shared driver error types used by all
 * protocol implementations. */
pub mod marsgaming;
pub mod testdrv;

use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::libc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::device::DeviceInfo;

/* Domain-specific error variants for all driver I/O operations.
 * Explicit variants instead of opaque strings let the daemon take
 * structured recovery actions (resync on Timeout, discard on NoDevice). */
#[derive(Debug, Error)]
pub enum DriverError {
    /* The hardware behind the node does not speak this protocol. The
     * device is silently skipped, not an error worth a resync. */
    #[error("no supported device on this node")]
    NoDevice,

    #[error("I/O failure on {device}: {source}")]
    Io {
        device: String,
        #[source]
        source: std::io::Error,
    },

    #[error("feature report ioctl failed: {0}")]
    IoctlFailed(std::io::Error),

    #[error("hardware timed out after {attempts} attempt(s)")]
    Timeout { attempts: u8 },

    #[error("invalid buffer size: expected at least {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
}

/* Total time budget for each attempt's read loop.
 *
 * Mice multiplex protocol responses with normal input reports on the same
 * hidraw node and may emit dozens of input reports per millisecond, so a
 * count-based loop is insufficient. The time-based loop keeps reading and
 * discarding non-matching reports until the deadline expires or the
 * matcher accepts one. */
const READ_TIMEOUT_PER_ATTEMPT: Duration = Duration::from_millis(2000);

/* Timeout for each individual read within the loop. */
const SINGLE_READ_TIMEOUT: Duration = Duration::from_millis(500);

/* Compute the `HIDIOCGFEATURE(len)` ioctl request number.
 * Linux hidraw.h: `_IOC(_IOC_READ|_IOC_WRITE, 'H', 0x07, len)`. */
fn hid_get_feature_req(len: usize) -> libc::c_ulong {
    let ioc_readwrite: libc::c_ulong = 3;
    let ioc_type: libc::c_ulong = b'H' as libc::c_ulong;
    let ioc_nr: libc::c_ulong = 0x07;
    (ioc_readwrite << 30) | (ioc_type << 8) | ioc_nr | ((len as libc::c_ulong) << 16)
}

/* Compute the `HIDIOCSFEATURE(len)` ioctl request number.
 * Linux hidraw.h: `_IOC(_IOC_READ|_IOC_WRITE, 'H', 0x06, len)`. */
fn hid_set_feature_req(len: usize) -> libc::c_ulong {
    let ioc_readwrite: libc::c_ulong = 3;
    let ioc_type: libc::c_ulong = b'H' as libc::c_ulong;
    let ioc_nr: libc::c_ulong = 0x06;
    (ioc_readwrite << 30) | (ioc_type << 8) | ioc_nr | ((len as libc::c_ulong) << 16)
}

/* Access to a `/dev/hidraw` node.
 *
 * The node is opened per transaction (open, transfer, close), never held
 * open: wire traffic is confined to the rare probe/commit/refresh paths,
 * and not holding the descriptor means drivers targeting different reports
 * on the same node need no shared open state. All hardware I/O goes
 * through this struct so drivers never touch file handles directly. */
pub struct DeviceIo {
    devnode: PathBuf,
}

impl DeviceIo {
    pub fn new(devnode: impl Into<PathBuf>) -> Self {
        Self {
            devnode: devnode.into(),
        }
    }

    pub fn devnode(&self) -> &Path {
        &self.devnode
    }

    async fn open(&self) -> Result<tokio::fs::File> {
        tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.devnode)
            .await
            .with_context(|| format!("Failed to open hidraw device {}", self.devnode.display()))
    }

    /* Write a single raw HID report. */
    pub async fn write_report(&self, buf: &[u8]) -> Result<()> {
        let mut file = self.open().await?;
        file.write_all(buf)
            .await
            .with_context(|| format!("Write failed on {}", self.devnode.display()))?;
        trace!("TX {} bytes: {:02x?}", buf.len(), buf);
        Ok(())
    }

    /* Read a single raw HID report (blocks until data arrives). */
    pub async fn read_report(&self, buf: &mut [u8]) -> Result<usize> {
        let mut file = self.open().await?;
        let n = file
            .read(buf)
            .await
            .with_context(|| format!("Read failed on {}", self.devnode.display()))?;
        trace!("RX {} bytes: {:02x?}", n, &buf[..n]);
        Ok(n)
    }

    /* Get a HID feature report using the `HIDIOCGFEATURE` ioctl.
     * `buf[0]` must contain the report ID before calling; the kernel fills
     * the remaining bytes and returns the total number written. */
    pub fn get_feature_report(&self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.devnode)
            .map_err(|e| DriverError::Io {
                device: self.devnode.display().to_string(),
                source: e,
            })?;
        let fd = file.as_raw_fd();
        let req = hid_get_feature_req(buf.len());

        /* SAFETY: `fd` is a valid open file descriptor for the lifetime of
         * this call. `buf` is a live mutable slice and its length is
         * encoded into `req` via the ioctl macro, so the kernel writes at
         * most `buf.len()` bytes. */
        let res = unsafe { libc::ioctl(fd, req, buf.as_mut_ptr()) };

        if res < 0 {
            return Err(DriverError::IoctlFailed(std::io::Error::last_os_error()));
        }

        let n = res as usize;
        trace!("GET_FEATURE {} bytes: {:02x?}", n, &buf[..n]);
        Ok(n)
    }

    /* Set a HID feature report using the `HIDIOCSFEATURE` ioctl.
     * `buf[0]` must contain the report ID. */
    pub fn set_feature_report(&self, buf: &[u8]) -> Result<usize, DriverError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.devnode)
            .map_err(|e| DriverError::Io {
                device: self.devnode.display().to_string(),
                source: e,
            })?;
        let fd = file.as_raw_fd();
        let req = hid_set_feature_req(buf.len());

        /* SAFETY: `fd` is a valid open file descriptor for the lifetime of
         * this call. `buf` is a live immutable slice and its length is
         * encoded into `req` via the ioctl macro. The kernel reads exactly
         * `buf.len()` bytes. */
        let res = unsafe { libc::ioctl(fd, req, buf.as_ptr()) };

        if res < 0 {
            return Err(DriverError::IoctlFailed(std::io::Error::last_os_error()));
        }

        let n = res as usize;
        trace!("SET_FEATURE {} bytes: {:02x?}", n, &buf[..n]);
        Ok(n)
    }

    /* Send a report and wait for a matching response within a single
     * open/close transaction.
     *
     * The `matcher` closure receives each incoming report and returns
     * `Some(T)` when the expected response has arrived, or `None` to keep
     * waiting. The read loop is time-based, not count-based; non-matching
     * reports (input noise) are simply handed to the matcher and
     * discarded when it declines them. */
    pub async fn request<T, F>(
        &self,
        report: &[u8],
        report_size: usize,
        max_attempts: u8,
        mut matcher: F,
    ) -> Result<T>
    where
        F: FnMut(&[u8]) -> Option<T>,
    {
        let mut file = self.open().await?;

        for attempt in 1..=max_attempts {
            file.write_all(report)
                .await
                .with_context(|| format!("Write failed on {}", self.devnode.display()))?;
            trace!("TX {} bytes: {:02x?}", report.len(), report);

            let deadline = tokio::time::Instant::now() + READ_TIMEOUT_PER_ATTEMPT;
            let mut buf = vec![0u8; report_size];

            loop {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    debug!("Read deadline expired on attempt {attempt}");
                    break;
                }

                /* The shorter of the remaining budget and the per-read
                 * timeout, so a silent device cannot pin a single read. */
                let read_timeout = remaining.min(SINGLE_READ_TIMEOUT);

                match tokio::time::timeout(read_timeout, file.read(&mut buf)).await {
                    Ok(Ok(n)) => {
                        trace!("RX {} bytes: {:02x?}", n, &buf[..n]);
                        if let Some(result) = matcher(&buf[..n]) {
                            return Ok(result);
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Read error on attempt {attempt}: {e}");
                        break;
                    }
                    Err(_elapsed) => {
                        /* No more data coming; retry with a fresh write. */
                        debug!("Timeout on attempt {attempt}");
                        break;
                    }
                }
            }
        }

        Err(DriverError::Timeout {
            attempts: max_attempts,
        }
        .into())
    }
}

/* The universal driver interface for all hardware protocols. The daemon
 * calls these methods from the device actor loop only, so a driver never
 * sees concurrent calls. */
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /* Driver name for logging purposes. */
    fn name(&self) -> &str;

    /* Confirm the hardware speaks this protocol and populate the full
     * object graph (profiles, resolutions, buttons, LEDs) from the wire,
     * leaving every dirty flag false. Fails with `DriverError::NoDevice`
     * when the hardware does not match. */
    async fn probe(&mut self, io: &DeviceIo, info: &mut DeviceInfo) -> Result<()>;

    /* Write the modified state back to hardware, walking only the dirty
     * subtree, in the order rate, resolutions, buttons, LEDs. The commit
     * scheduler clears the dirty flags afterwards and issues
     * `set_active_profile` for a pending active transition. */
    async fn commit(&mut self, io: &DeviceIo, info: &mut DeviceInfo) -> Result<()>;

    /* Mark a previously written profile as active on the device. Invoked
     * by the commit scheduler only when a profile carries the
     * active-transition flag; a driver whose devices can switch profiles
     * must override this. */
    async fn set_active_profile(&mut self, _io: &DeviceIo, _index: u32) -> Result<()> {
        anyhow::bail!("active-profile transition requested but the driver provides no callback")
    }

    /* Re-read the active resolution from hardware and update the
     * in-memory `is_active` flags. Returns true if state changed. Called
     * every poll tick; drivers without the hook inherit this no-op. */
    async fn refresh_active_resolution(
        &mut self,
        _io: &DeviceIo,
        _info: &mut DeviceInfo,
    ) -> Result<bool> {
        Ok(false)
    }

    /* Teardown hook, called once when the device actor shuts down. */
    fn remove(&mut self) {}
}

/* Driver construction is scoped to a registry instance built at context
 * creation, so tests can assemble isolated contexts. */
#[derive(Debug, Default)]
pub struct DriverRegistry;

impl DriverRegistry {
    pub fn new() -> Self {
        Self
    }

    /* Instantiate the driver named in the matching `.device` entry. */
    pub fn create(&self, driver_name: &str) -> Option<Box<dyn DeviceDriver>> {
        match driver_name {
            "marsgaming" => Some(Box::new(marsgaming::MarsGamingDriver::new())),
            "test_driver" => Some(Box::new(testdrv::TestDriver::default())),
            _ => {
                warn!("Unknown driver: {driver_name}");
                None
            }
        }
    }
}
