/* The synthetic test driver.
 *
 * Populates a device from an in-memory spec instead of the wire, so the
 * whole daemon can be exercised without hardware. Selected for devices
 * injected through the Manager's LoadTestDevice entry point and used
 * directly by the test suite. The controls handle lets a test inject
 * commit failures and hardware-side resolution changes.
 *
 * The driver keeps its own mirror of the fake hardware: the state most
 * recently read from the spec or written by a successful commit. A
 * re-probe (the failure-path re-read) restores that mirror, so a failed
 * commit discards only the uncommitted changes, never earlier committed
 * ones. */

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::device::DeviceInfo;
use crate::driver::{DeviceDriver, DeviceIo};
use crate::test_device::{self, TestDeviceSpec};

/* Shared knobs for steering a TestDriver from outside the actor. */
#[derive(Debug, Clone, Default)]
pub struct TestControls {
    /* Number of upcoming commits that fail with a device error. */
    fail_commits: Arc<AtomicU32>,
    /* Resolution index the "hardware" switched to behind our back; picked
     * up by the next refresh_active_resolution call. */
    hardware_resolution: Arc<Mutex<Option<u32>>>,
}

impl TestControls {
    pub fn fail_next_commits(&self, count: u32) {
        self.fail_commits.store(count, Ordering::SeqCst);
    }

    pub fn press_dpi_button(&self, resolution_index: u32) {
        if let Ok(mut pending) = self.hardware_resolution.lock() {
            *pending = Some(resolution_index);
        }
    }
}

pub struct TestDriver {
    spec: TestDeviceSpec,
    /* Last state read from or successfully written to the fake hardware;
     * None until the first probe. */
    hardware: Option<DeviceInfo>,
    controls: TestControls,
    removed: bool,
}

impl TestDriver {
    pub fn new(spec: TestDeviceSpec) -> Self {
        Self {
            spec,
            hardware: None,
            controls: TestControls::default(),
            removed: false,
        }
    }

    pub fn controls(&self) -> TestControls {
        self.controls.clone()
    }
}

impl Default for TestDriver {
    fn default() -> Self {
        Self::new(TestDeviceSpec::default())
    }
}

#[async_trait]
impl DeviceDriver for TestDriver {
    fn name(&self) -> &str {
        "Test driver"
    }

    async fn probe(&mut self, _io: &DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        match &self.hardware {
            /* Re-probe: hand back what the hardware actually holds. */
            Some(committed) => *info = committed.clone(),
            None => {
                test_device::populate_device_info(info, &self.spec);
                self.hardware = Some(info.clone());
            }
        }
        Ok(())
    }

    async fn commit(&mut self, _io: &DeviceIo, info: &mut DeviceInfo) -> Result<()> {
        if self.hardware.is_none() {
            anyhow::bail!("commit before probe");
        }

        let remaining = self.controls.fail_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.controls
                .fail_commits
                .store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("injected commit failure");
        }

        /* The fake hardware now holds exactly what the daemon wrote. */
        let mut committed = info.clone();
        committed.clear_dirty();
        self.hardware = Some(committed);
        Ok(())
    }

    async fn set_active_profile(&mut self, _io: &DeviceIo, index: u32) -> Result<()> {
        let Some(hardware) = self.hardware.as_ref() else {
            anyhow::bail!("set_active_profile before probe");
        };
        if index as usize >= hardware.profiles.len() {
            anyhow::bail!("profile index {index} out of range");
        }
        Ok(())
    }

    async fn refresh_active_resolution(
        &mut self,
        _io: &DeviceIo,
        info: &mut DeviceInfo,
    ) -> Result<bool> {
        let pending = match self.controls.hardware_resolution.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(current) = pending else {
            return Ok(false);
        };

        let Some(profile) = info.profiles.iter_mut().find(|p| p.is_active) else {
            return Ok(false);
        };

        let mut changed = false;
        for res in &mut profile.resolutions {
            let active = res.index == current;
            if res.is_active != active {
                res.is_active = active;
                changed = true;
            }
        }

        /* The switch happened on the device itself; reflect it in the
         * hardware mirror too, but leave pending client edits out of it. */
        if changed {
            if let Some(hardware) = self.hardware.as_mut() {
                if let Some(profile) = hardware.profiles.iter_mut().find(|p| p.is_active) {
                    for res in &mut profile.resolutions {
                        res.is_active = res.index == current;
                    }
                }
            }
        }
        Ok(changed)
    }

    fn remove(&mut self) {
        /* remove must be called only once */
        assert!(!self.removed);
        self.removed = true;
    }
}
