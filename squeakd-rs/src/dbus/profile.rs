/* The org.freedesktop.squeak1.Profile interface.
 *
 * One of a device's configurable profiles, containing resolutions,
 * buttons, and LEDs. The object holds the shared device state and its own
 * profile index; every write goes through the model's validated setters
 * and re-announces the owning profile's IsDirty. */

use std::sync::Arc;

use tokio::sync::RwLock;
use zbus::interface;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use crate::device::DeviceInfo;

pub struct SqueakProfile {
    sysname: String,
    info: Arc<RwLock<DeviceInfo>>,
    index: u32,
}

impl SqueakProfile {
    pub fn new(sysname: &str, info: Arc<RwLock<DeviceInfo>>, index: u32) -> Self {
        Self {
            sysname: sysname.to_string(),
            info,
            index,
        }
    }
}

#[interface(name = "org.freedesktop.squeak1.Profile")]
impl SqueakProfile {
    /* Zero-based profile index (constant). */
    #[zbus(property)]
    async fn index(&self) -> u32 {
        self.index
    }

    /* Profile name. Empty when the device has no profile names. */
    #[zbus(property)]
    async fn name(&self) -> String {
        self.info
            .read()
            .await
            .profile(self.index)
            .ok()
            .and_then(|p| p.name.clone())
            .unwrap_or_default()
    }

    #[zbus(property)]
    async fn set_name(
        &self,
        name: String,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        {
            let mut info = self.info.write().await;
            info.profile_mut(self.index)
                .and_then(|p| p.set_name(&name))?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.index).await;
        Ok(())
    }

    /* True if this profile is disabled. */
    #[zbus(property)]
    async fn disabled(&self) -> bool {
        self.info
            .read()
            .await
            .profile(self.index)
            .map(|p| !p.is_enabled)
            .unwrap_or(false)
    }

    #[zbus(property)]
    async fn set_disabled(
        &self,
        disabled: bool,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        {
            let mut info = self.info.write().await;
            info.set_profile_enabled(self.index, !disabled)?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.index).await;
        Ok(())
    }

    /* Capability values of this profile (constant). */
    #[zbus(property)]
    async fn capabilities(&self) -> Vec<u32> {
        self.info
            .read()
            .await
            .profile(self.index)
            .map(|p| p.capabilities.iter().map(|&c| c as u32).collect())
            .unwrap_or_default()
    }

    /* Object paths of this profile's resolutions (constant). */
    #[zbus(property)]
    async fn resolutions(&self) -> Vec<OwnedObjectPath> {
        self.child_paths(super::resolution_path, |p| p.resolutions.len())
            .await
    }

    /* Object paths of this profile's buttons (constant). */
    #[zbus(property)]
    async fn buttons(&self) -> Vec<OwnedObjectPath> {
        self.child_paths(super::button_path, |p| p.buttons.len()).await
    }

    /* Object paths of this profile's LEDs (constant). */
    #[zbus(property)]
    async fn leds(&self) -> Vec<OwnedObjectPath> {
        self.child_paths(super::led_path, |p| p.leds.len()).await
    }

    /* True if this is the active profile. */
    #[zbus(property)]
    async fn is_active(&self) -> bool {
        self.info
            .read()
            .await
            .profile(self.index)
            .map(|p| p.is_active)
            .unwrap_or(false)
    }

    /* True if this profile has uncommitted changes. */
    #[zbus(property)]
    async fn is_dirty(&self) -> bool {
        self.info
            .read()
            .await
            .profile(self.index)
            .map(|p| p.dirty)
            .unwrap_or(false)
    }

    /* Report rate in Hz; writes clamp into [125, 8000]. */
    #[zbus(property)]
    async fn report_rate(&self) -> u32 {
        self.info
            .read()
            .await
            .profile(self.index)
            .map(|p| p.report_rate)
            .unwrap_or(0)
    }

    #[zbus(property)]
    async fn set_report_rate(
        &self,
        rate: u32,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        {
            let mut info = self.info.write().await;
            info.profile_mut(self.index)
                .and_then(|p| p.set_report_rate(rate))?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.index).await;
        Ok(())
    }

    /* Permitted report rate values (constant, advisory). */
    #[zbus(property)]
    async fn report_rates(&self) -> Vec<u32> {
        self.info
            .read()
            .await
            .profile(self.index)
            .map(|p| p.report_rates.clone())
            .unwrap_or_default()
    }

    /* Sensor angle snapping (-1 = unsupported, 0 = off, 1 = on). */
    #[zbus(property)]
    async fn angle_snapping(&self) -> i32 {
        self.info
            .read()
            .await
            .profile(self.index)
            .map(|p| p.angle_snapping)
            .unwrap_or(-1)
    }

    #[zbus(property)]
    async fn set_angle_snapping(
        &self,
        value: i32,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        {
            let mut info = self.info.write().await;
            info.profile_mut(self.index)
                .and_then(|p| p.set_angle_snapping(value))?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.index).await;
        Ok(())
    }

    /* Button debounce time in ms (-1 = unsupported). */
    #[zbus(property)]
    async fn debounce(&self) -> i32 {
        self.info
            .read()
            .await
            .profile(self.index)
            .map(|p| p.debounce)
            .unwrap_or(-1)
    }

    #[zbus(property)]
    async fn set_debounce(
        &self,
        value: i32,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        {
            let mut info = self.info.write().await;
            info.profile_mut(self.index)
                .and_then(|p| p.set_debounce(value))?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.index).await;
        Ok(())
    }

    /* Permitted debounce time values (constant). */
    #[zbus(property)]
    async fn debounces(&self) -> Vec<u32> {
        self.info
            .read()
            .await
            .profile(self.index)
            .map(|p| p.debounces.clone())
            .unwrap_or_default()
    }

    /* Make this the active profile.
     *
     * Replies 0 immediately; a rejected transition (e.g. the profile is
     * disabled) triggers a device resync instead of an error reply, and
     * the final state arrives through IsActive signals either way. */
    async fn set_active(&self, #[zbus(connection)] conn: &zbus::Connection) -> u32 {
        let result = {
            let mut info = self.info.write().await;
            info.set_active_profile(self.index)
        };

        if result.is_err() {
            super::emit_device_resync(conn, &self.sysname, &self.info).await;
        }

        let num_profiles = self.info.read().await.profiles.len() as u32;
        for pi in 0..num_profiles {
            super::emit_profile_is_active_changed(conn, &self.sysname, pi).await;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.index).await;

        0
    }
}

impl SqueakProfile {
    async fn child_paths(
        &self,
        path_fn: fn(&str, u32, u32) -> String,
        count_fn: fn(&crate::device::ProfileInfo) -> usize,
    ) -> Vec<OwnedObjectPath> {
        let info = self.info.read().await;
        let count = info
            .profile(self.index)
            .map(count_fn)
            .unwrap_or(0) as u32;
        (0..count)
            .filter_map(|ci| {
                ObjectPath::try_from(path_fn(&self.sysname, self.index, ci))
                    .ok()
                    .map(Into::into)
            })
            .collect()
    }
}
