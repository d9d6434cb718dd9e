/* The org.freedesktop.squeak1.Led interface. */

use std::sync::Arc;

use tokio::sync::RwLock;
use zbus::interface;

use crate::device::{Color, DeviceInfo, LedMode};
use crate::error::SqueakError;

pub struct SqueakLed {
    sysname: String,
    info: Arc<RwLock<DeviceInfo>>,
    profile_index: u32,
    index: u32,
}

impl SqueakLed {
    pub fn new(
        sysname: &str,
        info: Arc<RwLock<DeviceInfo>>,
        profile_index: u32,
        index: u32,
    ) -> Self {
        Self {
            sysname: sysname.to_string(),
            info,
            profile_index,
            index,
        }
    }

    async fn read<T>(&self, get: impl FnOnce(&crate::device::LedInfo) -> T, fallback: T) -> T {
        let info = self.info.read().await;
        info.profile(self.profile_index)
            .and_then(|p| p.led(self.index))
            .map(get)
            .unwrap_or(fallback)
    }
}

#[interface(name = "org.freedesktop.squeak1.Led")]
impl SqueakLed {
    /* Zero-based LED index (constant). */
    #[zbus(property)]
    async fn index(&self) -> u32 {
        self.index
    }

    /* Current LED mode: off, on, cycle, breathing. */
    #[zbus(property)]
    async fn mode(&self) -> u32 {
        self.read(|l| l.mode as u32, 0).await
    }

    #[zbus(property)]
    async fn set_mode(
        &self,
        mode: u32,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        let mode = LedMode::from_u32(mode).ok_or(SqueakError::Value)?;
        {
            let mut info = self.info.write().await;
            info.profile_mut(self.profile_index)
                .and_then(|p| p.set_led_mode(self.index, mode))?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.profile_index).await;
        Ok(())
    }

    /* Modes this LED supports (constant). */
    #[zbus(property)]
    async fn modes(&self) -> Vec<u32> {
        self.read(|l| l.supported_modes(), Vec::new()).await
    }

    /* LED color as an RGB triplet. */
    #[zbus(property)]
    async fn color(&self) -> (u32, u32, u32) {
        self.read(|l| (l.color.red, l.color.green, l.color.blue), (0, 0, 0))
            .await
    }

    #[zbus(property)]
    async fn set_color(
        &self,
        color: (u32, u32, u32),
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        {
            let mut info = self.info.write().await;
            info.profile_mut(self.profile_index)
                .and_then(|p| p.set_led_color(self.index, Color::new(color.0, color.1, color.2)))?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.profile_index).await;
        Ok(())
    }

    /* Color depth of this LED (constant). */
    #[zbus(property)]
    async fn color_depth(&self) -> u32 {
        self.read(|l| l.color_depth as u32, 0).await
    }

    /* Effect duration in ms, range 0-10000. */
    #[zbus(property)]
    async fn effect_duration(&self) -> u32 {
        self.read(|l| l.effect_duration, 0).await
    }

    #[zbus(property)]
    async fn set_effect_duration(
        &self,
        duration: u32,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        {
            let mut info = self.info.write().await;
            info.profile_mut(self.profile_index)
                .and_then(|p| p.set_led_effect_duration(self.index, duration))?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.profile_index).await;
        Ok(())
    }

    /* LED brightness, 0-255. */
    #[zbus(property)]
    async fn brightness(&self) -> u32 {
        self.read(|l| l.brightness, 0).await
    }

    #[zbus(property)]
    async fn set_brightness(
        &self,
        brightness: u32,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        {
            let mut info = self.info.write().await;
            info.profile_mut(self.profile_index)
                .and_then(|p| p.set_led_brightness(self.index, brightness))?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.profile_index).await;
        Ok(())
    }
}
