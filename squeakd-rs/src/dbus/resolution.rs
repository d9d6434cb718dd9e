/* The org.freedesktop.squeak1.Resolution interface.
 *
 * One resolution preset within a profile. The four status bits are
 * flipped through methods replying "u" (0 or the numeric error code);
 * the exclusive ones (active, default, DPI shift target) announce every
 * affected sibling before the reply goes out. */

use std::sync::Arc;

use tokio::sync::RwLock;
use zbus::interface;
use zbus::zvariant::{OwnedValue, Value};

use crate::device::{DeviceInfo, Dpi, ProfileInfo};
use crate::error::{SqueakError, SqueakResult};

pub struct SqueakResolution {
    sysname: String,
    info: Arc<RwLock<DeviceInfo>>,
    profile_index: u32,
    index: u32,
}

/* Which exclusive bit a method moved; drives the sibling announcements. */
enum StatusBit {
    Active,
    Default,
    DpiShiftTarget,
}

impl SqueakResolution {
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

    async fn read<T>(&self, get: impl FnOnce(&crate::device::ResolutionInfo) -> T, fallback: T) -> T {
        let info = self.info.read().await;
        info.profile(self.profile_index)
            .and_then(|p| p.resolution(self.index))
            .map(get)
            .unwrap_or(fallback)
    }

    /* Run one of the exclusive-bit setters, then emit the changed
     * property for every resolution whose state moved and the owning
     * profile's IsDirty. */
    async fn move_status_bit(
        &self,
        conn: &zbus::Connection,
        bit: StatusBit,
        set: fn(&mut ProfileInfo, u32) -> SqueakResult<Vec<u32>>,
    ) -> u32 {
        let changed = {
            let mut info = self.info.write().await;
            match info
                .profile_mut(self.profile_index)
                .and_then(|p| set(p, self.index))
            {
                Ok(changed) => changed,
                Err(e) => return e.bus_code(),
            }
        };

        let server = conn.object_server();
        for ri in &changed {
            let path = super::resolution_path(&self.sysname, self.profile_index, *ri);
            if let Ok(iref) = server
                .interface::<_, SqueakResolution>(path.as_str())
                .await
            {
                let emitter = iref.signal_emitter();
                let guard = iref.get().await;
                let _ = match bit {
                    StatusBit::Active => guard.is_active_changed(emitter).await,
                    StatusBit::Default => guard.is_default_changed(emitter).await,
                    StatusBit::DpiShiftTarget => {
                        guard.is_dpi_shift_target_changed(emitter).await
                    }
                };
            }
        }

        if !changed.is_empty() {
            super::notify_profile_dirty(conn, &self.sysname, self.profile_index).await;
        }

        0
    }
}

#[interface(name = "org.freedesktop.squeak1.Resolution")]
impl SqueakResolution {
    /* Zero-based resolution index (constant). */
    #[zbus(property)]
    async fn index(&self) -> u32 {
        self.index
    }

    /* Resolution capability values (constant). */
    #[zbus(property)]
    async fn capabilities(&self) -> Vec<u32> {
        self.read(
            |r| r.capabilities.iter().map(|&c| c as u32).collect(),
            Vec::new(),
        )
        .await
    }

    /* Whether this is the resolution the hardware currently moves at. */
    #[zbus(property)]
    async fn is_active(&self) -> bool {
        self.read(|r| r.is_active, false).await
    }

    /* Whether this is the preset adopted when the profile is selected. */
    #[zbus(property)]
    async fn is_default(&self) -> bool {
        self.read(|r| r.is_default, false).await
    }

    /* Whether this preset is used while the DPI shift button is held. */
    #[zbus(property)]
    async fn is_dpi_shift_target(&self) -> bool {
        self.read(|r| r.is_dpi_shift_target, false).await
    }

    #[zbus(property)]
    async fn is_disabled(&self) -> bool {
        self.read(|r| r.is_disabled, false).await
    }

    /* DPI value as a variant: either a u32 or a (u32, u32) tuple for
     * devices with separate x/y resolution. */
    #[zbus(property)]
    async fn dpi(&self) -> OwnedValue {
        let dpi = self.read(|r| r.dpi(), Dpi::Unified(0)).await;
        let value = match dpi {
            Dpi::Unified(v) => Value::from(v),
            Dpi::Separate { x, y } => Value::from((x, y)),
        };
        OwnedValue::try_from(value).unwrap_or_else(|_| OwnedValue::from(0u32))
    }

    #[zbus(property)]
    async fn set_dpi(
        &self,
        value: OwnedValue,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        let inner: Value<'_> = value.into();
        let dpi = match &inner {
            Value::U32(v) => Dpi::Unified(*v),
            Value::Structure(s) => {
                if let [Value::U32(x), Value::U32(y)] = s.fields() {
                    Dpi::Separate { x: *x, y: *y }
                } else {
                    return Err(SqueakError::Value.into());
                }
            }
            _ => return Err(SqueakError::Value.into()),
        };

        {
            let mut info = self.info.write().await;
            info.profile_mut(self.profile_index)
                .and_then(|p| p.set_resolution_dpi(self.index, dpi))?;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.profile_index).await;
        Ok(())
    }

    /* List of permitted DPI values (constant). */
    #[zbus(property)]
    async fn dpis(&self) -> Vec<u32> {
        self.read(|r| r.dpi_list.clone(), Vec::new()).await
    }

    #[zbus(property)]
    async fn min_dpi(&self) -> u32 {
        self.read(|r| r.min_dpi(), 0).await
    }

    #[zbus(property)]
    async fn max_dpi(&self) -> u32 {
        self.read(|r| r.max_dpi(), 0).await
    }

    /* Make this the active resolution. */
    async fn set_active(&self, #[zbus(connection)] conn: &zbus::Connection) -> u32 {
        self.move_status_bit(conn, StatusBit::Active, ProfileInfo::set_resolution_active)
            .await
    }

    /* Make this the default resolution. */
    async fn set_default(&self, #[zbus(connection)] conn: &zbus::Connection) -> u32 {
        self.move_status_bit(conn, StatusBit::Default, ProfileInfo::set_resolution_default)
            .await
    }

    /* Make this the exclusive DPI shift target within its profile. */
    async fn set_dpi_shift_target(&self, #[zbus(connection)] conn: &zbus::Connection) -> u32 {
        self.move_status_bit(
            conn,
            StatusBit::DpiShiftTarget,
            ProfileInfo::set_resolution_dpi_shift_target,
        )
        .await
    }

    /* Disable or enable this resolution slot. */
    async fn set_disabled(
        &self,
        disabled: bool,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> u32 {
        let result = {
            let mut info = self.info.write().await;
            info.profile_mut(self.profile_index)
                .and_then(|p| p.set_resolution_disabled(self.index, disabled))
        };
        if let Err(e) = result {
            return e.bus_code();
        }

        let path = super::resolution_path(&self.sysname, self.profile_index, self.index);
        if let Ok(iref) = conn
            .object_server()
            .interface::<_, SqueakResolution>(path.as_str())
            .await
        {
            let _ = iref
                .get()
                .await
                .is_disabled_changed(iref.signal_emitter())
                .await;
        }
        super::notify_profile_dirty(conn, &self.sysname, self.profile_index).await;
        0
    }
}
