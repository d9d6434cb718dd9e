/* The org.freedesktop.squeak1.Device interface. */

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::error;
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use crate::actor::ActorHandle;
use crate::device::DeviceInfo;

pub struct SqueakDevice {
    sysname: String,
    info: Arc<RwLock<DeviceInfo>>,
    actor: ActorHandle,
}

impl SqueakDevice {
    pub fn new(sysname: &str, info: Arc<RwLock<DeviceInfo>>, actor: ActorHandle) -> Self {
        Self {
            sysname: sysname.to_string(),
            info,
            actor,
        }
    }
}

#[interface(name = "org.freedesktop.squeak1.Device")]
impl SqueakDevice {
    /* "{bustype}:{vid:04x}:{pid:04x}:{version}" (constant). */
    #[zbus(property)]
    async fn model(&self) -> String {
        self.info.read().await.model.clone()
    }

    /* Device type tag: unspecified, other, mouse, keyboard (constant). */
    #[zbus(property)]
    async fn device_type(&self) -> u32 {
        self.info.read().await.device_type as u32
    }

    /* Human-readable device name (constant). */
    #[zbus(property)]
    async fn name(&self) -> String {
        self.info.read().await.name.clone()
    }

    #[zbus(property)]
    async fn firmware_version(&self) -> String {
        self.info.read().await.firmware_version.clone()
    }

    /* Object paths of this device's profiles (constant). */
    #[zbus(property)]
    async fn profiles(&self) -> Vec<OwnedObjectPath> {
        let info = self.info.read().await;
        info.profiles
            .iter()
            .filter_map(|p| {
                ObjectPath::try_from(super::profile_path(&self.sysname, p.index))
                    .ok()
                    .map(Into::into)
            })
            .collect()
    }

    /* Flush all pending changes to hardware.
     *
     * The reply is immediate: 0 means accepted for processing, and the
     * actual outcome is delivered through signals. The wire transaction
     * runs as a deferred task holding its own strong reference to the
     * device state, so device removal mid-commit is harmless. On success
     * every profile re-announces IsDirty; on failure the device emits
     * Resync after being re-read from hardware. */
    async fn commit(&self, #[zbus(connection)] conn: &zbus::Connection) -> u32 {
        let actor = self.actor.clone();
        let info = Arc::clone(&self.info);
        let sysname = self.sysname.clone();
        let conn = conn.clone();

        tokio::spawn(async move {
            let result = actor.commit().await;

            if let Err(e) = &result {
                error!("error committing device ({e})");
                super::emit_device_resync(&conn, &sysname, &info).await;
            }

            let num_profiles = info.read().await.profiles.len() as u32;
            for pi in 0..num_profiles {
                super::notify_profile_dirty(&conn, &sysname, pi).await;
            }
        });

        0
    }

    /* Hardware and daemon state may have diverged; discard your cached
     * view and re-read. */
    #[zbus(signal)]
    pub async fn resync(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;
}
