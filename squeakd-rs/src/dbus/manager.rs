/* The org.freedesktop.squeak1.Manager interface.
 *
 * Entry point for clients to discover connected devices. Development
 * builds additionally expose LoadTestDevice, which injects a synthetic
 * device described by a JSON spec. The interface impl is selected at the
 * feature level so release builds don't even carry the method. */

use zbus::interface;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};

use crate::registry::SharedRegistry;

/* DBus API version. Part of the client contract. */
pub const API_VERSION: i32 = 2;

pub struct SqueakManager {
    registry: SharedRegistry,
    #[cfg(feature = "dev-hooks")]
    test_slot: TestSlot,
}

impl SqueakManager {
    pub fn new(registry: SharedRegistry) -> Self {
        Self {
            registry,
            #[cfg(feature = "dev-hooks")]
            test_slot: TestSlot::default(),
        }
    }

    #[cfg(feature = "dev-hooks")]
    pub fn test_slot(&self) -> TestSlot {
        self.test_slot.clone()
    }

    async fn device_paths(&self) -> Vec<OwnedObjectPath> {
        self.registry
            .read()
            .await
            .iter()
            .filter_map(|d| {
                ObjectPath::try_from(super::device_path(&d.sysname))
                    .ok()
                    .map(Into::into)
            })
            .collect()
    }
}

#[cfg(not(feature = "dev-hooks"))]
#[interface(name = "org.freedesktop.squeak1.Manager")]
impl SqueakManager {
    /* The DBus API version (constant, read-only). */
    #[zbus(property)]
    async fn api_version(&self) -> i32 {
        API_VERSION
    }

    /* Object paths of the connected devices, in sysname order. */
    #[zbus(property)]
    async fn devices(&self) -> Vec<OwnedObjectPath> {
        self.device_paths().await
    }
}

#[cfg(feature = "dev-hooks")]
#[interface(name = "org.freedesktop.squeak1.Manager")]
impl SqueakManager {
    /* The DBus API version (constant, read-only). */
    #[zbus(property)]
    async fn api_version(&self) -> i32 {
        API_VERSION
    }

    /* Object paths of the connected devices, in sysname order. */
    #[zbus(property)]
    async fn devices(&self) -> Vec<OwnedObjectPath> {
        self.device_paths().await
    }

    /* Inject (or replace) the synthetic test device. Returns 0 on
     * success, a negative status otherwise; details go to the log, like
     * any other device construction failure. */
    async fn load_test_device(
        &self,
        data: String,
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> i32 {
        let spec = match crate::test_device::parse_json(&data) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::error!("Failed to parse JSON data: {e}");
                return -22;
            }
        };

        load_test_device_inner(conn, &self.registry, &self.test_slot, spec).await
    }
}

#[cfg(feature = "dev-hooks")]
pub use dev_hooks::{load_test_device_inner, TestSlot};

#[cfg(feature = "dev-hooks")]
mod dev_hooks {
    use std::sync::Arc;

    use tokio::sync::{Mutex, RwLock};
    use tracing::error;
    use zbus::Connection;

    use crate::actor::spawn_device_actor;
    use crate::driver::testdrv::TestDriver;
    use crate::driver::DeviceIo;
    use crate::registry::SharedRegistry;
    use crate::test_device::{build_device_info, TestDeviceSpec};

    /* At most one synthetic device exists at a time; loading a new one
     * replaces the previous. Sysnames stay unique across replacements. */
    #[derive(Clone, Default)]
    pub struct TestSlot {
        inner: Arc<Mutex<TestSlotInner>>,
    }

    #[derive(Default)]
    struct TestSlotInner {
        counter: u32,
        current: Option<String>,
    }

    pub async fn load_test_device_inner(
        conn: &Connection,
        registry: &SharedRegistry,
        slot: &TestSlot,
        spec: TestDeviceSpec,
    ) -> i32 {
        let mut inner = slot.inner.lock().await;

        if let Some(previous) = inner.current.take() {
            super::super::detach_device(conn, registry, &previous).await;
            super::super::emit_devices_changed(conn).await;
        }

        let sysname = format!("testdevice{}", inner.counter);
        inner.counter += 1;

        let info = Arc::new(RwLock::new(build_device_info(&sysname, &spec)));
        let driver = Box::new(TestDriver::new(spec));

        let actor =
            match spawn_device_actor(DeviceIo::new("/dev/null"), driver, Arc::clone(&info)).await
            {
                Ok(handle) => handle,
                Err(e) => {
                    error!("Cannot track test device: {e:#}");
                    return -5;
                }
            };

        if let Err(e) = super::super::attach_device(conn, registry, &sysname, info, actor).await {
            error!("Cannot track test device: {e:#}");
            return -5;
        }

        inner.current = Some(sysname);
        super::super::emit_devices_changed(conn).await;
        0
    }
}
