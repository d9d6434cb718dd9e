/* The DBus surface.
 *
 * Publishes the object tree rooted at /org/freedesktop/squeak1 and runs
 * the main event loop: hotplug events attach and detach devices, the
 * 2-second poll task watches for hardware-side resolution changes, and
 * termination signals shut the daemon down cleanly. Each kind of entity
 * lives in its own subtree (device/, profile/, resolution/, button/,
 * led/), addressed by sysname and indices. */

pub mod button;
pub mod device;
pub mod led;
pub mod manager;
pub mod profile;
pub mod resolution;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use zbus::connection::Builder;
use zbus::Connection;

use crate::actor::{spawn_device_actor, ActorHandle};
use crate::device::DeviceInfo;
use crate::device_database::{BusType, DeviceDb};
use crate::driver::{DeviceIo, DriverRegistry};
use crate::registry::{DeviceRegistry, RegisteredDevice, SharedRegistry};
use crate::udev_monitor::DeviceAction;

pub const BUS_NAME: &str = "org.freedesktop.squeak1";
pub const OBJ_ROOT: &str = "/org/freedesktop/squeak1";

/* Physical DPI switches feel responsive at two seconds, and the per-tick
 * wire traffic stays negligible. */
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/* Sysnames become path components; '-' is not valid in an object path. */
fn encode_sysname(sysname: &str) -> String {
    sysname.replace('-', "_")
}

pub fn device_path(sysname: &str) -> String {
    format!("{OBJ_ROOT}/device/{}", encode_sysname(sysname))
}

pub fn profile_path(sysname: &str, profile: u32) -> String {
    format!("{OBJ_ROOT}/profile/{}/p{profile}", encode_sysname(sysname))
}

pub fn resolution_path(sysname: &str, profile: u32, resolution: u32) -> String {
    format!(
        "{OBJ_ROOT}/resolution/{}/p{profile}/r{resolution}",
        encode_sysname(sysname)
    )
}

pub fn button_path(sysname: &str, profile: u32, button: u32) -> String {
    format!(
        "{OBJ_ROOT}/button/{}/p{profile}/b{button}",
        encode_sysname(sysname)
    )
}

pub fn led_path(sysname: &str, profile: u32, led: u32) -> String {
    format!("{OBJ_ROOT}/led/{}/p{profile}/l{led}", encode_sysname(sysname))
}

/* Emit the Manager's Devices property change. */
pub(crate) async fn emit_devices_changed(conn: &Connection) {
    if let Ok(iref) = conn
        .object_server()
        .interface::<_, manager::SqueakManager>(OBJ_ROOT)
        .await
    {
        let _ = iref
            .get()
            .await
            .devices_changed(iref.signal_emitter())
            .await;
    }
}

/* Emit the profile's IsDirty property change. */
pub(crate) async fn notify_profile_dirty(conn: &Connection, sysname: &str, profile_index: u32) {
    let path = profile_path(sysname, profile_index);
    if let Ok(iref) = conn
        .object_server()
        .interface::<_, profile::SqueakProfile>(path.as_str())
        .await
    {
        let _ = iref
            .get()
            .await
            .is_dirty_changed(iref.signal_emitter())
            .await;
    }
}

pub(crate) async fn emit_profile_is_active_changed(
    conn: &Connection,
    sysname: &str,
    profile_index: u32,
) {
    let path = profile_path(sysname, profile_index);
    if let Ok(iref) = conn
        .object_server()
        .interface::<_, profile::SqueakProfile>(path.as_str())
        .await
    {
        let _ = iref
            .get()
            .await
            .is_active_changed(iref.signal_emitter())
            .await;
    }
}

/* Re-announce everything under one profile. Used on resync, where clients
 * are told to discard their cached view. */
async fn emit_profile_resync(
    conn: &Connection,
    sysname: &str,
    profile_index: u32,
    num_resolutions: u32,
    num_buttons: u32,
    num_leds: u32,
) {
    let server = conn.object_server();

    let path = profile_path(sysname, profile_index);
    if let Ok(iref) = server
        .interface::<_, profile::SqueakProfile>(path.as_str())
        .await
    {
        let emitter = iref.signal_emitter();
        let guard = iref.get().await;
        let _ = guard.is_active_changed(emitter).await;
        let _ = guard.is_dirty_changed(emitter).await;
        let _ = guard.name_changed(emitter).await;
        let _ = guard.disabled_changed(emitter).await;
        let _ = guard.report_rate_changed(emitter).await;
        let _ = guard.angle_snapping_changed(emitter).await;
        let _ = guard.debounce_changed(emitter).await;
    }

    for ri in 0..num_resolutions {
        let path = resolution_path(sysname, profile_index, ri);
        if let Ok(iref) = server
            .interface::<_, resolution::SqueakResolution>(path.as_str())
            .await
        {
            let emitter = iref.signal_emitter();
            let guard = iref.get().await;
            let _ = guard.is_active_changed(emitter).await;
            let _ = guard.is_default_changed(emitter).await;
            let _ = guard.is_disabled_changed(emitter).await;
            let _ = guard.is_dpi_shift_target_changed(emitter).await;
            let _ = guard.dpi_changed(emitter).await;
        }
    }

    for bi in 0..num_buttons {
        let path = button_path(sysname, profile_index, bi);
        if let Ok(iref) = server
            .interface::<_, button::SqueakButton>(path.as_str())
            .await
        {
            let _ = iref
                .get()
                .await
                .mapping_changed(iref.signal_emitter())
                .await;
        }
    }

    for li in 0..num_leds {
        let path = led_path(sysname, profile_index, li);
        if let Ok(iref) = server.interface::<_, led::SqueakLed>(path.as_str()).await {
            let emitter = iref.signal_emitter();
            let guard = iref.get().await;
            let _ = guard.mode_changed(emitter).await;
            let _ = guard.color_changed(emitter).await;
            let _ = guard.effect_duration_changed(emitter).await;
            let _ = guard.brightness_changed(emitter).await;
        }
    }
}

/* Tell clients to discard their cached view of a device and re-read:
 * property changes for every child, then the device-level Resync signal. */
pub(crate) async fn emit_device_resync(
    conn: &Connection,
    sysname: &str,
    info: &Arc<RwLock<DeviceInfo>>,
) {
    let counts: Vec<(u32, u32, u32, u32)> = {
        let snapshot = info.read().await;
        snapshot
            .profiles
            .iter()
            .map(|p| {
                (
                    p.index,
                    p.resolutions.len() as u32,
                    p.buttons.len() as u32,
                    p.leds.len() as u32,
                )
            })
            .collect()
    };

    for (pi, nres, nbtn, nled) in counts {
        emit_profile_resync(conn, sysname, pi, nres, nbtn, nled).await;
    }

    let path = device_path(sysname);
    if let Ok(iref) = conn
        .object_server()
        .interface::<_, device::SqueakDevice>(path.as_str())
        .await
    {
        let _ = device::SqueakDevice::resync(iref.signal_emitter()).await;
    }
}

/* Register a device and all its children on the object server and insert
 * it into the registry. Child registration failures are logged and
 * skipped; the affected path simply stays unresolvable. */
pub(crate) async fn attach_device(
    conn: &Connection,
    registry: &SharedRegistry,
    sysname: &str,
    info: Arc<RwLock<DeviceInfo>>,
    actor: ActorHandle,
) -> Result<()> {
    let server = conn.object_server();
    let mut object_paths = Vec::new();

    let dev_path = device_path(sysname);
    server
        .at(
            dev_path.as_str(),
            device::SqueakDevice::new(sysname, Arc::clone(&info), actor.clone()),
        )
        .await?;
    object_paths.push(dev_path.clone());

    {
        let snapshot = info.read().await;
        for p in &snapshot.profiles {
            let path = profile_path(sysname, p.index);
            let obj = profile::SqueakProfile::new(sysname, Arc::clone(&info), p.index);
            if let Err(e) = server.at(path.as_str(), obj).await {
                warn!("Failed to register profile {path}: {e}");
            }
            object_paths.push(path);

            for r in &p.resolutions {
                let path = resolution_path(sysname, p.index, r.index);
                let obj =
                    resolution::SqueakResolution::new(sysname, Arc::clone(&info), p.index, r.index);
                if let Err(e) = server.at(path.as_str(), obj).await {
                    warn!("Failed to register resolution {path}: {e}");
                }
                object_paths.push(path);
            }

            for b in &p.buttons {
                let path = button_path(sysname, p.index, b.index);
                let obj = button::SqueakButton::new(sysname, Arc::clone(&info), p.index, b.index);
                if let Err(e) = server.at(path.as_str(), obj).await {
                    warn!("Failed to register button {path}: {e}");
                }
                object_paths.push(path);
            }

            for l in &p.leds {
                let path = led_path(sysname, p.index, l.index);
                let obj = led::SqueakLed::new(sysname, Arc::clone(&info), p.index, l.index);
                if let Err(e) = server.at(path.as_str(), obj).await {
                    warn!("Failed to register led {path}: {e}");
                }
                object_paths.push(path);
            }
        }

        info!(
            "{}: \"{}\", {} profiles",
            sysname,
            snapshot.name,
            snapshot.profiles.len()
        );
    }

    registry.write().await.insert(RegisteredDevice {
        sysname: sysname.to_string(),
        info,
        actor,
        object_paths,
    });

    Ok(())
}

/* Detach a device: shut down its actor and unregister its bus objects.
 * The shared state itself stays alive as long as anything holds a clone. */
pub(crate) async fn detach_device(conn: &Connection, registry: &SharedRegistry, sysname: &str) {
    let Some(removed) = registry.write().await.remove(sysname) else {
        info!("Device removed: {} (was not registered)", sysname);
        return;
    };

    removed.actor.shutdown().await;

    let server = conn.object_server();
    for path in removed.object_paths.iter().rev() {
        /* Only one interface type is registered per path; try each. */
        let _ = server.remove::<device::SqueakDevice, _>(path.as_str()).await;
        let _ = server
            .remove::<profile::SqueakProfile, _>(path.as_str())
            .await;
        let _ = server
            .remove::<resolution::SqueakResolution, _>(path.as_str())
            .await;
        let _ = server.remove::<button::SqueakButton, _>(path.as_str()).await;
        let _ = server.remove::<led::SqueakLed, _>(path.as_str()).await;
    }

    info!(
        "Device {} removed ({} objects)",
        sysname,
        removed.object_paths.len()
    );
}

/* A new hidraw node appeared: match it against the descriptor database,
 * probe it with the selected driver, and publish it. Unsupported and
 * unprobeable devices are logged and skipped. */
async fn handle_device_added(
    conn: &Connection,
    registry: &SharedRegistry,
    drivers: &DriverRegistry,
    db: &DeviceDb,
    sysname: String,
    devnode: std::path::PathBuf,
    name: String,
    bustype: u16,
    vid: u16,
    pid: u16,
) {
    if registry.read().await.contains(&sysname) {
        /* Already known; nothing to refresh from a repeat add event. */
        return;
    }

    let Some(entry) = db.lookup(bustype, vid, pid) else {
        info!(
            "Ignoring unsupported device {} ({:04x}:{:04x})",
            sysname, vid, pid
        );
        return;
    };

    info!(
        "Matched device: {} -> {} (driver: {})",
        sysname, entry.name, entry.driver
    );

    let Some(driver) = drivers.create(&entry.driver) else {
        return;
    };

    let model = format!(
        "{}:{:04x}:{:04x}:0",
        BusType::from_u16(bustype),
        vid,
        pid
    );
    let display_name = if name.is_empty() {
        entry.name.clone()
    } else {
        name
    };
    let info = Arc::new(RwLock::new(DeviceInfo::new(
        &sysname,
        &display_name,
        &model,
        entry.device_type,
    )));

    let actor =
        match spawn_device_actor(DeviceIo::new(&devnode), driver, Arc::clone(&info)).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Driver {} probe failed for {}: {e:#}", entry.driver, sysname);
                return;
            }
        };

    if let Err(e) = attach_device(conn, registry, &sysname, info, actor).await {
        warn!("{}: cannot track device: {e:#}", sysname);
        return;
    }

    emit_devices_changed(conn).await;
}

/* The 2-second poll loop. Each tick asks every attached device's driver
 * to re-read the active resolution; a device reporting a change gets the
 * full resync fan-out. The next tick is armed only after this tick's work
 * completed (one-shot pattern), so a slow wire transaction delays the
 * next poll instead of stacking up behind it. */
fn spawn_poll_task(conn: Connection, registry: SharedRegistry) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;

            let devices: Vec<(String, ActorHandle, Arc<RwLock<DeviceInfo>>)> = registry
                .read()
                .await
                .iter()
                .map(|d| (d.sysname.clone(), d.actor.clone(), Arc::clone(&d.info)))
                .collect();

            for (sysname, actor, info) in devices {
                match actor.refresh_active_resolution().await {
                    Ok(true) => emit_device_resync(&conn, &sysname, &info).await,
                    Ok(false) => {}
                    Err(e) => debug!("{sysname}: active-resolution poll failed: {e}"),
                }
            }
        }
    })
}

/* Starts the DBus server and runs until a termination signal arrives or
 * the hotplug channel closes. Device events from the udev monitor drive
 * attachment and removal. */
pub async fn run_server(mut device_rx: mpsc::Receiver<DeviceAction>, db: DeviceDb) -> Result<()> {
    let registry: SharedRegistry = Arc::new(RwLock::new(DeviceRegistry::new()));
    let drivers = DriverRegistry::new();

    let manager = manager::SqueakManager::new(Arc::clone(&registry));
    #[cfg(feature = "dev-hooks")]
    let test_slot = manager.test_slot();

    let conn = Builder::system()?
        .name(BUS_NAME)?
        .serve_at(OBJ_ROOT, manager)?
        .build()
        .await?;

    info!("DBus server ready on {BUS_NAME}");

    #[cfg(feature = "dev-hooks")]
    {
        let status = manager::load_test_device_inner(
            &conn,
            &registry,
            &test_slot,
            crate::test_device::TestDeviceSpec::default(),
        )
        .await;
        if status != 0 {
            warn!("Failed to load the default test device ({status})");
        }
    }

    let poll_task = spawn_poll_task(conn.clone(), Arc::clone(&registry));

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            action = device_rx.recv() => {
                match action {
                    Some(DeviceAction::Add { sysname, devnode, name, bustype, vid, pid }) => {
                        handle_device_added(
                            &conn, &registry, &drivers, &db,
                            sysname, devnode, name, bustype, vid, pid,
                        )
                        .await;
                    }
                    Some(DeviceAction::Remove { sysname }) => {
                        if registry.read().await.contains(&sysname) {
                            detach_device(&conn, &registry, &sysname).await;
                            emit_devices_changed(&conn).await;
                        }
                    }
                    None => {
                        info!("udev monitor channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, exiting");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, exiting");
                break;
            }
        }
    }

    poll_task.abort();
    Ok(())
}
