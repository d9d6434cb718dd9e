/* Device actor — manages the lifecycle of a single connected device.
 *
 * Each device gets its own actor task (`tokio::spawn`), which owns the
 * hidraw access and the protocol driver instance. DBus interface objects
 * communicate with this actor through an `mpsc` channel, so all hardware
 * I/O is serialized and a slow wire transaction never blocks the bus
 * dispatcher: Commit replies to the client immediately and the transaction
 * runs here, with the task holding its own strong reference to the shared
 * device state. */

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::device::DeviceInfo;
use crate::driver::{DeviceDriver, DeviceIo};

/* Commands that DBus interface objects can send to the device actor. */
#[derive(Debug)]
pub enum ActorMessage {
    /* Flush all pending changes to hardware and report success/failure. */
    Commit {
        reply: oneshot::Sender<Result<(), String>>,
    },
    /* Re-read the active resolution from hardware; true means the
     * in-memory state changed and clients need a resync. */
    RefreshActiveResolution {
        reply: oneshot::Sender<Result<bool, String>>,
    },
    /* Gracefully shut down the actor (e.g., on device removal). */
    Shutdown,
}

/* Handle used by DBus objects to send commands to the device actor. */
#[derive(Clone)]
pub struct ActorHandle {
    tx: mpsc::Sender<ActorMessage>,
}

impl ActorHandle {
    pub async fn shutdown(&self) {
        let _ = self.tx.send(ActorMessage::Shutdown).await;
    }

    /* Run the deferred commit transaction. Returns once the wire
     * transaction (and, on failure, the re-read) completed. */
    pub async fn commit(&self) -> Result<(), String> {
        let (reply_tx, reply_rx) = oneshot::channel();

        eprintln!("DEBUG: handle.commit sending");
        self.tx
            .send(ActorMessage::Commit { reply: reply_tx })
            .await
            .map_err(|_| "Device actor is no longer running".to_string())?;
        eprintln!("DEBUG: handle.commit sent, waiting reply");

        let r = reply_rx
            .await
            .map_err(|_| "Device actor dropped the reply channel".to_string())?;
        eprintln!("DEBUG: handle.commit got reply");
        r
    }

    pub async fn refresh_active_resolution(&self) -> Result<bool, String> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.tx
            .send(ActorMessage::RefreshActiveResolution { reply: reply_tx })
            .await
            .map_err(|_| "Device actor is no longer running".to_string())?;

        reply_rx
            .await
            .map_err(|_| "Device actor dropped the reply channel".to_string())?
    }
}

/* The device actor itself. Owns the I/O handle and driver instance. */
struct DeviceActor {
    driver: Box<dyn DeviceDriver>,
    io: DeviceIo,
    info: Arc<RwLock<DeviceInfo>>,
    rx: mpsc::Receiver<ActorMessage>,
}

impl DeviceActor {
    async fn run(mut self) {
        info!(
            "Device actor started for {} (driver: {})",
            self.info.read().await.sysname,
            self.driver.name()
        );

        while let Some(msg) = self.rx.recv().await {
            match msg {
                ActorMessage::Commit { reply } => {
                    eprintln!("DEBUG: actor loop got Commit msg");
                    let result = self.commit().await;
                    eprintln!("DEBUG: actor loop sending reply");
                    let _ = reply.send(result.map_err(|e| format!("{e:#}")));
                    eprintln!("DEBUG: actor loop reply sent");
                }
                ActorMessage::RefreshActiveResolution { reply } => {
                    let mut info = self.info.write().await;
                    let result = self
                        .driver
                        .refresh_active_resolution(&self.io, &mut info)
                        .await;
                    let _ = reply.send(result.map_err(|e| format!("{e:#}")));
                }
                ActorMessage::Shutdown => {
                    info!(
                        "Device actor shutting down for {}",
                        self.info.read().await.sysname
                    );
                    break;
                }
            }
        }

        self.driver.remove();
        debug!("Device actor loop exited");
    }

    /* The batched wire transaction.
     *
     * On success every dirty flag in the subtree is cleared; a profile
     * whose active-transition flag is set additionally gets the driver's
     * set_active_profile call after the bulk write, so a client observing
     * side effects sees the documented order (rate, resolutions, buttons,
     * LEDs, active profile).
     *
     * On failure hardware and in-memory state may have diverged: re-read
     * the device through the driver and clear the dirty bits afterwards,
     * so clients treating the resync as authoritative don't trigger a
     * spurious follow-up commit. */
    async fn commit(&mut self) -> Result<()> {
        eprintln!("DEBUG: commit acquiring write lock");
        let mut info = self.info.write().await;
        eprintln!("DEBUG: commit acquired write lock");

        let result = async {
            eprintln!("DEBUG: calling driver.commit");
            let r = self.driver.commit(&self.io, &mut info).await;
            eprintln!("DEBUG: driver.commit returned {:?}", r.is_ok());
            r?;

            for pi in 0..info.profiles.len() {
                if info.profiles[pi].active_dirty && info.profiles[pi].is_active {
                    let index = info.profiles[pi].index;
                    self.driver
                        .set_active_profile(&self.io, index)
                        .await
                        .with_context(|| format!("switching to profile {index}"))?;
                }
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                info.clear_dirty();
                Ok(())
            }
            Err(e) => {
                warn!("{}: commit failed: {e:#}", info.sysname);
                eprintln!("DEBUG: calling driver.probe");
                if let Err(reread) = self.driver.probe(&self.io, &mut info).await {
                    warn!("{}: post-failure re-read failed: {reread:#}", info.sysname);
                }
                eprintln!("DEBUG: probe done, clearing dirty");
                info.clear_dirty();
                Err(e)
            }
        }
    }
}

/* Spawn a device actor for the given hardware device.
 *
 * Probes the device (populating the shared state from the wire), runs the
 * post-probe sanity check, and only then spawns the actor task. Returns an
 * error if probing fails or the probed state violates an invariant; the
 * caller discards the device. */
pub async fn spawn_device_actor(
    io: DeviceIo,
    mut driver: Box<dyn DeviceDriver>,
    info: Arc<RwLock<DeviceInfo>>,
) -> Result<ActorHandle> {
    {
        let mut device_info = info.write().await;
        driver
            .probe(&io, &mut device_info)
            .await
            .with_context(|| {
                format!(
                    "Probing {} with {}",
                    io.devnode().display(),
                    driver.name()
                )
            })?;

        if !device_info.sanity_check() {
            anyhow::bail!(
                "{}: probed state failed the sanity check",
                device_info.sysname
            );
        }
    }

    let (tx, rx) = mpsc::channel(16);

    let actor = DeviceActor {
        driver,
        io,
        info,
        rx,
    };

    tokio::spawn(async move {
        actor.run().await;
    });

    Ok(ActorHandle { tx })
}
