/* Hot-plug source.
 *
 * The udev netlink monitor, filtered to the hidraw subsystem, lives on the
 * reactor: its file descriptor is registered with `AsyncFd` and drained
 * whenever it becomes readable, forwarding add/remove events over an mpsc
 * channel to the bus event loop. Before watching for events the task
 * enumerates already-present hidraw nodes so coldplugged devices appear
 * exactly like hotplugged ones. The kernel identifies the HID device
 * through the HID_ID/HID_NAME properties on the hid parent of the hidraw
 * node. */

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub enum DeviceAction {
    Add {
        sysname: String,
        devnode: PathBuf,
        name: String,
        bustype: u16,
        vid: u16,
        pid: u16,
    },
    Remove {
        sysname: String,
    },
}

/* HID_ID looks like "0003:0000046D:0000C539" (bus:vendor:product, hex). */
fn parse_hid_id(id: &str) -> Option<(u16, u16, u16)> {
    let mut parts = id.split(':');
    let bustype = u32::from_str_radix(parts.next()?, 16).ok()?;
    let vid = u32::from_str_radix(parts.next()?, 16).ok()?;
    let pid = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((bustype as u16, vid as u16, pid as u16))
}

fn action_for_device(device: &udev::Device, removed: bool) -> Option<DeviceAction> {
    let sysname = device.sysname().to_str()?.to_string();

    if removed {
        /* The consumer decides whether it ever knew this sysname. */
        return Some(DeviceAction::Remove { sysname });
    }

    if !sysname.starts_with("hidraw") {
        return None;
    }

    let devnode = device.devnode()?.to_path_buf();
    let hid_parent = device.parent_with_subsystem("hid").ok().flatten()?;
    let hid_id = hid_parent.property_value("HID_ID")?.to_str()?.to_string();
    let (bustype, vid, pid) = match parse_hid_id(&hid_id) {
        Some(ids) => ids,
        None => {
            debug!("{sysname}: unparsable HID_ID '{hid_id}'");
            return None;
        }
    };
    let name = hid_parent
        .property_value("HID_NAME")
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string();

    Some(DeviceAction::Add {
        sysname,
        devnode,
        name,
        bustype,
        vid,
        pid,
    })
}

/* Start the monitor task. The netlink socket is bound before this
 * returns, so no event between enumeration and monitoring is lost. */
pub fn start(tx: mpsc::Sender<DeviceAction>) -> Result<tokio::task::JoinHandle<()>> {
    let monitor = udev::MonitorBuilder::new()
        .context("creating udev monitor")?
        .match_subsystem("hidraw")
        .context("installing hidraw filter")?
        .listen()
        .context("binding udev monitor socket")?;

    Ok(tokio::spawn(async move {
        if let Err(e) = run(monitor, tx).await {
            warn!("hotplug monitor exited: {e:#}");
        }
    }))
}

async fn enumerate(tx: &mpsc::Sender<DeviceAction>) -> Result<()> {
    let mut enumerator = udev::Enumerator::new().context("creating udev enumerator")?;
    enumerator
        .match_subsystem("hidraw")
        .context("installing hidraw filter")?;
    enumerator
        .match_is_initialized()
        .context("installing is-initialized filter")?;

    for device in enumerator.scan_devices().context("scanning devices")? {
        if let Some(action) = action_for_device(&device, false) {
            if tx.send(action).await.is_err() {
                break;
            }
        }
    }
    Ok(())
}

async fn run(monitor: udev::MonitorSocket, tx: mpsc::Sender<DeviceAction>) -> Result<()> {
    enumerate(&tx).await?;

    /* The monitor socket is non-blocking; park on the reactor until the
     * kernel signals readiness, then drain every pending event. */
    let mut fd = AsyncFd::new(monitor).context("registering udev monitor with the reactor")?;

    loop {
        let mut guard = fd
            .readable_mut()
            .await
            .context("waiting for udev monitor readiness")?;

        let actions: Vec<DeviceAction> = guard
            .get_inner_mut()
            .iter()
            .filter_map(|event| {
                let removed = event.event_type() == udev::EventType::Remove;
                action_for_device(&event.device(), removed)
            })
            .collect();

        guard.clear_ready();
        drop(guard);

        for action in actions {
            if tx.send(action).await.is_err() {
                /* Consumer is gone; the daemon is shutting down. */
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hid_id() {
        assert_eq!(
            parse_hid_id("0003:0000046D:0000C539"),
            Some((0x03, 0x046d, 0xc539))
        );
        assert_eq!(
            parse_hid_id("0005:00001532:00000043"),
            Some((0x05, 0x1532, 0x43))
        );
        assert_eq!(parse_hid_id("junk"), None);
        assert_eq!(parse_hid_id("0003:046d"), None);
    }
}
