/* squeakd: system daemon to configure gaming mice over DBus.
 *
 * The daemon owns raw-HID access to supported devices and mirrors their
 * state (profiles, resolutions, buttons, LEDs) in an in-memory object
 * graph published on the system bus. Clients mutate the graph through
 * validated setters; nothing reaches hardware until an explicit Commit,
 * which runs as a deferred per-device transaction. A 2-second poll
 * notices configuration changes made on the hardware itself. */

pub mod actor;
pub mod dbus;
pub mod device;
pub mod device_database;
pub mod driver;
pub mod error;
pub mod macros;
pub mod registry;
pub mod test_device;
pub mod udev_monitor;
