/* The org.freedesktop.squeak1.Button interface.
 *
 * One physical button on the device within a given profile. The mapping
 * is a (type, value) pair where the value's shape depends on the type:
 * a u32 for button/special/key assignments, an array of (type, value)
 * event pairs for macros. */

use std::sync::Arc;

use tokio::sync::RwLock;
use zbus::interface;
use zbus::zvariant::{OwnedValue, Value};

use crate::device::{ButtonAction, DeviceInfo};
use crate::error::SqueakError;
use crate::macros::Macro;

fn fallback_owned_value() -> OwnedValue {
    OwnedValue::from(0u32)
}

pub struct SqueakButton {
    sysname: String,
    info: Arc<RwLock<DeviceInfo>>,
    profile_index: u32,
    index: u32,
}

impl SqueakButton {
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
}

#[interface(name = "org.freedesktop.squeak1.Button")]
impl SqueakButton {
    /* Zero-based button index (constant). */
    #[zbus(property)]
    async fn index(&self) -> u32 {
        self.index
    }

    /* Current mapping as (ActionType, value). */
    #[zbus(property)]
    async fn mapping(&self) -> (u32, OwnedValue) {
        let info = self.info.read().await;
        let Ok(button) = info
            .profile(self.profile_index)
            .and_then(|p| p.button(self.index))
        else {
            return (0, fallback_owned_value());
        };

        let action_type = button.action.action_type() as u32;
        let value = match button.action {
            ButtonAction::Macro => {
                OwnedValue::try_from(Value::from(button.macro_events.to_raw_entries()))
                    .unwrap_or_else(|_| fallback_owned_value())
            }
            ButtonAction::Button(v) | ButtonAction::Special(v) | ButtonAction::Key(v) => {
                OwnedValue::from(v)
            }
            ButtonAction::None | ButtonAction::Unknown => fallback_owned_value(),
        };

        (action_type, value)
    }

    #[zbus(property)]
    async fn set_mapping(
        &self,
        mapping: (u32, OwnedValue),
        #[zbus(connection)] conn: &zbus::Connection,
    ) -> zbus::Result<()> {
        let (action_type, value) = mapping;
        let inner: Value<'_> = value.into();

        let as_u32 = |v: &Value<'_>| -> zbus::Result<u32> {
            match v {
                Value::U32(n) => Ok(*n),
                _ => Err(SqueakError::Value.into()),
            }
        };

        {
            let mut info = self.info.write().await;
            let profile = info.profile_mut(self.profile_index)?;
            match action_type {
                0 => profile.disable_button(self.index)?,
                1 => profile.set_button_button(self.index, as_u32(&inner)?)?,
                2 => profile.set_button_special(self.index, as_u32(&inner)?)?,
                3 => profile.set_button_key(self.index, as_u32(&inner)?)?,
                4 => {
                    let Value::Array(arr) = &inner else {
                        return Err(SqueakError::Value.into());
                    };
                    let entries: Vec<(u32, u32)> = arr
                        .iter()
                        .filter_map(|v| {
                            if let Value::Structure(s) = v {
                                if let [Value::U32(a), Value::U32(b)] = s.fields() {
                                    return Some((*a, *b));
                                }
                            }
                            None
                        })
                        .collect();
                    profile.set_button_macro(self.index, Macro::from_raw_entries(&entries))?;
                }
                _ => return Err(SqueakError::Value.into()),
            }
        }

        super::notify_profile_dirty(conn, &self.sysname, self.profile_index).await;
        Ok(())
    }

    /* Action types the hardware supports in this slot (constant). */
    #[zbus(property)]
    async fn action_types(&self) -> Vec<u32> {
        self.info
            .read()
            .await
            .profile(self.profile_index)
            .and_then(|p| p.button(self.index))
            .map(|b| b.supported_action_types())
            .unwrap_or_default()
    }
}
