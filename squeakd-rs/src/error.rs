/* Error codes shared with the DBus API. The numeric values are ABI and must
 * not change: methods reply with the code cast to u32, so clients built
 * against older daemons keep decoding them correctly. */

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SqueakError {
    /* Communication with the device failed, or the device is not one of
     * ours. The request is abandoned and the device resynced. */
    #[error("device communication failed or device is unsupported")]
    Device,

    /* The requested change is beyond the capabilities of this entity. */
    #[error("operation not supported by this device")]
    Capability,

    /* The provided value or value range is outside of the legal or
     * supported range. */
    #[error("value outside the legal or supported range")]
    Value,

    /* Low-level system error, e.g. a failure to access files that should
     * be there. Usually unrecoverable; details go to the log. */
    #[error("low-level system error")]
    System,

    /* Implementation bug, either in the daemon or in the caller. */
    #[error("implementation bug")]
    Implementation,
}

impl SqueakError {
    pub fn code(self) -> i32 {
        match self {
            SqueakError::Device => -1000,
            SqueakError::Capability => -1001,
            SqueakError::Value => -1002,
            SqueakError::System => -1003,
            SqueakError::Implementation => -1004,
        }
    }

    /* Methods replying "u" send the code through this. 0 is success. */
    pub fn bus_code(self) -> u32 {
        self.code() as u32
    }
}

impl From<SqueakError> for zbus::fdo::Error {
    fn from(err: SqueakError) -> Self {
        match err {
            SqueakError::Value => zbus::fdo::Error::InvalidArgs(err.to_string()),
            SqueakError::Capability => zbus::fdo::Error::NotSupported(err.to_string()),
            _ => zbus::fdo::Error::Failed(err.to_string()),
        }
    }
}

impl From<SqueakError> for zbus::Error {
    fn from(err: SqueakError) -> Self {
        zbus::fdo::Error::from(err).into()
    }
}

pub type SqueakResult<T> = Result<T, SqueakError>;
