//! GATT descriptor types, status codes and transport callback aliases

use crate::domain::uuid::uuid128;
use std::sync::Arc;

/// Status code reported by the board framework when initialization succeeds.
pub const MBL_MW_STATUS_OK: i32 = 0;

/// Status passed to ready callbacks when notifications could not be enabled.
pub const NOTIFY_FAILED: i32 = -1;

/// Status passed to disconnect handlers.
pub const DISCONNECT_STATUS: i32 = 0;

/// A GATT characteristic, identified by its service and characteristic UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct GattChar {
    pub service_uuid_high: u64,
    pub service_uuid_low: u64,
    pub uuid_high: u64,
    pub uuid_low: u64,
}

impl GattChar {
    pub fn new(service: (u64, u64), characteristic: (u64, u64)) -> Self {
        Self {
            service_uuid_high: service.0,
            service_uuid_low: service.1,
            uuid_high: characteristic.0,
            uuid_low: characteristic.1,
        }
    }

    /// Service UUID as a dashed string
    pub fn service_uuid(&self) -> String {
        uuid128(self.service_uuid_high, self.service_uuid_low)
    }

    /// Characteristic UUID as a dashed string
    pub fn uuid(&self) -> String {
        uuid128(self.uuid_high, self.uuid_low)
    }
}

/// Write type requested by the board framework
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattCharWriteType {
    WithResponse = 0,
    WithoutResponse = 1,
}

impl GattCharWriteType {
    /// Map the C enum value; anything unknown is treated as a command write.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::WithResponse,
            _ => Self::WithoutResponse,
        }
    }
}

/// Receives the bytes of a read, or `None` when the read failed.
pub type ReadCallback = Box<dyn FnOnce(Option<&[u8]>) + Send>;

/// Receives every non-empty notification payload.
pub type DataCallback = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Receives `0` once notifications are live, non-zero otherwise.
pub type ReadyCallback = Box<dyn FnOnce(i32) + Send>;

/// Invoked with a status code when the session disconnects.
pub type DisconnectHandler = Arc<dyn Fn(i32) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gatt_char_strings() {
        let ch = GattChar::new(
            (0x326a900085cb9195, 0xd9dd464cfbbae75a),
            (0x326a900185cb9195, 0xd9dd464cfbbae75a),
        );
        assert_eq!(ch.service_uuid(), "326a9000-85cb-9195-d9dd-464cfbbae75a");
        assert_eq!(ch.uuid(), "326a9001-85cb-9195-d9dd-464cfbbae75a");
    }
}
