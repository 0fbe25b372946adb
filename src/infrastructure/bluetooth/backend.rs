//! Platform BLE Backend
//!
//! The blocking surface the transport needs from a platform Bluetooth stack.
//! UUIDs cross this boundary as dashed strings.

use crate::infrastructure::bluetooth::error::BleError;
use std::time::Duration;

/// Raw notification payload callback registered with the platform
pub type NotifyCallback = Box<dyn Fn(Vec<u8>) + Send + Sync>;

/// Platform-side disconnect callback
pub type DisconnectCallback = Box<dyn Fn() + Send + Sync>;

/// Entry point into a platform Bluetooth stack
pub trait BleBackend: Send + Sync {
    type Adapter: BleAdapter<Peripheral = Self::Peripheral>;
    type Peripheral: BlePeripheral;

    /// Whether the Bluetooth radio is switched on
    fn bluetooth_enabled(&self) -> bool;

    /// Enumerate local adapters
    fn adapters(&self) -> Result<Vec<Self::Adapter>, BleError>;
}

/// A local Bluetooth adapter able to scan
pub trait BleAdapter {
    type Peripheral: BlePeripheral;

    /// Scan for `window` and return every peripheral seen
    fn scan_for(&self, window: Duration) -> Result<Vec<Self::Peripheral>, BleError>;
}

/// A remote peripheral
pub trait BlePeripheral: Send + Sync + 'static {
    /// Platform identifier (device name, or a UUID on macOS)
    fn identifier(&self) -> String;

    fn address(&self) -> String;

    /// Advertised service UUIDs
    fn services(&self) -> Result<Vec<String>, BleError>;

    fn connect(&self) -> Result<(), BleError>;

    fn disconnect(&self) -> Result<(), BleError>;

    fn is_connected(&self) -> bool;

    /// Write without response
    fn write_command(&self, service: &str, characteristic: &str, data: &[u8])
        -> Result<(), BleError>;

    fn read(&self, service: &str, characteristic: &str) -> Result<Vec<u8>, BleError>;

    /// Subscribe to notifications; `callback` runs on a platform thread
    fn notify(
        &self,
        service: &str,
        characteristic: &str,
        callback: NotifyCallback,
    ) -> Result<(), BleError>;

    /// Install the callback fired once when the link drops
    fn set_on_disconnected(&self, callback: DisconnectCallback);
}
