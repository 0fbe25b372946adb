//! MetaWear BLE transport
//!
//! Connects the MetaWear board framework to a Bluetooth LE peripheral through
//! the platform stack: discovery by service UUID or identifier, GATT
//! write/read/notify bridges, disconnect fan-out and bounded teardown.

pub mod domain;
pub mod infrastructure;

pub use domain::models::{GattChar, GattCharWriteType};
pub use domain::settings::{SettingsService, TransportConfig, TransportSettings};
pub use infrastructure::bluetooth::board::{board_init_channel, BoardInitCompleter, BoardInitFuture};
pub use infrastructure::bluetooth::ffi::BtleConnectionFfi;
pub use infrastructure::bluetooth::{
    BleError, BleTransport, BtleConnection, PlatformBackend, TransportError,
};
