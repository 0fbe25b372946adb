use thiserror::Error;

/// Failure reported by the platform BLE stack
#[derive(Debug, Error)]
pub enum BleError {
    #[error("Bluetooth adapter error: {0}")]
    Adapter(String),
    #[error("Service {0} not found")]
    ServiceNotFound(String),
    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(String),
    #[error("Peripheral is not connected")]
    NotConnected,
    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),
    #[error("GATT operation failed: {0}")]
    Gatt(String),
    #[cfg(windows)]
    #[error(transparent)]
    Windows(#[from] windows::core::Error),
    #[cfg(not(windows))]
    #[error(transparent)]
    Btleplug(#[from] btleplug::Error),
}

/// Outcome of transport-level operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Bluetooth is disabled")]
    BluetoothDisabled,
    #[error("No Bluetooth adapter available")]
    NoAdapter,
    #[error("No matching peripheral found")]
    NoCandidates,
    #[error("Could not connect to any of {candidates} matching peripheral(s)")]
    ConnectFailed { candidates: usize },
    #[error("Board initialization failed with status {0}")]
    BoardInit(i32),
    #[error("Board initialization never completed")]
    BoardInitAbandoned,
    #[error("Timed out waiting for board initialization")]
    BoardInitTimeout,
    #[error(transparent)]
    Ble(#[from] BleError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
