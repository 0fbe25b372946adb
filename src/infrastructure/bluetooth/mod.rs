//! Bluetooth Module
//!
//! BLE transport between the MetaWear board framework and a platform stack.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     BleTransport                         │
//! │  (connect / connect_by_id / bounded disconnect)          │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ owns
//!                       ▼
//! ┌──────────────────────────┐      ┌──────────────────────┐
//! │    ConnectionContext     │◄─────│      GattBridge       │
//! │ - peripheral             │ weak │ (BtleConnection impl) │
//! │ - disconnect handlers    │      └──────────┬───────────┘
//! └────────────┬─────────────┘                 │
//!              │                               ▼
//!              ▼                     ┌──────────────────────┐
//! ┌──────────────────────────┐      │  BtleConnectionFfi    │
//! │  BleBackend (platform)   │      │  (C descriptor)       │
//! │  WinRT │ btleplug │ sim  │      └──────────────────────┘
//! └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`backend`] - Blocking traits over the platform BLE stack
//! - [`context`] - Per-session state and disconnect fan-out
//! - [`bridge`] - GATT write/read/notify bridges
//! - [`service`] - Discovery, connect and teardown
//! - [`board`] - Board initialization completion
//! - [`ffi`] - C ABI transport descriptor

pub mod backend;
pub mod board;
pub mod bridge;
pub mod context;
pub mod error;
pub mod ffi;
pub mod service;

#[cfg(not(windows))]
pub mod btleplug_backend;
#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod sim;

pub use bridge::BtleConnection;
pub use error::{BleError, TransportError};
pub use service::BleTransport;

/// Backend for the current platform
#[cfg(windows)]
pub type PlatformBackend = winrt::WinrtBackend;
#[cfg(not(windows))]
pub type PlatformBackend = btleplug_backend::BtleplugBackend;
