//! GATT Operation Bridges
//!
//! Translate the board framework's transport calls into platform peripheral
//! calls. Platform errors never escape: they become empty reads, non-zero
//! ready codes, or a log line.

use crate::domain::models::{
    DataCallback, DisconnectHandler, GattChar, GattCharWriteType, ReadCallback, ReadyCallback,
    NOTIFY_FAILED,
};
use crate::infrastructure::bluetooth::backend::BlePeripheral;
use crate::infrastructure::bluetooth::context::ConnectionContext;
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

/// Transport interface consumed by the board framework
pub trait BtleConnection: Send + Sync {
    /// Write `value` to a characteristic. There is no error channel.
    fn write_gatt_char(
        &self,
        write_type: GattCharWriteType,
        characteristic: &GattChar,
        value: &[u8],
    );

    /// Read a characteristic; `on_result` runs exactly once
    fn read_gatt_char(&self, characteristic: &GattChar, on_result: ReadCallback);

    /// Subscribe to a characteristic; `on_ready` runs exactly once
    fn enable_notifications(
        &self,
        characteristic: &GattChar,
        on_data: DataCallback,
        on_ready: ReadyCallback,
    );

    /// Register a handler for the session's disconnect event
    fn on_disconnect(&self, handler: DisconnectHandler);
}

/// [`BtleConnection`] backed by a connected session.
///
/// Holds the session weakly: once the transport releases it, every call
/// behaves as if no connection existed, even while a background teardown
/// still owns the context.
pub struct GattBridge<P: BlePeripheral> {
    context: Weak<ConnectionContext<P>>,
}

impl<P: BlePeripheral> GattBridge<P> {
    pub fn new(context: &Arc<ConnectionContext<P>>) -> Self {
        Self {
            context: Arc::downgrade(context),
        }
    }

    fn live_context(&self) -> Option<Arc<ConnectionContext<P>>> {
        self.context.upgrade().filter(|ctx| !ctx.is_released())
    }
}

impl<P: BlePeripheral> BtleConnection for GattBridge<P> {
    fn write_gatt_char(
        &self,
        write_type: GattCharWriteType,
        characteristic: &GattChar,
        value: &[u8],
    ) {
        let Some(ctx) = self.live_context() else {
            return;
        };
        let service = characteristic.service_uuid();
        let chr = characteristic.uuid();
        trace!(
            "write {:?} {} bytes to {}/{}",
            write_type,
            value.len(),
            service,
            chr
        );

        // Always a command write: some boards never acknowledge requests.
        if let Err(e) = ctx.peripheral().write_command(&service, &chr, value) {
            warn!("GATT write to {} failed: {}", chr, e);
        }
    }

    fn read_gatt_char(&self, characteristic: &GattChar, on_result: ReadCallback) {
        let Some(ctx) = self.live_context() else {
            error!("GATT read with no active connection");
            on_result(None);
            return;
        };
        let service = characteristic.service_uuid();
        let chr = characteristic.uuid();

        match ctx.peripheral().read(&service, &chr) {
            Ok(data) => {
                trace!("read {} bytes from {}", data.len(), chr);
                on_result(Some(data.as_slice()));
            }
            Err(e) => {
                warn!("GATT read from {} failed: {}", chr, e);
                on_result(None);
            }
        }
    }

    fn enable_notifications(
        &self,
        characteristic: &GattChar,
        on_data: DataCallback,
        on_ready: ReadyCallback,
    ) {
        let Some(ctx) = self.live_context() else {
            error!("Enable notifications with no active connection");
            on_ready(NOTIFY_FAILED);
            return;
        };
        let service = characteristic.service_uuid();
        let chr = characteristic.uuid();

        let label = chr.clone();
        let forward = Box::new(move |bytes: Vec<u8>| {
            if bytes.is_empty() {
                warn!("Empty notification received on {}", label);
            } else {
                on_data(bytes.as_slice());
            }
        });

        match ctx.peripheral().notify(&service, &chr, forward) {
            Ok(()) => {
                debug!("Notifications enabled on {}", chr);
                on_ready(0);
            }
            Err(e) => {
                warn!("Enabling notifications on {} failed: {}", chr, e);
                on_ready(NOTIFY_FAILED);
            }
        }
    }

    fn on_disconnect(&self, handler: DisconnectHandler) {
        match self.live_context() {
            Some(ctx) => ctx.register_disconnect(handler),
            None => debug!("Disconnect handler ignored, no active connection"),
        }
    }
}
