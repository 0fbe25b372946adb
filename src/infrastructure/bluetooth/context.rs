//! Connection Context
//!
//! State owned by one connected session: the peripheral and the disconnect
//! handler registry.

use crate::domain::models::{DisconnectHandler, DISCONNECT_STATUS};
use crate::infrastructure::bluetooth::backend::BlePeripheral;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

pub struct ConnectionContext<P: BlePeripheral> {
    peripheral: P,
    disconnect_handlers: Mutex<Vec<DisconnectHandler>>,
    released: AtomicBool,
}

impl<P: BlePeripheral> ConnectionContext<P> {
    pub fn new(peripheral: P) -> Arc<Self> {
        Arc::new(Self {
            peripheral,
            disconnect_handlers: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        })
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    /// Mark the session as handed over to teardown. A background teardown
    /// may still hold the context, but no new GATT traffic is accepted.
    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Hook the platform disconnect event up to [`Self::notify_disconnected`].
    ///
    /// The callback only holds a weak reference so the peripheral never keeps
    /// its own context alive.
    pub fn wire_disconnect(self: &Arc<Self>) {
        let context = Arc::downgrade(self);
        self.peripheral.set_on_disconnected(Box::new(move || {
            if let Some(context) = context.upgrade() {
                context.notify_disconnected();
            } else {
                debug!("Disconnect reported after the session was released");
            }
        }));
    }

    /// Append a handler. Duplicates are kept and each fires once per event.
    pub fn register_disconnect(&self, handler: DisconnectHandler) {
        self.disconnect_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Invoke every registered handler in registration order.
    ///
    /// The list is copied out first; handlers run without the lock held and
    /// may register further handlers.
    pub fn notify_disconnected(&self) {
        let handlers = self
            .disconnect_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        info!(
            "Peripheral {} disconnected, notifying {} handler(s)",
            self.peripheral.identifier(),
            handlers.len()
        );
        for handler in handlers {
            handler(DISCONNECT_STATUS);
        }
    }

    #[cfg(test)]
    pub(crate) fn handler_count(&self) -> usize {
        self.disconnect_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
