//! BLE Transport Service
//!
//! Discovers and connects to a MetaWear board, hands out the transport
//! interface for the board framework, and tears the session down within a
//! bounded time.

use crate::domain::settings::TransportConfig;
use crate::domain::uuid::iequals;
use crate::infrastructure::bluetooth::backend::{BleAdapter, BleBackend, BlePeripheral};
use crate::infrastructure::bluetooth::bridge::{BtleConnection, GattBridge};
use crate::infrastructure::bluetooth::context::ConnectionContext;
use crate::infrastructure::bluetooth::error::{BleError, TransportError};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Owns at most one connected session on top of a platform backend
pub struct BleTransport<B: BleBackend> {
    backend: B,
    config: TransportConfig,
    ctx: Option<Arc<ConnectionContext<B::Peripheral>>>,
    btle: Option<Arc<GattBridge<B::Peripheral>>>,
}

impl<B: BleBackend> BleTransport<B> {
    pub fn new(backend: B, config: TransportConfig) -> Self {
        Self {
            backend,
            config,
            ctx: None,
            btle: None,
        }
    }

    /// Connect to the first peripheral advertising the configured service
    pub fn connect(&mut self, scan_window: Duration) -> Result<(), TransportError> {
        self.connect_matching(scan_window, None)
    }

    /// Connect to the peripheral whose identifier or address matches
    pub fn connect_by_id(
        &mut self,
        identifier: &str,
        scan_window: Duration,
    ) -> Result<(), TransportError> {
        self.connect_matching(scan_window, Some(identifier))
    }

    pub fn is_connected(&self) -> bool {
        self.ctx
            .as_ref()
            .is_some_and(|ctx| ctx.peripheral().is_connected())
    }

    /// Transport interface for the board framework, while a session exists
    pub fn btle(&self) -> Option<Arc<dyn BtleConnection>> {
        self.btle
            .as_ref()
            .map(|bridge| Arc::clone(bridge) as Arc<dyn BtleConnection>)
    }

    /// Identifier of the connected peripheral
    pub fn peripheral_identifier(&self) -> Option<String> {
        self.ctx.as_ref().map(|ctx| ctx.peripheral().identifier())
    }

    fn connect_matching(
        &mut self,
        scan_window: Duration,
        identifier: Option<&str>,
    ) -> Result<(), TransportError> {
        if self.ctx.is_some() {
            info!("Replacing existing session");
            self.disconnect();
        }

        if !self.backend.bluetooth_enabled() {
            warn!("Bluetooth is disabled");
            return Err(TransportError::BluetoothDisabled);
        }
        let adapter = self
            .backend
            .adapters()?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        match identifier {
            Some(id) => info!("Scanning {:?} for device {}", scan_window, id),
            None => info!(
                "Scanning {:?} for service {}",
                scan_window, self.config.service_uuid
            ),
        }
        let peripherals = adapter.scan_for(scan_window)?;
        debug!("Scan found {} peripheral(s)", peripherals.len());

        let mut candidates = 0;
        for peripheral in peripherals {
            if !self.is_candidate(&peripheral, identifier) {
                continue;
            }
            candidates += 1;

            match self.try_connect(peripheral) {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Connection attempt failed: {}", e),
            }
        }

        if candidates == 0 {
            info!("No matching device found");
            Err(TransportError::NoCandidates)
        } else {
            Err(TransportError::ConnectFailed { candidates })
        }
    }

    fn is_candidate(&self, peripheral: &B::Peripheral, identifier: Option<&str>) -> bool {
        if let Some(id) = identifier {
            return iequals(&peripheral.identifier(), id) || iequals(&peripheral.address(), id);
        }

        let services = match peripheral.services() {
            Ok(services) => services,
            Err(e) => {
                debug!(
                    "Skipping {}: could not list services: {}",
                    peripheral.identifier(),
                    e
                );
                return false;
            }
        };

        match services
            .iter()
            .find(|uuid| iequals(uuid, &self.config.service_uuid))
        {
            Some(uuid) => {
                info!(
                    "Found device: {} [{}] with service {}",
                    peripheral.identifier(),
                    peripheral.address(),
                    uuid
                );
                true
            }
            None => false,
        }
    }

    fn try_connect(&mut self, peripheral: B::Peripheral) -> Result<(), BleError> {
        info!("Connecting to {}...", peripheral.identifier());
        peripheral.connect()?;

        // Give the platform stack time to finish the handshake
        thread::sleep(self.config.settle_delay);
        if !peripheral.is_connected() {
            return Err(BleError::NotConnected);
        }

        let ctx = ConnectionContext::new(peripheral);
        ctx.wire_disconnect();
        self.btle = Some(Arc::new(GattBridge::new(&ctx)));
        info!("Connected to {}", ctx.peripheral().identifier());
        self.ctx = Some(ctx);
        Ok(())
    }

    /// Tear down the session, blocking for at most the configured timeout.
    ///
    /// The platform disconnect runs on its own thread; if it does not finish
    /// in time it is left running in the background. The session is released
    /// either way.
    pub fn disconnect(&mut self) {
        self.btle = None;
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        ctx.release();
        if !ctx.peripheral().is_connected() {
            debug!("Session already disconnected");
            return;
        }

        info!("Disconnecting BLE...");
        let (done_tx, done_rx) = mpsc::channel();
        let teardown_ctx = Arc::clone(&ctx);
        let spawned = thread::Builder::new()
            .name("ble-teardown".to_string())
            .spawn(move || {
                if let Err(e) = teardown_ctx.peripheral().disconnect() {
                    warn!("Platform disconnect failed: {}", e);
                }
                let _ = done_tx.send(());
            });
        let teardown = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!("Could not spawn teardown thread: {}", e);
                return;
            }
        };

        let started = Instant::now();
        match done_rx.recv_timeout(self.config.disconnect_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if teardown.join().is_err() {
                    warn!("Teardown thread panicked");
                }
                info!("BLE disconnect complete in {:?}", started.elapsed());
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Disconnect timed out after {:?}, leaving teardown in the background",
                    self.config.disconnect_timeout
                );
            }
        }
    }
}

impl<B: BleBackend> Drop for BleTransport<B> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
