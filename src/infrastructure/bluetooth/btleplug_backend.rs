//! btleplug backend (Linux / macOS)
//!
//! btleplug is async; this wraps it in the blocking backend surface by running
//! everything on a private multi-threaded tokio runtime. Notification and
//! disconnect streams are pumped by tasks on that runtime, so callbacks arrive
//! on runtime worker threads.

use crate::infrastructure::bluetooth::backend::{
    BleAdapter, BleBackend, BlePeripheral, DisconnectCallback, NotifyCallback,
};
use crate::infrastructure::bluetooth::error::BleError;
use btleplug::api::{
    Central as _, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

type SharedNotify = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Runtime owned by the backend and shared with its peripherals
struct BackendRuntime {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl BackendRuntime {
    fn new() -> Result<Self, BleError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ble-runtime")
            .enable_all()
            .build()
            .map_err(|e| BleError::Adapter(format!("Failed to start BLE runtime: {}", e)))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
        })
    }

    /// Run `future` to completion from synchronous code.
    ///
    /// Callers on a multi-threaded runtime (including our own callback
    /// threads) are moved off the worker first. A current-thread runtime
    /// cannot give up its thread, so the wait happens on a scoped helper
    /// thread instead.
    fn block_on<F>(&self, future: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        match Handle::try_current().map(|handle| handle.runtime_flavor()) {
            Ok(RuntimeFlavor::CurrentThread) => thread::scope(|scope| {
                scope
                    .spawn(|| self.handle.block_on(future))
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            }),
            Ok(_) => tokio::task::block_in_place(|| self.handle.block_on(future)),
            Err(_) => self.handle.block_on(future),
        }
    }

    fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }
}

impl Drop for BackendRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

pub struct BtleplugBackend {
    runtime: Arc<BackendRuntime>,
    manager: Manager,
}

impl BtleplugBackend {
    pub fn new() -> Result<Self, BleError> {
        let runtime = Arc::new(BackendRuntime::new()?);
        let manager = runtime.block_on(Manager::new())?;
        Ok(Self { runtime, manager })
    }
}

impl BleBackend for BtleplugBackend {
    type Adapter = BtleplugAdapter;
    type Peripheral = BtleplugPeripheral;

    fn bluetooth_enabled(&self) -> bool {
        // btleplug only lists adapters whose stack is reachable
        match self.runtime.block_on(self.manager.adapters()) {
            Ok(adapters) => !adapters.is_empty(),
            Err(e) => {
                warn!("Failed to query Bluetooth adapters: {}", e);
                false
            }
        }
    }

    fn adapters(&self) -> Result<Vec<BtleplugAdapter>, BleError> {
        let adapters = self.runtime.block_on(self.manager.adapters())?;
        Ok(adapters
            .into_iter()
            .map(|adapter| BtleplugAdapter {
                adapter,
                runtime: self.runtime.clone(),
            })
            .collect())
    }
}

pub struct BtleplugAdapter {
    adapter: Adapter,
    runtime: Arc<BackendRuntime>,
}

impl BleAdapter for BtleplugAdapter {
    type Peripheral = BtleplugPeripheral;

    fn scan_for(&self, window: Duration) -> Result<Vec<BtleplugPeripheral>, BleError> {
        self.runtime.block_on(async {
            self.adapter.start_scan(ScanFilter::default()).await?;
            tokio::time::sleep(window).await;
            if let Err(e) = self.adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }

            let mut found = Vec::new();
            for peripheral in self.adapter.peripherals().await? {
                let address = peripheral.address().to_string();
                let (identifier, advertised) = match peripheral.properties().await {
                    Ok(Some(props)) => (
                        props.local_name.unwrap_or_else(|| address.clone()),
                        Some(props.services.iter().map(Uuid::to_string).collect()),
                    ),
                    Ok(None) => (address.clone(), Some(Vec::new())),
                    Err(e) => {
                        debug!("No properties for {}: {}", address, e);
                        (address.clone(), None)
                    }
                };
                found.push(BtleplugPeripheral {
                    peripheral,
                    adapter: self.adapter.clone(),
                    runtime: self.runtime.clone(),
                    identifier,
                    address,
                    advertised,
                    subscriptions: Arc::new(Mutex::new(HashMap::new())),
                    link: Arc::new(LinkState::default()),
                    pumps: Mutex::new(Vec::new()),
                });
            }
            Ok::<_, BleError>(found)
        })
    }
}

/// Disconnect reporting, at most once per connection
#[derive(Default)]
struct LinkState {
    on_disconnected: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
    reported: AtomicBool,
}

impl LinkState {
    fn report(&self) {
        if self.reported.swap(true, Ordering::SeqCst) {
            return;
        }
        let callback = self
            .on_disconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

pub struct BtleplugPeripheral {
    peripheral: Peripheral,
    adapter: Adapter,
    runtime: Arc<BackendRuntime>,
    identifier: String,
    address: String,
    advertised: Option<Vec<String>>,
    subscriptions: Arc<Mutex<HashMap<Uuid, SharedNotify>>>,
    link: Arc<LinkState>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl BtleplugPeripheral {
    fn characteristic(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<Characteristic, BleError> {
        let service_uuid =
            Uuid::parse_str(service).map_err(|_| BleError::InvalidUuid(service.to_string()))?;
        let char_uuid = Uuid::parse_str(characteristic)
            .map_err(|_| BleError::InvalidUuid(characteristic.to_string()))?;

        let characteristics = self.peripheral.characteristics();
        if !characteristics.iter().any(|c| c.service_uuid == service_uuid) {
            return Err(BleError::ServiceNotFound(service.to_string()));
        }
        characteristics
            .into_iter()
            .find(|c| c.service_uuid == service_uuid && c.uuid == char_uuid)
            .ok_or_else(|| BleError::CharacteristicNotFound(characteristic.to_string()))
    }

    /// Start the tasks that forward notifications and watch for the link dropping
    fn start_pumps(&self) -> Result<(), BleError> {
        let mut notifications = self.runtime.block_on(self.peripheral.notifications())?;
        let mut events = self.runtime.block_on(self.adapter.events())?;

        let subscriptions = self.subscriptions.clone();
        let notify_pump = self.runtime.spawn(async move {
            while let Some(notification) = notifications.next().await {
                let callback = subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&notification.uuid)
                    .cloned();
                match callback {
                    Some(callback) => callback(notification.value),
                    None => trace!("Unhandled notification from {}", notification.uuid),
                }
            }
        });

        let id = self.peripheral.id();
        let link = self.link.clone();
        let event_pump = self.runtime.spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(peer) = event {
                    if peer == id {
                        link.report();
                        break;
                    }
                }
            }
        });

        let mut pumps = self.pumps.lock().unwrap_or_else(PoisonError::into_inner);
        pumps.push(notify_pump);
        pumps.push(event_pump);
        Ok(())
    }

    fn stop_pumps(&self) {
        for pump in self
            .pumps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            pump.abort();
        }
    }
}

impl BlePeripheral for BtleplugPeripheral {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    fn services(&self) -> Result<Vec<String>, BleError> {
        self.advertised
            .clone()
            .ok_or_else(|| BleError::Adapter(format!("No advertisement data for {}", self.address)))
    }

    fn connect(&self) -> Result<(), BleError> {
        self.runtime.block_on(self.peripheral.connect())?;
        self.runtime.block_on(self.peripheral.discover_services())?;
        info!(
            "Discovered {} characteristics on {}",
            self.peripheral.characteristics().len(),
            self.identifier
        );

        self.stop_pumps();
        self.link.reported.store(false, Ordering::SeqCst);
        self.start_pumps()
    }

    fn disconnect(&self) -> Result<(), BleError> {
        let result = self.runtime.block_on(self.peripheral.disconnect());
        if result.is_ok() {
            self.link.report();
        }
        self.stop_pumps();
        result?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.runtime
            .block_on(self.peripheral.is_connected())
            .unwrap_or(false)
    }

    fn write_command(
        &self,
        service: &str,
        characteristic: &str,
        data: &[u8],
    ) -> Result<(), BleError> {
        let c = self.characteristic(service, characteristic)?;
        self.runtime
            .block_on(self.peripheral.write(&c, data, WriteType::WithoutResponse))?;
        Ok(())
    }

    fn read(&self, service: &str, characteristic: &str) -> Result<Vec<u8>, BleError> {
        let c = self.characteristic(service, characteristic)?;
        Ok(self.runtime.block_on(self.peripheral.read(&c))?)
    }

    fn notify(
        &self,
        service: &str,
        characteristic: &str,
        callback: NotifyCallback,
    ) -> Result<(), BleError> {
        let c = self.characteristic(service, characteristic)?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(c.uuid, Arc::from(callback));

        if let Err(e) = self.runtime.block_on(self.peripheral.subscribe(&c)) {
            self.subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&c.uuid);
            return Err(e.into());
        }
        Ok(())
    }

    fn set_on_disconnected(&self, callback: DisconnectCallback) {
        *self
            .link
            .on_disconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(callback));
    }
}

impl Drop for BtleplugPeripheral {
    fn drop(&mut self) {
        self.stop_pumps();
    }
}
