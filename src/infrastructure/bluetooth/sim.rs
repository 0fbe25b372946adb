//! Scripted in-memory backend for tests

use crate::domain::uuid::iequals;
use crate::infrastructure::bluetooth::backend::{
    BleAdapter, BleBackend, BlePeripheral, DisconnectCallback, NotifyCallback,
};
use crate::infrastructure::bluetooth::error::BleError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type SharedNotify = Arc<dyn Fn(Vec<u8>) + Send + Sync>;
type SharedDisconnect = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    Fail,
    /// `connect()` returns but the link never comes up
    NeverConnects,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectBehavior {
    Succeed,
    Fail,
    Hang(Duration),
}

struct SimState {
    identifier: String,
    address: String,
    services: Mutex<Option<Vec<String>>>,
    connect: Mutex<ConnectBehavior>,
    disconnect: Mutex<DisconnectBehavior>,
    connected: AtomicBool,
    read_value: Mutex<Option<Vec<u8>>>,
    write_fails: AtomicBool,
    notify_fails: AtomicBool,
    writes: Mutex<Vec<(String, String, Vec<u8>)>>,
    subscriptions: Mutex<Vec<(String, String, SharedNotify)>>,
    on_disconnected: Mutex<Option<SharedDisconnect>>,
    connect_attempts: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

#[derive(Clone)]
pub struct SimPeripheral {
    state: Arc<SimState>,
}

impl SimPeripheral {
    pub fn new(identifier: &str) -> Self {
        Self {
            state: Arc::new(SimState {
                identifier: identifier.to_string(),
                address: format!("sim:{}", identifier),
                services: Mutex::new(Some(Vec::new())),
                connect: Mutex::new(ConnectBehavior::Succeed),
                disconnect: Mutex::new(DisconnectBehavior::Succeed),
                connected: AtomicBool::new(false),
                read_value: Mutex::new(Some(Vec::new())),
                write_fails: AtomicBool::new(false),
                notify_fails: AtomicBool::new(false),
                writes: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                on_disconnected: Mutex::new(None),
                connect_attempts: AtomicUsize::new(0),
                disconnect_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_services(self, services: &[&str]) -> Self {
        *self.state.services.lock().unwrap() =
            Some(services.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn failing_services(self) -> Self {
        *self.state.services.lock().unwrap() = None;
        self
    }

    pub fn with_connect(self, behavior: ConnectBehavior) -> Self {
        *self.state.connect.lock().unwrap() = behavior;
        self
    }

    pub fn with_disconnect(self, behavior: DisconnectBehavior) -> Self {
        *self.state.disconnect.lock().unwrap() = behavior;
        self
    }

    pub fn with_read(self, value: Option<Vec<u8>>) -> Self {
        *self.state.read_value.lock().unwrap() = value;
        self
    }

    pub fn failing_writes(self) -> Self {
        self.state.write_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_notify(self) -> Self {
        self.state.notify_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(String, String, Vec<u8>)> {
        self.state.writes.lock().unwrap().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.state.subscriptions.lock().unwrap().len()
    }

    /// Deliver a notification to every subscriber of `characteristic`
    pub fn emit_notification(&self, characteristic: &str, bytes: &[u8]) {
        let targets: Vec<SharedNotify> = self
            .state
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, chr, _)| iequals(chr, characteristic))
            .map(|(_, _, cb)| cb.clone())
            .collect();
        for cb in targets {
            cb(bytes.to_vec());
        }
    }

    /// Simulate the remote end dropping the link
    pub fn drop_link(&self) {
        if self.state.connected.swap(false, Ordering::SeqCst) {
            self.fire_disconnected();
        }
    }

    fn fire_disconnected(&self) {
        let callback = self.state.on_disconnected.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl BlePeripheral for SimPeripheral {
    fn identifier(&self) -> String {
        self.state.identifier.clone()
    }

    fn address(&self) -> String {
        self.state.address.clone()
    }

    fn services(&self) -> Result<Vec<String>, BleError> {
        self.state
            .services
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BleError::Gatt("service enumeration failed".to_string()))
    }

    fn connect(&self) -> Result<(), BleError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        match *self.state.connect.lock().unwrap() {
            ConnectBehavior::Succeed => {
                self.state.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            ConnectBehavior::Fail => Err(BleError::Gatt("connection refused".to_string())),
            ConnectBehavior::NeverConnects => Ok(()),
        }
    }

    fn disconnect(&self) -> Result<(), BleError> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.state.disconnect.lock().unwrap();
        match behavior {
            DisconnectBehavior::Succeed => {
                self.drop_link();
                Ok(())
            }
            DisconnectBehavior::Fail => Err(BleError::Gatt("disconnect refused".to_string())),
            DisconnectBehavior::Hang(duration) => {
                thread::sleep(duration);
                self.drop_link();
                Ok(())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn write_command(
        &self,
        service: &str,
        characteristic: &str,
        data: &[u8],
    ) -> Result<(), BleError> {
        if self.state.write_fails.load(Ordering::SeqCst) {
            return Err(BleError::Gatt("write failed".to_string()));
        }
        self.state.writes.lock().unwrap().push((
            service.to_string(),
            characteristic.to_string(),
            data.to_vec(),
        ));
        Ok(())
    }

    fn read(&self, _service: &str, characteristic: &str) -> Result<Vec<u8>, BleError> {
        self.state
            .read_value
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BleError::CharacteristicNotFound(characteristic.to_string()))
    }

    fn notify(
        &self,
        service: &str,
        characteristic: &str,
        callback: NotifyCallback,
    ) -> Result<(), BleError> {
        if self.state.notify_fails.load(Ordering::SeqCst) {
            return Err(BleError::Gatt("subscribe failed".to_string()));
        }
        self.state.subscriptions.lock().unwrap().push((
            service.to_string(),
            characteristic.to_string(),
            Arc::from(callback),
        ));
        Ok(())
    }

    fn set_on_disconnected(&self, callback: DisconnectCallback) {
        *self.state.on_disconnected.lock().unwrap() = Some(Arc::from(callback));
    }
}

pub struct SimAdapter {
    peripherals: Vec<SimPeripheral>,
}

impl BleAdapter for SimAdapter {
    type Peripheral = SimPeripheral;

    fn scan_for(&self, _window: Duration) -> Result<Vec<SimPeripheral>, BleError> {
        Ok(self.peripherals.clone())
    }
}

pub struct SimBackend {
    pub enabled: bool,
    pub adapter_count: usize,
    pub peripherals: Vec<SimPeripheral>,
}

impl SimBackend {
    pub fn new(peripherals: Vec<SimPeripheral>) -> Self {
        Self {
            enabled: true,
            adapter_count: 1,
            peripherals,
        }
    }
}

impl BleBackend for SimBackend {
    type Adapter = SimAdapter;
    type Peripheral = SimPeripheral;

    fn bluetooth_enabled(&self) -> bool {
        self.enabled
    }

    fn adapters(&self) -> Result<Vec<SimAdapter>, BleError> {
        Ok((0..self.adapter_count)
            .map(|_| SimAdapter {
                peripherals: self.peripherals.clone(),
            })
            .collect())
    }
}
