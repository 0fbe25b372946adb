//! WinRT backend (Windows)
//!
//! Blocking wrapper over `Windows.Devices.Bluetooth`. Async WinRT operations
//! are joined on the calling thread; WinRT delivers events on its own thread
//! pool.

use crate::domain::uuid::{iequals, parse_uuid128, uuid128};
use crate::infrastructure::bluetooth::backend::{
    BleAdapter, BleBackend, BlePeripheral, DisconnectCallback, NotifyCallback,
};
use crate::infrastructure::bluetooth::error::BleError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use windows::core::{Ref, GUID};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattSession, GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Devices::Radios::RadioState;
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

/// Parse a dashed UUID string into a Windows GUID
fn parse_guid(uuid_str: &str) -> Result<GUID, BleError> {
    let (high, low) =
        parse_uuid128(uuid_str).ok_or_else(|| BleError::InvalidUuid(uuid_str.to_string()))?;
    Ok(GUID::from_u128(((high as u128) << 64) | low as u128))
}

fn guid_to_string(guid: GUID) -> String {
    let value = guid.to_u128();
    uuid128((value >> 64) as u64, value as u64)
}

fn format_address(address: u64) -> String {
    (0..6)
        .rev()
        .map(|i| format!("{:02X}", (address >> (i * 8)) & 0xff))
        .collect::<Vec<_>>()
        .join(":")
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

pub struct WinrtBackend;

impl WinrtBackend {
    pub fn new() -> Result<Self, BleError> {
        Ok(Self)
    }
}

impl BleBackend for WinrtBackend {
    type Adapter = WinrtAdapter;
    type Peripheral = WinrtPeripheral;

    fn bluetooth_enabled(&self) -> bool {
        let radio_on = || -> windows::core::Result<bool> {
            let adapter = BluetoothAdapter::GetDefaultAsync()?.join()?;
            let radio = adapter.GetRadioAsync()?.join()?;
            Ok(radio.State()? == RadioState::On)
        };
        match radio_on() {
            Ok(on) => on,
            Err(e) => {
                warn!("Failed to query Bluetooth radio: {:?}", e);
                false
            }
        }
    }

    fn adapters(&self) -> Result<Vec<WinrtAdapter>, BleError> {
        match BluetoothAdapter::GetDefaultAsync()?.join() {
            Ok(adapter) => {
                debug!("Default adapter: {:#X}", adapter.BluetoothAddress()?);
                Ok(vec![WinrtAdapter])
            }
            Err(e) => {
                debug!("No default Bluetooth adapter: {:?}", e);
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Default)]
struct Advertisement {
    name: String,
    services: Vec<String>,
}

pub struct WinrtAdapter;

impl BleAdapter for WinrtAdapter {
    type Peripheral = WinrtPeripheral;

    fn scan_for(&self, window: Duration) -> Result<Vec<WinrtPeripheral>, BleError> {
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let seen: Arc<Mutex<HashMap<u64, Advertisement>>> = Arc::new(Mutex::new(HashMap::new()));
        let sink = seen.clone();
        let handler = TypedEventHandler::new(
            move |_: Ref<BluetoothLEAdvertisementWatcher>,
                  args: Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let address = args.BluetoothAddress()?;
                    let name = adv.LocalName()?.to_string();
                    let uuids = adv.ServiceUuids()?;

                    let mut services = Vec::new();
                    for i in 0..uuids.Size()? {
                        services.push(guid_to_string(uuids.GetAt(i)?));
                    }

                    let mut seen = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    let entry = seen.entry(address).or_default();
                    if !name.is_empty() {
                        entry.name = name;
                    }
                    for uuid in services {
                        if !entry.services.iter().any(|known| iequals(known, &uuid)) {
                            entry.services.push(uuid);
                        }
                    }
                }
                Ok(())
            },
        );

        let token = watcher.Received(&handler)?;
        watcher.Start()?;
        thread::sleep(window);
        watcher.Stop()?;
        watcher.RemoveReceived(token)?;

        let seen = std::mem::take(&mut *seen.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(seen
            .into_iter()
            .map(|(address, adv)| WinrtPeripheral::new(address, adv))
            .collect())
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

pub struct WinrtPeripheral {
    address: u64,
    name: String,
    advertised: Vec<String>,
    device: Mutex<Option<BluetoothLEDevice>>,
    session: Mutex<Option<GattSession>>,
    status_token: Mutex<Option<i64>>,
    // Subscribed characteristics must stay alive for ValueChanged to keep firing
    subscribed: Mutex<Vec<GattCharacteristic>>,
    link: Arc<LinkState>,
}

impl WinrtPeripheral {
    fn new(address: u64, adv: Advertisement) -> Self {
        Self {
            address,
            name: adv.name,
            advertised: adv.services,
            device: Mutex::new(None),
            session: Mutex::new(None),
            status_token: Mutex::new(None),
            subscribed: Mutex::new(Vec::new()),
            link: Arc::new(LinkState::default()),
        }
    }

    fn device(&self) -> Result<BluetoothLEDevice, BleError> {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(BleError::NotConnected)
    }

    fn characteristic(
        &self,
        service: &str,
        characteristic: &str,
    ) -> Result<GattCharacteristic, BleError> {
        let device = self.device()?;
        let service_uuid = parse_guid(service)?;
        let char_uuid = parse_guid(characteristic)?;

        let services_result = device.GetGattServicesForUuidAsync(service_uuid)?.join()?;
        if services_result.Status()? != GattCommunicationStatus::Success {
            return Err(BleError::Gatt(format!(
                "Failed to get GATT services: {:?}",
                services_result.Status()?
            )));
        }
        let services = services_result.Services()?;
        if services.Size()? == 0 {
            return Err(BleError::ServiceNotFound(service.to_string()));
        }
        let gatt_service = services.GetAt(0)?;

        let chars_result = gatt_service
            .GetCharacteristicsForUuidAsync(char_uuid)?
            .join()?;
        if chars_result.Status()? != GattCommunicationStatus::Success {
            return Err(BleError::Gatt(format!(
                "Failed to get characteristics: {:?}",
                chars_result.Status()?
            )));
        }
        let characteristics = chars_result.Characteristics()?;
        if characteristics.Size()? == 0 {
            return Err(BleError::CharacteristicNotFound(characteristic.to_string()));
        }
        Ok(characteristics.GetAt(0)?)
    }
}

impl BlePeripheral for WinrtPeripheral {
    fn identifier(&self) -> String {
        if self.name.is_empty() {
            format_address(self.address)
        } else {
            self.name.clone()
        }
    }

    fn address(&self) -> String {
        format_address(self.address)
    }

    fn services(&self) -> Result<Vec<String>, BleError> {
        Ok(self.advertised.clone())
    }

    fn connect(&self) -> Result<(), BleError> {
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(self.address)?.join()?;
        info!("Device opened: {:?}", device.Name()?);

        // Keep the link up between GATT operations
        match GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.join() {
            Ok(session) => {
                session.SetMaintainConnection(true)?;
                *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session);
            }
            Err(e) => warn!("Failed to create GattSession, continuing anyway: {:?}", e),
        }

        // Service discovery forces the connection
        let services = device
            .GetGattServicesWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .join()?;
        if services.Status()? != GattCommunicationStatus::Success {
            return Err(BleError::Gatt(format!(
                "Service discovery failed: {:?}",
                services.Status()?
            )));
        }

        self.link.reported.store(false, Ordering::SeqCst);
        let link = self.link.clone();
        let token = device.ConnectionStatusChanged(&TypedEventHandler::new(
            move |dev: Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                        link.report();
                    }
                }
                Ok(())
            },
        ))?;

        *self.status_token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
        *self.device.lock().unwrap_or_else(PoisonError::into_inner) = Some(device);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), BleError> {
        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if let Some(session) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = session.Close();
        }

        let device = self
            .device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let token = self
            .status_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(device) = device {
            if let Some(token) = token {
                let _ = device.RemoveConnectionStatusChanged(token);
            }
            device.Close()?;
        }

        // Closing the device does not always raise ConnectionStatusChanged
        self.link.report();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|d| d.ConnectionStatus().ok())
            .map(|s| s == BluetoothConnectionStatus::Connected)
            .unwrap_or(false)
    }

    fn write_command(
        &self,
        service: &str,
        characteristic: &str,
        data: &[u8],
    ) -> Result<(), BleError> {
        let c = self.characteristic(service, characteristic)?;
        let writer = DataWriter::new()?;
        writer.WriteBytes(data)?;
        let buffer = writer.DetachBuffer()?;

        // Fire-and-forget write
        let _ = c.WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithoutResponse)?;
        Ok(())
    }

    fn read(&self, service: &str, characteristic: &str) -> Result<Vec<u8>, BleError> {
        let c = self.characteristic(service, characteristic)?;
        let result = c
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .join()?;
        if result.Status()? != GattCommunicationStatus::Success {
            return Err(BleError::Gatt(format!(
                "Read returned status {:?}",
                result.Status()?
            )));
        }
        Ok(read_buffer(&result.Value()?)?)
    }

    fn notify(
        &self,
        service: &str,
        characteristic: &str,
        callback: NotifyCallback,
    ) -> Result<(), BleError> {
        let c = self.characteristic(service, characteristic)?;

        let handler = TypedEventHandler::new(
            move |_: Ref<GattCharacteristic>, args: Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let value = args.CharacteristicValue()?;
                    callback(read_buffer(&value)?);
                }
                Ok(())
            },
        );
        c.ValueChanged(&handler)?;

        let status = c
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .join()?;
        if status != GattCommunicationStatus::Success {
            return Err(BleError::Gatt(format!(
                "Notification subscription returned status: {:?}",
                status
            )));
        }

        self.subscribed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(c);
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
