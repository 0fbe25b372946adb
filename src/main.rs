use anyhow::Context;
use metawear_btle::domain::models::DISCONNECT_STATUS;
use metawear_btle::infrastructure::logging::init_logger;
use metawear_btle::{BleTransport, PlatformBackend, SettingsService};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let mut settings_service = SettingsService::new()?;
    let _log_guard = init_logger(&settings_service.get().log_settings)?;
    info!(
        "Starting MetaWear BLE transport (settings: {})",
        settings_service.path().display()
    );

    let settings = settings_service.get().clone();
    let backend = PlatformBackend::new().context("Failed to open the Bluetooth stack")?;
    let mut transport = BleTransport::new(backend, settings.transport_config());

    match settings.device_identifier.as_deref() {
        Some(identifier) => transport.connect_by_id(identifier, settings.scan_window())?,
        None => transport.connect(settings.scan_window())?,
    }

    if let Some(identifier) = transport.peripheral_identifier() {
        if let Err(e) = settings_service.set_device_identifier(Some(identifier)) {
            warn!("Failed to remember device: {}", e);
        }
    }

    let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
    if let Some(btle) = transport.btle() {
        btle.on_disconnect(Arc::new(move |status: i32| {
            let _ = disconnect_tx.send(status);
        }));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Ctrl-C received, disconnecting");
            }
            status = disconnect_rx.recv() => {
                info!(
                    "Board disconnected (status {})",
                    status.unwrap_or(DISCONNECT_STATUS)
                );
            }
        }
        Ok::<_, anyhow::Error>(())
    })?;

    transport.disconnect();
    info!("Transport closed");
    Ok(())
}
