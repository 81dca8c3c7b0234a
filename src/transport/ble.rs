//! Bluetooth Low Energy link to the patient monitor.
//!
//! The monitor advertises a name containing the vendor string and exposes a
//! proprietary UART-style service: one notify characteristic streaming frame
//! bytes and one write characteristic accepting command frames.
//!
//! [`connect`](BleTransport::connect) runs the full
//! scan -> connect -> subscribe cycle and retries it on a fixed interval
//! until it succeeds; the caller stops it by cancelling the surrounding
//! task. A connected link that stops producing notifications is detected
//! through [`is_stale`](BleTransport::is_stale) and torn down by the
//! supervisor.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Manager, Peripheral};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use tokio::time::sleep;
use uuid::Uuid;

use super::{ChunkSender, TransportError};
use crate::logutil::hex_snippet;

/// Vendor service carrying both characteristics.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455);
/// Notify characteristic: device -> host frame bytes.
pub const NOTIFY_CHAR_UUID: Uuid = Uuid::from_u128(0x49535343_1e4d_4bd9_ba61_23c647249616);
/// Write characteristic: host -> device command frames.
pub const WRITE_CHAR_UUID: Uuid = Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3);

/// How long one scan window collects advertisements before matching names.
const SCAN_WINDOW: Duration = Duration::from_secs(5);

/// BLE transport:
/// `Disconnected -> Scanning -> Connecting -> Subscribed -> (Stale) -> Disconnected`.
pub struct BleTransport {
    device_name: String,
    retry_interval: Duration,
    chunk_tx: ChunkSender,
    peripheral: Option<Peripheral>,
    write_char: Option<Characteristic>,
    last_rx: Arc<Mutex<Option<Instant>>>,
    notify_task: Option<tokio::task::JoinHandle<()>>,
}

impl BleTransport {
    pub fn new(device_name: String, retry_interval: Duration, chunk_tx: ChunkSender) -> Self {
        Self {
            device_name,
            retry_interval,
            chunk_tx,
            peripheral: None,
            write_char: None,
            last_rx: Arc::new(Mutex::new(None)),
            notify_task: None,
        }
    }

    /// Scan, connect and subscribe; retries indefinitely on a fixed
    /// interval. Only external cancellation makes this return early.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        loop {
            match self.attempt().await {
                Ok(()) => {
                    info!("Connected to {}", self.device_name);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "BLE connection failed ({}), retrying in {}s",
                        e,
                        self.retry_interval.as_secs()
                    );
                    self.disconnect().await;
                    sleep(self.retry_interval).await;
                }
            }
        }
    }

    async fn attempt(&mut self) -> Result<(), TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        info!("Scanning for '{}' device...", self.device_name);
        adapter.start_scan(ScanFilter::default()).await?;
        sleep(SCAN_WINDOW).await;
        let peripherals = adapter.peripherals().await?;
        let _ = adapter.stop_scan().await;

        let mut found = None;
        for peripheral in peripherals {
            if let Ok(Some(props)) = peripheral.properties().await {
                let matches = props
                    .local_name
                    .as_deref()
                    .map_or(false, |name| name.contains(&self.device_name));
                if matches {
                    info!(
                        "Found {} at {}",
                        props.local_name.as_deref().unwrap_or("?"),
                        props.address
                    );
                    found = Some(peripheral);
                    break;
                }
            }
        }
        let peripheral =
            found.ok_or_else(|| TransportError::DeviceNotFound(self.device_name.clone()))?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        // The monitor drops an immediate subscribe right after connect.
        sleep(Duration::from_secs(1)).await;

        let characteristics = peripheral.characteristics();
        let notify_char = characteristics
            .iter()
            .find(|c| c.service_uuid == SERVICE_UUID && c.uuid == NOTIFY_CHAR_UUID)
            .cloned()
            .ok_or(TransportError::CharacteristicMissing(NOTIFY_CHAR_UUID))?;
        self.write_char = characteristics
            .iter()
            .find(|c| c.service_uuid == SERVICE_UUID && c.uuid == WRITE_CHAR_UUID)
            .cloned();
        if self.write_char.is_none() {
            warn!("Write characteristic missing; outbound commands will be dropped");
        }

        let mut notifications = peripheral.notifications().await?;
        peripheral.subscribe(&notify_char).await?;
        *self.last_rx.lock().unwrap() = Some(Instant::now());

        let chunk_tx = self.chunk_tx.clone();
        let last_rx = self.last_rx.clone();
        self.notify_task = Some(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != NOTIFY_CHAR_UUID {
                    continue;
                }
                log::trace!(
                    "ble chunk {} bytes: {}",
                    notification.value.len(),
                    hex_snippet(&notification.value, 32)
                );
                *last_rx.lock().unwrap() = Some(Instant::now());
                if chunk_tx.send(notification.value).is_err() {
                    debug!("Pipeline channel closed, stopping BLE notifications");
                    break;
                }
            }
            debug!("BLE notification stream ended");
        }));

        self.peripheral = Some(peripheral);
        Ok(())
    }

    /// Write one frame to the command characteristic; no-op error when the
    /// link is down.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let (peripheral, write_char) = match (&self.peripheral, &self.write_char) {
            (Some(p), Some(c)) => (p, c),
            _ => return Err(TransportError::NotConnected),
        };
        peripheral
            .write(write_char, frame, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.peripheral.is_some()
    }

    /// No notification bytes within `threshold` while nominally connected.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        if self.peripheral.is_none() {
            return false;
        }
        match *self.last_rx.lock().unwrap() {
            Some(at) => at.elapsed() > threshold,
            None => false,
        }
    }

    /// Tear the link down and forget the peripheral.
    pub async fn disconnect(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        self.write_char = None;
        *self.last_rx.lock().unwrap() = None;
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = peripheral.disconnect().await {
                debug!("BLE disconnect: {}", e);
            }
            info!("Disconnected from {}", self.device_name);
        }
    }
}
