//! # Device Transports
//!
//! Physical link ownership for the patient monitor. Two variants speak the
//! same frame protocol:
//!
//! - **BLE** ([`ble::BleTransport`]) - scans for the advertising monitor,
//!   subscribes to its notify characteristic and forwards notification
//!   payloads verbatim.
//! - **Serial** ([`serial::SerialTransport`]) - opens the USB-CDC port at
//!   115200 8N1, enables the device's output channels and runs a dedicated
//!   background reader thread for the blocking port reads.
//!
//! Both feed raw byte chunks into an unbounded channel drained by the single
//! decode pipeline task, so frames reach the interpreter in production
//! order. Callers hold the polymorphic [`DeviceTransport`] handle and only
//! branch on the concrete variant at construction time.

#[cfg(feature = "ble")]
pub mod ble;
#[cfg(feature = "serial")]
pub mod serial;

#[cfg(not(any(feature = "ble", feature = "serial")))]
compile_error!("berrybridge needs at least one transport feature: `ble` or `serial`");

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{Config, ConnectionKind};

/// Sender half of the raw-chunk channel toward the decode pipeline.
pub type ChunkSender = mpsc::UnboundedSender<Vec<u8>>;
/// Receiver half drained by the pipeline consumer task.
pub type ChunkReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Errors raised while opening or driving a physical link.
#[derive(Debug, Error)]
pub enum TransportError {
    #[cfg(feature = "serial")]
    #[error("failed to open serial port {port}: {source}")]
    PortOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[cfg(feature = "ble")]
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[cfg(feature = "ble")]
    #[error("no bluetooth adapter available")]
    NoAdapter,

    #[cfg(feature = "ble")]
    #[error("no advertising device matching '{0}' found")]
    DeviceNotFound(String),

    #[cfg(feature = "ble")]
    #[error("characteristic {0} missing on device")]
    CharacteristicMissing(uuid::Uuid),

    #[error("transport not connected")]
    NotConnected,

    #[error("transport '{0}' not compiled into this build")]
    NotCompiled(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Polymorphic handle over the active link variant.
pub enum DeviceTransport {
    #[cfg(feature = "ble")]
    Ble(ble::BleTransport),
    #[cfg(feature = "serial")]
    Serial(serial::SerialTransport),
}

impl DeviceTransport {
    /// Build the transport selected by the configuration. This is the only
    /// place that branches on the concrete link type.
    pub fn from_config(config: &Config, chunk_tx: ChunkSender) -> Result<Self, TransportError> {
        match config.device.connection {
            ConnectionKind::Ble => {
                #[cfg(feature = "ble")]
                {
                    Ok(DeviceTransport::Ble(ble::BleTransport::new(
                        config.device.ble_name.clone(),
                        config.monitor.reconnect_interval(),
                        chunk_tx,
                    )))
                }
                #[cfg(not(feature = "ble"))]
                {
                    let _ = chunk_tx;
                    Err(TransportError::NotCompiled("ble"))
                }
            }
            ConnectionKind::Serial => {
                #[cfg(feature = "serial")]
                {
                    Ok(DeviceTransport::Serial(serial::SerialTransport::new(
                        config.device.port.clone(),
                        config.device.baud_rate,
                        chunk_tx,
                    )))
                }
                #[cfg(not(feature = "serial"))]
                {
                    let _ = chunk_tx;
                    Err(TransportError::NotCompiled("serial"))
                }
            }
        }
    }

    /// Bring the link up.
    ///
    /// The BLE variant retries scan/connect cycles internally and only
    /// returns once subscribed (or the task is cancelled from outside); the
    /// serial variant reports open failures to the caller immediately.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        match self {
            #[cfg(feature = "ble")]
            DeviceTransport::Ble(t) => t.connect().await,
            #[cfg(feature = "serial")]
            DeviceTransport::Serial(t) => t.connect().await,
        }
    }

    /// Queue one encoded command frame onto the wire.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        match self {
            #[cfg(feature = "ble")]
            DeviceTransport::Ble(t) => t.write_frame(frame).await,
            #[cfg(feature = "serial")]
            DeviceTransport::Serial(t) => t.write_frame(frame),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            #[cfg(feature = "ble")]
            DeviceTransport::Ble(t) => t.is_connected(),
            #[cfg(feature = "serial")]
            DeviceTransport::Serial(t) => t.is_connected(),
        }
    }

    /// True when the link is nominally up but has produced no bytes within
    /// `threshold`. Only the BLE link goes silently stale; the serial reader
    /// surfaces death through `is_connected` instead.
    pub fn is_stale(&self, threshold: std::time::Duration) -> bool {
        match self {
            #[cfg(feature = "ble")]
            DeviceTransport::Ble(t) => t.is_stale(threshold),
            #[cfg(feature = "serial")]
            DeviceTransport::Serial(_) => false,
        }
    }

    /// Tear the link down: stop and join readers, close the handle.
    pub async fn disconnect(&mut self) {
        match self {
            #[cfg(feature = "ble")]
            DeviceTransport::Ble(t) => t.disconnect().await,
            #[cfg(feature = "serial")]
            DeviceTransport::Serial(t) => t.disconnect(),
        }
    }
}
