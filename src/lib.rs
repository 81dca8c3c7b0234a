//! # BerryBridge - Vital-Signs Bridge for BerryMed Patient Monitors
//!
//! BerryBridge speaks the proprietary binary frame protocol of BerryMed
//! PM-series bedside monitors over either Bluetooth Low Energy or a USB
//! serial link, decodes vital-sign parameters and waveform samples, and
//! exposes them as a continuously-updated snapshot plus typed event
//! callbacks for a forwarding layer to consume.
//!
//! ## Features
//!
//! - **Dual Transport**: BLE notification stream or USB-CDC serial link
//!   behind one polymorphic handle, selected at construction.
//! - **Resilient Decoding**: incremental framing with checksum validation
//!   and resynchronization over partial, corrupted or misaligned streams.
//! - **Vitals Snapshot**: waveform buffers throttled per wall-clock second
//!   and display-formatted vital signs, readable at any time.
//! - **NIBP Workflow**: timeout-guarded blood-pressure measurement state
//!   machine that can never stay stuck in "measuring".
//! - **Supervised Connections**: automatic reconnect with fixed backoff and
//!   BLE staleness detection, until externally cancelled.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use berrybridge::config::Config;
//! use berrybridge::monitor::PatientMonitor;
//! use berrybridge::protocol::PacketType;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut monitor = PatientMonitor::new(config);
//!
//!     monitor.register_callback(
//!         PacketType::NibpParams,
//!         Box::new(|payload| println!("NIBP packet: {:?}", payload)),
//!     );
//!
//!     monitor.connect().await?;
//!     monitor.start_nibp();
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     println!("{}", serde_json::to_string(&monitor.snapshot())?);
//!     monitor.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`protocol`] - frame model, checksum, incremental decoder, packet
//!   interpretation and the typed callback registry
//! - [`vitals`] - current-vitals snapshot with waveform throttling
//! - [`transport`] - BLE and serial link variants
//! - [`nibp`] - blood-pressure measurement state machine
//! - [`monitor`] - session facade and connection supervisor
//! - [`config`] - configuration management and validation
//! - [`logutil`] - binary-safe log preview helpers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ DeviceTransport │ ← BLE notifications / serial reader thread
//! └─────────────────┘
//!          │ raw chunks
//! ┌─────────────────┐
//! │  FrameDecoder   │ ← resync, checksum validation
//! └─────────────────┘
//!          │ frames
//! ┌─────────────────┐
//! │PacketInterpreter│ ← VitalsState mutation + callbacks + NIBP status
//! └─────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod monitor;
pub mod nibp;
pub mod protocol;
pub mod transport;
pub mod vitals;

pub use monitor::PatientMonitor;
pub use protocol::interpreter::{EventHandler, EventPayload};
pub use protocol::{Frame, PacketType};
pub use vitals::{VitalSigns, VitalsSnapshot};
