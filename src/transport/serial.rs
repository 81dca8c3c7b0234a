//! Serial (USB-CDC) link to the patient monitor.
//!
//! The monitor's USB interface enumerates as a CDC serial port fixed at
//! 115200 baud, 8 data bits, no parity, 1 stop bit. After opening, the
//! device stays silent until the per-channel enable commands are sent; the
//! enable table lives in [`crate::protocol::ENABLE_SEQUENCE`].
//!
//! Port reads block, so a dedicated background thread owns the read side
//! and forwards every chunk into the pipeline channel. The port handle is
//! shared behind a mutex so command writes interleave with the reader's
//! timeout-bounded read calls.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, info, warn};
use serialport::SerialPort;

use super::{ChunkSender, TransportError};
use crate::logutil::hex_snippet;
use crate::protocol::{encode_command, ENABLE_SEQUENCE};

/// Read timeout bounding each blocking port read.
const READ_TIMEOUT: Duration = Duration::from_millis(250);

type SharedPort = Arc<Mutex<Box<dyn SerialPort>>>;

/// Serial transport: `Closed -> Open(reading) -> Closed`.
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    chunk_tx: ChunkSender,
    port: Option<SharedPort>,
    reader: Option<JoinHandle<()>>,
    run: Arc<AtomicBool>,
}

impl SerialTransport {
    pub fn new(port_name: String, baud_rate: u32, chunk_tx: ChunkSender) -> Self {
        Self {
            port_name,
            baud_rate,
            chunk_tx,
            port: None,
            reader: None,
            run: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open the port, enable the device's output channels and start the
    /// background reader. Returns immediately; the reader runs until
    /// [`disconnect`](Self::disconnect).
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        info!(
            "Opening serial port {} at {} baud",
            self.port_name, self.baud_rate
        );

        let builder = serialport::new(self.port_name.as_str(), self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(READ_TIMEOUT);
        let mut port = builder.open().map_err(|e| TransportError::PortOpen {
            port: self.port_name.clone(),
            source: e,
        })?;

        // Drop whatever the device buffered before we attached.
        let mut purge_buf = [0u8; 512];
        if let Ok(available) = port.bytes_to_read() {
            if available > 0 {
                let _ = port.read(&mut purge_buf);
            }
        }

        let shared: SharedPort = Arc::new(Mutex::new(port));
        self.port = Some(shared.clone());
        self.enable_channels()?;

        self.run.store(true, Ordering::SeqCst);
        let run = self.run.clone();
        let chunk_tx = self.chunk_tx.clone();
        let reader = std::thread::Builder::new()
            .name("berrybridge-serial-reader".into())
            .spawn(move || read_loop(shared, chunk_tx, run))?;
        self.reader = Some(reader);

        info!("Serial device connected and reader running");
        Ok(())
    }

    /// Send the channel-enable command set so the monitor starts streaming
    /// parameters and waveforms.
    fn enable_channels(&mut self) -> Result<(), TransportError> {
        for &(cmd, param) in ENABLE_SEQUENCE {
            self.write_frame(&encode_command(cmd, param))?;
        }
        debug!("Enabled {} device output channels", ENABLE_SEQUENCE.len());
        Ok(())
    }

    /// Write one frame; rejected when the port is not open.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_ref().ok_or(TransportError::NotConnected)?;
        let mut guard = port.lock().unwrap();
        guard.write_all(frame)?;
        guard.flush()?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        // The reader clears `run` when it dies on a port error, which is
        // how a mid-session unplug surfaces to the supervisor.
        self.port.is_some() && self.run.load(Ordering::SeqCst)
    }

    /// Signal the reader to exit, join it and close the port.
    pub fn disconnect(&mut self) {
        self.run.store(false, Ordering::SeqCst);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Serial reader thread panicked during shutdown");
            }
        }
        if self.port.take().is_some() {
            info!("Serial device disconnected");
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn read_loop(port: SharedPort, chunk_tx: ChunkSender, run: Arc<AtomicBool>) {
    let mut buf = [0u8; 256];
    while run.load(Ordering::SeqCst) {
        let result = {
            let mut guard = port.lock().unwrap();
            guard.read(&mut buf)
        };
        match result {
            Ok(0) => {}
            Ok(n) => {
                log::trace!("serial chunk {} bytes: {}", n, hex_snippet(&buf[..n], 32));
                if chunk_tx.send(buf[..n].to_vec()).is_err() {
                    debug!("Pipeline channel closed, stopping serial reader");
                    break;
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("Serial read error, stopping reader: {}", e);
                break;
            }
        }
    }
    run.store(false, Ordering::SeqCst);
    debug!("Serial reader thread exited");
}
