//! # Patient Monitor Core
//!
//! [`PatientMonitor`] is the orchestrator the forwarding layer talks to. It
//! wires the transport, the decode pipeline and the NIBP workflow together
//! and exposes the narrow collaborator interface: register a handler for a
//! packet type, read the current vitals snapshot, start a blood-pressure
//! measurement, connect, disconnect.
//!
//! ## Task layout
//!
//! ```text
//! transport reader ──chunks──▶ pipeline task ──▶ FrameDecoder
//!   (thread / BLE)                                │ frames
//!                                                 ▼
//!                              PacketInterpreter ──▶ VitalsState + callbacks
//!                                                 │ NIBP status bytes
//!                                                 ▼
//! command queue ◀──────────────────────────── NibpWorkflow
//!      │
//!      ▼
//! ConnectionSupervisor (owns the transport: writes commands, checks
//! liveness, reconnects with a fixed delay until shutdown)
//! ```
//!
//! Frames are applied in production order: one pipeline task is the only
//! consumer of the chunk channel and the only writer of the vitals state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::Config;
use crate::nibp::NibpWorkflow;
use crate::protocol::decoder::FrameDecoder;
use crate::protocol::interpreter::{EventHandler, EventPayload, PacketInterpreter};
use crate::protocol::PacketType;
use crate::transport::{ChunkReceiver, DeviceTransport};
use crate::vitals::{VitalsSnapshot, VitalsState};

type CommandReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

/// Retry/liveness loop owning the transport for the life of a session.
///
/// Commands from the queue are written out as long as the link is up; a
/// dead or stale link tears the NIBP session down and re-runs `connect()`
/// after the configured delay, indefinitely, until shutdown.
struct ConnectionSupervisor {
    transport: DeviceTransport,
    command_rx: CommandReceiver,
    link_up: Arc<AtomicBool>,
    nibp: Arc<Mutex<NibpWorkflow>>,
    reconnect_interval: std::time::Duration,
    stale_after: std::time::Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionSupervisor {
    /// Drive the session; returns the command receiver for reuse by a later
    /// session once shut down.
    async fn run(mut self) -> CommandReceiver {
        let mut liveness = tokio::time::interval(std::time::Duration::from_secs(1));
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        'session: loop {
            // Link is up on entry; pump commands and watch liveness.
            loop {
                tokio::select! {
                    _ = self.shutdown_rx.changed() => break 'session,
                    cmd = self.command_rx.recv() => match cmd {
                        Some(frame) => {
                            if let Err(e) = self.transport.write_frame(&frame).await {
                                warn!("Dropping outbound command, link not writable: {}", e);
                            }
                        }
                        None => break 'session,
                    },
                    _ = liveness.tick() => {
                        if !self.transport.is_connected() {
                            warn!("Device link lost, scheduling reconnect");
                            break;
                        }
                        if self.transport.is_stale(self.stale_after) {
                            warn!(
                                "No data from device for {}s, treating link as stale",
                                self.stale_after.as_secs()
                            );
                            break;
                        }
                    }
                }
            }

            // Recovery: any in-flight measurement must not survive the link.
            self.link_up.store(false, Ordering::SeqCst);
            self.nibp.lock().unwrap().stop();
            self.transport.disconnect().await;

            loop {
                tokio::select! {
                    _ = self.shutdown_rx.changed() => break 'session,
                    _ = tokio::time::sleep(self.reconnect_interval) => {}
                }
                let connected = tokio::select! {
                    _ = self.shutdown_rx.changed() => break 'session,
                    result = self.transport.connect() => result,
                };
                match connected {
                    Ok(()) => {
                        self.link_up.store(true, Ordering::SeqCst);
                        info!("Device link re-established");
                        continue 'session;
                    }
                    Err(e) => warn!(
                        "Reconnect failed ({}), retrying in {}s",
                        e,
                        self.reconnect_interval.as_secs()
                    ),
                }
            }
        }

        self.link_up.store(false, Ordering::SeqCst);
        self.nibp.lock().unwrap().stop();
        self.transport.disconnect().await;
        debug!("Connection supervisor exited");
        self.command_rx
    }
}

/// One monitoring session against one physical device.
pub struct PatientMonitor {
    config: Config,
    vitals: Arc<Mutex<VitalsState>>,
    /// Present while idle; moves into the pipeline task for the duration of
    /// a session and comes back on disconnect.
    interpreter: Option<PacketInterpreter>,
    nibp: Arc<Mutex<NibpWorkflow>>,
    link_up: Arc<AtomicBool>,
    command_rx: Option<CommandReceiver>,
    shutdown_tx: watch::Sender<bool>,
    supervisor: Option<JoinHandle<CommandReceiver>>,
    pipeline: Option<JoinHandle<PacketInterpreter>>,
}

impl PatientMonitor {
    pub fn new(config: Config) -> Self {
        let vitals = Arc::new(Mutex::new(VitalsState::new()));
        let link_up = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let nibp = Arc::new(Mutex::new(NibpWorkflow::new(
            command_tx,
            link_up.clone(),
            config.monitor.nibp_timeout(),
        )));
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            vitals: vitals.clone(),
            interpreter: Some(PacketInterpreter::new(vitals)),
            nibp,
            link_up,
            command_rx: Some(command_rx),
            shutdown_tx,
            supervisor: None,
            pipeline: None,
            config,
        }
    }

    /// Install a handler fired on every decoded packet of `packet_type`.
    /// Must be called before [`connect`](Self::connect).
    pub fn register_callback(&mut self, packet_type: PacketType, handler: EventHandler) {
        match &mut self.interpreter {
            Some(interpreter) => interpreter.register(packet_type, handler),
            None => warn!("Cannot register callbacks while a session is running"),
        }
    }

    /// Immutable copy of the current vitals.
    pub fn snapshot(&self) -> VitalsSnapshot {
        self.vitals.lock().unwrap().snapshot()
    }

    pub fn is_connected(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    /// Request an NIBP measurement; see [`NibpWorkflow::start`].
    pub fn start_nibp(&self) -> bool {
        self.nibp.lock().unwrap().start()
    }

    /// Administratively abort any in-flight NIBP measurement.
    pub fn stop_nibp(&self) {
        self.nibp.lock().unwrap().stop();
    }

    /// Bring the session up: build the configured transport, run its first
    /// `connect()`, then start the decode pipeline and the supervisor.
    ///
    /// For the BLE transport this call scans until the device appears; for
    /// serial it returns the open error straight away and the caller decides
    /// whether to retry.
    pub async fn connect(&mut self) -> Result<()> {
        if self.supervisor.is_some() {
            bail!("session already running");
        }
        let interpreter = match self.interpreter.take() {
            Some(i) => i,
            None => bail!("session already running"),
        };
        let command_rx = match self.command_rx.take() {
            Some(rx) => rx,
            None => bail!("session already running"),
        };

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let mut transport = DeviceTransport::from_config(&self.config, chunk_tx)?;
        if let Err(e) = transport.connect().await {
            // Put the pieces back so the caller can retry later.
            self.interpreter = Some(interpreter);
            self.command_rx = Some(command_rx);
            return Err(e.into());
        }
        self.link_up.store(true, Ordering::SeqCst);

        self.shutdown_tx.send_replace(false);
        self.pipeline = Some(tokio::spawn(run_pipeline(
            interpreter,
            chunk_rx,
            self.nibp.clone(),
        )));
        let supervisor = ConnectionSupervisor {
            transport,
            command_rx,
            link_up: self.link_up.clone(),
            nibp: self.nibp.clone(),
            reconnect_interval: self.config.monitor.reconnect_interval(),
            stale_after: self.config.monitor.stale_after(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };
        self.supervisor = Some(tokio::spawn(supervisor.run()));
        info!("Monitoring session started");
        Ok(())
    }

    /// Tear the session down: stop and join the transport reader, cancel the
    /// NIBP watcher, close the physical handle and reset the vitals state.
    /// Safe to call when no session is running.
    pub async fn disconnect(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(supervisor) = self.supervisor.take() {
            match supervisor.await {
                // The supervisor closed the transport, which ends the chunk
                // channel and lets the pipeline drain out on its own.
                Ok(command_rx) => self.command_rx = Some(command_rx),
                Err(e) => warn!("Supervisor task failed during shutdown: {}", e),
            }
        }
        self.nibp.lock().unwrap().stop();
        if let Some(pipeline) = self.pipeline.take() {
            match pipeline.await {
                Ok(interpreter) => self.interpreter = Some(interpreter),
                Err(e) => warn!("Pipeline task failed during shutdown: {}", e),
            }
        }
        self.vitals.lock().unwrap().reset();
        info!("Monitoring session stopped");
    }
}

/// Single consumer of the raw-chunk channel: decode, interpret, hand NIBP
/// status bytes to the workflow. Exits when every chunk sender is gone and
/// returns the interpreter for the next session.
async fn run_pipeline(
    mut interpreter: PacketInterpreter,
    mut chunk_rx: ChunkReceiver,
    nibp: Arc<Mutex<NibpWorkflow>>,
) -> PacketInterpreter {
    let mut decoder = FrameDecoder::new();
    while let Some(chunk) = chunk_rx.recv().await {
        for frame in decoder.feed(&chunk) {
            if let Some((PacketType::NibpParams, EventPayload::Nibp { states, .. })) =
                interpreter.apply(&frame)
            {
                nibp.lock().unwrap().on_nibp_packet(states);
            }
        }
    }
    debug!("Decode pipeline drained");
    interpreter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::encode_frame;

    #[tokio::test]
    async fn pipeline_decodes_chunks_into_vitals() {
        let vitals = Arc::new(Mutex::new(VitalsState::new()));
        let interpreter = PacketInterpreter::new(vitals.clone());
        let (command_tx, _command_rx) = mpsc::unbounded_channel();
        let nibp = Arc::new(Mutex::new(NibpWorkflow::new(
            command_tx,
            Arc::new(AtomicBool::new(true)),
            crate::nibp::DEFAULT_TIMEOUT,
        )));
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_pipeline(interpreter, chunk_rx, nibp));

        // Deliver an ECG params frame split across two chunks.
        let wire = encode_frame(0x02, &[0x48, 0x32, 0x1E]);
        chunk_tx.send(wire[..3].to_vec()).unwrap();
        chunk_tx.send(wire[3..].to_vec()).unwrap();
        drop(chunk_tx);
        handle.await.unwrap();

        let signs = vitals.lock().unwrap().snapshot().vital_signs;
        assert_eq!(signs.heart_rate, "50");
        assert_eq!(signs.resp_rate, "30");
    }

    #[tokio::test]
    async fn pipeline_feeds_nibp_workflow() {
        let vitals = Arc::new(Mutex::new(VitalsState::new()));
        let interpreter = PacketInterpreter::new(vitals);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let link_up = Arc::new(AtomicBool::new(true));
        let nibp = Arc::new(Mutex::new(NibpWorkflow::new(
            command_tx,
            link_up,
            crate::nibp::DEFAULT_TIMEOUT,
        )));
        assert!(nibp.lock().unwrap().start());
        let _start = command_rx.try_recv().unwrap();

        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_pipeline(interpreter, chunk_rx, nibp.clone()));

        // Terminal NIBP packet: result code 0 (finished) in bits 2-5.
        chunk_tx
            .send(encode_frame(0x03, &[0x00, 60, 113, 90, 76]))
            .unwrap();
        drop(chunk_tx);
        handle.await.unwrap();

        assert!(!nibp.lock().unwrap().is_measuring());
        // Completion path also queues the stop command.
        assert_eq!(
            command_rx.try_recv().unwrap(),
            vec![0x55, 0xAA, 0x04, 0x02, 0x00, 0xF9]
        );
    }

    #[test]
    fn snapshot_available_before_connect() {
        let monitor = PatientMonitor::new(Config::default());
        let snap = monitor.snapshot();
        assert_eq!(snap.vital_signs.heart_rate, "- -");
        assert!(!monitor.is_connected());
    }

    #[tokio::test]
    async fn nibp_rejected_while_disconnected() {
        let monitor = PatientMonitor::new(Config::default());
        assert!(!monitor.start_nibp());
    }
}
