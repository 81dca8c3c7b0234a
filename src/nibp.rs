//! NIBP (non-invasive blood pressure) measurement workflow.
//!
//! A measurement cycle is started by command, runs on the device for tens of
//! seconds while the cuff inflates and deflates, and reports its outcome in
//! the status byte of NIBP parameter packets. This module tracks that cycle
//! as a re-entrant `Idle -> Measuring -> Idle` machine with a deadline
//! watcher, so a lost completion packet can never leave the workflow stuck
//! in `Measuring` and block every future measurement.
//!
//! Outcome decoding: bits 2-5 of the status byte form a result code.
//! `0` finished, `2` stopped by the user, `4` error abort and `5`
//! weak-signal abort are terminal; anything else means the cycle is still
//! running (inflating, deflating, holding).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::{encode_command, CMD_NIBP, NIBP_START, NIBP_STOP};

/// Default measurement deadline; a full cycle on the device takes well under
/// this even on retries.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Extract the 4-bit result field from the NIBP status byte.
pub fn result_code(states: u8) -> u8 {
    (states >> 2) & 0x0F
}

fn is_terminal(result: u8) -> bool {
    matches!(result, 0 | 2 | 4 | 5)
}

#[derive(Debug, Default)]
struct Session {
    measuring: bool,
    /// Bumped on every state change; an armed watcher only fires if the
    /// generation it captured is still current, which makes cancelling an
    /// already-completed watcher a harmless no-op.
    generation: u64,
    deadline: Option<Instant>,
}

/// The measurement state machine. Owned by the monitor facade; packets and
/// administrative calls arrive on the pipeline task.
pub struct NibpWorkflow {
    session: Arc<Mutex<Session>>,
    command_tx: mpsc::UnboundedSender<Vec<u8>>,
    link_up: Arc<AtomicBool>,
    timeout: Duration,
    watcher: Option<tokio::task::JoinHandle<()>>,
}

impl NibpWorkflow {
    /// `command_tx` feeds the transport writer task; `link_up` is maintained
    /// by the connection supervisor.
    pub fn new(
        command_tx: mpsc::UnboundedSender<Vec<u8>>,
        link_up: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::default())),
            command_tx,
            link_up,
            timeout,
            watcher: None,
        }
    }

    pub fn is_measuring(&self) -> bool {
        self.session.lock().unwrap().measuring
    }

    /// Request a measurement with the configured deadline.
    ///
    /// Rejected as a logged no-op while a measurement is already running or
    /// the transport is down; a rejected start is not queued.
    pub fn start(&mut self) -> bool {
        self.start_with_timeout(self.timeout)
    }

    pub fn start_with_timeout(&mut self, timeout: Duration) -> bool {
        let generation = {
            let mut session = self.session.lock().unwrap();
            if session.measuring {
                warn!("NIBP measurement already in progress, ignoring start request");
                return false;
            }
            if !self.link_up.load(Ordering::SeqCst) {
                warn!("NIBP start requested while transport is disconnected, ignoring");
                return false;
            }
            session.measuring = true;
            session.generation += 1;
            session.deadline = Some(Instant::now() + timeout);
            session.generation
        };

        if self.command_tx.send(encode_command(CMD_NIBP, NIBP_START)).is_err() {
            warn!("Command channel closed, cannot start NIBP measurement");
            self.force_idle();
            return false;
        }
        info!(
            "NIBP measurement started (timeout {}s)",
            timeout.as_secs()
        );
        self.arm_watcher(generation, timeout);
        true
    }

    fn arm_watcher(&mut self, generation: u64, timeout: Duration) {
        let session = self.session.clone();
        self.watcher = Some(tokio::spawn(async move {
            let deadline = session
                .lock()
                .unwrap()
                .deadline
                .unwrap_or_else(|| Instant::now() + timeout);
            tokio::time::sleep_until(deadline).await;
            let mut session = session.lock().unwrap();
            if session.measuring && session.generation == generation {
                session.measuring = false;
                session.deadline = None;
                session.generation += 1;
                warn!(
                    "NIBP measurement did not complete within {}s, forcing idle",
                    timeout.as_secs()
                );
            }
        }));
    }

    /// Feed the status byte of an NIBP parameter packet through the machine.
    /// Packets arriving while `Idle` are ignored.
    pub fn on_nibp_packet(&mut self, states: u8) {
        let result = result_code(states);
        {
            let mut session = self.session.lock().unwrap();
            if !session.measuring {
                return;
            }
            if !is_terminal(result) {
                debug!("NIBP cycle in progress (result code {})", result);
                return;
            }
            session.measuring = false;
            session.deadline = None;
            session.generation += 1;
        }
        info!("NIBP measurement finished (result code {})", result);
        // Tell the device to stand down so the cuff cannot keep cycling if
        // the terminal packet raced a new inflation step.
        if self.command_tx.send(encode_command(CMD_NIBP, NIBP_STOP)).is_err() {
            warn!("Command channel closed, NIBP stop command not sent");
        }
        self.cancel_watcher();
    }

    /// Administrative stop: force `Idle` regardless of device state.
    /// Safe to call repeatedly and while already idle.
    pub fn stop(&mut self) {
        let was_measuring = {
            let mut session = self.session.lock().unwrap();
            let was = session.measuring;
            session.measuring = false;
            session.deadline = None;
            session.generation += 1;
            was
        };
        if was_measuring {
            info!("NIBP session forced idle");
        }
        self.cancel_watcher();
    }

    fn force_idle(&mut self) {
        let mut session = self.session.lock().unwrap();
        session.measuring = false;
        session.deadline = None;
        session.generation += 1;
    }

    fn cancel_watcher(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl Drop for NibpWorkflow {
    fn drop(&mut self) {
        self.cancel_watcher();
    }
}
