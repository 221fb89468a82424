//! Run control plumbing shared by the run driver and the poll/retry loops.
//!
//! The caller owns the event receiver and issues [`RunControl`] commands
//! through the control channel. Sleeping is always done through
//! [`ControlState::sleep`] so a cancel request interrupts a wait immediately.

use std::time::Duration;

use emrflow_types::{RunControl, RunEvent, RunStatus};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::time::{Instant, sleep_until};
use tracing::info;

use crate::steps::StepError;

/// Upper bound on a single cancel-aware sleep.
const MAX_SLEEP: Duration = Duration::from_secs(30 * 365 * 86_400);

pub(crate) struct ControlState {
    control_rx: UnboundedReceiver<RunControl>,
    event_tx: UnboundedSender<RunEvent>,
    cancel_requested: bool,
    control_closed: bool,
}

impl ControlState {
    pub(crate) fn new(control_rx: UnboundedReceiver<RunControl>, event_tx: UnboundedSender<RunEvent>) -> Self {
        Self {
            control_rx,
            event_tx,
            cancel_requested: false,
            control_closed: false,
        }
    }

    /// Sends an event. A dropped receiver never stops a run.
    pub(crate) fn emit(&self, event: RunEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn emit_status(&self, status: RunStatus, message: Option<String>) {
        self.emit(RunEvent::RunStatusChanged { status, message });
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    /// Processes every command already queued.
    pub(crate) fn drain_pending_commands(&mut self) {
        loop {
            match self.control_rx.try_recv() {
                Ok(command) => self.process_command(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.control_closed = true;
                    break;
                }
            }
        }
    }

    /// Sleeps for `duration` unless a cancel request arrives first.
    pub(crate) async fn sleep(&mut self, duration: Duration) -> Result<(), StepError> {
        self.drain_pending_commands();
        if self.cancel_requested {
            return Err(StepError::Canceled);
        }

        let deadline = sleep_until(Instant::now() + duration.min(MAX_SLEEP));
        tokio::pin!(deadline);
        loop {
            if self.control_closed {
                deadline.await;
                return Ok(());
            }
            tokio::select! {
                _ = &mut deadline => return Ok(()),
                command = self.control_rx.recv() => match command {
                    Some(command) => {
                        self.process_command(command);
                        if self.cancel_requested {
                            return Err(StepError::Canceled);
                        }
                    }
                    None => self.control_closed = true,
                },
            }
        }
    }

    fn process_command(&mut self, command: RunControl) {
        match command {
            RunControl::Cancel => {
                if !self.cancel_requested {
                    self.cancel_requested = true;
                    info!("cancel requested");
                    self.emit_status(RunStatus::CancelRequested, Some("aborting remaining steps".to_string()));
                }
            }
        }
    }
}
