//! Patient status actor
//!
//! A single thread owns the [`PatientStatusMachine`] and processes commands
//! from the classification worker, the location collaborator and the UI one
//! at a time. The confirmation timer is the actor's own receive deadline, so
//! its expiry is serialized with every other update.
//!
//! Each processed command republishes the serialized report; the status
//! server reads that snapshot and never touches the machine.

use crate::error::FallWatchError;
use crate::protocol::StatusSource;
use crate::status::{PatientStatusMachine, StatusEffect};
use crate::types::{Location, PatientStatus, StatusColor, StatusReport};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Messages accepted by the status actor
#[derive(Debug, Clone, PartialEq)]
pub enum StatusCommand {
    /// Status reported by classification or an external signal
    Classified(PatientStatus),
    /// Raw status label; unknown labels reset to `OKAY`
    Label(String),
    Location(Location),
    UserConfirmed,
    TimerExpired,
    Shutdown,
}

/// Patient-side presentation hooks
pub trait PatientUi: Send {
    /// Show the "Detected potential fall. Are you ok?" prompt
    fn confirmation_needed(&mut self) {}
    fn status_changed(&mut self, _status: PatientStatus, _color: StatusColor) {}
}

/// A patient UI that ignores everything
pub struct NullPatientUi;

impl PatientUi for NullPatientUi {}

#[derive(Debug, Clone)]
struct Published {
    report: StatusReport,
    json: String,
}

/// Cloneable handle for sending commands and reading the published report
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Sender<StatusCommand>,
    published: Arc<RwLock<Published>>,
}

impl StatusHandle {
    pub fn send(&self, command: StatusCommand) -> Result<(), FallWatchError> {
        self.tx
            .send(command)
            .map_err(|e| FallWatchError::ChannelClosed(format!("status actor: {:?}", e.0)))
    }

    pub fn set_status(&self, status: PatientStatus) -> Result<(), FallWatchError> {
        self.send(StatusCommand::Classified(status))
    }

    pub fn set_label(&self, label: impl Into<String>) -> Result<(), FallWatchError> {
        self.send(StatusCommand::Label(label.into()))
    }

    /// The patient answered the confirmation prompt.
    pub fn confirm(&self) -> Result<(), FallWatchError> {
        self.send(StatusCommand::UserConfirmed)
    }

    pub fn update_location(&self, location: Location) -> Result<(), FallWatchError> {
        self.send(StatusCommand::Location(location))
    }

    /// Most recently published report
    pub fn report(&self) -> StatusReport {
        self.published.read().report.clone()
    }

    pub fn status(&self) -> PatientStatus {
        self.published.read().report.status
    }

    /// Most recently published wire form
    pub fn report_json(&self) -> String {
        self.published.read().json.clone()
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, Receiver<StatusCommand>) {
        let (tx, rx) = unbounded();
        let machine = PatientStatusMachine::default();
        let published = Arc::new(RwLock::new(Published {
            report: machine.report(),
            json: machine.report_json().to_string(),
        }));
        (Self { tx, published }, rx)
    }
}

impl StatusSource for StatusHandle {
    fn current_report_json(&self) -> String {
        self.report_json()
    }
}

/// Thread owning the patient status machine
pub struct StatusActor<U: PatientUi> {
    machine: PatientStatusMachine,
    ui: U,
    rx: Receiver<StatusCommand>,
    published: Arc<RwLock<Published>>,
    epoch: Instant,
    deadline: Option<Instant>,
}

impl<U: PatientUi + 'static> StatusActor<U> {
    /// Start the actor thread.
    pub fn spawn(
        confirmation_timeout_ms: u64,
        ui: U,
    ) -> Result<(StatusHandle, JoinHandle<()>), FallWatchError> {
        let (tx, rx) = unbounded();
        let machine = PatientStatusMachine::new(confirmation_timeout_ms);
        let published = Arc::new(RwLock::new(Published {
            report: machine.report(),
            json: machine.report_json().to_string(),
        }));

        let actor = StatusActor {
            machine,
            ui,
            rx,
            published: Arc::clone(&published),
            epoch: Instant::now(),
            deadline: None,
        };
        let join = thread::Builder::new()
            .name("patient-status".into())
            .spawn(move || actor.run())?;

        Ok((StatusHandle { tx, published }, join))
    }

    fn run(mut self) {
        loop {
            let command = match self.deadline {
                Some(deadline) => match self.rx.recv_deadline(deadline) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => StatusCommand::TimerExpired,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };
            if command == StatusCommand::Shutdown {
                break;
            }
            self.handle(command);
        }
        debug!("status actor stopped");
    }

    fn handle(&mut self, command: StatusCommand) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        debug!(?command, now_ms, "status command");

        let effects = match command {
            StatusCommand::Classified(status) => self.machine.set_status(status, now_ms),
            StatusCommand::Label(label) => self.machine.set_status_label(&label, now_ms),
            StatusCommand::Location(location) => {
                self.machine.update_location(location);
                Vec::new()
            }
            StatusCommand::UserConfirmed => self.machine.user_confirmed(now_ms),
            StatusCommand::TimerExpired => self.machine.timer_expired(now_ms),
            StatusCommand::Shutdown => Vec::new(),
        };

        for effect in effects {
            match effect {
                StatusEffect::StartConfirmationTimer { deadline_ms } => {
                    self.deadline = Some(self.epoch + Duration::from_millis(deadline_ms));
                }
                StatusEffect::CancelConfirmationTimer => self.deadline = None,
                StatusEffect::PromptConfirmation => self.ui.confirmation_needed(),
                StatusEffect::StatusChanged(status) => {
                    info!(status = %status, "patient status changed");
                    self.ui.status_changed(status, status.color_hint());
                }
            }
        }

        let mut published = self.published.write();
        published.report = self.machine.report();
        published.json = self.machine.report_json().to_string();
    }
}
