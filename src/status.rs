//! Patient status machine
//!
//! Tracks the patient's status and the "are you okay?" confirmation cycle. The
//! first reported fall asks for confirmation and starts the timer; a repeat
//! report while the question is open stores `PENDING`. If nobody confirms
//! before the timer runs out the status escalates to `NEEDS HELP`. Only an
//! explicit user confirmation clears the cycle.
//!
//! The machine is pure: callers pass the current time and act on the returned
//! [`StatusEffect`]s (start or cancel the timer, prompt the user, notify).

use crate::config::DEFAULT_CONFIRMATION_TIMEOUT_MS;
use crate::protocol::{encode_report, DEFAULT_BLE_NODE};
use crate::types::{Location, PatientStatus, StatusReport};
use tracing::{debug, info, warn};

/// Work the owner of the machine has to carry out after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEffect {
    /// Arm the confirmation timer to fire at `deadline_ms`
    StartConfirmationTimer { deadline_ms: u64 },
    CancelConfirmationTimer,
    /// Ask the patient whether they are okay
    PromptConfirmation,
    StatusChanged(PatientStatus),
}

/// Patient status with the confirmation bookkeeping
#[derive(Debug, Clone)]
pub struct PatientStatusMachine {
    status: PatientStatus,
    has_been_asked: bool,
    awaiting_confirmation: bool,
    needs_help: bool,
    last_ask_time_ms: Option<u64>,
    confirmation_timeout_ms: u64,
    timers_started: u32,
    location: Option<Location>,
    report_json: String,
}

impl Default for PatientStatusMachine {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATION_TIMEOUT_MS)
    }
}

impl PatientStatusMachine {
    pub fn new(confirmation_timeout_ms: u64) -> Self {
        let mut machine = Self {
            status: PatientStatus::Okay,
            has_been_asked: false,
            awaiting_confirmation: false,
            needs_help: false,
            last_ask_time_ms: None,
            confirmation_timeout_ms,
            timers_started: 0,
            location: None,
            report_json: String::new(),
        };
        machine.refresh_report();
        machine
    }

    pub fn status(&self) -> PatientStatus {
        self.status
    }

    pub fn has_been_asked(&self) -> bool {
        self.has_been_asked
    }

    pub fn awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    pub fn needs_help(&self) -> bool {
        self.needs_help
    }

    pub fn last_ask_time_ms(&self) -> Option<u64> {
        self.last_ask_time_ms
    }

    /// Number of confirmation timers started so far
    pub fn timers_started(&self) -> u32 {
        self.timers_started
    }

    /// Apply a status label; unknown labels reset to `OKAY`.
    pub fn set_status_label(&mut self, label: &str, now_ms: u64) -> Vec<StatusEffect> {
        let status = PatientStatus::from_label(label).unwrap_or_else(|| {
            warn!(label, "unknown status label, resetting to OKAY");
            PatientStatus::Okay
        });
        self.set_status(status, now_ms)
    }

    /// Apply a status input.
    pub fn set_status(&mut self, input: PatientStatus, now_ms: u64) -> Vec<StatusEffect> {
        let previous = self.status;
        let mut effects = Vec::new();

        match input {
            // An escalation is only cleared by the patient, never downgraded to PENDING
            PatientStatus::Pending if self.needs_help => {
                debug!("already escalated, PENDING ignored");
            }
            // First report only asks; the served status changes on a repeat report
            PatientStatus::Pending if !self.has_been_asked => {
                self.has_been_asked = true;
                self.awaiting_confirmation = true;
                self.last_ask_time_ms = Some(now_ms);
                self.timers_started += 1;
                effects.push(StatusEffect::StartConfirmationTimer {
                    deadline_ms: now_ms + self.confirmation_timeout_ms,
                });
                effects.push(StatusEffect::PromptConfirmation);
                info!(now_ms, "possible fall, asking patient for confirmation");
            }
            other => self.status = other,
        }

        if self.status != previous {
            effects.push(StatusEffect::StatusChanged(self.status));
        }
        self.refresh_report();
        effects
    }

    /// The confirmation timer fired. Ignored when no confirmation is pending.
    pub fn timer_expired(&mut self, now_ms: u64) -> Vec<StatusEffect> {
        if !self.awaiting_confirmation {
            debug!(now_ms, "stale confirmation timer ignored");
            return Vec::new();
        }
        warn!(now_ms, "no confirmation received, patient needs help");
        self.awaiting_confirmation = false;
        self.needs_help = true;

        let mut effects = vec![StatusEffect::CancelConfirmationTimer];
        effects.extend(self.set_status(PatientStatus::NeedsHelp, now_ms));
        effects
    }

    /// The patient confirmed they are fine.
    pub fn user_confirmed(&mut self, now_ms: u64) -> Vec<StatusEffect> {
        info!(now_ms, "patient confirmed they are okay");
        let mut effects = Vec::new();
        if self.awaiting_confirmation {
            self.awaiting_confirmation = false;
            effects.push(StatusEffect::CancelConfirmationTimer);
        }
        self.needs_help = false;
        self.has_been_asked = false;
        effects.extend(self.set_status(PatientStatus::Okay, now_ms));
        effects
    }

    /// Record a new position fix.
    pub fn update_location(&mut self, location: Location) {
        self.location = Some(location);
        self.refresh_report();
    }

    /// Current report
    pub fn report(&self) -> StatusReport {
        let (using_gps, latitude, longitude) = match self.location {
            Some(loc) => (true, loc.latitude, loc.longitude),
            None => (false, 0.0, 0.0),
        };
        StatusReport {
            status: self.status,
            using_gps,
            latitude,
            longitude,
            nearest_ble_node: DEFAULT_BLE_NODE,
        }
    }

    /// Serialized form of the current report, refreshed on every transition
    pub fn report_json(&self) -> &str {
        &self.report_json
    }

    fn refresh_report(&mut self) {
        match encode_report(&self.report()) {
            Ok(json) => {
                debug!(%json, "status report updated");
                self.report_json = json;
            }
            Err(e) => warn!(error = %e, "status report could not be serialized, keeping previous"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_initial_state() {
        let machine = PatientStatusMachine::default();
        assert_eq!(machine.status(), PatientStatus::Okay);
        assert!(!machine.has_been_asked());
        assert!(machine.report_json().contains(r#""status":"OKAY""#));
        assert!(machine.report_json().contains(r#""usingGps":false"#));
    }

    #[test]
    fn test_pending_starts_single_confirmation() {
        let mut machine = PatientStatusMachine::new(5000);

        let effects = machine.set_status(PatientStatus::Pending, 1000);
        assert_eq!(
            effects,
            vec![
                StatusEffect::StartConfirmationTimer { deadline_ms: 6000 },
                StatusEffect::PromptConfirmation,
            ]
        );
        assert_eq!(machine.last_ask_time_ms(), Some(1000));
        // Asking does not change what the monitor sees
        assert_eq!(machine.status(), PatientStatus::Okay);
        assert!(machine.report_json().contains(r#""status":"OKAY""#));

        let effects = machine.set_status(PatientStatus::Pending, 2000);
        assert_eq!(effects, vec![StatusEffect::StatusChanged(PatientStatus::Pending)]);
        assert!(machine.has_been_asked());
        assert_eq!(machine.timers_started(), 1);
        assert_eq!(machine.last_ask_time_ms(), Some(1000));
        assert_eq!(machine.status(), PatientStatus::Pending);
        assert!(machine.report_json().contains(r#""status":"PENDING""#));
    }

    #[test]
    fn test_timer_expiry_escalates() {
        let mut machine = PatientStatusMachine::new(5000);
        machine.set_status(PatientStatus::Pending, 0);

        let effects = machine.timer_expired(5000);
        assert_eq!(
            effects,
            vec![
                StatusEffect::CancelConfirmationTimer,
                StatusEffect::StatusChanged(PatientStatus::NeedsHelp),
            ]
        );
        assert_eq!(machine.status(), PatientStatus::NeedsHelp);
        assert!(machine.has_been_asked());
        assert!(machine.needs_help());
        assert!(!machine.awaiting_confirmation());
        assert!(machine.report_json().contains("NEEDS HELP"));
    }

    #[test]
    fn test_only_confirmation_clears_escalation() {
        let mut machine = PatientStatusMachine::new(5000);
        machine.set_status(PatientStatus::Pending, 0);
        machine.timer_expired(5000);

        // A later fall report does not downgrade or re-ask
        assert!(machine.set_status(PatientStatus::Pending, 6000).is_empty());
        assert_eq!(machine.status(), PatientStatus::NeedsHelp);
        assert_eq!(machine.timers_started(), 1);

        let effects = machine.user_confirmed(7000);
        assert_eq!(effects, vec![StatusEffect::StatusChanged(PatientStatus::Okay)]);
        assert_eq!(machine.status(), PatientStatus::Okay);
        assert!(!machine.has_been_asked());
        assert!(!machine.needs_help());

        // The next fall asks again
        machine.set_status(PatientStatus::Pending, 8000);
        assert_eq!(machine.timers_started(), 2);
    }

    #[test]
    fn test_confirmation_cancels_running_timer() {
        let mut machine = PatientStatusMachine::new(5000);
        machine.set_status(PatientStatus::Pending, 0);

        machine.set_status(PatientStatus::Pending, 500);

        let effects = machine.user_confirmed(1200);
        assert_eq!(
            effects,
            vec![
                StatusEffect::CancelConfirmationTimer,
                StatusEffect::StatusChanged(PatientStatus::Okay),
            ]
        );
        // A timer firing after the cancel is stale
        assert!(machine.timer_expired(5000).is_empty());
        assert_eq!(machine.status(), PatientStatus::Okay);
    }

    #[test]
    fn test_plain_okay_keeps_flags() {
        let mut machine = PatientStatusMachine::new(5000);
        machine.set_status(PatientStatus::Pending, 0);
        machine.set_status(PatientStatus::Okay, 100);

        assert_eq!(machine.status(), PatientStatus::Okay);
        assert!(machine.has_been_asked());
        assert!(machine.awaiting_confirmation());
    }

    #[test]
    fn test_needs_help_set_directly() {
        let mut machine = PatientStatusMachine::default();
        let effects = machine.set_status(PatientStatus::NeedsHelp, 0);
        assert_eq!(effects, vec![StatusEffect::StatusChanged(PatientStatus::NeedsHelp)]);
        assert!(!machine.has_been_asked());
    }

    #[test]
    fn test_unknown_label_forces_okay() {
        let mut machine = PatientStatusMachine::default();
        machine.set_status(PatientStatus::NeedsHelp, 0);
        machine.set_status_label("ON FIRE", 10);
        assert_eq!(machine.status(), PatientStatus::Okay);

        machine.set_status_label("PENDING", 20);
        assert_eq!(machine.status(), PatientStatus::Okay);
        assert!(machine.has_been_asked());
        machine.set_status_label("PENDING", 30);
        assert_eq!(machine.status(), PatientStatus::Pending);
    }

    #[test]
    fn test_location_in_report() {
        let mut machine = PatientStatusMachine::default();
        machine.update_location(Location {
            latitude: 50.0647,
            longitude: 19.945,
        });

        let report = machine.report();
        assert!(report.using_gps);
        assert_eq!(report.latitude, 50.0647);
        assert_eq!(report.nearest_ble_node, 1);
        assert!(machine.report_json().contains(r#""latitude":50.0647"#));
    }
}
