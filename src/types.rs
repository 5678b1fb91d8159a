//! Core types for the Fallwatch pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: accelerometer samples, extracted event features, classification
//! results, and the patient status report exchanged with the monitor.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard gravity in m/s², the unit scale for every magnitude threshold.
pub const GRAVITY_EARTH: f64 = 9.80665;

/// One accelerometer reading reduced to a scalar magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic timestamp in milliseconds
    pub timestamp_ms: i64,
    /// Acceleration magnitude (m/s²)
    pub magnitude: f64,
}

impl Sample {
    pub fn new(timestamp_ms: i64, magnitude: f64) -> Self {
        Self {
            timestamp_ms,
            magnitude,
        }
    }

    /// Build a sample from the sensor's nanosecond clock.
    pub fn from_nanos(timestamp_ns: i64, magnitude: f64) -> Self {
        Self::new(timestamp_ns / 1_000_000, magnitude)
    }

    /// Build a sample from raw 3-axis acceleration on the nanosecond clock.
    pub fn from_axes(timestamp_ns: i64, x: f64, y: f64, z: f64) -> Self {
        Self::from_nanos(timestamp_ns, (x * x + y * y + z * z).sqrt())
    }
}

/// Features describing one completed fall-like event.
///
/// Serialized field names are the ones the classification server expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFeatures {
    /// Impact end minus impact start (ms), not clamped
    pub impact_duration: f64,
    /// Fraction of impact samples outside the near-rest band (0-1)
    pub impact_violence: f64,
    /// Mean magnitude across the impact window
    pub impact_average: f64,
    /// Mean magnitude from impact end to the end of the event
    pub post_impact_average: f64,
}

/// Category assigned by the remote classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassCode {
    Fall,
    Walk,
    Jump,
    Bump,
}

impl ClassCode {
    /// Map the integer code used on the wire.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ClassCode::Fall),
            1 => Some(ClassCode::Walk),
            2 => Some(ClassCode::Jump),
            3 => Some(ClassCode::Bump),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ClassCode::Fall => 0,
            ClassCode::Walk => 1,
            ClassCode::Jump => 2,
            ClassCode::Bump => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassCode::Fall => "Fall",
            ClassCode::Walk => "Walk",
            ClassCode::Jump => "Jump",
            ClassCode::Bump => "Bump",
        }
    }
}

impl fmt::Display for ClassCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one classification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Classified(ClassCode),
    /// Timeout, transport failure or unparseable response
    Unclassified,
}

/// Patient status as tracked on the patient device and reported to the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PatientStatus {
    #[default]
    #[serde(rename = "OKAY")]
    Okay,
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "NEEDS HELP")]
    NeedsHelp,
}

impl PatientStatus {
    /// Wire label
    pub fn as_str(&self) -> &'static str {
        match self {
            PatientStatus::Okay => "OKAY",
            PatientStatus::Pending => "PENDING",
            PatientStatus::NeedsHelp => "NEEDS HELP",
        }
    }

    /// Parse a wire label. Unknown labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "OKAY" => Some(PatientStatus::Okay),
            "PENDING" => Some(PatientStatus::Pending),
            "NEEDS HELP" => Some(PatientStatus::NeedsHelp),
            _ => None,
        }
    }

    /// Color-coding hint for status displays
    pub fn color_hint(&self) -> StatusColor {
        match self {
            PatientStatus::Okay => StatusColor::Green,
            PatientStatus::Pending => StatusColor::Yellow,
            PatientStatus::NeedsHelp => StatusColor::Red,
        }
    }
}

impl fmt::Display for PatientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display color associated with a status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Green,
    Yellow,
    Red,
}

/// Last known position of the patient device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Status snapshot sent to the monitor on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: PatientStatus,
    pub using_gps: bool,
    pub latitude: f64,
    pub longitude: f64,
    pub nearest_ble_node: i64,
}
