//! Fallwatch - Fall detection and patient status exchange
//!
//! Fallwatch turns a stream of accelerometer magnitudes into fall alerts through
//! a small pipeline: event detection → feature extraction → remote
//! classification → patient status machine. The patient's status is served over
//! TCP to a monitor device that polls it on an adaptive interval.
//!
//! ## Modules
//!
//! - **Detection**: `window`, `detector`, `features`
//! - **Classification**: `classifier`, `recorder`
//! - **Status exchange**: `status`, `patient`, `protocol`
//! - **Orchestration**: `pipeline`, `config`

pub mod classifier;
pub mod config;
pub mod detector;
pub mod error;
pub mod features;
pub mod patient;
pub mod pipeline;
pub mod protocol;
pub mod recorder;
pub mod status;
pub mod types;
pub mod window;

#[cfg(test)]
mod test_support;

pub use classifier::{ClassificationClient, Classifier, TcpClassifier};
pub use config::{MonitorConfig, PatientConfig};
pub use detector::{FallEvent, FallEventDetector};
pub use error::FallWatchError;
pub use features::FeatureExtractor;
pub use patient::{PatientUi, StatusActor, StatusHandle};
pub use pipeline::{detect_events, PatientDevice};
pub use protocol::{MonitorUi, StatusPoller, StatusServer};
pub use status::PatientStatusMachine;
pub use types::{
    ClassCode, Classification, ExtractedFeatures, Location, PatientStatus, Sample, StatusReport,
};

/// Fallwatch version
pub const FALLWATCH_VERSION: &str = env!("CARGO_PKG_VERSION");
