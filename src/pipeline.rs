//! Pipeline orchestration
//!
//! This module wires the stages together:
//! 1. FallEventDetector - Track the fall-like sequence sample by sample
//! 2. FeatureExtractor - Describe each completed event
//! 3. EventRecorder - Optionally dump the event for labelling
//! 4. ClassificationClient - Classify remotely and raise `PENDING` on a fall
//!
//! [`detect_events`] runs stages 1 and 2 over a finished recording. A
//! [`PatientDevice`] runs the live system: the sample worker, the status actor
//! and the status server, each on its own thread.

use crate::classifier::{ClassificationClient, Classifier, TcpClassifier};
use crate::config::PatientConfig;
use crate::detector::{FallEvent, FallEventDetector};
use crate::error::FallWatchError;
use crate::features::FeatureExtractor;
use crate::patient::{PatientUi, StatusActor, StatusCommand, StatusHandle};
use crate::protocol::{ServerHandle, StatusServer};
use crate::recorder::EventRecorder;
use crate::types::{ExtractedFeatures, Location, PatientStatus, Sample, StatusReport};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Clock of the timestamp column in sample files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampUnit {
    /// Sensor clock, as captured on the device
    #[default]
    Nanos,
    /// Already milliseconds, as written by the event recorder
    Millis,
}

/// Parse one `timestamp,magnitude` or `timestamp,x,y,z` line.
///
/// Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_sample_line(line: &str, unit: TimestampUnit) -> Result<Option<Sample>, FallWatchError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    let parse_err = || FallWatchError::ParseError(format!("bad sample line {:?}", line));

    let timestamp: i64 = fields[0].parse().map_err(|_| parse_err())?;
    let values = fields[1..]
        .iter()
        .map(|f| f.parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .map_err(|_| parse_err())?;

    let timestamp_ns = match unit {
        TimestampUnit::Nanos => timestamp,
        TimestampUnit::Millis => timestamp.saturating_mul(1_000_000),
    };
    match values.as_slice() {
        [magnitude] => Ok(Some(Sample::from_nanos(timestamp_ns, *magnitude))),
        [x, y, z] => Ok(Some(Sample::from_axes(timestamp_ns, *x, *y, *z))),
        _ => Err(parse_err()),
    }
}

/// Run detection and extraction over a finished recording.
///
/// Returns one result per completed event, in order. Refused events keep
/// their slot as an error.
pub fn detect_events<I>(samples: I) -> Vec<Result<ExtractedFeatures, FallWatchError>>
where
    I: IntoIterator<Item = Sample>,
{
    let mut processor = EventProcessor::new();
    samples
        .into_iter()
        .filter_map(|sample| processor.process_sample(sample))
        .map(|(_, features)| features)
        .collect()
}

/// Detector plus extractor, with optional recording of every accepted event.
#[derive(Debug, Default)]
pub struct EventProcessor {
    detector: FallEventDetector,
    recorder: Option<EventRecorder>,
}

impl EventProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recorder(recorder: EventRecorder) -> Self {
        Self {
            detector: FallEventDetector::new(),
            recorder: Some(recorder),
        }
    }

    pub fn detector(&self) -> &FallEventDetector {
        &self.detector
    }

    /// Feed one sample; returns the event and its features once one completes.
    pub fn process_sample(
        &mut self,
        sample: Sample,
    ) -> Option<(FallEvent, Result<ExtractedFeatures, FallWatchError>)> {
        let event = self.detector.process(sample)?;
        let features = FeatureExtractor::extract(&event);

        if let (Some(recorder), Ok(features)) = (&self.recorder, &features) {
            if let Err(e) = recorder.record(&event, features) {
                warn!(error = %e, dir = %recorder.dir().display(), "event could not be recorded");
            }
        }
        Some((event, features))
    }
}

/// Owns the detection stages and classifies every accepted event.
pub struct DetectionWorker<C: Classifier> {
    processor: EventProcessor,
    client: ClassificationClient<C>,
}

impl<C: Classifier> DetectionWorker<C> {
    pub fn new(processor: EventProcessor, client: ClassificationClient<C>) -> Self {
        Self { processor, client }
    }

    /// Handle one sample. Classification blocks until the round trip ends.
    pub fn handle_sample(&mut self, sample: Sample) {
        let (event, features) = match self.processor.process_sample(sample) {
            Some(completed) => completed,
            None => return,
        };

        match features {
            Ok(features) => {
                info!(
                    impact_duration = features.impact_duration,
                    impact_violence = features.impact_violence,
                    impact_average = features.impact_average,
                    post_impact_average = features.post_impact_average,
                    "features extracted"
                );
                self.client.submit(&features);
            }
            Err(e) => error!(
                error = %e,
                trigger_peak_time = event.trigger_peak_time,
                impact_end = event.impact_end,
                "event refused"
            ),
        }
    }

    /// Consume samples in arrival order until every sender is gone.
    pub fn run(mut self, samples: Receiver<Sample>) {
        for sample in samples.iter() {
            self.handle_sample(sample);
        }
        debug!("sample worker stopped");
    }
}

/// The running patient device
pub struct PatientDevice {
    samples: Sender<Sample>,
    status: StatusHandle,
    classification_host: Arc<RwLock<String>>,
    worker: JoinHandle<()>,
    actor: JoinHandle<()>,
    server: ServerHandle,
}

impl PatientDevice {
    /// Start the status actor, the status server and the sample worker.
    pub fn start<U: PatientUi + 'static>(
        config: &PatientConfig,
        ui: U,
    ) -> Result<Self, FallWatchError> {
        config.validate()?;

        let (status, actor) = StatusActor::spawn(config.confirmation_timeout_ms, ui)?;
        let server = StatusServer::bind(config.listen_port, status.clone())?.spawn()?;

        let classifier = TcpClassifier::from_config(config);
        let classification_host = classifier.host_handle();
        let processor = match &config.record_dir {
            Some(dir) => EventProcessor::with_recorder(EventRecorder::new(dir)),
            None => EventProcessor::new(),
        };
        let worker = DetectionWorker::new(
            processor,
            ClassificationClient::new(classifier, status.clone()),
        );

        let (samples, rx) = unbounded();
        let worker = thread::Builder::new()
            .name("sample-worker".into())
            .spawn(move || worker.run(rx))?;

        info!(
            listen_port = server.local_addr().port(),
            classification_host = %config.classification_host,
            classification_port = config.classification_port,
            "patient device started"
        );
        Ok(Self {
            samples,
            status,
            classification_host,
            worker,
            actor,
            server,
        })
    }

    /// Sender for the sensor feed. Drop every clone before [`shutdown`](Self::shutdown).
    pub fn samples(&self) -> Sender<Sample> {
        self.samples.clone()
    }

    pub fn push_sample(&self, sample: Sample) -> Result<(), FallWatchError> {
        self.samples
            .send(sample)
            .map_err(|_| FallWatchError::ChannelClosed("sample worker".to_string()))
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn status(&self) -> PatientStatus {
        self.status.status()
    }

    pub fn report(&self) -> StatusReport {
        self.status.report()
    }

    /// The patient answered "I'm okay".
    pub fn confirm(&self) -> Result<(), FallWatchError> {
        self.status.confirm()
    }

    pub fn update_location(&self, location: Location) -> Result<(), FallWatchError> {
        self.status.update_location(location)
    }

    /// Change the classification server used for the next event.
    pub fn set_classification_host(&self, host: impl Into<String>) {
        let host = host.into();
        info!(%host, "classification host changed");
        *self.classification_host.write() = host;
    }

    pub fn classification_host(&self) -> String {
        self.classification_host.read().clone()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// Drain the sample queue, then stop every thread.
    pub fn shutdown(self) {
        drop(self.samples);
        if self.worker.join().is_err() {
            warn!("sample worker panicked");
        }
        if self.status.send(StatusCommand::Shutdown).is_ok() && self.actor.join().is_err() {
            warn!("status actor panicked");
        }
        self.server.shutdown();
        info!("patient device stopped");
    }
}
