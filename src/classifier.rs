//! Remote event classification
//!
//! Each completed event is sent to a classification server over a fresh TCP
//! connection as one compact JSON object. The server answers with a single
//! line holding an integer class code. There is no pooling and no retry.

use crate::config::PatientConfig;
use crate::error::FallWatchError;
use crate::patient::StatusHandle;
use crate::protocol::resolve_target;
use crate::types::{ClassCode, Classification, ExtractedFeatures, PatientStatus};
use parking_lot::RwLock;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something that assigns a category to a completed event
pub trait Classifier: Send {
    fn classify(&self, features: &ExtractedFeatures) -> Classification;
}

/// Classification over a single-use TCP round trip
#[derive(Debug, Clone)]
pub struct TcpClassifier {
    host: Arc<RwLock<String>>,
    port: u16,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TcpClassifier {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let defaults = PatientConfig::default();
        Self {
            host: Arc::new(RwLock::new(host.into())),
            port,
            connect_timeout: Duration::from_millis(defaults.classify_connect_timeout_ms),
            read_timeout: Duration::from_millis(defaults.classify_read_timeout_ms),
        }
    }

    pub fn from_config(config: &PatientConfig) -> Self {
        Self {
            host: Arc::new(RwLock::new(config.classification_host.clone())),
            port: config.classification_port,
            connect_timeout: Duration::from_millis(config.classify_connect_timeout_ms),
            read_timeout: Duration::from_millis(config.classify_read_timeout_ms),
        }
    }

    pub fn with_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.connect_timeout = connect;
        self.read_timeout = read;
        self
    }

    /// Shared handle to the server host; edits apply to the next request.
    pub fn host_handle(&self) -> Arc<RwLock<String>> {
        Arc::clone(&self.host)
    }

    pub fn set_host(&self, host: impl Into<String>) {
        *self.host.write() = host.into();
    }

    pub fn host(&self) -> String {
        self.host.read().clone()
    }

    /// One request/response exchange.
    ///
    /// Transport failures surface as [`FallWatchError::Io`]; a reply that is
    /// not a known integer code is [`FallWatchError::Unclassifiable`].
    pub fn request(&self, features: &ExtractedFeatures) -> Result<ClassCode, FallWatchError> {
        let host = self.host();
        let addr = resolve_target(&host, self.port)?;

        let mut stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.set_write_timeout(Some(self.read_timeout))?;

        let body = serde_json::to_string(features)?;
        stream.write_all(body.as_bytes())?;
        stream.flush()?;
        debug!(%addr, %body, "features sent for classification");

        let mut line = String::new();
        let read = BufReader::new(&stream).read_line(&mut line)?;
        if read == 0 {
            return Err(FallWatchError::Unclassifiable(
                "connection closed before a response".to_string(),
            ));
        }

        let code: i64 = line
            .trim()
            .parse()
            .map_err(|_| FallWatchError::Unclassifiable(format!("non-integer response {:?}", line.trim())))?;
        ClassCode::from_code(code)
            .ok_or_else(|| FallWatchError::Unclassifiable(format!("unknown class code {}", code)))
    }
}

impl Classifier for TcpClassifier {
    fn classify(&self, features: &ExtractedFeatures) -> Classification {
        match self.request(features) {
            Ok(code) => Classification::Classified(code),
            Err(FallWatchError::Io(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                warn!(host = %self.host(), port = self.port, "cannot connect, check if the classification server is running");
                Classification::Unclassified
            }
            Err(FallWatchError::Io(e))
                if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
            {
                warn!(host = %self.host(), port = self.port, "classification server timeout");
                Classification::Unclassified
            }
            Err(e) => {
                warn!(error = %e, "event left unclassified");
                Classification::Unclassified
            }
        }
    }
}

/// Forwards classification results to the patient status actor
pub struct ClassificationClient<C: Classifier> {
    classifier: C,
    status: StatusHandle,
}

impl<C: Classifier> ClassificationClient<C> {
    pub fn new(classifier: C, status: StatusHandle) -> Self {
        Self { classifier, status }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Classify one event and raise `PENDING` on a fall.
    pub fn submit(&self, features: &ExtractedFeatures) -> Classification {
        let result = self.classifier.classify(features);
        match result {
            Classification::Classified(ClassCode::Fall) => {
                info!("event classified as a fall");
                if let Err(e) = self.status.set_status(PatientStatus::Pending) {
                    warn!(error = %e, "fall could not be reported");
                }
            }
            Classification::Classified(code) => {
                info!(class = %code, code = code.code(), "event classified, no action");
            }
            Classification::Unclassified => debug!("no status change for unclassified event"),
        }
        result
    }
}
