//! Status exchange protocol
//!
//! The patient device answers every TCP connection with its current
//! [`StatusReport`] as a single JSON object and closes the stream; there is no
//! framing, the reader consumes until the peer closes. The monitor polls on an
//! interval that shortens as the reported status escalates.

use crate::config::MonitorConfig;
use crate::error::FallWatchError;
use crate::types::{Location, PatientStatus, StatusColor, StatusReport};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll interval while the patient needs help
pub const NEEDS_HELP_POLL_INTERVAL: Duration = Duration::from_millis(2000);
/// Poll interval while a fall awaits confirmation
pub const PENDING_POLL_INTERVAL: Duration = Duration::from_millis(2500);
/// Poll interval while the patient is fine, and before the first read
pub const OKAY_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// BLE node id reported until node ranging exists
pub const DEFAULT_BLE_NODE: i64 = 1;

// Placeholder coordinates used when a report omits them
const MISSING_LATITUDE: f64 = 153.0;
const MISSING_LONGITUDE: f64 = -27.0;

/// Poll interval that follows a successfully read status
pub fn poll_interval_for(status: PatientStatus) -> Duration {
    match status {
        PatientStatus::NeedsHelp => NEEDS_HELP_POLL_INTERVAL,
        PatientStatus::Pending => PENDING_POLL_INTERVAL,
        PatientStatus::Okay => OKAY_POLL_INTERVAL,
    }
}

fn round_coordinate(value: f64) -> f64 {
    (value * 1e6).round() / 1e6
}

/// Serialize a report to its wire form.
pub fn encode_report(report: &StatusReport) -> Result<String, FallWatchError> {
    let wire = StatusReport {
        latitude: round_coordinate(report.latitude),
        longitude: round_coordinate(report.longitude),
        ..report.clone()
    };
    Ok(serde_json::to_string(&wire)?)
}

/// Fields recovered from a status body. Missing or invalid fields are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportFields {
    pub status: Option<PatientStatus>,
    pub using_gps: Option<bool>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub nearest_ble_node: Option<i64>,
}

impl ReportFields {
    /// Fill missing fields with defaults, keeping `last_status` when the status
    /// itself is missing or unknown.
    pub fn resolve(&self, last_status: PatientStatus) -> StatusReport {
        StatusReport {
            status: self.status.unwrap_or(last_status),
            using_gps: self.using_gps.unwrap_or(false),
            latitude: self.latitude.unwrap_or(MISSING_LATITUDE),
            longitude: self.longitude.unwrap_or(MISSING_LONGITUDE),
            nearest_ble_node: self.nearest_ble_node.unwrap_or(DEFAULT_BLE_NODE),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_some()
            && self.using_gps.is_some()
            && self.latitude.is_some()
            && self.longitude.is_some()
            && self.nearest_ble_node.is_some()
    }
}

/// Parse a status body field by field.
///
/// Only a body that is not a JSON object at all is an error.
pub fn decode_report(body: &str) -> Result<ReportFields, FallWatchError> {
    let value: Value = serde_json::from_str(body.trim())
        .map_err(|e| FallWatchError::MalformedReport(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| FallWatchError::MalformedReport("expected a JSON object".to_string()))?;

    Ok(ReportFields {
        status: object
            .get("status")
            .and_then(Value::as_str)
            .and_then(PatientStatus::from_label),
        using_gps: object.get("usingGps").and_then(Value::as_bool),
        latitude: object.get("latitude").and_then(Value::as_f64),
        longitude: object.get("longitude").and_then(Value::as_f64),
        nearest_ble_node: object.get("nearestBleNode").and_then(Value::as_i64),
    })
}

/// Socket address for a configured host.
///
/// IP literals are used as-is. Any other host goes through the system
/// resolver, whose lookup time is not covered by the connect timeout.
pub fn resolve_target(host: &str, port: u16) -> io::Result<SocketAddr> {
    let host = host.trim();
    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))
}

/// Source of the serialized status served to monitors
pub trait StatusSource: Send + Sync {
    fn current_report_json(&self) -> String;
}

/// Patient-side status server: one connection at a time, reply, close.
pub struct StatusServer<S: StatusSource> {
    listener: TcpListener,
    source: S,
}

impl<S: StatusSource + 'static> StatusServer<S> {
    pub fn bind(port: u16, source: S) -> Result<Self, FallWatchError> {
        Self::bind_addr(SocketAddr::from(([0, 0, 0, 0], port)), source)
    }

    pub fn bind_addr(addr: SocketAddr, source: S) -> Result<Self, FallWatchError> {
        let listener = TcpListener::bind(addr)?;
        info!(addr = %listener.local_addr()?, "status server listening");
        Ok(Self { listener, source })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FallWatchError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept one connection and reply with the current report.
    pub fn serve_one(&self) -> Result<SocketAddr, FallWatchError> {
        let (mut stream, peer) = self.listener.accept()?;
        let body = self.source.current_report_json();
        stream.write_all(body.as_bytes())?;
        stream.flush()?;
        debug!(%peer, %body, "status served");
        Ok(peer)
    }

    /// Serve until `stop` is set. Per-connection failures are logged and skipped.
    pub fn run(&self, stop: &AtomicBool) {
        serve_until(stop, ACCEPT_RETRY_DELAY, || self.serve_one());
        debug!("status server stopped");
    }

    /// Run the accept loop on its own thread.
    pub fn spawn(self) -> Result<ServerHandle, FallWatchError> {
        let addr = self.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("status-server".into())
            .spawn(move || self.run(&thread_stop))?;
        Ok(ServerHandle { addr, stop, join })
    }
}

/// Pause after a failed accept or reply before serving again
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Call `serve` until `stop` is set, sleeping `retry_delay` after each failure
/// so a persistent accept error does not spin.
fn serve_until<F>(stop: &AtomicBool, retry_delay: Duration, mut serve: F)
where
    F: FnMut() -> Result<SocketAddr, FallWatchError>,
{
    while !stop.load(Ordering::SeqCst) {
        if let Err(e) = serve() {
            warn!(error = %e, "status reply failed");
            thread::sleep(retry_delay);
        }
    }
}

/// Handle to a running status server thread
pub struct ServerHandle {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop the accept loop and wait for the thread.
    pub fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the blocking accept
        let wake = if self.addr.ip().is_unspecified() {
            SocketAddr::from(([127, 0, 0, 1], self.addr.port()))
        } else {
            self.addr
        };
        let _ = TcpStream::connect_timeout(&wake, Duration::from_millis(500));
        if self.join.join().is_err() {
            warn!("status server thread panicked");
        }
    }
}

/// Monitor-side presentation hooks
pub trait MonitorUi: Send {
    /// A status was read from the patient
    fn status_changed(&mut self, _status: PatientStatus, _color: StatusColor) {}
    /// The patient reported a GPS position
    fn location_updated(&mut self, _location: Location) {}
    /// Raise the "someone may need help" alert
    fn needs_help_alert(&mut self) {}
    /// Connectivity diagnostic and last-seen text after every poll
    fn connectivity(&mut self, _diagnostic: &str, _last_seen: &str) {}
}

/// A monitor UI that ignores everything
pub struct NullMonitorUi;

impl MonitorUi for NullMonitorUi {}

/// Result of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// A report was read and interpreted
    Report(StatusReport),
    /// Bytes arrived but were not a status object
    Malformed(String),
    /// Connect, read or timeout failure
    TransportError(String),
}

/// Monitor-side status poller
pub struct StatusPoller<U: MonitorUi> {
    config: MonitorConfig,
    ui: U,
    last_status: Option<PatientStatus>,
    poll_interval: Duration,
    last_seen: Option<Instant>,
    last_seen_at: Option<DateTime<Utc>>,
    diagnostic: String,
}

impl<U: MonitorUi> StatusPoller<U> {
    pub fn new(config: MonitorConfig, ui: U) -> Self {
        Self {
            config,
            ui,
            last_status: None,
            poll_interval: OKAY_POLL_INTERVAL,
            last_seen: None,
            last_seen_at: None,
            diagnostic: String::new(),
        }
    }

    /// Point the poller at another patient device.
    pub fn set_target(&mut self, host: impl Into<String>, port: u16) {
        self.config.patient_host = host.into();
        self.config.patient_port = port;
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn last_status(&self) -> Option<PatientStatus> {
        self.last_status
    }

    pub fn diagnostic(&self) -> &str {
        &self.diagnostic
    }

    /// Wall-clock time of the last successful read
    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen_at
    }

    pub fn ui(&self) -> &U {
        &self.ui
    }

    /// "N.NN s ago" since the last successful read
    pub fn last_seen_text(&self) -> String {
        match self.last_seen {
            Some(seen) => format!("{:.2} s ago", seen.elapsed().as_secs_f64()),
            None => "never".to_string(),
        }
    }

    /// Fetch and interpret the patient's status once.
    pub fn poll_once(&mut self) -> PollOutcome {
        let outcome = match self.fetch() {
            Ok(body) => {
                self.last_seen = Some(Instant::now());
                self.last_seen_at = Some(Utc::now());
                self.diagnostic = format!(
                    "connected to {}:{}",
                    self.config.patient_host, self.config.patient_port
                );
                self.interpret(&body)
            }
            Err(e) => {
                self.diagnostic = describe_transport_error(&e);
                warn!(
                    host = %self.config.patient_host,
                    port = self.config.patient_port,
                    error = %self.diagnostic,
                    "status poll failed"
                );
                PollOutcome::TransportError(self.diagnostic.clone())
            }
        };

        let last_seen = self.last_seen_text();
        self.ui.connectivity(&self.diagnostic, &last_seen);
        outcome
    }

    fn fetch(&self) -> io::Result<String> {
        let addr = resolve_target(&self.config.patient_host, self.config.patient_port)?;

        let mut stream =
            TcpStream::connect_timeout(&addr, Duration::from_millis(self.config.connect_timeout_ms))?;
        stream.set_read_timeout(Some(Duration::from_millis(self.config.read_timeout_ms)))?;

        let mut buffer = Vec::with_capacity(1024);
        stream.read_to_end(&mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    fn interpret(&mut self, body: &str) -> PollOutcome {
        let fields = match decode_report(body) {
            Ok(fields) => fields,
            Err(e) => {
                warn!(error = %e, "unreadable status report");
                self.diagnostic = e.to_string();
                return PollOutcome::Malformed(e.to_string());
            }
        };
        if !fields.is_complete() {
            warn!(?fields, "status report missing fields");
        }

        let report = fields.resolve(self.last_status.unwrap_or_default());
        if let Some(status) = fields.status {
            self.last_status = Some(status);
            self.poll_interval = poll_interval_for(status);
            self.ui.status_changed(status, status.color_hint());
            if status == PatientStatus::NeedsHelp {
                self.ui.needs_help_alert();
            }
        }
        if report.using_gps {
            self.ui.location_updated(Location {
                latitude: report.latitude,
                longitude: report.longitude,
            });
        }

        debug!(status = %report.status, interval_ms = self.poll_interval.as_millis() as u64, "status polled");
        PollOutcome::Report(report)
    }

    /// Poll until `stop` is set, sleeping the adaptive interval between polls.
    pub fn run(&mut self, stop: &AtomicBool) {
        const SLICE: Duration = Duration::from_millis(50);
        while !stop.load(Ordering::SeqCst) {
            self.poll_once();
            let wake = Instant::now() + self.poll_interval;
            while !stop.load(Ordering::SeqCst) && Instant::now() < wake {
                thread::sleep(SLICE.min(wake.saturating_duration_since(Instant::now())));
            }
        }
    }
}

fn describe_transport_error(e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => format!("SocketTimeout: {}", e),
        io::ErrorKind::NotFound => format!("UnknownHost: {}", e),
        io::ErrorKind::ConnectionRefused => format!("ConnectionRefused: {}", e),
        _ => format!("IOException: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct FixedSource(String);

    impl StatusSource for FixedSource {
        fn current_report_json(&self) -> String {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingUi {
        statuses: Vec<(PatientStatus, StatusColor)>,
        locations: Vec<Location>,
        alerts: usize,
        diagnostics: Vec<String>,
    }

    impl MonitorUi for RecordingUi {
        fn status_changed(&mut self, status: PatientStatus, color: StatusColor) {
            self.statuses.push((status, color));
        }
        fn location_updated(&mut self, location: Location) {
            self.locations.push(location);
        }
        fn needs_help_alert(&mut self) {
            self.alerts += 1;
        }
        fn connectivity(&mut self, diagnostic: &str, _last_seen: &str) {
            self.diagnostics.push(diagnostic.to_string());
        }
    }

    fn report(status: PatientStatus) -> StatusReport {
        StatusReport {
            status,
            using_gps: true,
            latitude: 50.067_431,
            longitude: 19.912_592,
            nearest_ble_node: 1,
        }
    }

    fn serve(body: String) -> ServerHandle {
        StatusServer::bind_addr("127.0.0.1:0".parse().unwrap(), FixedSource(body))
            .unwrap()
            .spawn()
            .unwrap()
    }

    fn monitor_for(addr: SocketAddr) -> MonitorConfig {
        MonitorConfig {
            patient_host: addr.ip().to_string(),
            patient_port: addr.port(),
            ..Default::default()
        }
    }

    /// Address nothing listens on
    fn closed_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    }

    #[test]
    fn test_poll_intervals() {
        assert_eq!(poll_interval_for(PatientStatus::NeedsHelp), Duration::from_millis(2000));
        assert_eq!(poll_interval_for(PatientStatus::Pending), Duration::from_millis(2500));
        assert_eq!(poll_interval_for(PatientStatus::Okay), Duration::from_millis(5000));
    }

    #[test]
    fn test_encode_field_order() {
        let json = encode_report(&report(PatientStatus::Pending)).unwrap();
        assert_eq!(
            json,
            r#"{"status":"PENDING","usingGps":true,"latitude":50.067431,"longitude":19.912592,"nearestBleNode":1}"#
        );
    }

    #[test]
    fn test_report_round_trip() {
        for status in [PatientStatus::Okay, PatientStatus::Pending, PatientStatus::NeedsHelp] {
            let original = report(status);
            let decoded = decode_report(&encode_report(&original).unwrap())
                .unwrap()
                .resolve(PatientStatus::Okay);

            assert_eq!(decoded.status, original.status);
            assert_eq!(decoded.using_gps, original.using_gps);
            assert!((decoded.latitude - original.latitude).abs() < 1e-6);
            assert!((decoded.longitude - original.longitude).abs() < 1e-6);
        }
    }

    #[test]
    fn test_decode_missing_fields_use_defaults() {
        let fields = decode_report(r#"{"status":"NEEDS HELP"}"#).unwrap();
        assert!(!fields.is_complete());

        let resolved = fields.resolve(PatientStatus::Okay);
        assert_eq!(resolved.status, PatientStatus::NeedsHelp);
        assert!(!resolved.using_gps);
        assert_eq!(resolved.latitude, 153.0);
        assert_eq!(resolved.longitude, -27.0);
        assert_eq!(resolved.nearest_ble_node, 1);
    }

    #[test]
    fn test_decode_unknown_status_keeps_last() {
        let fields = decode_report(r#"{"status":"ASLEEP","usingGps":false}"#).unwrap();
        assert_eq!(fields.status, None);
        assert_eq!(fields.resolve(PatientStatus::Pending).status, PatientStatus::Pending);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            decode_report("IOException: broken pipe"),
            Err(FallWatchError::MalformedReport(_))
        ));
        assert!(matches!(
            decode_report("[1, 2]"),
            Err(FallWatchError::MalformedReport(_))
        ));
    }

    #[test]
    fn test_resolve_ip_literals_without_lookup() {
        assert_eq!(
            resolve_target("172.20.10.4", 8080).unwrap(),
            "172.20.10.4:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            resolve_target(" [::1] ", 4011).unwrap(),
            "[::1]:4011".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(resolve_target("::1", 1).unwrap().port(), 1);
    }

    #[test]
    fn test_failed_serve_backs_off() {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let runner = thread::spawn(move || {
            let mut attempts = 0;
            serve_until(&thread_stop, Duration::from_millis(100), || {
                attempts += 1;
                Err(FallWatchError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "too many open files",
                )))
            });
            attempts
        });
        thread::sleep(Duration::from_millis(350));
        stop.store(true, Ordering::SeqCst);

        let attempts = runner.join().unwrap();
        assert!((1..=6).contains(&attempts), "attempts = {}", attempts);
    }

    #[test]
    fn test_server_replies_and_closes() {
        let body = encode_report(&report(PatientStatus::Okay)).unwrap();
        let server = serve(body.clone());

        for _ in 0..2 {
            let mut stream = TcpStream::connect(server.local_addr()).unwrap();
            let mut received = String::new();
            stream.read_to_string(&mut received).unwrap();
            assert_eq!(received, body);
        }
        server.shutdown();
    }

    #[test]
    fn test_poller_needs_help_shortens_interval() {
        let server = serve(encode_report(&report(PatientStatus::NeedsHelp)).unwrap());
        let mut poller = StatusPoller::new(monitor_for(server.local_addr()), RecordingUi::default());
        assert_eq!(poller.poll_interval(), OKAY_POLL_INTERVAL);

        let outcome = poller.poll_once();
        server.shutdown();

        assert!(matches!(outcome, PollOutcome::Report(ref r) if r.status == PatientStatus::NeedsHelp));
        assert_eq!(poller.poll_interval(), Duration::from_millis(2000));
        assert_eq!(poller.last_status(), Some(PatientStatus::NeedsHelp));
        assert!(poller.last_seen_at().is_some());

        let ui = poller.ui();
        assert_eq!(ui.statuses, vec![(PatientStatus::NeedsHelp, StatusColor::Red)]);
        assert_eq!(ui.alerts, 1);
        assert_eq!(ui.locations.len(), 1);
    }

    #[test]
    fn test_poller_transport_error_keeps_state() {
        let server = serve(encode_report(&report(PatientStatus::Pending)).unwrap());
        let mut poller = StatusPoller::new(monitor_for(server.local_addr()), RecordingUi::default());
        poller.poll_once();
        server.shutdown();

        poller.set_target("127.0.0.1", closed_addr().port());
        let outcome = poller.poll_once();

        assert!(matches!(outcome, PollOutcome::TransportError(_)));
        assert_eq!(poller.last_status(), Some(PatientStatus::Pending));
        assert_eq!(poller.poll_interval(), PENDING_POLL_INTERVAL);
        assert!(!poller.diagnostic().is_empty());
        assert_eq!(poller.ui().diagnostics.len(), 2);
    }

    #[test]
    fn test_poller_read_timeout() {
        // Accepts but never writes nor closes
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let held = Arc::new(Mutex::new(None));
        let held_clone = Arc::clone(&held);
        let acceptor = thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                *held_clone.lock().unwrap() = Some(stream);
            }
        });

        let config = MonitorConfig {
            read_timeout_ms: 100,
            ..monitor_for(addr)
        };
        let mut poller = StatusPoller::new(config, NullMonitorUi);
        let started = Instant::now();
        let outcome = poller.poll_once();

        assert!(matches!(outcome, PollOutcome::TransportError(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(poller.last_status(), None);
        acceptor.join().unwrap();
    }

    #[test]
    fn test_poller_location_only_when_gps() {
        let body = r#"{"status":"OKAY","usingGps":false,"latitude":1.0,"longitude":2.0,"nearestBleNode":1}"#;
        let server = serve(body.to_string());
        let mut poller = StatusPoller::new(monitor_for(server.local_addr()), RecordingUi::default());
        poller.poll_once();
        server.shutdown();

        assert!(poller.ui().locations.is_empty());
        assert_eq!(poller.ui().statuses, vec![(PatientStatus::Okay, StatusColor::Green)]);
    }

    #[test]
    fn test_poller_malformed_body() {
        let server = serve("garbage".to_string());
        let mut poller = StatusPoller::new(monitor_for(server.local_addr()), RecordingUi::default());
        let outcome = poller.poll_once();
        server.shutdown();

        assert!(matches!(outcome, PollOutcome::Malformed(_)));
        assert_eq!(poller.last_status(), None);
        assert_eq!(poller.poll_interval(), OKAY_POLL_INTERVAL);
    }

    #[test]
    fn test_run_stops_on_flag() {
        let server = serve(encode_report(&report(PatientStatus::Okay)).unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let config = monitor_for(server.local_addr());

        let runner = thread::spawn(move || {
            let mut poller = StatusPoller::new(config, RecordingUi::default());
            poller.run(&thread_stop);
            poller.ui().statuses.len()
        });
        thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::SeqCst);

        let polls = runner.join().unwrap();
        server.shutdown();
        assert_eq!(polls, 1);
    }
}
