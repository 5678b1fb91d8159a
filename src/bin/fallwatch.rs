//! Fallwatch CLI - Command-line interface for Fallwatch
//!
//! Commands:
//! - replay: Detect events in a recorded sample file and print their features
//! - patient: Run the patient device on samples read from stdin
//! - monitor: Poll a patient device and print its status
//! - config: Print the default configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::thread;

use fallwatch::patient::PatientUi;
use fallwatch::pipeline::{parse_sample_line, TimestampUnit};
use fallwatch::protocol::{MonitorUi, PollOutcome, StatusPoller};
use fallwatch::types::{Location, PatientStatus, StatusColor};
use fallwatch::{
    detect_events, FallWatchError, MonitorConfig, PatientConfig, PatientDevice,
    FALLWATCH_VERSION,
};
use tracing_subscriber::EnvFilter;

/// Fallwatch - Fall detection with patient/monitor status exchange
#[derive(Parser)]
#[command(name = "fallwatch")]
#[command(version = FALLWATCH_VERSION)]
#[command(about = "Detect falls from accelerometer data and share patient status", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect events in a recorded sample file (batch mode)
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Unit of the timestamp column
        #[arg(long, value_enum, default_value = "nanos")]
        timestamps: TimestampArg,
    },

    /// Run the patient device; samples on stdin, "confirm" and "location LAT,LON" lines as UI input
    Patient {
        /// Load configuration from a JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Status server listen port
        #[arg(long)]
        port: Option<u16>,

        /// Classification server host
        #[arg(long)]
        classification_host: Option<String>,

        /// Classification server port
        #[arg(long)]
        classification_port: Option<u16>,

        /// Directory for recorded event windows and features
        #[arg(long)]
        record_dir: Option<PathBuf>,

        /// Unit of the timestamp column
        #[arg(long, value_enum, default_value = "nanos")]
        timestamps: TimestampArg,
    },

    /// Poll a patient device and print every status read
    Monitor {
        /// Load configuration from a JSON file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Patient device host
        #[arg(long)]
        host: Option<String>,

        /// Patient device port
        #[arg(long)]
        port: Option<u16>,

        /// Stop after this many polls
        #[arg(long)]
        count: Option<usize>,
    },

    /// Print the default configuration as JSON
    Config {
        #[arg(value_enum)]
        device: DeviceType,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TimestampArg {
    /// Sensor nanoseconds
    Nanos,
    /// Milliseconds, as in recorded windows
    Millis,
}

impl From<TimestampArg> for TimestampUnit {
    fn from(arg: TimestampArg) -> Self {
        match arg {
            TimestampArg::Nanos => TimestampUnit::Nanos,
            TimestampArg::Millis => TimestampUnit::Millis,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum DeviceType {
    Patient,
    Monitor,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), FallWatchCliError> {
    match cli.command {
        Commands::Replay { input, timestamps } => cmd_replay(&input, timestamps.into()),

        Commands::Patient {
            config,
            port,
            classification_host,
            classification_port,
            record_dir,
            timestamps,
        } => {
            let mut patient = match config {
                Some(path) => PatientConfig::from_json(&fs::read_to_string(path)?)?,
                None => PatientConfig::default(),
            };
            if let Some(port) = port {
                patient.listen_port = port;
            }
            if let Some(host) = classification_host {
                patient.classification_host = host;
            }
            if let Some(port) = classification_port {
                patient.classification_port = port;
            }
            if record_dir.is_some() {
                patient.record_dir = record_dir;
            }
            cmd_patient(&patient, timestamps.into())
        }

        Commands::Monitor {
            config,
            host,
            port,
            count,
        } => {
            let mut monitor = match config {
                Some(path) => MonitorConfig::from_json(&fs::read_to_string(path)?)?,
                None => MonitorConfig::default(),
            };
            if let Some(host) = host {
                monitor.patient_host = host;
            }
            if let Some(port) = port {
                monitor.patient_port = port;
            }
            monitor.validate()?;
            cmd_monitor(monitor, count)
        }

        Commands::Config { device } => {
            let json = match device {
                DeviceType::Patient => PatientConfig::default().to_json()?,
                DeviceType::Monitor => MonitorConfig::default().to_json()?,
            };
            println!("{}", json);
            Ok(())
        }
    }
}

fn read_input(input: &Path) -> Result<String, FallWatchCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn cmd_replay(input: &Path, unit: TimestampUnit) -> Result<(), FallWatchCliError> {
    let input_data = read_input(input)?;

    let mut samples = Vec::new();
    for line in input_data.lines() {
        if let Some(sample) = parse_sample_line(line, unit)? {
            samples.push(sample);
        }
    }
    if samples.is_empty() {
        return Err(FallWatchCliError::NoSamples);
    }

    let mut stdout = io::stdout();
    for result in detect_events(samples) {
        match result {
            Ok(features) => writeln!(stdout, "{}", serde_json::to_string(&features)?)?,
            Err(e) => tracing::error!(error = %e, "event refused"),
        }
    }
    stdout.flush()?;
    Ok(())
}

/// Patient UI on the terminal
struct ConsolePatientUi;

impl PatientUi for ConsolePatientUi {
    fn confirmation_needed(&mut self) {
        eprintln!("Detected potential fall. Are you ok? (type \"confirm\")");
    }

    fn status_changed(&mut self, status: PatientStatus, color: StatusColor) {
        println!("{}", serde_json::json!({ "status": status, "color": color }));
    }
}

fn parse_location(text: &str) -> Result<Location, FallWatchCliError> {
    let (lat, lon) = text
        .split_once(',')
        .ok_or_else(|| FallWatchCliError::ParseError(format!("expected LAT,LON, got {:?}", text)))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<f64>()
            .map_err(|_| FallWatchCliError::ParseError(format!("bad coordinate {:?}", v)))
    };
    Ok(Location {
        latitude: parse(lat)?,
        longitude: parse(lon)?,
    })
}

fn cmd_patient(config: &PatientConfig, unit: TimestampUnit) -> Result<(), FallWatchCliError> {
    let device = PatientDevice::start(config, ConsolePatientUi)?;
    eprintln!("Status server listening on port {}", device.local_addr().port());

    let stdin = io::stdin();
    let result = (|| -> Result<(), FallWatchCliError> {
        for line in stdin.lock().lines() {
            let line = line?;
            let trimmed = line.trim();

            if trimmed.eq_ignore_ascii_case("confirm") {
                device.confirm()?;
            } else if let Some(rest) = trimmed.strip_prefix("location ") {
                device.update_location(parse_location(rest)?)?;
            } else if let Some(sample) = parse_sample_line(trimmed, unit)? {
                device.push_sample(sample)?;
            }
        }
        Ok(())
    })();

    device.shutdown();
    result
}

/// Monitor UI on the terminal
struct ConsoleMonitorUi {
    last: Option<PatientStatus>,
}

impl MonitorUi for ConsoleMonitorUi {
    fn status_changed(&mut self, status: PatientStatus, color: StatusColor) {
        if self.last != Some(status) {
            println!("{}", serde_json::json!({ "status": status, "color": color }));
            self.last = Some(status);
        }
    }

    fn location_updated(&mut self, location: Location) {
        println!("{}", serde_json::json!({ "location": location }));
    }

    fn needs_help_alert(&mut self) {
        eprintln!("Someone may need help!");
    }

    fn connectivity(&mut self, diagnostic: &str, last_seen: &str) {
        tracing::debug!(diagnostic, last_seen, "monitor connectivity");
    }
}

fn cmd_monitor(config: MonitorConfig, count: Option<usize>) -> Result<(), FallWatchCliError> {
    let mut poller = StatusPoller::new(config, ConsoleMonitorUi { last: None });

    match count {
        Some(count) => {
            for i in 0..count {
                if let PollOutcome::TransportError(diagnostic) = poller.poll_once() {
                    eprintln!("{} (last seen {})", diagnostic, poller.last_seen_text());
                }
                if i + 1 < count {
                    thread::sleep(poller.poll_interval());
                }
            }
            Ok(())
        }
        None => {
            let stop = AtomicBool::new(false);
            poller.run(&stop);
            Ok(())
        }
    }
}

// Error types

#[derive(Debug)]
enum FallWatchCliError {
    Io(io::Error),
    Core(FallWatchError),
    Json(serde_json::Error),
    NoSamples,
    ParseError(String),
}

impl From<io::Error> for FallWatchCliError {
    fn from(e: io::Error) -> Self {
        FallWatchCliError::Io(e)
    }
}

impl From<FallWatchError> for FallWatchCliError {
    fn from(e: FallWatchError) -> Self {
        FallWatchCliError::Core(e)
    }
}

impl From<serde_json::Error> for FallWatchCliError {
    fn from(e: serde_json::Error) -> Self {
        FallWatchCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<FallWatchCliError> for CliError {
    fn from(e: FallWatchCliError) -> Self {
        match e {
            FallWatchCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths, permissions and ports".to_string()),
            },
            FallWatchCliError::Core(FallWatchError::InvalidConfig(msg)) => CliError {
                code: "INVALID_CONFIG".to_string(),
                message: msg,
                hint: Some("Run 'fallwatch config patient' for a valid example".to_string()),
            },
            FallWatchCliError::Core(FallWatchError::ParseError(msg)) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Expected timestamp,magnitude or timestamp,x,y,z per line".to_string()),
            },
            FallWatchCliError::Core(e) => CliError {
                code: "FALLWATCH_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            FallWatchCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            FallWatchCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No samples found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            FallWatchCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}
