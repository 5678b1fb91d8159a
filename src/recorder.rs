//! Event recorder
//!
//! Dumps each completed event to CSV for offline labelling: the window as
//! `timestamp,magnitude` rows in `windowNNN.csv` and the four features as one
//! row in `featureNNN.csv`.

use crate::detector::FallEvent;
use crate::error::FallWatchError;
use crate::types::ExtractedFeatures;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const MAX_INDEX: u32 = 998;

/// Writes event dumps into one directory
#[derive(Debug, Clone)]
pub struct EventRecorder {
    dir: PathBuf,
}

impl EventRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths for the first index where neither file exists.
    ///
    /// When every index is taken the last one is reused and appended to.
    pub fn next_paths(&self) -> (PathBuf, PathBuf) {
        let paths = |i: u32| {
            (
                self.dir.join(format!("window{:03}.csv", i)),
                self.dir.join(format!("feature{:03}.csv", i)),
            )
        };
        (0..=MAX_INDEX)
            .map(paths)
            .find(|(window, feature)| !window.exists() && !feature.exists())
            .unwrap_or_else(|| paths(MAX_INDEX))
    }

    /// Append the event window and its features; returns the two files written.
    pub fn record(
        &self,
        event: &FallEvent,
        features: &ExtractedFeatures,
    ) -> Result<(PathBuf, PathBuf), FallWatchError> {
        fs::create_dir_all(&self.dir)?;
        let (window_path, feature_path) = self.next_paths();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&window_path)?;
        let mut out = BufWriter::new(file);
        for sample in event.window.iter() {
            writeln!(out, "{},{}", sample.timestamp_ms, sample.magnitude)?;
        }
        out.flush()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&feature_path)?;
        writeln!(
            file,
            "{},{},{},{}",
            features.impact_duration,
            features.impact_violence,
            features.impact_average,
            features.post_impact_average
        )?;

        info!(window = %window_path.display(), features = %feature_path.display(), "event recorded");
        Ok((window_path, feature_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Sample;
    use crate::window::SampleWindow;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("fallwatch-rec-{}", uuid::Uuid::new_v4()))
    }

    fn event() -> FallEvent {
        let window: SampleWindow = [(0, 9.5), (5, 30.25), (10, 2.5)]
            .iter()
            .map(|&(t, m)| Sample::new(t, m))
            .collect();
        FallEvent {
            window,
            trigger_peak_time: 5,
            impact_end: 10,
        }
    }

    fn features() -> ExtractedFeatures {
        ExtractedFeatures {
            impact_duration: 5.0,
            impact_violence: 1.0,
            impact_average: 16.375,
            post_impact_average: 2.5,
        }
    }

    #[test]
    fn test_record_writes_window_and_features() {
        let dir = temp_dir();
        let recorder = EventRecorder::new(&dir);

        let (window_path, feature_path) = recorder.record(&event(), &features()).unwrap();
        assert_eq!(window_path, dir.join("window000.csv"));
        assert_eq!(feature_path, dir.join("feature000.csv"));

        assert_eq!(
            fs::read_to_string(&window_path).unwrap(),
            "0,9.5\n5,30.25\n10,2.5\n"
        );
        assert_eq!(fs::read_to_string(&feature_path).unwrap(), "5,1,16.375,2.5\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_index_skips_taken_slots() {
        let dir = temp_dir();
        let recorder = EventRecorder::new(&dir);
        recorder.record(&event(), &features()).unwrap();

        // A lone feature file still blocks its index
        fs::write(dir.join("feature001.csv"), "").unwrap();

        let (window_path, _) = recorder.record(&event(), &features()).unwrap();
        assert_eq!(window_path, dir.join("window002.csv"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
