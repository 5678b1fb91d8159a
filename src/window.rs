//! Sample window
//!
//! Chronologically ordered buffer of accelerometer samples. Samples arrive in
//! non-decreasing timestamp order, so insertion order is chronological order
//! and age-based trimming only ever pops from the front.

use crate::types::Sample;
use std::collections::VecDeque;

/// Ordered buffer of `(timestamp, magnitude)` samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleWindow {
    samples: VecDeque<Sample>,
}

impl SampleWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. A sample sharing the newest timestamp replaces its value
    /// in place, so timestamps stay unique.
    pub fn append(&mut self, sample: Sample) {
        if let Some(last) = self.samples.back_mut() {
            if last.timestamp_ms == sample.timestamp_ms {
                last.magnitude = sample.magnitude;
                return;
            }
        }
        self.samples.push_back(sample);
    }

    /// Drop leading samples with `reference - timestamp > max_age`, stopping at
    /// the first sample that is kept.
    pub fn remove_older_than_by(&mut self, reference: i64, max_age: i64) {
        while let Some(front) = self.samples.front() {
            if reference - front.timestamp_ms > max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop leading samples strictly older than `reference`.
    pub fn remove_older_than(&mut self, reference: i64) {
        self.remove_older_than_by(reference, 0);
    }

    /// Drop every sample with `timestamp > reference`.
    pub fn remove_newer_than(&mut self, reference: i64) {
        self.samples.retain(|s| s.timestamp_ms <= reference);
    }

    /// Independent copy of the window
    pub fn snapshot(&self) -> SampleWindow {
        self.clone()
    }

    /// Copy of the samples with `lower <= timestamp <= upper`.
    pub fn between(&self, lower: i64, upper: i64) -> SampleWindow {
        self.view(lower, upper).iter().copied().collect()
    }

    /// Borrowed view of the samples with `lower <= timestamp <= upper`
    pub fn view(&self, lower: i64, upper: i64) -> WindowView<'_> {
        let start = self.samples.partition_point(|s| s.timestamp_ms < lower);
        let end = self
            .samples
            .partition_point(|s| s.timestamp_ms <= upper)
            .max(start);
        WindowView {
            samples: &self.samples,
            start,
            end,
        }
    }

    /// First sample in chronological order with `magnitude > threshold`
    pub fn first_where_greater_than(&self, threshold: f64) -> Option<Sample> {
        self.samples.iter().find(|s| s.magnitude > threshold).copied()
    }

    /// First sample in chronological order with `magnitude < threshold`
    pub fn first_where_less_than(&self, threshold: f64) -> Option<Sample> {
        self.samples.iter().find(|s| s.magnitude < threshold).copied()
    }

    /// Number of samples with `lower <= magnitude <= upper`
    pub fn count_in_range(&self, lower: f64, upper: f64) -> usize {
        self.samples
            .iter()
            .filter(|s| s.magnitude >= lower && s.magnitude <= upper)
            .count()
    }

    /// Mean magnitude, `None` for an empty window
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.magnitude).sum();
        Some(sum / self.samples.len() as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> Option<Sample> {
        self.samples.front().copied()
    }

    pub fn last(&self) -> Option<Sample> {
        self.samples.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}

/// Contiguous time range of a [`SampleWindow`], read without copying
#[derive(Debug, Clone, Copy)]
pub struct WindowView<'a> {
    samples: &'a VecDeque<Sample>,
    start: usize,
    end: usize,
}

impl<'a> WindowView<'a> {
    /// Narrow the view to samples with `timestamp >= lower`.
    pub fn starting_at(self, lower: i64) -> WindowView<'a> {
        let skip = self.iter().take_while(|s| s.timestamp_ms < lower).count();
        WindowView {
            start: self.start + skip,
            ..self
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a Sample> {
        self.samples.range(self.start..self.end)
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn first_where_greater_than(&self, threshold: f64) -> Option<Sample> {
        self.iter().find(|s| s.magnitude > threshold).copied()
    }

    pub fn first_where_less_than(&self, threshold: f64) -> Option<Sample> {
        self.iter().find(|s| s.magnitude < threshold).copied()
    }

    pub fn count_in_range(&self, lower: f64, upper: f64) -> usize {
        self.iter()
            .filter(|s| s.magnitude >= lower && s.magnitude <= upper)
            .count()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        let sum: f64 = self.iter().map(|s| s.magnitude).sum();
        Some(sum / self.len() as f64)
    }
}

impl FromIterator<Sample> for SampleWindow {
    fn from_iter<I: IntoIterator<Item = Sample>>(iter: I) -> Self {
        let mut window = SampleWindow::new();
        for sample in iter {
            window.append(sample);
        }
        window
    }
}
