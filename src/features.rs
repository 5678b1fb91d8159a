//! Feature extraction
//!
//! This module derives the four event features from a completed fall event:
//! - Impact duration: from the resolved impact start to the recorded impact end
//! - Impact violence: share of impact samples outside the near-rest band
//! - Impact average and post-impact average magnitudes
//!
//! The impact start is resolved by looking back from the trigger peak for a
//! free-fall dip followed by the first sample above the secondary threshold.

use crate::detector::{
    FallEvent, DIP_THRESHOLD, IMPACT_LOOKBACK_MS, REST_BAND_HIGH, REST_BAND_LOW,
    SECONDARY_THRESHOLD,
};
use crate::error::FallWatchError;
use crate::types::ExtractedFeatures;
use crate::window::{SampleWindow, WindowView};

/// Feature extractor for completed fall events
pub struct FeatureExtractor;

impl FeatureExtractor {
    /// Extract features from a completed event.
    pub fn extract(event: &FallEvent) -> Result<ExtractedFeatures, FallWatchError> {
        Self::extract_from(&event.window, event.trigger_peak_time, event.impact_end)
    }

    /// Extract features from a window snapshot and the detector's timing marks.
    ///
    /// Fails with [`FallWatchError::EmptyWindow`] when the impact or post-impact
    /// window holds no sample; such events are refused instead of producing NaN.
    pub fn extract_from(
        window: &SampleWindow,
        trigger_peak_time: i64,
        impact_end: i64,
    ) -> Result<ExtractedFeatures, FallWatchError> {
        let impact_start = resolve_impact_start(window, trigger_peak_time, impact_end);
        let impact_duration = (impact_end - impact_start) as f64;

        let impact_window = window.view(impact_start, impact_end);
        let impact_violence = compute_impact_violence(&impact_window).ok_or_else(|| {
            FallWatchError::EmptyWindow(format!(
                "no samples between impact start {} and impact end {}",
                impact_start, impact_end
            ))
        })?;
        // Non-empty, checked above
        let impact_average = impact_window.mean().unwrap_or_default();

        let post_impact_average = window
            .view(impact_end, i64::MAX)
            .mean().ok_or_else(|| {
            FallWatchError::EmptyWindow(format!("no samples at or after impact end {}", impact_end))
        })?;

        Ok(ExtractedFeatures {
            impact_duration,
            impact_violence,
            impact_average,
            post_impact_average,
        })
    }
}

/// Resolve where the impact began.
///
/// Looks at `[impact_end - lookback, trigger_peak_time]` for the first free-fall
/// dip, then for the first sample above the secondary threshold after it. Falls
/// back to the trigger peak when either is missing.
pub fn resolve_impact_start(window: &SampleWindow, trigger_peak_time: i64, impact_end: i64) -> i64 {
    let lookback = window.view(impact_end - IMPACT_LOOKBACK_MS, trigger_peak_time);

    let dip = match lookback.first_where_less_than(DIP_THRESHOLD) {
        Some(dip) => dip,
        None => return trigger_peak_time,
    };

    lookback
        .starting_at(dip.timestamp_ms)
        .first_where_greater_than(SECONDARY_THRESHOLD)
        .map(|start| start.timestamp_ms)
        .unwrap_or(trigger_peak_time)
}

/// Fraction of samples outside the near-rest band, `None` for an empty window
fn compute_impact_violence(impact_window: &WindowView<'_>) -> Option<f64> {
    if impact_window.is_empty() {
        return None;
    }
    let total = impact_window.len();
    let at_rest = impact_window.count_in_range(REST_BAND_LOW, REST_BAND_HIGH);
    Some((total - at_rest) as f64 / total as f64)
}
