//! Fall event detection
//!
//! A finite-state machine consumes one magnitude sample at a time and tracks a
//! fall-like sequence: a triggering peak, the post-peak interval in which the
//! impact is resolved, and the post-fall interval in which the body settles.
//! When the post-fall interval runs out the next step yields a [`FallEvent`]
//! carrying the accumulated window.
//!
//! Transitions are computed by the pure [`transition`] function; the detector
//! applies the returned [`StepEffects`] to its window and timing scalars.

use crate::types::{Sample, GRAVITY_EARTH};
use crate::window::SampleWindow;
use tracing::{debug, info};

/// Magnitude that triggers or renews an event (m/s²)
pub const PEAK_THRESHOLD: f64 = 3.0 * GRAVITY_EARTH;
/// Magnitude that extends the impact (m/s²)
pub const SECONDARY_THRESHOLD: f64 = PEAK_THRESHOLD / 2.0;
/// Magnitude below which a sample counts as a free-fall dip (m/s²)
pub const DIP_THRESHOLD: f64 = 0.7 * GRAVITY_EARTH;
/// Lower bound of the near-rest band (m/s²)
pub const REST_BAND_LOW: f64 = 0.8 * GRAVITY_EARTH;
/// Upper bound of the near-rest band (m/s²)
pub const REST_BAND_HIGH: f64 = 1.2 * GRAVITY_EARTH;

pub const POST_PEAK_TIMEOUT_MS: i64 = 1000;
pub const POST_FALL_TIMEOUT_MS: i64 = 2000;
pub const WINDOW_MAX_AGE_MS: i64 = POST_PEAK_TIMEOUT_MS + POST_FALL_TIMEOUT_MS;
const PRE_IMPACT_MS: i64 = 500;
pub const IMPACT_LOOKBACK_MS: i64 = POST_PEAK_TIMEOUT_MS + PRE_IMPACT_MS;

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorState {
    #[default]
    WaitingForPeak,
    PostPeak {
        post_peak_start: i64,
    },
    PostFall {
        post_fall_start: i64,
    },
    Finished,
}

/// Side effects of a single transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepEffects {
    /// Append the sample to the window
    pub append: bool,
    /// The sample is a new trigger peak: trim the window and record its time
    pub peak: bool,
    /// New candidate impact end
    pub impact_end: Option<i64>,
    /// Emit the completed event
    pub complete: bool,
}

/// Scalars the transition function reads besides the state itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransitionContext {
    pub trigger_peak_time: i64,
    pub last_reading_timestamp: i64,
}

/// Compute the next state and the effects of feeding `sample` in `state`.
pub fn transition(
    state: DetectorState,
    sample: &Sample,
    ctx: &TransitionContext,
) -> (DetectorState, StepEffects) {
    let ts = sample.timestamp_ms;
    let is_peak = sample.magnitude >= PEAK_THRESHOLD;

    match state {
        DetectorState::WaitingForPeak => {
            let effects = StepEffects {
                append: true,
                peak: is_peak,
                ..Default::default()
            };
            if is_peak {
                (DetectorState::PostPeak { post_peak_start: ts }, effects)
            } else {
                (state, effects)
            }
        }

        DetectorState::PostPeak { post_peak_start } => {
            let mut effects = StepEffects {
                append: true,
                ..Default::default()
            };

            if ts - post_peak_start > POST_PEAK_TIMEOUT_MS {
                return (DetectorState::PostFall { post_fall_start: ts }, effects);
            }

            if is_peak {
                effects.peak = true;
                return (DetectorState::PostPeak { post_peak_start: ts }, effects);
            }

            if sample.magnitude >= SECONDARY_THRESHOLD {
                effects.impact_end = Some(ts);
            }
            // First sample after the trigger always closes the impact at least here
            if ctx.last_reading_timestamp == ctx.trigger_peak_time {
                effects.impact_end = Some(ts);
            }
            (state, effects)
        }

        DetectorState::PostFall { post_fall_start } => {
            if ts - post_fall_start > POST_FALL_TIMEOUT_MS {
                return (DetectorState::Finished, StepEffects::default());
            }

            let effects = StepEffects {
                append: true,
                peak: is_peak,
                ..Default::default()
            };
            if is_peak {
                (DetectorState::PostPeak { post_peak_start: ts }, effects)
            } else {
                (state, effects)
            }
        }

        DetectorState::Finished => (
            state,
            StepEffects {
                complete: true,
                ..Default::default()
            },
        ),
    }
}

/// A completed fall-like event: the accumulated window plus the timing marks
/// the feature extractor needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FallEvent {
    pub window: SampleWindow,
    pub trigger_peak_time: i64,
    pub impact_end: i64,
}

/// Stateful fall event detector owning the event window
#[derive(Debug, Clone, Default)]
pub struct FallEventDetector {
    state: DetectorState,
    window: SampleWindow,
    trigger_peak_time: i64,
    impact_end: i64,
    last_reading_timestamp: i64,
}

impl FallEventDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn trigger_peak_time(&self) -> i64 {
        self.trigger_peak_time
    }

    pub fn impact_end(&self) -> i64 {
        self.impact_end
    }

    pub fn last_reading_timestamp(&self) -> i64 {
        self.last_reading_timestamp
    }

    /// Advance the machine by one sample without resetting it.
    ///
    /// Returns the completed event on the step after the post-fall interval
    /// ran out; the caller must [`reset`](Self::reset) before feeding more.
    pub fn step(&mut self, sample: Sample) -> Option<FallEvent> {
        let ctx = TransitionContext {
            trigger_peak_time: self.trigger_peak_time,
            last_reading_timestamp: self.last_reading_timestamp,
        };
        let (next, effects) = transition(self.state, &sample, &ctx);

        if effects.complete {
            return Some(FallEvent {
                window: self.window.snapshot(),
                trigger_peak_time: self.trigger_peak_time,
                impact_end: self.impact_end,
            });
        }

        if effects.append {
            self.window.append(sample);
        }
        if effects.peak {
            self.window
                .remove_older_than_by(sample.timestamp_ms, WINDOW_MAX_AGE_MS);
            self.trigger_peak_time = sample.timestamp_ms;
        }
        if let Some(end) = effects.impact_end {
            self.impact_end = end;
        }

        if next != self.state {
            debug!(
                from = ?self.state,
                to = ?next,
                timestamp_ms = sample.timestamp_ms,
                magnitude = sample.magnitude,
                "detector transition"
            );
        }
        self.state = next;
        self.last_reading_timestamp = sample.timestamp_ms;
        None
    }

    /// Advance by one sample and reset after a completed event.
    pub fn process(&mut self, sample: Sample) -> Option<FallEvent> {
        let event = self.step(sample)?;
        info!(
            trigger_peak_time = event.trigger_peak_time,
            impact_end = event.impact_end,
            samples = event.window.len(),
            "fall-like event completed"
        );
        self.reset();
        Some(event)
    }

    /// Clear all timing scalars, discard the window, and wait for a new peak.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
