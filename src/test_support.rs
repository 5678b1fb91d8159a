//! Synthetic accelerometer streams for tests

use crate::types::{Sample, GRAVITY_EARTH};

/// Builds a constant-rate stream out of segments held at a multiple of gravity.
pub(crate) struct StreamBuilder {
    period_ms: i64,
    cursor_ms: i64,
    samples: Vec<Sample>,
}

impl StreamBuilder {
    pub(crate) fn new(rate_hz: i64) -> Self {
        Self {
            period_ms: 1000 / rate_hz,
            cursor_ms: 0,
            samples: Vec::new(),
        }
    }

    /// Hold `g` times standard gravity for `duration_ms`.
    pub(crate) fn hold(mut self, g: f64, duration_ms: i64) -> Self {
        let mut t = 0;
        while t < duration_ms {
            self.samples
                .push(Sample::new(self.cursor_ms + t, g * GRAVITY_EARTH));
            t += self.period_ms;
        }
        self.cursor_ms += duration_ms;
        self
    }

    pub(crate) fn build(self) -> Vec<Sample> {
        self.samples
    }
}

/// Stream from the reference scenario: rest, 50 ms spike at 3.5 g, 300 ms dip at
/// 0.3 g, 200 ms rebound at 1.6 g, then rest long enough to close the event.
pub(crate) fn spike_dip_rebound_stream() -> Vec<Sample> {
    StreamBuilder::new(200)
        .hold(1.0, 2000)
        .hold(3.5, 50)
        .hold(0.3, 300)
        .hold(1.6, 200)
        .hold(1.0, 4000)
        .build()
}

/// Stream with a free-fall dip before the impact spike.
pub(crate) fn free_fall_impact_stream() -> Vec<Sample> {
    StreamBuilder::new(200)
        .hold(1.0, 2000)
        .hold(0.3, 300)
        .hold(3.5, 50)
        .hold(1.6, 100)
        .hold(1.0, 4000)
        .build()
}
