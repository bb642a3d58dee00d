//! Adaptive pacing for migration transactions.
//!
//! Each completed migration transaction contributes a sample: the time spent
//! inside the per-row loop and the wall time of the whole transaction. The
//! ratio of the two sums estimates how much of a transaction is useful work
//! versus overhead (BEGIN/COMMIT, WAL housekeeping), and the next
//! transaction's work budget is the configured maximum scaled by that ratio.

use std::time::Duration;

/// Capacity of the sample ring.
pub(crate) const NUMBER_OF_SAMPLES: usize = 10;

/// Pacing knobs for the migrate handle.
#[derive(Debug, Clone, Copy)]
pub struct PacingConfig {
    /// Upper bound on the wall time one migration transaction should take.
    pub max_expecting_duration: Duration,

    /// Budget used while the sample ring is empty or degenerate.
    pub initialize_duration: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            max_expecting_duration: Duration::from_millis(10),
            initialize_duration: Duration::from_millis(5),
        }
    }
}

/// One timing observation. Zeroed slots are unfilled.
#[derive(Debug, Clone, Copy, Default)]
struct Sample {
    /// Seconds spent inside the per-row loop.
    within: f64,
    /// Seconds from BEGIN through COMMIT.
    whole: f64,
}

/// Fixed-size circular buffer of transaction timing samples.
#[derive(Debug)]
pub(crate) struct SampleRing {
    samples: [Sample; NUMBER_OF_SAMPLES],
    cursor: usize,
}

impl SampleRing {
    pub(crate) fn new() -> Self {
        Self {
            samples: [Sample::default(); NUMBER_OF_SAMPLES],
            cursor: 0,
        }
    }

    /// Record one transaction. Samples that do not satisfy
    /// `0 < within < whole` are discarded.
    pub(crate) fn record(&mut self, within: Duration, whole: Duration) {
        let within = within.as_secs_f64();
        let whole = whole.as_secs_f64();
        debug_assert!(self.cursor < NUMBER_OF_SAMPLES);
        if within <= 0.0 || whole <= within {
            return;
        }
        self.samples[self.cursor] = Sample { within, whole };
        self.cursor = (self.cursor + 1) % NUMBER_OF_SAMPLES;
    }

    /// The work budget for the next transaction.
    ///
    /// `max * Σwithin / Σwhole`, falling back to the initial duration when
    /// the ratio is degenerate (empty ring, non-positive, NaN) or the scaled
    /// value exceeds the maximum.
    pub(crate) fn budget(&self, config: &PacingConfig) -> Duration {
        let mut total_within = 0.0;
        let mut total_whole = 0.0;
        for sample in &self.samples {
            if sample.within > 0.0 && sample.whole > 0.0 {
                total_within += sample.within;
                total_whole += sample.whole;
            }
        }
        let max = config.max_expecting_duration.as_secs_f64();
        // Ratio first: identical sums divide to exactly 1.0, keeping the
        // budget at the maximum instead of a rounding hair above it.
        let budget = max * (total_within / total_whole);
        if budget > max || budget <= 0.0 || budget.is_nan() {
            return config.initialize_duration;
        }
        Duration::from_secs_f64(budget)
    }
}
