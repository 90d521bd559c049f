use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Millis;

const PERFECT_WINDOW_MS: f64 = 20.0;
const GOOD_WINDOW_MS: f64 = 50.0;
const OKAY_WINDOW_MS: f64 = 100.0;

/// Judgement of a single tap against its nearest beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TapRating {
    Perfect,
    Good,
    Okay,
    Miss,
}

impl TapRating {
    /// Lowercase name used in reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Perfect => "perfect",
            Self::Good => "good",
            Self::Okay => "okay",
            Self::Miss => "miss",
        }
    }
}

impl fmt::Display for TapRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted tap. Owned by the caller, never by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapSample {
    pub timestamp_ms: Millis,
    /// Negative when early, positive when late.
    pub offset_ms: Millis,
}

impl TapSample {
    /// Rating of this tap's offset.
    pub fn rating(&self) -> TapRating {
        TimingAnalyzer::rating(self.offset_ms)
    }
}

/// Aggregate view over a run of tap offsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TapSummary {
    pub count: usize,
    pub average_ms: Millis,
    pub consistency_ms: Millis,
    pub perfect: usize,
    pub good: usize,
    pub okay: usize,
    pub miss: usize,
}

/// Stateless beat arithmetic shared by the scheduler and the calibrator.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimingAnalyzer;

impl TimingAnalyzer {
    /// Milliseconds between consecutive beats.
    pub fn interval_ms(bpm: f64) -> Millis {
        60_000.0 / bpm
    }

    /// Signed distance from `tap_ms` to the nearest beat of the grid anchored
    /// at `start_ms`.
    ///
    /// Ties round away from zero, so a tap exactly between two beats is
    /// judged early against the later one. Taps far from the grid still
    /// resolve to some beat; there is no "nothing nearby" result.
    pub fn offset(tap_ms: Millis, start_ms: Millis, interval_ms: Millis) -> Millis {
        let elapsed = tap_ms - start_ms;
        let beat_number = if interval_ms > 0.0 {
            (elapsed / interval_ms).round()
        } else {
            0.0
        };
        let nearest_beat = start_ms + beat_number * interval_ms;
        tap_ms - nearest_beat
    }

    /// Buckets `|offset_ms|` into the 20/50/100 ms windows, inclusive.
    pub fn rating(offset_ms: Millis) -> TapRating {
        let magnitude = offset_ms.abs();
        if magnitude <= PERFECT_WINDOW_MS {
            TapRating::Perfect
        } else if magnitude <= GOOD_WINDOW_MS {
            TapRating::Good
        } else if magnitude <= OKAY_WINDOW_MS {
            TapRating::Okay
        } else {
            // NaN lands here as well.
            TapRating::Miss
        }
    }

    /// Arithmetic mean, 0 for an empty slice.
    pub fn average(offsets: &[Millis]) -> Millis {
        if offsets.is_empty() {
            return 0.0;
        }
        offsets.iter().sum::<f64>() / offsets.len() as f64
    }

    /// Population standard deviation, 0 for fewer than two samples.
    pub fn consistency(offsets: &[Millis]) -> Millis {
        if offsets.len() < 2 {
            return 0.0;
        }
        let mean = Self::average(offsets);
        let squared: f64 = offsets.iter().map(|o| (o - mean) * (o - mean)).sum();
        (squared / offsets.len() as f64).sqrt()
    }

    /// Count, mean, spread and per-rating totals for a run of offsets.
    pub fn summarize(offsets: &[Millis]) -> TapSummary {
        let mut summary = TapSummary {
            count: offsets.len(),
            average_ms: Self::average(offsets),
            consistency_ms: Self::consistency(offsets),
            ..Default::default()
        };

        for offset in offsets {
            match Self::rating(*offset) {
                TapRating::Perfect => summary.perfect += 1,
                TapRating::Good => summary.good += 1,
                TapRating::Okay => summary.okay += 1,
                TapRating::Miss => summary.miss += 1,
            }
        }

        summary
    }
}
