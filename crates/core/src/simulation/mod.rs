//! Deterministic, offline calibration runs with synthetic taps.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    AudioEngine, CalibrationEvent, CalibrationPhase, Clock, LatencyCalibrator, ManualClock,
    Millis, Result, SchedulerEvent, TapSummary, TimingAnalyzer, TICK_INTERVAL_MS,
};

/// Radians between successive jitter samples; spreads them evenly over the
/// unit circle without repeating.
const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Constant delay of every synthetic tap behind its beat.
    pub latency_ms: Millis,
    /// Peak deviation added on top of the latency.
    pub jitter_ms: Millis,
    /// Give up once this beat index has fired.
    pub max_beats: i64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            latency_ms: 45.0,
            jitter_ms: 3.0,
            max_beats: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub phase: CalibrationPhase,
    pub latency_ms: Option<i64>,
    pub taps: usize,
    pub beats_elapsed: i64,
    pub summary: TapSummary,
}

/// Runs one calibration session against a [`ManualClock`], tapping once per
/// real beat at `scheduled + latency + jitter`.
pub fn simulate_calibration(settings: &SimulationSettings) -> Result<SimulationReport> {
    let clock = ManualClock::shared(0.0);
    let mut calibrator = LatencyCalibrator::new(clock.clone(), AudioEngine::silent()?);
    let mut pending: VecDeque<Millis> = VecDeque::new();
    let mut beats_elapsed = 0;
    let mut taps = 0;

    calibrator.start();
    while calibrator.phase().is_active() && beats_elapsed < settings.max_beats {
        clock.advance(TICK_INTERVAL_MS as f64);

        for event in calibrator.tick() {
            if let CalibrationEvent::Scheduler(SchedulerEvent::Beat {
                beat_index,
                scheduled_ms,
            }) = event
            {
                beats_elapsed = beat_index;
                if calibrator.phase().accepts_taps() {
                    let jitter = settings.jitter_ms * (beat_index as f64 * GOLDEN_ANGLE).sin();
                    pending.push_back(scheduled_ms + settings.latency_ms + jitter);
                }
            }
        }

        while let Some(&due) = pending.front() {
            if due > clock.now_ms() {
                break;
            }
            pending.pop_front();
            taps += 1;
            if let Some(event) = calibrator.tap(due) {
                tracing::debug!(?event, taps, "simulated tap changed calibration state");
            }
        }
    }

    let session = calibrator.session();
    Ok(SimulationReport {
        phase: session.phase,
        latency_ms: calibrator.result(),
        taps,
        beats_elapsed,
        summary: TimingAnalyzer::summarize(&session.offsets),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MIN_TAPS_BEFORE_LOCK;

    #[test]
    fn converges_on_the_injected_latency() {
        let report = simulate_calibration(&SimulationSettings::default()).unwrap();

        assert_eq!(report.phase, CalibrationPhase::Done);
        let latency = report.latency_ms.expect("calibration should finish");
        assert!((latency - 45).abs() <= 1, "latency was {latency}");
        assert!(report.summary.consistency_ms <= 3.0);
        assert_eq!(report.summary.count, report.taps);
    }

    #[test]
    fn handles_negative_latency_exactly() {
        let settings = SimulationSettings {
            latency_ms: -10.0,
            jitter_ms: 0.0,
            max_beats: 64,
        };
        let report = simulate_calibration(&settings).unwrap();

        assert_eq!(report.latency_ms, Some(-10));
        // Locks on the eighth tap, then needs fifteen confirmations.
        assert_eq!(report.taps, MIN_TAPS_BEFORE_LOCK + 15);
    }

    #[test]
    fn stops_at_the_beat_budget_without_a_result() {
        let settings = SimulationSettings {
            max_beats: 6,
            ..Default::default()
        };
        let report = simulate_calibration(&settings).unwrap();

        assert_eq!(report.phase, CalibrationPhase::Tapping);
        assert_eq!(report.latency_ms, None);
        assert!(report.taps < MIN_TAPS_BEFORE_LOCK);
        assert_eq!(report.beats_elapsed, 6);
    }

    #[test]
    fn report_serialises_to_json() {
        let report = simulate_calibration(&SimulationSettings::default()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["phase"], "done");
        assert!(json["summary"]["average_ms"].is_number());
    }
}
