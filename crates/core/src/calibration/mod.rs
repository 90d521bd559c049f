//! Audio latency calibration.
//!
//! The user taps along to a fixed 90 BPM click. Every tap's raw offset from
//! the un-compensated grid is collected, and the running mean is watched
//! until it settles: once it moves by at most [`STABILITY_THRESHOLD_MS`]
//! between taps the session locks, and if it then stays inside that band
//! for [`CONFIRMATION_BEATS`] taps the rounded mean becomes the device
//! latency.

use serde::{Deserialize, Serialize};

use crate::{
    AudioEngine, BeatSchedule, BeatScheduler, Clock, Millis, SchedulerEvent, TimingAnalyzer,
    DEFAULT_COUNT_IN_BEATS,
};

/// Fixed tempo of every calibration session.
pub const CALIBRATION_BPM: f64 = 90.0;
pub const STABILITY_THRESHOLD_MS: Millis = 2.0;
pub const CONFIRMATION_BEATS: u32 = 16;
pub const MIN_TAPS_BEFORE_LOCK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationPhase {
    Ready,
    Counting,
    Tapping,
    Locked,
    Done,
    Cancelled,
}

impl CalibrationPhase {
    /// Phases during which the internal scheduler is running.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Counting | Self::Tapping | Self::Locked)
    }

    /// Phases in which taps are recorded.
    pub fn accepts_taps(self) -> bool {
        matches!(self, Self::Tapping | Self::Locked)
    }
}

/// State of one calibration attempt.
///
/// `locked_average` is only ever set while the phase is `Locked` or `Done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSession {
    pub phase: CalibrationPhase,
    pub offsets: Vec<Millis>,
    pub locked_average: Option<Millis>,
    pub confirmation_count: u32,
    pub previous_average: Option<Millis>,
}

impl CalibrationSession {
    fn in_phase(phase: CalibrationPhase) -> Self {
        Self {
            phase,
            offsets: Vec::new(),
            locked_average: None,
            confirmation_count: 0,
            previous_average: None,
        }
    }
}

impl Default for CalibrationSession {
    fn default() -> Self {
        Self::in_phase(CalibrationPhase::Ready)
    }
}

/// State changes reported by [`LatencyCalibrator`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CalibrationEvent {
    Scheduler(SchedulerEvent),
    TappingStarted,
    Locked { average_ms: Millis },
    /// The mean drifted out of the locked band; collection continues.
    Unlocked { average_ms: Millis },
    Complete { latency_ms: i64 },
}

/// Convergence detector driving its own [`BeatScheduler`].
#[derive(Debug)]
pub struct LatencyCalibrator<C: Clock> {
    scheduler: BeatScheduler<C>,
    session: CalibrationSession,
}

impl<C: Clock> LatencyCalibrator<C> {
    pub fn new(clock: C, audio: AudioEngine) -> Self {
        let mut scheduler = BeatScheduler::new(clock, audio);
        scheduler.set_bpm(CALIBRATION_BPM);
        // Offsets are measured against the raw grid.
        scheduler.set_audio_latency_ms(0.0);
        Self {
            scheduler,
            session: CalibrationSession::default(),
        }
    }

    pub fn session(&self) -> &CalibrationSession {
        &self.session
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.session.phase
    }

    pub fn schedule(&self) -> BeatSchedule {
        self.scheduler.schedule()
    }

    /// Locked latency in whole milliseconds, available once done.
    pub fn result(&self) -> Option<i64> {
        match self.session.phase {
            CalibrationPhase::Done => self.session.locked_average.map(|avg| avg.round() as i64),
            _ => None,
        }
    }

    /// Begins a fresh session. Ignored while a session is already running.
    pub fn start(&mut self) -> Vec<CalibrationEvent> {
        if self.session.phase.is_active() {
            return Vec::new();
        }

        self.session = CalibrationSession::in_phase(CalibrationPhase::Counting);
        self.scheduler.set_audio_latency_ms(0.0);
        tracing::debug!(bpm = CALIBRATION_BPM, "calibration started");

        let events = self
            .scheduler
            .start_at(CALIBRATION_BPM, DEFAULT_COUNT_IN_BEATS);
        self.absorb(events)
    }

    /// Pumps the internal scheduler. No-op outside an active session.
    pub fn tick(&mut self) -> Vec<CalibrationEvent> {
        if !self.session.phase.is_active() {
            return Vec::new();
        }
        let events = self.scheduler.tick();
        self.absorb(events)
    }

    /// Records a tap at `timestamp_ms`. Ignored outside `Tapping`/`Locked`.
    pub fn tap(&mut self, timestamp_ms: Millis) -> Option<CalibrationEvent> {
        if !self.session.phase.accepts_taps() {
            return None;
        }
        let sample = self.scheduler.evaluate_tap(timestamp_ms)?;
        self.record_offset(sample.offset_ms)
    }

    /// Abandons the session from any phase. No result is produced.
    pub fn cancel(&mut self) {
        self.scheduler.stop();
        tracing::debug!(
            phase = ?self.session.phase,
            taps = self.session.offsets.len(),
            "calibration cancelled"
        );
        self.session = CalibrationSession::in_phase(CalibrationPhase::Cancelled);
    }

    fn absorb(&mut self, events: Vec<SchedulerEvent>) -> Vec<CalibrationEvent> {
        let mut out = Vec::with_capacity(events.len() + 1);
        for event in events {
            out.push(CalibrationEvent::Scheduler(event));
            if event == SchedulerEvent::CountInComplete
                && self.session.phase == CalibrationPhase::Counting
            {
                self.session.phase = CalibrationPhase::Tapping;
                tracing::debug!("calibration accepting taps");
                out.push(CalibrationEvent::TappingStarted);
            }
        }
        out
    }

    fn record_offset(&mut self, offset_ms: Millis) -> Option<CalibrationEvent> {
        let session = &mut self.session;
        session.offsets.push(offset_ms);
        let average = TimingAnalyzer::average(&session.offsets);

        match session.phase {
            CalibrationPhase::Tapping => {
                let settled = session.offsets.len() >= MIN_TAPS_BEFORE_LOCK
                    && session
                        .previous_average
                        .is_some_and(|previous| (average - previous).abs() <= STABILITY_THRESHOLD_MS);

                if settled {
                    session.phase = CalibrationPhase::Locked;
                    session.locked_average = Some(average);
                    session.confirmation_count = 1;
                    tracing::debug!(average, taps = session.offsets.len(), "calibration locked");
                    return Some(CalibrationEvent::Locked {
                        average_ms: average,
                    });
                }

                session.previous_average = Some(average);
                None
            }
            CalibrationPhase::Locked => {
                let locked = session.locked_average?;

                if (average - locked).abs() > STABILITY_THRESHOLD_MS {
                    session.phase = CalibrationPhase::Tapping;
                    session.locked_average = None;
                    session.confirmation_count = 0;
                    session.previous_average = Some(average);
                    tracing::debug!(average, locked, "calibration drifted; unlocking");
                    return Some(CalibrationEvent::Unlocked {
                        average_ms: average,
                    });
                }

                session.confirmation_count += 1;
                if session.confirmation_count < CONFIRMATION_BEATS {
                    return None;
                }

                session.phase = CalibrationPhase::Done;
                let latency_ms = locked.round() as i64;
                tracing::debug!(latency_ms, taps = session.offsets.len(), "calibration done");
                self.scheduler.stop();
                Some(CalibrationEvent::Complete { latency_ms })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::ManualClock;

    const SCENARIO: [Millis; 8] = [40.0, 42.0, 41.0, 43.0, 40.0, 44.0, 41.0, 42.0];

    fn calibrator() -> (LatencyCalibrator<Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = ManualClock::shared(0.0);
        let audio = AudioEngine::silent().unwrap();
        (LatencyCalibrator::new(clock.clone(), audio), clock)
    }

    fn reach_tapping(
        calibrator: &mut LatencyCalibrator<Arc<ManualClock>>,
        clock: &ManualClock,
    ) -> Vec<CalibrationEvent> {
        let mut events = calibrator.start();
        while calibrator.phase() == CalibrationPhase::Counting {
            clock.advance(10.0);
            events.extend(calibrator.tick());
        }
        events
    }

    fn lock_with_scenario(calibrator: &mut LatencyCalibrator<Arc<ManualClock>>) {
        for offset in &SCENARIO[..7] {
            assert_eq!(calibrator.record_offset(*offset), None);
        }
        assert!(matches!(
            calibrator.record_offset(SCENARIO[7]),
            Some(CalibrationEvent::Locked { .. })
        ));
    }

    #[test]
    fn start_runs_scheduler_at_calibration_tempo_without_latency() {
        let (mut calibrator, _clock) = calibrator();
        let events = calibrator.start();

        assert_eq!(calibrator.phase(), CalibrationPhase::Counting);
        let schedule = calibrator.schedule();
        assert!(schedule.is_playing);
        assert_eq!(schedule.bpm, CALIBRATION_BPM);
        assert_eq!(schedule.audio_latency_ms, 0.0);
        assert!(matches!(
            events.as_slice(),
            [CalibrationEvent::Scheduler(SchedulerEvent::CountIn {
                beats_remaining: 4,
                ..
            })]
        ));
    }

    #[test]
    fn enters_tapping_when_count_in_completes() {
        let (mut calibrator, clock) = calibrator();
        let events = reach_tapping(&mut calibrator, &clock);

        let tail = &events[events.len() - 3..];
        assert_eq!(
            tail[0],
            CalibrationEvent::Scheduler(SchedulerEvent::CountInComplete)
        );
        assert_eq!(tail[1], CalibrationEvent::TappingStarted);
        assert!(matches!(
            tail[2],
            CalibrationEvent::Scheduler(SchedulerEvent::Beat { beat_index: 0, .. })
        ));
    }

    #[test]
    fn taps_outside_accepting_phases_are_ignored() {
        let (mut calibrator, clock) = calibrator();
        assert_eq!(calibrator.tap(100.0), None);

        calibrator.start();
        clock.advance(300.0);
        assert_eq!(calibrator.tap(clock.now_ms()), None);
        assert!(calibrator.session().offsets.is_empty());
    }

    #[test]
    fn locks_on_eighth_sample_and_completes_after_confirmation() {
        let (mut calibrator, clock) = calibrator();
        reach_tapping(&mut calibrator, &clock);

        lock_with_scenario(&mut calibrator);
        let session = calibrator.session();
        assert_eq!(session.phase, CalibrationPhase::Locked);
        assert_eq!(session.confirmation_count, 1);
        assert!((session.locked_average.unwrap() - 41.625).abs() < 1e-9);

        for _ in 0..CONFIRMATION_BEATS - 2 {
            assert_eq!(calibrator.record_offset(42.0), None);
        }
        assert_eq!(
            calibrator.record_offset(41.0),
            Some(CalibrationEvent::Complete { latency_ms: 42 })
        );

        assert_eq!(calibrator.phase(), CalibrationPhase::Done);
        assert_eq!(calibrator.result(), Some(42));
        assert!(!calibrator.schedule().is_playing);

        // Done ignores further taps and ticks.
        assert_eq!(calibrator.tap(clock.now_ms()), None);
        assert!(calibrator.tick().is_empty());
        assert_eq!(calibrator.session().offsets.len(), 8 + 15);
    }

    #[test]
    fn outlier_unlocks_without_dropping_history() {
        let (mut calibrator, clock) = calibrator();
        reach_tapping(&mut calibrator, &clock);
        lock_with_scenario(&mut calibrator);

        let expected = (SCENARIO.iter().sum::<f64>() + 100.0) / 9.0;
        match calibrator.record_offset(100.0) {
            Some(CalibrationEvent::Unlocked { average_ms }) => {
                assert!((average_ms - expected).abs() < 1e-9)
            }
            other => panic!("expected unlock, got {other:?}"),
        }

        let session = calibrator.session();
        assert_eq!(session.phase, CalibrationPhase::Tapping);
        assert_eq!(session.offsets.len(), 9);
        assert_eq!(session.locked_average, None);
        assert_eq!(session.confirmation_count, 0);
        assert!((session.previous_average.unwrap() - expected).abs() < 1e-9);

        // History is kept, so the next close sample re-locks at once.
        assert!(matches!(
            calibrator.record_offset(42.0),
            Some(CalibrationEvent::Locked { average_ms }) if (average_ms - 47.5).abs() < 1e-9
        ));
    }

    #[test]
    fn never_locks_below_minimum_sample_count() {
        let (mut calibrator, clock) = calibrator();
        reach_tapping(&mut calibrator, &clock);

        for _ in 0..MIN_TAPS_BEFORE_LOCK - 1 {
            assert_eq!(calibrator.record_offset(30.0), None);
        }
        assert_eq!(calibrator.phase(), CalibrationPhase::Tapping);
        assert_eq!(
            calibrator.record_offset(30.0),
            Some(CalibrationEvent::Locked { average_ms: 30.0 })
        );
    }

    #[test]
    fn unsettled_average_keeps_tapping() {
        let (mut calibrator, clock) = calibrator();
        reach_tapping(&mut calibrator, &clock);

        for offset in [0.0, 40.0, 0.0, 40.0, 0.0, 40.0, 0.0, 60.0] {
            calibrator.record_offset(offset);
        }
        // Mean jumped from 17.1 to 22.5 on the eighth sample.
        assert_eq!(calibrator.phase(), CalibrationPhase::Tapping);
        assert!((calibrator.session().previous_average.unwrap() - 22.5).abs() < 1e-9);
    }

    #[test]
    fn measures_raw_offsets_from_tap_timestamps() {
        let (mut calibrator, clock) = calibrator();
        reach_tapping(&mut calibrator, &clock);

        let start = calibrator.schedule().start_time_ms.unwrap();
        let interval = TimingAnalyzer::interval_ms(CALIBRATION_BPM);
        let mut outcome = None;
        for beat in 0..40 {
            outcome = calibrator.tap(start + beat as f64 * interval + 35.0);
            if calibrator.phase() == CalibrationPhase::Done {
                break;
            }
        }

        assert_eq!(outcome, Some(CalibrationEvent::Complete { latency_ms: 35 }));
        assert_eq!(calibrator.result(), Some(35));
    }

    #[test]
    fn cancel_discards_session_from_any_phase() {
        let (mut calibrator, clock) = calibrator();
        calibrator.cancel();
        assert_eq!(calibrator.phase(), CalibrationPhase::Cancelled);

        reach_tapping(&mut calibrator, &clock);
        lock_with_scenario(&mut calibrator);
        calibrator.cancel();

        let session = calibrator.session();
        assert_eq!(session.phase, CalibrationPhase::Cancelled);
        assert!(session.offsets.is_empty());
        assert_eq!(session.locked_average, None);
        assert_eq!(calibrator.result(), None);
        assert!(!calibrator.schedule().is_playing);
        assert_eq!(calibrator.tap(clock.now_ms()), None);

        calibrator.start();
        assert_eq!(calibrator.phase(), CalibrationPhase::Counting);
        assert!(calibrator.session().offsets.is_empty());
    }

    #[test]
    fn cancel_during_count_in_stops_the_click() {
        let (mut calibrator, clock) = calibrator();
        calibrator.start();
        clock.advance(700.0);
        calibrator.tick();
        assert_eq!(calibrator.phase(), CalibrationPhase::Counting);

        calibrator.cancel();
        assert_eq!(calibrator.phase(), CalibrationPhase::Cancelled);
        assert!(!calibrator.schedule().is_playing);
        clock.advance(5_000.0);
        assert!(calibrator.tick().is_empty());
        assert_eq!(calibrator.result(), None);
    }

    #[test]
    fn cancel_while_tapping_discards_collected_offsets() {
        let (mut calibrator, clock) = calibrator();
        reach_tapping(&mut calibrator, &clock);
        for offset in &SCENARIO[..3] {
            calibrator.record_offset(*offset);
        }
        assert_eq!(calibrator.session().offsets.len(), 3);

        calibrator.cancel();
        let session = calibrator.session();
        assert_eq!(session.phase, CalibrationPhase::Cancelled);
        assert!(session.offsets.is_empty());
        assert_eq!(session.previous_average, None);
        assert!(!calibrator.schedule().is_playing);
        assert_eq!(calibrator.tap(clock.now_ms()), None);
    }

    #[test]
    fn start_is_ignored_while_active() {
        let (mut calibrator, clock) = calibrator();
        reach_tapping(&mut calibrator, &clock);
        calibrator.record_offset(12.0);

        assert!(calibrator.start().is_empty());
        assert_eq!(calibrator.phase(), CalibrationPhase::Tapping);
        assert_eq!(calibrator.session().offsets, vec![12.0]);
    }
}
