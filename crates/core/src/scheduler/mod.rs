use serde::{Deserialize, Serialize};

use crate::{AudioEngine, ClickSound, Clock, Millis, TapSample, TimingAnalyzer};

/// How far ahead of its exact time a beat may fire.
pub const AUDIO_LOOKAHEAD_MS: Millis = 50.0;
pub const DEFAULT_COUNT_IN_BEATS: u32 = 4;
/// Inclusive tempo range accepted by [`clamp_bpm`].
pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 200.0;
pub const DEFAULT_BPM: f64 = 120.0;

/// Immutable view of the scheduler's timing state.
///
/// Negative beat indices are count-in beats; index 0 is the first real beat
/// and sits at `start_time_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatSchedule {
    pub is_playing: bool,
    pub bpm: f64,
    pub start_time_ms: Option<Millis>,
    pub current_beat_index: i64,
    pub next_scheduled_beat_index: i64,
    pub is_counting_in: bool,
    pub count_in_remaining: u32,
    pub audio_latency_ms: Millis,
}

impl BeatSchedule {
    fn idle(bpm: f64, audio_latency_ms: Millis) -> Self {
        Self {
            is_playing: false,
            bpm,
            start_time_ms: None,
            current_beat_index: 0,
            next_scheduled_beat_index: 0,
            is_counting_in: false,
            count_in_remaining: 0,
            audio_latency_ms,
        }
    }

    /// Beat spacing of this schedule's tempo.
    pub fn interval_ms(&self) -> Millis {
        TimingAnalyzer::interval_ms(self.bpm)
    }

    /// The reference tap judgement must use. Scheduling ignores it.
    pub fn adjusted_start_time_ms(&self) -> Option<Millis> {
        self.start_time_ms.map(|start| start + self.audio_latency_ms)
    }
}

/// Emitted by [`BeatScheduler::start`] and [`BeatScheduler::tick`] in
/// firing order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SchedulerEvent {
    CountIn {
        beat_index: i64,
        beats_remaining: u32,
        scheduled_ms: Millis,
    },
    /// Fires once per session, right before beat 0.
    CountInComplete,
    Beat {
        beat_index: i64,
        scheduled_ms: Millis,
    },
}

/// Limits `bpm` to `MIN_BPM..=MAX_BPM`; NaN falls back to [`DEFAULT_BPM`].
pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return DEFAULT_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

/// Metronome timing core, pumped by an external cadence.
///
/// The scheduler owns its state outright; callers read it through
/// [`schedule`](Self::schedule) and change it only through the operations
/// below. Audio is requested through the owned [`AudioEngine`] and never
/// awaited.
#[derive(Debug)]
pub struct BeatScheduler<C: Clock> {
    clock: C,
    audio: AudioEngine,
    /// Tempo for the next `start`; the running schedule keeps its own copy.
    bpm: f64,
    schedule: BeatSchedule,
}

impl<C: Clock> BeatScheduler<C> {
    pub fn new(clock: C, audio: AudioEngine) -> Self {
        Self {
            clock,
            audio,
            bpm: DEFAULT_BPM,
            schedule: BeatSchedule::idle(DEFAULT_BPM, 0.0),
        }
    }

    /// Copy of the current timing state.
    pub fn schedule(&self) -> BeatSchedule {
        self.schedule
    }

    /// True from `start` until `stop`.
    pub fn is_playing(&self) -> bool {
        self.schedule.is_playing
    }

    /// Tempo that the next `start` will use.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn interval_ms(&self) -> Millis {
        self.schedule.interval_ms()
    }

    /// Engine the scheduler requests clicks from.
    pub fn audio(&self) -> &AudioEngine {
        &self.audio
    }

    /// Clamps to the supported range. A running schedule is not rescaled;
    /// the new tempo applies from the next `start`.
    pub fn set_bpm(&mut self, bpm: f64) -> f64 {
        self.bpm = clamp_bpm(bpm);
        if !self.schedule.is_playing {
            self.schedule.bpm = self.bpm;
        }
        self.bpm
    }

    /// Sets the compensation applied when judging taps. Takes effect
    /// immediately, even mid-run.
    pub fn set_audio_latency_ms(&mut self, latency_ms: Millis) {
        self.schedule.audio_latency_ms = latency_ms;
    }

    /// Start time shifted by the audio latency, `None` while idle.
    pub fn adjusted_start_time(&self) -> Option<Millis> {
        self.schedule.adjusted_start_time_ms()
    }

    /// [`set_bpm`](Self::set_bpm) followed by [`start`](Self::start).
    pub fn start_at(&mut self, bpm: f64, count_in_beats: u32) -> Vec<SchedulerEvent> {
        if self.schedule.is_playing {
            return Vec::new();
        }
        self.set_bpm(bpm);
        self.start(count_in_beats)
    }

    /// Anchors beat 0 `count_in_beats` intervals in the future and fires the
    /// first count-in beat immediately. No-op while already playing.
    pub fn start(&mut self, count_in_beats: u32) -> Vec<SchedulerEvent> {
        if self.schedule.is_playing {
            return Vec::new();
        }

        let interval = TimingAnalyzer::interval_ms(self.bpm);
        let now = self.clock.now_ms();
        let start_time = now + f64::from(count_in_beats) * interval;
        let first_index = -i64::from(count_in_beats);

        self.schedule = BeatSchedule {
            is_playing: true,
            bpm: self.bpm,
            start_time_ms: Some(start_time),
            current_beat_index: first_index,
            next_scheduled_beat_index: first_index + 1,
            is_counting_in: true,
            count_in_remaining: count_in_beats,
            audio_latency_ms: self.schedule.audio_latency_ms,
        };
        tracing::debug!(bpm = self.bpm, count_in_beats, start_time, "scheduler started");

        self.fire(first_index, now)
    }

    /// Fires at most one due beat. Beats become due `AUDIO_LOOKAHEAD_MS`
    /// before their scheduled time, measured against the raw start time.
    pub fn tick(&mut self) -> Vec<SchedulerEvent> {
        if !self.schedule.is_playing {
            return Vec::new();
        }
        let Some(start_time) = self.schedule.start_time_ms else {
            return Vec::new();
        };

        let index = self.schedule.next_scheduled_beat_index;
        let next_beat_time = start_time + index as f64 * self.schedule.interval_ms();
        if self.clock.now_ms() < next_beat_time - AUDIO_LOOKAHEAD_MS {
            return Vec::new();
        }

        self.schedule.current_beat_index = index;
        self.schedule.next_scheduled_beat_index = index + 1;
        self.fire(index, next_beat_time)
    }

    /// Returns to idle and unloads any playing click. No-op while idle.
    pub fn stop(&mut self) {
        if !self.schedule.is_playing {
            return;
        }
        tracing::debug!(
            last_beat = self.schedule.current_beat_index,
            "scheduler stopped"
        );
        self.schedule = BeatSchedule::idle(self.bpm, self.schedule.audio_latency_ms);
        self.audio.release();
    }

    /// Judges a tap against the latency-compensated grid. `None` while idle.
    pub fn evaluate_tap(&self, tap_ms: Millis) -> Option<TapSample> {
        let reference = self.adjusted_start_time()?;
        Some(TapSample {
            timestamp_ms: tap_ms,
            offset_ms: TimingAnalyzer::offset(tap_ms, reference, self.interval_ms()),
        })
    }

    fn fire(&mut self, beat_index: i64, scheduled_ms: Millis) -> Vec<SchedulerEvent> {
        self.audio.request(ClickSound::for_beat(beat_index));
        tracing::trace!(beat_index, scheduled_ms, "beat fired");

        let mut events = Vec::with_capacity(2);
        if beat_index < 0 {
            let beats_remaining = beat_index.unsigned_abs() as u32;
            self.schedule.count_in_remaining = beats_remaining;
            events.push(SchedulerEvent::CountIn {
                beat_index,
                beats_remaining,
                scheduled_ms,
            });
        } else {
            if self.schedule.is_counting_in {
                self.schedule.is_counting_in = false;
                self.schedule.count_in_remaining = 0;
                tracing::debug!("count-in complete");
                events.push(SchedulerEvent::CountInComplete);
            }
            events.push(SchedulerEvent::Beat {
                beat_index,
                scheduled_ms,
            });
        }
        events
    }
}
