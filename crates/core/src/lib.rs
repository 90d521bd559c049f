//! Core library for the Beatlock metronome.
//!
//! The crate schedules beat events against a drifting software clock and
//! calibrates the device's audio latency from the user's taps. Each module
//! owns one concern (timing arithmetic, the beat scheduler, the latency
//! calibrator, and the injected clock, audio and cadence capabilities they
//! run on) so that front ends only consume events and timing results.

pub mod audio;
pub mod cadence;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod simulation;
pub mod timing;

pub use audio::{
    AudioEngine, AudioPlayer, ClickSound, PlaybackSlot, SilentPlayer, BEATS_PER_BAR,
    CLICK_QUEUE_DEPTH,
};
pub use cadence::{Cadence, CadenceControl, TICK_INTERVAL_MS};
pub use calibration::{
    CalibrationEvent, CalibrationPhase, CalibrationSession, LatencyCalibrator, CALIBRATION_BPM,
    CONFIRMATION_BEATS, MIN_TAPS_BEFORE_LOCK, STABILITY_THRESHOLD_MS,
};
pub use clock::{Clock, ManualClock, Millis, MonotonicClock};
pub use config::{AppConfig, MetronomeConfig};
pub use error::{BeatlockError, Result};
pub use scheduler::{
    clamp_bpm, BeatSchedule, BeatScheduler, SchedulerEvent, AUDIO_LOOKAHEAD_MS, DEFAULT_BPM,
    DEFAULT_COUNT_IN_BEATS, MAX_BPM, MIN_BPM,
};
pub use simulation::{simulate_calibration, SimulationReport, SimulationSettings};
pub use timing::{TapRating, TapSample, TapSummary, TimingAnalyzer};
