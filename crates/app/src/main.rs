mod click;

use std::{
    io::{self, BufRead},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use beatlock_core::{
    simulate_calibration, AppConfig, AudioEngine, BeatScheduler, BeatlockError, Cadence,
    CadenceControl, CalibrationEvent, Clock, LatencyCalibrator, Millis, MonotonicClock,
    SchedulerEvent, SimulationSettings, TapSample, TimingAnalyzer, BEATS_PER_BAR,
};
use clap::{Parser, Subcommand};
use click::TerminalClick;
use tracing_subscriber::EnvFilter;

fn main() -> beatlock_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Metronome {
            config,
            bpm,
            count_in,
            latency,
        } => run_metronome(config.as_deref(), bpm, count_in, latency),
        Commands::Calibrate { config, save } => run_calibrate(config.as_deref(), save),
        Commands::Simulate {
            latency,
            jitter,
            max_beats,
        } => run_simulate(SimulationSettings {
            latency_ms: latency,
            jitter_ms: jitter,
            max_beats,
        }),
    }
}

fn run_metronome(
    config: Option<&Path>,
    bpm: Option<f64>,
    count_in: Option<u32>,
    latency: Option<f64>,
) -> beatlock_core::Result<()> {
    let mut settings = load_config(config)?.metronome;
    if let Some(bpm) = bpm {
        settings.bpm = bpm;
    }
    if let Some(count_in) = count_in {
        settings.count_in_beats = count_in;
    }
    if let Some(latency) = latency {
        settings.audio_latency_ms = latency;
    }
    tracing::info!(
        bpm = settings.bpm,
        count_in = settings.count_in_beats,
        latency_ms = settings.audio_latency_ms,
        "starting metronome"
    );

    let audio = AudioEngine::spawn(TerminalClick::new())?;
    let clock = MonotonicClock::new();
    let mut scheduler = BeatScheduler::new(clock, audio);
    scheduler.set_audio_latency_ms(settings.audio_latency_ms);
    println!("Press Enter on each beat. Type q to stop.");
    report_beats(&scheduler.start_at(settings.bpm, settings.count_in_beats));

    let scheduler = Arc::new(Mutex::new(scheduler));
    let ticking = scheduler.clone();
    let mut cadence = Cadence::start(move || match lock(&ticking) {
        Ok(mut scheduler) => {
            report_beats(&scheduler.tick());
            if scheduler.is_playing() {
                CadenceControl::Continue
            } else {
                CadenceControl::Stop
            }
        }
        Err(err) => {
            tracing::error!(%err, "stopping cadence");
            CadenceControl::Stop
        }
    })?;

    let mut samples: Vec<TapSample> = Vec::new();
    for line in io::stdin().lock().lines() {
        if is_quit(&line?) {
            break;
        }
        if let Some(sample) = tap_with(&clock, &scheduler, |s, at| s.evaluate_tap(at))? {
            println!("tap {:+.1} ms ({})", sample.offset_ms, sample.rating());
            samples.push(sample);
        }
    }

    {
        let mut scheduler = lock(&scheduler)?;
        scheduler.stop();
        let audio = scheduler.audio();
        tracing::debug!(
            failed = audio.failures(),
            dropped = audio.dropped(),
            "click playback totals"
        );
    }
    cadence.cancel();

    let offsets: Vec<f64> = samples.iter().map(|sample| sample.offset_ms).collect();
    let summary = TimingAnalyzer::summarize(&offsets);
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_calibrate(config_path: Option<&Path>, save: bool) -> beatlock_core::Result<()> {
    let mut config = load_config(config_path)?;
    tracing::info!("starting latency calibration");

    let audio = AudioEngine::spawn(TerminalClick::new())?;
    let clock = MonotonicClock::new();
    let mut calibrator = LatencyCalibrator::new(clock, audio);
    println!("Press Enter on every click after the count-in. Type q to cancel.");
    report_calibration(&calibrator.start());

    let calibrator = Arc::new(Mutex::new(calibrator));
    let ticking = calibrator.clone();
    let mut cadence = Cadence::start(move || match lock(&ticking) {
        Ok(mut calibrator) => {
            report_calibration(&calibrator.tick());
            if calibrator.phase().is_active() {
                CadenceControl::Continue
            } else {
                CadenceControl::Stop
            }
        }
        Err(err) => {
            tracing::error!(%err, "stopping cadence");
            CadenceControl::Stop
        }
    })?;

    let mut latency_ms = None;
    for line in io::stdin().lock().lines() {
        if is_quit(&line?) {
            break;
        }
        if let Some(event) = tap_with(&clock, &calibrator, |c, at| c.tap(at))? {
            report_calibration(&[event]);
            if let CalibrationEvent::Complete { latency_ms: measured } = event {
                latency_ms = Some(measured);
                break;
            }
        }
    }
    cadence.cancel();

    let Some(latency_ms) = latency_ms else {
        lock(&calibrator)?.cancel();
        println!("Calibration cancelled.");
        return Ok(());
    };

    if save {
        if let Some(path) = config_path {
            config.metronome.audio_latency_ms = latency_ms as f64;
            config.save(path)?;
            tracing::info!(?path, latency_ms, "saved calibrated latency");
        }
    }
    Ok(())
}

fn run_simulate(settings: SimulationSettings) -> beatlock_core::Result<()> {
    tracing::info!(?settings, "running offline calibration");
    let report = simulate_calibration(&settings)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> beatlock_core::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_or_default(path),
        None => Ok(AppConfig::default()),
    }
}

fn lock<T>(shared: &Mutex<T>) -> beatlock_core::Result<MutexGuard<'_, T>> {
    shared
        .lock()
        .map_err(|_| BeatlockError::msg("timing state has been poisoned"))
}

/// Stamps a tap before waiting on the lock the cadence thread may hold.
fn tap_with<T, R>(
    clock: &impl Clock,
    shared: &Mutex<T>,
    apply: impl FnOnce(&mut T, Millis) -> R,
) -> beatlock_core::Result<R> {
    let tapped_at = clock.now_ms();
    let mut state = lock(shared)?;
    Ok(apply(&mut state, tapped_at))
}

fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("q")
}

fn report_beats(events: &[SchedulerEvent]) {
    for event in events {
        match event {
            SchedulerEvent::CountIn {
                beats_remaining, ..
            } => println!("  {beats_remaining}..."),
            SchedulerEvent::CountInComplete => println!("  go!"),
            SchedulerEvent::Beat { beat_index, .. } => {
                let bar = beat_index / BEATS_PER_BAR + 1;
                let beat = beat_index % BEATS_PER_BAR + 1;
                println!("  bar {bar} beat {beat}");
            }
        }
    }
}

fn report_calibration(events: &[CalibrationEvent]) {
    for event in events {
        match event {
            CalibrationEvent::Scheduler(
                beat @ (SchedulerEvent::CountIn { .. } | SchedulerEvent::CountInComplete),
            ) => report_beats(std::slice::from_ref(beat)),
            CalibrationEvent::Scheduler(SchedulerEvent::Beat { .. }) => {}
            CalibrationEvent::TappingStarted => println!("Tap along now."),
            CalibrationEvent::Locked { average_ms } => {
                println!("Holding at {average_ms:.1} ms, keep tapping...")
            }
            CalibrationEvent::Unlocked { average_ms } => {
                println!("Drifted to {average_ms:.1} ms, keep tapping...")
            }
            CalibrationEvent::Complete { latency_ms } => {
                println!("Measured audio latency: {latency_ms} ms")
            }
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Metronome with audio latency calibration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a click track and rate taps read from stdin.
    Metronome {
        /// JSON config file with metronome defaults.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Tempo in beats per minute; clamped to 40..=200.
        #[arg(short, long)]
        bpm: Option<f64>,
        /// Number of lead-in beats before beat one.
        #[arg(long)]
        count_in: Option<u32>,
        /// Audio latency compensation in milliseconds.
        #[arg(short, long, allow_hyphen_values = true)]
        latency: Option<f64>,
    },
    /// Measure the audio latency of this device by tapping along.
    Calibrate {
        /// JSON config file to read and, with --save, update.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the measured latency back into the config file.
        #[arg(long, requires = "config")]
        save: bool,
    },
    /// Run a calibration offline against synthetic taps.
    Simulate {
        /// Delay of each synthetic tap behind its beat, in milliseconds.
        #[arg(long, default_value_t = 45.0, allow_hyphen_values = true)]
        latency: f64,
        /// Peak timing jitter added to each tap, in milliseconds.
        #[arg(long, default_value_t = 3.0)]
        jitter: f64,
        /// Give up after this many beats.
        #[arg(long, default_value_t = 64)]
        max_beats: i64,
    },
}
