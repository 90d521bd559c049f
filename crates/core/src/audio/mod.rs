use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Real beats on a multiple of this index get the accented click.
pub const BEATS_PER_BAR: i64 = 4;

/// Resource requested from the audio player for one beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClickSound {
    CountIn,
    Accent,
    Beat,
}

impl ClickSound {
    pub fn for_beat(beat_index: i64) -> Self {
        if beat_index < 0 {
            Self::CountIn
        } else if beat_index % BEATS_PER_BAR == 0 {
            Self::Accent
        } else {
            Self::Beat
        }
    }
}

/// Playback backend. Lives on the audio worker thread, never on the tick
/// path.
pub trait AudioPlayer: Send + 'static {
    type Handle: Send + 'static;

    fn play(&mut self, sound: ClickSound) -> Result<Self::Handle>;

    fn unload(&mut self, handle: Self::Handle);
}

/// Player that accepts every request and makes no sound.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentPlayer;

impl AudioPlayer for SilentPlayer {
    type Handle = ();

    fn play(&mut self, _sound: ClickSound) -> Result<()> {
        Ok(())
    }

    fn unload(&mut self, _handle: ()) {}
}

/// Owns a player together with at most one playing handle.
///
/// The previous handle is always unloaded before a new one is created.
pub struct PlaybackSlot<P: AudioPlayer> {
    player: P,
    current: Option<P::Handle>,
    failures: Arc<AtomicU64>,
}

impl<P: AudioPlayer> PlaybackSlot<P> {
    pub fn new(player: P) -> Self {
        Self::with_counter(player, Arc::new(AtomicU64::new(0)))
    }

    fn with_counter(player: P, failures: Arc<AtomicU64>) -> Self {
        Self {
            player,
            current: None,
            failures,
        }
    }

    /// Plays `sound`, returning whether the player accepted it. Failures are
    /// logged and counted, never propagated.
    pub fn play(&mut self, sound: ClickSound) -> bool {
        self.release();
        match self.player.play(sound) {
            Ok(handle) => {
                self.current = Some(handle);
                true
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(?sound, %err, "click playback failed");
                false
            }
        }
    }

    pub fn release(&mut self) {
        if let Some(handle) = self.current.take() {
            self.player.unload(handle);
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl<P: AudioPlayer> fmt::Debug for PlaybackSlot<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackSlot")
            .field("loaded", &self.is_loaded())
            .field("failures", &self.failures())
            .finish()
    }
}

enum AudioCommand {
    Play(ClickSound),
    Release,
    Shutdown,
}

/// Click requests the worker may hold while the player is busy. Further
/// requests are dropped rather than played late.
pub const CLICK_QUEUE_DEPTH: usize = 2;

/// Fire-and-forget front end to a [`PlaybackSlot`] running on its own
/// thread.
///
/// Play requests never block the caller: once [`CLICK_QUEUE_DEPTH`]
/// requests are waiting, new ones are dropped and counted. Releases and
/// shutdown are always delivered. Dropping the engine unloads the last
/// handle and joins the worker.
pub struct AudioEngine {
    commands: Sender<AudioCommand>,
    worker: Option<JoinHandle<()>>,
    failures: Arc<AtomicU64>,
    dropped: AtomicU64,
}

impl AudioEngine {
    pub fn spawn<P: AudioPlayer>(player: P) -> Result<Self> {
        Self::with_queue_depth(player, CLICK_QUEUE_DEPTH)
    }

    /// Like [`spawn`](Self::spawn) with a custom request queue depth.
    pub fn with_queue_depth<P: AudioPlayer>(player: P, depth: usize) -> Result<Self> {
        let (commands, inbox) = bounded(depth.max(1));
        let failures = Arc::new(AtomicU64::new(0));
        let mut slot = PlaybackSlot::with_counter(player, failures.clone());

        let worker = thread::Builder::new()
            .name("beatlock-audio".to_string())
            .spawn(move || {
                for command in inbox {
                    match command {
                        AudioCommand::Play(sound) => {
                            slot.play(sound);
                        }
                        AudioCommand::Release => slot.release(),
                        AudioCommand::Shutdown => break,
                    }
                }
                slot.release();
            })?;

        Ok(Self {
            commands,
            worker: Some(worker),
            failures,
            dropped: AtomicU64::new(0),
        })
    }

    /// Convenience constructor backed by [`SilentPlayer`].
    pub fn silent() -> Result<Self> {
        Self::spawn(SilentPlayer)
    }

    pub fn request(&self, sound: ClickSound) {
        match self.commands.try_send(AudioCommand::Play(sound)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(?sound, dropped, "audio queue full; dropping click");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("audio worker has exited; dropping request");
            }
        }
    }

    /// Unloads whatever the worker is currently playing. Waits for queue
    /// space if the player is busy.
    pub fn release(&self) {
        self.send(AudioCommand::Release);
    }

    /// Number of play requests the player has rejected so far.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Number of play requests discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn send(&self, command: AudioCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("audio worker has exited; dropping request");
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.send(AudioCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("audio worker panicked");
            }
        }
    }
}

impl fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioEngine")
            .field("failures", &self.failures())
            .field("dropped", &self.dropped())
            .finish()
    }
}
