use std::io::{self, Write};

use beatlock_core::{AudioPlayer, ClickSound, Result};

/// Sounds every click on the terminal bell.
#[derive(Debug, Default)]
pub struct TerminalClick {
    played: u64,
}

impl TerminalClick {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioPlayer for TerminalClick {
    type Handle = u64;

    fn play(&mut self, sound: ClickSound) -> Result<u64> {
        let mut stderr = io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;

        self.played += 1;
        tracing::trace!(?sound, handle = self.played, "click");
        Ok(self.played)
    }

    fn unload(&mut self, handle: u64) {
        tracing::trace!(handle, "click released");
    }
}
