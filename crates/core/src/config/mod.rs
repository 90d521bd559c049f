use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{BeatlockError, Millis, Result, DEFAULT_BPM, DEFAULT_COUNT_IN_BEATS};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub metronome: MetronomeConfig,
}

impl AppConfig {
    /// Reads a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(?path, "config file not found; using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.validate()?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.metronome.validate()
    }
}

/// Playback settings. BPM outside 40..=200 is clamped by the scheduler
/// rather than rejected here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    pub bpm: f64,
    pub count_in_beats: u32,
    pub audio_latency_ms: Millis,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_BPM,
            count_in_beats: DEFAULT_COUNT_IN_BEATS,
            audio_latency_ms: 0.0,
        }
    }
}

impl MetronomeConfig {
    fn validate(&self) -> Result<()> {
        if !self.bpm.is_finite() {
            return Err(BeatlockError::InvalidConfig(format!(
                "bpm must be a finite number, got {}",
                self.bpm
            )));
        }
        if !self.audio_latency_ms.is_finite() {
            return Err(BeatlockError::InvalidConfig(format!(
                "audio_latency_ms must be a finite number, got {}",
                self.audio_latency_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("beatlock-{}-{name}", std::process::id()))
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "metronome": { "bpm": 95 } }"#).unwrap();
        assert_eq!(config.metronome.bpm, 95.0);
        assert_eq!(config.metronome.count_in_beats, DEFAULT_COUNT_IN_BEATS);
        assert_eq!(config.metronome.audio_latency_ms, 0.0);
    }

    #[test]
    fn saves_and_loads_latency() {
        let path = temp_path("roundtrip.json");
        let mut config = AppConfig::default();
        config.metronome.audio_latency_ms = 42.0;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = AppConfig::load_or_default(temp_path("does-not-exist.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut config = AppConfig::default();
        config.metronome.bpm = f64::NAN;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BeatlockError::InvalidConfig(_)));
        assert!(err.to_string().contains("bpm"));
    }

    #[test]
    fn malformed_json_is_reported() {
        let path = temp_path("malformed.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, BeatlockError::Json(_)));
    }
}
