//! Persistent host settings (JSON file in the user's config directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mouthsync_core::backend::{PITCH_MAX, PITCH_MIN, RATE_MAX, RATE_MIN};
use mouthsync_core::{EngineConfig, MouthSyncError, VoiceParameters};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Whole utterance up front, position-polled.
    Formant,
    /// Word-by-word float chunks, timer-driven.
    Streaming,
    /// Pre-recorded file from `wavPath`.
    Wav,
}

impl BackendKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "formant" | "espeak" => Some(Self::Formant),
            "streaming" | "neural" => Some(Self::Streaming),
            "wav" | "file" => Some(Self::Wav),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub voice: String,
    pub pitch: u32,
    pub rate: u32,
    pub backend: BackendKind,
    pub wav_path: Option<PathBuf>,
    pub sample_rate: u32,
    pub stream_latency_ms: u64,
    pub chunk_period_ms: u64,
    pub poll_period_ms: u64,
    pub stall_grace_ms: u64,
    /// Width of the terminal mouth meter in columns.
    pub meter_width: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            voice: "default".into(),
            pitch: 100,
            rate: 100,
            backend: BackendKind::Formant,
            wav_path: None,
            sample_rate: 16_000,
            stream_latency_ms: 30,
            chunk_period_ms: 50,
            poll_period_ms: 25,
            stall_grace_ms: 500,
            meter_width: 40,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.voice = self.voice.trim().to_string();
        if self.voice.is_empty() {
            self.voice = "default".into();
        }
        self.pitch = self.pitch.clamp(PITCH_MIN, PITCH_MAX);
        self.rate = self.rate.clamp(RATE_MIN, RATE_MAX);
        self.wav_path = self
            .wav_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());
        self.sample_rate = self.sample_rate.clamp(8_000, 48_000);
        self.stream_latency_ms = self.stream_latency_ms.min(2_000);
        self.chunk_period_ms = self.chunk_period_ms.clamp(5, 500);
        self.poll_period_ms = self.poll_period_ms.clamp(1, 200);
        self.stall_grace_ms = self.stall_grace_ms.clamp(50, 10_000);
        self.meter_width = self.meter_width.clamp(8, 200);
    }

    pub fn voice_parameters(&self) -> VoiceParameters {
        VoiceParameters::new(self.voice.clone(), self.pitch, self.rate)
    }

    /// Engine configuration from these settings; `MOUTHSYNC_*` environment
    /// variables take precedence.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chunk_period: Duration::from_millis(self.chunk_period_ms),
            poll_period: Duration::from_millis(self.poll_period_ms),
            stall_grace: Duration::from_millis(self.stall_grace_ms),
            reference_sample_rate: self.sample_rate,
            ..EngineConfig::default()
        }
        .with_env_overrides()
    }
}

pub fn default_settings_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os("MOUTHSYNC_SETTINGS") {
        return PathBuf::from(explicit);
    }
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Mouthsync")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("mouthsync")
            .join("settings.json")
    }
}

/// Missing file ⇒ defaults. Unreadable or malformed file ⇒ error.
pub fn load_or_default(path: &Path) -> Result<AppSettings, MouthSyncError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(AppSettings::default()),
        Err(e) => return Err(e.into()),
    };
    let mut settings: AppSettings = serde_json::from_str(&raw)?;
    settings.normalize();
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
