//! Configuration for the converter module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::traits::DEFAULT_INPUT_FORMATS;
use super::types::AudioSettings;
use crate::task::ConversionParams;

/// Configuration for the FFmpeg-based converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Path to ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Path to ffprobe binary.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Encoder used when a task does not name one.
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Bitrate used when a task does not name one.
    #[serde(default = "default_bitrate")]
    pub audio_bitrate_kbps: u32,

    /// Sample rate used when a task does not name one.
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[serde(default = "default_log_level")]
    pub ffmpeg_log_level: String,

    /// Additional ffmpeg arguments, inserted before the output path.
    #[serde(default)]
    pub extra_ffmpeg_args: Vec<String>,

    /// Accepted input extensions, lowercase without the dot.
    #[serde(default = "default_input_formats")]
    pub supported_input_formats: Vec<String>,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_audio_codec() -> String {
    "libmp3lame".to_string()
}

fn default_bitrate() -> u32 {
    192
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_log_level() -> String {
    "error".to_string()
}

fn default_input_formats() -> Vec<String> {
    DEFAULT_INPUT_FORMATS.iter().map(|f| f.to_string()).collect()
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            audio_codec: default_audio_codec(),
            audio_bitrate_kbps: default_bitrate(),
            sample_rate_hz: default_sample_rate(),
            ffmpeg_log_level: default_log_level(),
            extra_ffmpeg_args: Vec::new(),
            supported_input_formats: default_input_formats(),
        }
    }
}

impl ConverterConfig {
    /// Creates a new config with custom ffmpeg/ffprobe paths.
    pub fn with_paths(ffmpeg_path: PathBuf, ffprobe_path: PathBuf) -> Self {
        Self {
            ffmpeg_path,
            ffprobe_path,
            ..Default::default()
        }
    }

    /// Sets the default encoder.
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = codec.into();
        self
    }

    /// Sets the default bitrate.
    pub fn with_bitrate(mut self, kbps: u32) -> Self {
        self.audio_bitrate_kbps = kbps;
        self
    }

    /// Fills in whatever a task left unset with the configured defaults.
    pub fn settings_for(&self, params: &ConversionParams) -> AudioSettings {
        AudioSettings {
            codec: params
                .audio_codec
                .clone()
                .unwrap_or_else(|| self.audio_codec.clone()),
            bitrate_kbps: params.audio_bitrate_kbps.unwrap_or(self.audio_bitrate_kbps),
            sample_rate_hz: params.sample_rate_hz.unwrap_or(self.sample_rate_hz),
        }
    }
}
