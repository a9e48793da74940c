//! Types for the converter module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::task::ConversionParams;

/// Output file extension for an ffmpeg audio encoder.
pub fn extension_for_codec(codec: &str) -> &'static str {
    match codec {
        "aac" | "libfdk_aac" | "alac" => "m4a",
        "libvorbis" | "vorbis" => "ogg",
        "libopus" | "opus" => "opus",
        "flac" => "flac",
        c if c.starts_with("pcm_") => "wav",
        _ => "mp3",
    }
}

/// Fully resolved encoder settings for one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSettings {
    pub codec: String,
    pub bitrate_kbps: u32,
    pub sample_rate_hz: u32,
}

impl AudioSettings {
    /// Lossless encoders ignore the bitrate.
    pub fn is_lossless(&self) -> bool {
        matches!(self.codec.as_str(), "flac" | "alac") || self.codec.starts_with("pcm_")
    }
}

/// A conversion job request.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Job ID (the task ID).
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub params: ConversionParams,
    /// Input duration when known, used to turn elapsed media time into a
    /// percentage.
    pub duration_secs: Option<f64>,
}

/// Result of a successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    pub job_id: String,
    pub output_path: PathBuf,
    pub output_size_bytes: u64,
    /// Wall clock time spent converting.
    pub duration_ms: u64,
}

/// Information about a media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Duration in seconds, if the container reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    /// Container format (e.g., "mov", "matroska").
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_channels: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
}

/// Progress update during conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionProgress {
    pub job_id: String,
    /// Progress percentage (0.0 - 100.0).
    pub percent: f64,
    /// Media time processed so far.
    pub time_secs: f64,
    pub duration_secs: Option<f64>,
    /// Current processing speed (e.g., "1.5x").
    pub speed: Option<String>,
}
