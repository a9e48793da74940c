//! Converter module for extracting audio tracks from media files.
//!
//! This module provides the `Converter` trait and an FFmpeg-backed
//! implementation. A conversion strips the video stream and re-encodes the
//! audio with the requested codec, bitrate and sample rate.
//!
//! # Features
//!
//! - Input validation (existence and container extension)
//! - Media probing through ffprobe
//! - Progress reporting during conversion
//! - Cooperative cancellation that stops the ffmpeg process
//!
//! # Example
//!
//! ```ignore
//! use convertd_core::converter::{Converter, ConversionJob, FfmpegConverter};
//! use tokio_util::sync::CancellationToken;
//!
//! let converter = FfmpegConverter::with_defaults();
//! converter.validate().await?;
//!
//! let info = converter.probe(Path::new("/uploads/talk.mp4")).await?;
//!
//! let job = ConversionJob {
//!     job_id: "task-1".to_string(),
//!     input_path: PathBuf::from("/uploads/talk.mp4"),
//!     output_path: PathBuf::from("/output/talk.mp3"),
//!     params: ConversionParams::default().with_bitrate(256),
//!     duration_secs: info.duration_secs,
//! };
//!
//! let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//! let result = converter.convert(job, CancellationToken::new(), tx).await?;
//! println!("Wrote {} bytes", result.output_size_bytes);
//! ```

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use config::ConverterConfig;
pub use error::ConverterError;
pub use ffmpeg::FfmpegConverter;
pub use traits::{Converter, DEFAULT_INPUT_FORMATS};
pub use types::{
    extension_for_codec, AudioSettings, ConversionJob, ConversionProgress, ConversionResult,
    MediaInfo,
};
