//! Trait definitions for the converter module.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::ConverterError;
use super::types::{
    extension_for_codec, ConversionJob, ConversionProgress, ConversionResult, MediaInfo,
};
use crate::task::ConversionParams;

/// Video containers accepted as conversion input by default.
pub const DEFAULT_INPUT_FORMATS: &[&str] =
    &["mp4", "avi", "mov", "wmv", "flv", "webm", "mkv", "m4v"];

/// A converter that extracts and re-encodes the audio of a media file.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Returns the name of this converter implementation.
    fn name(&self) -> &str;

    /// Validates that the converter is properly configured and ready.
    async fn validate(&self) -> Result<(), ConverterError>;

    /// Probes a media file to get its information.
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError>;

    /// Converts a media file.
    ///
    /// Progress updates are sent with `try_send`; a full or closed channel
    /// never slows the conversion down. Once `cancel` fires the underlying
    /// work must stop and the call must return [`ConverterError::Cancelled`].
    async fn convert(
        &self,
        job: ConversionJob,
        cancel: CancellationToken,
        progress_tx: mpsc::Sender<ConversionProgress>,
    ) -> Result<ConversionResult, ConverterError>;

    /// Whether files with this (lowercase) extension are accepted.
    fn supports_extension(&self, extension: &str) -> bool {
        DEFAULT_INPUT_FORMATS.contains(&extension)
    }

    /// Checks that the input exists and has an accepted extension.
    async fn validate_input(&self, path: &Path) -> Result<(), ConverterError> {
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(ConverterError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !self.supports_extension(&extension) {
            return Err(ConverterError::UnsupportedInputFormat {
                format: if extension.is_empty() {
                    "(none)".to_string()
                } else {
                    extension
                },
            });
        }

        Ok(())
    }

    /// Extension of the file produced for these parameters.
    fn output_extension(&self, params: &ConversionParams) -> &'static str {
        extension_for_codec(params.audio_codec.as_deref().unwrap_or("libmp3lame"))
    }
}

#[async_trait]
impl<C: Converter + ?Sized> Converter for Arc<C> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        (**self).validate().await
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError> {
        (**self).probe(path).await
    }

    async fn convert(
        &self,
        job: ConversionJob,
        cancel: CancellationToken,
        progress_tx: mpsc::Sender<ConversionProgress>,
    ) -> Result<ConversionResult, ConverterError> {
        (**self).convert(job, cancel, progress_tx).await
    }

    fn supports_extension(&self, extension: &str) -> bool {
        (**self).supports_extension(extension)
    }

    async fn validate_input(&self, path: &Path) -> Result<(), ConverterError> {
        (**self).validate_input(path).await
    }

    fn output_extension(&self, params: &ConversionParams) -> &'static str {
        (**self).output_extension(params)
    }
}
