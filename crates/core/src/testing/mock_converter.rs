//! Mock converter for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::converter::{
    ConversionJob, ConversionProgress, ConversionResult, Converter, ConverterError, MediaInfo,
};

/// Bytes written to every output file.
const OUTPUT_CONTENT: &[u8] = b"mock converted audio";

/// A recorded conversion job for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedConversion {
    /// The job that was submitted.
    pub job: ConversionJob,
    /// Whether the conversion succeeded.
    pub success: bool,
}

/// Mock implementation of the Converter trait.
///
/// Provides controllable behavior for testing:
/// - Track conversion jobs and peak concurrency for assertions
/// - Simulate failures, panics and conversions that only end when cancelled
/// - Control probe results
/// - Emit evenly spaced progress updates
///
/// Clones share state, so a test can keep a handle after moving the
/// converter into an engine.
///
/// # Example
///
/// ```rust,ignore
/// use convertd_core::testing::MockConverter;
///
/// let converter = MockConverter::new();
/// converter.set_conversion_duration(Duration::from_millis(50)).await;
///
/// let engine = TaskEngine::new(config, output_dir, store, cache, converter.clone());
/// engine.start().await;
///
/// // ... later
/// assert_eq!(converter.conversion_count().await, 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockConverter {
    conversions: Arc<RwLock<Vec<RecordedConversion>>>,
    probe_results: Arc<RwLock<HashMap<PathBuf, MediaInfo>>>,
    /// If set, the next conversion fails with this error.
    next_error: Arc<RwLock<Option<ConverterError>>>,
    probe_error: Arc<AtomicBool>,
    /// Probes never return, like ffprobe on a stalled mount.
    probe_hang: Arc<AtomicBool>,
    probes: Arc<AtomicUsize>,
    validate_error: Arc<AtomicBool>,
    panic_next: Arc<AtomicBool>,
    /// Conversions run until cancelled.
    hang: Arc<AtomicBool>,
    conversion_duration_ms: Arc<RwLock<u64>>,
    progress_steps: Arc<RwLock<u32>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Default for MockConverter {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the active counter when a conversion ends, however it ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockConverter {
    /// Create a new mock converter.
    pub fn new() -> Self {
        Self {
            conversions: Arc::new(RwLock::new(Vec::new())),
            probe_results: Arc::new(RwLock::new(HashMap::new())),
            next_error: Arc::new(RwLock::new(None)),
            probe_error: Arc::new(AtomicBool::new(false)),
            probe_hang: Arc::new(AtomicBool::new(false)),
            probes: Arc::new(AtomicUsize::new(0)),
            validate_error: Arc::new(AtomicBool::new(false)),
            panic_next: Arc::new(AtomicBool::new(false)),
            hang: Arc::new(AtomicBool::new(false)),
            conversion_duration_ms: Arc::new(RwLock::new(50)),
            progress_steps: Arc::new(RwLock::new(5)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get all recorded conversions.
    pub async fn recorded_conversions(&self) -> Vec<RecordedConversion> {
        self.conversions.read().await.clone()
    }

    /// Get the number of conversions started.
    pub async fn conversion_count(&self) -> usize {
        self.conversions.read().await.len()
    }

    /// Number of conversions running right now.
    pub fn active_conversions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of conversions that ran at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Set a probe result for a specific path.
    pub async fn set_probe_result(&self, path: impl AsRef<Path>, info: MediaInfo) {
        self.probe_results
            .write()
            .await
            .insert(path.as_ref().to_path_buf(), info);
    }

    /// Configure the next conversion to fail with the given error.
    pub async fn set_next_error(&self, error: ConverterError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make probing fail.
    pub fn set_probe_fails(&self, fails: bool) {
        self.probe_error.store(fails, Ordering::SeqCst);
    }

    /// Make probes block forever.
    pub fn set_probe_hang(&self, hang: bool) {
        self.probe_hang.store(hang, Ordering::SeqCst);
    }

    /// Number of probes started.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Make [`Converter::validate`] fail.
    pub fn set_validate_fails(&self, fails: bool) {
        self.validate_error.store(fails, Ordering::SeqCst);
    }

    /// Panic inside the next conversion.
    pub fn set_panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }

    /// Make conversions block until their cancellation token fires.
    pub fn set_hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Set the simulated conversion duration.
    pub async fn set_conversion_duration(&self, duration: Duration) {
        *self.conversion_duration_ms.write().await = duration.as_millis() as u64;
    }

    /// Number of progress updates sent per conversion (0 disables them).
    pub async fn set_progress_steps(&self, steps: u32) {
        *self.progress_steps.write().await = steps;
    }

    fn enter(&self) -> ActiveGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(self.active.clone())
    }

    async fn record(&self, job: &ConversionJob, success: bool) {
        self.conversions.write().await.push(RecordedConversion {
            job: job.clone(),
            success,
        });
    }

    async fn simulate(
        &self,
        job: &ConversionJob,
        cancel: &CancellationToken,
        progress_tx: &mpsc::Sender<ConversionProgress>,
    ) -> Result<u64, ConverterError> {
        if self.hang.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return Err(ConverterError::Cancelled);
        }

        let duration_ms = *self.conversion_duration_ms.read().await;
        let steps = *self.progress_steps.read().await;
        let total_secs = duration_ms as f64 / 1000.0;

        let slices = steps.max(1);
        let slice = Duration::from_millis(duration_ms / slices as u64);
        for i in 1..=slices {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ConverterError::Cancelled),
                _ = tokio::time::sleep(slice) => {}
            }
            if steps > 0 {
                let _ = progress_tx.try_send(ConversionProgress {
                    job_id: job.job_id.clone(),
                    percent: i as f64 * 100.0 / slices as f64,
                    time_secs: total_secs * i as f64 / slices as f64,
                    duration_secs: Some(total_secs),
                    speed: Some("10x".to_string()),
                });
            }
        }

        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&job.output_path, OUTPUT_CONTENT).await?;
        Ok(duration_ms)
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        if self.validate_error.load(Ordering::SeqCst) {
            return Err(ConverterError::FfmpegNotFound {
                path: PathBuf::from("mock-ffmpeg"),
            });
        }
        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.probe_error.load(Ordering::SeqCst) {
            return Err(ConverterError::probe_failed("mock probe failure"));
        }

        if let Some(info) = self.probe_results.read().await.get(path) {
            return Ok(info.clone());
        }

        let size_bytes = tokio::fs::metadata(path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(MediaInfo {
            path: path.to_path_buf(),
            size_bytes,
            duration_secs: Some(60.0),
            format,
            audio_codec: Some("aac".to_string()),
            audio_sample_rate: Some(48000),
            audio_channels: Some(2),
            video_codec: Some("h264".to_string()),
        })
    }

    async fn convert(
        &self,
        job: ConversionJob,
        cancel: CancellationToken,
        progress_tx: mpsc::Sender<ConversionProgress>,
    ) -> Result<ConversionResult, ConverterError> {
        let _guard = self.enter();

        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("mock converter panic for {}", job.job_id);
        }

        let injected = self.next_error.write().await.take();
        if let Some(err) = injected {
            self.record(&job, false).await;
            return Err(err);
        }

        let outcome = self.simulate(&job, &cancel, &progress_tx).await;
        self.record(&job, outcome.is_ok()).await;

        let duration_ms = outcome?;
        Ok(ConversionResult {
            job_id: job.job_id,
            output_path: job.output_path,
            output_size_bytes: OUTPUT_CONTENT.len() as u64,
            duration_ms,
        })
    }
}
