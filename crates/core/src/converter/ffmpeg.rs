//! FFmpeg-based converter implementation.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::ConverterConfig;
use super::error::ConverterError;
use super::traits::Converter;
use super::types::{
    extension_for_codec, ConversionJob, ConversionProgress, ConversionResult, MediaInfo,
};
use crate::task::ConversionParams;

/// Number of stderr lines kept for error reporting.
const STDERR_TAIL_LINES: usize = 20;

static OUT_TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^out_time_(?:us|ms)=(\d+)$").unwrap());
static SPEED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^speed=\s*(\d+\.?\d*)x$").unwrap());

/// Turns `-progress` key/value lines into non-decreasing percentages.
#[derive(Debug)]
struct ProgressParser {
    duration_secs: Option<f64>,
    time_secs: f64,
    speed: Option<String>,
    last_percent: f64,
}

impl ProgressParser {
    fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| *d > 0.0),
            time_secs: 0.0,
            speed: None,
            last_percent: 0.0,
        }
    }

    /// Feeds one line, returning a new percentage when it moved forward.
    ///
    /// Without a known duration no percentage is ever produced.
    fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();

        if let Some(caps) = SPEED_RE.captures(line) {
            self.speed = caps.get(1).map(|m| format!("{}x", m.as_str()));
            return None;
        }

        // ffmpeg reports both keys in microseconds.
        let micros = OUT_TIME_RE
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())?;
        self.time_secs = micros / 1_000_000.0;

        let duration = self.duration_secs?;
        let percent = (self.time_secs / duration * 100.0).clamp(0.0, 100.0);
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

/// Keeps the last `limit` lines of a stream.
async fn collect_tail<R: AsyncRead + Unpin>(reader: R, limit: usize) -> Vec<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(limit);
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        if tail.len() == limit {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into()
}

/// FFmpeg-based converter implementation.
pub struct FfmpegConverter {
    config: ConverterConfig,
}

impl FfmpegConverter {
    /// Creates a new FFmpeg converter with the given configuration.
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    /// Creates a converter with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ConverterConfig::default())
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Builds ffmpeg arguments for an audio extraction.
    fn build_args(&self, job: &ConversionJob) -> Vec<String> {
        let settings = self.config.settings_for(&job.params);

        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-y".to_string(),
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
            // Drop video
            "-vn".to_string(),
            "-c:a".to_string(),
            settings.codec.clone(),
        ];

        if !settings.is_lossless() {
            args.extend(["-b:a".to_string(), format!("{}k", settings.bitrate_kbps)]);
        }

        args.extend(["-ar".to_string(), settings.sample_rate_hz.to_string()]);

        // Machine readable progress on stdout, human stats off
        args.extend([
            "-progress".to_string(),
            "pipe:1".to_string(),
            "-nostats".to_string(),
        ]);

        args.extend(self.config.extra_ffmpeg_args.iter().cloned());

        args.push(job.output_path.to_string_lossy().to_string());

        args
    }

    /// Parses ffprobe JSON output into MediaInfo.
    fn parse_probe_output(path: &Path, output: &str) -> Result<MediaInfo, ConverterError> {
        #[derive(Deserialize)]
        struct ProbeOutput {
            format: ProbeFormat,
            #[serde(default)]
            streams: Vec<ProbeStream>,
        }

        #[derive(Deserialize)]
        struct ProbeFormat {
            format_name: String,
            duration: Option<String>,
            size: Option<String>,
        }

        #[derive(Deserialize)]
        struct ProbeStream {
            codec_type: String,
            codec_name: Option<String>,
            sample_rate: Option<String>,
            channels: Option<u8>,
        }

        let probe: ProbeOutput =
            serde_json::from_str(output).map_err(|e| ConverterError::ParseError {
                reason: format!("Failed to parse ffprobe output: {}", e),
            })?;

        let duration_secs = probe
            .format
            .duration
            .as_ref()
            .and_then(|d| d.parse::<f64>().ok())
            .filter(|d| *d > 0.0);

        let size_bytes = probe
            .format
            .size
            .as_ref()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        let audio_stream = probe.streams.iter().find(|s| s.codec_type == "audio");
        let video_stream = probe.streams.iter().find(|s| s.codec_type == "video");

        let format_name = probe
            .format
            .format_name
            .split(',')
            .next()
            .unwrap_or("unknown");

        Ok(MediaInfo {
            path: path.to_path_buf(),
            size_bytes,
            duration_secs,
            format: format_name.to_string(),
            audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
            audio_sample_rate: audio_stream
                .and_then(|s| s.sample_rate.as_ref())
                .and_then(|r| r.parse::<u32>().ok()),
            audio_channels: audio_stream.and_then(|s| s.channels),
            video_codec: video_stream.and_then(|s| s.codec_name.clone()),
        })
    }

    fn spawn_error(&self, e: std::io::Error) -> ConverterError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConverterError::FfmpegNotFound {
                path: self.config.ffmpeg_path.clone(),
            }
        } else {
            ConverterError::Io(e)
        }
    }

    async fn run_conversion(
        &self,
        job: &ConversionJob,
        cancel: &CancellationToken,
        progress_tx: &mpsc::Sender<ConversionProgress>,
    ) -> Result<ConversionResult, ConverterError> {
        let start = Instant::now();

        if cancel.is_cancelled() {
            return Err(ConverterError::Cancelled);
        }

        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|_| {
                ConverterError::OutputDirectoryFailed {
                    path: parent.to_path_buf(),
                }
            })?;
        }

        let args = self.build_args(job);
        debug!(job_id = %job.job_id, ?args, "Spawning ffmpeg");

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConverterError::conversion_failed("ffmpeg stdout not captured", None))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ConverterError::conversion_failed("ffmpeg stderr not captured", None))?;

        let stderr_task = tokio::spawn(collect_tail(stderr, STDERR_TAIL_LINES));
        let mut lines = BufReader::new(stdout).lines();
        let mut parser = ProgressParser::new(job.duration_secs);
        let mut stdout_open = true;

        let status = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(job_id = %job.job_id, error = %e, "Failed to kill ffmpeg");
                    }
                    stderr_task.abort();
                    let _ = tokio::fs::remove_file(&job.output_path).await;
                    return Err(ConverterError::Cancelled);
                }
                status = child.wait() => break status?,
                line = lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => {
                        if let Some(percent) = parser.feed(&line) {
                            let _ = progress_tx.try_send(ConversionProgress {
                                job_id: job.job_id.clone(),
                                percent,
                                time_secs: parser.time_secs,
                                duration_secs: parser.duration_secs,
                                speed: parser.speed.clone(),
                            });
                        }
                    }
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!(job_id = %job.job_id, error = %e, "Lost ffmpeg progress stream");
                        stdout_open = false;
                    }
                },
            }
        };

        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let reason = match stderr_tail.last() {
                Some(last) => format!("ffmpeg exited with code {}: {}", code, last),
                None => format!("ffmpeg exited with code {}", code),
            };
            let stderr = (!stderr_tail.is_empty()).then(|| stderr_tail.join("\n"));
            return Err(ConverterError::conversion_failed(reason, stderr));
        }

        let output_meta = tokio::fs::metadata(&job.output_path)
            .await
            .map_err(|_| ConverterError::conversion_failed("Output file not created", None))?;

        if parser.duration_secs.is_some() {
            let _ = progress_tx.try_send(ConversionProgress {
                job_id: job.job_id.clone(),
                percent: 100.0,
                time_secs: parser.time_secs,
                duration_secs: parser.duration_secs,
                speed: parser.speed.clone(),
            });
        }

        Ok(ConversionResult {
            job_id: job.job_id.clone(),
            output_path: job.output_path.clone(),
            output_size_bytes: output_meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

#[async_trait]
impl Converter for FfmpegConverter {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        Command::new(&self.config.ffprobe_path)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConverterError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    ConverterError::Io(e)
                }
            })?;

        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo, ConverterError> {
        if !path.exists() {
            return Err(ConverterError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConverterError::FfprobeNotFound {
                        path: self.config.ffprobe_path.clone(),
                    }
                } else {
                    ConverterError::Io(e)
                }
            })?;

        if !output.status.success() {
            return Err(ConverterError::probe_failed(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Self::parse_probe_output(path, &stdout)
    }

    async fn convert(
        &self,
        job: ConversionJob,
        cancel: CancellationToken,
        progress_tx: mpsc::Sender<ConversionProgress>,
    ) -> Result<ConversionResult, ConverterError> {
        self.run_conversion(&job, &cancel, &progress_tx).await
    }

    fn supports_extension(&self, extension: &str) -> bool {
        self.config
            .supported_input_formats
            .iter()
            .any(|f| f.eq_ignore_ascii_case(extension))
    }

    fn output_extension(&self, params: &ConversionParams) -> &'static str {
        extension_for_codec(&self.config.settings_for(params).codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn job(params: ConversionParams) -> ConversionJob {
        ConversionJob {
            job_id: "job-1".to_string(),
            input_path: PathBuf::from("/input.mp4"),
            output_path: PathBuf::from("/out/input.mp3"),
            params,
            duration_secs: Some(100.0),
        }
    }

    #[test]
    fn test_build_args_uses_defaults() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter.build_args(&job(ConversionParams::default()));

        assert!(args.contains(&"-vn".to_string()));
        assert!(args.contains(&"libmp3lame".to_string()));
        assert!(args.contains(&"192k".to_string()));
        assert!(args.contains(&"44100".to_string()));
        assert!(args.contains(&"pipe:1".to_string()));
        assert_eq!(args.last().unwrap(), "/out/input.mp3");
        let input_idx = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_idx + 1], "/input.mp4");
    }

    #[test]
    fn test_build_args_task_overrides() {
        let converter = FfmpegConverter::with_defaults();
        let params = ConversionParams::default()
            .with_codec("aac")
            .with_bitrate(320)
            .with_sample_rate(48000);
        let args = converter.build_args(&job(params));

        assert!(args.contains(&"aac".to_string()));
        assert!(args.contains(&"320k".to_string()));
        assert!(args.contains(&"48000".to_string()));
    }

    #[test]
    fn test_build_args_lossless_has_no_bitrate() {
        let converter = FfmpegConverter::with_defaults();
        let args = converter.build_args(&job(ConversionParams::default().with_codec("flac")));
        assert!(!args.contains(&"-b:a".to_string()));
    }

    #[test]
    fn test_build_args_extra_args_before_output() {
        let mut config = ConverterConfig::default();
        config.extra_ffmpeg_args = vec!["-ac".to_string(), "1".to_string()];
        let converter = FfmpegConverter::new(config);
        let args = converter.build_args(&job(ConversionParams::default()));

        let n = args.len();
        assert_eq!(&args[n - 3..n - 1], &["-ac".to_string(), "1".to_string()]);
    }

    #[test]
    fn test_progress_parser_percentages() {
        let mut parser = ProgressParser::new(Some(200.0));
        assert_eq!(parser.feed("frame=0"), None);
        assert_eq!(parser.feed("out_time_us=50000000"), Some(25.0));
        assert_eq!(parser.feed("speed=2.5x"), None);
        assert_eq!(parser.speed.as_deref(), Some("2.5x"));
        assert_eq!(parser.feed("out_time_ms=100000000"), Some(50.0));
    }

    #[test]
    fn test_progress_parser_is_monotonic_and_clamped() {
        let mut parser = ProgressParser::new(Some(10.0));
        assert_eq!(parser.feed("out_time_us=5000000"), Some(50.0));
        assert_eq!(parser.feed("out_time_us=4000000"), None);
        assert_eq!(parser.feed("out_time_us=5000000"), None);
        assert_eq!(parser.feed("out_time_us=99000000"), Some(100.0));
        assert_eq!(parser.feed("out_time_us=120000000"), None);
    }

    #[test]
    fn test_progress_parser_unknown_duration() {
        let mut parser = ProgressParser::new(None);
        assert_eq!(parser.feed("out_time_us=5000000"), None);
        assert_eq!(parser.time_secs, 5.0);

        let mut parser = ProgressParser::new(Some(0.0));
        assert_eq!(parser.feed("out_time_us=5000000"), None);
    }

    #[test]
    fn test_parse_probe_output() {
        let json = r#"{
            "format": {
                "filename": "talk.mp4",
                "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
                "duration": "180.5",
                "size": "30000000"
            },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "sample_rate": "48000",
                    "channels": 2
                }
            ]
        }"#;

        let info = FfmpegConverter::parse_probe_output(Path::new("talk.mp4"), json).unwrap();
        assert_eq!(info.format, "mov");
        assert!((info.duration_secs.unwrap() - 180.5).abs() < 0.01);
        assert_eq!(info.size_bytes, 30000000);
        assert_eq!(info.audio_codec, Some("aac".to_string()));
        assert_eq!(info.audio_sample_rate, Some(48000));
        assert_eq!(info.video_codec, Some("h264".to_string()));
    }

    #[test]
    fn test_parse_probe_output_without_duration() {
        let json = r#"{"format": {"format_name": "flv"}, "streams": []}"#;
        let info = FfmpegConverter::parse_probe_output(Path::new("live.flv"), json).unwrap();
        assert!(info.duration_secs.is_none());
        assert_eq!(info.size_bytes, 0);
    }

    #[test]
    fn test_parse_probe_output_garbage() {
        let result = FfmpegConverter::parse_probe_output(Path::new("x.mp4"), "not json");
        assert!(matches!(result, Err(ConverterError::ParseError { .. })));
    }

    #[test]
    fn test_supports_configured_extensions() {
        let mut config = ConverterConfig::default();
        config.supported_input_formats = vec!["mkv".to_string()];
        let converter = FfmpegConverter::new(config);
        assert!(converter.supports_extension("mkv"));
        assert!(!converter.supports_extension("mp4"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let config = ConverterConfig::with_paths(
            PathBuf::from("/nonexistent/ffmpeg"),
            PathBuf::from("/nonexistent/ffprobe"),
        );
        let converter = FfmpegConverter::new(config);
        let result = converter.validate().await;
        assert!(matches!(result, Err(ConverterError::FfmpegNotFound { .. })));
    }

    #[tokio::test]
    async fn test_cancel_before_start() {
        let converter = FfmpegConverter::with_defaults();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(4);

        let result = converter
            .convert(job(ConversionParams::default()), cancel, tx)
            .await;
        assert!(matches!(result, Err(ConverterError::Cancelled)));
    }
}
