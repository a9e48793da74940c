//! Core task data types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a conversion task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed by the engine.
    Queued,
    /// Claimed by the engine; either dispatched or being converted.
    Processing,
    /// Conversion finished and the output file exists.
    Completed,
    /// Validation, conversion or the deadline failed.
    Failed,
    /// Cancelled on request.
    Canceled,
}

impl TaskStatus {
    /// Returns the status as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }

    /// Returns true if a cancel request is meaningful in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Processing)
    }

    /// Checks whether `self -> next` is a legal edge of the task state machine.
    ///
    /// `ever_claimed` is whether the engine has claimed the task at some point.
    /// Processing may go back to Queued only before the engine claims it, which
    /// is how remote-URL intake hands a fetched task over to the engine.
    pub fn can_transition_to(&self, next: TaskStatus, ever_claimed: bool) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Queued, Processing) | (Queued, Canceled) => true,
            (Processing, Completed) | (Processing, Failed) | (Processing, Canceled) => true,
            (Processing, Queued) => !ever_claimed,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "canceled" => Ok(TaskStatus::Canceled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// How the input file of a task arrived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// File uploaded directly by a client.
    DirectUpload,
    /// File fetched from a remote URL by an intake collaborator.
    RemoteUrl,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::DirectUpload => "direct_upload",
            TaskKind::RemoteUrl => "remote_url",
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct_upload" => Ok(TaskKind::DirectUpload),
            "remote_url" => Ok(TaskKind::RemoteUrl),
            other => Err(format!("unknown task kind: {}", other)),
        }
    }
}

/// Audio encoding parameters requested for a task.
///
/// Unset fields fall back to the converter's configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversionParams {
    /// Encoder name as understood by ffmpeg (e.g. "libmp3lame", "aac").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    /// Target bitrate in kbps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_bitrate_kbps: Option<u32>,
    /// Target sample rate in Hz.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<u32>,
}

impl ConversionParams {
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = Some(codec.into());
        self
    }

    pub fn with_bitrate(mut self, kbps: u32) -> Self {
        self.audio_bitrate_kbps = Some(kbps);
        self
    }

    pub fn with_sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate_hz = Some(hz);
        self
    }
}

/// A unit of conversion work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Conversion progress in percent, always within [0, 100].
    pub progress: f64,
    /// Source media file.
    pub input_path: PathBuf,
    /// Produced file, set on completion.
    pub output_path: Option<PathBuf>,
    pub params: ConversionParams,
    /// Human readable failure reason, set when the task fails.
    pub error_message: Option<String>,
    /// Display title supplied at intake.
    pub title: Option<String>,
    /// Source URL for remote-URL tasks.
    pub original_url: Option<String>,
    pub input_size_bytes: Option<u64>,
    pub output_size_bytes: Option<u64>,
    /// Media duration discovered by probing.
    pub duration_secs: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set when the engine claims the task.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Returns true if the engine has claimed this task at some point.
    pub fn ever_claimed(&self) -> bool {
        self.claimed_at.is_some()
    }

    /// Short identifier used in output file names and logs.
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

/// Partial update applied to a task.
///
/// Only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub output_path: Option<PathBuf>,
    pub output_size_bytes: Option<u64>,
    pub input_size_bytes: Option<u64>,
    pub duration_secs: Option<f64>,
    pub error_message: Option<String>,
}

impl TaskUpdate {
    /// Update that only changes the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Update that only changes the progress.
    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Transition to Completed with the produced output.
    pub fn completed(output_path: PathBuf, output_size_bytes: Option<u64>) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            progress: Some(100.0),
            output_path: Some(output_path),
            output_size_bytes,
            ..Default::default()
        }
    }

    /// Transition to Failed with a reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Failed),
            error_message: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_input_size(mut self, bytes: u64) -> Self {
        self.input_size_bytes = Some(bytes);
        self
    }

    /// Returns true if nothing would be written.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
