//! Testing utilities and doubles for the engine's collaborators.
//!
//! Lets the engine run end to end without ffmpeg on the machine, with a
//! cache whose write history can be inspected, and with a task store that
//! can be made to fail.
//!
//! # Example
//!
//! ```rust,ignore
//! use convertd_core::testing::{MockConverter, RecordingCache};
//!
//! let converter = MockConverter::new();
//! let cache = Arc::new(RecordingCache::new());
//!
//! converter.set_hang(true);
//! // ... run the engine, cancel a task ...
//! assert_eq!(cache.status_history(&id).last(), Some(&TaskStatus::Canceled));
//! ```

mod failing_store;
mod mock_converter;
mod recording_cache;

pub use failing_store::FailingStore;
pub use mock_converter::{MockConverter, RecordedConversion};
pub use recording_cache::RecordingCache;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;
    use std::path::{Path, PathBuf};

    use crate::task::{ConversionParams, Task, TaskKind, TaskStatus};

    /// Create a queued upload task with reasonable defaults.
    pub fn sample_task(id: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            kind: TaskKind::DirectUpload,
            status: TaskStatus::Queued,
            progress: 0.0,
            input_path: PathBuf::from(format!("/uploads/{}.mp4", id)),
            output_path: None,
            params: ConversionParams::default(),
            error_message: None,
            title: None,
            original_url: None,
            input_size_bytes: None,
            output_size_bytes: None,
            duration_secs: None,
            created_at: now,
            updated_at: now,
            claimed_at: None,
        }
    }

    /// Write a small stand-in media file and return its path.
    pub fn write_input(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, b"not really a video")?;
        Ok(path)
    }
}
