pub mod cache;
pub mod config;
pub mod converter;
pub mod engine;
pub mod metrics;
pub mod task;
pub mod testing;

pub use cache::{FastCache, InMemoryCache, TaskCache};
pub use config::{
    load_config, load_config_from_str, validate_config, CacheConfig, Config, ConfigError,
    DatabaseConfig, FilesConfig, ServerConfig,
};
pub use converter::{Converter, ConverterConfig, ConverterError, FfmpegConverter};
pub use engine::{
    CancelOutcome, EngineConfig, EngineError, EngineStatus, LifecycleState, ShutdownPolicy,
    TaskEngine, TaskProgressView,
};
pub use task::{
    CreateTaskRequest, SqliteTaskStore, Task, TaskError, TaskFilter, TaskKind, TaskStatus,
    TaskStore, TaskUpdate,
};
