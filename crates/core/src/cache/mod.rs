//! Fast, expiring key/value cache for live task status and progress.
//!
//! The cache is advisory: readers that miss fall back to the task store, and
//! write failures are logged by callers rather than propagated.

mod memory;
mod task_cache;
mod traits;

pub use memory::InMemoryCache;
pub use task_cache::{progress_key, status_key, TaskCache, DEFAULT_TTL};
pub use traits::{CacheError, FastCache};
