//! Extraction result caching

mod backend;
mod content_cache;

pub use backend::{CacheBackend, MemoryBackend};
pub use content_cache::{cache_key, ContentCache};
