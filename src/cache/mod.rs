pub mod embedding_cache;
pub mod hash;
pub mod manager;

pub use embedding_cache::EmbeddingCache;
pub use hash::{hash_bytes, hash_file};
pub use manager::{CacheManager, CacheMode, SourceContent, SourceHandle};
