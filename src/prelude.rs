pub use crate::builder::CacheBuilder;
pub use crate::bytes::{BytesCache, BytesCacheBuilder};
pub use crate::cache::{Cache, CacheStats, CancelToken};
pub use crate::error::CacheError;
