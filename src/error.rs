//! Error types for the loading path.
//!
//! Every plain cache operation is total: absent keys are reported as
//! `None`, eviction and expiry are silent. Errors only arise from
//! [`get_or_load`](crate::cache::Cache::get_or_load), and they are `Clone`
//! so one outcome can be broadcast to every caller sharing a single-flight
//! invocation.

use std::fmt;
use std::sync::Arc;

/// Error returned by the loading variant of a lookup.
#[derive(Debug, Clone)]
pub enum CacheError {
    /// `get_or_load` was called with neither a per-call nor a default
    /// loader configured.
    LoaderMissing,
    /// The loader ran and returned an error; every single-flight follower
    /// receives the same underlying error.
    LoaderFailed(Arc<dyn std::error::Error + Send + Sync>),
    /// The cancellation token was triggered during loader execution.
    Cancelled,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::LoaderMissing => f.write_str("no loader configured"),
            CacheError::LoaderFailed(err) => write!(f, "loader failed: {err}"),
            CacheError::Cancelled => f.write_str("load cancelled"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::LoaderFailed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
