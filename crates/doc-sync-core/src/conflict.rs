//! Classification of failed persistence attempts.
//!
//! The resolver only labels a failure; it never retries. Retry policy
//! belongs to whoever receives the callback.

use crate::persistence::PersistError;

/// How a failed `create` or `merge_update` should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The caller's basis version is stale. Re-fetch before retrying.
    Conflict,
    /// May succeed if attempted again.
    Transient,
    /// Will not succeed without changing the request.
    Fatal,
}

/// Classify a persistence failure.
pub fn classify(err: &PersistError) -> Resolution {
    match err {
        PersistError::VersionConflict(_) => Resolution::Conflict,
        PersistError::Transport { retryable: true, .. } => Resolution::Transient,
        PersistError::Transport { retryable: false, .. } => Resolution::Fatal,
        PersistError::NotFound(_) => Resolution::Fatal,
    }
}
