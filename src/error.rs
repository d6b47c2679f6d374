//! The six error kinds the reconciler distinguishes.
//!
//! `RemoteClient` and `StateStore` surface `EngineError` so callers upstream
//! can match on kind; everything above the engine boundary collapses to
//! `anyhow::Error` the way the rest of this codebase does.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Connection-reset-class fault. `tryTwice` already retried once; this
    /// is the error surfacing after that retry also failed.
    #[error("transient remote error: {0}")]
    TransientRemote(String),

    /// Auth, not-found, quota: the triggering action is abandoned and state
    /// is not advanced past the failed change.
    #[error("permanent remote error: {0}")]
    PermanentRemote(String),

    /// Permission or missing-parent-directory class of local I/O failure.
    #[error("local filesystem error at {path}: {source}")]
    LocalFs {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// State-document persistence failed; fatal for the current cycle.
    #[error("state store I/O error: {0}")]
    StateStoreIo(String),

    /// The local root directory itself is gone; fatal for the engine.
    #[error("local root removed: {0}")]
    LocalRootRemoved(String),

    /// An invariant the reconciler assumes (e.g. a parent path being known
    /// before a local file can be uploaded) did not hold.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl EngineError {
    /// Kinds 4 and 5 stop the engine outright; everything else is scoped to
    /// the action or change that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::StateStoreIo(_) | EngineError::LocalRootRemoved(_)
        )
    }
}
