//! Error types for the git-backed inventory store.

use labfleet_inventory::InventoryError;
use thiserror::Error;

/// Result type alias for store operations.
pub type GitStoreResult<T> = Result<T, GitStoreError>;

/// Errors raised while reading from or committing to the config repository.
#[derive(Debug, Error)]
pub enum GitStoreError {
    #[error("store configuration error: {0}")]
    Config(String),

    #[error("transport error during {op}: {message}")]
    Transport { op: &'static str, message: String },

    #[error("bad repository archive: {0}")]
    Archive(String),

    #[error("file {0} not found in repository archive")]
    MissingFile(String),

    #[error("failed to parse inventory: {0}")]
    Parse(#[from] InventoryError),

    #[error("commit on an invalid store (state: {0})")]
    InvalidStore(&'static str),

    #[error("nothing to commit")]
    EmptyCommit,

    #[error("review step '{step}' failed: {message}")]
    Review { step: &'static str, message: String },
}

impl GitStoreError {
    pub(crate) fn transport(op: &'static str, err: impl std::fmt::Display) -> Self {
        GitStoreError::Transport {
            op,
            message: err.to_string(),
        }
    }

    /// Whether a fresh attempt from a new snapshot may succeed.
    ///
    /// Fetch and parse failures count: the next Refresh may read a
    /// different branch tip.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GitStoreError::Transport { .. }
                | GitStoreError::Archive(_)
                | GitStoreError::MissingFile(_)
                | GitStoreError::Parse(_)
                | GitStoreError::Review { .. }
        )
    }
}
