//! Session store error types.

use crate::model::SessionId;
use derive_more::{Display, Error};
use tracing::instrument;

/// Session store error with location tracking for backend failures.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum StoreError {
    /// No session with this ID.
    #[display("Session {} not found", id)]
    NotFound {
        /// Missing session.
        id: SessionId,
    },
    /// A session with this ID was already inserted.
    #[display("Session {} already exists", id)]
    AlreadyExists {
        /// Duplicate session.
        id: SessionId,
    },
    /// Another writer committed first.
    #[display("Session {} changed since version {}", id, expected)]
    Conflict {
        /// Contended session.
        id: SessionId,
        /// Version the writer read.
        expected: u64,
    },
    /// The backend failed.
    #[display("Store error: {} at {}:{}", message, file, line)]
    Backend {
        /// Error message.
        message: String,
        /// Line number where error occurred.
        line: u32,
        /// Source file where error occurred.
        file: &'static str,
    },
}

impl StoreError {
    /// Creates a backend error with caller location tracking.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn backend(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self::Backend {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

impl From<diesel::result::Error> for StoreError {
    #[track_caller]
    fn from(err: diesel::result::Error) -> Self {
        Self::backend(format!("Diesel error: {}", err))
    }
}

impl From<diesel::ConnectionError> for StoreError {
    #[track_caller]
    fn from(err: diesel::ConnectionError) -> Self {
        Self::backend(format!("Connection error: {}", err))
    }
}

impl From<serde_json::Error> for StoreError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::backend(format!("Document error: {}", err))
    }
}
