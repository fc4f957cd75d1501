//! Session Store: the single source of truth for every session.
//!
//! Writers never overwrite blindly. Each write names the version it read and
//! fails with [`StoreError::Conflict`] if another writer committed first.

mod error;
mod memory;
mod models;
mod schema;
mod sqlite;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::model::Session;

/// A session together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<B, A> {
    /// Monotonic write counter, starting at 1.
    pub version: u64,
    /// The stored document.
    pub session: Session<B, A>,
}

/// Transactionally updatable session documents.
pub trait SessionStore<B, A>: Send + Sync {
    /// Stores a new session at version 1.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the ID is taken.
    fn insert(&self, session: &Session<B, A>) -> Result<u64, StoreError>;

    /// Reads the latest committed version, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the document cannot be read.
    fn load(&self, id: &str) -> Result<Option<Versioned<B, A>>, StoreError>;

    /// Replaces the document if it is still at `expected_version`.
    ///
    /// Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if another write landed in between and
    /// [`StoreError::NotFound`] if the session does not exist.
    fn replace(&self, expected_version: u64, session: &Session<B, A>) -> Result<u64, StoreError>;

    /// All sessions, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the documents cannot be read.
    fn list(&self) -> Result<Vec<Session<B, A>>, StoreError>;
}
