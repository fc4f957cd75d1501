//! In-process session store.

use super::{SessionStore, StoreError, Versioned};
use crate::model::{Session, SessionId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

type Entries<B, A> = HashMap<SessionId, (u64, Session<B, A>)>;

/// Holds every session in a mutex-guarded map.
#[derive(Debug)]
pub struct MemoryStore<B, A> {
    sessions: Arc<Mutex<Entries<B, A>>>,
}

impl<B, A> MemoryStore<B, A> {
    /// Creates an empty store.
    #[instrument]
    pub fn new() -> Self {
        info!("Creating in-memory session store");
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries<B, A>>, StoreError> {
        self.sessions
            .lock()
            .map_err(|_| StoreError::backend("Session map lock poisoned"))
    }
}

impl<B, A> Default for MemoryStore<B, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B, A> Clone for MemoryStore<B, A> {
    fn clone(&self) -> Self {
        Self {
            sessions: Arc::clone(&self.sessions),
        }
    }
}

impl<B, A> SessionStore<B, A> for MemoryStore<B, A>
where
    B: Clone + Send,
    A: Clone + Send,
{
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    fn insert(&self, session: &Session<B, A>) -> Result<u64, StoreError> {
        let mut sessions = self.lock()?;

        if sessions.contains_key(&session.id) {
            warn!("Session already exists");
            return Err(StoreError::AlreadyExists {
                id: session.id.clone(),
            });
        }

        sessions.insert(session.id.clone(), (1, session.clone()));
        debug!("Session inserted");
        Ok(1)
    }

    #[instrument(skip(self))]
    fn load(&self, id: &str) -> Result<Option<Versioned<B, A>>, StoreError> {
        let sessions = self.lock()?;
        let found = sessions.get(id).map(|(version, session)| Versioned {
            version: *version,
            session: session.clone(),
        });

        if found.is_none() {
            debug!(session_id = id, "Session not found");
        }

        Ok(found)
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    fn replace(&self, expected_version: u64, session: &Session<B, A>) -> Result<u64, StoreError> {
        let mut sessions = self.lock()?;

        let (version, stored) =
            sessions
                .get_mut(&session.id)
                .ok_or_else(|| StoreError::NotFound {
                    id: session.id.clone(),
                })?;

        if *version != expected_version {
            debug!(
                stored = *version,
                expected = expected_version,
                "Version mismatch"
            );
            return Err(StoreError::Conflict {
                id: session.id.clone(),
                expected: expected_version,
            });
        }

        *version += 1;
        *stored = session.clone();
        debug!(version = *version, "Session replaced");
        Ok(*version)
    }

    #[instrument(skip(self))]
    fn list(&self) -> Result<Vec<Session<B, A>>, StoreError> {
        let sessions = self.lock()?;
        let mut all: Vec<_> = sessions.values().map(|(_, s)| s.clone()).collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        info!(count = all.len(), "Listed sessions");
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Participant;
    use chrono::Utc;

    fn session(id: &str) -> Session<u8, u8> {
        Session::new(
            id.to_string(),
            "test".to_string(),
            [Participant::human("alice"), Participant::human("bob")],
            "bob".to_string(),
            "alice".to_string(),
            0,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_versions_start_at_one() {
        let store = MemoryStore::new();
        assert_eq!(store.insert(&session("s1")).expect("Insert"), 1);
        let loaded = store.load("s1").expect("Load").expect("Present");
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let store = MemoryStore::new();
        store.insert(&session("s1")).expect("Insert");
        assert!(matches!(
            store.insert(&session("s1")),
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_stale_replace_conflicts() {
        let store = MemoryStore::new();
        let s = session("s1");
        store.insert(&s).expect("Insert");
        assert_eq!(store.replace(1, &s).expect("First writer"), 2);
        assert!(matches!(
            store.replace(1, &s),
            Err(StoreError::Conflict { expected: 1, .. })
        ));
    }

    #[test]
    fn test_replace_missing_is_not_found() {
        let store: MemoryStore<u8, u8> = MemoryStore::new();
        assert!(matches!(
            store.replace(1, &session("ghost")),
            Err(StoreError::NotFound { .. })
        ));
    }
}
