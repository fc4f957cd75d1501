//! SQLite-backed session store.

use super::models::SessionRow;
use super::{SessionStore, StoreError, Versioned, schema};
use crate::model::Session;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use tracing::{debug, info, instrument, warn};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Stores each session as a versioned JSON document in SQLite.
///
/// A fresh connection is opened per operation, so the store is cheap to clone
/// and safe to share across threads.
#[derive(Debug)]
pub struct SqliteStore<B, A> {
    db_path: String,
    _document: PhantomData<fn() -> (B, A)>,
}

impl<B, A> Clone for SqliteStore<B, A> {
    fn clone(&self) -> Self {
        Self {
            db_path: self.db_path.clone(),
            _document: PhantomData,
        }
    }
}

impl<B, A> SqliteStore<B, A> {
    /// Opens the database at `db_path` and applies pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the database cannot be opened or migrated.
    #[instrument(skip(db_path))]
    pub fn open(db_path: impl Into<String>) -> Result<Self, StoreError> {
        let store = Self {
            db_path: db_path.into(),
            _document: PhantomData,
        };

        let mut conn = store.connection()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::backend(format!("Migrations failed: {}", e)))?;

        info!(path = %store.db_path, migrations = applied.len(), "Session store ready");
        Ok(store)
    }

    /// Path of the backing database file.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Establishes a database connection.
    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, StoreError> {
        debug!(path = %self.db_path, "Establishing connection");
        let mut conn = SqliteConnection::establish(&self.db_path).map_err(|e| {
            StoreError::backend(format!("Failed to connect to '{}': {}", self.db_path, e))
        })?;
        diesel::sql_query("PRAGMA busy_timeout = 5000").execute(&mut conn)?;
        Ok(conn)
    }
}

fn to_db_version(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::backend(format!("Version {} overflows", version)))
}

fn from_db_version(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version).map_err(|_| StoreError::backend(format!("Negative version {}", version)))
}

impl<B, A> SessionStore<B, A> for SqliteStore<B, A>
where
    B: Serialize + DeserializeOwned,
    A: Serialize + DeserializeOwned,
{
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    fn insert(&self, session: &Session<B, A>) -> Result<u64, StoreError> {
        let mut conn = self.connection()?;

        let row = SessionRow::new(
            session.id.clone(),
            session.game.clone(),
            session.status.to_string(),
            1,
            serde_json::to_string(session)?,
            session.updated_at.naive_utc(),
        );

        match diesel::insert_into(schema::sessions::table)
            .values(&row)
            .execute(&mut conn)
        {
            Ok(_) => {
                info!(game = %session.game, "Session inserted");
                Ok(1)
            }
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                warn!("Session already exists");
                Err(StoreError::AlreadyExists {
                    id: session.id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    fn load(&self, id: &str) -> Result<Option<Versioned<B, A>>, StoreError> {
        let mut conn = self.connection()?;

        let row = schema::sessions::table
            .find(id)
            .select(SessionRow::as_select())
            .first(&mut conn)
            .optional()?;

        let Some(row) = row else {
            debug!(session_id = id, "Session not found");
            return Ok(None);
        };

        Ok(Some(Versioned {
            version: from_db_version(*row.version())?,
            session: serde_json::from_str(row.document())?,
        }))
    }

    #[instrument(skip(self, session), fields(session_id = %session.id))]
    fn replace(&self, expected_version: u64, session: &Session<B, A>) -> Result<u64, StoreError> {
        use schema::sessions::dsl;

        let mut conn = self.connection()?;
        let expected = to_db_version(expected_version)?;
        let document = serde_json::to_string(session)?;

        let updated = diesel::update(
            dsl::sessions
                .filter(dsl::id.eq(session.id.as_str()))
                .filter(dsl::version.eq(expected)),
        )
        .set((
            dsl::status.eq(session.status.to_string()),
            dsl::version.eq(expected + 1),
            dsl::document.eq(document),
            dsl::updated_at.eq(session.updated_at.naive_utc()),
        ))
        .execute(&mut conn)?;

        if updated == 1 {
            debug!(version = expected + 1, "Session replaced");
            return from_db_version(expected + 1);
        }

        let stored = dsl::sessions
            .find(session.id.as_str())
            .select(dsl::version)
            .first::<i64>(&mut conn)
            .optional()?;

        match stored {
            None => Err(StoreError::NotFound {
                id: session.id.clone(),
            }),
            Some(stored) => {
                debug!(stored, expected, "Version mismatch");
                Err(StoreError::Conflict {
                    id: session.id.clone(),
                    expected: expected_version,
                })
            }
        }
    }

    #[instrument(skip(self))]
    fn list(&self) -> Result<Vec<Session<B, A>>, StoreError> {
        let mut conn = self.connection()?;

        let rows = schema::sessions::table
            .order(schema::sessions::updated_at.desc())
            .select(SessionRow::as_select())
            .load(&mut conn)?;

        let sessions = rows
            .iter()
            .map(|row| serde_json::from_str(row.document()))
            .collect::<Result<Vec<_>, _>>()?;

        info!(count = sessions.len(), "Sessions loaded");
        Ok(sessions)
    }
}
