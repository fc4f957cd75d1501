//! Row types for the `sessions` table.

use chrono::NaiveDateTime;
use derive_getters::Getters;
use derive_new::new;
use diesel::prelude::*;

use super::schema;

/// A stored session document.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Insertable, Getters, new)]
#[diesel(table_name = schema::sessions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SessionRow {
    id: String,
    game: String,
    status: String,
    version: i64,
    document: String,
    updated_at: NaiveDateTime,
}
