//! Persisted track selections awaiting the user's choice.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetcher::TrackListing;
use crate::request::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PendingSelectionError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// A track listing shown to a user who has not picked tracks yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSelection {
    pub user_id: i64,
    pub chat_id: i64,
    pub url: String,
    pub listing: TrackListing,
    pub message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingSelection {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// At most one pending selection per user.
pub trait PendingSelectionStore: Send + Sync {
    fn get(&self, user_id: i64) -> Result<Option<PendingSelection>, PendingSelectionError>;

    /// Insert unless the user has an unexpired selection. An expired one is
    /// replaced. Returns false if nothing was inserted.
    fn insert_if_absent(
        &self,
        selection: &PendingSelection,
        now: DateTime<Utc>,
    ) -> Result<bool, PendingSelectionError>;

    /// Atomically remove and return the user's selection. Of several
    /// concurrent callers at most one gets it.
    fn take(&self, user_id: i64) -> Result<Option<PendingSelection>, PendingSelectionError>;

    /// Returns true if a selection was removed.
    fn delete(&self, user_id: i64) -> Result<bool, PendingSelectionError>;

    /// Remove and return every selection expired at `now`.
    fn purge_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingSelection>, PendingSelectionError>;
}

pub struct SqlitePendingSelectionStore {
    conn: Mutex<Connection>,
}

impl SqlitePendingSelectionStore {
    pub fn new(path: &Path) -> Result<Self, PendingSelectionError> {
        let conn =
            Connection::open(path).map_err(|e| PendingSelectionError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, PendingSelectionError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PendingSelectionError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), PendingSelectionError> {
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS pending_selections (
                user_id INTEGER PRIMARY KEY,
                chat_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                listing TEXT NOT NULL,
                message_id INTEGER,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_pending_expires ON pending_selections(expires_at);
            "#,
        )
        .map_err(|e| PendingSelectionError::Database(e.to_string()))
    }
}

fn row_to_selection(row: &rusqlite::Row) -> rusqlite::Result<PendingSelection> {
    let listing_json: String = row.get(3)?;
    let listing = serde_json::from_str(&listing_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let created_at: String = row.get(5)?;
    let expires_at: String = row.get(6)?;
    Ok(PendingSelection {
        user_id: row.get(0)?,
        chat_id: row.get(1)?,
        url: row.get(2)?,
        listing,
        message_id: row.get(4)?,
        created_at: parse_timestamp(&created_at),
        expires_at: parse_timestamp(&expires_at),
    })
}

const COLUMNS: &str = "user_id, chat_id, url, listing, message_id, created_at, expires_at";

impl PendingSelectionStore for SqlitePendingSelectionStore {
    fn get(&self, user_id: i64) -> Result<Option<PendingSelection>, PendingSelectionError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM pending_selections WHERE user_id = ?1", COLUMNS),
            params![user_id],
            row_to_selection,
        )
        .optional()
        .map_err(|e| PendingSelectionError::Database(e.to_string()))
    }

    fn insert_if_absent(
        &self,
        selection: &PendingSelection,
        now: DateTime<Utc>,
    ) -> Result<bool, PendingSelectionError> {
        let listing = serde_json::to_string(&selection.listing)
            .map_err(|e| PendingSelectionError::Serialization(e.to_string()))?;
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "DELETE FROM pending_selections WHERE user_id = ?1 AND expires_at <= ?2",
            params![selection.user_id, format_timestamp(now)],
        )
        .map_err(|e| PendingSelectionError::Database(e.to_string()))?;

        let inserted = conn
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO pending_selections ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    COLUMNS
                ),
                params![
                    selection.user_id,
                    selection.chat_id,
                    selection.url,
                    listing,
                    selection.message_id,
                    format_timestamp(selection.created_at),
                    format_timestamp(selection.expires_at),
                ],
            )
            .map_err(|e| PendingSelectionError::Database(e.to_string()))?;

        Ok(inserted == 1)
    }

    fn take(&self, user_id: i64) -> Result<Option<PendingSelection>, PendingSelectionError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!(
                "DELETE FROM pending_selections WHERE user_id = ?1 RETURNING {}",
                COLUMNS
            ),
            params![user_id],
            row_to_selection,
        )
        .optional()
        .map_err(|e| PendingSelectionError::Database(e.to_string()))
    }

    fn delete(&self, user_id: i64) -> Result<bool, PendingSelectionError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn
            .execute(
                "DELETE FROM pending_selections WHERE user_id = ?1",
                params![user_id],
            )
            .map_err(|e| PendingSelectionError::Database(e.to_string()))?;
        Ok(deleted > 0)
    }

    fn purge_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingSelection>, PendingSelectionError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| PendingSelectionError::Database(e.to_string()))?;
        let cutoff = format_timestamp(now);

        let expired = {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT {} FROM pending_selections WHERE expires_at <= ?1 ORDER BY expires_at",
                    COLUMNS
                ))
                .map_err(|e| PendingSelectionError::Database(e.to_string()))?;
            let rows = stmt
                .query_map(params![cutoff], row_to_selection)
                .map_err(|e| PendingSelectionError::Database(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| PendingSelectionError::Database(e.to_string()))?
        };

        tx.execute(
            "DELETE FROM pending_selections WHERE expires_at <= ?1",
            params![cutoff],
        )
        .map_err(|e| PendingSelectionError::Database(e.to_string()))?;
        tx.commit()
            .map_err(|e| PendingSelectionError::Database(e.to_string()))?;

        Ok(expired)
    }
}
