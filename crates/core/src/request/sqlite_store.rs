//! SQLite-backed request store implementation.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    CreateRequest, Request, RequestFilter, RequestStatus, RequestStore, RequestStoreError,
    Selection, StatusUpdate, UpdateOutcome,
};

const SELECT_COLUMNS: &str = "id, user_id, chat_id, url, download_type, tracks, status, \
     created_at, updated_at, download_path, published_url, error_message, is_active, message_id";

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// SQLite-backed request store.
pub struct SqliteRequestStore {
    conn: Mutex<Connection>,
}

impl SqliteRequestStore {
    /// Create a new SQLite request store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, RequestStoreError> {
        let conn =
            Connection::open(path).map_err(|e| RequestStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite request store (useful for testing).
    pub fn in_memory() -> Result<Self, RequestStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RequestStoreError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RequestStoreError> {
        conn.execute_batch(
            r#"
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS download_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                chat_id INTEGER NOT NULL,
                url TEXT NOT NULL,
                download_type TEXT NOT NULL,
                tracks TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                download_path TEXT,
                published_url TEXT,
                error_message TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                message_id INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_requests_status ON download_requests(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_requests_user ON download_requests(user_id, is_active);
            "#,
        )
        .map_err(|e| RequestStoreError::Database(e.to_string()))?;

        Ok(())
    }

    fn build_where_clause(filter: &RequestFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str()));
        }

        if let Some(user_id) = filter.user_id {
            conditions.push("user_id = ?");
            params.push(Box::new(user_id));
        }

        if filter.active_only {
            conditions.push("is_active = 1");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<Request> {
        let download_type: String = row.get(4)?;
        let tracks: Option<String> = row.get(5)?;
        let status_str: String = row.get(6)?;
        let created_at_str: String = row.get(7)?;
        let updated_at_str: String = row.get(8)?;
        let download_path: Option<String> = row.get(9)?;

        let selection = Selection::from_stored(&download_type, tracks.as_deref())
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
        let status: RequestStatus = status_str
            .parse()
            .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into()))?;

        Ok(Request {
            id: row.get(0)?,
            user_id: row.get(1)?,
            chat_id: row.get(2)?,
            url: row.get(3)?,
            selection,
            status,
            created_at: parse_timestamp(&created_at_str),
            updated_at: parse_timestamp(&updated_at_str),
            download_path: download_path.map(PathBuf::from),
            published_url: row.get(10)?,
            error_message: row.get(11)?,
            is_active: row.get(12)?,
            message_id: row.get(13)?,
        })
    }

    fn fetch_one(conn: &Connection, id: i64) -> Result<Option<Request>, RequestStoreError> {
        conn.query_row(
            &format!("SELECT {} FROM download_requests WHERE id = ?", SELECT_COLUMNS),
            params![id],
            Self::row_to_request,
        )
        .optional()
        .map_err(|e| RequestStoreError::Database(e.to_string()))
    }

    fn query_list(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Request>, RequestStoreError> {
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| RequestStoreError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params, Self::row_to_request)
            .map_err(|e| RequestStoreError::Database(e.to_string()))?;

        let mut requests = Vec::new();
        for row_result in rows {
            requests.push(row_result.map_err(|e| RequestStoreError::Database(e.to_string()))?);
        }
        Ok(requests)
    }
}

impl RequestStore for SqliteRequestStore {
    fn create(&self, request: CreateRequest) -> Result<Request, RequestStoreError> {
        let conn = self.conn.lock().unwrap();

        let now = Utc::now();
        let status = RequestStatus::Queued;

        conn.execute(
            "INSERT INTO download_requests (user_id, chat_id, url, download_type, tracks, status, created_at, updated_at, is_active) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1)",
            params![
                request.user_id,
                request.chat_id,
                request.url,
                request.selection.kind(),
                request.selection.descriptor(),
                status.as_str(),
                format_timestamp(now),
                format_timestamp(now),
            ],
        )
        .map_err(|e| RequestStoreError::Database(e.to_string()))?;

        Ok(Request {
            id: conn.last_insert_rowid(),
            user_id: request.user_id,
            chat_id: request.chat_id,
            url: request.url,
            selection: request.selection,
            status,
            created_at: now,
            updated_at: now,
            download_path: None,
            published_url: None,
            error_message: None,
            is_active: true,
            message_id: None,
        })
    }

    fn get(&self, id: i64) -> Result<Option<Request>, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        Self::fetch_one(&conn, id)
    }

    fn list(&self, filter: &RequestFilter) -> Result<Vec<Request>, RequestStoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!(
            "SELECT {} FROM download_requests {} ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?",
            SELECT_COLUMNS, where_clause
        );

        let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = params;
        all_params.push(Box::new(filter.limit));
        all_params.push(Box::new(filter.offset));
        let param_refs: Vec<&dyn rusqlite::ToSql> = all_params.iter().map(|p| p.as_ref()).collect();

        Self::query_list(&conn, &sql, param_refs.as_slice())
    }

    fn count(&self, filter: &RequestFilter) -> Result<i64, RequestStoreError> {
        let conn = self.conn.lock().unwrap();

        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM download_requests {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))
            .map_err(|e| RequestStoreError::Database(e.to_string()))
    }

    fn list_queued(&self) -> Result<Vec<Request>, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM download_requests WHERE status = 'queued' ORDER BY created_at ASC, id ASC",
            SELECT_COLUMNS
        );
        Self::query_list(&conn, &sql, &[])
    }

    fn count_processing(&self) -> Result<i64, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM download_requests WHERE status = 'processing' AND is_active = 1",
            [],
            |row| row.get(0),
        )
        .map_err(|e| RequestStoreError::Database(e.to_string()))
    }

    fn set_status(
        &self,
        id: i64,
        update: StatusUpdate,
    ) -> Result<UpdateOutcome, RequestStoreError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::fetch_one(&conn, id)?.ok_or(RequestStoreError::NotFound(id))?;

        if current.status.is_terminal() {
            return Ok(UpdateOutcome::Skipped(current));
        }
        if !current.status.can_transition_to(update.status) {
            return Err(RequestStoreError::InvalidTransition {
                request_id: id,
                from: current.status,
                to: update.status,
            });
        }

        let now = Utc::now();
        let is_active = update.status.is_active();
        let download_path = update
            .download_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned());

        conn.execute(
            "UPDATE download_requests SET status = ?, updated_at = ?, is_active = ?, \
             download_path = COALESCE(?, download_path), \
             published_url = COALESCE(?, published_url), \
             error_message = COALESCE(?, error_message) WHERE id = ?",
            params![
                update.status.as_str(),
                format_timestamp(now),
                is_active,
                download_path,
                update.published_url,
                update.error_message,
                id,
            ],
        )
        .map_err(|e| RequestStoreError::Database(e.to_string()))?;

        Ok(UpdateOutcome::Applied(Request {
            status: update.status,
            updated_at: now,
            is_active,
            download_path: update.download_path.or(current.download_path),
            published_url: update.published_url.or(current.published_url),
            error_message: update.error_message.or(current.error_message),
            ..current
        }))
    }

    fn cancel(&self, id: i64) -> Result<Request, RequestStoreError> {
        let conn = self.conn.lock().unwrap();

        let current = Self::fetch_one(&conn, id)?.ok_or(RequestStoreError::NotFound(id))?;

        if !current.status.can_cancel() {
            return Err(RequestStoreError::InvalidState {
                request_id: id,
                current_status: current.status,
                operation: "cancel".to_string(),
            });
        }

        let now = Utc::now();
        conn.execute(
            "UPDATE download_requests SET status = 'cancelled', is_active = 0, updated_at = ? WHERE id = ?",
            params![format_timestamp(now), id],
        )
        .map_err(|e| RequestStoreError::Database(e.to_string()))?;

        Ok(Request {
            status: RequestStatus::Cancelled,
            is_active: false,
            updated_at: now,
            ..current
        })
    }

    fn list_active_for_owner(&self, user_id: i64) -> Result<Vec<Request>, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM download_requests WHERE user_id = ? AND is_active = 1 ORDER BY created_at ASC, id ASC",
            SELECT_COLUMNS
        );
        Self::query_list(&conn, &sql, &[&user_id])
    }

    fn set_message_id(&self, id: i64, message_id: i64) -> Result<(), RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn
            .execute(
                "UPDATE download_requests SET message_id = ? WHERE id = ?",
                params![message_id, id],
            )
            .map_err(|e| RequestStoreError::Database(e.to_string()))?;
        if changed == 0 {
            return Err(RequestStoreError::NotFound(id));
        }
        Ok(())
    }
}
