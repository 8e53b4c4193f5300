//! Database module for reservation and query storage.
//!
//! This module provides SQLite-based persistent storage for:
//! - Reservations, in store order
//! - Search queries
//!
//! Saves replace the whole table inside one transaction.

mod queries;
mod reservations;
mod schema;

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use recsched_model::{ModelError, Query, Reservation};
use rusqlite::{Connection, Result as SqliteResult};
use thiserror::Error;

use crate::error::HostError;
use crate::host::Persistence;

/// Timestamp format of `start_time` columns.
const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Database error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid stored value: {0}")]
    Model(#[from] ModelError),

    #[error("Invalid option JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid timestamp: {0}")]
    InvalidTime(String),

    #[error("Database path error: {0}")]
    PathError(String),
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

fn format_time(time: NaiveDateTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn parse_time(text: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, TIME_FORMAT).map_err(|_| DatabaseError::InvalidTime(text.to_string()))
}

/// Main database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| DatabaseError::PathError(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(path)?;

        let db = Self { conn };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        let db = Self { conn };
        db.initialize_schema()?;

        Ok(db)
    }

    /// Default database location next to the executable's working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from("recsched.db")
    }

    /// Initialize the database schema.
    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    /// Get the underlying connection (for advanced queries).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction.
    pub fn transaction(&mut self) -> SqliteResult<rusqlite::Transaction<'_>> {
        self.conn.transaction()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

fn persistence_error(e: DatabaseError) -> HostError {
    HostError::Persistence(e.to_string())
}

impl Persistence for Database {
    fn load_reservations(&mut self) -> std::result::Result<Vec<Reservation>, HostError> {
        self.get_reservations().map_err(persistence_error)
    }

    fn save_reservations(&mut self, reservations: &[Reservation]) -> std::result::Result<(), HostError> {
        self.replace_reservations(reservations).map_err(persistence_error)
    }

    fn load_queries(&mut self) -> std::result::Result<Vec<Query>, HostError> {
        self.get_queries().map_err(persistence_error)
    }

    fn save_queries(&mut self, queries: &[Query]) -> std::result::Result<(), HostError> {
        self.replace_queries(queries).map_err(persistence_error)
    }
}
