//! Core error types for plotjob-core.
//!
//! This module defines the error hierarchy using thiserror. The FSM layer
//! has its own `FsmError` (see `fsm`) because its variants map onto distinct
//! CLI exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for plotjob-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Journal-related errors
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Job row not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Journal-specific errors.
#[derive(Error, Debug)]
pub enum JournalError {
    /// Failed to open or create a journal file
    #[error("Failed to open journal for {job_id}: {source}")]
    OpenFailed {
        job_id: String,
        #[source]
        source: std::io::Error,
    },

    /// Append failed mid-write
    #[error("Failed to append to journal for {job_id}: {message}")]
    AppendFailed { job_id: String, message: String },

    /// A line could not be decoded outside of an explicit repair
    #[error("Corrupt journal line {line} for {job_id}")]
    CorruptLine { job_id: String, line: usize },

    /// Repair failed
    #[error("Journal repair failed for {job_id}: {message}")]
    RepairFailed { job_id: String, message: String },
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            rusqlite::Error::QueryReturnedNoRows => {
                DatabaseError::QueryFailed("no rows".into())
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
