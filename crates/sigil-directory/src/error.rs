use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the identity directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (photo files, data directories).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A uniquely keyed entity already exists. Nothing was created.
    #[error("{entity} already exists: {key}")]
    DuplicateEntity { entity: &'static str, key: String },

    /// An operation reached an entity that is not attached to its owner.
    #[error("Missing context: {0}")]
    MissingContext(String),

    /// A structurally required entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// A backup or snapshot could not be decoded or restored.
    #[error("Malformed backup data: {0}")]
    MalformedBackupData(String),

    /// A photo file referenced by the store is missing on disk.
    #[error("Photo file missing: {}", .0.display())]
    FilesystemInconsistency(PathBuf),

    /// Details versions only move forward.
    #[error("Invalid details version: current {current}, proposed {proposed}")]
    InvalidDetailsVersion { current: i64, proposed: i64 },

    /// The operation does not apply to this variant of the entity.
    #[error("Operation not applicable: {0}")]
    NotApplicable(&'static str),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// Invalid identifier bytes.
    #[error("Invalid identifier: {0}")]
    Type(#[from] sigil_shared::TypeError),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

impl DirectoryError {
    pub(crate) fn duplicate(entity: &'static str, key: impl ToString) -> Self {
        Self::DuplicateEntity {
            entity,
            key: key.to_string(),
        }
    }

    /// Programmer error: fatal in debug builds, recoverable in release.
    pub(crate) fn missing_context(what: impl Into<String>) -> Self {
        let what = what.into();
        tracing::error!(what = %what, "operation on a detached entity");
        if cfg!(debug_assertions) {
            panic!("missing context: {what}");
        }
        Self::MissingContext(what)
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Self::MalformedBackupData(what.into())
    }
}

/// Row-level invariant failure, surfaced through `rusqlite` row mappers.
#[derive(Error, Debug)]
#[error("{0}")]
pub(crate) struct RowInvariant(pub String);

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DirectoryError>;
