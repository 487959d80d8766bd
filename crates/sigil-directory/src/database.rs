//! Directory handle and read access.
//!
//! The [`Directory`] owns the SQLite connection, the managed photo store and
//! the notification sink. Reads go through a [`Reader`], writes through a
//! [`DirectoryTx`] obtained from [`Directory::transaction`]. Because the
//! transaction borrows the directory mutably, at most one unit of work is in
//! flight per directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use sigil_shared::constants::DEFAULT_USER_DATA_REFRESH_DAYS;

use crate::config::DirectoryConfig;
use crate::error::Result;
use crate::events::NotificationSink;
use crate::migrations;
use crate::photos::PhotoStore;
use crate::transaction::DirectoryTx;

pub struct Directory {
    conn: Connection,
    photos: PhotoStore,
    sink: Option<Arc<dyn NotificationSink>>,
    refresh_interval: chrono::Duration,
}

impl Directory {
    /// Open (or create) the directory described by `config`.
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(
            path = %config.database_path.display(),
            photos = %config.photos_dir.display(),
            "opening identity directory"
        );

        let mut directory = Self::open_at(&config.database_path, &config.photos_dir)?;
        directory.refresh_interval = config.refresh_interval();
        Ok(directory)
    }

    /// Open (or create) a directory at explicit paths.
    ///
    /// This is useful for tests and for embedding the directory inside
    /// custom layouts.
    pub fn open_at(db_path: &Path, photos_dir: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn,
            photos: PhotoStore::new(photos_dir)?,
            sink: None,
            refresh_interval: chrono::Duration::days(DEFAULT_USER_DATA_REFRESH_DAYS),
        })
    }

    /// Attach the sink that receives committed events.
    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_sink(&mut self, sink: Option<Arc<dyn NotificationSink>>) {
        self.sink = sink;
    }

    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.conn, &self.photos)
    }

    /// Start a unit of work. Dropping the returned transaction without
    /// committing discards every mutation and every scheduled effect.
    pub fn transaction(&mut self) -> Result<DirectoryTx<'_>> {
        DirectoryTx::begin(
            &mut self.conn,
            &self.photos,
            self.sink.clone(),
            self.refresh_interval,
        )
    }

    pub fn photos(&self) -> &PhotoStore {
        &self.photos
    }

    pub fn refresh_interval(&self) -> chrono::Duration {
        self.refresh_interval
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    /// Delete managed photo files that no details row references, such as
    /// files linked by a transaction that was rolled back.
    pub fn purge_orphan_photos(&self) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT photo_filename FROM identity_details WHERE photo_filename IS NOT NULL
             UNION
             SELECT photo_filename FROM group_details WHERE photo_filename IS NOT NULL",
        )?;
        let referenced = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;

        let mut removed = 0;
        for name in self.photos.list_files()? {
            if referenced.contains(&name) {
                continue;
            }
            match self.photos.remove(&self.photos.path_for(&name)) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(file = %name, error = %e, "failed to remove orphan photo"),
            }
        }

        if removed > 0 {
            tracing::info!(removed, "purged orphan photos");
        }
        Ok(removed)
    }
}

/// Read-only view over the directory, usable both outside and inside a
/// transaction. Resolves relationship keys in both directions.
#[derive(Clone, Copy)]
pub struct Reader<'a> {
    conn: &'a Connection,
    photos: &'a PhotoStore,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(conn: &'a Connection, photos: &'a PhotoStore) -> Self {
        Self { conn, photos }
    }

    pub(crate) fn conn(&self) -> &'a Connection {
        self.conn
    }

    pub fn photos(&self) -> &'a PhotoStore {
        self.photos
    }

    /// Resolve a stored photo file name. A missing file is logged and
    /// reported as "no photo".
    pub(crate) fn resolve_photo(&self, filename: Option<&str>) -> Option<PathBuf> {
        let filename = filename?;
        match self.photos.resolve(filename) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "photo referenced by the directory is missing");
                None
            }
        }
    }
}
