//! Unit of work over the directory.
//!
//! A [`DirectoryTx`] wraps a SQLite transaction together with the effects its
//! mutations staged: events to emit and photo files to remove. Effects run
//! only after the SQLite commit succeeded, in order, and exactly once. A
//! transaction dropped before `commit` rolls back and discards them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, error, warn};

use crate::changes::ChangeTracker;
use crate::database::Reader;
use crate::error::Result;
use crate::events::{emit_events, IdentityEvent, NotificationSink};
use crate::models::{GroupDetailsKey, IdentityDetailsKey};
use crate::photos::{self, ImportMode, PhotoStore};

/// A side effect staged by the current transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Notify(IdentityEvent),
    RemoveFile(PathBuf),
}

/// What happened after a successful commit.
#[derive(Debug, Default, Clone)]
pub struct CommitReport {
    pub events: Vec<IdentityEvent>,
    pub removed_files: usize,
}

/// The details row holding a photo reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhotoSlot {
    Identity(IdentityDetailsKey),
    Group(GroupDetailsKey),
}

impl PhotoSlot {
    fn table(&self) -> &'static str {
        match self {
            Self::Identity(_) => "identity_details",
            Self::Group(_) => "group_details",
        }
    }

    fn id(&self) -> i64 {
        match self {
            Self::Identity(key) => key.0,
            Self::Group(key) => key.0,
        }
    }
}

/// A file brought into the photo directory by this transaction.
#[derive(Debug)]
struct ImportedPhoto {
    stored: PathBuf,
    /// Where the file was moved from, if it was moved rather than linked.
    origin: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct PendingEffects {
    removals: Vec<PathBuf>,
    new_photos: Vec<PhotoSlot>,
    imports: Vec<ImportedPhoto>,
}

pub struct DirectoryTx<'d> {
    tx: Transaction<'d>,
    photos: &'d PhotoStore,
    sink: Option<Arc<dyn NotificationSink>>,
    refresh_interval: chrono::Duration,
    pub(crate) changes: ChangeTracker,
    effects: PendingEffects,
}

impl<'d> DirectoryTx<'d> {
    pub(crate) fn begin(
        conn: &'d mut Connection,
        photos: &'d PhotoStore,
        sink: Option<Arc<dyn NotificationSink>>,
        refresh_interval: chrono::Duration,
    ) -> Result<Self> {
        Ok(Self {
            tx: conn.transaction()?,
            photos,
            sink,
            refresh_interval,
            changes: ChangeTracker::default(),
            effects: PendingEffects::default(),
        })
    }

    pub fn reader(&self) -> Reader<'_> {
        Reader::new(&self.tx, self.photos)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.tx
    }

    pub(crate) fn photos(&self) -> &'d PhotoStore {
        self.photos
    }

    pub fn refresh_interval(&self) -> chrono::Duration {
        self.refresh_interval
    }

    /// Remove `path` once this transaction has committed.
    pub(crate) fn schedule_removal(&mut self, path: PathBuf) {
        self.effects.removals.push(path);
    }

    /// Schedule removal of a stored photo, if any.
    pub(crate) fn schedule_photo_removal(&mut self, filename: Option<&str>) {
        if let Some(filename) = filename {
            let path = self.photos.path_for(filename);
            self.schedule_removal(path);
        }
    }

    /// Point `slot` at a new photo (or none), scheduling removal of the
    /// current file. Returns `false` when nothing changed: same path, or
    /// byte-identical content.
    pub(crate) fn replace_photo(
        &mut self,
        slot: PhotoSlot,
        current: Option<&str>,
        source: Option<&Path>,
        mode: ImportMode,
    ) -> Result<bool> {
        let current_path = current.map(|f| self.photos.path_for(f));

        match (&current_path, source) {
            (None, None) => return Ok(false),
            (Some(cur), Some(new)) if cur.as_path() == new || photos::contents_equal(cur, new) => {
                return Ok(false);
            }
            _ => {}
        }

        let filename = source.map(|path| self.import_photo(path, mode)).transpose()?;

        self.tx.execute(
            &format!("UPDATE {} SET photo_filename = ?1 WHERE id = ?2", slot.table()),
            params![filename, slot.id()],
        )?;

        if let Some(path) = current_path {
            self.schedule_removal(path);
        }
        if filename.is_some() {
            self.effects.new_photos.push(slot);
        }
        Ok(true)
    }

    fn import_photo(&mut self, source: &Path, mode: ImportMode) -> Result<String> {
        let moved = mode == ImportMode::LinkOrMove && !self.photos.is_managed(source);
        let filename = self.photos.import(source, mode)?;
        self.effects.imports.push(ImportedPhoto {
            stored: self.photos.path_for(&filename),
            origin: moved.then(|| source.to_path_buf()),
        });
        Ok(filename)
    }

    /// Link a freshly imported photo into a details row that has none yet.
    pub(crate) fn attach_new_photo(&mut self, slot: PhotoSlot, source: &Path) -> Result<()> {
        self.replace_photo(slot, None, Some(source), ImportMode::Link)?;
        Ok(())
    }

    /// The effects `commit` would run, in order.
    pub fn pending_effects(&self) -> Vec<Effect> {
        let mut effects: Vec<Effect> = self.changes.events().into_iter().map(Effect::Notify).collect();
        effects.extend(self.effects.removals.iter().cloned().map(Effect::RemoveFile));
        effects
    }

    /// Durably commit, then emit events and remove scheduled files.
    pub fn commit(self) -> Result<CommitReport> {
        let DirectoryTx {
            tx,
            photos,
            sink,
            changes,
            effects,
            ..
        } = self;

        verify_new_photos(&tx, photos, &effects.new_photos)?;
        let events = changes.events();

        if let Err(e) = tx.commit() {
            warn!(error = %e, "commit failed, discarding staged effects");
            return Err(e.into());
        }

        emit_events(sink.as_ref(), &events);

        let mut removed_files = 0;
        for path in &effects.removals {
            match photos.remove(path) {
                Ok(()) => removed_files += 1,
                Err(e) => error!(path = %path.display(), error = %e, "Failed to remove photo"),
            }
        }

        debug!(events = events.len(), removed_files, "directory transaction committed");

        Ok(CommitReport {
            events,
            removed_files,
        })
    }

    /// Abandon the transaction and undo its photo imports: linked files are
    /// removed, moved files go back where they came from. Dropping the
    /// transaction instead rolls back the database only; the imported files
    /// stay behind until [`Directory::purge_orphan_photos`].
    ///
    /// [`Directory::purge_orphan_photos`]: crate::database::Directory::purge_orphan_photos
    pub fn rollback(self) -> Result<()> {
        debug!(
            discarded_removals = self.effects.removals.len(),
            undone_imports = self.effects.imports.len(),
            "directory transaction rolled back"
        );
        self.tx.rollback()?;

        for imported in self.effects.imports.iter().rev() {
            if let Err(e) = self
                .photos
                .undo_import(&imported.stored, imported.origin.as_deref())
            {
                warn!(path = %imported.stored.display(), error = %e, "failed to undo photo import");
            }
        }
        Ok(())
    }
}

/// Photos linked during this transaction must still exist when it commits.
/// A missing file is logged and the reference cleared.
fn verify_new_photos(conn: &Connection, photos: &PhotoStore, slots: &[PhotoSlot]) -> Result<()> {
    for slot in slots {
        let filename: Option<String> = conn
            .query_row(
                &format!("SELECT photo_filename FROM {} WHERE id = ?1", slot.table()),
                params![slot.id()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let Some(filename) = filename else { continue };
        if let Err(e) = photos.resolve(&filename) {
            warn!(error = %e, table = slot.table(), id = slot.id(), "treating missing photo as no photo");
            conn.execute(
                &format!("UPDATE {} SET photo_filename = NULL WHERE id = ?1", slot.table()),
                params![slot.id()],
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EVENT_NEW_REMOTE_OWNED_DEVICE;
    use crate::test_support::*;

    #[test]
    fn sink_sees_events_only_after_commit() {
        let (mut dir, sink, _tmp) = recording_directory();
        let owned = create_owned(&mut dir, 1);
        sink.events.lock().unwrap().clear();

        let mut tx = dir.transaction().unwrap();
        tx.add_remote_owned_device(owned, uid(2), None).unwrap();
        assert_eq!(
            tx.pending_effects(),
            vec![
                Effect::Notify(IdentityEvent::NewRemoteOwnedDevice {
                    owned_identity: crypto_id(1),
                    device_uid: uid(2),
                }),
                Effect::Notify(IdentityEvent::BackupableContentChanged),
            ]
        );
        assert!(sink.names().is_empty());

        tx.commit().unwrap();
        assert_eq!(sink.names(), vec![EVENT_NEW_REMOTE_OWNED_DEVICE, BACKUPABLE]);
    }

    #[test]
    fn rollback_discards_rows_and_events() {
        let (mut dir, sink, _tmp) = recording_directory();
        let owned = create_owned(&mut dir, 1);
        sink.events.lock().unwrap().clear();

        let mut tx = dir.transaction().unwrap();
        tx.add_remote_owned_device(owned, uid(2), None).unwrap();
        tx.rollback().unwrap();

        assert!(sink.names().is_empty());
        assert!(!dir.reader().owned_device_exists(owned, &uid(2)).unwrap());
    }
}
