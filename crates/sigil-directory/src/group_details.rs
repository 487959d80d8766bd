//! Group details rows.
//!
//! Unlike identity details, group details are never edited in place: a new
//! version is a new row that supersedes the old one, which is then deleted.
//! Photos are always hard-linked so that copies of the same details share
//! storage while remaining independently removable.

use std::path::{Path, PathBuf};

use rusqlite::{params, OptionalExtension};

use crate::changes::Attribute;
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    details_core_columns, invalid_column, DetailsInput, GroupDetails, GroupDetailsKey,
    GroupDetailsKind,
};
use crate::photos::{self, ImportMode};
use crate::transaction::{DirectoryTx, PhotoSlot};

const COLUMNS: &str = "id, kind, version, serialized_core_details, photo_filename, \
                       photo_server_key, photo_server_label";

impl Reader<'_> {
    pub fn group_details(&self, key: GroupDetailsKey) -> Result<Option<GroupDetails>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM group_details WHERE id = ?1"),
                params![key.0],
                row_to_group_details,
            )
            .optional()?)
    }

    pub(crate) fn require_group_details(&self, key: GroupDetailsKey) -> Result<GroupDetails> {
        self.group_details(key)?
            .ok_or(DirectoryError::NotFound("group details"))
    }

    pub fn group_photo_path(&self, key: GroupDetailsKey) -> Result<Option<PathBuf>> {
        Ok(self
            .group_details(key)?
            .and_then(|details| self.resolve_photo(details.core.photo_filename.as_deref())))
    }

    /// Whether two details rows point at photos with different content.
    pub(crate) fn group_photos_differ(&self, a: &GroupDetails, b: &GroupDetails) -> bool {
        let a = self.resolve_photo(a.core.photo_filename.as_deref());
        let b = self.resolve_photo(b.core.photo_filename.as_deref());
        match (a, b) {
            (None, None) => false,
            (Some(a), Some(b)) => !photos::contents_equal(&a, &b),
            _ => true,
        }
    }
}

impl DirectoryTx<'_> {
    /// Insert a details row, hard-linking `photo` into the store. The row is
    /// not attached to any group yet.
    pub(crate) fn insert_group_details(
        &mut self,
        kind: GroupDetailsKind,
        input: &DetailsInput,
        photo: Option<&Path>,
    ) -> Result<GroupDetailsKey> {
        let server = input.photo_server.as_ref();
        self.conn().execute(
            "INSERT INTO group_details
                (kind, version, serialized_core_details, photo_server_key, photo_server_label)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kind.as_str(),
                input.version,
                input.serialized_core_details,
                server.map(|s| s.key.as_slice()),
                server.map(|s| s.label.as_bytes()),
            ],
        )?;
        let key = GroupDetailsKey(self.conn().last_insert_rowid());

        if let Some(photo) = photo {
            self.attach_new_photo(PhotoSlot::Group(key), photo)?;
        }
        Ok(key)
    }

    /// Copy a details row under another kind. The photo is hard-linked; a
    /// missing source file leaves the copy without a photo.
    pub(crate) fn duplicate_group_details(
        &mut self,
        source: GroupDetailsKey,
        kind: GroupDetailsKind,
    ) -> Result<GroupDetailsKey> {
        let details = self.reader().require_group_details(source)?;
        let photo = self
            .reader()
            .resolve_photo(details.core.photo_filename.as_deref());
        if details.core.photo_filename.is_some() && photo.is_none() {
            tracing::warn!(details = %source, "duplicating group details without their missing photo");
        }

        let input = DetailsInput {
            version: details.core.version,
            serialized_core_details: details.core.serialized_core_details,
            photo_server: details.core.photo_server,
        };
        self.insert_group_details(kind, &input, photo.as_deref())
    }

    /// Store `data` as the photo of these details.
    pub fn set_group_photo(&mut self, key: GroupDetailsKey, data: &[u8]) -> Result<()> {
        let scratch = self.photos().write_scratch(data)?;
        let result = self.set_group_photo_path(key, Some(&scratch));
        if let Err(e) = self.photos().remove(&scratch) {
            tracing::warn!(path = %scratch.display(), error = %e, "failed to remove scratch photo");
        }
        result
    }

    /// Point these details at the photo at `path`, or at none. The file is
    /// always hard-linked, so the caller's copy stays in place.
    pub fn set_group_photo_path(&mut self, key: GroupDetailsKey, path: Option<&Path>) -> Result<()> {
        let details = self.reader().require_group_details(key)?;
        let changed = self.replace_photo(
            PhotoSlot::Group(key),
            details.core.photo_filename.as_deref(),
            path,
            ImportMode::Link,
        )?;
        if changed {
            self.note_group_photo_change(&details)?;
        }
        Ok(())
    }

    pub fn clear_group_photo(&mut self, key: GroupDetailsKey) -> Result<()> {
        self.set_group_photo_path(key, None)
    }

    pub(crate) fn note_group_photo_change(&mut self, details: &GroupDetails) -> Result<()> {
        let group = self.reader().group_of_details(details.key)?.ok_or_else(|| {
            DirectoryError::missing_context(format!("{} is not attached to a group", details.key))
        })?;
        let (owned, group_owner) = self.reader().group_context(&group)?;
        self.changes.updated(
            details.key.into(),
            crate::changes::Subject::GroupDetails {
                owned,
                group_uid: group.group_uid,
                group_owner,
                kind: details.kind,
            },
            Attribute::Photo,
        );
        Ok(())
    }

    pub(crate) fn delete_group_details(&mut self, key: GroupDetailsKey) -> Result<()> {
        let details = self.reader().require_group_details(key)?;
        self.schedule_photo_removal(details.core.photo_filename.as_deref());
        self.conn()
            .execute("DELETE FROM group_details WHERE id = ?1", params![key.0])?;
        Ok(())
    }
}

fn row_to_group_details(row: &rusqlite::Row<'_>) -> rusqlite::Result<GroupDetails> {
    let raw_kind: String = row.get(1)?;
    let kind = GroupDetailsKind::parse(&raw_kind)
        .ok_or_else(|| invalid_column(1, format!("unknown group details kind {raw_kind}")))?;

    Ok(GroupDetails {
        key: GroupDetailsKey(row.get(0)?),
        kind,
        core: details_core_columns(row, 2)?,
    })
}
