//! Identity details: the owned identity's published details and a contact's
//! published and trusted details.
//!
//! Identity details are updated in place. The version only moves forward and
//! the serialized core and server key/label are replaced wholesale. Photos
//! are managed separately through the photo store.

use std::path::{Path, PathBuf};

use rusqlite::{params, OptionalExtension};

use crate::changes::{Attribute, Subject};
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    details_core_columns, invalid_column, ContactKey, DetailsInput, DetailsOwner, IdentityDetails,
    IdentityDetailsKey, IdentityDetailsKind, OwnedIdentityKey,
};
use crate::photos::ImportMode;
use crate::transaction::{DirectoryTx, PhotoSlot};

const COLUMNS: &str = "id, kind, owned_identity_id, contact_id, version, serialized_core_details, \
                       photo_filename, photo_server_key, photo_server_label";

impl Reader<'_> {
    pub fn identity_details(&self, key: IdentityDetailsKey) -> Result<Option<IdentityDetails>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM identity_details WHERE id = ?1"),
                params![key.0],
                row_to_identity_details,
            )
            .optional()?)
    }

    pub fn contact_details(
        &self,
        contact: ContactKey,
        kind: IdentityDetailsKind,
    ) -> Result<Option<IdentityDetails>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM identity_details WHERE contact_id = ?1 AND kind = ?2"),
                params![contact.0, kind.as_str()],
                row_to_identity_details,
            )
            .optional()?)
    }

    pub fn owned_published_details(
        &self,
        owned: OwnedIdentityKey,
    ) -> Result<Option<IdentityDetails>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM identity_details
                     WHERE owned_identity_id = ?1 AND kind = ?2"
                ),
                params![owned.0, IdentityDetailsKind::OwnedPublished.as_str()],
                row_to_identity_details,
            )
            .optional()?)
    }

    /// Absolute path of the photo attached to these details, if the file is
    /// still there.
    pub fn identity_photo_path(&self, key: IdentityDetailsKey) -> Result<Option<PathBuf>> {
        Ok(self
            .identity_details(key)?
            .and_then(|details| self.resolve_photo(details.core.photo_filename.as_deref())))
    }

    fn require_identity_details(&self, key: IdentityDetailsKey) -> Result<IdentityDetails> {
        self.identity_details(key)?
            .ok_or(DirectoryError::NotFound("identity details"))
    }

    fn identity_details_subject(&self, details: &IdentityDetails) -> Result<Subject> {
        let (owned, contact) = match details.owner {
            DetailsOwner::Owned(key) => {
                let owned = self.owned_identity(key)?.ok_or_else(|| {
                    DirectoryError::missing_context(format!("{} has no owner", details.key))
                })?;
                (owned.crypto_id, None)
            }
            DetailsOwner::Contact(key) => {
                let (owned, contact) = self.contact_context(key)?;
                (owned, Some(contact.crypto_id))
            }
        };
        Ok(Subject::IdentityDetails {
            owned,
            contact,
            kind: details.kind,
        })
    }
}

impl DirectoryTx<'_> {
    pub(crate) fn insert_identity_details(
        &mut self,
        kind: IdentityDetailsKind,
        owner: DetailsOwner,
        input: &DetailsInput,
    ) -> Result<IdentityDetailsKey> {
        let existing = match owner {
            DetailsOwner::Owned(key) => self.reader().owned_published_details(key)?,
            DetailsOwner::Contact(key) => self.reader().contact_details(key, kind)?,
        };
        if existing.is_some() {
            return Err(DirectoryError::duplicate("identity details", kind.as_str()));
        }

        let (owned_id, contact_id) = match owner {
            DetailsOwner::Owned(key) => (Some(key.0), None),
            DetailsOwner::Contact(key) => (None, Some(key.0)),
        };
        let server = input.photo_server.as_ref();
        self.conn().execute(
            "INSERT INTO identity_details
                (kind, owned_identity_id, contact_id, version, serialized_core_details,
                 photo_server_key, photo_server_label)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                kind.as_str(),
                owned_id,
                contact_id,
                input.version,
                input.serialized_core_details,
                server.map(|s| s.key.as_slice()),
                server.map(|s| s.label.as_bytes()),
            ],
        )?;
        let key = IdentityDetailsKey(self.conn().last_insert_rowid());

        let details = self.reader().require_identity_details(key)?;
        let subject = self.reader().identity_details_subject(&details)?;
        self.changes.inserted(key.into(), subject);
        Ok(key)
    }

    /// Replace the content of existing details. A lower version is rejected;
    /// identical content is a no-op. Different content under the same version
    /// overwrites the row: the version is the peer's, and a peer may resend
    /// corrected details without bumping it.
    pub(crate) fn update_identity_details(
        &mut self,
        key: IdentityDetailsKey,
        input: &DetailsInput,
    ) -> Result<()> {
        let details = self.reader().require_identity_details(key)?;
        let core = &details.core;
        if input.version < core.version {
            return Err(DirectoryError::InvalidDetailsVersion {
                current: core.version,
                proposed: input.version,
            });
        }
        if input.version == core.version
            && input.serialized_core_details == core.serialized_core_details
            && input.photo_server == core.photo_server
        {
            return Ok(());
        }

        let server = input.photo_server.as_ref();
        self.conn().execute(
            "UPDATE identity_details
             SET version = ?1, serialized_core_details = ?2,
                 photo_server_key = ?3, photo_server_label = ?4
             WHERE id = ?5",
            params![
                input.version,
                input.serialized_core_details,
                server.map(|s| s.key.as_slice()),
                server.map(|s| s.label.as_bytes()),
                key.0,
            ],
        )?;

        let subject = self.reader().identity_details_subject(&details)?;
        self.changes.updated(key.into(), subject, Attribute::CoreDetails);
        Ok(())
    }

    fn upsert_identity_details(
        &mut self,
        kind: IdentityDetailsKind,
        owner: DetailsOwner,
        input: &DetailsInput,
    ) -> Result<IdentityDetailsKey> {
        let existing = match owner {
            DetailsOwner::Owned(key) => self.reader().owned_published_details(key)?,
            DetailsOwner::Contact(key) => self.reader().contact_details(key, kind)?,
        };
        match existing {
            Some(details) => {
                self.update_identity_details(details.key, input)?;
                Ok(details.key)
            }
            None => self.insert_identity_details(kind, owner, input),
        }
    }

    /// Record what a contact published. Creates the published details the
    /// first time.
    pub fn update_contact_published_details(
        &mut self,
        contact: ContactKey,
        input: &DetailsInput,
    ) -> Result<IdentityDetailsKey> {
        self.reader().require_contact(contact)?;
        self.upsert_identity_details(
            IdentityDetailsKind::ContactPublished,
            DetailsOwner::Contact(contact),
            input,
        )
    }

    pub fn update_contact_trusted_details(
        &mut self,
        contact: ContactKey,
        input: &DetailsInput,
    ) -> Result<IdentityDetailsKey> {
        self.reader().require_contact(contact)?;
        self.upsert_identity_details(
            IdentityDetailsKind::ContactTrusted,
            DetailsOwner::Contact(contact),
            input,
        )
    }

    pub fn update_owned_published_details(
        &mut self,
        owned: OwnedIdentityKey,
        input: &DetailsInput,
    ) -> Result<IdentityDetailsKey> {
        self.reader().require_owned_identity(owned)?;
        self.upsert_identity_details(
            IdentityDetailsKind::OwnedPublished,
            DetailsOwner::Owned(owned),
            input,
        )
    }

    /// Accept what a contact published: its content and photo become the
    /// trusted details.
    pub fn trust_contact_published_details(&mut self, contact: ContactKey) -> Result<()> {
        let published = self
            .reader()
            .contact_details(contact, IdentityDetailsKind::ContactPublished)?
            .ok_or(DirectoryError::NotFound("published details"))?;

        let input = DetailsInput {
            version: published.core.version,
            serialized_core_details: published.core.serialized_core_details.clone(),
            photo_server: published.core.photo_server.clone(),
        };
        let trusted = self.update_contact_trusted_details(contact, &input)?;

        let photo = self.reader().identity_photo_path(published.key)?;
        self.set_identity_photo_path(trusted, photo.as_deref())
    }

    // ------------------------------------------------------------------
    // Photos
    // ------------------------------------------------------------------

    /// Store `data` as the photo of these details.
    pub fn set_identity_photo(&mut self, key: IdentityDetailsKey, data: &[u8]) -> Result<()> {
        let scratch = self.photos().write_scratch(data)?;
        let result = self.set_identity_photo_path(key, Some(&scratch));
        if let Err(e) = self.photos().remove(&scratch) {
            tracing::warn!(path = %scratch.display(), error = %e, "failed to remove scratch photo");
        }
        result
    }

    /// Point these details at the photo at `path`, or at none. Files inside
    /// the managed directory are hard-linked, external files are moved in.
    /// The move happens immediately; [`DirectoryTx::rollback`] moves the file
    /// back, a dropped transaction does not.
    pub fn set_identity_photo_path(
        &mut self,
        key: IdentityDetailsKey,
        path: Option<&Path>,
    ) -> Result<()> {
        let details = self.reader().require_identity_details(key)?;
        let changed = self.replace_photo(
            PhotoSlot::Identity(key),
            details.core.photo_filename.as_deref(),
            path,
            ImportMode::LinkOrMove,
        )?;
        if changed {
            let subject = self.reader().identity_details_subject(&details)?;
            self.changes.updated(key.into(), subject, Attribute::Photo);
        }
        Ok(())
    }

    pub fn clear_identity_photo(&mut self, key: IdentityDetailsKey) -> Result<()> {
        self.set_identity_photo_path(key, None)
    }

    pub(crate) fn delete_identity_details(&mut self, key: IdentityDetailsKey) -> Result<()> {
        let details = self.reader().require_identity_details(key)?;
        let subject = self.reader().identity_details_subject(&details)?;

        self.schedule_photo_removal(details.core.photo_filename.as_deref());
        self.conn()
            .execute("DELETE FROM identity_details WHERE id = ?1", params![key.0])?;
        self.changes.deleted(key.into(), subject);
        Ok(())
    }
}

fn row_to_identity_details(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityDetails> {
    let raw_kind: String = row.get(1)?;
    let kind = IdentityDetailsKind::parse(&raw_kind)
        .ok_or_else(|| invalid_column(1, format!("unknown identity details kind {raw_kind}")))?;

    let owned: Option<i64> = row.get(2)?;
    let contact: Option<i64> = row.get(3)?;
    let owner = match (kind, owned, contact) {
        (IdentityDetailsKind::OwnedPublished, Some(owned), None) => {
            DetailsOwner::Owned(OwnedIdentityKey(owned))
        }
        (
            IdentityDetailsKind::ContactPublished | IdentityDetailsKind::ContactTrusted,
            None,
            Some(contact),
        ) => DetailsOwner::Contact(ContactKey(contact)),
        _ => return Err(invalid_column(2, "identity details owner does not match kind")),
    };

    Ok(IdentityDetails {
        key: IdentityDetailsKey(row.get(0)?),
        kind,
        owner,
        core: details_core_columns(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::error::DirectoryError;
    use crate::events::{
        EVENT_OWNED_IDENTITY_PHOTO_UPDATED, EVENT_PUBLISHED_CONTACT_PHOTO_UPDATED,
        EVENT_TRUSTED_CONTACT_PHOTO_UPDATED,
    };
    use crate::models::IdentityDetailsKind;
    use crate::test_support::*;

    #[test]
    fn published_details_are_created_on_first_update() {
        let (mut dir, _tmp) = test_directory();
        let (_, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        let first = tx
            .update_contact_published_details(contact, &details(1, "bob v1"))
            .unwrap();
        let second = tx
            .update_contact_published_details(contact, &details(2, "bob v2"))
            .unwrap();
        tx.commit().unwrap();

        assert_eq!(first, second);
        let stored = dir.reader().identity_details(first).unwrap().unwrap();
        assert_eq!(stored.core.version, 2);
        assert_eq!(stored.core.serialized_core_details, "bob v2");
    }

    #[test]
    fn details_versions_never_decrease() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);

        let mut tx = dir.transaction().unwrap();
        tx.update_owned_published_details(owned, &details(3, "v3")).unwrap();
        let err = tx
            .update_owned_published_details(owned, &details(2, "v2"))
            .unwrap_err();
        assert!(matches!(
            err,
            DirectoryError::InvalidDetailsVersion {
                current: 3,
                proposed: 2
            }
        ));
    }

    #[test]
    fn same_version_with_new_content_overwrites() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);

        let mut tx = dir.transaction().unwrap();
        tx.update_owned_published_details(owned, &details(2, "draft")).unwrap();
        tx.update_owned_published_details(owned, &details(2, "final")).unwrap();
        tx.commit().unwrap();

        let stored = dir.reader().owned_published_details(owned).unwrap().unwrap();
        assert_eq!(stored.core.version, 2);
        assert_eq!(stored.core.serialized_core_details, "final");
    }

    #[test]
    fn replacing_a_photo_removes_the_old_file_after_commit() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let key = dir.reader().owned_published_details(owned).unwrap().unwrap().key;

        let mut tx = dir.transaction().unwrap();
        tx.set_identity_photo(key, b"first").unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![EVENT_OWNED_IDENTITY_PHOTO_UPDATED, BACKUPABLE]);
        let first = dir.reader().identity_photo_path(key).unwrap().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.set_identity_photo(key, b"second").unwrap();
        assert!(first.exists(), "old photo must survive until commit");
        tx.commit().unwrap();

        assert!(!first.exists());
        let second = dir.reader().identity_photo_path(key).unwrap().unwrap();
        assert_eq!(std::fs::read(second).unwrap(), b"second");
        // Only the referenced file remains in the managed directory.
        assert_eq!(dir.photos().list_files().unwrap().len(), 1);
    }

    #[test]
    fn identical_photo_is_a_no_op() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let key = dir.reader().owned_published_details(owned).unwrap().unwrap().key;

        let mut tx = dir.transaction().unwrap();
        tx.set_identity_photo(key, b"same").unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.set_identity_photo(key, b"same").unwrap();
        assert!(tx.commit().unwrap().events.is_empty());
    }

    #[test]
    fn rollback_keeps_the_old_photo() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let key = dir.reader().owned_published_details(owned).unwrap().unwrap().key;

        let mut tx = dir.transaction().unwrap();
        tx.set_identity_photo(key, b"kept").unwrap();
        tx.commit().unwrap();
        let kept = dir.reader().identity_photo_path(key).unwrap().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.clear_identity_photo(key).unwrap();
        drop(tx);

        assert!(kept.exists());
        assert_eq!(dir.reader().identity_photo_path(key).unwrap(), Some(kept));
    }

    #[test]
    fn external_photo_is_moved_into_the_store() {
        let (mut dir, tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let key = dir.reader().owned_published_details(owned).unwrap().unwrap().key;
        let external = tmp.path().join("outside.jpg");
        std::fs::write(&external, b"jpeg").unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.set_identity_photo_path(key, Some(&external)).unwrap();
        tx.commit().unwrap();

        assert!(!external.exists());
        let stored = dir.reader().identity_photo_path(key).unwrap().unwrap();
        assert!(dir.photos().is_managed(&stored));
    }

    #[test]
    fn rollback_returns_a_moved_photo_to_its_origin() {
        let (mut dir, tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let key = dir.reader().owned_published_details(owned).unwrap().unwrap().key;
        let external = tmp.path().join("outside.jpg");
        std::fs::write(&external, b"jpeg").unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.set_identity_photo_path(key, Some(&external)).unwrap();
        assert!(!external.exists());
        tx.rollback().unwrap();

        assert_eq!(std::fs::read(&external).unwrap(), b"jpeg");
        assert!(dir.photos().list_files().unwrap().is_empty());
        assert_eq!(dir.reader().identity_photo_path(key).unwrap(), None);
    }

    #[test]
    fn rollback_removes_stored_photo_data() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let key = dir.reader().owned_published_details(owned).unwrap().unwrap().key;

        let mut tx = dir.transaction().unwrap();
        tx.set_identity_photo(key, b"discarded").unwrap();
        tx.rollback().unwrap();

        assert!(dir.photos().list_files().unwrap().is_empty());
    }

    #[test]
    fn photo_missing_at_commit_is_treated_as_no_photo() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let key = dir.reader().owned_published_details(owned).unwrap().unwrap().key;

        let mut tx = dir.transaction().unwrap();
        tx.set_identity_photo(key, b"vanishing").unwrap();
        let stored = tx.reader().identity_photo_path(key).unwrap().unwrap();
        std::fs::remove_file(&stored).unwrap();
        tx.commit().unwrap();

        let details = dir.reader().identity_details(key).unwrap().unwrap();
        assert_eq!(details.core.photo_filename, None);
        assert_eq!(dir.reader().identity_photo_path(key).unwrap(), None);
    }

    #[test]
    fn trusting_published_details_copies_content_and_photo() {
        let (mut dir, _tmp) = test_directory();
        let (_, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        let published = tx
            .update_contact_published_details(contact, &details(4, "bob v4"))
            .unwrap();
        tx.set_identity_photo(published, b"bob").unwrap();
        let report = tx.commit().unwrap();
        assert!(event_names(&report).contains(&EVENT_PUBLISHED_CONTACT_PHOTO_UPDATED));

        let mut tx = dir.transaction().unwrap();
        tx.trust_contact_published_details(contact).unwrap();
        let report = tx.commit().unwrap();
        assert!(event_names(&report).contains(&EVENT_TRUSTED_CONTACT_PHOTO_UPDATED));

        let reader = dir.reader();
        let trusted = reader
            .contact_details(contact, IdentityDetailsKind::ContactTrusted)
            .unwrap()
            .unwrap();
        assert_eq!(trusted.core.version, 4);
        let trusted_photo = reader.identity_photo_path(trusted.key).unwrap().unwrap();
        let published_photo = reader.identity_photo_path(published).unwrap().unwrap();
        assert_ne!(trusted_photo, published_photo);
        assert_eq!(std::fs::read(trusted_photo).unwrap(), b"bob");
    }
}
