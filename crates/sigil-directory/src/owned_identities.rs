//! Operations on [`OwnedIdentity`] records.

use rusqlite::{params, OptionalExtension};
use sigil_shared::{CryptoId, Uid};

use crate::changes::{Attribute, Subject};
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    crypto_id_column, DetailsInput, DetailsOwner, DeviceRole, IdentityDetailsKind, OwnedIdentity,
    OwnedIdentityKey,
};
use crate::transaction::DirectoryTx;

const COLUMNS: &str = "id, crypto_identity, is_active";

impl Reader<'_> {
    pub fn owned_identity(&self, key: OwnedIdentityKey) -> Result<Option<OwnedIdentity>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM owned_identities WHERE id = ?1"),
                params![key.0],
                row_to_owned_identity,
            )
            .optional()?)
    }

    pub fn owned_identity_by_crypto_id(&self, crypto_id: &CryptoId) -> Result<Option<OwnedIdentity>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM owned_identities WHERE crypto_identity = ?1"),
                params![crypto_id.as_bytes()],
                row_to_owned_identity,
            )
            .optional()?)
    }

    /// All owned identities, ordered by crypto identity.
    pub fn owned_identities(&self) -> Result<Vec<OwnedIdentity>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM owned_identities ORDER BY crypto_identity ASC"
        ))?;

        let rows = stmt.query_map([], row_to_owned_identity)?;

        let mut identities = Vec::new();
        for row in rows {
            identities.push(row?);
        }
        Ok(identities)
    }

    pub(crate) fn require_owned_identity(&self, key: OwnedIdentityKey) -> Result<OwnedIdentity> {
        self.owned_identity(key)?
            .ok_or(DirectoryError::NotFound("owned identity"))
    }
}

impl DirectoryTx<'_> {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create an owned identity together with its current device and its
    /// published details.
    pub fn create_owned_identity(
        &mut self,
        crypto_id: &CryptoId,
        current_device_uid: Uid,
        device_name: Option<&str>,
        published_details: &DetailsInput,
    ) -> Result<OwnedIdentityKey> {
        if self.reader().owned_identity_by_crypto_id(crypto_id)?.is_some() {
            return Err(DirectoryError::duplicate("owned identity", crypto_id.short()));
        }

        self.conn().execute(
            "INSERT INTO owned_identities (crypto_identity, is_active) VALUES (?1, 1)",
            params![crypto_id.as_bytes()],
        )?;
        let key = OwnedIdentityKey(self.conn().last_insert_rowid());
        self.changes.inserted(
            key.into(),
            Subject::OwnedIdentity {
                owned: crypto_id.clone(),
            },
        );

        self.insert_owned_device(key, current_device_uid, DeviceRole::Current, device_name)?;
        self.insert_identity_details(
            IdentityDetailsKind::OwnedPublished,
            DetailsOwner::Owned(key),
            published_details,
        )?;

        tracing::info!(owned = %crypto_id.short(), "owned identity created");
        Ok(key)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn set_owned_identity_active(&mut self, key: OwnedIdentityKey, active: bool) -> Result<()> {
        let owned = self.reader().require_owned_identity(key)?;
        if owned.is_active == active {
            return Ok(());
        }

        self.conn().execute(
            "UPDATE owned_identities SET is_active = ?1 WHERE id = ?2",
            params![active, key.0],
        )?;
        self.changes.updated(
            key.into(),
            Subject::OwnedIdentity {
                owned: owned.crypto_id,
            },
            Attribute::Active,
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete an owned identity and everything it owns. Each cascaded entity
    /// goes through its own deletion so that its events are emitted.
    pub fn delete_owned_identity(&mut self, key: OwnedIdentityKey) -> Result<()> {
        let owned = self.reader().require_owned_identity(key)?;

        for group in self.reader().groups(key)? {
            self.delete_group(group.key)?;
        }
        for contact in self.reader().contacts(key)? {
            self.delete_contact(contact.key)?;
        }
        for device in self.reader().owned_devices(key)? {
            self.remove_owned_device(&device, &owned.crypto_id)?;
        }
        if let Some(details) = self.reader().owned_published_details(key)? {
            self.delete_identity_details(details.key)?;
        }
        for data in self.reader().server_user_data_for(&owned.crypto_id)? {
            self.delete_server_user_data(data.key)?;
        }

        self.conn()
            .execute("DELETE FROM owned_identities WHERE id = ?1", params![key.0])?;
        self.changes.deleted(
            key.into(),
            Subject::OwnedIdentity {
                owned: owned.crypto_id.clone(),
            },
        );

        tracing::info!(owned = %owned.crypto_id.short(), "owned identity deleted");
        Ok(())
    }
}

fn row_to_owned_identity(row: &rusqlite::Row<'_>) -> rusqlite::Result<OwnedIdentity> {
    Ok(OwnedIdentity {
        key: OwnedIdentityKey(row.get(0)?),
        crypto_id: crypto_id_column(1, row.get(1)?)?,
        is_active: row.get(2)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::error::DirectoryError;
    use crate::test_support::*;

    #[test]
    fn create_and_fetch_owned_identity() {
        let (mut dir, _tmp) = test_directory();
        let alice = crypto_id(1);

        let mut tx = dir.transaction().unwrap();
        let key = tx
            .create_owned_identity(&alice, uid(1), Some("laptop"), &details(0, "alice"))
            .unwrap();
        tx.commit().unwrap();

        let reader = dir.reader();
        let owned = reader.owned_identity(key).unwrap().unwrap();
        assert_eq!(owned.crypto_id, alice);
        assert!(owned.is_active);

        let current = reader.current_device(key).unwrap().unwrap();
        assert_eq!(current.uid, uid(1));
        assert_eq!(current.name.as_deref(), Some("laptop"));
        assert!(reader.owned_published_details(key).unwrap().is_some());
    }

    #[test]
    fn duplicate_owned_identity_is_rejected() {
        let (mut dir, _tmp) = test_directory();
        let mut tx = dir.transaction().unwrap();
        tx.create_owned_identity(&crypto_id(1), uid(1), None, &details(0, "a"))
            .unwrap();

        let err = tx
            .create_owned_identity(&crypto_id(1), uid(2), None, &details(0, "a"))
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateEntity { .. }));
    }

    #[test]
    fn deleting_owned_identity_cascades() {
        let (mut dir, _tmp) = test_directory();
        let (owned, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        tx.add_contact_device(contact, uid(9), false).unwrap();
        tx.delete_owned_identity(owned).unwrap();
        let report = tx.commit().unwrap();

        let reader = dir.reader();
        assert!(reader.owned_identity(owned).unwrap().is_none());
        assert!(reader.contact(contact).unwrap().is_none());
        // The device was created and deleted in the same transaction.
        assert!(!report
            .events
            .iter()
            .any(|e| e.name() == crate::events::EVENT_NEW_CONTACT_DEVICE));
    }

    #[test]
    fn setting_active_flag_is_idempotent() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);

        let mut tx = dir.transaction().unwrap();
        tx.set_owned_identity_active(owned, true).unwrap();
        assert!(tx.commit().unwrap().events.is_empty());

        let mut tx = dir.transaction().unwrap();
        tx.set_owned_identity_active(owned, false).unwrap();
        tx.commit().unwrap();
        assert!(!dir.reader().owned_identity(owned).unwrap().unwrap().is_active);
    }
}
