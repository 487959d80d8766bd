//! Contact identities known to an owned identity.

use rusqlite::{params, OptionalExtension};
use sigil_shared::CryptoId;

use crate::changes::{Attribute, Subject};
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    crypto_id_column, invalid_column, Contact, ContactKey, DetailsInput, DetailsOwner,
    IdentityDetailsKind, OwnedIdentityKey,
};
use crate::transaction::DirectoryTx;

const COLUMNS: &str = "id, crypto_identity, owned_identity_id, trust_level, is_revoked, \
                       is_forcefully_trusted, is_one_to_one";

impl Reader<'_> {
    pub fn contact(&self, key: ContactKey) -> Result<Option<Contact>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM contact_identities WHERE id = ?1"),
                params![key.0],
                row_to_contact,
            )
            .optional()?)
    }

    pub fn contact_by_crypto_id(
        &self,
        owner: OwnedIdentityKey,
        crypto_id: &CryptoId,
    ) -> Result<Option<Contact>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM contact_identities
                     WHERE crypto_identity = ?1 AND owned_identity_id = ?2"
                ),
                params![crypto_id.as_bytes(), owner.0],
                row_to_contact,
            )
            .optional()?)
    }

    pub fn contact_exists(&self, owner: OwnedIdentityKey, crypto_id: &CryptoId) -> Result<bool> {
        Ok(self.contact_by_crypto_id(owner, crypto_id)?.is_some())
    }

    /// Contacts of `owner`, ordered by crypto identity.
    pub fn contacts(&self, owner: OwnedIdentityKey) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM contact_identities
             WHERE owned_identity_id = ?1
             ORDER BY crypto_identity ASC"
        ))?;
        let rows = stmt.query_map(params![owner.0], row_to_contact)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub(crate) fn require_contact(&self, key: ContactKey) -> Result<Contact> {
        self.contact(key)?.ok_or(DirectoryError::NotFound("contact"))
    }

    /// Crypto identities of a contact and of the identity owning it.
    pub(crate) fn contact_context(&self, key: ContactKey) -> Result<(CryptoId, Contact)> {
        let contact = self.require_contact(key)?;
        let owned = self
            .owned_identity(contact.owner)?
            .ok_or_else(|| DirectoryError::missing_context(format!("{key} has no owner")))?;
        Ok((owned.crypto_id, contact))
    }
}

impl DirectoryTx<'_> {
    /// Add a contact with its trusted details. Published details are created
    /// later, when the contact first publishes them.
    pub fn add_contact(
        &mut self,
        owner: OwnedIdentityKey,
        crypto_id: &CryptoId,
        trusted_details: &DetailsInput,
        trust_level: &str,
    ) -> Result<ContactKey> {
        let owned = self.reader().require_owned_identity(owner)?;
        if self.reader().contact_exists(owner, crypto_id)? {
            return Err(DirectoryError::duplicate("contact", crypto_id.short()));
        }

        self.conn().execute(
            "INSERT INTO contact_identities (crypto_identity, owned_identity_id, trust_level)
             VALUES (?1, ?2, ?3)",
            params![crypto_id.as_bytes(), owner.0, trust_level],
        )?;
        let key = ContactKey(self.conn().last_insert_rowid());
        self.changes.inserted(
            key.into(),
            Subject::Contact {
                owned: owned.crypto_id.clone(),
                contact: crypto_id.clone(),
            },
        );

        self.insert_identity_details(
            IdentityDetailsKind::ContactTrusted,
            DetailsOwner::Contact(key),
            trusted_details,
        )?;

        tracing::info!(
            owned = %owned.crypto_id.short(),
            contact = %crypto_id.short(),
            "contact added"
        );
        Ok(key)
    }

    pub fn set_contact_trust_level(&mut self, key: ContactKey, trust_level: &str) -> Result<()> {
        let (owned, contact) = self.reader().contact_context(key)?;
        if contact.trust_level == trust_level {
            return Ok(());
        }
        self.conn().execute(
            "UPDATE contact_identities SET trust_level = ?1 WHERE id = ?2",
            params![trust_level, key.0],
        )?;
        self.note_contact_change(owned, contact, Attribute::TrustState);
        Ok(())
    }

    pub fn set_contact_one_to_one(&mut self, key: ContactKey, one_to_one: bool) -> Result<()> {
        let (owned, contact) = self.reader().contact_context(key)?;
        if contact.is_one_to_one == Some(one_to_one) {
            return Ok(());
        }
        self.conn().execute(
            "UPDATE contact_identities SET is_one_to_one = ?1 WHERE id = ?2",
            params![one_to_one, key.0],
        )?;
        self.note_contact_change(owned, contact, Attribute::TrustState);
        Ok(())
    }

    pub fn set_contact_revoked(
        &mut self,
        key: ContactKey,
        revoked: bool,
        forcefully_trusted: bool,
    ) -> Result<()> {
        let (owned, contact) = self.reader().contact_context(key)?;
        if contact.is_revoked == revoked && contact.is_forcefully_trusted == forcefully_trusted {
            return Ok(());
        }
        self.conn().execute(
            "UPDATE contact_identities SET is_revoked = ?1, is_forcefully_trusted = ?2 WHERE id = ?3",
            params![revoked, forcefully_trusted, key.0],
        )?;
        self.note_contact_change(owned, contact, Attribute::TrustState);
        Ok(())
    }

    /// Delete a contact, the groups it owns, its devices and its details.
    pub fn delete_contact(&mut self, key: ContactKey) -> Result<()> {
        let (owned, contact) = self.reader().contact_context(key)?;

        for group in self.reader().groups_owned_by_contact(key)? {
            self.delete_group(group.key)?;
        }
        for device in self.reader().contact_devices(key)? {
            self.delete_contact_device(device.key)?;
        }
        for kind in [
            IdentityDetailsKind::ContactPublished,
            IdentityDetailsKind::ContactTrusted,
        ] {
            if let Some(details) = self.reader().contact_details(key, kind)? {
                self.delete_identity_details(details.key)?;
            }
        }
        self.conn()
            .execute("DELETE FROM group_members WHERE contact_id = ?1", params![key.0])?;

        self.conn()
            .execute("DELETE FROM contact_identities WHERE id = ?1", params![key.0])?;
        self.changes.deleted(
            key.into(),
            Subject::Contact {
                owned,
                contact: contact.crypto_id.clone(),
            },
        );

        tracing::info!(contact = %contact.crypto_id.short(), "contact deleted");
        Ok(())
    }

    fn note_contact_change(&mut self, owned: CryptoId, contact: Contact, attribute: Attribute) {
        self.changes.updated(
            contact.key.into(),
            Subject::Contact {
                owned,
                contact: contact.crypto_id,
            },
            attribute,
        );
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    let owner: Option<i64> = row.get(2)?;
    Ok(Contact {
        key: ContactKey(row.get(0)?),
        crypto_id: crypto_id_column(1, row.get(1)?)?,
        owner: OwnedIdentityKey(owner.ok_or_else(|| invalid_column(2, "contact has no owner"))?),
        trust_level: row.get(3)?,
        is_revoked: row.get(4)?,
        is_forcefully_trusted: row.get(5)?,
        is_one_to_one: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::error::DirectoryError;
    use crate::models::IdentityDetailsKind;
    use crate::test_support::*;

    #[test]
    fn contact_is_unique_per_owner() {
        let (mut dir, _tmp) = test_directory();
        let alice = create_owned(&mut dir, 1);
        let bob = create_owned(&mut dir, 2);
        let carol = crypto_id(3);

        let mut tx = dir.transaction().unwrap();
        tx.add_contact(alice, &carol, &details(0, "carol"), "direct").unwrap();
        tx.add_contact(bob, &carol, &details(0, "carol"), "direct").unwrap();
        let err = tx
            .add_contact(alice, &carol, &details(0, "carol"), "direct")
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateEntity { .. }));
        tx.commit().unwrap();

        assert_eq!(dir.reader().contacts(alice).unwrap().len(), 1);
        assert_eq!(dir.reader().contacts(bob).unwrap().len(), 1);
    }

    #[test]
    fn new_contact_has_trusted_details_only() {
        let (mut dir, _tmp) = test_directory();
        let (_, contact) = owned_with_contact(&mut dir);

        let reader = dir.reader();
        assert!(reader
            .contact_details(contact, IdentityDetailsKind::ContactTrusted)
            .unwrap()
            .is_some());
        assert!(reader
            .contact_details(contact, IdentityDetailsKind::ContactPublished)
            .unwrap()
            .is_none());
    }

    #[test]
    fn revocation_flags_are_persisted() {
        let (mut dir, _tmp) = test_directory();
        let (_, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        tx.set_contact_revoked(contact, true, false).unwrap();
        tx.set_contact_one_to_one(contact, true).unwrap();
        tx.commit().unwrap();

        let stored = dir.reader().contact(contact).unwrap().unwrap();
        assert!(stored.is_revoked);
        assert_eq!(stored.is_one_to_one, Some(true));
    }
}
