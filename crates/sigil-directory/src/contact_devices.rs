//! Devices of contacts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use sigil_shared::capabilities::{join_capabilities, parse_capabilities};
use sigil_shared::{Capability, Uid};

use crate::changes::{Attribute, AttributeValue, Subject};
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    invalid_column, timestamp_column, uid_column, ContactDevice, ContactDeviceKey, ContactKey,
};
use crate::transaction::DirectoryTx;

const COLUMNS: &str = "id, uid, contact_id, capabilities, latest_channel_creation_ping";

impl Reader<'_> {
    pub fn contact_device(&self, key: ContactDeviceKey) -> Result<Option<ContactDevice>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM contact_devices WHERE id = ?1"),
                params![key.0],
                row_to_contact_device,
            )
            .optional()?)
    }

    pub fn contact_device_by_uid(
        &self,
        contact: ContactKey,
        uid: &Uid,
    ) -> Result<Option<ContactDevice>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM contact_devices WHERE uid = ?1 AND contact_id = ?2"),
                params![uid.as_bytes(), contact.0],
                row_to_contact_device,
            )
            .optional()?)
    }

    pub fn contact_device_exists(&self, contact: ContactKey, uid: &Uid) -> Result<bool> {
        Ok(self.contact_device_by_uid(contact, uid)?.is_some())
    }

    pub fn contact_devices(&self, contact: ContactKey) -> Result<Vec<ContactDevice>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM contact_devices WHERE contact_id = ?1 ORDER BY uid ASC"
        ))?;
        let rows = stmt.query_map(params![contact.0], row_to_contact_device)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn require_contact_device(&self, key: ContactDeviceKey) -> Result<ContactDevice> {
        self.contact_device(key)?
            .ok_or(DirectoryError::NotFound("contact device"))
    }
}

impl DirectoryTx<'_> {
    /// Add a device to a contact. Adding a uid the contact already has
    /// fails and leaves the store untouched.
    pub fn add_contact_device(
        &mut self,
        contact: ContactKey,
        uid: Uid,
        created_during_channel_creation: bool,
    ) -> Result<ContactDeviceKey> {
        let (owned, contact_row) = self.reader().contact_context(contact)?;
        if self.reader().contact_device_exists(contact, &uid)? {
            return Err(DirectoryError::duplicate("contact device", uid.short()));
        }

        self.conn().execute(
            "INSERT INTO contact_devices (uid, contact_id) VALUES (?1, ?2)",
            params![uid.as_bytes(), contact.0],
        )?;
        let key = ContactDeviceKey(self.conn().last_insert_rowid());

        self.changes.inserted(
            key.into(),
            Subject::ContactDevice {
                owned,
                contact: contact_row.crypto_id,
                uid,
                created_during_channel_creation,
            },
        );
        tracing::debug!(device = %uid.short(), "contact device added");
        Ok(key)
    }

    pub fn set_contact_device_capabilities(
        &mut self,
        key: ContactDeviceKey,
        capabilities: &BTreeSet<Capability>,
    ) -> Result<()> {
        let device = self.reader().require_contact_device(key)?;
        if device.capabilities.as_ref() == Some(capabilities) {
            return Ok(());
        }

        self.conn().execute(
            "UPDATE contact_devices SET capabilities = ?1 WHERE id = ?2",
            params![join_capabilities(capabilities), key.0],
        )?;
        let subject = self.contact_device_subject(&device)?;
        self.changes.updated_from(
            key.into(),
            subject,
            Attribute::Capabilities,
            AttributeValue::Capabilities(device.capabilities),
            AttributeValue::Capabilities(Some(capabilities.clone())),
        );
        Ok(())
    }

    pub fn set_contact_device_ping(
        &mut self,
        key: ContactDeviceKey,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let device = self.reader().require_contact_device(key)?;
        self.conn().execute(
            "UPDATE contact_devices SET latest_channel_creation_ping = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), key.0],
        )?;
        self.note_contact_device_change(&device, Attribute::ChannelPing)
    }

    pub fn delete_contact_device(&mut self, key: ContactDeviceKey) -> Result<()> {
        let device = self.reader().require_contact_device(key)?;
        let (owned, contact) = self.reader().contact_context(device.contact)?;

        self.conn()
            .execute("DELETE FROM contact_devices WHERE id = ?1", params![key.0])?;
        self.changes.deleted(
            key.into(),
            Subject::ContactDevice {
                owned,
                contact: contact.crypto_id,
                uid: device.uid,
                created_during_channel_creation: false,
            },
        );
        Ok(())
    }

    fn note_contact_device_change(
        &mut self,
        device: &ContactDevice,
        attribute: Attribute,
    ) -> Result<()> {
        let subject = self.contact_device_subject(device)?;
        self.changes.updated(device.key.into(), subject, attribute);
        Ok(())
    }

    fn contact_device_subject(&self, device: &ContactDevice) -> Result<Subject> {
        let (owned, contact) = self.reader().contact_context(device.contact)?;
        Ok(Subject::ContactDevice {
            owned,
            contact: contact.crypto_id,
            uid: device.uid,
            created_during_channel_creation: false,
        })
    }
}

fn row_to_contact_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactDevice> {
    let contact: Option<i64> = row.get(2)?;
    Ok(ContactDevice {
        key: ContactDeviceKey(row.get(0)?),
        uid: uid_column(1, row.get(1)?)?,
        contact: ContactKey(contact.ok_or_else(|| invalid_column(2, "device has no contact"))?),
        capabilities: row
            .get::<_, Option<String>>(3)?
            .map(|raw| parse_capabilities(&raw)),
        latest_channel_creation_ping: timestamp_column(4, row.get(4)?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use sigil_shared::Capability;

    use crate::error::DirectoryError;
    use crate::events::{
        IdentityEvent, EVENT_CONTACT_CAPABILITIES_UPDATED, EVENT_DELETED_CONTACT_DEVICE,
    };
    use crate::test_support::*;

    #[test]
    fn duplicate_device_leaves_store_unchanged() {
        let (mut dir, _tmp) = test_directory();
        let (owned, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        assert!(!tx.reader().contact_device_exists(contact, &uid(1)).unwrap());
        tx.add_contact_device(contact, uid(1), true).unwrap();
        assert!(tx.reader().contact_device_exists(contact, &uid(1)).unwrap());

        let err = tx.add_contact_device(contact, uid(1), false).unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateEntity { .. }));

        let report = tx.commit().unwrap();
        assert_eq!(dir.reader().contact_devices(contact).unwrap().len(), 1);

        let owned_crypto = dir.reader().owned_identity(owned).unwrap().unwrap().crypto_id;
        assert_eq!(
            report.events[0],
            IdentityEvent::NewContactDevice {
                owned_identity: owned_crypto,
                contact_identity: crypto_id(2),
                device_uid: uid(1),
                created_during_channel_creation: true,
            }
        );
    }

    #[test]
    fn capability_updates_and_deletion_emit_events() {
        let (mut dir, _tmp) = test_directory();
        let (_, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        let device = tx.add_contact_device(contact, uid(1), false).unwrap();
        tx.commit().unwrap();

        let caps: BTreeSet<_> = [Capability::WebrtcContinuousIce].into();
        let mut tx = dir.transaction().unwrap();
        tx.set_contact_device_capabilities(device, &caps).unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![EVENT_CONTACT_CAPABILITIES_UPDATED, BACKUPABLE]);

        let mut tx = dir.transaction().unwrap();
        tx.delete_contact_device(device).unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![EVENT_DELETED_CONTACT_DEVICE, BACKUPABLE]);
    }

    #[test]
    fn ping_is_persisted_without_events() {
        let (mut dir, _tmp) = test_directory();
        let (_, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        let device = tx.add_contact_device(contact, uid(1), false).unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.set_contact_device_ping(device, fixed_time()).unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![BACKUPABLE]);

        let stored = dir.reader().contact_device(device).unwrap().unwrap();
        assert_eq!(stored.latest_channel_creation_ping, Some(fixed_time()));
    }
}
