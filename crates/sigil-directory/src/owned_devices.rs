//! Devices of owned identities.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use sigil_shared::capabilities::{join_capabilities, parse_capabilities};
use sigil_shared::{Capability, CryptoId, Uid};

use crate::changes::{Attribute, AttributeValue, Subject};
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    invalid_column, timestamp_column, uid_column, DeviceRole, OwnedDevice, OwnedDeviceKey,
    OwnedIdentityKey,
};
use crate::transaction::DirectoryTx;

const COLUMNS: &str =
    "id, uid, current_of, remote_of, name, capabilities, expiration, latest_registration";

impl Reader<'_> {
    pub fn owned_device(&self, key: OwnedDeviceKey) -> Result<Option<OwnedDevice>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM owned_devices WHERE id = ?1"),
                params![key.0],
                row_to_owned_device,
            )
            .optional()?)
    }

    pub fn owned_device_by_uid(
        &self,
        owner: OwnedIdentityKey,
        uid: &Uid,
    ) -> Result<Option<OwnedDevice>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM owned_devices
                     WHERE uid = ?1 AND (current_of = ?2 OR remote_of = ?2)"
                ),
                params![uid.as_bytes(), owner.0],
                row_to_owned_device,
            )
            .optional()?)
    }

    pub fn owned_device_exists(&self, owner: OwnedIdentityKey, uid: &Uid) -> Result<bool> {
        Ok(self.owned_device_by_uid(owner, uid)?.is_some())
    }

    /// Every device of `owner`, current and remote, ordered by uid.
    pub fn owned_devices(&self, owner: OwnedIdentityKey) -> Result<Vec<OwnedDevice>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM owned_devices
             WHERE current_of = ?1 OR remote_of = ?1
             ORDER BY uid ASC"
        ))?;
        let rows = stmt.query_map(params![owner.0], row_to_owned_device)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn current_device(&self, owner: OwnedIdentityKey) -> Result<Option<OwnedDevice>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM owned_devices WHERE current_of = ?1"),
                params![owner.0],
                row_to_owned_device,
            )
            .optional()?)
    }

    pub(crate) fn require_owned_device(&self, key: OwnedDeviceKey) -> Result<OwnedDevice> {
        self.owned_device(key)?
            .ok_or(DirectoryError::NotFound("owned device"))
    }

    /// Crypto identity of the identity owning a device.
    pub(crate) fn owner_of_owned_device(&self, device: &OwnedDevice) -> Result<CryptoId> {
        self.owned_identity(device.owner)?
            .map(|owned| owned.crypto_id)
            .ok_or_else(|| DirectoryError::missing_context(format!("{} has no owner", device.key)))
    }
}

impl DirectoryTx<'_> {
    pub(crate) fn insert_owned_device(
        &mut self,
        owner: OwnedIdentityKey,
        uid: Uid,
        role: DeviceRole,
        name: Option<&str>,
    ) -> Result<OwnedDeviceKey> {
        let owned = self.reader().require_owned_identity(owner)?;
        if self.reader().owned_device_exists(owner, &uid)? {
            return Err(DirectoryError::duplicate("owned device", uid.short()));
        }
        if role == DeviceRole::Current && self.reader().current_device(owner)?.is_some() {
            return Err(DirectoryError::duplicate("current device", owned.crypto_id.short()));
        }

        let column = match role {
            DeviceRole::Current => "current_of",
            DeviceRole::Remote => "remote_of",
        };
        self.conn().execute(
            &format!("INSERT INTO owned_devices (uid, {column}, name) VALUES (?1, ?2, ?3)"),
            params![uid.as_bytes(), owner.0, name],
        )?;
        let key = OwnedDeviceKey(self.conn().last_insert_rowid());

        self.changes.inserted(
            key.into(),
            Subject::OwnedDevice {
                owned: owned.crypto_id,
                uid,
                role,
            },
        );
        Ok(key)
    }

    /// Register a remote device of `owner`.
    pub fn add_remote_owned_device(
        &mut self,
        owner: OwnedIdentityKey,
        uid: Uid,
        name: Option<&str>,
    ) -> Result<OwnedDeviceKey> {
        let key = self.insert_owned_device(owner, uid, DeviceRole::Remote, name)?;
        tracing::debug!(device = %uid.short(), "remote owned device added");
        Ok(key)
    }

    /// Replace the advertised capabilities. Setting the current set again is
    /// a no-op.
    pub fn set_owned_device_capabilities(
        &mut self,
        key: OwnedDeviceKey,
        capabilities: &BTreeSet<Capability>,
    ) -> Result<()> {
        let device = self.reader().require_owned_device(key)?;
        if device.capabilities.as_ref() == Some(capabilities) {
            return Ok(());
        }

        self.conn().execute(
            "UPDATE owned_devices SET capabilities = ?1 WHERE id = ?2",
            params![join_capabilities(capabilities), key.0],
        )?;
        let subject = self.owned_device_subject(&device)?;
        self.changes.updated_from(
            key.into(),
            subject,
            Attribute::Capabilities,
            AttributeValue::Capabilities(device.capabilities),
            AttributeValue::Capabilities(Some(capabilities.clone())),
        );
        Ok(())
    }

    pub fn set_owned_device_name(&mut self, key: OwnedDeviceKey, name: Option<&str>) -> Result<()> {
        let device = self.reader().require_owned_device(key)?;
        if device.name.as_deref() == name {
            return Ok(());
        }

        self.conn().execute(
            "UPDATE owned_devices SET name = ?1 WHERE id = ?2",
            params![name, key.0],
        )?;
        self.note_device_change(&device, Attribute::Name)
    }

    pub fn set_owned_device_registration(
        &mut self,
        key: OwnedDeviceKey,
        expiration: Option<DateTime<Utc>>,
        latest_registration: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let device = self.reader().require_owned_device(key)?;
        if device.expiration == expiration && device.latest_registration == latest_registration {
            return Ok(());
        }

        self.conn().execute(
            "UPDATE owned_devices SET expiration = ?1, latest_registration = ?2 WHERE id = ?3",
            params![
                expiration.map(|t| t.to_rfc3339()),
                latest_registration.map(|t| t.to_rfc3339()),
                key.0
            ],
        )?;
        self.note_device_change(&device, Attribute::Registration)
    }

    /// Delete a remote device. The current device only goes away with its
    /// owned identity.
    pub fn delete_owned_device(&mut self, key: OwnedDeviceKey) -> Result<()> {
        let device = self.reader().require_owned_device(key)?;
        if device.role == DeviceRole::Current {
            return Err(DirectoryError::NotApplicable(
                "the current device cannot be deleted on its own",
            ));
        }
        let owned = self.reader().owner_of_owned_device(&device)?;
        self.remove_owned_device(&device, &owned)
    }

    pub(crate) fn remove_owned_device(&mut self, device: &OwnedDevice, owned: &CryptoId) -> Result<()> {
        self.conn()
            .execute("DELETE FROM owned_devices WHERE id = ?1", params![device.key.0])?;
        self.changes.deleted(
            device.key.into(),
            Subject::OwnedDevice {
                owned: owned.clone(),
                uid: device.uid,
                role: device.role,
            },
        );
        Ok(())
    }

    /// Drop devices attached to no owned identity, left behind by an
    /// interrupted restore.
    pub(crate) fn delete_orphaned_owned_devices(&mut self) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM owned_devices WHERE current_of IS NULL AND remote_of IS NULL",
            [],
        )?;
        if removed > 0 {
            tracing::warn!(removed, "deleted orphaned owned devices");
        }
        Ok(removed)
    }

    fn note_device_change(&mut self, device: &OwnedDevice, attribute: Attribute) -> Result<()> {
        let subject = self.owned_device_subject(device)?;
        self.changes.updated(device.key.into(), subject, attribute);
        Ok(())
    }

    fn owned_device_subject(&self, device: &OwnedDevice) -> Result<Subject> {
        Ok(Subject::OwnedDevice {
            owned: self.reader().owner_of_owned_device(device)?,
            uid: device.uid,
            role: device.role,
        })
    }
}

fn row_to_owned_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<OwnedDevice> {
    let current_of: Option<i64> = row.get(2)?;
    let remote_of: Option<i64> = row.get(3)?;
    let (owner, role) = match (current_of, remote_of) {
        (Some(owner), None) => (owner, DeviceRole::Current),
        (None, Some(owner)) => (owner, DeviceRole::Remote),
        _ => {
            return Err(invalid_column(
                2,
                "owned device must be either current or remote",
            ))
        }
    };

    Ok(OwnedDevice {
        key: OwnedDeviceKey(row.get(0)?),
        uid: uid_column(1, row.get(1)?)?,
        owner: OwnedIdentityKey(owner),
        role,
        name: row.get(4)?,
        capabilities: row
            .get::<_, Option<String>>(5)?
            .map(|raw| parse_capabilities(&raw)),
        expiration: timestamp_column(6, row.get(6)?)?,
        latest_registration: timestamp_column(7, row.get(7)?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use sigil_shared::Capability;

    use crate::error::DirectoryError;
    use crate::events::{
        EVENT_DELETED_REMOTE_OWNED_DEVICE, EVENT_NEW_REMOTE_OWNED_DEVICE,
        EVENT_OWNED_CAPABILITIES_UPDATED, EVENT_OWNED_DEVICE_UPDATED,
    };
    use crate::test_support::*;

    #[test]
    fn adding_the_same_remote_device_twice_fails() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);

        let mut tx = dir.transaction().unwrap();
        tx.add_remote_owned_device(owned, uid(2), Some("phone")).unwrap();
        let err = tx.add_remote_owned_device(owned, uid(2), None).unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateEntity { .. }));

        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![EVENT_NEW_REMOTE_OWNED_DEVICE, BACKUPABLE]);
        assert_eq!(dir.reader().owned_devices(owned).unwrap().len(), 2);
    }

    #[test]
    fn capability_update_emits_events_once() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let device = dir.reader().current_device(owned).unwrap().unwrap();
        let caps: BTreeSet<_> = [Capability::GroupsV2, Capability::OneToOneContacts].into();

        let mut tx = dir.transaction().unwrap();
        tx.set_owned_device_capabilities(device.key, &caps).unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(
            event_names(&report),
            vec![EVENT_OWNED_CAPABILITIES_UPDATED, EVENT_OWNED_DEVICE_UPDATED, BACKUPABLE]
        );

        let mut tx = dir.transaction().unwrap();
        tx.set_owned_device_capabilities(device.key, &caps).unwrap();
        assert!(tx.commit().unwrap().events.is_empty());

        let stored = dir.reader().owned_device(device.key).unwrap().unwrap();
        assert_eq!(stored.capabilities, Some(caps));
    }

    #[test]
    fn capabilities_restored_within_a_transaction_emit_nothing() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let device = dir.reader().current_device(owned).unwrap().unwrap();
        let original: BTreeSet<_> = [Capability::GroupsV2].into();
        let other: BTreeSet<_> = [Capability::OneToOneContacts].into();

        let mut tx = dir.transaction().unwrap();
        tx.set_owned_device_capabilities(device.key, &original).unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.set_owned_device_capabilities(device.key, &other).unwrap();
        tx.set_owned_device_capabilities(device.key, &original).unwrap();
        assert!(tx.commit().unwrap().events.is_empty());
    }

    #[test]
    fn current_device_cannot_be_deleted_alone() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let current = dir.reader().current_device(owned).unwrap().unwrap();

        let mut tx = dir.transaction().unwrap();
        let err = tx.delete_owned_device(current.key).unwrap_err();
        assert!(matches!(err, DirectoryError::NotApplicable(_)));
    }

    #[test]
    fn deleting_remote_device_emits_event() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);

        let mut tx = dir.transaction().unwrap();
        let remote = tx.add_remote_owned_device(owned, uid(5), None).unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.delete_owned_device(remote).unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![EVENT_DELETED_REMOTE_OWNED_DEVICE, BACKUPABLE]);
        assert!(!dir.reader().owned_device_exists(owned, &uid(5)).unwrap());
    }

    #[test]
    fn registration_timestamps_round_trip() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let current = dir.reader().current_device(owned).unwrap().unwrap();
        let expiration = fixed_time();

        let mut tx = dir.transaction().unwrap();
        tx.set_owned_device_registration(current.key, Some(expiration), None)
            .unwrap();
        tx.commit().unwrap();

        let stored = dir.reader().owned_device(current.key).unwrap().unwrap();
        assert_eq!(stored.expiration, Some(expiration));
        assert_eq!(stored.latest_registration, None);
    }
}
