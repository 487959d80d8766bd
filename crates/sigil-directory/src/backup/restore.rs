//! Two-phase restore of a [`DirectoryBackup`].
//!
//! Phase 1 inserts one bare row per item and binds it to the item's token.
//! Phase 2 walks the items again and fills in every relationship from the
//! association table. The restored graph is then read back through the
//! regular row mappers; any inconsistency aborts the whole restore.

use sigil_shared::CryptoId;

use super::associations::Associations;
use super::bare::{capabilities_from_raw, BareContact, BareOwnedDevice};
use super::items::{
    ContactGroupJoinedBackupItem, ContactGroupOwnedBackupItem, ContactIdentityBackupItem,
    DirectoryBackup, GroupMemberBackupItem, OwnedIdentityBackupItem, PendingGroupMemberBackupItem,
    ServerUserDataBackupItem, UserDataTargetBackupItem,
};
use crate::database::Directory;
use crate::error::{DirectoryError, Result};
use crate::events::IdentityEvent;
use crate::models::{
    ContactKey, DeviceRole, GroupDetailsKind, GroupKey, GroupVariant, IdentityDetailsKind,
    OwnedIdentityKey, UserDataTarget,
};
use crate::transaction::DirectoryTx;

/// Counts of restored entities.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RestoreStats {
    pub owned_identities: usize,
    pub owned_devices: usize,
    pub contacts: usize,
    pub contact_devices: usize,
    pub groups: usize,
    pub pending_members: usize,
    pub server_user_data: usize,
}

impl Directory {
    /// Restore `backup` in its own transaction and commit it.
    pub fn restore_backup(&mut self, backup: &DirectoryBackup) -> Result<RestoreStats> {
        let mut tx = self.transaction()?;
        let stats = tx.restore_backup(backup)?;
        tx.commit()?;
        Ok(stats)
    }
}

impl DirectoryTx<'_> {
    /// Restore every owned identity of `backup`, replacing any owned identity
    /// with the same crypto identity. On error the transaction must be
    /// dropped: it may hold a partially restored graph.
    pub fn restore_backup(&mut self, backup: &DirectoryBackup) -> Result<RestoreStats> {
        self.changes.suspend();
        let result = self.restore_items(&backup.owned_identities);
        self.changes.resume();
        let stats = result.map_err(into_restore_error)?;

        for item in &backup.owned_identities {
            self.changes.push_event(IdentityEvent::BackupRestored {
                owned_identity: item.owned_identity.clone(),
            });
        }
        tracing::info!(
            owned_identities = stats.owned_identities,
            contacts = stats.contacts,
            groups = stats.groups,
            "backup restored"
        );
        Ok(stats)
    }

    fn restore_items(&mut self, items: &[OwnedIdentityBackupItem]) -> Result<RestoreStats> {
        let mut associations = Associations::default();
        let mut stats = RestoreStats::default();

        for item in items {
            associations.claim("owned identity", &[], item.owned_identity.as_bytes())?;
            if let Some(existing) = self.reader().owned_identity_by_crypto_id(&item.owned_identity)? {
                tracing::info!(owned = %existing.crypto_id.short(), "replacing owned identity by its backup");
                self.delete_owned_identity(existing.key)?;
            }
        }

        for item in items {
            item.restore_instance(self, &mut associations, &mut stats)?;
        }
        for item in items {
            item.restore_relationships(self, &associations)?;
        }

        self.delete_orphaned_owned_devices()?;
        for item in items {
            let owner = associations.get(item)?;
            self.validate_restored_identity(owner)
                .map_err(|e| DirectoryError::malformed(format!("restored graph is inconsistent: {e}")))?;
        }

        tracing::debug!(nodes = associations.len(), "restore associations resolved");
        Ok(stats)
    }

    /// Read the restored graph of `owner` back through the row mappers.
    pub(crate) fn validate_restored_identity(&self, owner: OwnedIdentityKey) -> Result<()> {
        let reader = self.reader();
        reader
            .owned_published_details(owner)?
            .ok_or(DirectoryError::NotFound("owned published details"))?;

        let current = reader
            .owned_devices(owner)?
            .iter()
            .filter(|device| device.role == DeviceRole::Current)
            .count();
        if current > 1 {
            return Err(DirectoryError::malformed(format!("{current} current devices")));
        }

        for contact in reader.contacts(owner)? {
            reader
                .contact_details(contact.key, IdentityDetailsKind::ContactTrusted)?
                .ok_or(DirectoryError::NotFound("contact trusted details"))?;
            reader.contact_devices(contact.key)?;
        }

        for group in reader.groups(owner)? {
            reader.require_group_details(group.published_details)?;
            match group.variant {
                GroupVariant::Owned { latest_details } => {
                    reader.require_group_details(latest_details)?;
                }
                GroupVariant::Joined {
                    group_owner,
                    trusted_details,
                } => {
                    reader.require_group_details(trusted_details)?;
                    let contact = reader.require_contact(group_owner)?;
                    if contact.owner != owner {
                        return Err(DirectoryError::malformed("group owner belongs to another identity"));
                    }
                }
            }
            reader.pending_members(group.key)?;
            reader.group_members(group.key)?;
        }
        Ok(())
    }
}

/// Duplicates surfacing from the store mean the backup holds them twice.
fn into_restore_error(error: DirectoryError) -> DirectoryError {
    match error {
        DirectoryError::DuplicateEntity { entity, key } => {
            DirectoryError::malformed(format!("duplicate {entity} {key} in backup"))
        }
        other => other,
    }
}

/// Length-prefixed concatenation: distinct part lists never share a scope.
fn scope(parts: &[&[u8]]) -> Vec<u8> {
    let mut scope = Vec::with_capacity(parts.iter().map(|part| part.len() + 8).sum());
    for part in parts {
        scope.extend_from_slice(&(part.len() as u64).to_be_bytes());
        scope.extend_from_slice(part);
    }
    scope
}

// ---------------------------------------------------------------------------
// Phase 1
// ---------------------------------------------------------------------------

impl OwnedIdentityBackupItem {
    fn restore_instance(
        &self,
        tx: &mut DirectoryTx<'_>,
        associations: &mut Associations,
        stats: &mut RestoreStats,
    ) -> Result<()> {
        let owned = self.owned_identity.as_bytes();
        let key = tx.insert_bare_owned_identity(&self.owned_identity, self.active)?;
        associations.associate(self, key)?;
        stats.owned_identities += 1;

        let details = tx.insert_bare_identity_details(
            IdentityDetailsKind::OwnedPublished,
            &self.published_details.to_input(),
        )?;
        associations.associate(&self.published_details, details)?;

        for device in &self.devices {
            associations.claim("owned device", owned, device.uid.as_bytes())?;
            let capabilities = capabilities_from_raw(device.capabilities.as_deref());
            let key = tx.insert_bare_owned_device(&BareOwnedDevice {
                uid: device.uid,
                name: device.name.as_deref(),
                capabilities,
                expiration: device.expiration,
                latest_registration: device.latest_registration,
            })?;
            associations.associate(device, key)?;
            stats.owned_devices += 1;
        }

        for contact in &self.contact_identities {
            contact.restore_instance(tx, owned, associations, stats)?;
        }

        for group in &self.owned_groups {
            associations.claim("owned group", owned, group.group_uid.as_bytes())?;
            let key = tx.insert_bare_group(group.group_uid, true, group.group_members_version)?;
            associations.associate(group, key)?;
            stats.groups += 1;

            let published = tx.insert_group_details(
                GroupDetailsKind::Published,
                &group.published_details.to_input(),
                None,
            )?;
            associations.associate(&group.published_details, published)?;
            let latest = tx.insert_group_details(
                GroupDetailsKind::Latest,
                &group.latest_details.to_input(),
                None,
            )?;
            associations.associate(&group.latest_details, latest)?;

            let group_scope = scope(&[owned, group.group_uid.as_bytes()]);
            restore_pending_instances(tx, &group_scope, &group.pending_members, associations, stats)?;
        }

        for data in &self.server_user_data {
            data.restore_instance(tx, &self.owned_identity, associations)?;
            stats.server_user_data += 1;
        }
        Ok(())
    }
}

impl ContactIdentityBackupItem {
    fn restore_instance(
        &self,
        tx: &mut DirectoryTx<'_>,
        owned: &[u8],
        associations: &mut Associations,
        stats: &mut RestoreStats,
    ) -> Result<()> {
        let crypto = self.contact_identity.as_bytes();
        associations.claim("contact", owned, crypto)?;
        let key = tx.insert_bare_contact(&BareContact {
            crypto_id: &self.contact_identity,
            trust_level: &self.trust_level,
            revoked: self.revoked,
            forcefully_trusted: self.forcefully_trusted,
            one_to_one: self.one_to_one,
        })?;
        associations.associate(self, key)?;
        associations.register_contact(owned, crypto, key);
        stats.contacts += 1;

        let trusted = tx.insert_bare_identity_details(
            IdentityDetailsKind::ContactTrusted,
            &self.trusted_details.to_input(),
        )?;
        associations.associate(&self.trusted_details, trusted)?;
        if let Some(published) = &self.published_details {
            let key = tx.insert_bare_identity_details(
                IdentityDetailsKind::ContactPublished,
                &published.to_input(),
            )?;
            associations.associate(published, key)?;
        }

        let contact_scope = scope(&[owned, crypto]);
        for device in &self.devices {
            associations.claim("contact device", &contact_scope, device.uid.as_bytes())?;
            let capabilities = capabilities_from_raw(device.capabilities.as_deref());
            let key = tx.insert_bare_contact_device(
                device.uid,
                capabilities.as_ref(),
                device.latest_channel_creation_ping,
            )?;
            associations.associate(device, key)?;
            stats.contact_devices += 1;
        }

        for group in &self.contact_groups {
            group.restore_instance(tx, &contact_scope, associations, stats)?;
        }
        Ok(())
    }
}

impl ContactGroupJoinedBackupItem {
    fn restore_instance(
        &self,
        tx: &mut DirectoryTx<'_>,
        contact_scope: &[u8],
        associations: &mut Associations,
        stats: &mut RestoreStats,
    ) -> Result<()> {
        associations.claim("joined group", contact_scope, self.group_uid.as_bytes())?;
        let key = tx.insert_bare_group(self.group_uid, false, self.group_members_version)?;
        associations.associate(self, key)?;
        stats.groups += 1;

        let trusted = tx.insert_group_details(
            GroupDetailsKind::Trusted,
            &self.trusted_details.to_input(),
            None,
        )?;
        associations.associate(&self.trusted_details, trusted)?;
        let published = tx.insert_group_details(
            GroupDetailsKind::Published,
            &self.published_details.to_input(),
            None,
        )?;
        associations.associate(&self.published_details, published)?;

        let group_scope = scope(&[contact_scope, self.group_uid.as_bytes()]);
        restore_pending_instances(tx, &group_scope, &self.pending_members, associations, stats)
    }
}

fn restore_pending_instances(
    tx: &mut DirectoryTx<'_>,
    group_scope: &[u8],
    pending_members: &[PendingGroupMemberBackupItem],
    associations: &mut Associations,
    stats: &mut RestoreStats,
) -> Result<()> {
    for pending in pending_members {
        associations.claim("pending member", group_scope, pending.contact_identity.as_bytes())?;
        let key = tx.insert_bare_pending_member(
            &pending.contact_identity,
            &pending.serialized_details,
            pending.declined,
        )?;
        associations.associate(pending, key)?;
        stats.pending_members += 1;
    }
    Ok(())
}

impl ServerUserDataBackupItem {
    fn restore_instance(
        &self,
        tx: &mut DirectoryTx<'_>,
        owner: &CryptoId,
        associations: &mut Associations,
    ) -> Result<()> {
        let claimed = match &self.target {
            UserDataTargetBackupItem::GroupV2 {
                group_v2_uid,
                server_url,
                category,
            } => scope(&[
                self.label.as_bytes(),
                group_v2_uid.as_bytes(),
                server_url.as_bytes(),
                category.as_str().as_bytes(),
            ]),
            _ => self.label.as_bytes().to_vec(),
        };
        associations.claim("server user data", owner.as_bytes(), &claimed)?;

        let data = tx.get_or_create_server_user_data(
            owner,
            self.label,
            UserDataTarget::from(&self.target),
            Some(self.next_refresh_timestamp),
        )?;
        associations.associate(self, data.key)
    }
}

// ---------------------------------------------------------------------------
// Phase 2
// ---------------------------------------------------------------------------

impl OwnedIdentityBackupItem {
    fn restore_relationships(&self, tx: &mut DirectoryTx<'_>, associations: &Associations) -> Result<()> {
        let owner: OwnedIdentityKey = associations.get(self)?;
        let owned = self.owned_identity.as_bytes();

        tx.link_owned_details(associations.get(&self.published_details)?, owner)?;

        for device in &self.devices {
            let role = if device.current {
                DeviceRole::Current
            } else {
                DeviceRole::Remote
            };
            tx.link_owned_device(associations.get(device)?, owner, role)?;
        }

        for contact in &self.contact_identities {
            let key: ContactKey = associations.get(contact)?;
            tx.link_contact(key, owner)?;
            tx.link_contact_details(associations.get(&contact.trusted_details)?, key)?;
            if let Some(published) = &contact.published_details {
                tx.link_contact_details(associations.get(published)?, key)?;
            }
            for device in &contact.devices {
                tx.link_contact_device(associations.get(device)?, key)?;
            }
            for group in &contact.contact_groups {
                group.restore_relationships(tx, owner, owned, key, associations)?;
            }
        }

        for group in &self.owned_groups {
            group.restore_relationships(tx, owner, owned, associations)?;
        }
        Ok(())
    }
}

impl ContactGroupOwnedBackupItem {
    fn restore_relationships(
        &self,
        tx: &mut DirectoryTx<'_>,
        owner: OwnedIdentityKey,
        owned: &[u8],
        associations: &Associations,
    ) -> Result<()> {
        let key: GroupKey = associations.get(self)?;
        tx.link_owned_group(
            key,
            owner,
            associations.get(&self.published_details)?,
            associations.get(&self.latest_details)?,
        )?;
        link_members(tx, key, owned, &self.members, associations)?;
        link_pending_members(tx, key, &self.pending_members, associations)
    }
}

impl ContactGroupJoinedBackupItem {
    fn restore_relationships(
        &self,
        tx: &mut DirectoryTx<'_>,
        owner: OwnedIdentityKey,
        owned: &[u8],
        group_owner: ContactKey,
        associations: &Associations,
    ) -> Result<()> {
        let key: GroupKey = associations.get(self)?;
        tx.link_joined_group(
            key,
            owner,
            group_owner,
            associations.get(&self.published_details)?,
            associations.get(&self.trusted_details)?,
        )?;
        link_members(tx, key, owned, &self.members, associations)?;
        link_pending_members(tx, key, &self.pending_members, associations)
    }
}

/// Members are named by identity and must be contacts of the same owned
/// identity.
fn link_members(
    tx: &mut DirectoryTx<'_>,
    group: GroupKey,
    owned: &[u8],
    members: &[GroupMemberBackupItem],
    associations: &Associations,
) -> Result<()> {
    for member in members {
        let contact = associations
            .contact(owned, member.contact_identity.as_bytes())
            .ok_or_else(|| {
                DirectoryError::malformed(format!(
                    "group member {} is not a contact",
                    member.contact_identity.short()
                ))
            })?;
        tx.insert_group_member(group, contact)?;
    }
    Ok(())
}

fn link_pending_members(
    tx: &mut DirectoryTx<'_>,
    group: GroupKey,
    pending_members: &[PendingGroupMemberBackupItem],
    associations: &Associations,
) -> Result<()> {
    for pending in pending_members {
        tx.link_pending_member(associations.get(pending)?, group)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;

    use crate::backup::DirectoryBackup;
    use crate::error::DirectoryError;
    use crate::events::EVENT_BACKUP_RESTORED;
    use crate::models::{DetailsInput, GroupVariant, PendingMemberInput, UserDataTarget};
    use crate::test_support::*;

    fn populated_directory() -> (crate::Directory, tempfile::TempDir) {
        let (mut dir, tmp) = test_directory();
        let (owned, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        let dave = tx
            .add_contact(owned, &crypto_id(4), &details(1, "dave"), "introduced")
            .unwrap();
        tx.add_contact_device(contact, uid(20), false).unwrap();
        tx.add_contact_device(dave, uid(21), true).unwrap();
        tx.set_contact_one_to_one(contact, true).unwrap();
        tx.update_contact_published_details(contact, &details(3, "bob v3"))
            .unwrap();
        tx.add_remote_owned_device(owned, uid(30), Some("laptop")).unwrap();

        let group = tx
            .create_owned_group(
                owned,
                uid(7),
                &DetailsInput::new(0, "team").with_photo_server(b"key".to_vec(), uid(40)),
                None,
                &[
                    PendingMemberInput {
                        crypto_id: crypto_id(4),
                        serialized_details: "dave".into(),
                    },
                    PendingMemberInput {
                        crypto_id: crypto_id(5),
                        serialized_details: "eve".into(),
                    },
                    PendingMemberInput {
                        crypto_id: crypto_id(6),
                        serialized_details: "frank".into(),
                    },
                ],
            )
            .unwrap();
        tx.promote_pending_member(group, dave).unwrap();
        tx.mark_pending_member_declined(group, &crypto_id(6)).unwrap();
        tx.update_latest_details(group, &details(1, "team v1"), None)
            .unwrap();

        tx.create_joined_group(owned, contact, uid(8), &details(2, "bob's"), None, &[])
            .unwrap();

        let alice = crypto_id(1);
        tx.get_or_create_server_user_data(
            &alice,
            uid(40),
            UserDataTarget::Group { group_uid: uid(7) },
            Some(fixed_time()),
        )
        .unwrap();
        tx.commit().unwrap();
        (dir, tmp)
    }

    fn exported_identities(dir: &crate::Directory) -> serde_json::Value {
        let backup = dir.reader().export_backup().unwrap();
        serde_json::to_value(&backup.owned_identities).unwrap()
    }

    #[test]
    fn backup_round_trip() {
        let (source, _tmp) = populated_directory();
        let backup = source.reader().export_backup().unwrap();
        let json = backup.to_json().unwrap();

        let (mut target, _tmp2) = test_directory();
        let decoded = DirectoryBackup::from_json(&json).unwrap();
        let stats = target.restore_backup(&decoded).unwrap();

        assert_eq!(stats.owned_identities, 1);
        assert_eq!(stats.contacts, 2);
        assert_eq!(stats.groups, 2);
        assert_eq!(exported_identities(&target), exported_identities(&source));
    }

    #[test]
    fn restoring_twice_replaces_the_identity() {
        let (mut dir, _tmp) = populated_directory();
        let before = exported_identities(&dir);
        let backup = dir.reader().export_backup().unwrap();

        dir.restore_backup(&backup).unwrap();
        dir.restore_backup(&backup).unwrap();

        assert_eq!(exported_identities(&dir), before);
        assert_eq!(dir.reader().owned_identities().unwrap().len(), 1);
    }

    #[test]
    fn pending_members_are_wired_both_ways() {
        let (source, _tmp) = populated_directory();
        let backup = source.reader().export_backup().unwrap();

        let (mut target, _tmp2) = test_directory();
        target.restore_backup(&backup).unwrap();

        let reader = target.reader();
        let owned = reader.owned_identity_by_crypto_id(&crypto_id(1)).unwrap().unwrap();
        let group = reader.owned_group(owned.key, &uid(7)).unwrap().unwrap();
        let pending = reader.pending_members(group.key).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.iter().filter(|p| p.declined).count(), 1);
        assert!(pending.iter().all(|p| p.group == group.key));

        let GroupVariant::Owned { latest_details } = group.variant else {
            panic!("expected an owned group");
        };
        let latest = reader.group_of_details(latest_details).unwrap().unwrap();
        assert_eq!(latest.key, group.key);
        assert_eq!(reader.group_details(latest_details).unwrap().unwrap().core.version, 1);
    }

    #[test]
    fn restore_emits_backup_restored() {
        let (source, _tmp) = populated_directory();
        let backup = source.reader().export_backup().unwrap();

        let (mut target, _tmp2) = test_directory();
        let mut tx = target.transaction().unwrap();
        tx.restore_backup(&backup).unwrap();
        let report = tx.commit().unwrap();

        assert_eq!(event_names(&report), vec![EVENT_BACKUP_RESTORED, BACKUPABLE]);
    }

    #[test]
    fn duplicate_contact_in_backup_is_malformed() {
        let (source, _tmp) = populated_directory();
        let mut backup = source.reader().export_backup().unwrap();
        let copy = backup.owned_identities[0].contact_identities[0].clone();
        backup.owned_identities[0].contact_identities.push(copy);

        let (mut target, _tmp2) = test_directory();
        let err = target.restore_backup(&backup).unwrap_err();
        assert!(matches!(err, DirectoryError::MalformedBackupData(_)));
        assert!(target.reader().owned_identities().unwrap().is_empty());
    }

    #[test]
    fn unknown_group_member_is_malformed() {
        let b64 = |bytes: &[u8]| STANDARD.encode(bytes);
        let details = json!({ "serialized_details": "x", "version": 0 });
        let raw = json!({
            "version": 1,
            "created_at": "2024-01-01T00:00:00Z",
            "owned_identities": [{
                "owned_identity": b64(crypto_id(1).as_bytes()),
                "published_details": details,
                "devices": [{ "uid": b64(uid(1).as_bytes()), "current": true }],
                "owned_groups": [{
                    "group_uid": b64(uid(7).as_bytes()),
                    "published_details": details,
                    "members": [{ "contact_identity": b64(crypto_id(9).as_bytes()) }],
                }],
            }],
        });
        let backup = DirectoryBackup::from_json(&raw.to_string()).unwrap();

        let (mut dir, _tmp) = test_directory();
        let err = dir.restore_backup(&backup).unwrap_err();
        assert!(matches!(err, DirectoryError::MalformedBackupData(_)));
    }

    #[test]
    fn two_current_devices_are_malformed() {
        let (source, _tmp) = populated_directory();
        let mut backup = source.reader().export_backup().unwrap();
        for device in &mut backup.owned_identities[0].devices {
            device.current = true;
        }

        let (mut target, _tmp2) = test_directory();
        assert!(matches!(
            target.restore_backup(&backup),
            Err(DirectoryError::MalformedBackupData(_))
        ));
    }

    #[test]
    fn legacy_label_is_restored() {
        let b64 = |bytes: &[u8]| STANDARD.encode(bytes);
        let raw = json!({
            "version": 1,
            "created_at": "2024-01-01T00:00:00Z",
            "owned_identities": [{
                "owned_identity": b64(crypto_id(1).as_bytes()),
                "published_details": {
                    "serialized_details": "alice",
                    "version": 2,
                    "photo_server_key": b64(b"key"),
                    "photo_server_label": uid(40).to_hex(),
                },
                "devices": [{ "uid": b64(uid(1).as_bytes()), "current": true }],
            }],
        });
        let backup = DirectoryBackup::from_json(&raw.to_string()).unwrap();

        let (mut dir, _tmp) = test_directory();
        dir.restore_backup(&backup).unwrap();

        let reader = dir.reader();
        let owned = reader.owned_identity_by_crypto_id(&crypto_id(1)).unwrap().unwrap();
        let published = reader.owned_published_details(owned.key).unwrap().unwrap();
        let server = published.core.photo_server.unwrap();
        assert_eq!(server.label, uid(40));
        assert_eq!(server.key, b"key".to_vec());
        assert!(reader.current_device(owned.key).unwrap().is_some());
    }

    #[test]
    fn scopes_keep_part_boundaries() {
        assert_ne!(
            super::scope(&[b"ab".as_slice(), b"c".as_slice()]),
            super::scope(&[b"a".as_slice(), b"bc".as_slice()])
        );
    }

    #[test]
    fn group_v2_user_data_on_two_servers_restores() {
        use sigil_shared::{GroupV2Category, GroupV2Identifier};

        let (mut dir, _tmp) = test_directory();
        create_owned(&mut dir, 1);
        let mut tx = dir.transaction().unwrap();
        for server_url in ["https://a.example", "https://b.example"] {
            let target = UserDataTarget::GroupV2 {
                group: GroupV2Identifier {
                    uid: uid(60),
                    server_url: server_url.into(),
                    category: GroupV2Category::Server,
                },
            };
            tx.get_or_create_server_user_data(&crypto_id(1), uid(50), target, Some(fixed_time()))
                .unwrap();
        }
        tx.commit().unwrap();
        let backup = dir.reader().export_backup().unwrap();

        let (mut restored, _tmp2) = test_directory();
        let stats = restored.restore_backup(&backup).unwrap();

        assert_eq!(stats.server_user_data, 2);
        assert_eq!(restored.reader().server_user_data_for(&crypto_id(1)).unwrap().len(), 2);
    }
}
