use chrono::Utc;
use sigil_shared::constants::BACKUP_FORMAT_VERSION;

use super::bare::capabilities_to_raw;
use super::items::{
    ContactDeviceBackupItem, ContactGroupJoinedBackupItem, ContactGroupOwnedBackupItem,
    ContactIdentityBackupItem, DetailsBackupItem, DirectoryBackup, GroupMemberBackupItem,
    OwnedDeviceBackupItem, OwnedIdentityBackupItem, PendingGroupMemberBackupItem,
    ServerUserDataBackupItem,
};
use super::RestoreToken;
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    Contact, ContactGroup, DeviceRole, GroupDetailsKey, GroupVariant, IdentityDetailsKind,
    OwnedIdentityKey,
};

impl Reader<'_> {
    /// Export every owned identity. Lists come out in a stable order so
    /// that two exports of the same graph are equal.
    pub fn export_backup(&self) -> Result<DirectoryBackup> {
        let owned_identities = self
            .owned_identities()?
            .into_iter()
            .map(|owned| self.export_owned_identity(owned.key))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(owned_identities = owned_identities.len(), "directory exported");
        Ok(DirectoryBackup {
            version: BACKUP_FORMAT_VERSION,
            created_at: Utc::now(),
            owned_identities,
        })
    }

    pub fn export_owned_identity(&self, key: OwnedIdentityKey) -> Result<OwnedIdentityBackupItem> {
        let owned = self.require_owned_identity(key)?;
        let published = self
            .owned_published_details(key)?
            .ok_or(DirectoryError::NotFound("owned published details"))?;

        let devices = self
            .owned_devices(key)?
            .into_iter()
            .map(|device| OwnedDeviceBackupItem {
                token: RestoreToken::fresh(),
                uid: device.uid,
                name: device.name,
                capabilities: capabilities_to_raw(device.capabilities.as_ref()),
                expiration: device.expiration,
                latest_registration: device.latest_registration,
                current: device.role == DeviceRole::Current,
            })
            .collect();

        let contact_identities = self
            .contacts(key)?
            .iter()
            .map(|contact| self.export_contact(contact))
            .collect::<Result<Vec<_>>>()?;

        let mut owned_groups = Vec::new();
        for group in self.groups(key)? {
            if let GroupVariant::Owned { latest_details } = group.variant {
                owned_groups.push(ContactGroupOwnedBackupItem {
                    token: RestoreToken::fresh(),
                    group_uid: group.group_uid,
                    group_members_version: group.members_version,
                    published_details: self.export_group_details(group.published_details)?,
                    latest_details: self.export_group_details(latest_details)?,
                    members: self.export_members(&group)?,
                    pending_members: self.export_pending_members(&group)?,
                });
            }
        }

        let server_user_data = self
            .server_user_data_for(&owned.crypto_id)?
            .into_iter()
            .map(|data| ServerUserDataBackupItem {
                token: RestoreToken::fresh(),
                label: data.label,
                next_refresh_timestamp: data.next_refresh,
                target: (&data.target).into(),
            })
            .collect();

        Ok(OwnedIdentityBackupItem {
            token: RestoreToken::fresh(),
            owned_identity: owned.crypto_id,
            active: owned.is_active,
            published_details: DetailsBackupItem::from(&published.core),
            devices,
            contact_identities,
            owned_groups,
            server_user_data,
        })
    }

    fn export_contact(&self, contact: &Contact) -> Result<ContactIdentityBackupItem> {
        let trusted = self
            .contact_details(contact.key, IdentityDetailsKind::ContactTrusted)?
            .ok_or(DirectoryError::NotFound("contact trusted details"))?;
        let published = self.contact_details(contact.key, IdentityDetailsKind::ContactPublished)?;

        let devices = self
            .contact_devices(contact.key)?
            .into_iter()
            .map(|device| ContactDeviceBackupItem {
                token: RestoreToken::fresh(),
                uid: device.uid,
                capabilities: capabilities_to_raw(device.capabilities.as_ref()),
                latest_channel_creation_ping: device.latest_channel_creation_ping,
            })
            .collect();

        let mut contact_groups = Vec::new();
        for group in self.groups_owned_by_contact(contact.key)? {
            if let GroupVariant::Joined {
                trusted_details, ..
            } = group.variant
            {
                contact_groups.push(ContactGroupJoinedBackupItem {
                    token: RestoreToken::fresh(),
                    group_uid: group.group_uid,
                    group_members_version: group.members_version,
                    trusted_details: self.export_group_details(trusted_details)?,
                    published_details: self.export_group_details(group.published_details)?,
                    members: self.export_members(&group)?,
                    pending_members: self.export_pending_members(&group)?,
                });
            }
        }

        Ok(ContactIdentityBackupItem {
            token: RestoreToken::fresh(),
            contact_identity: contact.crypto_id.clone(),
            trust_level: contact.trust_level.clone(),
            revoked: contact.is_revoked,
            forcefully_trusted: contact.is_forcefully_trusted,
            one_to_one: contact.is_one_to_one,
            published_details: published.map(|details| DetailsBackupItem::from(&details.core)),
            trusted_details: DetailsBackupItem::from(&trusted.core),
            devices,
            contact_groups,
        })
    }

    fn export_group_details(&self, key: GroupDetailsKey) -> Result<DetailsBackupItem> {
        let details = self.require_group_details(key)?;
        Ok(DetailsBackupItem::from(&details.core))
    }

    fn export_members(&self, group: &ContactGroup) -> Result<Vec<GroupMemberBackupItem>> {
        Ok(self
            .group_members(group.key)?
            .into_iter()
            .map(|contact| GroupMemberBackupItem {
                token: RestoreToken::fresh(),
                contact_identity: contact.crypto_id,
            })
            .collect())
    }

    fn export_pending_members(&self, group: &ContactGroup) -> Result<Vec<PendingGroupMemberBackupItem>> {
        Ok(self
            .pending_members(group.key)?
            .into_iter()
            .map(|pending| PendingGroupMemberBackupItem {
                token: RestoreToken::fresh(),
                contact_identity: pending.crypto_id,
                declined: pending.declined,
                serialized_details: pending.serialized_details,
            })
            .collect())
    }
}
