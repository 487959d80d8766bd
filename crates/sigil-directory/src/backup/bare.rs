//! Bare rows for two-phase restores.
//!
//! `insert_bare_*` writes an entity with every relationship column left
//! `NULL`. `link_*` fills those columns in once all rows exist. Nothing here
//! is tracked: restores run with the change tracker suspended.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::params;
use sigil_shared::capabilities::join_capabilities;
use sigil_shared::{Capability, CryptoId, Uid};

use crate::error::Result;
use crate::models::{
    ContactDeviceKey, ContactKey, DetailsInput, DeviceRole, GroupDetailsKey, GroupKey,
    IdentityDetailsKey, IdentityDetailsKind, OwnedDeviceKey, OwnedIdentityKey, PendingMemberKey,
};
use crate::transaction::DirectoryTx;

/// Capabilities as stored in a backup; unknown raw values are dropped.
pub(crate) fn capabilities_from_raw(raw: Option<&[String]>) -> Option<BTreeSet<Capability>> {
    raw.map(|values| values.iter().filter_map(|v| v.parse().ok()).collect())
}

pub(crate) fn capabilities_to_raw(capabilities: Option<&BTreeSet<Capability>>) -> Option<Vec<String>> {
    capabilities.map(|set| set.iter().map(|c| c.as_str().to_string()).collect())
}

pub(crate) struct BareOwnedDevice<'a> {
    pub uid: Uid,
    pub name: Option<&'a str>,
    pub capabilities: Option<BTreeSet<Capability>>,
    pub expiration: Option<DateTime<Utc>>,
    pub latest_registration: Option<DateTime<Utc>>,
}

pub(crate) struct BareContact<'a> {
    pub crypto_id: &'a CryptoId,
    pub trust_level: &'a str,
    pub revoked: bool,
    pub forcefully_trusted: bool,
    pub one_to_one: Option<bool>,
}

impl DirectoryTx<'_> {
    pub(crate) fn insert_bare_owned_identity(
        &mut self,
        crypto_id: &CryptoId,
        active: bool,
    ) -> Result<OwnedIdentityKey> {
        self.conn().execute(
            "INSERT INTO owned_identities (crypto_identity, is_active) VALUES (?1, ?2)",
            params![crypto_id.as_bytes(), active],
        )?;
        Ok(OwnedIdentityKey(self.conn().last_insert_rowid()))
    }

    pub(crate) fn insert_bare_owned_device(&mut self, device: &BareOwnedDevice<'_>) -> Result<OwnedDeviceKey> {
        self.conn().execute(
            "INSERT INTO owned_devices (uid, name, capabilities, expiration, latest_registration)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                device.uid.as_bytes(),
                device.name,
                device.capabilities.as_ref().map(join_capabilities),
                device.expiration.map(|t| t.to_rfc3339()),
                device.latest_registration.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(OwnedDeviceKey(self.conn().last_insert_rowid()))
    }

    pub(crate) fn link_owned_device(
        &mut self,
        device: OwnedDeviceKey,
        owner: OwnedIdentityKey,
        role: DeviceRole,
    ) -> Result<()> {
        let column = match role {
            DeviceRole::Current => "current_of",
            DeviceRole::Remote => "remote_of",
        };
        self.conn().execute(
            &format!("UPDATE owned_devices SET {column} = ?1 WHERE id = ?2"),
            params![owner.0, device.0],
        )?;
        Ok(())
    }

    pub(crate) fn insert_bare_identity_details(
        &mut self,
        kind: IdentityDetailsKind,
        input: &DetailsInput,
    ) -> Result<IdentityDetailsKey> {
        let server = input.photo_server.as_ref();
        self.conn().execute(
            "INSERT INTO identity_details
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
        Ok(IdentityDetailsKey(self.conn().last_insert_rowid()))
    }

    pub(crate) fn link_owned_details(
        &mut self,
        details: IdentityDetailsKey,
        owner: OwnedIdentityKey,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE identity_details SET owned_identity_id = ?1 WHERE id = ?2",
            params![owner.0, details.0],
        )?;
        Ok(())
    }

    pub(crate) fn link_contact_details(
        &mut self,
        details: IdentityDetailsKey,
        contact: ContactKey,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE identity_details SET contact_id = ?1 WHERE id = ?2",
            params![contact.0, details.0],
        )?;
        Ok(())
    }

    pub(crate) fn insert_bare_contact(&mut self, contact: &BareContact<'_>) -> Result<ContactKey> {
        self.conn().execute(
            "INSERT INTO contact_identities
                (crypto_identity, trust_level, is_revoked, is_forcefully_trusted, is_one_to_one)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                contact.crypto_id.as_bytes(),
                contact.trust_level,
                contact.revoked,
                contact.forcefully_trusted,
                contact.one_to_one,
            ],
        )?;
        Ok(ContactKey(self.conn().last_insert_rowid()))
    }

    pub(crate) fn link_contact(&mut self, contact: ContactKey, owner: OwnedIdentityKey) -> Result<()> {
        self.conn().execute(
            "UPDATE contact_identities SET owned_identity_id = ?1 WHERE id = ?2",
            params![owner.0, contact.0],
        )?;
        Ok(())
    }

    pub(crate) fn insert_bare_contact_device(
        &mut self,
        uid: Uid,
        capabilities: Option<&BTreeSet<Capability>>,
        latest_ping: Option<DateTime<Utc>>,
    ) -> Result<ContactDeviceKey> {
        self.conn().execute(
            "INSERT INTO contact_devices (uid, capabilities, latest_channel_creation_ping)
             VALUES (?1, ?2, ?3)",
            params![
                uid.as_bytes(),
                capabilities.map(join_capabilities),
                latest_ping.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(ContactDeviceKey(self.conn().last_insert_rowid()))
    }

    pub(crate) fn link_contact_device(
        &mut self,
        device: ContactDeviceKey,
        contact: ContactKey,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE contact_devices SET contact_id = ?1 WHERE id = ?2",
            params![contact.0, device.0],
        )?;
        Ok(())
    }

    /// `owned` selects the group variant; its details columns are linked
    /// later.
    pub(crate) fn insert_bare_group(
        &mut self,
        group_uid: Uid,
        owned: bool,
        members_version: i64,
    ) -> Result<GroupKey> {
        self.conn().execute(
            "INSERT INTO contact_groups (kind, group_uid, group_members_version)
             VALUES (?1, ?2, ?3)",
            params![
                if owned { "owned" } else { "joined" },
                group_uid.as_bytes(),
                members_version
            ],
        )?;
        Ok(GroupKey(self.conn().last_insert_rowid()))
    }

    pub(crate) fn link_owned_group(
        &mut self,
        group: GroupKey,
        owner: OwnedIdentityKey,
        published: GroupDetailsKey,
        latest: GroupDetailsKey,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE contact_groups
             SET owned_identity_id = ?1, published_details_id = ?2, latest_details_id = ?3
             WHERE id = ?4",
            params![owner.0, published.0, latest.0, group.0],
        )?;
        Ok(())
    }

    pub(crate) fn link_joined_group(
        &mut self,
        group: GroupKey,
        owner: OwnedIdentityKey,
        group_owner: ContactKey,
        published: GroupDetailsKey,
        trusted: GroupDetailsKey,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE contact_groups
             SET owned_identity_id = ?1, group_owner_id = ?2,
                 published_details_id = ?3, trusted_details_id = ?4
             WHERE id = ?5",
            params![owner.0, group_owner.0, published.0, trusted.0, group.0],
        )?;
        Ok(())
    }

    pub(crate) fn insert_bare_pending_member(
        &mut self,
        crypto_id: &CryptoId,
        serialized_details: &str,
        declined: bool,
    ) -> Result<PendingMemberKey> {
        self.conn().execute(
            "INSERT INTO pending_group_members (crypto_identity, serialized_details, declined)
             VALUES (?1, ?2, ?3)",
            params![crypto_id.as_bytes(), serialized_details, declined],
        )?;
        Ok(PendingMemberKey(self.conn().last_insert_rowid()))
    }

    pub(crate) fn link_pending_member(&mut self, pending: PendingMemberKey, group: GroupKey) -> Result<()> {
        self.conn().execute(
            "UPDATE pending_group_members SET group_id = ?1 WHERE id = ?2",
            params![group.0, pending.0],
        )?;
        Ok(())
    }
}
