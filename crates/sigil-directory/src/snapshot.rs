//! Snapshots of one owned identity, exchanged between devices of that
//! identity.
//!
//! Every node lists in `domain` the keys it carries. A receiver must find
//! all mandatory keys of a node in its domain; optional keys outside the
//! domain are ignored even if a value is present. Identities and UIDs are
//! the hex map keys, never node fields.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sigil_shared::{CryptoId, Uid};

use crate::backup::bare::{BareContact, BareOwnedDevice};
use crate::backup::legacy::{b64_option, decode_optional_label};
use crate::backup::{Associations, BackupNode, RestoreToken};
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::events::IdentityEvent;
use crate::models::{
    ContactKey, DetailsCore, DetailsInput, DeviceRole, GroupDetailsKey, GroupDetailsKind, GroupKey,
    GroupVariant, IdentityDetailsKind, OwnedIdentityKey, PhotoServerKeyAndLabel,
};
use crate::transaction::DirectoryTx;

const PUBLISHED_DETAILS: &str = "published_details";
const TRUSTED_DETAILS: &str = "trusted_details";
const LATEST_DETAILS: &str = "latest_details";
const CONTACTS: &str = "contacts";
const GROUPS: &str = "groups";
const TRUST_LEVEL: &str = "trust_level";
const REVOKED: &str = "revoked";
const FORCEFULLY_TRUSTED: &str = "forcefully_trusted";
const ONE_TO_ONE: &str = "one_to_one";
const GROUP_MEMBERS_VERSION: &str = "group_members_version";
const MEMBERS: &str = "members";
const PENDING_MEMBERS: &str = "pending_members";
const DECLINED: &str = "declined";
const SERIALIZED_DETAILS: &str = "serialized_details";
const VERSION: &str = "version";
const PHOTO_SERVER_KEY: &str = "photo_server_key";
const PHOTO_SERVER_LABEL: &str = "photo_server_label";

/// A node of a snapshot tree.
trait SnapshotNode {
    const MANDATORY: &'static [&'static str];

    fn domain(&self) -> &BTreeSet<String>;

    fn covers(&self, key: &str) -> bool {
        self.domain().contains(key)
    }

    /// `value` if `key` is in the domain.
    fn field<'a, T>(&self, key: &str, value: &'a Option<T>) -> Option<&'a T> {
        value.as_ref().filter(|_| self.covers(key))
    }

    fn required<'a, T>(&self, key: &str, value: &'a Option<T>) -> Result<&'a T> {
        self.field(key, value).ok_or_else(|| incomplete(key))
    }

    fn check_domain(&self) -> Result<()> {
        match Self::MANDATORY.iter().find(|key| !self.covers(key)) {
            Some(key) => Err(incomplete(key)),
            None => Ok(()),
        }
    }
}

fn incomplete(key: &str) -> DirectoryError {
    DirectoryError::malformed(format!("incomplete snapshot: missing {key}"))
}

fn domain_of(keys: &[(&str, bool)]) -> BTreeSet<String> {
    keys.iter()
        .filter(|(_, present)| *present)
        .map(|(key, _)| key.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnedIdentitySnapshotNode {
    #[serde(skip)]
    pub id: RestoreToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_details: Option<DetailsSnapshotNode>,
    /// Keyed by hex crypto identity.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contacts: BTreeMap<String, ContactSnapshotNode>,
    /// Keyed by hex group uid.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, OwnedGroupSnapshotNode>,
    pub domain: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailsSnapshotNode {
    #[serde(skip)]
    pub id: RestoreToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialized_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, with = "b64_option", skip_serializing_if = "Option::is_none")]
    pub photo_server_key: Option<Vec<u8>>,
    /// Any label representation ever written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_server_label: Option<serde_json::Value>,
    pub domain: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactSnapshotNode {
    #[serde(skip)]
    pub id: RestoreToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trusted_details: Option<DetailsSnapshotNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_details: Option<DetailsSnapshotNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forcefully_trusted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_to_one: Option<bool>,
    pub domain: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnedGroupSnapshotNode {
    #[serde(skip)]
    pub id: RestoreToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_details: Option<DetailsSnapshotNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_details: Option<DetailsSnapshotNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_members_version: Option<i64>,
    /// Hex crypto identities of joined members.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
    /// Keyed by hex crypto identity.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pending_members: BTreeMap<String, PendingMemberSnapshotNode>,
    pub domain: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingMemberSnapshotNode {
    #[serde(skip)]
    pub id: RestoreToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declined: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialized_details: Option<String>,
    pub domain: BTreeSet<String>,
}

macro_rules! snapshot_nodes {
    ($($node:ty => [$($key:expr),*]),+ $(,)?) => {
        $(
            impl SnapshotNode for $node {
                const MANDATORY: &'static [&'static str] = &[$($key),*];

                fn domain(&self) -> &BTreeSet<String> {
                    &self.domain
                }
            }

            impl BackupNode for $node {
                fn token(&self) -> RestoreToken {
                    self.id
                }
            }
        )+
    };
}

snapshot_nodes! {
    OwnedIdentitySnapshotNode => [PUBLISHED_DETAILS],
    DetailsSnapshotNode => [SERIALIZED_DETAILS, VERSION],
    ContactSnapshotNode => [TRUSTED_DETAILS, TRUST_LEVEL],
    OwnedGroupSnapshotNode => [PUBLISHED_DETAILS, GROUP_MEMBERS_VERSION],
    PendingMemberSnapshotNode => [SERIALIZED_DETAILS],
}

impl OwnedIdentitySnapshotNode {
    /// Decode a snapshot and check that every node carries its mandatory
    /// keys.
    pub fn from_json(raw: &str) -> Result<Self> {
        let node: Self = serde_json::from_str(raw)
            .map_err(|e| DirectoryError::malformed(format!("undecodable snapshot: {e}")))?;
        node.validate()?;
        Ok(node)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.check_domain()?;
        self.required(PUBLISHED_DETAILS, &self.published_details)?
            .check_domain()?;
        for contact in self.contacts().values() {
            contact.check_domain()?;
            contact.required(TRUSTED_DETAILS, &contact.trusted_details)?
                .check_domain()?;
            if let Some(published) = contact.field(PUBLISHED_DETAILS, &contact.published_details) {
                published.check_domain()?;
            }
        }
        for group in self.groups().values() {
            group.check_domain()?;
            group.required(PUBLISHED_DETAILS, &group.published_details)?
                .check_domain()?;
            if let Some(latest) = group.field(LATEST_DETAILS, &group.latest_details) {
                latest.check_domain()?;
            }
            for pending in group.pending_members().values() {
                pending.check_domain()?;
            }
        }
        Ok(())
    }

    fn contacts(&self) -> &BTreeMap<String, ContactSnapshotNode> {
        static EMPTY: BTreeMap<String, ContactSnapshotNode> = BTreeMap::new();
        if self.covers(CONTACTS) {
            &self.contacts
        } else {
            &EMPTY
        }
    }

    fn groups(&self) -> &BTreeMap<String, OwnedGroupSnapshotNode> {
        static EMPTY: BTreeMap<String, OwnedGroupSnapshotNode> = BTreeMap::new();
        if self.covers(GROUPS) {
            &self.groups
        } else {
            &EMPTY
        }
    }
}

impl OwnedGroupSnapshotNode {
    fn pending_members(&self) -> &BTreeMap<String, PendingMemberSnapshotNode> {
        static EMPTY: BTreeMap<String, PendingMemberSnapshotNode> = BTreeMap::new();
        if self.covers(PENDING_MEMBERS) {
            &self.pending_members
        } else {
            &EMPTY
        }
    }
}

impl DetailsSnapshotNode {
    fn from_core(core: &DetailsCore) -> Self {
        let server = core.photo_server.as_ref();
        let label = server.map(|s| serde_json::Value::String(s.label.to_hex()));
        Self {
            id: RestoreToken::fresh(),
            serialized_details: Some(core.serialized_core_details.clone()),
            version: Some(core.version),
            photo_server_key: server.map(|s| s.key.clone()),
            domain: domain_of(&[
                (SERIALIZED_DETAILS, true),
                (VERSION, true),
                (PHOTO_SERVER_KEY, server.is_some()),
                (PHOTO_SERVER_LABEL, label.is_some()),
            ]),
            photo_server_label: label,
        }
    }

    fn to_input(&self) -> Result<DetailsInput> {
        let key = self.field(PHOTO_SERVER_KEY, &self.photo_server_key);
        let label = decode_optional_label(
            key.is_some(),
            self.field(PHOTO_SERVER_LABEL, &self.photo_server_label),
        )
        .map_err(DirectoryError::malformed)?;

        Ok(DetailsInput {
            version: *self.required(VERSION, &self.version)?,
            serialized_core_details: self.required(SERIALIZED_DETAILS, &self.serialized_details)?.clone(),
            photo_server: key.zip(label).map(|(key, label)| PhotoServerKeyAndLabel {
                key: key.clone(),
                label,
            }),
        })
    }
}

fn crypto_id_key(hex: &str) -> Result<CryptoId> {
    CryptoId::from_hex(hex).map_err(|e| DirectoryError::malformed(format!("bad identity key {hex}: {e}")))
}

fn uid_key(hex: &str) -> Result<Uid> {
    Uid::from_hex(hex).map_err(|e| DirectoryError::malformed(format!("bad uid key {hex}: {e}")))
}

// ---------------------------------------------------------------------------
// Taking a snapshot
// ---------------------------------------------------------------------------

impl Reader<'_> {
    /// Snapshot of an owned identity: its published details, contacts and
    /// owned groups. Devices are not part of it.
    pub fn owned_identity_snapshot(&self, owned: OwnedIdentityKey) -> Result<OwnedIdentitySnapshotNode> {
        self.require_owned_identity(owned)?;
        let published = self
            .owned_published_details(owned)?
            .ok_or(DirectoryError::NotFound("owned published details"))?;

        let mut contacts = BTreeMap::new();
        for contact in self.contacts(owned)? {
            let trusted = self
                .contact_details(contact.key, IdentityDetailsKind::ContactTrusted)?
                .ok_or(DirectoryError::NotFound("contact trusted details"))?;
            let published = self
                .contact_details(contact.key, IdentityDetailsKind::ContactPublished)?
                .map(|details| DetailsSnapshotNode::from_core(&details.core));

            let node = ContactSnapshotNode {
                id: RestoreToken::fresh(),
                trusted_details: Some(DetailsSnapshotNode::from_core(&trusted.core)),
                domain: domain_of(&[
                    (TRUSTED_DETAILS, true),
                    (PUBLISHED_DETAILS, published.is_some()),
                    (TRUST_LEVEL, true),
                    (REVOKED, true),
                    (FORCEFULLY_TRUSTED, true),
                    (ONE_TO_ONE, contact.is_one_to_one.is_some()),
                ]),
                published_details: published,
                trust_level: Some(contact.trust_level),
                revoked: Some(contact.is_revoked),
                forcefully_trusted: Some(contact.is_forcefully_trusted),
                one_to_one: contact.is_one_to_one,
            };
            contacts.insert(contact.crypto_id.to_hex(), node);
        }

        let mut groups = BTreeMap::new();
        for group in self.groups(owned)? {
            let GroupVariant::Owned { latest_details } = group.variant else {
                continue;
            };
            let published = self.require_group_details(group.published_details)?;
            let latest = self.require_group_details(latest_details)?;

            let members = self
                .group_members(group.key)?
                .into_iter()
                .map(|contact| contact.crypto_id.to_hex())
                .collect();
            let pending_members = self
                .pending_members(group.key)?
                .into_iter()
                .map(|pending| {
                    let node = PendingMemberSnapshotNode {
                        id: RestoreToken::fresh(),
                        declined: Some(pending.declined),
                        serialized_details: Some(pending.serialized_details),
                        domain: domain_of(&[(DECLINED, true), (SERIALIZED_DETAILS, true)]),
                    };
                    (pending.crypto_id.to_hex(), node)
                })
                .collect();

            let node = OwnedGroupSnapshotNode {
                id: RestoreToken::fresh(),
                published_details: Some(DetailsSnapshotNode::from_core(&published.core)),
                latest_details: Some(DetailsSnapshotNode::from_core(&latest.core)),
                group_members_version: Some(group.members_version),
                members: Some(members),
                pending_members,
                domain: domain_of(&[
                    (PUBLISHED_DETAILS, true),
                    (LATEST_DETAILS, true),
                    (GROUP_MEMBERS_VERSION, true),
                    (MEMBERS, true),
                    (PENDING_MEMBERS, true),
                ]),
            };
            groups.insert(group.group_uid.to_hex(), node);
        }

        Ok(OwnedIdentitySnapshotNode {
            id: RestoreToken::fresh(),
            published_details: Some(DetailsSnapshotNode::from_core(&published.core)),
            contacts,
            groups,
            domain: domain_of(&[(PUBLISHED_DETAILS, true), (CONTACTS, true), (GROUPS, true)]),
        })
    }
}

// ---------------------------------------------------------------------------
// Restoring a snapshot
// ---------------------------------------------------------------------------

impl DirectoryTx<'_> {
    /// Create `owned_crypto_id` from a snapshot, with a fresh current device.
    /// The identity must not exist yet.
    pub fn restore_snapshot(
        &mut self,
        owned_crypto_id: &CryptoId,
        current_device_uid: Uid,
        node: &OwnedIdentitySnapshotNode,
    ) -> Result<OwnedIdentityKey> {
        node.validate()?;
        if self.reader().owned_identity_by_crypto_id(owned_crypto_id)?.is_some() {
            return Err(DirectoryError::duplicate("owned identity", owned_crypto_id.short()));
        }

        self.changes.suspend();
        let result = self.restore_snapshot_nodes(owned_crypto_id, current_device_uid, node);
        self.changes.resume();
        let owned = result?;

        self.changes.push_event(IdentityEvent::BackupRestored {
            owned_identity: owned_crypto_id.clone(),
        });
        tracing::info!(owned = %owned_crypto_id.short(), "snapshot restored");
        Ok(owned)
    }

    fn restore_snapshot_nodes(
        &mut self,
        owned_crypto_id: &CryptoId,
        current_device_uid: Uid,
        node: &OwnedIdentitySnapshotNode,
    ) -> Result<OwnedIdentityKey> {
        let mut associations = Associations::default();
        let owned_bytes = owned_crypto_id.as_bytes();
        // Group details have no node of their own when latest defaults to
        // published.
        let mut group_details: HashMap<RestoreToken, (GroupDetailsKey, GroupDetailsKey)> =
            HashMap::new();

        // Phase 1: bare rows.
        let owned = self.insert_bare_owned_identity(owned_crypto_id, true)?;
        associations.associate(node, owned)?;
        let device = self.insert_bare_owned_device(&BareOwnedDevice {
            uid: current_device_uid,
            name: None,
            capabilities: None,
            expiration: None,
            latest_registration: None,
        })?;

        let published = node.required(PUBLISHED_DETAILS, &node.published_details)?;
        let published_key =
            self.insert_bare_identity_details(IdentityDetailsKind::OwnedPublished, &published.to_input()?)?;

        for (hex, contact) in node.contacts() {
            let crypto_id = crypto_id_key(hex)?;
            associations.claim("contact", owned_bytes, crypto_id.as_bytes())?;
            let key = self.insert_bare_contact(&BareContact {
                crypto_id: &crypto_id,
                trust_level: contact.required(TRUST_LEVEL, &contact.trust_level)?,
                revoked: contact.field(REVOKED, &contact.revoked).copied().unwrap_or(false),
                forcefully_trusted: contact
                    .field(FORCEFULLY_TRUSTED, &contact.forcefully_trusted)
                    .copied()
                    .unwrap_or(false),
                one_to_one: contact.field(ONE_TO_ONE, &contact.one_to_one).copied(),
            })?;
            associations.associate(contact, key)?;
            associations.register_contact(owned_bytes, crypto_id.as_bytes(), key);

            let trusted = contact.required(TRUSTED_DETAILS, &contact.trusted_details)?;
            let trusted_key =
                self.insert_bare_identity_details(IdentityDetailsKind::ContactTrusted, &trusted.to_input()?)?;
            associations.associate(trusted, trusted_key)?;
            if let Some(published) = contact.field(PUBLISHED_DETAILS, &contact.published_details) {
                let key = self
                    .insert_bare_identity_details(IdentityDetailsKind::ContactPublished, &published.to_input()?)?;
                associations.associate(published, key)?;
            }
        }

        for (hex, group) in node.groups() {
            let group_uid = uid_key(hex)?;
            associations.claim("owned group", owned_bytes, group_uid.as_bytes())?;
            let version = *group.required(GROUP_MEMBERS_VERSION, &group.group_members_version)?;
            let key = self.insert_bare_group(group_uid, true, version)?;
            associations.associate(group, key)?;

            let published = group.required(PUBLISHED_DETAILS, &group.published_details)?;
            let published_input = published.to_input()?;
            let latest_input = match group.field(LATEST_DETAILS, &group.latest_details) {
                Some(latest) => latest.to_input()?,
                None => published_input.clone(),
            };
            let published_key =
                self.insert_group_details(GroupDetailsKind::Published, &published_input, None)?;
            let latest_key = self.insert_group_details(GroupDetailsKind::Latest, &latest_input, None)?;
            group_details.insert(group.id, (published_key, latest_key));

            for (hex, pending) in group.pending_members() {
                let crypto_id = crypto_id_key(hex)?;
                associations.claim("pending member", group_uid.as_bytes(), crypto_id.as_bytes())?;
                let key = self.insert_bare_pending_member(
                    &crypto_id,
                    pending.required(SERIALIZED_DETAILS, &pending.serialized_details)?,
                    pending.field(DECLINED, &pending.declined).copied().unwrap_or(false),
                )?;
                associations.associate(pending, key)?;
            }
        }

        // Phase 2: relationships.
        self.link_owned_device(device, owned, DeviceRole::Current)?;
        self.link_owned_details(published_key, owned)?;

        for contact in node.contacts().values() {
            let key: ContactKey = associations.get(contact)?;
            self.link_contact(key, owned)?;
            if let Some(trusted) = contact.field(TRUSTED_DETAILS, &contact.trusted_details) {
                self.link_contact_details(associations.get(trusted)?, key)?;
            }
            if let Some(published) = contact.field(PUBLISHED_DETAILS, &contact.published_details) {
                self.link_contact_details(associations.get(published)?, key)?;
            }
        }

        for group in node.groups().values() {
            let key: GroupKey = associations.get(group)?;
            let (published, latest) = group_details
                .get(&group.id)
                .copied()
                .ok_or_else(|| DirectoryError::malformed("group details were never restored"))?;
            self.link_owned_group(key, owned, published, latest)?;

            for hex in group.field(MEMBERS, &group.members).into_iter().flatten() {
                let member = crypto_id_key(hex)?;
                let contact = associations
                    .contact(owned_bytes, member.as_bytes())
                    .ok_or_else(|| {
                        DirectoryError::malformed(format!("group member {} is not a contact", member.short()))
                    })?;
                self.insert_group_member(key, contact)?;
            }
            for pending in group.pending_members().values() {
                self.link_pending_member(associations.get(pending)?, key)?;
            }
        }

        self.validate_restored_identity(owned)
            .map_err(|e| DirectoryError::malformed(format!("restored snapshot is inconsistent: {e}")))?;
        Ok(owned)
    }
}
