//! Serialized form of a directory backup.
//!
//! Items mirror the entity graph of one owned identity. Joined groups are
//! nested under the contact that owns them. Relationship keys never appear:
//! members are named by crypto identity and everything else by nesting.

use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sigil_shared::constants::BACKUP_FORMAT_VERSION;
use sigil_shared::{CryptoId, GroupV2Category, GroupV2Identifier, Uid};

use super::associations::{BackupNode, RestoreToken};
use super::legacy::{b64_crypto_id, b64_option, b64_uid, b64_uid_option, decode_optional_label};
use crate::error::{DirectoryError, Result};
use crate::models::{DetailsCore, DetailsInput, PhotoServerKeyAndLabel, UserDataTarget};

/// Backup of every owned identity of a directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryBackup {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub owned_identities: Vec<OwnedIdentityBackupItem>,
}

impl DirectoryBackup {
    pub fn from_json(raw: &str) -> Result<Self> {
        let backup: Self = serde_json::from_str(raw)
            .map_err(|e| DirectoryError::malformed(format!("undecodable backup: {e}")))?;
        if backup.version > BACKUP_FORMAT_VERSION {
            return Err(DirectoryError::malformed(format!(
                "unsupported backup version {}",
                backup.version
            )));
        }
        Ok(backup)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedIdentityBackupItem {
    #[serde(skip)]
    pub token: RestoreToken,
    #[serde(with = "b64_crypto_id")]
    pub owned_identity: CryptoId,
    #[serde(default = "default_true")]
    pub active: bool,
    pub published_details: DetailsBackupItem,
    #[serde(default)]
    pub devices: Vec<OwnedDeviceBackupItem>,
    #[serde(default)]
    pub contact_identities: Vec<ContactIdentityBackupItem>,
    #[serde(default)]
    pub owned_groups: Vec<ContactGroupOwnedBackupItem>,
    #[serde(default)]
    pub server_user_data: Vec<ServerUserDataBackupItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnedDeviceBackupItem {
    #[serde(skip)]
    pub token: RestoreToken,
    #[serde(with = "b64_uid")]
    pub uid: Uid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Raw values; unknown capabilities are dropped on restore.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_registration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactIdentityBackupItem {
    #[serde(skip)]
    pub token: RestoreToken,
    #[serde(with = "b64_crypto_id")]
    pub contact_identity: CryptoId,
    pub trust_level: String,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub forcefully_trusted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_to_one: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_details: Option<DetailsBackupItem>,
    pub trusted_details: DetailsBackupItem,
    #[serde(default)]
    pub devices: Vec<ContactDeviceBackupItem>,
    #[serde(default)]
    pub contact_groups: Vec<ContactGroupJoinedBackupItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactDeviceBackupItem {
    #[serde(skip)]
    pub token: RestoreToken,
    #[serde(with = "b64_uid")]
    pub uid: Uid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_channel_creation_ping: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Details
// ---------------------------------------------------------------------------

/// Content of an identity or group details row. Photo files are not backed
/// up; the server key and label are.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawDetailsItem")]
pub struct DetailsBackupItem {
    #[serde(skip)]
    pub token: RestoreToken,
    #[serde(with = "b64_option", skip_serializing_if = "Option::is_none")]
    pub photo_server_key: Option<Vec<u8>>,
    #[serde(
        serialize_with = "b64_uid_option::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub photo_server_label: Option<Uid>,
    pub serialized_details: String,
    pub version: i64,
}

/// Details as written by any engine version. Labels may be in a legacy
/// representation.
#[derive(Deserialize)]
struct RawDetailsItem {
    #[serde(default, with = "b64_option")]
    photo_server_key: Option<Vec<u8>>,
    #[serde(default)]
    photo_server_label: Option<serde_json::Value>,
    serialized_details: String,
    version: i64,
}

impl TryFrom<RawDetailsItem> for DetailsBackupItem {
    type Error = String;

    fn try_from(raw: RawDetailsItem) -> std::result::Result<Self, Self::Error> {
        let photo_server_label = decode_optional_label(
            raw.photo_server_key.is_some(),
            raw.photo_server_label.as_ref(),
        )?;
        Ok(Self {
            token: RestoreToken::fresh(),
            photo_server_key: raw.photo_server_key,
            photo_server_label,
            serialized_details: raw.serialized_details,
            version: raw.version,
        })
    }
}

impl DetailsBackupItem {
    /// Same content under a fresh token.
    pub fn duplicate(&self) -> Self {
        Self {
            token: RestoreToken::fresh(),
            ..self.clone()
        }
    }

    pub fn to_input(&self) -> DetailsInput {
        let photo_server = match (&self.photo_server_key, self.photo_server_label) {
            (Some(key), Some(label)) => Some(PhotoServerKeyAndLabel {
                key: key.clone(),
                label,
            }),
            _ => None,
        };
        DetailsInput {
            version: self.version,
            serialized_core_details: self.serialized_details.clone(),
            photo_server,
        }
    }
}

impl From<&DetailsCore> for DetailsBackupItem {
    fn from(core: &DetailsCore) -> Self {
        Self {
            token: RestoreToken::fresh(),
            photo_server_key: core.photo_server.as_ref().map(|s| s.key.clone()),
            photo_server_label: core.photo_server.as_ref().map(|s| s.label),
            serialized_details: core.serialized_core_details.clone(),
            version: core.version,
        }
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// A group owned by the owned identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawOwnedGroup", into = "RawOwnedGroup")]
pub struct ContactGroupOwnedBackupItem {
    pub token: RestoreToken,
    pub group_uid: Uid,
    pub group_members_version: i64,
    pub published_details: DetailsBackupItem,
    pub latest_details: DetailsBackupItem,
    pub members: Vec<GroupMemberBackupItem>,
    pub pending_members: Vec<PendingGroupMemberBackupItem>,
}

#[derive(Serialize, Deserialize)]
struct RawOwnedGroup {
    #[serde(with = "b64_uid")]
    group_uid: Uid,
    #[serde(default)]
    group_members_version: i64,
    published_details: DetailsBackupItem,
    /// Omitted when it matches the published version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latest_details: Option<DetailsBackupItem>,
    #[serde(default)]
    members: Vec<GroupMemberBackupItem>,
    #[serde(default)]
    pending_members: Vec<PendingGroupMemberBackupItem>,
}

impl From<RawOwnedGroup> for ContactGroupOwnedBackupItem {
    fn from(raw: RawOwnedGroup) -> Self {
        let latest_details = raw
            .latest_details
            .unwrap_or_else(|| raw.published_details.duplicate());
        Self {
            token: RestoreToken::fresh(),
            group_uid: raw.group_uid,
            group_members_version: raw.group_members_version,
            published_details: raw.published_details,
            latest_details,
            members: raw.members,
            pending_members: raw.pending_members,
        }
    }
}

impl From<ContactGroupOwnedBackupItem> for RawOwnedGroup {
    fn from(item: ContactGroupOwnedBackupItem) -> Self {
        let latest_details = (item.latest_details.version != item.published_details.version)
            .then_some(item.latest_details);
        Self {
            group_uid: item.group_uid,
            group_members_version: item.group_members_version,
            published_details: item.published_details,
            latest_details,
            members: item.members,
            pending_members: item.pending_members,
        }
    }
}

/// A group joined by the owned identity, nested under the contact owning it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawJoinedGroup", into = "RawJoinedGroup")]
pub struct ContactGroupJoinedBackupItem {
    pub token: RestoreToken,
    pub group_uid: Uid,
    pub group_members_version: i64,
    pub trusted_details: DetailsBackupItem,
    pub published_details: DetailsBackupItem,
    pub members: Vec<GroupMemberBackupItem>,
    pub pending_members: Vec<PendingGroupMemberBackupItem>,
}

#[derive(Serialize, Deserialize)]
struct RawJoinedGroup {
    #[serde(with = "b64_uid")]
    group_uid: Uid,
    #[serde(default)]
    group_members_version: i64,
    trusted_details: DetailsBackupItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    published_details: Option<DetailsBackupItem>,
    #[serde(default)]
    members: Vec<GroupMemberBackupItem>,
    #[serde(default)]
    pending_members: Vec<PendingGroupMemberBackupItem>,
}

impl From<RawJoinedGroup> for ContactGroupJoinedBackupItem {
    fn from(raw: RawJoinedGroup) -> Self {
        let published_details = raw
            .published_details
            .unwrap_or_else(|| raw.trusted_details.duplicate());
        Self {
            token: RestoreToken::fresh(),
            group_uid: raw.group_uid,
            group_members_version: raw.group_members_version,
            trusted_details: raw.trusted_details,
            published_details,
            members: raw.members,
            pending_members: raw.pending_members,
        }
    }
}

impl From<ContactGroupJoinedBackupItem> for RawJoinedGroup {
    fn from(item: ContactGroupJoinedBackupItem) -> Self {
        let published_details = (item.published_details.version != item.trusted_details.version)
            .then_some(item.published_details);
        Self {
            group_uid: item.group_uid,
            group_members_version: item.group_members_version,
            trusted_details: item.trusted_details,
            published_details,
            members: item.members,
            pending_members: item.pending_members,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMemberBackupItem {
    #[serde(skip)]
    pub token: RestoreToken,
    #[serde(with = "b64_crypto_id")]
    pub contact_identity: CryptoId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingGroupMemberBackupItem {
    #[serde(skip)]
    pub token: RestoreToken,
    #[serde(with = "b64_crypto_id")]
    pub contact_identity: CryptoId,
    #[serde(default)]
    pub declined: bool,
    pub serialized_details: String,
}

// ---------------------------------------------------------------------------
// Server user data
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerUserDataBackupItem {
    #[serde(skip)]
    pub token: RestoreToken,
    #[serde(with = "b64_uid")]
    pub label: Uid,
    pub next_refresh_timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub target: UserDataTargetBackupItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UserDataTargetBackupItem {
    Identity,
    Group {
        #[serde(with = "b64_uid")]
        group_uid: Uid,
    },
    GroupV2 {
        #[serde(with = "b64_uid")]
        group_v2_uid: Uid,
        server_url: String,
        category: GroupV2Category,
    },
}

impl From<&UserDataTarget> for UserDataTargetBackupItem {
    fn from(target: &UserDataTarget) -> Self {
        match target {
            UserDataTarget::Identity => Self::Identity,
            UserDataTarget::Group { group_uid } => Self::Group {
                group_uid: *group_uid,
            },
            UserDataTarget::GroupV2 { group } => Self::GroupV2 {
                group_v2_uid: group.uid,
                server_url: group.server_url.clone(),
                category: group.category,
            },
        }
    }
}

impl From<&UserDataTargetBackupItem> for UserDataTarget {
    fn from(item: &UserDataTargetBackupItem) -> Self {
        match item {
            UserDataTargetBackupItem::Identity => Self::Identity,
            UserDataTargetBackupItem::Group { group_uid } => Self::Group {
                group_uid: *group_uid,
            },
            UserDataTargetBackupItem::GroupV2 {
                group_v2_uid,
                server_url,
                category,
            } => Self::GroupV2 {
                group: GroupV2Identifier {
                    uid: *group_v2_uid,
                    server_url: server_url.clone(),
                    category: *category,
                },
            },
        }
    }
}

/// Items are equal when they are the same decoded node.
macro_rules! backup_nodes {
    ($($item:ty),+ $(,)?) => {
        $(
            impl BackupNode for $item {
                fn token(&self) -> RestoreToken {
                    self.token
                }
            }

            impl PartialEq for $item {
                fn eq(&self, other: &Self) -> bool {
                    self.token == other.token
                }
            }

            impl Eq for $item {}

            impl Hash for $item {
                fn hash<H: Hasher>(&self, state: &mut H) {
                    self.token.hash(state);
                }
            }
        )+
    };
}

backup_nodes! {
    OwnedIdentityBackupItem,
    OwnedDeviceBackupItem,
    ContactIdentityBackupItem,
    ContactDeviceBackupItem,
    DetailsBackupItem,
    ContactGroupOwnedBackupItem,
    ContactGroupJoinedBackupItem,
    GroupMemberBackupItem,
    PendingGroupMemberBackupItem,
    ServerUserDataBackupItem,
}
