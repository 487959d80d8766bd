//! Entity types stored in the directory.
//!
//! Entities never hold references to each other. Every relationship is a
//! typed key (the SQLite row id of the target) resolved on demand through a
//! [`Reader`](crate::database::Reader).

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use serde::{Deserialize, Serialize};
use sigil_shared::{Capability, CryptoId, GroupV2Identifier, Uid};

use crate::error::RowInvariant;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

macro_rules! entity_keys {
    ($($name:ident => $variant:ident),+ $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            pub struct $name(pub i64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}#{}", stringify!($variant), self.0)
                }
            }

            impl From<$name> for EntityKey {
                fn from(key: $name) -> Self {
                    EntityKey::$variant(key)
                }
            }

            impl TryFrom<EntityKey> for $name {
                type Error = EntityKey;

                fn try_from(key: EntityKey) -> Result<Self, Self::Error> {
                    match key {
                        EntityKey::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )+

        /// Any entity key, used where entities of several kinds are tracked together.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EntityKey {
            $($variant($name)),+
        }

        impl fmt::Display for EntityKey {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $(EntityKey::$variant(key) => fmt::Display::fmt(key, f)),+
                }
            }
        }
    };
}

entity_keys! {
    OwnedIdentityKey => OwnedIdentity,
    OwnedDeviceKey => OwnedDevice,
    ContactKey => Contact,
    ContactDeviceKey => ContactDevice,
    IdentityDetailsKey => IdentityDetails,
    GroupKey => Group,
    GroupDetailsKey => GroupDetails,
    PendingMemberKey => PendingMember,
    ServerUserDataKey => ServerUserData,
}

// ---------------------------------------------------------------------------
// Owned identity & devices
// ---------------------------------------------------------------------------

/// The local identity owning a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedIdentity {
    pub key: OwnedIdentityKey,
    pub crypto_id: CryptoId,
    pub is_active: bool,
}

/// Exactly one of the two roles holds for every owned device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceRole {
    Current,
    Remote,
}

/// A device of an owned identity: this running instance or a remote one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedDevice {
    pub key: OwnedDeviceKey,
    pub uid: Uid,
    pub owner: OwnedIdentityKey,
    pub role: DeviceRole,
    pub name: Option<String>,
    /// `None` until the device has advertised its capabilities once.
    pub capabilities: Option<BTreeSet<Capability>>,
    pub expiration: Option<DateTime<Utc>>,
    pub latest_registration: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub key: ContactKey,
    pub crypto_id: CryptoId,
    pub owner: OwnedIdentityKey,
    /// Raw trust level as produced by the trust engine.
    pub trust_level: String,
    pub is_revoked: bool,
    pub is_forcefully_trusted: bool,
    pub is_one_to_one: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactDevice {
    pub key: ContactDeviceKey,
    pub uid: Uid,
    pub contact: ContactKey,
    pub capabilities: Option<BTreeSet<Capability>>,
    pub latest_channel_creation_ping: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Details
// ---------------------------------------------------------------------------

/// Key and label of a photo uploaded to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoServerKeyAndLabel {
    pub key: Vec<u8>,
    pub label: Uid,
}

/// Fields shared by every details variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailsCore {
    pub version: i64,
    pub serialized_core_details: String,
    /// File name relative to the managed photo directory.
    pub photo_filename: Option<String>,
    pub photo_server: Option<PhotoServerKeyAndLabel>,
}

/// Caller-supplied content for a details object. Photos are set separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailsInput {
    pub version: i64,
    pub serialized_core_details: String,
    pub photo_server: Option<PhotoServerKeyAndLabel>,
}

impl DetailsInput {
    pub fn new(version: i64, serialized_core_details: impl Into<String>) -> Self {
        Self {
            version,
            serialized_core_details: serialized_core_details.into(),
            photo_server: None,
        }
    }

    pub fn with_photo_server(mut self, key: Vec<u8>, label: Uid) -> Self {
        self.photo_server = Some(PhotoServerKeyAndLabel { key, label });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityDetailsKind {
    OwnedPublished,
    ContactPublished,
    ContactTrusted,
}

impl IdentityDetailsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OwnedPublished => "owned_published",
            Self::ContactPublished => "contact_published",
            Self::ContactTrusted => "contact_trusted",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "owned_published" => Some(Self::OwnedPublished),
            "contact_published" => Some(Self::ContactPublished),
            "contact_trusted" => Some(Self::ContactTrusted),
            _ => None,
        }
    }
}

/// Who a set of identity details describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailsOwner {
    Owned(OwnedIdentityKey),
    Contact(ContactKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityDetails {
    pub key: IdentityDetailsKey,
    pub kind: IdentityDetailsKind,
    pub owner: DetailsOwner,
    pub core: DetailsCore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupDetailsKind {
    /// Owner's working draft.
    Latest,
    /// What the group owner announced.
    Published,
    /// What we accepted from the group owner.
    Trusted,
}

impl GroupDetailsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Latest => "latest",
            Self::Published => "published",
            Self::Trusted => "trusted",
        }
    }

    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw {
            "latest" => Some(Self::Latest),
            "published" => Some(Self::Published),
            "trusted" => Some(Self::Trusted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDetails {
    pub key: GroupDetailsKey,
    pub kind: GroupDetailsKind,
    pub core: DetailsCore,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupVariant {
    Owned {
        latest_details: GroupDetailsKey,
    },
    Joined {
        group_owner: ContactKey,
        trusted_details: GroupDetailsKey,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactGroup {
    pub key: GroupKey,
    pub group_uid: Uid,
    pub owner: OwnedIdentityKey,
    pub members_version: i64,
    pub published_details: GroupDetailsKey,
    pub variant: GroupVariant,
}

impl ContactGroup {
    pub fn is_owned(&self) -> bool {
        matches!(self.variant, GroupVariant::Owned { .. })
    }
}

/// An invited participant of a group that has not joined yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGroupMember {
    pub key: PendingMemberKey,
    pub group: GroupKey,
    pub crypto_id: CryptoId,
    pub serialized_details: String,
    pub declined: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMemberInput {
    pub crypto_id: CryptoId,
    pub serialized_details: String,
}

// ---------------------------------------------------------------------------
// Server user data
// ---------------------------------------------------------------------------

/// What a server-hosted asset belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserDataTarget {
    Identity,
    Group { group_uid: Uid },
    GroupV2 { group: GroupV2Identifier },
}

impl UserDataTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Group { .. } => "group",
            Self::GroupV2 { .. } => "group_v2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerUserData {
    pub key: ServerUserDataKey,
    pub owned_identity: CryptoId,
    pub label: Uid,
    pub next_refresh: DateTime<Utc>,
    pub target: UserDataTarget,
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

pub(crate) fn invalid_column(idx: usize, message: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(RowInvariant(message.into())))
}

pub(crate) fn uid_column(idx: usize, bytes: Vec<u8>) -> rusqlite::Result<Uid> {
    Uid::from_slice(&bytes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
}

pub(crate) fn crypto_id_column(idx: usize, bytes: Vec<u8>) -> rusqlite::Result<CryptoId> {
    CryptoId::from_bytes(bytes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
}

pub(crate) fn timestamp_column(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Read the shared details columns, starting at `start`: version, serialized
/// core, photo file name, server key, server label.
pub(crate) fn details_core_columns(
    row: &rusqlite::Row<'_>,
    start: usize,
) -> rusqlite::Result<DetailsCore> {
    Ok(DetailsCore {
        version: row.get(start)?,
        serialized_core_details: row.get(start + 1)?,
        photo_filename: row.get(start + 2)?,
        photo_server: photo_server_columns(start + 4, row.get(start + 3)?, row.get(start + 4)?)?,
    })
}

pub(crate) fn photo_server_columns(
    idx: usize,
    key: Option<Vec<u8>>,
    label: Option<Vec<u8>>,
) -> rusqlite::Result<Option<PhotoServerKeyAndLabel>> {
    match (key, label) {
        (Some(key), Some(label)) => Ok(Some(PhotoServerKeyAndLabel {
            key,
            label: uid_column(idx, label)?,
        })),
        _ => Ok(None),
    }
}
