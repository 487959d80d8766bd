//! Backup and restore of the identity graph.
//!
//! A backup is a JSON tree of items, one [`OwnedIdentityBackupItem`] per
//! owned identity. Restoring it replaces the owned identities it names.

mod associations;
pub(crate) mod bare;
mod export;
mod items;
pub(crate) mod legacy;
mod restore;

pub(crate) use associations::Associations;
pub use associations::{BackupNode, RestoreToken};
pub use items::{
    ContactDeviceBackupItem, ContactGroupJoinedBackupItem, ContactGroupOwnedBackupItem,
    ContactIdentityBackupItem, DetailsBackupItem, DirectoryBackup, GroupMemberBackupItem,
    OwnedDeviceBackupItem, OwnedIdentityBackupItem, PendingGroupMemberBackupItem,
    ServerUserDataBackupItem, UserDataTargetBackupItem,
};
pub use restore::RestoreStats;
