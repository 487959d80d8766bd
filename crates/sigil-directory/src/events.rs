//! Events emitted after a directory transaction durably commits, and the
//! sinks that deliver them.

use std::sync::Arc;

use serde::Serialize;
use sigil_shared::{CryptoId, Uid};
use thiserror::Error;
use tokio::sync::broadcast;

pub const EVENT_NEW_CONTACT_DEVICE: &str = "new-contact-device";
pub const EVENT_DELETED_CONTACT_DEVICE: &str = "deleted-contact-device";
pub const EVENT_CONTACT_CAPABILITIES_UPDATED: &str = "contact-capabilities-updated";
pub const EVENT_NEW_REMOTE_OWNED_DEVICE: &str = "new-remote-owned-device";
pub const EVENT_DELETED_REMOTE_OWNED_DEVICE: &str = "deleted-remote-owned-device";
pub const EVENT_OWNED_CAPABILITIES_UPDATED: &str = "owned-capabilities-updated";
pub const EVENT_OWNED_DEVICE_UPDATED: &str = "owned-device-updated";
pub const EVENT_OWNED_DEVICE_DELETED: &str = "owned-device-deleted";
pub const EVENT_PUBLISHED_CONTACT_PHOTO_UPDATED: &str = "published-contact-photo-updated";
pub const EVENT_TRUSTED_CONTACT_PHOTO_UPDATED: &str = "trusted-contact-photo-updated";
pub const EVENT_OWNED_IDENTITY_PHOTO_UPDATED: &str = "owned-identity-photo-updated";
pub const EVENT_LATEST_PHOTO_OF_OWNED_GROUP_UPDATED: &str = "latest-photo-of-owned-group-updated";
pub const EVENT_PUBLISHED_PHOTO_OF_OWNED_GROUP_UPDATED: &str =
    "published-photo-of-owned-group-updated";
pub const EVENT_PUBLISHED_PHOTO_OF_JOINED_GROUP_UPDATED: &str =
    "published-photo-of-joined-group-updated";
pub const EVENT_TRUSTED_PHOTO_OF_JOINED_GROUP_UPDATED: &str =
    "trusted-photo-of-joined-group-updated";
pub const EVENT_NEW_OWNED_GROUP: &str = "new-owned-group";
pub const EVENT_OWNED_GROUP_LATEST_DETAILS_UPDATED: &str = "owned-group-latest-details-updated";
pub const EVENT_OWNED_GROUP_LATEST_DETAILS_DISCARDED: &str = "owned-group-latest-details-discarded";
pub const EVENT_PENDING_MEMBER_DECLINED: &str = "pending-member-declined";
pub const EVENT_PENDING_MEMBER_UNDECLINED: &str = "pending-member-undeclined";
pub const EVENT_SERVER_LABEL_DELETED: &str = "server-label-deleted";
pub const EVENT_BACKUP_RESTORED: &str = "backup-restored";
pub const EVENT_BACKUPABLE_CONTENT_CHANGED: &str = "backupable-content-changed";

/// A committed change, tagged by name. The payload shape is part of the
/// contract with the rest of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum IdentityEvent {
    NewContactDevice {
        owned_identity: CryptoId,
        contact_identity: CryptoId,
        device_uid: Uid,
        created_during_channel_creation: bool,
    },
    DeletedContactDevice {
        owned_identity: CryptoId,
        contact_identity: CryptoId,
        device_uid: Uid,
    },
    ContactCapabilitiesUpdated {
        owned_identity: CryptoId,
        contact_identity: CryptoId,
    },
    NewRemoteOwnedDevice {
        owned_identity: CryptoId,
        device_uid: Uid,
    },
    DeletedRemoteOwnedDevice {
        owned_identity: CryptoId,
        device_uid: Uid,
    },
    OwnedCapabilitiesUpdated {
        owned_identity: CryptoId,
    },
    OwnedDeviceUpdated {
        owned_identity: CryptoId,
        device_uid: Uid,
    },
    OwnedDeviceDeleted {
        owned_identity: CryptoId,
        device_uid: Uid,
    },
    PublishedContactPhotoUpdated {
        owned_identity: CryptoId,
        contact_identity: CryptoId,
    },
    TrustedContactPhotoUpdated {
        owned_identity: CryptoId,
        contact_identity: CryptoId,
    },
    OwnedIdentityPhotoUpdated {
        owned_identity: CryptoId,
    },
    LatestPhotoOfOwnedGroupUpdated {
        owned_identity: CryptoId,
        group_uid: Uid,
    },
    PublishedPhotoOfOwnedGroupUpdated {
        owned_identity: CryptoId,
        group_uid: Uid,
    },
    PublishedPhotoOfJoinedGroupUpdated {
        owned_identity: CryptoId,
        group_uid: Uid,
        group_owner: CryptoId,
    },
    TrustedPhotoOfJoinedGroupUpdated {
        owned_identity: CryptoId,
        group_uid: Uid,
        group_owner: CryptoId,
    },
    NewOwnedGroup {
        owned_identity: CryptoId,
        group_uid: Uid,
    },
    OwnedGroupLatestDetailsUpdated {
        owned_identity: CryptoId,
        group_uid: Uid,
    },
    OwnedGroupLatestDetailsDiscarded {
        owned_identity: CryptoId,
        group_uid: Uid,
    },
    PendingMemberDeclined {
        owned_identity: CryptoId,
        group_uid: Uid,
        contact_identity: CryptoId,
    },
    PendingMemberUndeclined {
        owned_identity: CryptoId,
        group_uid: Uid,
        contact_identity: CryptoId,
    },
    ServerLabelDeleted {
        owned_identity: CryptoId,
        label: Uid,
    },
    BackupRestored {
        owned_identity: CryptoId,
    },
    BackupableContentChanged,
}

impl IdentityEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewContactDevice { .. } => EVENT_NEW_CONTACT_DEVICE,
            Self::DeletedContactDevice { .. } => EVENT_DELETED_CONTACT_DEVICE,
            Self::ContactCapabilitiesUpdated { .. } => EVENT_CONTACT_CAPABILITIES_UPDATED,
            Self::NewRemoteOwnedDevice { .. } => EVENT_NEW_REMOTE_OWNED_DEVICE,
            Self::DeletedRemoteOwnedDevice { .. } => EVENT_DELETED_REMOTE_OWNED_DEVICE,
            Self::OwnedCapabilitiesUpdated { .. } => EVENT_OWNED_CAPABILITIES_UPDATED,
            Self::OwnedDeviceUpdated { .. } => EVENT_OWNED_DEVICE_UPDATED,
            Self::OwnedDeviceDeleted { .. } => EVENT_OWNED_DEVICE_DELETED,
            Self::PublishedContactPhotoUpdated { .. } => EVENT_PUBLISHED_CONTACT_PHOTO_UPDATED,
            Self::TrustedContactPhotoUpdated { .. } => EVENT_TRUSTED_CONTACT_PHOTO_UPDATED,
            Self::OwnedIdentityPhotoUpdated { .. } => EVENT_OWNED_IDENTITY_PHOTO_UPDATED,
            Self::LatestPhotoOfOwnedGroupUpdated { .. } => EVENT_LATEST_PHOTO_OF_OWNED_GROUP_UPDATED,
            Self::PublishedPhotoOfOwnedGroupUpdated { .. } => {
                EVENT_PUBLISHED_PHOTO_OF_OWNED_GROUP_UPDATED
            }
            Self::PublishedPhotoOfJoinedGroupUpdated { .. } => {
                EVENT_PUBLISHED_PHOTO_OF_JOINED_GROUP_UPDATED
            }
            Self::TrustedPhotoOfJoinedGroupUpdated { .. } => {
                EVENT_TRUSTED_PHOTO_OF_JOINED_GROUP_UPDATED
            }
            Self::NewOwnedGroup { .. } => EVENT_NEW_OWNED_GROUP,
            Self::OwnedGroupLatestDetailsUpdated { .. } => EVENT_OWNED_GROUP_LATEST_DETAILS_UPDATED,
            Self::OwnedGroupLatestDetailsDiscarded { .. } => {
                EVENT_OWNED_GROUP_LATEST_DETAILS_DISCARDED
            }
            Self::PendingMemberDeclined { .. } => EVENT_PENDING_MEMBER_DECLINED,
            Self::PendingMemberUndeclined { .. } => EVENT_PENDING_MEMBER_UNDECLINED,
            Self::ServerLabelDeleted { .. } => EVENT_SERVER_LABEL_DELETED,
            Self::BackupRestored { .. } => EVENT_BACKUP_RESTORED,
            Self::BackupableContentChanged => EVENT_BACKUPABLE_CONTENT_CHANGED,
        }
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("No subscriber is listening")]
    NoSubscribers,

    #[error("Sink failure: {0}")]
    Other(String),
}

/// Receives events once a transaction has committed. Implementations must
/// not block: posting happens on the committing thread.
pub trait NotificationSink: Send + Sync {
    fn post(&self, event: &IdentityEvent) -> Result<(), SinkError>;
}

/// Fan-out sink backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<IdentityEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn post(&self, event: &IdentityEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| SinkError::NoSubscribers)
    }
}

/// Deliver committed events. Never fails: the data is already durable, so
/// delivery problems are only logged.
pub(crate) fn emit_events(sink: Option<&Arc<dyn NotificationSink>>, events: &[IdentityEvent]) {
    let Some(sink) = sink else {
        if !events.is_empty() {
            tracing::error!(
                dropped = events.len(),
                "no notification sink attached, dropping events"
            );
        }
        return;
    };

    for event in events {
        if let Err(e) = sink.post(event) {
            tracing::error!(event = event.name(), error = %e, "Failed to emit event");
        }
    }
}
