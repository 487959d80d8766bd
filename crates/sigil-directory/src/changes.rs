//! Per-transaction change capture.
//!
//! Mutations record what happened to which entity while the transaction is
//! open. Nothing is emitted until commit: at that point every tracked entity
//! is turned into zero or more [`IdentityEvent`]s, one per logical change.
//! Deletions carry a [`Subject`] captured before the row was removed, since
//! relationships are gone by the time events are built.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use sigil_shared::{Capability, CryptoId, Uid};

use crate::events::IdentityEvent;
use crate::models::{DeviceRole, EntityKey, GroupDetailsKind, IdentityDetailsKind};

/// Attributes whose change is observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Attribute {
    Active,
    Capabilities,
    Name,
    Registration,
    ChannelPing,
    TrustState,
    CoreDetails,
    Photo,
    LatestDetails,
    LatestDiscarded,
    PublishedDetails,
    TrustedDetails,
    Members,
    Declined,
    NextRefresh,
}

/// Value of an attribute, kept so that a change undone later in the same
/// transaction is recognized as no change at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttributeValue {
    Flag(bool),
    Capabilities(Option<BTreeSet<Capability>>),
}

/// Denormalized description of a tracked entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Subject {
    OwnedIdentity {
        owned: CryptoId,
    },
    OwnedDevice {
        owned: CryptoId,
        uid: Uid,
        role: DeviceRole,
    },
    Contact {
        owned: CryptoId,
        contact: CryptoId,
    },
    ContactDevice {
        owned: CryptoId,
        contact: CryptoId,
        uid: Uid,
        created_during_channel_creation: bool,
    },
    IdentityDetails {
        owned: CryptoId,
        contact: Option<CryptoId>,
        kind: IdentityDetailsKind,
    },
    Group {
        owned: CryptoId,
        group_uid: Uid,
        /// `None` for groups we own.
        group_owner: Option<CryptoId>,
    },
    GroupDetails {
        owned: CryptoId,
        group_uid: Uid,
        group_owner: Option<CryptoId>,
        kind: GroupDetailsKind,
    },
    PendingMember {
        owned: CryptoId,
        group_uid: Uid,
        member: CryptoId,
        owned_group: bool,
        declined: bool,
    },
    ServerUserData {
        owned: CryptoId,
        label: Uid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Inserted,
    Updated,
    Deleted,
    /// Inserted and deleted within the same transaction.
    Cancelled,
}

#[derive(Debug, Clone)]
struct TrackedChange {
    subject: Subject,
    lifecycle: Lifecycle,
    changed: BTreeSet<Attribute>,
    /// Value at the start of the transaction and latest value.
    values: BTreeMap<Attribute, (AttributeValue, AttributeValue)>,
}

impl TrackedChange {
    /// Changed attributes, minus those back at their starting value.
    fn net_changed(&self) -> BTreeSet<Attribute> {
        self.changed
            .iter()
            .copied()
            .filter(|attribute| match self.values.get(attribute) {
                Some((before, after)) => before != after,
                None => true,
            })
            .collect()
    }

    fn is_noop(&self) -> bool {
        match self.lifecycle {
            Lifecycle::Cancelled => true,
            Lifecycle::Updated => self.net_changed().is_empty(),
            Lifecycle::Inserted | Lifecycle::Deleted => false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ChangeTracker {
    changes: Vec<TrackedChange>,
    index: HashMap<EntityKey, usize>,
    extra: Vec<IdentityEvent>,
    suspended: bool,
}

impl ChangeTracker {
    pub fn inserted(&mut self, key: EntityKey, subject: Subject) {
        if self.suspended {
            return;
        }
        self.track(key, subject, Lifecycle::Inserted, None);
    }

    pub fn updated(&mut self, key: EntityKey, subject: Subject, attribute: Attribute) {
        if self.suspended {
            return;
        }
        self.track(key, subject, Lifecycle::Updated, Some(attribute));
    }

    /// Record an update together with the attribute value before and after
    /// it. Only the first `before` of the transaction is kept.
    pub fn updated_from(
        &mut self,
        key: EntityKey,
        subject: Subject,
        attribute: Attribute,
        before: AttributeValue,
        after: AttributeValue,
    ) {
        if self.suspended {
            return;
        }
        self.track(key, subject, Lifecycle::Updated, Some(attribute));
        let Some(&idx) = self.index.get(&key) else {
            return;
        };
        match self.changes[idx].values.entry(attribute) {
            Entry::Occupied(mut entry) => entry.get_mut().1 = after,
            Entry::Vacant(entry) => {
                entry.insert((before, after));
            }
        }
    }

    pub fn deleted(&mut self, key: EntityKey, subject: Subject) {
        if self.suspended {
            return;
        }
        self.track(key, subject, Lifecycle::Deleted, None);
    }

    /// Queue an event that does not derive from a single entity change.
    pub fn push_event(&mut self, event: IdentityEvent) {
        self.extra.push(event);
    }

    /// Stop recording. Used while a restore rebuilds the graph.
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn is_empty(&self) -> bool {
        self.extra.is_empty() && self.changes.iter().all(TrackedChange::is_noop)
    }

    fn track(
        &mut self,
        key: EntityKey,
        subject: Subject,
        lifecycle: Lifecycle,
        attribute: Option<Attribute>,
    ) {
        let Some(&idx) = self.index.get(&key) else {
            let mut changed = BTreeSet::new();
            changed.extend(attribute);
            self.index.insert(key, self.changes.len());
            self.changes.push(TrackedChange {
                subject,
                lifecycle,
                changed,
                values: BTreeMap::new(),
            });
            return;
        };

        let change = &mut self.changes[idx];
        change.changed.extend(attribute);
        change.lifecycle = match (change.lifecycle, lifecycle) {
            (Lifecycle::Inserted, Lifecycle::Deleted) => Lifecycle::Cancelled,
            (Lifecycle::Inserted, _) => Lifecycle::Inserted,
            (_, Lifecycle::Deleted) => Lifecycle::Deleted,
            (current, _) => current,
        };
        // Keep the subject captured before deletion; otherwise the latest wins.
        if change.lifecycle != Lifecycle::Deleted || lifecycle == Lifecycle::Deleted {
            change.subject = subject;
        }
    }

    /// Events for everything recorded so far, in first-touch order, followed
    /// by a single "backupable content changed" signal.
    pub fn events(&self) -> Vec<IdentityEvent> {
        let mut events: Vec<IdentityEvent> = self.changes.iter().flat_map(events_for).collect();
        events.extend(self.extra.iter().cloned());
        if !self.is_empty() {
            events.push(IdentityEvent::BackupableContentChanged);
        }
        events
    }
}

fn events_for(change: &TrackedChange) -> Vec<IdentityEvent> {
    if change.is_noop() {
        return Vec::new();
    }
    let net_changed = change.net_changed();
    let changed = |attribute: Attribute| net_changed.contains(&attribute);

    match (&change.subject, change.lifecycle) {

        (Subject::OwnedDevice { owned, uid, role }, lifecycle) => match lifecycle {
            Lifecycle::Inserted if *role == DeviceRole::Remote => {
                vec![IdentityEvent::NewRemoteOwnedDevice {
                    owned_identity: owned.clone(),
                    device_uid: *uid,
                }]
            }
            Lifecycle::Deleted if *role == DeviceRole::Remote => {
                vec![IdentityEvent::DeletedRemoteOwnedDevice {
                    owned_identity: owned.clone(),
                    device_uid: *uid,
                }]
            }
            Lifecycle::Deleted => vec![IdentityEvent::OwnedDeviceDeleted {
                owned_identity: owned.clone(),
                device_uid: *uid,
            }],
            Lifecycle::Updated => {
                let mut events = Vec::new();
                if changed(Attribute::Capabilities) {
                    events.push(IdentityEvent::OwnedCapabilitiesUpdated {
                        owned_identity: owned.clone(),
                    });
                }
                if !net_changed.is_empty() {
                    events.push(IdentityEvent::OwnedDeviceUpdated {
                        owned_identity: owned.clone(),
                        device_uid: *uid,
                    });
                }
                events
            }
            _ => Vec::new(),
        },

        (
            Subject::ContactDevice {
                owned,
                contact,
                uid,
                created_during_channel_creation,
            },
            lifecycle,
        ) => match lifecycle {
            Lifecycle::Inserted => vec![IdentityEvent::NewContactDevice {
                owned_identity: owned.clone(),
                contact_identity: contact.clone(),
                device_uid: *uid,
                created_during_channel_creation: *created_during_channel_creation,
            }],
            Lifecycle::Deleted => vec![IdentityEvent::DeletedContactDevice {
                owned_identity: owned.clone(),
                contact_identity: contact.clone(),
                device_uid: *uid,
            }],
            Lifecycle::Updated if changed(Attribute::Capabilities) => {
                vec![IdentityEvent::ContactCapabilitiesUpdated {
                    owned_identity: owned.clone(),
                    contact_identity: contact.clone(),
                }]
            }
            _ => Vec::new(),
        },

        (Subject::IdentityDetails { .. }, Lifecycle::Deleted) => Vec::new(),
        (Subject::IdentityDetails { owned, contact, kind }, _) if changed(Attribute::Photo) => {
            let owned_identity = owned.clone();
            match (kind, contact) {
                (IdentityDetailsKind::OwnedPublished, _) => {
                    vec![IdentityEvent::OwnedIdentityPhotoUpdated { owned_identity }]
                }
                (IdentityDetailsKind::ContactPublished, Some(contact)) => {
                    vec![IdentityEvent::PublishedContactPhotoUpdated {
                        owned_identity,
                        contact_identity: contact.clone(),
                    }]
                }
                (IdentityDetailsKind::ContactTrusted, Some(contact)) => {
                    vec![IdentityEvent::TrustedContactPhotoUpdated {
                        owned_identity,
                        contact_identity: contact.clone(),
                    }]
                }
                _ => Vec::new(),
            }
        }

        (Subject::GroupDetails { .. }, Lifecycle::Deleted) => Vec::new(),
        (
            Subject::GroupDetails {
                owned,
                group_uid,
                group_owner,
                kind,
            },
            _,
        ) if changed(Attribute::Photo) => {
            let owned_identity = owned.clone();
            let group_uid = *group_uid;
            match (kind, group_owner) {
                (GroupDetailsKind::Latest, None) => {
                    vec![IdentityEvent::LatestPhotoOfOwnedGroupUpdated {
                        owned_identity,
                        group_uid,
                    }]
                }
                (GroupDetailsKind::Published, None) => {
                    vec![IdentityEvent::PublishedPhotoOfOwnedGroupUpdated {
                        owned_identity,
                        group_uid,
                    }]
                }
                (GroupDetailsKind::Published, Some(owner)) => {
                    vec![IdentityEvent::PublishedPhotoOfJoinedGroupUpdated {
                        owned_identity,
                        group_uid,
                        group_owner: owner.clone(),
                    }]
                }
                (GroupDetailsKind::Trusted, Some(owner)) => {
                    vec![IdentityEvent::TrustedPhotoOfJoinedGroupUpdated {
                        owned_identity,
                        group_uid,
                        group_owner: owner.clone(),
                    }]
                }
                _ => Vec::new(),
            }
        }

        (
            Subject::Group {
                owned,
                group_uid,
                group_owner: None,
            },
            lifecycle,
        ) => {
            let mut events = Vec::new();
            if lifecycle == Lifecycle::Inserted {
                events.push(IdentityEvent::NewOwnedGroup {
                    owned_identity: owned.clone(),
                    group_uid: *group_uid,
                });
            }
            if lifecycle == Lifecycle::Updated && changed(Attribute::LatestDetails) {
                events.push(IdentityEvent::OwnedGroupLatestDetailsUpdated {
                    owned_identity: owned.clone(),
                    group_uid: *group_uid,
                });
            }
            if lifecycle == Lifecycle::Updated && changed(Attribute::LatestDiscarded) {
                events.push(IdentityEvent::OwnedGroupLatestDetailsDiscarded {
                    owned_identity: owned.clone(),
                    group_uid: *group_uid,
                });
            }
            events
        }

        (
            Subject::PendingMember {
                owned,
                group_uid,
                member,
                owned_group: true,
                declined,
            },
            Lifecycle::Updated,
        ) if changed(Attribute::Declined) => {
            let owned_identity = owned.clone();
            let contact_identity = member.clone();
            let group_uid = *group_uid;
            if *declined {
                vec![IdentityEvent::PendingMemberDeclined {
                    owned_identity,
                    group_uid,
                    contact_identity,
                }]
            } else {
                vec![IdentityEvent::PendingMemberUndeclined {
                    owned_identity,
                    group_uid,
                    contact_identity,
                }]
            }
        }

        (Subject::ServerUserData { owned, label }, Lifecycle::Deleted) => {
            vec![IdentityEvent::ServerLabelDeleted {
                owned_identity: owned.clone(),
                label: *label,
            }]
        }

        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContactDeviceKey, OwnedDeviceKey, PendingMemberKey};

    fn owned() -> CryptoId {
        CryptoId::from_bytes(vec![0xAA; 4]).unwrap()
    }

    fn device_subject(role: DeviceRole) -> Subject {
        Subject::OwnedDevice {
            owned: owned(),
            uid: Uid([1; 32]),
            role,
        }
    }

    #[test]
    fn capability_and_name_changes_collapse_into_two_events() {
        let mut tracker = ChangeTracker::default();
        let key = EntityKey::from(OwnedDeviceKey(1));
        tracker.updated(key, device_subject(DeviceRole::Current), Attribute::Capabilities);
        tracker.updated(key, device_subject(DeviceRole::Current), Attribute::Name);
        tracker.updated(key, device_subject(DeviceRole::Current), Attribute::Capabilities);

        let events = tracker.events();
        let names: Vec<_> = events.iter().map(IdentityEvent::name).collect();
        assert_eq!(
            names,
            vec![
                crate::events::EVENT_OWNED_CAPABILITIES_UPDATED,
                crate::events::EVENT_OWNED_DEVICE_UPDATED,
                crate::events::EVENT_BACKUPABLE_CONTENT_CHANGED,
            ]
        );
    }

    #[test]
    fn insert_then_delete_emits_nothing() {
        let mut tracker = ChangeTracker::default();
        let key = EntityKey::from(ContactDeviceKey(7));
        let subject = Subject::ContactDevice {
            owned: owned(),
            contact: owned(),
            uid: Uid([2; 32]),
            created_during_channel_creation: false,
        };
        tracker.inserted(key, subject.clone());
        tracker.deleted(key, subject);

        assert!(tracker.is_empty());
        assert!(tracker.events().is_empty());
    }

    #[test]
    fn declined_events_only_for_owned_groups() {
        let mut tracker = ChangeTracker::default();
        let subject = |owned_group| Subject::PendingMember {
            owned: owned(),
            group_uid: Uid([3; 32]),
            member: owned(),
            owned_group,
            declined: true,
        };
        tracker.updated(PendingMemberKey(1).into(), subject(true), Attribute::Declined);
        tracker.updated(PendingMemberKey(2).into(), subject(false), Attribute::Declined);

        let declined = tracker
            .events()
            .into_iter()
            .filter(|e| matches!(e, IdentityEvent::PendingMemberDeclined { .. }))
            .count();
        assert_eq!(declined, 1);
    }

    #[test]
    fn capabilities_set_back_cancel_out() {
        let mut tracker = ChangeTracker::default();
        let key = EntityKey::from(OwnedDeviceKey(1));
        let first: BTreeSet<_> = [Capability::GroupsV2].into();
        let second: BTreeSet<_> = [Capability::OneToOneContacts].into();
        let caps = |set: &BTreeSet<Capability>| AttributeValue::Capabilities(Some(set.clone()));

        for (before, after) in [(&first, &second), (&second, &first)] {
            tracker.updated_from(
                key,
                device_subject(DeviceRole::Current),
                Attribute::Capabilities,
                caps(before),
                caps(after),
            );
        }
        assert!(tracker.is_empty());
        assert!(tracker.events().is_empty());

        tracker.updated(key, device_subject(DeviceRole::Current), Attribute::Name);
        let names: Vec<_> = tracker.events().iter().map(IdentityEvent::name).collect();
        assert_eq!(
            names,
            vec![
                crate::events::EVENT_OWNED_DEVICE_UPDATED,
                crate::events::EVENT_BACKUPABLE_CONTENT_CHANGED,
            ]
        );
    }

    #[test]
    fn suspended_tracker_records_nothing() {
        let mut tracker = ChangeTracker::default();
        tracker.suspend();
        tracker.inserted(OwnedDeviceKey(1).into(), device_subject(DeviceRole::Remote));
        tracker.resume();
        assert!(tracker.events().is_empty());
    }
}
