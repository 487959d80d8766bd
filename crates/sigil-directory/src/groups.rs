//! Contact groups, owned and joined, with their members.
//!
//! An owned group carries published and latest details: latest is the
//! owner's draft and is either published or discarded. A joined group
//! carries published and trusted details: published is what the group owner
//! announced, trusted is what we accepted.

use std::path::Path;

use rusqlite::{params, OptionalExtension};
use sigil_shared::{CryptoId, Uid};

use crate::changes::{Attribute, Subject};
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    invalid_column, uid_column, Contact, ContactGroup, ContactKey, DetailsInput, GroupDetails,
    GroupDetailsKey, GroupDetailsKind, GroupKey, GroupVariant, OwnedIdentityKey, PendingMemberInput,
};
use crate::transaction::DirectoryTx;

const COLUMNS: &str = "id, kind, group_uid, owned_identity_id, group_owner_id, \
                       group_members_version, published_details_id, latest_details_id, \
                       trusted_details_id";

impl Reader<'_> {
    pub fn group(&self, key: GroupKey) -> Result<Option<ContactGroup>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM contact_groups WHERE id = ?1"),
                params![key.0],
                row_to_group,
            )
            .optional()?)
    }

    pub fn owned_group(&self, owned: OwnedIdentityKey, group_uid: &Uid) -> Result<Option<ContactGroup>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM contact_groups
                     WHERE kind = 'owned' AND owned_identity_id = ?1 AND group_uid = ?2"
                ),
                params![owned.0, group_uid.as_bytes()],
                row_to_group,
            )
            .optional()?)
    }

    pub fn joined_group(
        &self,
        group_owner: ContactKey,
        group_uid: &Uid,
    ) -> Result<Option<ContactGroup>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM contact_groups
                     WHERE kind = 'joined' AND group_owner_id = ?1 AND group_uid = ?2"
                ),
                params![group_owner.0, group_uid.as_bytes()],
                row_to_group,
            )
            .optional()?)
    }

    /// Owned and joined groups of `owned`, ordered by group uid.
    pub fn groups(&self, owned: OwnedIdentityKey) -> Result<Vec<ContactGroup>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM contact_groups
             WHERE owned_identity_id = ?1
             ORDER BY group_uid ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![owned.0], row_to_group)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn groups_owned_by_contact(&self, contact: ContactKey) -> Result<Vec<ContactGroup>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM contact_groups
             WHERE kind = 'joined' AND group_owner_id = ?1
             ORDER BY group_uid ASC"
        ))?;
        let rows = stmt.query_map(params![contact.0], row_to_group)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Joined members of a group, ordered by crypto identity.
    pub fn group_members(&self, group: GroupKey) -> Result<Vec<Contact>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id FROM group_members m
             JOIN contact_identities c ON c.id = m.contact_id
             WHERE m.group_id = ?1
             ORDER BY c.crypto_identity ASC",
        )?;
        let keys = stmt
            .query_map(params![group.0], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        keys.into_iter()
            .map(|id| self.require_contact(ContactKey(id)))
            .collect()
    }

    /// The group one of whose details rows is `details`.
    pub fn group_of_details(&self, details: GroupDetailsKey) -> Result<Option<ContactGroup>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM contact_groups
                     WHERE published_details_id = ?1
                        OR latest_details_id = ?1
                        OR trusted_details_id = ?1"
                ),
                params![details.0],
                row_to_group,
            )
            .optional()?)
    }

    pub(crate) fn require_group(&self, key: GroupKey) -> Result<ContactGroup> {
        self.group(key)?.ok_or(DirectoryError::NotFound("group"))
    }

    /// Crypto identities of the owned identity and, for joined groups, of
    /// the group owner.
    pub(crate) fn group_context(&self, group: &ContactGroup) -> Result<(CryptoId, Option<CryptoId>)> {
        let owned = self
            .owned_identity(group.owner)?
            .ok_or_else(|| DirectoryError::missing_context(format!("{} has no owner", group.key)))?;
        let group_owner = match group.variant {
            GroupVariant::Owned { .. } => None,
            GroupVariant::Joined { group_owner, .. } => {
                let contact = self.contact(group_owner)?.ok_or_else(|| {
                    DirectoryError::missing_context(format!("{} has no group owner", group.key))
                })?;
                Some(contact.crypto_id)
            }
        };
        Ok((owned.crypto_id, group_owner))
    }

    pub(crate) fn group_subject(&self, group: &ContactGroup) -> Result<Subject> {
        let (owned, group_owner) = self.group_context(group)?;
        Ok(Subject::Group {
            owned,
            group_uid: group.group_uid,
            group_owner,
        })
    }
}

impl DirectoryTx<'_> {
    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a group owned by `owned`. The latest details start as a copy
    /// of the published ones.
    pub fn create_owned_group(
        &mut self,
        owned: OwnedIdentityKey,
        group_uid: Uid,
        details: &DetailsInput,
        photo: Option<&Path>,
        pending_members: &[PendingMemberInput],
    ) -> Result<GroupKey> {
        self.reader().require_owned_identity(owned)?;
        if self.reader().owned_group(owned, &group_uid)?.is_some() {
            return Err(DirectoryError::duplicate("owned group", group_uid.short()));
        }

        let published = self.insert_group_details(GroupDetailsKind::Published, details, photo)?;
        let latest = self.duplicate_group_details(published, GroupDetailsKind::Latest)?;

        self.conn().execute(
            "INSERT INTO contact_groups
                (kind, group_uid, owned_identity_id, published_details_id, latest_details_id)
             VALUES ('owned', ?1, ?2, ?3, ?4)",
            params![group_uid.as_bytes(), owned.0, published.0, latest.0],
        )?;
        let key = GroupKey(self.conn().last_insert_rowid());
        let subject = self.reader().group_subject(&self.reader().require_group(key)?)?;
        self.changes.inserted(key.into(), subject);

        for member in pending_members {
            self.insert_pending_member(key, member)?;
        }

        tracing::info!(group = %group_uid.short(), "owned group created");
        Ok(key)
    }

    /// Record a group owned by one of our contacts. The published details
    /// start as a copy of the trusted ones.
    pub fn create_joined_group(
        &mut self,
        owned: OwnedIdentityKey,
        group_owner: ContactKey,
        group_uid: Uid,
        details: &DetailsInput,
        photo: Option<&Path>,
        pending_members: &[PendingMemberInput],
    ) -> Result<GroupKey> {
        let contact = self.reader().require_contact(group_owner)?;
        if contact.owner != owned {
            return Err(DirectoryError::NotApplicable(
                "group owner is a contact of another owned identity",
            ));
        }
        if self.reader().joined_group(group_owner, &group_uid)?.is_some() {
            return Err(DirectoryError::duplicate("joined group", group_uid.short()));
        }

        let trusted = self.insert_group_details(GroupDetailsKind::Trusted, details, photo)?;
        let published = self.duplicate_group_details(trusted, GroupDetailsKind::Published)?;

        self.conn().execute(
            "INSERT INTO contact_groups
                (kind, group_uid, owned_identity_id, group_owner_id,
                 published_details_id, trusted_details_id)
             VALUES ('joined', ?1, ?2, ?3, ?4, ?5)",
            params![group_uid.as_bytes(), owned.0, group_owner.0, published.0, trusted.0],
        )?;
        let key = GroupKey(self.conn().last_insert_rowid());
        let subject = self.reader().group_subject(&self.reader().require_group(key)?)?;
        self.changes.inserted(key.into(), subject);

        for member in pending_members {
            self.insert_pending_member(key, member)?;
        }

        tracing::info!(group = %group_uid.short(), "joined group created");
        Ok(key)
    }

    // ------------------------------------------------------------------
    // Owned group details
    // ------------------------------------------------------------------

    /// Replace the draft of an owned group. The draft is always exactly one
    /// version ahead of the published details.
    pub fn update_latest_details(
        &mut self,
        group: GroupKey,
        input: &DetailsInput,
        photo: Option<&Path>,
    ) -> Result<()> {
        let row = self.reader().require_group(group)?;
        let GroupVariant::Owned { latest_details } = row.variant else {
            return Err(DirectoryError::NotApplicable("latest details exist on owned groups only"));
        };
        let published = self.reader().require_group_details(row.published_details)?;
        if input.version != published.core.version + 1 {
            return Err(DirectoryError::InvalidDetailsVersion {
                current: published.core.version,
                proposed: input.version,
            });
        }

        let old = self.reader().require_group_details(latest_details)?;
        let latest = self.insert_group_details(GroupDetailsKind::Latest, input, photo)?;
        self.conn().execute(
            "UPDATE contact_groups SET latest_details_id = ?1 WHERE id = ?2",
            params![latest.0, group.0],
        )?;
        self.replace_superseded_details(&row, old, latest, Attribute::LatestDetails)
    }

    /// Drop the draft, resetting it to the published details.
    pub fn discard_latest_details(&mut self, group: GroupKey) -> Result<()> {
        let row = self.reader().require_group(group)?;
        let GroupVariant::Owned { latest_details } = row.variant else {
            return Err(DirectoryError::NotApplicable("latest details exist on owned groups only"));
        };

        let old = self.reader().require_group_details(latest_details)?;
        let latest = self.duplicate_group_details(row.published_details, GroupDetailsKind::Latest)?;
        self.conn().execute(
            "UPDATE contact_groups SET latest_details_id = ?1 WHERE id = ?2",
            params![latest.0, group.0],
        )?;
        self.replace_superseded_details(&row, old, latest, Attribute::LatestDiscarded)
    }

    /// Make the draft the published details. Does nothing when there is no
    /// newer draft.
    pub fn publish_latest_details(&mut self, group: GroupKey) -> Result<()> {
        let row = self.reader().require_group(group)?;
        let GroupVariant::Owned { latest_details } = row.variant else {
            return Err(DirectoryError::NotApplicable("latest details exist on owned groups only"));
        };
        let old = self.reader().require_group_details(row.published_details)?;
        let latest = self.reader().require_group_details(latest_details)?;
        if latest.core.version <= old.core.version {
            return Ok(());
        }

        let published = self.duplicate_group_details(latest_details, GroupDetailsKind::Published)?;
        self.conn().execute(
            "UPDATE contact_groups SET published_details_id = ?1 WHERE id = ?2",
            params![published.0, group.0],
        )?;
        self.replace_superseded_details(&row, old, published, Attribute::PublishedDetails)
    }

    // ------------------------------------------------------------------
    // Joined group details
    // ------------------------------------------------------------------

    /// Record new details announced by the group owner.
    pub fn update_joined_published_details(
        &mut self,
        group: GroupKey,
        input: &DetailsInput,
        photo: Option<&Path>,
    ) -> Result<()> {
        let row = self.reader().require_group(group)?;
        if row.is_owned() {
            return Err(DirectoryError::NotApplicable(
                "owned groups publish through their latest details",
            ));
        }
        let old = self.reader().require_group_details(row.published_details)?;
        if input.version < old.core.version {
            return Err(DirectoryError::InvalidDetailsVersion {
                current: old.core.version,
                proposed: input.version,
            });
        }
        if input.version == old.core.version {
            return Ok(());
        }

        let published = self.insert_group_details(GroupDetailsKind::Published, input, photo)?;
        self.conn().execute(
            "UPDATE contact_groups SET published_details_id = ?1 WHERE id = ?2",
            params![published.0, group.0],
        )?;
        self.replace_superseded_details(&row, old, published, Attribute::PublishedDetails)
    }

    /// Accept the details the group owner published.
    pub fn trust_published_details(&mut self, group: GroupKey) -> Result<()> {
        let row = self.reader().require_group(group)?;
        let GroupVariant::Joined { trusted_details, .. } = row.variant else {
            return Err(DirectoryError::NotApplicable("trusted details exist on joined groups only"));
        };
        let old = self.reader().require_group_details(trusted_details)?;

        let trusted = self.duplicate_group_details(row.published_details, GroupDetailsKind::Trusted)?;
        self.conn().execute(
            "UPDATE contact_groups SET trusted_details_id = ?1 WHERE id = ?2",
            params![trusted.0, group.0],
        )?;
        self.replace_superseded_details(&row, old, trusted, Attribute::TrustedDetails)
    }

    /// Delete `old` after `new` took its place, noting a photo change when
    /// the two photos differ.
    fn replace_superseded_details(
        &mut self,
        group: &ContactGroup,
        old: GroupDetails,
        new: GroupDetailsKey,
        attribute: Attribute,
    ) -> Result<()> {
        let new = self.reader().require_group_details(new)?;
        let photo_changed = self.reader().group_photos_differ(&old, &new);

        self.delete_group_details(old.key)?;
        if photo_changed {
            self.note_group_photo_change(&new)?;
        }
        self.note_group_change(group, attribute)
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Invite members. Identities already pending are skipped. Returns how
    /// many were added.
    pub fn add_pending_members(
        &mut self,
        group: GroupKey,
        members: &[PendingMemberInput],
    ) -> Result<usize> {
        let row = self.reader().require_group(group)?;
        let mut added = 0;
        for member in members {
            if self.reader().pending_member_exists(group, &member.crypto_id)? {
                continue;
            }
            self.insert_pending_member(group, member)?;
            added += 1;
        }

        if added > 0 {
            self.bump_members_version(&row)?;
        }
        Ok(added)
    }

    /// Remove members and pending members with the given identities.
    /// Returns how many were removed.
    pub fn remove_group_members(&mut self, group: GroupKey, members: &[CryptoId]) -> Result<usize> {
        let row = self.reader().require_group(group)?;
        let mut removed = 0;
        for crypto_id in members {
            if let Some(contact) = self.reader().contact_by_crypto_id(row.owner, crypto_id)? {
                removed += self.conn().execute(
                    "DELETE FROM group_members WHERE group_id = ?1 AND contact_id = ?2",
                    params![group.0, contact.key.0],
                )?;
            }
            if let Some(pending) = self.reader().pending_member_by_crypto_id(group, crypto_id)? {
                self.remove_pending_member(pending.key)?;
                removed += 1;
            }
        }

        if removed > 0 {
            self.bump_members_version(&row)?;
        }
        Ok(removed)
    }

    /// Turn a pending member into a member once they joined.
    pub fn promote_pending_member(&mut self, group: GroupKey, contact: ContactKey) -> Result<()> {
        let row = self.reader().require_group(group)?;
        let member = self.reader().require_contact(contact)?;
        if member.owner != row.owner {
            return Err(DirectoryError::NotApplicable(
                "member is a contact of another owned identity",
            ));
        }
        let pending = self
            .reader()
            .pending_member_by_crypto_id(group, &member.crypto_id)?
            .ok_or(DirectoryError::NotFound("pending member"))?;

        self.remove_pending_member(pending.key)?;
        self.insert_group_member(group, contact)?;
        self.note_group_change(&row, Attribute::Members)
    }

    pub(crate) fn insert_group_member(&mut self, group: GroupKey, contact: ContactKey) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, contact_id) VALUES (?1, ?2)",
            params![group.0, contact.0],
        )?;
        Ok(())
    }

    pub fn mark_pending_member_declined(
        &mut self,
        group: GroupKey,
        crypto_id: &CryptoId,
    ) -> Result<()> {
        self.set_declined_by_crypto_id(group, crypto_id, true)
    }

    pub fn unmark_pending_member_declined(
        &mut self,
        group: GroupKey,
        crypto_id: &CryptoId,
    ) -> Result<()> {
        self.set_declined_by_crypto_id(group, crypto_id, false)
    }

    fn set_declined_by_crypto_id(
        &mut self,
        group: GroupKey,
        crypto_id: &CryptoId,
        declined: bool,
    ) -> Result<()> {
        let pending = self
            .reader()
            .pending_member_by_crypto_id(group, crypto_id)?
            .ok_or(DirectoryError::NotFound("pending member"))?;
        self.set_pending_member_declined(pending.key, declined)
    }

    fn bump_members_version(&mut self, group: &ContactGroup) -> Result<()> {
        self.conn().execute(
            "UPDATE contact_groups SET group_members_version = group_members_version + 1
             WHERE id = ?1",
            params![group.key.0],
        )?;
        self.note_group_change(group, Attribute::Members)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Delete a group with its pending members and details. Deleting an
    /// owned group also drops its server user data.
    pub fn delete_group(&mut self, group: GroupKey) -> Result<()> {
        let row = self.reader().require_group(group)?;
        let subject = self.reader().group_subject(&row)?;

        for pending in self.reader().pending_members(group)? {
            self.remove_pending_member(pending.key)?;
        }
        self.conn()
            .execute("DELETE FROM group_members WHERE group_id = ?1", params![group.0])?;
        self.conn()
            .execute("DELETE FROM contact_groups WHERE id = ?1", params![group.0])?;

        self.delete_group_details(row.published_details)?;
        match row.variant {
            GroupVariant::Owned { latest_details } => {
                self.delete_group_details(latest_details)?;
                if let Subject::Group { owned, .. } = &subject {
                    self.delete_group_server_user_data(owned, &row.group_uid)?;
                }
            }
            GroupVariant::Joined { trusted_details, .. } => {
                self.delete_group_details(trusted_details)?;
            }
        }

        self.changes.deleted(group.into(), subject);
        tracing::info!(group = %row.group_uid.short(), "group deleted");
        Ok(())
    }

    fn note_group_change(&mut self, group: &ContactGroup, attribute: Attribute) -> Result<()> {
        let subject = self.reader().group_subject(group)?;
        self.changes.updated(group.key.into(), subject, attribute);
        Ok(())
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactGroup> {
    let kind: String = row.get(1)?;
    let owner: Option<i64> = row.get(3)?;
    let group_owner: Option<i64> = row.get(4)?;
    let published: Option<i64> = row.get(6)?;
    let latest: Option<i64> = row.get(7)?;
    let trusted: Option<i64> = row.get(8)?;

    let variant = match (kind.as_str(), group_owner, latest, trusted) {
        ("owned", None, Some(latest), None) => GroupVariant::Owned {
            latest_details: GroupDetailsKey(latest),
        },
        ("joined", Some(group_owner), None, Some(trusted)) => GroupVariant::Joined {
            group_owner: ContactKey(group_owner),
            trusted_details: GroupDetailsKey(trusted),
        },
        _ => return Err(invalid_column(1, format!("inconsistent {kind} group row"))),
    };

    Ok(ContactGroup {
        key: GroupKey(row.get(0)?),
        group_uid: uid_column(2, row.get(2)?)?,
        owner: OwnedIdentityKey(owner.ok_or_else(|| invalid_column(3, "group has no owner"))?),
        members_version: row.get(5)?,
        published_details: GroupDetailsKey(
            published.ok_or_else(|| invalid_column(6, "group has no published details"))?,
        ),
        variant,
    })
}

#[cfg(test)]
mod tests {
    use crate::error::DirectoryError;
    use crate::events::{
        EVENT_NEW_OWNED_GROUP, EVENT_OWNED_GROUP_LATEST_DETAILS_DISCARDED,
        EVENT_OWNED_GROUP_LATEST_DETAILS_UPDATED,
    };
    use crate::models::{GroupVariant, PendingMemberInput};
    use crate::test_support::*;

    fn latest_of(dir: &crate::Directory, group: crate::models::GroupKey) -> crate::models::GroupDetails {
        let row = dir.reader().group(group).unwrap().unwrap();
        let GroupVariant::Owned { latest_details } = row.variant else {
            panic!("expected an owned group");
        };
        dir.reader().group_details(latest_details).unwrap().unwrap()
    }

    #[test]
    fn owned_group_creation_emits_new_group() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);

        let mut tx = dir.transaction().unwrap();
        let group = tx
            .create_owned_group(
                owned,
                uid(7),
                &details(0, "g"),
                None,
                &[PendingMemberInput {
                    crypto_id: crypto_id(5),
                    serialized_details: "invitee".into(),
                }],
            )
            .unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![EVENT_NEW_OWNED_GROUP, BACKUPABLE]);

        assert_eq!(latest_of(&dir, group).core.version, 0);
        assert_eq!(dir.reader().pending_members(group).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_owned_group_is_rejected() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        create_owned_group(&mut dir, owned, 7);

        let mut tx = dir.transaction().unwrap();
        let err = tx
            .create_owned_group(owned, uid(7), &details(0, "g"), None, &[])
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateEntity { .. }));
    }

    #[test]
    fn latest_details_must_be_one_version_ahead() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let group = create_owned_group(&mut dir, owned, 7);

        let mut tx = dir.transaction().unwrap();
        let err = tx
            .update_latest_details(group, &details(2, "too far"), None)
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidDetailsVersion { .. }));

        tx.update_latest_details(group, &details(1, "draft"), None)
            .unwrap();
        let report = tx.commit().unwrap();
        assert!(event_names(&report).contains(&EVENT_OWNED_GROUP_LATEST_DETAILS_UPDATED));
        assert_eq!(latest_of(&dir, group).core.serialized_core_details, "draft");
    }

    #[test]
    fn publish_and_discard_latest_details() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let group = create_owned_group(&mut dir, owned, 7);

        let mut tx = dir.transaction().unwrap();
        tx.update_latest_details(group, &details(1, "v1"), None)
            .unwrap();
        tx.publish_latest_details(group).unwrap();
        tx.commit().unwrap();

        let row = dir.reader().group(group).unwrap().unwrap();
        let published = dir.reader().group_details(row.published_details).unwrap().unwrap();
        assert_eq!(published.core.version, 1);

        let mut tx = dir.transaction().unwrap();
        tx.update_latest_details(group, &details(2, "v2"), None)
            .unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.discard_latest_details(group).unwrap();
        let report = tx.commit().unwrap();
        assert!(event_names(&report).contains(&EVENT_OWNED_GROUP_LATEST_DETAILS_DISCARDED));
        assert_eq!(latest_of(&dir, group).core.serialized_core_details, "v1");
    }

    #[test]
    fn latest_details_do_not_apply_to_joined_groups() {
        let (mut dir, _tmp) = test_directory();
        let (owned, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        let group = tx
            .create_joined_group(owned, contact, uid(8), &details(0, "j"), None, &[])
            .unwrap();
        let err = tx.discard_latest_details(group).unwrap_err();
        assert!(matches!(err, DirectoryError::NotApplicable(_)));
    }

    #[test]
    fn joined_group_details_flow() {
        let (mut dir, _tmp) = test_directory();
        let (owned, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        let group = tx
            .create_joined_group(owned, contact, uid(8), &details(3, "j3"), None, &[])
            .unwrap();
        tx.update_joined_published_details(group, &details(4, "j4"), None)
            .unwrap();
        tx.trust_published_details(group).unwrap();
        tx.commit().unwrap();

        let row = dir.reader().group(group).unwrap().unwrap();
        let GroupVariant::Joined {
            group_owner,
            trusted_details,
        } = row.variant
        else {
            panic!("expected a joined group");
        };
        assert_eq!(group_owner, contact);
        let trusted = dir.reader().group_details(trusted_details).unwrap().unwrap();
        assert_eq!(trusted.core.serialized_core_details, "j4");
        // The owner is referenced by the variant, not listed as a member.
        assert!(dir.reader().group_members(group).unwrap().is_empty());
    }

    #[test]
    fn membership_changes_bump_the_version() {
        let (mut dir, _tmp) = test_directory();
        let (owned, contact) = owned_with_contact(&mut dir);
        let group = create_owned_group(&mut dir, owned, 7);

        let mut tx = dir.transaction().unwrap();
        let invite = PendingMemberInput {
            crypto_id: crypto_id(2),
            serialized_details: "bob".into(),
        };
        assert_eq!(tx.add_pending_members(group, &[invite.clone()]).unwrap(), 1);
        assert_eq!(tx.add_pending_members(group, &[invite]).unwrap(), 0);
        tx.promote_pending_member(group, contact).unwrap();
        tx.commit().unwrap();

        let reader = dir.reader();
        assert_eq!(reader.group(group).unwrap().unwrap().members_version, 1);
        assert_eq!(reader.group_members(group).unwrap().len(), 1);
        assert!(reader.pending_members(group).unwrap().is_empty());

        let mut tx = dir.transaction().unwrap();
        assert_eq!(tx.remove_group_members(group, &[crypto_id(2)]).unwrap(), 1);
        tx.commit().unwrap();
        assert_eq!(dir.reader().group(group).unwrap().unwrap().members_version, 2);
    }

    #[test]
    fn deleting_contact_deletes_groups_it_owns() {
        let (mut dir, _tmp) = test_directory();
        let (owned, contact) = owned_with_contact(&mut dir);

        let mut tx = dir.transaction().unwrap();
        let group = tx
            .create_joined_group(owned, contact, uid(8), &details(0, "j"), None, &[])
            .unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.delete_contact(contact).unwrap();
        tx.commit().unwrap();

        assert!(dir.reader().group(group).unwrap().is_none());
        assert!(dir.reader().groups(owned).unwrap().is_empty());
    }
}
