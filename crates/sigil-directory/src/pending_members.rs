//! Pending group members: invited identities that have not joined yet.

use rusqlite::{params, OptionalExtension};
use sigil_shared::CryptoId;

use crate::changes::{Attribute, AttributeValue, Subject};
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    crypto_id_column, invalid_column, GroupKey, PendingGroupMember, PendingMemberInput,
    PendingMemberKey,
};
use crate::transaction::DirectoryTx;

const COLUMNS: &str = "id, group_id, crypto_identity, serialized_details, declined";

impl Reader<'_> {
    pub fn pending_member(&self, key: PendingMemberKey) -> Result<Option<PendingGroupMember>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM pending_group_members WHERE id = ?1"),
                params![key.0],
                row_to_pending_member,
            )
            .optional()?)
    }

    pub fn pending_member_by_crypto_id(
        &self,
        group: GroupKey,
        crypto_id: &CryptoId,
    ) -> Result<Option<PendingGroupMember>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM pending_group_members
                     WHERE group_id = ?1 AND crypto_identity = ?2"
                ),
                params![group.0, crypto_id.as_bytes()],
                row_to_pending_member,
            )
            .optional()?)
    }

    pub fn pending_member_exists(&self, group: GroupKey, crypto_id: &CryptoId) -> Result<bool> {
        Ok(self.pending_member_by_crypto_id(group, crypto_id)?.is_some())
    }

    /// Pending members of a group, ordered by crypto identity.
    pub fn pending_members(&self, group: GroupKey) -> Result<Vec<PendingGroupMember>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM pending_group_members
             WHERE group_id = ?1
             ORDER BY crypto_identity ASC"
        ))?;
        let rows = stmt.query_map(params![group.0], row_to_pending_member)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn pending_member_subject(&self, pending: &PendingGroupMember) -> Result<Subject> {
        let group = self.group(pending.group)?.ok_or_else(|| {
            DirectoryError::missing_context(format!("{} has no group", pending.key))
        })?;
        let (owned, _) = self.group_context(&group)?;
        Ok(Subject::PendingMember {
            owned,
            group_uid: group.group_uid,
            member: pending.crypto_id.clone(),
            owned_group: group.is_owned(),
            declined: pending.declined,
        })
    }
}

impl DirectoryTx<'_> {
    pub(crate) fn insert_pending_member(
        &mut self,
        group: GroupKey,
        input: &PendingMemberInput,
    ) -> Result<PendingMemberKey> {
        if self.reader().pending_member_exists(group, &input.crypto_id)? {
            return Err(DirectoryError::duplicate("pending member", input.crypto_id.short()));
        }

        self.conn().execute(
            "INSERT INTO pending_group_members (group_id, crypto_identity, serialized_details)
             VALUES (?1, ?2, ?3)",
            params![group.0, input.crypto_id.as_bytes(), input.serialized_details],
        )?;
        let key = PendingMemberKey(self.conn().last_insert_rowid());

        let pending = PendingGroupMember {
            key,
            group,
            crypto_id: input.crypto_id.clone(),
            serialized_details: input.serialized_details.clone(),
            declined: false,
        };
        let subject = self.reader().pending_member_subject(&pending)?;
        self.changes.inserted(key.into(), subject);
        Ok(key)
    }

    /// Set the declined flag. Setting the current value writes nothing and
    /// emits nothing.
    pub fn set_pending_member_declined(&mut self, key: PendingMemberKey, declined: bool) -> Result<()> {
        let mut pending = self
            .reader()
            .pending_member(key)?
            .ok_or(DirectoryError::NotFound("pending member"))?;
        if pending.declined == declined {
            return Ok(());
        }

        self.conn().execute(
            "UPDATE pending_group_members SET declined = ?1 WHERE id = ?2",
            params![declined, key.0],
        )?;
        pending.declined = declined;
        let subject = self.reader().pending_member_subject(&pending)?;
        self.changes.updated_from(
            key.into(),
            subject,
            Attribute::Declined,
            AttributeValue::Flag(!declined),
            AttributeValue::Flag(declined),
        );
        Ok(())
    }

    pub(crate) fn remove_pending_member(&mut self, key: PendingMemberKey) -> Result<()> {
        let pending = self
            .reader()
            .pending_member(key)?
            .ok_or(DirectoryError::NotFound("pending member"))?;
        let subject = self.reader().pending_member_subject(&pending)?;

        self.conn()
            .execute("DELETE FROM pending_group_members WHERE id = ?1", params![key.0])?;
        self.changes.deleted(key.into(), subject);
        Ok(())
    }
}

fn row_to_pending_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingGroupMember> {
    let group: Option<i64> = row.get(1)?;
    Ok(PendingGroupMember {
        key: PendingMemberKey(row.get(0)?),
        group: GroupKey(group.ok_or_else(|| invalid_column(1, "pending member has no group"))?),
        crypto_id: crypto_id_column(2, row.get(2)?)?,
        serialized_details: row.get(3)?,
        declined: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::error::DirectoryError;
    use crate::events::{IdentityEvent, EVENT_PENDING_MEMBER_DECLINED};
    use crate::models::PendingMemberInput;
    use crate::test_support::*;

    #[test]
    fn declining_is_idempotent() {
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
                    serialized_details: "eve".into(),
                }],
            )
            .unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.mark_pending_member_declined(group, &crypto_id(5)).unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![EVENT_PENDING_MEMBER_DECLINED, BACKUPABLE]);
        assert!(matches!(
            report.events[0],
            IdentityEvent::PendingMemberDeclined { ref contact_identity, .. } if *contact_identity == crypto_id(5)
        ));

        let mut tx = dir.transaction().unwrap();
        tx.mark_pending_member_declined(group, &crypto_id(5)).unwrap();
        assert!(tx.commit().unwrap().events.is_empty());

        let pending = dir
            .reader()
            .pending_member_by_crypto_id(group, &crypto_id(5))
            .unwrap()
            .unwrap();
        assert!(pending.declined);
    }

    #[test]
    fn decline_then_undecline_in_one_transaction_emits_nothing() {
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
                    serialized_details: "eve".into(),
                }],
            )
            .unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.mark_pending_member_declined(group, &crypto_id(5)).unwrap();
        tx.unmark_pending_member_declined(group, &crypto_id(5)).unwrap();
        assert!(tx.commit().unwrap().events.is_empty());

        let pending = dir
            .reader()
            .pending_member_by_crypto_id(group, &crypto_id(5))
            .unwrap()
            .unwrap();
        assert!(!pending.declined);

        let mut tx = dir.transaction().unwrap();
        tx.mark_pending_member_declined(group, &crypto_id(5)).unwrap();
        tx.unmark_pending_member_declined(group, &crypto_id(5)).unwrap();
        tx.mark_pending_member_declined(group, &crypto_id(5)).unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![EVENT_PENDING_MEMBER_DECLINED, BACKUPABLE]);
    }

    #[test]
    fn declining_in_a_joined_group_emits_no_event() {
        let (mut dir, _tmp) = test_directory();
        let (owned, contact) = owned_with_contact(&mut dir);
        let mut tx = dir.transaction().unwrap();
        let group = tx
            .create_joined_group(
                owned,
                contact,
                uid(8),
                &details(0, "j"),
                None,
                &[PendingMemberInput {
                    crypto_id: crypto_id(5),
                    serialized_details: "eve".into(),
                }],
            )
            .unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.mark_pending_member_declined(group, &crypto_id(5)).unwrap();
        assert_eq!(event_names(&tx.commit().unwrap()), vec![BACKUPABLE]);
    }

    #[test]
    fn unknown_pending_member_is_not_found() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let group = create_owned_group(&mut dir, owned, 7);

        let mut tx = dir.transaction().unwrap();
        let err = tx
            .unmark_pending_member_declined(group, &crypto_id(9))
            .unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }
}
