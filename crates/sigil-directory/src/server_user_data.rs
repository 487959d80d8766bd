//! Refresh scheduling for assets hosted on the server.
//!
//! Each uploaded asset (an identity or group photo) is identified by a label
//! and must be refreshed before the server expires it. Identity and group
//! records are unique per (owner, label); group v2 records additionally carry
//! the full group identifier.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};
use sigil_shared::{CryptoId, GroupV2Category, GroupV2Identifier, Uid};

use crate::changes::{Attribute, Subject};
use crate::database::Reader;
use crate::error::{DirectoryError, Result};
use crate::models::{
    crypto_id_column, invalid_column, timestamp_column, uid_column, GroupVariant,
    OwnedIdentityKey, ServerUserData, ServerUserDataKey, UserDataTarget,
};
use crate::transaction::DirectoryTx;

const COLUMNS: &str = "id, kind, owned_identity, label, next_refresh, group_uid, group_v2_uid, \
                       group_v2_server_url, group_v2_category";

/// Outcome of a synchronization pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserDataSync {
    /// Records no details object refers to anymore.
    pub to_delete: Vec<ServerUserData>,
    /// Records still in use whose refresh deadline has passed.
    pub to_refresh: Vec<ServerUserData>,
}

impl Reader<'_> {
    pub fn server_user_data_by_key(&self, key: ServerUserDataKey) -> Result<Option<ServerUserData>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {COLUMNS} FROM server_user_data WHERE id = ?1"),
                params![key.0],
                row_to_server_user_data,
            )
            .optional()?)
    }

    /// Identity or group record with this exact (owner, label).
    pub fn server_user_data(&self, owner: &CryptoId, label: &Uid) -> Result<Option<ServerUserData>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM server_user_data
                     WHERE owned_identity = ?1 AND label = ?2 AND kind <> 'group_v2'"
                ),
                params![owner.as_bytes(), label.as_bytes()],
                row_to_server_user_data,
            )
            .optional()?)
    }

    pub fn group_v2_server_user_data(
        &self,
        owner: &CryptoId,
        label: &Uid,
        group: &GroupV2Identifier,
    ) -> Result<Option<ServerUserData>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {COLUMNS} FROM server_user_data
                     WHERE kind = 'group_v2' AND owned_identity = ?1 AND label = ?2
                       AND group_v2_uid = ?3 AND group_v2_server_url = ?4
                       AND group_v2_category = ?5"
                ),
                params![
                    owner.as_bytes(),
                    label.as_bytes(),
                    group.uid.as_bytes(),
                    group.server_url,
                    group.category.as_str(),
                ],
                row_to_server_user_data,
            )
            .optional()?)
    }

    /// Every record of one owner, ordered by kind then label.
    pub fn server_user_data_for(&self, owner: &CryptoId) -> Result<Vec<ServerUserData>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM server_user_data
             WHERE owned_identity = ?1
             ORDER BY kind ASC, label ASC, id ASC"
        ))?;
        let rows = stmt.query_map(params![owner.as_bytes()], row_to_server_user_data)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn all_server_user_data(&self) -> Result<Vec<ServerUserData>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {COLUMNS} FROM server_user_data ORDER BY owned_identity ASC, kind ASC, label ASC"
        ))?;
        let rows = stmt.query_map([], row_to_server_user_data)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Split the records into those to delete and those due for refresh.
    ///
    /// A record is kept while the published details of its owned identity,
    /// or of one of that identity's owned groups, still carry its label.
    /// Group v2 records are managed by the group protocol and always kept.
    pub fn server_user_data_to_synchronize(&self, now: DateTime<Utc>) -> Result<UserDataSync> {
        let mut kept: HashSet<(Vec<u8>, Uid)> = HashSet::new();
        for owned in self.owned_identities()? {
            let owner = owned.crypto_id.as_bytes().to_vec();
            if let Some(details) = self.owned_published_details(owned.key)? {
                if let Some(server) = details.core.photo_server {
                    kept.insert((owner.clone(), server.label));
                }
            }
            for group in self.groups(owned.key)? {
                if !matches!(group.variant, GroupVariant::Owned { .. }) {
                    continue;
                }
                let published = self.require_group_details(group.published_details)?;
                if let Some(server) = published.core.photo_server {
                    kept.insert((owner.clone(), server.label));
                }
            }
        }

        let mut sync = UserDataSync::default();
        for data in self.all_server_user_data()? {
            let keep = matches!(data.target, UserDataTarget::GroupV2 { .. })
                || kept.contains(&(data.owned_identity.as_bytes().to_vec(), data.label));
            if !keep {
                sync.to_delete.push(data);
            } else if data.next_refresh < now {
                sync.to_refresh.push(data);
            }
        }

        tracing::debug!(
            to_delete = sync.to_delete.len(),
            to_refresh = sync.to_refresh.len(),
            "server user data synchronization computed"
        );
        Ok(sync)
    }
}

impl DirectoryTx<'_> {
    /// Return the record for (owner, label, target), creating it when absent.
    /// Without an explicit deadline the first refresh is due one refresh
    /// interval from now.
    pub fn get_or_create_server_user_data(
        &mut self,
        owner: &CryptoId,
        label: Uid,
        target: UserDataTarget,
        next_refresh: Option<DateTime<Utc>>,
    ) -> Result<ServerUserData> {
        let existing = match &target {
            UserDataTarget::GroupV2 { group } => {
                self.reader().group_v2_server_user_data(owner, &label, group)?
            }
            _ => self.reader().server_user_data(owner, &label)?,
        };
        if let Some(existing) = existing {
            if existing.target == target {
                return Ok(existing);
            }
            return Err(DirectoryError::duplicate("server user data", label.short()));
        }

        let next_refresh = next_refresh.unwrap_or_else(|| Utc::now() + self.refresh_interval());
        let (group_uid, v2_uid, v2_url, v2_category) = match &target {
            UserDataTarget::Identity => (None, None, None, None),
            UserDataTarget::Group { group_uid } => (Some(*group_uid), None, None, None),
            UserDataTarget::GroupV2 { group } => (
                None,
                Some(group.uid),
                Some(group.server_url.as_str()),
                Some(group.category.as_str()),
            ),
        };
        self.conn().execute(
            "INSERT INTO server_user_data
                (kind, owned_identity, label, next_refresh, group_uid,
                 group_v2_uid, group_v2_server_url, group_v2_category)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                target.kind(),
                owner.as_bytes(),
                label.as_bytes(),
                next_refresh.to_rfc3339(),
                group_uid.as_ref().map(Uid::as_bytes),
                v2_uid.as_ref().map(Uid::as_bytes),
                v2_url,
                v2_category,
            ],
        )?;
        let key = ServerUserDataKey(self.conn().last_insert_rowid());
        self.changes.inserted(
            key.into(),
            Subject::ServerUserData {
                owned: owner.clone(),
                label,
            },
        );

        tracing::debug!(label = %label.short(), kind = target.kind(), "server user data created");
        Ok(ServerUserData {
            key,
            owned_identity: owner.clone(),
            label,
            next_refresh,
            target,
        })
    }

    /// Push the deadline to one refresh interval after `now` and return it.
    pub fn update_next_refresh_timestamp(
        &mut self,
        key: ServerUserDataKey,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        let data = self
            .reader()
            .server_user_data_by_key(key)?
            .ok_or(DirectoryError::NotFound("server user data"))?;
        let next_refresh = now + self.refresh_interval();

        self.conn().execute(
            "UPDATE server_user_data SET next_refresh = ?1 WHERE id = ?2",
            params![next_refresh.to_rfc3339(), key.0],
        )?;
        self.changes.updated(
            key.into(),
            Subject::ServerUserData {
                owned: data.owned_identity,
                label: data.label,
            },
            Attribute::NextRefresh,
        );
        Ok(next_refresh)
    }

    pub fn delete_server_user_data(&mut self, key: ServerUserDataKey) -> Result<()> {
        let data = self
            .reader()
            .server_user_data_by_key(key)?
            .ok_or(DirectoryError::NotFound("server user data"))?;

        self.conn()
            .execute("DELETE FROM server_user_data WHERE id = ?1", params![key.0])?;
        self.changes.deleted(
            key.into(),
            Subject::ServerUserData {
                owned: data.owned_identity,
                label: data.label,
            },
        );
        Ok(())
    }

    pub(crate) fn delete_group_server_user_data(
        &mut self,
        owner: &CryptoId,
        group_uid: &Uid,
    ) -> Result<()> {
        let records = self.reader().server_user_data_for(owner)?;
        for data in records {
            if matches!(&data.target, UserDataTarget::Group { group_uid: uid } if uid == group_uid) {
                self.delete_server_user_data(data.key)?;
            }
        }
        Ok(())
    }

    /// Make sure the photo label of the owned identity's published details
    /// has a refresh record. Returns `None` when no photo was uploaded.
    pub fn get_or_create_identity_user_data_for_published_details(
        &mut self,
        owned: OwnedIdentityKey,
    ) -> Result<Option<ServerUserData>> {
        let identity = self.reader().require_owned_identity(owned)?;
        let Some(details) = self.reader().owned_published_details(owned)? else {
            return Ok(None);
        };
        let Some(server) = details.core.photo_server else {
            return Ok(None);
        };

        self.get_or_create_server_user_data(
            &identity.crypto_id,
            server.label,
            UserDataTarget::Identity,
            None,
        )
        .map(Some)
    }
}

fn row_to_server_user_data(row: &rusqlite::Row<'_>) -> rusqlite::Result<ServerUserData> {
    let kind: String = row.get(1)?;
    let target = match kind.as_str() {
        "identity" => UserDataTarget::Identity,
        "group" => {
            let raw: Option<Vec<u8>> = row.get(5)?;
            let raw = raw.ok_or_else(|| invalid_column(5, "group user data without group uid"))?;
            UserDataTarget::Group {
                group_uid: uid_column(5, raw)?,
            }
        }
        "group_v2" => {
            let uid: Option<Vec<u8>> = row.get(6)?;
            let server_url: Option<String> = row.get(7)?;
            let category: Option<String> = row.get(8)?;
            let (Some(uid), Some(server_url), Some(category)) = (uid, server_url, category) else {
                return Err(invalid_column(6, "incomplete group v2 identifier"));
            };
            let category: GroupV2Category = category
                .parse()
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
            UserDataTarget::GroupV2 {
                group: GroupV2Identifier {
                    uid: uid_column(6, uid)?,
                    server_url,
                    category,
                },
            }
        }
        other => return Err(invalid_column(1, format!("unknown user data kind {other}"))),
    };

    let next_refresh = timestamp_column(4, row.get(4)?)?
        .ok_or_else(|| invalid_column(4, "missing refresh timestamp"))?;

    Ok(ServerUserData {
        key: ServerUserDataKey(row.get(0)?),
        owned_identity: crypto_id_column(2, row.get(2)?)?,
        label: uid_column(3, row.get(3)?)?,
        next_refresh,
        target,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use sigil_shared::{GroupV2Category, GroupV2Identifier};

    use crate::error::DirectoryError;
    use crate::events::{IdentityEvent, EVENT_SERVER_LABEL_DELETED};
    use crate::models::{DetailsInput, UserDataTarget};
    use crate::test_support::*;

    fn v2(server: &str) -> UserDataTarget {
        UserDataTarget::GroupV2 {
            group: GroupV2Identifier {
                uid: uid(40),
                server_url: server.to_string(),
                category: GroupV2Category::Server,
            },
        }
    }

    #[test]
    fn get_or_create_returns_existing_record() {
        let (mut dir, _tmp) = test_directory();
        let owner = crypto_id(1);

        let mut tx = dir.transaction().unwrap();
        let first = tx
            .get_or_create_server_user_data(&owner, uid(3), UserDataTarget::Identity, None)
            .unwrap();
        let second = tx
            .get_or_create_server_user_data(&owner, uid(3), UserDataTarget::Identity, None)
            .unwrap();
        assert_eq!(first.key, second.key);

        let err = tx
            .get_or_create_server_user_data(
                &owner,
                uid(3),
                UserDataTarget::Group { group_uid: uid(4) },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateEntity { .. }));
    }

    #[test]
    fn group_v2_records_are_keyed_by_full_identifier() {
        let (mut dir, _tmp) = test_directory();
        let owner = crypto_id(1);

        let mut tx = dir.transaction().unwrap();
        let a = tx
            .get_or_create_server_user_data(&owner, uid(3), v2("https://a.example"), None)
            .unwrap();
        let b = tx
            .get_or_create_server_user_data(&owner, uid(3), v2("https://b.example"), None)
            .unwrap();
        tx.commit().unwrap();

        assert_ne!(a.key, b.key);
        let UserDataTarget::GroupV2 { group } = v2("https://b.example") else {
            unreachable!()
        };
        let found = dir
            .reader()
            .group_v2_server_user_data(&owner, &uid(3), &group)
            .unwrap()
            .unwrap();
        assert_eq!(found.key, b.key);
        assert!(dir.reader().server_user_data(&owner, &uid(3)).unwrap().is_none());
    }

    #[test]
    fn next_refresh_moves_by_the_configured_interval() {
        let (mut dir, _tmp) = test_directory();
        let owner = crypto_id(1);
        let now = fixed_time();

        let mut tx = dir.transaction().unwrap();
        let data = tx
            .get_or_create_server_user_data(&owner, uid(3), UserDataTarget::Identity, Some(now))
            .unwrap();
        assert_eq!(data.next_refresh, now);

        let next = tx.update_next_refresh_timestamp(data.key, now).unwrap();
        assert_eq!(next, now + Duration::days(7));
        tx.commit().unwrap();

        let stored = dir.reader().server_user_data_by_key(data.key).unwrap().unwrap();
        assert_eq!(stored.next_refresh, next);
    }

    #[test]
    fn synchronization_keeps_labels_still_in_use() {
        let (mut dir, _tmp) = test_directory();
        let owned = create_owned(&mut dir, 1);
        let owner = crypto_id(1);
        let past = fixed_time() - Duration::days(30);

        let mut tx = dir.transaction().unwrap();
        tx.update_owned_published_details(
            owned,
            &DetailsInput::new(1, "alice").with_photo_server(vec![9; 16], uid(10)),
        )
        .unwrap();
        let in_use = tx
            .get_or_create_identity_user_data_for_published_details(owned)
            .unwrap()
            .unwrap();
        tx.update_next_refresh_timestamp(in_use.key, past).unwrap();
        let stale = tx
            .get_or_create_server_user_data(&owner, uid(11), UserDataTarget::Identity, None)
            .unwrap();
        let v2_record = tx
            .get_or_create_server_user_data(&owner, uid(12), v2("https://a.example"), None)
            .unwrap();
        tx.commit().unwrap();

        let sync = dir
            .reader()
            .server_user_data_to_synchronize(fixed_time())
            .unwrap();
        let deleted: Vec<_> = sync.to_delete.iter().map(|d| d.key).collect();
        let refreshed: Vec<_> = sync.to_refresh.iter().map(|d| d.key).collect();
        assert_eq!(deleted, vec![stale.key]);
        assert_eq!(refreshed, vec![in_use.key]);
        assert!(!deleted.contains(&v2_record.key));
    }

    #[test]
    fn deleting_a_record_emits_label_deleted() {
        let (mut dir, _tmp) = test_directory();
        let owner = crypto_id(1);

        let mut tx = dir.transaction().unwrap();
        let data = tx
            .get_or_create_server_user_data(&owner, uid(3), UserDataTarget::Identity, None)
            .unwrap();
        tx.commit().unwrap();

        let mut tx = dir.transaction().unwrap();
        tx.delete_server_user_data(data.key).unwrap();
        let report = tx.commit().unwrap();
        assert_eq!(event_names(&report), vec![EVENT_SERVER_LABEL_DELETED, BACKUPABLE]);
        assert_eq!(
            report.events[0],
            IdentityEvent::ServerLabelDeleted {
                owned_identity: owner,
                label: uid(3),
            }
        );
    }
}
