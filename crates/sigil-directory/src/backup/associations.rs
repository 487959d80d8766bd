//! Table binding decoded backup items to the rows restored from them.
//!
//! Phase 1 of a restore inserts one bare row per item and records it here
//! under the item's token. Phase 2 looks related rows up by token to wire
//! relationships, whatever order the items were restored in.

use std::collections::{HashMap, HashSet};
use std::fmt;

use uuid::Uuid;

use crate::error::{DirectoryError, Result};
use crate::models::{ContactKey, EntityKey};

/// Identity of one decoded item for the duration of a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RestoreToken(Uuid);

impl RestoreToken {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RestoreToken {
    fn default() -> Self {
        Self::fresh()
    }
}

impl fmt::Display for RestoreToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A decoded backup or snapshot node.
pub trait BackupNode {
    fn token(&self) -> RestoreToken;
}

#[derive(Debug, Default)]
pub(crate) struct Associations {
    keys: HashMap<RestoreToken, EntityKey>,
    claims: HashSet<(&'static str, Vec<u8>, Vec<u8>)>,
    contacts: HashMap<(Vec<u8>, Vec<u8>), ContactKey>,
}

impl Associations {
    pub fn associate(&mut self, node: &impl BackupNode, key: impl Into<EntityKey>) -> Result<()> {
        let token = node.token();
        if self.keys.insert(token, key.into()).is_some() {
            return Err(DirectoryError::malformed(format!("{token} restored twice")));
        }
        Ok(())
    }

    /// The row restored from `node`, which must be of kind `K`.
    pub fn get<K: TryFrom<EntityKey>>(&self, node: &impl BackupNode) -> Result<K> {
        let token = node.token();
        let key = self
            .keys
            .get(&token)
            .copied()
            .ok_or_else(|| DirectoryError::malformed(format!("{token} was never restored")))?;
        K::try_from(key)
            .map_err(|_| DirectoryError::malformed(format!("{token} is bound to unexpected {key}")))
    }

    /// Reserve a unique key within `scope`. A second claim means the backup
    /// itself holds a duplicate.
    pub fn claim(&mut self, scope: &'static str, owner: &[u8], key: &[u8]) -> Result<()> {
        if !self.claims.insert((scope, owner.to_vec(), key.to_vec())) {
            return Err(DirectoryError::malformed(format!(
                "duplicate {scope} {} in backup",
                hex::encode(key)
            )));
        }
        Ok(())
    }

    /// Remember the contact restored for (owned identity, contact identity),
    /// so that group members can be resolved by identity.
    pub fn register_contact(&mut self, owned: &[u8], contact: &[u8], key: ContactKey) {
        self.contacts.insert((owned.to_vec(), contact.to_vec()), key);
    }

    pub fn contact(&self, owned: &[u8], contact: &[u8]) -> Option<ContactKey> {
        self.contacts
            .get(&(owned.to_vec(), contact.to_vec()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupKey, OwnedIdentityKey};

    struct Node(RestoreToken);

    impl BackupNode for Node {
        fn token(&self) -> RestoreToken {
            self.0
        }
    }

    #[test]
    fn lookups_are_typed() {
        let mut associations = Associations::default();
        let node = Node(RestoreToken::fresh());
        associations.associate(&node, GroupKey(4)).unwrap();

        let key: GroupKey = associations.get(&node).unwrap();
        assert_eq!(key, GroupKey(4));
        assert!(associations.get::<OwnedIdentityKey>(&node).is_err());
        assert!(associations
            .get::<GroupKey>(&Node(RestoreToken::fresh()))
            .is_err());
    }

    #[test]
    fn second_claim_is_malformed() {
        let mut associations = Associations::default();
        associations.claim("contact", b"alice", b"bob").unwrap();
        associations.claim("contact", b"carol", b"bob").unwrap();
        let err = associations.claim("contact", b"alice", b"bob").unwrap_err();
        assert!(matches!(err, DirectoryError::MalformedBackupData(_)));
    }

    #[test]
    fn tokens_are_distinct() {
        assert_ne!(RestoreToken::fresh(), RestoreToken::default());
    }
}
