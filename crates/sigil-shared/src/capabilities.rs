//! Device capabilities and their flattened storage form.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::CAPABILITY_SEPARATOR;

/// A feature a device advertises to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WebrtcContinuousIce,
    OneToOneContacts,
    GroupsV2,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebrtcContinuousIce => "webrtc_continuous_ice",
            Self::OneToOneContacts => "one_to_one_contacts",
            Self::GroupsV2 => "groups_v2",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webrtc_continuous_ice" => Ok(Self::WebrtcContinuousIce),
            "one_to_one_contacts" => Ok(Self::OneToOneContacts),
            "groups_v2" => Ok(Self::GroupsV2),
            _ => Err(()),
        }
    }
}

/// Flatten a capability set: raw values sorted and joined with `|`.
pub fn join_capabilities(capabilities: &BTreeSet<Capability>) -> String {
    let mut raw: Vec<&str> = capabilities.iter().map(Capability::as_str).collect();
    raw.sort_unstable();
    raw.join(&CAPABILITY_SEPARATOR.to_string())
}

/// Parse a flattened capability set. Unknown values (written by newer
/// versions) are skipped.
pub fn parse_capabilities(raw: &str) -> BTreeSet<Capability> {
    raw.split(CAPABILITY_SEPARATOR)
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_is_sorted_by_raw_value() {
        let caps: BTreeSet<_> = [Capability::WebrtcContinuousIce, Capability::GroupsV2]
            .into_iter()
            .collect();
        assert_eq!(join_capabilities(&caps), "groups_v2|webrtc_continuous_ice");
    }

    #[test]
    fn test_parse_skips_unknown_values() {
        let caps = parse_capabilities("groups_v2|teleportation|one_to_one_contacts");
        assert_eq!(caps.len(), 2);
        assert!(caps.contains(&Capability::OneToOneContacts));
    }

    #[test]
    fn test_empty_set_round_trips() {
        let caps = BTreeSet::new();
        assert!(parse_capabilities(&join_capabilities(&caps)).is_empty());
    }
}
