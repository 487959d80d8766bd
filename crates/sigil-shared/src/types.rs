use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::UID_SIZE;
use crate::error::TypeError;

// Cryptographic identity = opaque public identity bytes, compared bytewise
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CryptoId(Vec<u8>);

impl CryptoId {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, TypeError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(TypeError::EmptyIdentity);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        Self::from_bytes(hex::decode(s)?)
    }

    pub fn short(&self) -> String {
        let hex = self.to_hex();
        hex[..hex.len().min(8)].to_string()
    }
}

impl fmt::Display for CryptoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for CryptoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoId({})", self.short())
    }
}

impl Serialize for CryptoId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for CryptoId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 32-byte identifier used for devices, groups and server labels.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub [u8; UID_SIZE]);

impl Uid {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; UID_SIZE] = bytes
            .try_into()
            .map_err(|_| TypeError::InvalidUidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        Self::from_slice(&hex::decode(s)?)
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.short())
    }
}

impl Serialize for Uid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Uid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupV2Category {
    Server,
    Keycloak,
}

impl GroupV2Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Keycloak => "keycloak",
        }
    }
}

impl FromStr for GroupV2Category {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(Self::Server),
            "keycloak" => Ok(Self::Keycloak),
            other => Err(TypeError::UnknownCategory(other.to_string())),
        }
    }
}

/// Compound identifier of a group v2: the same UID may exist on two servers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupV2Identifier {
    pub uid: Uid,
    pub server_url: String,
    pub category: GroupV2Category,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_hex_round_trip() {
        let uid = Uid::random();
        let parsed = Uid::from_hex(&uid.to_hex()).unwrap();
        assert_eq!(uid, parsed);
        assert_eq!(uid.short().len(), 8);
    }

    #[test]
    fn test_uid_rejects_wrong_length() {
        assert!(matches!(
            Uid::from_slice(&[0u8; 16]),
            Err(TypeError::InvalidUidLength(16))
        ));
    }

    #[test]
    fn test_crypto_id_rejects_empty() {
        assert!(matches!(
            CryptoId::from_bytes(Vec::new()),
            Err(TypeError::EmptyIdentity)
        ));
    }

    #[test]
    fn test_crypto_id_serializes_as_hex() {
        let id = CryptoId::from_bytes(vec![0xAB, 0xCD]).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abcd\"");
        assert_eq!(id.short(), "abcd");
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("keycloak".parse::<GroupV2Category>().unwrap(), GroupV2Category::Keycloak);
        assert!("other".parse::<GroupV2Category>().is_err());
    }
}
