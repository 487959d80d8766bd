//! Byte encodings used by the backup format, and decoding of photo labels
//! written by older engine versions.
//!
//! Labels have been stored three ways over time. Decoding tries each known
//! representation in a fixed order and takes the first that yields a valid
//! 32-byte UID.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::Value;
use sigil_shared::constants::UID_SIZE;
use sigil_shared::Uid;

/// A label decoder: `None` when the value is not in its representation.
type LabelDecoder = fn(&Value) -> Option<Uid>;

const LABEL_DECODERS: &[(&str, LabelDecoder)] = &[
    ("raw bytes", label_from_raw_bytes),
    ("structured identifier", label_from_structured),
    ("string encoded", label_from_hex),
];

/// Decode a label in any representation ever written.
pub(crate) fn decode_label(value: &Value) -> Result<Uid, String> {
    for (name, decode) in LABEL_DECODERS {
        if let Some(uid) = decode(value) {
            tracing::trace!(representation = name, "decoded photo label");
            return Ok(uid);
        }
    }
    Err(format!("undecodable photo server label: {value}"))
}

/// Decode the label of a details item. The label only matters alongside a
/// server key: without one it is ignored.
pub(crate) fn decode_optional_label(
    key_present: bool,
    value: Option<&Value>,
) -> Result<Option<Uid>, String> {
    match value {
        Some(value) if key_present && !value.is_null() => decode_label(value).map(Some),
        _ => Ok(None),
    }
}

fn label_from_raw_bytes(value: &Value) -> Option<Uid> {
    let bytes = STANDARD.decode(value.as_str()?).ok()?;
    Uid::from_slice(&bytes).ok()
}

fn label_from_structured(value: &Value) -> Option<Uid> {
    match value {
        Value::Object(map) => label_from_raw_bytes(map.get("raw")?),
        Value::Array(items) if items.len() == UID_SIZE => {
            let bytes = items
                .iter()
                .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()?;
            Uid::from_slice(&bytes).ok()
        }
        _ => None,
    }
}

fn label_from_hex(value: &Value) -> Option<Uid> {
    let raw = value.as_str()?;
    if raw.len() != UID_SIZE * 2 {
        return None;
    }
    Uid::from_hex(raw).ok()
}

/// Standard base64 for byte vectors.
pub(crate) mod b64 {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: impl AsRef<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes.as_ref()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod b64_option {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| STANDARD.decode(raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// UIDs are plain base64 in backups, unlike their hex form elsewhere.
pub(crate) mod b64_uid {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(uid: &Uid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(uid.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uid, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(raw).map_err(serde::de::Error::custom)?;
        Uid::from_slice(&bytes).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod b64_crypto_id {
    use super::*;
    use serde::{Deserialize, Deserializer, Serializer};
    use sigil_shared::CryptoId;

    pub fn serialize<S: Serializer>(id: &CryptoId, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(id.as_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<CryptoId, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(raw).map_err(serde::de::Error::custom)?;
        CryptoId::from_bytes(bytes).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod b64_uid_option {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(uid: &Option<Uid>, serializer: S) -> Result<S::Ok, S::Error> {
        match uid {
            Some(uid) => serializer.serialize_some(&STANDARD.encode(uid.as_bytes())),
            None => serializer.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn label() -> Uid {
        Uid([0x5A; UID_SIZE])
    }

    #[test]
    fn raw_base64_label() {
        let value = json!(STANDARD.encode(label().as_bytes()));
        assert_eq!(decode_label(&value).unwrap(), label());
    }

    #[test]
    fn structured_labels() {
        let object = json!({ "raw": STANDARD.encode(label().as_bytes()) });
        assert_eq!(decode_label(&object).unwrap(), label());

        let array = json!(vec![0x5Au8; UID_SIZE]);
        assert_eq!(decode_label(&array).unwrap(), label());
    }

    #[test]
    fn hex_string_label() {
        let value = json!(label().to_hex());
        assert_eq!(decode_label(&value).unwrap(), label());
    }

    #[test]
    fn undecodable_label_is_an_error() {
        assert!(decode_label(&json!("not a label")).is_err());
        assert!(decode_label(&json!([1, 2, 3])).is_err());
        assert!(decode_label(&json!(42)).is_err());
    }

    #[test]
    fn label_without_key_is_ignored() {
        let garbage = json!("garbage");
        assert_eq!(decode_optional_label(false, Some(&garbage)).unwrap(), None);
        assert!(decode_optional_label(true, Some(&garbage)).is_err());
        assert_eq!(decode_optional_label(true, None).unwrap(), None);
    }
}
