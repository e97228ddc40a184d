use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display};

use refract_pointer::NodeId;
use url::Url;

/// A structured cache-key value. Maps are kept sorted so that two keys
/// denoting the same structured value (modulo key order) canonicalize
/// identically.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Seq(Vec<KeyValue>),
    Map(BTreeMap<String, KeyValue>),
}

impl KeyValue {
    /// Computes the 128-bit fingerprint of this value's canonical form.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new();
        self.write_canonical(&mut hasher);
        Fingerprint::from_hasher(hasher)
    }

    /// Serializes this value deterministically into `hasher`. Each node is
    /// framed with a type tag and a length so that distinct trees can't
    /// collide by concatenation.
    fn write_canonical(&self, hasher: &mut blake3::Hasher) {
        match self {
            KeyValue::Null => {
                hasher.update(b"n");
            }
            KeyValue::Bool(b) => {
                hasher.update(if *b { b"b1" } else { b"b0" });
            }
            KeyValue::Int(i) => {
                hasher.update(b"i");
                hasher.update(&i.to_le_bytes());
            }
            KeyValue::Str(s) => {
                hasher.update(b"s");
                hasher.update(&(s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            KeyValue::Seq(items) => {
                hasher.update(b"[");
                hasher.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    item.write_canonical(hasher);
                }
            }
            KeyValue::Map(entries) => {
                hasher.update(b"{");
                hasher.update(&(entries.len() as u64).to_le_bytes());
                for (key, value) in entries {
                    hasher.update(&(key.len() as u64).to_le_bytes());
                    hasher.update(key.as_bytes());
                    value.write_canonical(hasher);
                }
            }
        }
    }
}

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::Str(s.to_owned())
    }
}

impl From<String> for KeyValue {
    fn from(s: String) -> Self {
        KeyValue::Str(s)
    }
}

impl From<bool> for KeyValue {
    fn from(b: bool) -> Self {
        KeyValue::Bool(b)
    }
}

impl From<i64> for KeyValue {
    fn from(i: i64) -> Self {
        KeyValue::Int(i)
    }
}

impl From<&Url> for KeyValue {
    fn from(uri: &Url) -> Self {
        KeyValue::Str(uri.as_str().to_owned())
    }
}

impl From<&NodeId> for KeyValue {
    fn from(id: &NodeId) -> Self {
        KeyValue::Str(id.to_string())
    }
}

/// An argument that can be carried inside a cache key. The conversion must
/// round-trip: entries are recomputed from their stored [`KeyValue`] alone.
pub trait KeyArg: Sized {
    fn to_key(&self) -> KeyValue;
    fn from_key(value: &KeyValue) -> Option<Self>;
}

impl KeyArg for () {
    fn to_key(&self) -> KeyValue {
        KeyValue::Null
    }

    fn from_key(value: &KeyValue) -> Option<Self> {
        matches!(value, KeyValue::Null).then_some(())
    }
}

impl KeyArg for String {
    fn to_key(&self) -> KeyValue {
        KeyValue::Str(self.clone())
    }

    fn from_key(value: &KeyValue) -> Option<Self> {
        match value {
            KeyValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl KeyArg for Url {
    fn to_key(&self) -> KeyValue {
        KeyValue::Str(self.as_str().to_owned())
    }

    fn from_key(value: &KeyValue) -> Option<Self> {
        match value {
            KeyValue::Str(s) => Url::parse(s).ok(),
            _ => None,
        }
    }
}

impl KeyArg for NodeId {
    fn to_key(&self) -> KeyValue {
        KeyValue::Str(self.to_string())
    }

    fn from_key(value: &KeyValue) -> Option<Self> {
        match value {
            KeyValue::Str(s) => NodeId::parse(s).ok(),
            _ => None,
        }
    }
}

/// A 128-bit content fingerprint. Determinism is what matters here, not
/// collision resistance, so a truncated blake3 digest is plenty.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    fn from_hasher(hasher: blake3::Hasher) -> Self {
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self(bytes)
    }

    /// Fingerprints a raw byte string.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(bytes);
        Self::from_hasher(hasher)
    }

    /// Returns the fingerprint as a lowercase hex string, the form used
    /// for producer-chosen content hashes.
    pub fn to_hex(self) -> String {
        self.to_string()
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// Fingerprints a JSON value, treating objects as unordered maps.
pub fn fingerprint_json(value: &serde_json::Value) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    write_json(&mut hasher, value);
    Fingerprint::from_hasher(hasher)
}

fn write_json(hasher: &mut blake3::Hasher, value: &serde_json::Value) {
    match value {
        serde_json::Value::Null => {
            hasher.update(b"n");
        }
        serde_json::Value::Bool(b) => {
            hasher.update(if *b { b"b1" } else { b"b0" });
        }
        serde_json::Value::Number(n) => {
            let repr = n.to_string();
            hasher.update(b"d");
            hasher.update(&(repr.len() as u64).to_le_bytes());
            hasher.update(repr.as_bytes());
        }
        serde_json::Value::String(s) => {
            hasher.update(b"s");
            hasher.update(&(s.len() as u64).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        serde_json::Value::Array(items) => {
            hasher.update(b"[");
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_json(hasher, item);
            }
        }
        serde_json::Value::Object(entries) => {
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            hasher.update(b"{");
            hasher.update(&(keys.len() as u64).to_le_bytes());
            for key in keys {
                hasher.update(&(key.len() as u64).to_le_bytes());
                hasher.update(key.as_bytes());
                write_json(hasher, &entries[key]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, KeyValue)]) -> KeyValue {
        KeyValue::Map(
            entries
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn test_map_key_order_is_canonical() {
        let a = map(&[("x", KeyValue::Int(1)), ("y", KeyValue::Int(2))]);
        let b = map(&[("y", KeyValue::Int(2)), ("x", KeyValue::Int(1))]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_distinct_values_differ() {
        let a = KeyValue::Seq(vec![KeyValue::Str("ab".into()), KeyValue::Str("c".into())]);
        let b = KeyValue::Seq(vec![KeyValue::Str("a".into()), KeyValue::Str("bc".into())]);
        assert_ne!(a.fingerprint(), b.fingerprint());

        assert_ne!(
            KeyValue::Str("1".into()).fingerprint(),
            KeyValue::Int(1).fingerprint()
        );
        assert_ne!(
            KeyValue::Null.fingerprint(),
            KeyValue::Str(String::new()).fingerprint()
        );
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let key = map(&[
            ("loader", "serverDocument".into()),
            ("uri", "file:///ws/openapi.yml".into()),
        ]);
        assert_eq!(key.fingerprint(), key.fingerprint());
        assert_eq!(key.fingerprint().to_hex().len(), 32);
    }

    #[test]
    fn test_json_object_order_is_canonical() {
        let a: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": [true, null]}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b": [true, null], "a": 1}"#).unwrap();
        assert_eq!(fingerprint_json(&a), fingerprint_json(&b));

        let c: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": [null, true]}"#).unwrap();
        assert_ne!(fingerprint_json(&a), fingerprint_json(&c));
    }

    #[test]
    fn test_key_arg_roundtrip() {
        let uri = Url::parse("file:///ws/openapi.yml").unwrap();
        assert_eq!(Url::from_key(&uri.to_key()), Some(uri));

        let id = NodeId::parse("file:///ws/a.yml#/components/schemas/Pet").unwrap();
        assert_eq!(NodeId::from_key(&id.to_key()), Some(id));

        assert_eq!(<() as KeyArg>::from_key(&().to_key()), Some(()));
        assert_eq!(<() as KeyArg>::from_key(&KeyValue::Bool(true)), None);
    }
}
