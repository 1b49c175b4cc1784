//! This module deals with computing Request IDs based on the content of a
//! message.
//!
//! A request ID is a SHA256 hash of the request's body. See
//! [Representation-independent Hashing of Structured Data](https://internetcomputer.org/docs/current/references/ic-interface-spec#hash-of-map)
//! for the method of calculation.
//!
//! Requests are described by an explicit [`FieldMap`]: an ordered list of field names and
//! optional values. Absent fields are left out of the hash entirely, and the order in which
//! fields are listed does not matter.
use candid::Principal;
use error::RequestIdFromStringError;
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use sha2::{Digest, Sha256};
use std::{
    fmt::{self, Display, Formatter},
    ops::Deref,
    str::FromStr,
};

pub(crate) mod error;
#[doc(inline)]
pub use error::RequestIdError;

const IC_REQUEST_DOMAIN_SEPARATOR: &[u8; 11] = b"\x0Aic-request";

/// Type alias for a sha256 result (ie. a u256).
pub type Sha256Hash = [u8; 32];

/// A value in the hashing scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashableValue {
    /// UTF-8 text, hashed as its bytes.
    Text(String),
    /// An unsigned integer, hashed as its unsigned LEB128 encoding.
    Nat(u64),
    /// A blob, hashed as is.
    Bytes(Vec<u8>),
    /// An array, hashed as the concatenation of its elements' hashes.
    Array(Vec<HashableValue>),
    /// A nested map.
    Map(FieldMap),
}

/// An ordered list of fields, some of which may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: Vec<(String, Option<HashableValue>)>,
}

impl FieldMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field.
    pub fn with(mut self, name: impl Into<String>, value: impl ToHashable) -> Self {
        self.fields.push((name.into(), Some(value.to_hashable())));
        self
    }

    /// Adds a field that is left out of the hash if `value` is `None`.
    pub fn with_opt<T: ToHashable>(mut self, name: impl Into<String>, value: Option<T>) -> Self {
        self.fields
            .push((name.into(), value.map(|v| v.to_hashable())));
        self
    }

    /// Adds a blob field.
    pub fn with_bytes(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.fields
            .push((name.into(), Some(HashableValue::Bytes(value.into()))));
        self
    }

    /// Adds a blob field that is left out of the hash if `value` is `None`.
    pub fn with_opt_bytes(mut self, name: impl Into<String>, value: Option<Vec<u8>>) -> Self {
        self.fields
            .push((name.into(), value.map(HashableValue::Bytes)));
        self
    }

    /// Appends a field.
    pub fn push(&mut self, name: impl Into<String>, value: Option<HashableValue>) {
        self.fields.push((name.into(), value));
    }

    /// Iterates over the present fields, in the order they were listed.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HashableValue)> {
        self.fields
            .iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.as_str(), v)))
    }

    /// The names of the present fields, in the order they were listed.
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|(k, _)| k).collect()
    }

    /// Returns the value of a present field.
    pub fn get(&self, name: &str) -> Option<&HashableValue> {
        self.iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }
}

/// Types with a representation in the hashing scheme.
pub trait ToHashable {
    /// The value to hash in place of `self`.
    fn to_hashable(&self) -> HashableValue;
}

impl<T: ToHashable + ?Sized> ToHashable for &T {
    fn to_hashable(&self) -> HashableValue {
        (**self).to_hashable()
    }
}

impl ToHashable for HashableValue {
    fn to_hashable(&self) -> HashableValue {
        self.clone()
    }
}

impl ToHashable for FieldMap {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Map(self.clone())
    }
}

impl ToHashable for str {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Text(self.to_string())
    }
}

impl ToHashable for String {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Text(self.clone())
    }
}

impl ToHashable for u64 {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Nat(*self)
    }
}

impl ToHashable for Principal {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Bytes(self.as_slice().to_vec())
    }
}

impl ToHashable for RequestId {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Bytes(self.0.to_vec())
    }
}

impl ToHashable for ic_certified_tree::Label {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Bytes(self.as_bytes().to_vec())
    }
}

impl<T: ToHashable> ToHashable for Vec<T> {
    fn to_hashable(&self) -> HashableValue {
        HashableValue::Array(self.iter().map(ToHashable::to_hashable).collect())
    }
}

/// Hashes a single value.
pub fn hash_value(value: &HashableValue) -> Sha256Hash {
    match value {
        HashableValue::Text(s) => Sha256::digest(s.as_bytes()).into(),
        HashableValue::Nat(n) => {
            let mut arr = [0u8; 10];
            let mut writable = &mut arr[..];
            // A u64 needs at most 10 LEB128 bytes.
            let len = leb128::write::unsigned(&mut writable, *n).unwrap_or(0);
            Sha256::digest(&arr[..len]).into()
        }
        HashableValue::Bytes(b) => Sha256::digest(b).into(),
        HashableValue::Array(elements) => {
            let mut hasher = Sha256::new();
            for element in elements {
                hasher.update(hash_value(element));
            }
            hasher.finalize().into()
        }
        HashableValue::Map(map) => hash_of_map(map),
    }
}

/// Hashes a map: each present field becomes a pair of hashes `(H(name), H(value))`,
/// the pairs are sorted by the hashed name, concatenated, and hashed.
pub fn hash_of_map(map: &FieldMap) -> Sha256Hash {
    let mut pairs: Vec<(Sha256Hash, Sha256Hash)> = map
        .iter()
        .map(|(name, value)| (Sha256::digest(name.as_bytes()).into(), hash_value(value)))
        .collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    for (name, value) in pairs {
        hasher.update(name);
        hasher.update(value);
    }
    hasher.finalize().into()
}

/// Derives the request id of a value, which must be represented as a map. This does not
/// include the `ic-request` domain prefix.
pub fn to_request_id<T: ToHashable + ?Sized>(value: &T) -> Result<RequestId, RequestIdError> {
    match value.to_hashable() {
        HashableValue::Map(map) => Ok(RequestId(hash_of_map(&map))),
        other => Err(RequestIdError::NotAMap(format!("{other:?}"))),
    }
}

impl TryFrom<&serde_cbor::Value> for HashableValue {
    type Error = RequestIdError;

    fn try_from(value: &serde_cbor::Value) -> Result<Self, Self::Error> {
        use serde_cbor::Value;
        match value {
            Value::Text(s) => Ok(HashableValue::Text(s.clone())),
            Value::Bytes(b) => Ok(HashableValue::Bytes(b.clone())),
            Value::Integer(i) => u64::try_from(*i)
                .map(HashableValue::Nat)
                .map_err(|_| RequestIdError::UnsupportedValue(format!("integer {i}"))),
            Value::Array(elements) => elements
                .iter()
                .map(HashableValue::try_from)
                .collect::<Result<_, _>>()
                .map(HashableValue::Array),
            Value::Map(_) => FieldMap::try_from(value).map(HashableValue::Map),
            other => Err(RequestIdError::UnsupportedValue(format!("{other:?}"))),
        }
    }
}

impl TryFrom<&serde_cbor::Value> for FieldMap {
    type Error = RequestIdError;

    fn try_from(value: &serde_cbor::Value) -> Result<Self, Self::Error> {
        use serde_cbor::Value;
        let Value::Map(entries) = value else {
            return Err(RequestIdError::NotAMap(format!("{value:?}")));
        };
        let mut map = FieldMap::new();
        for (key, value) in entries {
            let Value::Text(name) = key else {
                return Err(RequestIdError::NonTextKey(format!("{key:?}")));
            };
            map.push(name.clone(), Some(HashableValue::try_from(value)?));
        }
        Ok(map)
    }
}

/// A Request ID.
#[derive(Clone, Copy, Debug, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct RequestId(Sha256Hash);

impl RequestId {
    /// Creates a new `RequestId` from a SHA-256 hash.
    pub fn new(from: &[u8; 32]) -> RequestId {
        RequestId(*from)
    }

    /// Returns the signable form of the request ID, by prepending `"\x0Aic-request"` to it.
    pub fn signable(&self) -> Vec<u8> {
        let mut signable = Vec::with_capacity(43);
        signable.extend_from_slice(IC_REQUEST_DOMAIN_SEPARATOR);
        signable.extend_from_slice(&self.0);
        signable
    }
}

impl Deref for RequestId {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for RequestId {
    type Err = RequestIdFromStringError;

    fn from_str(from: &str) -> Result<Self, Self::Err> {
        let vec = hex::decode(from).map_err(RequestIdFromStringError::FromHexError)?;
        let blob: [u8; 32] = vec
            .as_slice()
            .try_into()
            .map_err(|_| RequestIdFromStringError::InvalidSize(vec.len()))?;
        Ok(RequestId(blob))
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> String {
        hex::encode(id.0)
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        hex::encode(self.0).fmt(f)
    }
}

// these impls are effectively #[serde(with = "serde_bytes")], hex in human-readable formats
impl Serialize for RequestId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_str(RequestIdVisitor)
        } else {
            deserializer.deserialize_bytes(RequestIdVisitor)
        }
    }
}

struct RequestIdVisitor;

impl<'de> Visitor<'de> for RequestIdVisitor {
    type Value = RequestId;

    fn expecting(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("a sha256 hash")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(RequestId::new(v.try_into().map_err(|_| {
            E::custom(format_args!("must be 32 bytes long, was {}", v.len()))
        })?))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        self.visit_bytes(&v)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        let mut arr = Sha256Hash::default();
        hex::decode_to_slice(v, &mut arr).map_err(|_| {
            E::custom(format_args!("must be 64 hex characters, was {:?}", v))
        })?;
        Ok(RequestId(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn spec_call(with_sender: bool) -> FieldMap {
        let canister_id = Principal::from_slice(b"\x00\x00\x00\x00\x00\x00\x04\xD2");
        FieldMap::new()
            .with("request_type", "call")
            .with("canister_id", canister_id)
            .with("method_name", "hello")
            .with_bytes("arg", &b"DIDL\x00\xFD*"[..])
            .with_opt("sender", with_sender.then(Principal::anonymous))
            .with_opt(
                "ingress_expiry",
                with_sender.then_some(1_685_570_400_000_000_000u64),
            )
    }

    #[test]
    fn value_hashes() {
        let cases: [(HashableValue, &str); 8] = [
            (
                "request_type".to_hashable(),
                "769e6f87bdda39c859642b74ce9763cdd37cb1cd672733e8c54efaa33ab78af9",
            ),
            (
                "call".to_hashable(),
                "7edb360f06acaef2cc80dba16cf563f199d347db4443da04da0c8173e3f9e4ed",
            ),
            (
                "canister_id".to_hashable(),
                "0a3eb2ba16702a387e6321066dd952db7a31f9b5cc92981e0a92dd56802d3df9",
            ),
            (
                HashableValue::Bytes(b"\x00\x00\x00\x00\x00\x00\x04\xD2".to_vec()),
                "4d8c47c3c1c837964011441882d745f7e92d10a40cef0520447c63029eafe396",
            ),
            (
                "method_name".to_hashable(),
                "293536232cf9231c86002f4ee293176a0179c002daa9fc24be9bb51acdd642b6",
            ),
            (
                "hello".to_hashable(),
                "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
            ),
            (
                "arg".to_hashable(),
                "b25f03dedd69be07f356a06fe35c1b0ddc0de77dcd9066c4be0c6bbde14b23ff",
            ),
            (
                HashableValue::Bytes(b"DIDL\x00\xFD*".to_vec()),
                "6c0b2ae49718f6995c02ac5700c9c789d7b7862a0d53e6d40a73f1fcd2f70189",
            ),
        ];
        for (value, expected) in cases {
            assert_eq!(hex::encode(hash_value(&value)), expected, "{value:?}");
        }
    }

    #[test]
    fn public_spec_example() {
        assert_eq!(
            to_request_id(&spec_call(false)).unwrap().to_string(),
            "8781291c347db32a9d8c10eb62b710fce5a93be676474c42babc74c51858f94b"
        );
        assert_eq!(
            to_request_id(&spec_call(true)).unwrap().to_string(),
            "1d1091364d6bb8a6c16b203ee75467d59ead468f523eb058880ae8ec80e2b101"
        );
    }

    /// A simple example with nested arrays and blobs
    #[test]
    fn array_example() {
        let bytes = |s: &str| HashableValue::Bytes(s.as_bytes().to_vec());
        let data = FieldMap::new()
            .with("sender", Principal::from_slice(&[0, 0, 0, 0, 0, 0, 0x04, 0xD2]))
            .with(
                "paths",
                HashableValue::Array(vec![
                    HashableValue::Array(vec![]),
                    HashableValue::Array(vec![bytes("")]),
                    HashableValue::Array(vec![bytes("hello"), bytes("world")]),
                ]),
            );
        assert_eq!(
            hex::encode(hash_of_map(&data)),
            "97d6f297aea699aec85d3377c7643ea66db810aba5c4372fbc2082c999f452dc"
        );
    }

    #[test]
    fn array_example_empty_array() {
        let data = FieldMap::new().with("paths", HashableValue::Array(vec![]));
        assert_eq!(
            hex::encode(hash_of_map(&data)),
            "99daa8c80a61e87ac1fdf9dd49e39963bfe4dafb2a45095ebf4cad72d916d5be"
        );
    }

    #[test]
    fn array_example_array_with_empty_array() {
        let data = FieldMap::new().with(
            "paths",
            HashableValue::Array(vec![HashableValue::Array(vec![])]),
        );
        assert_eq!(
            hex::encode(hash_of_map(&data)),
            "ea01a9c3d3830db108e0a87995ea0d4183dc9c6e51324e9818fced5c57aa64f5"
        );
    }

    #[test]
    fn nested_map() {
        let outer = FieldMap::new()
            .with("foo", FieldMap::new().with("baz", "hello").with("quux", 3u64))
            .with_bytes("bar", &b"world"[..]);
        assert_eq!(
            hex::encode(hash_of_map(&outer)),
            "3d447339cc0c2b894ee215c8141770bf4b86c72b6c37d9873213a786ec7f9f31"
        );
    }

    #[test]
    fn absent_fields_are_left_out() {
        let with_none = FieldMap::new()
            .with("x", 7_000_000u64)
            .with_opt("y", None::<&str>);
        assert_eq!(
            hex::encode(hash_of_map(&with_none)),
            "fe4c9222ee2bffbc3ff7f25510d5b258adfa38a16740050a112ccc98eb886de5"
        );
        let with_some = FieldMap::new().with("x", 3u64).with_opt("y", Some("hello"));
        assert_eq!(
            hex::encode(hash_of_map(&with_some)),
            "f9532efd31fe55f5013d84fa4e1585b9a52e6cf82842adabe22fd3ac359c4143"
        );
        assert_eq!(
            hex::encode(hash_of_map(&FieldMap::new().with("foo", 73u64))),
            "7b3d327026e6bb5b4c13b898a6ca8fff6fd6838f44f6c27d9adf34542add75a0"
        );
    }

    #[test]
    fn array_of_nats() {
        let array = vec![1u64, 2, 3].to_hashable();
        assert_eq!(
            hex::encode(hash_value(&array)),
            "2628a7cbda257cd0dc45779e43080e0a93037468fe270faae515f7c7941069e3"
        );
        assert_eq!(
            to_request_id(&array),
            Err(RequestIdError::NotAMap(format!("{array:?}")))
        );
    }

    #[test]
    fn cbor_value_matches_typed_map() {
        let bytes = serde_cbor::to_vec(&serde_cbor::Value::Map(
            [
                (
                    serde_cbor::Value::Text("request_type".into()),
                    serde_cbor::Value::Text("call".into()),
                ),
                (
                    serde_cbor::Value::Text("canister_id".into()),
                    serde_cbor::Value::Bytes(b"\x00\x00\x00\x00\x00\x00\x04\xD2".to_vec()),
                ),
                (
                    serde_cbor::Value::Text("method_name".into()),
                    serde_cbor::Value::Text("hello".into()),
                ),
                (
                    serde_cbor::Value::Text("arg".into()),
                    serde_cbor::Value::Bytes(b"DIDL\x00\xFD*".to_vec()),
                ),
            ]
            .into_iter()
            .collect(),
        ))
        .unwrap();
        let value: serde_cbor::Value = serde_cbor::from_slice(&bytes).unwrap();
        let map = FieldMap::try_from(&value).unwrap();
        assert_eq!(
            to_request_id(&map).unwrap(),
            to_request_id(&spec_call(false)).unwrap()
        );
    }

    #[test]
    fn unsupported_cbor_values_are_named() {
        use serde_cbor::Value;
        let err = HashableValue::try_from(&Value::Bool(true)).unwrap_err();
        assert_eq!(err, RequestIdError::UnsupportedValue("Bool(true)".into()));
        let err = HashableValue::try_from(&Value::Integer(-5)).unwrap_err();
        assert_eq!(err, RequestIdError::UnsupportedValue("integer -5".into()));
        assert!(matches!(
            HashableValue::try_from(&Value::Null),
            Err(RequestIdError::UnsupportedValue(_))
        ));
        assert!(matches!(
            HashableValue::try_from(&Value::Float(1.5)),
            Err(RequestIdError::UnsupportedValue(_))
        ));
        let keyed_by_int = Value::Map([(Value::Integer(1), Value::Integer(1))].into());
        assert!(matches!(
            FieldMap::try_from(&keyed_by_int),
            Err(RequestIdError::NonTextKey(_))
        ));
    }

    #[test]
    fn request_id_string_and_serde() {
        let id = to_request_id(&spec_call(false)).unwrap();
        let text = id.to_string();
        assert_eq!(text.parse::<RequestId>().unwrap(), id);
        assert!(matches!(
            "abcd".parse::<RequestId>(),
            Err(RequestIdFromStringError::InvalidSize(2))
        ));

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{text}\""));
        assert_eq!(serde_json::from_str::<RequestId>(&json).unwrap(), id);

        let cbor = serde_cbor::to_vec(&id).unwrap();
        assert_eq!(serde_cbor::from_slice::<RequestId>(&cbor).unwrap(), id);
    }

    #[test]
    fn signable_has_domain_separator() {
        let id = RequestId::new(&[7; 32]);
        let signable = id.signable();
        assert_eq!(&signable[..11], b"\x0Aic-request");
        assert_eq!(&signable[11..], &[7; 32]);
    }

    fn leaf_value() -> impl Strategy<Value = HashableValue> {
        prop_oneof![
            any::<u64>().prop_map(HashableValue::Nat),
            ".{0,16}".prop_map(HashableValue::Text),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(HashableValue::Bytes),
        ]
    }

    fn fields_and_permutation(
    ) -> impl Strategy<Value = (Vec<(String, HashableValue)>, Vec<(String, HashableValue)>)> {
        proptest::collection::btree_map("[a-z_]{1,12}", leaf_value(), 0..10).prop_flat_map(
            |fields| {
                let fields: Vec<_> = fields.into_iter().collect();
                (Just(fields.clone()), Just(fields).prop_shuffle())
            },
        )
    }

    fn to_map(fields: Vec<(String, HashableValue)>) -> FieldMap {
        fields
            .into_iter()
            .fold(FieldMap::new(), |map, (k, v)| map.with(k, v))
    }

    proptest! {
        #[test]
        fn hash_of_map_ignores_field_order((fields, shuffled) in fields_and_permutation()) {
            prop_assert_eq!(hash_of_map(&to_map(fields)), hash_of_map(&to_map(shuffled)));
        }

        #[test]
        fn absent_fields_never_change_the_hash(
            (fields, _) in fields_and_permutation(),
            absent in "[A-Z]{1,8}",
        ) {
            let mut with_absent = to_map(fields.clone());
            with_absent.push(absent, None);
            prop_assert_eq!(hash_of_map(&to_map(fields)), hash_of_map(&with_absent));
        }
    }
}
