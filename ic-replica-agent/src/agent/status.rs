//! Types for interacting with the status endpoint of a replica. See [`Status`] for details.

use serde::{
    ser::{SerializeMap, SerializeSeq},
    Serialize,
};
use std::{collections::BTreeMap, fmt};

/// Value returned by the status endpoint of a replica. This is a loose mapping to CBOR values,
/// so that [`serde_cbor::Value`] does not leak across the agent's API.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Clone, Hash)]
pub enum Value {
    /// See [`Null`](serde_cbor::Value::Null).
    Null,
    /// See [`String`](serde_cbor::Value::Text).
    String(String),
    /// See [`Integer`](serde_cbor::Value::Integer).
    Integer(i64),
    /// See [`Bool`](serde_cbor::Value::Bool).
    Bool(bool),
    /// See [`Bytes`](serde_cbor::Value::Bytes).
    Bytes(Vec<u8>),
    /// See [`Vec`](serde_cbor::Value::Array).
    Vec(Vec<Value>),
    /// See [`Map`](serde_cbor::Value::Map).
    Map(BTreeMap<String, Box<Value>>),
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Integer(v) => serializer.serialize_i64(*v),
            Value::String(v) => serializer.serialize_str(v),
            Value::Null => serializer.serialize_none(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Bytes(v) => serializer.serialize_bytes(v),
            Value::Vec(v) => {
                let mut seq = serializer.serialize_seq(Some(v.len()))?;
                for e in v {
                    seq.serialize_element(e)?;
                }
                seq.end()
            }
            Value::Map(v) => {
                let mut map = serializer.serialize_map(Some(v.len()))?;
                for (k, v) in v {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::String(s) => write!(f, r#""{}""#, s.escape_debug()),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Bytes(b) => f.write_str(&hex::encode(b)),
            Value::Vec(v) => f.debug_list().entries(v).finish(),
            Value::Map(m) => f.debug_map().entries(m).finish(),
        }
    }
}

/// The structure returned by [`super::Agent::status`], containing the information returned
/// by the status endpoint of a replica.
#[derive(Debug, Ord, PartialOrd, PartialEq, Eq, Clone)]
pub struct Status {
    /// Optional. The precise git revision of the protocol implementation.
    pub impl_version: Option<String>,

    /// Optional. The health status of the replica. One hopes it's "healthy".
    pub replica_health_status: Option<String>,

    /// Optional. The DER-encoded root public key used to verify certificates.
    pub root_key: Option<Vec<u8>>,

    /// Contains any additional values that the replica gave as status.
    pub values: BTreeMap<String, Box<Value>>,
}

impl Serialize for Status {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{\n")?;
        for (key, value) in &self.values {
            writeln!(f, r#"  "{}": {},"#, key.escape_debug(), value)?;
        }
        f.write_str("}")
    }
}

fn cbor_value_to_value(value: &serde_cbor::Value) -> Result<Value, ()> {
    match value {
        serde_cbor::Value::Null => Ok(Value::Null),
        serde_cbor::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_cbor::Value::Integer(i) => i64::try_from(*i).map(Value::Integer).map_err(|_| ()),
        serde_cbor::Value::Bytes(b) => Ok(Value::Bytes(b.to_owned())),
        serde_cbor::Value::Text(s) => Ok(Value::String(s.to_owned())),
        serde_cbor::Value::Array(a) => a
            .iter()
            .map(cbor_value_to_value)
            .collect::<Result<Vec<Value>, ()>>()
            .map(Value::Vec),
        serde_cbor::Value::Map(m) => {
            let mut map = BTreeMap::new();
            for (key, value) in m.iter() {
                let k = match key {
                    serde_cbor::Value::Text(t) => t.to_owned(),
                    serde_cbor::Value::Integer(i) => i.to_string(),
                    _ => return Err(()),
                };
                map.insert(k, Box::new(cbor_value_to_value(value)?));
            }
            Ok(Value::Map(map))
        }
        serde_cbor::Value::Tag(_, v) => cbor_value_to_value(v.as_ref()),
        _ => Err(()),
    }
}

impl TryFrom<&serde_cbor::Value> for Status {
    type Error = ();

    fn try_from(value: &serde_cbor::Value) -> Result<Self, ()> {
        let Value::Map(map) = cbor_value_to_value(value)? else {
            return Err(());
        };
        let text = |key: &str| match map.get(key).map(Box::as_ref) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        };
        let impl_version = text("impl_version");
        let replica_health_status = text("replica_health_status");
        let root_key = match map.get("root_key").map(Box::as_ref) {
            Some(Value::Bytes(bytes)) => Some(bytes.clone()),
            _ => None,
        };
        Ok(Status {
            impl_version,
            replica_health_status,
            root_key,
            values: map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_cbor::Value::{Bool, Bytes, Integer, Map, Null, Text};

    fn status_cbor() -> serde_cbor::Value {
        let mut submap = BTreeMap::new();
        submap.insert(Text("foo".to_string()), Text("bar".to_string()));
        Map(BTreeMap::from([
            (Text("impl_version".to_string()), Text("0.19.2".to_string())),
            (
                Text("replica_health_status".to_string()),
                Text("healthy".to_string()),
            ),
            (Text("certified_height".to_string()), Integer(654275)),
            (Text("arbitrary".to_string()), Null),
            (Text("root_key".to_string()), Bytes(vec![1, 2, 3, 4])),
            (Text("truthy".to_string()), Bool(true)),
            (Text("submap".to_string()), Map(submap)),
        ]))
    }

    #[test]
    fn reads_known_fields() {
        let status = Status::try_from(&status_cbor()).unwrap();
        assert_eq!(status.impl_version.as_deref(), Some("0.19.2"));
        assert_eq!(status.replica_health_status.as_deref(), Some("healthy"));
        assert_eq!(status.root_key, Some(vec![1, 2, 3, 4]));
        assert_eq!(
            status.values.get("certified_height").map(Box::as_ref),
            Some(&Value::Integer(654275))
        );
    }

    #[test]
    fn can_serialize_status_as_json() {
        let status = Status::try_from(&status_cbor()).unwrap();
        let expected_json = r#"{"arbitrary":null,"certified_height":654275,"impl_version":"0.19.2","replica_health_status":"healthy","root_key":[1,2,3,4],"submap":{"foo":"bar"},"truthy":true}"#;
        assert_eq!(serde_json::to_string(&status).unwrap(), expected_json);
    }

    #[test]
    fn rejects_non_map_status() {
        assert!(Status::try_from(&Text("healthy".to_string())).is_err());
        assert!(Status::try_from(&Map(BTreeMap::from([(Bool(true), Null)]))).is_err());
    }
}
