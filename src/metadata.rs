//! Ordered (de)serialization and validation of the JSON header.
//!
//! Generic JSON maps do not keep key order, so the header is decoded into an
//! explicit list of `(key, value)` pairs and encoded by concatenating
//! `"key":value` fragments in the order the entries are held.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::models::{DType, METADATA_KEY, TensorInfo};
use crate::utils::byte_size;

const TENSOR_FIELDS: [&str; 3] = ["dtype", "shape", "data_offsets"];

/// Parsed header: optional string attributes plus tensor entries in payload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    attributes: Option<BTreeMap<String, String>>,
    tensors: Vec<(String, TensorInfo)>,
    index: HashMap<String, usize>,
}

impl Metadata {
    /// Creates metadata from entries in the order they should be written.
    ///
    /// Names must be unique and must not use the reserved attributes key.
    /// Offsets are not checked here; see [`Metadata::validate`].
    pub fn new(
        attributes: Option<BTreeMap<String, String>>,
        tensors: Vec<(String, TensorInfo)>,
    ) -> Result<Self, Error> {
        if tensors.iter().any(|(name, _)| name == METADATA_KEY) {
            return Err(Error::Schema {
                key: METADATA_KEY.to_string(),
                reason: "reserved key cannot name a tensor".to_string(),
            });
        }
        let index = index_names(&tensors).map_err(Error::DuplicateTensor)?;
        Ok(Self {
            attributes,
            tensors,
            index,
        })
    }

    /// Parses and validates a header.
    ///
    /// Entries are re-sorted by `(start, end)` so files whose writers emitted
    /// keys out of offset order are still accepted. Trailing whitespace (the
    /// alignment padding) is ignored.
    pub fn from_json(header: &[u8]) -> Result<Self, Error> {
        let mut de = serde_json::Deserializer::from_slice(header);
        let RawHeader(entries) = RawHeader::deserialize(&mut de)?;
        de.end()?;

        let mut attributes = None;
        let mut tensors = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            if key == METADATA_KEY {
                if attributes.is_some() {
                    return Err(schema(&key, "duplicate key"));
                }
                attributes = Some(parse_attributes(value)?);
            } else {
                let info = parse_tensor_info(&key, value)?;
                tensors.push((key, info));
            }
        }

        tensors.sort_by_key(|(_, info)| (info.start(), info.end()));

        let index = index_names(&tensors).map_err(|name| schema(&name, "duplicate key"))?;
        let metadata = Self {
            attributes,
            tensors,
            index,
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Serializes the header: the attributes first when present and
    /// non-empty, then tensor entries in held order. No padding is added.
    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(64 * (self.tensors.len() + 1));
        out.push(b'{');
        let mut first = true;
        if let Some(attributes) = self.attributes.as_ref().filter(|a| !a.is_empty()) {
            push_fragment(&mut out, &mut first, METADATA_KEY, attributes)?;
        }
        for (name, info) in &self.tensors {
            push_fragment(&mut out, &mut first, name, info)?;
        }
        out.push(b'}');
        Ok(out)
    }

    /// Checks that entries tile the payload contiguously from offset zero and
    /// that every range matches its shape and dtype.
    ///
    /// Returns the end of the last range, which is the payload length.
    pub fn validate(&self) -> Result<u64, Error> {
        let mut expected_start = 0u64;
        for (index, (name, info)) in self.tensors.iter().enumerate() {
            let [start, end] = info.data_offsets;
            if start != expected_start || end < start {
                return Err(Error::InvalidOffset {
                    name: name.clone(),
                    index,
                    start,
                    end,
                    expected_start,
                });
            }
            expected_start = end;

            let expected = byte_size(&info.shape, info.dtype).map_err(|e| match e {
                Error::Overflow { lhs, rhs } => Error::TensorOverflow {
                    name: name.clone(),
                    index,
                    lhs,
                    rhs,
                },
                other => other,
            })?;
            if end - start != expected {
                return Err(Error::SizeMismatch {
                    name: name.clone(),
                    index,
                    expected,
                    found: end - start,
                });
            }
        }
        Ok(expected_start)
    }

    /// Free-form string attributes stored under the reserved key.
    pub fn attributes(&self) -> Option<&BTreeMap<String, String>> {
        self.attributes.as_ref()
    }

    /// Tensor entries in payload order.
    pub fn tensors(&self) -> &[(String, TensorInfo)] {
        &self.tensors
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().map(|(name, _)| name.as_str())
    }

    pub fn info(&self, name: &str) -> Option<&TensorInfo> {
        self.position(name).map(|i| &self.tensors[i].1)
    }

    /// Position of `name` in payload order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Payload length implied by the entries (end of the last range).
    pub fn data_len(&self) -> u64 {
        self.tensors.last().map_or(0, |(_, info)| info.end())
    }
}

/// Top-level header object, keys kept in file order.
struct RawHeader(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for RawHeader {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeaderVisitor;

        impl<'de> Visitor<'de> for HeaderVisitor {
            type Value = RawHeader;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object of tensor entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawHeader, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(RawHeader(entries))
            }
        }

        deserializer.deserialize_map(HeaderVisitor)
    }
}

fn push_fragment<T: Serialize + ?Sized>(
    out: &mut Vec<u8>,
    first: &mut bool,
    key: &str,
    value: &T,
) -> Result<(), Error> {
    if !std::mem::take(first) {
        out.push(b',');
    }
    serde_json::to_writer(&mut *out, key)?;
    out.push(b':');
    serde_json::to_writer(&mut *out, value)?;
    Ok(())
}

/// Maps each name to its position, or returns the first repeated name.
fn index_names(tensors: &[(String, TensorInfo)]) -> Result<HashMap<String, usize>, String> {
    let mut index = HashMap::with_capacity(tensors.len());
    for (i, (name, _)) in tensors.iter().enumerate() {
        if index.insert(name.clone(), i).is_some() {
            return Err(name.clone());
        }
    }
    Ok(index)
}

fn schema(key: &str, reason: impl Into<String>) -> Error {
    Error::Schema {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn parse_attributes(value: Value) -> Result<BTreeMap<String, String>, Error> {
    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(schema(
                METADATA_KEY,
                format!("expected object, found {}", kind(&other)),
            ));
        }
    };
    fields
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => Ok((k, s)),
            other => Err(schema(
                METADATA_KEY,
                format!("value of {k:?} must be a string, found {}", kind(&other)),
            )),
        })
        .collect()
}

fn parse_tensor_info(name: &str, value: Value) -> Result<TensorInfo, Error> {
    let mut fields = match value {
        Value::Object(fields) => fields,
        other => return Err(schema(name, format!("expected object, found {}", kind(&other)))),
    };
    if let Some(extra) = fields.keys().find(|k| !TENSOR_FIELDS.contains(&k.as_str())) {
        return Err(schema(name, format!("unknown field {extra:?}")));
    }

    let dtype = match fields.remove("dtype") {
        None => return Err(schema(name, "missing field \"dtype\"")),
        Some(Value::String(tag)) => tag
            .parse::<DType>()
            .map_err(|e| schema(name, format!("invalid \"dtype\": {e}")))?,
        Some(other) => {
            return Err(schema(
                name,
                format!("invalid \"dtype\": expected string, found {}", kind(&other)),
            ));
        }
    };
    let shape = parse_naturals(name, "shape", fields.remove("shape"))?;
    let offsets = parse_naturals(name, "data_offsets", fields.remove("data_offsets"))?;
    let data_offsets: [u64; 2] = offsets.try_into().map_err(|v: Vec<u64>| {
        schema(
            name,
            format!("invalid \"data_offsets\": expected 2 elements, found {}", v.len()),
        )
    })?;

    Ok(TensorInfo {
        dtype,
        shape,
        data_offsets,
    })
}

fn parse_naturals(name: &str, field: &str, value: Option<Value>) -> Result<Vec<u64>, Error> {
    let items = match value {
        None => return Err(schema(name, format!("missing field {field:?}"))),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(schema(
                name,
                format!("invalid {field:?}: expected array, found {}", kind(&other)),
            ));
        }
    };
    items
        .iter()
        .map(|item| {
            item.as_u64().ok_or_else(|| {
                schema(
                    name,
                    format!("invalid {field:?}: expected array of natural numbers, found {item}"),
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(dtype: DType, shape: &[u64], start: u64, end: u64) -> TensorInfo {
        TensorInfo {
            dtype,
            shape: shape.to_vec(),
            data_offsets: [start, end],
        }
    }

    fn schema_reason(header: &str) -> String {
        match Metadata::from_json(header.as_bytes()) {
            Err(Error::Schema { reason, .. }) => reason,
            other => panic!("expected schema error for {header}, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_sorts_by_offset() {
        let header = r#"{
            "b":{"dtype":"U8","shape":[2],"data_offsets":[4,6]},
            "__metadata__":{"format":"pt"},
            "a":{"dtype":"F32","shape":[1],"data_offsets":[0,4]}
        }"#;
        let metadata = Metadata::from_json(header.as_bytes()).unwrap();
        assert_eq!(metadata.names().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(metadata.position("b"), Some(1));
        assert_eq!(metadata.data_len(), 6);
        assert_eq!(
            metadata.attributes().unwrap().get("format").map(String::as_str),
            Some("pt")
        );
    }

    #[test]
    fn test_decode_ignores_padding() {
        let header = b"{\"a\":{\"dtype\":\"U8\",\"shape\":[1],\"data_offsets\":[0,1]}}     ";
        assert_eq!(Metadata::from_json(header).unwrap().len(), 1);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(matches!(
            Metadata::from_json(b"[1,2]"),
            Err(Error::MalformedJson(_))
        ));
        assert!(matches!(
            Metadata::from_json(b"{"),
            Err(Error::MalformedJson(_))
        ));
        assert!(matches!(
            Metadata::from_json(b"\xff"),
            Err(Error::MalformedJson(_))
        ));
    }

    #[test]
    fn test_schema_diagnostics_are_distinct() {
        let cases = [
            r#"{"t":3}"#,
            r#"{"t":{"shape":[1],"data_offsets":[0,1]}}"#,
            r#"{"t":{"dtype":"U8","shape":[1],"data_offsets":[0,1],"extra":1}}"#,
            r#"{"t":{"dtype":1,"shape":[1],"data_offsets":[0,1]}}"#,
            r#"{"t":{"dtype":"U9","shape":[1],"data_offsets":[0,1]}}"#,
            r#"{"t":{"dtype":"U8","shape":"1","data_offsets":[0,1]}}"#,
            r#"{"t":{"dtype":"U8","shape":[-1],"data_offsets":[0,1]}}"#,
            r#"{"t":{"dtype":"U8","shape":[1.5],"data_offsets":[0,1]}}"#,
            r#"{"t":{"dtype":"U8","shape":[1],"data_offsets":[0,1,2]}}"#,
            r#"{"t":{"dtype":"U8","shape":[1]}}"#,
        ];
        let reasons: Vec<String> = cases.iter().map(|c| schema_reason(c)).collect();
        for (i, a) in reasons.iter().enumerate() {
            for b in &reasons[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(reasons[1].contains("missing field \"dtype\""));
        assert!(reasons[2].contains("unknown field \"extra\""));
        assert!(reasons[8].contains("expected 2 elements, found 3"));
    }

    #[test]
    fn test_attributes_must_be_strings() {
        let reason = schema_reason(r#"{"__metadata__":{"epoch":3}}"#);
        assert!(reason.contains("\"epoch\""));
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let header = r#"{"a":{"dtype":"U8","shape":[0],"data_offsets":[0,0]},"a":{"dtype":"U8","shape":[0],"data_offsets":[0,0]}}"#;
        assert!(matches!(
            Metadata::from_json(header.as_bytes()),
            Err(Error::Schema { key, .. }) if key == "a"
        ));
    }

    #[test]
    fn test_validate_contiguity() {
        let metadata = Metadata::new(
            None,
            vec![
                ("first".into(), info(DType::F32, &[1], 0, 4)),
                ("second".into(), info(DType::F32, &[1], 0, 4)),
            ],
        )
        .unwrap();
        match metadata.validate() {
            Err(Error::InvalidOffset { name, index, .. }) => {
                assert_eq!(name, "second");
                assert_eq!(index, 1);
            }
            other => panic!("expected InvalidOffset, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_size_and_overflow() {
        let metadata =
            Metadata::new(None, vec![("t".into(), info(DType::I32, &[2, 2], 0, 4))]).unwrap();
        assert!(matches!(
            metadata.validate(),
            Err(Error::SizeMismatch { expected: 16, found: 4, .. })
        ));

        let metadata = Metadata::new(
            None,
            vec![("t".into(), info(DType::I32, &[2, u64::MAX - 1], 0, 16))],
        )
        .unwrap();
        assert!(matches!(
            metadata.validate(),
            Err(Error::TensorOverflow { index: 0, .. })
        ));
    }

    #[test]
    fn test_validate_returns_payload_length() {
        let metadata = Metadata::new(
            None,
            vec![
                ("a".into(), info(DType::F64, &[2], 0, 16)),
                ("empty".into(), info(DType::F32, &[0, 3], 16, 16)),
                ("b".into(), info(DType::U16, &[], 16, 18)),
            ],
        )
        .unwrap();
        assert_eq!(metadata.validate().unwrap(), 18);
    }

    #[test]
    fn test_encode_key_order() {
        let mut attributes = BTreeMap::new();
        attributes.insert("foo".to_string(), "bar".to_string());
        let metadata = Metadata::new(
            Some(attributes),
            vec![
                ("z".into(), info(DType::F32, &[1], 0, 4)),
                ("a".into(), info(DType::U8, &[2], 4, 6)),
            ],
        )
        .unwrap();
        let json = String::from_utf8(metadata.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"__metadata__":{"foo":"bar"},"z":{"dtype":"F32","shape":[1],"data_offsets":[0,4]},"a":{"dtype":"U8","shape":[2],"data_offsets":[4,6]}}"#
        );
    }

    #[test]
    fn test_encode_skips_empty_attributes() {
        let metadata = Metadata::new(Some(BTreeMap::new()), vec![]).unwrap();
        assert_eq!(metadata.to_json().unwrap(), b"{}");
    }

    #[test]
    fn test_encode_escapes_names() {
        let metadata =
            Metadata::new(None, vec![("a\"b".into(), info(DType::U8, &[0], 0, 0))]).unwrap();
        let json = metadata.to_json().unwrap();
        let back = Metadata::from_json(&json).unwrap();
        assert_eq!(back.names().collect::<Vec<_>>(), ["a\"b"]);
    }

    #[test]
    fn test_new_rejects_reserved_and_duplicate_names() {
        assert!(matches!(
            Metadata::new(None, vec![(METADATA_KEY.into(), info(DType::U8, &[0], 0, 0))]),
            Err(Error::Schema { .. })
        ));
        assert!(matches!(
            Metadata::new(
                None,
                vec![
                    ("x".into(), info(DType::U8, &[0], 0, 0)),
                    ("x".into(), info(DType::U8, &[0], 0, 0)),
                ]
            ),
            Err(Error::DuplicateTensor(name)) if name == "x"
        ));
    }
}
