//! Explicit message schemas and the one encode/decode routine driven by them.
//!
//! A message type describes itself with a [`MessageDescriptor`] (its field list
//! and field types) and converts to and from a [`Record`]. [`encode`] and
//! [`decode`] never look at the concrete type beyond that, so every message on
//! the wire shares the same layout: a MessagePack map keyed by field name.
//! [`encode_text`] and [`decode_text`] apply the same rules to a JSON object.
//!
//! Decoding is strict about shape and lenient about absence:
//!
//! - bytes that are not a single MessagePack map are [`CodecError::Malformed`];
//! - a field the descriptor does not know, or a value of the wrong type, is
//!   [`CodecError::SchemaMismatch`];
//! - a missing (or `nil`) field reads as its zero value.

use std::collections::HashMap;

use rmpv::Value;

use crate::errors::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int64,
    Bool,
    Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub ty: FieldType,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self { name, ty }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub name: &'static str,
    pub fields: &'static [FieldDescriptor],
}

impl MessageDescriptor {
    pub fn field(&self, name: &str) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    String(String),
    Int64(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl FieldValue {
    pub fn ty(&self) -> FieldType {
        match self {
            FieldValue::String(_) => FieldType::String,
            FieldValue::Int64(_) => FieldType::Int64,
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Bytes(_) => FieldType::Bytes,
        }
    }

    pub fn zero(ty: FieldType) -> Self {
        match ty {
            FieldType::String => FieldValue::String(String::new()),
            FieldType::Int64 => FieldValue::Int64(0),
            FieldType::Bool => FieldValue::Bool(false),
            FieldType::Bytes => FieldValue::Bytes(Vec::new()),
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int64(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        FieldValue::Bytes(value)
    }
}

/// Field values of one message, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    values: HashMap<&'static str, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<FieldValue>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn take_string(&mut self, name: &str) -> String {
        match self.values.remove(name) {
            Some(FieldValue::String(value)) => value,
            _ => String::new(),
        }
    }

    pub fn take_i64(&mut self, name: &str) -> i64 {
        match self.values.remove(name) {
            Some(FieldValue::Int64(value)) => value,
            _ => 0,
        }
    }

    pub fn take_bool(&mut self, name: &str) -> bool {
        matches!(self.values.remove(name), Some(FieldValue::Bool(true)))
    }

    pub fn take_bytes(&mut self, name: &str) -> Vec<u8> {
        match self.values.remove(name) {
            Some(FieldValue::Bytes(value)) => value,
            _ => Vec::new(),
        }
    }

    fn insert_decoded(
        &mut self,
        descriptor: &MessageDescriptor,
        field: &'static FieldDescriptor,
        value: FieldValue,
    ) -> Result<(), CodecError> {
        if self.values.insert(field.name, value).is_some() {
            return Err(CodecError::Malformed(format!(
                "field `{}` of {} appears more than once",
                field.name, descriptor.name
            )));
        }
        Ok(())
    }
}

/// A type with a wire schema.
pub trait Message: Sized {
    const DESCRIPTOR: MessageDescriptor;

    fn to_record(&self) -> Record;

    /// Builds the message from a record that already matches [`Self::DESCRIPTOR`].
    /// Absent fields must be read as zero values.
    fn from_record(record: Record) -> Self;
}

/// Every descriptor field in declaration order, with absent fields zeroed.
fn ordered_fields(
    descriptor: &MessageDescriptor,
    mut record: Record,
) -> Result<Vec<(&'static str, FieldValue)>, CodecError> {
    let mut fields = Vec::with_capacity(descriptor.fields.len());
    for field in descriptor.fields {
        let value = record
            .values
            .remove(field.name)
            .unwrap_or_else(|| FieldValue::zero(field.ty));
        if value.ty() != field.ty {
            return Err(CodecError::Encode(format!(
                "field `{}` of {} is declared {:?} but holds {:?}",
                field.name,
                descriptor.name,
                field.ty,
                value.ty()
            )));
        }
        fields.push((field.name, value));
    }

    if let Some(extra) = record.values.keys().next() {
        return Err(CodecError::Encode(format!(
            "{} has no field `{}`",
            descriptor.name, extra
        )));
    }

    Ok(fields)
}

fn lookup_field(
    descriptor: &MessageDescriptor,
    name: &str,
) -> Result<&'static FieldDescriptor, CodecError> {
    descriptor.field(name).ok_or_else(|| {
        CodecError::SchemaMismatch(format!("{} has no field `{}`", descriptor.name, name))
    })
}

fn type_mismatch(descriptor: &MessageDescriptor, field: &FieldDescriptor, got: &str) -> CodecError {
    CodecError::SchemaMismatch(format!(
        "field `{}` of {} expects {:?}, got {}",
        field.name, descriptor.name, field.ty, got
    ))
}

pub fn encode<M: Message>(message: &M) -> Result<Vec<u8>, CodecError> {
    let fields = ordered_fields(&M::DESCRIPTOR, message.to_record())?;
    let entries = fields
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                FieldValue::String(s) => Value::from(s),
                FieldValue::Int64(i) => Value::from(i),
                FieldValue::Bool(b) => Value::Boolean(b),
                FieldValue::Bytes(b) => Value::Binary(b),
            };
            (Value::from(name), value)
        })
        .collect();

    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, &Value::Map(entries))
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(buf)
}

pub fn decode<M: Message>(bytes: &[u8]) -> Result<M, CodecError> {
    let descriptor = M::DESCRIPTOR;
    // A message with every field absent may be sent as zero bytes.
    if bytes.is_empty() {
        return Ok(M::from_record(Record::new()));
    }

    let mut cursor = bytes;
    let value = rmpv::decode::read_value(&mut cursor)
        .map_err(|e| CodecError::Malformed(format!("{}: {}", descriptor.name, e)))?;
    if !cursor.is_empty() {
        return Err(CodecError::Malformed(format!(
            "{} trailing bytes after {}",
            cursor.len(),
            descriptor.name
        )));
    }

    let entries = match value {
        Value::Map(entries) => entries,
        other => {
            return Err(CodecError::Malformed(format!(
                "{} must be encoded as a map, got {}",
                descriptor.name, other
            )))
        }
    };

    let mut record = Record::new();
    for (key, value) in entries {
        let key = match key {
            Value::String(key) => key.into_str().ok_or_else(|| {
                CodecError::Malformed(format!("{} has a non UTF-8 field name", descriptor.name))
            })?,
            other => {
                return Err(CodecError::Malformed(format!(
                    "field names of {} must be strings, got {}",
                    descriptor.name, other
                )))
            }
        };
        let field = lookup_field(&descriptor, &key)?;

        let value = match (field.ty, value) {
            (_, Value::Nil) => continue,
            (FieldType::String, Value::String(s)) => {
                FieldValue::String(s.into_str().ok_or_else(|| {
                    CodecError::Malformed(format!("field `{}` is not valid UTF-8", field.name))
                })?)
            }
            (FieldType::Int64, Value::Integer(i)) => FieldValue::Int64(
                i.as_i64()
                    .ok_or_else(|| type_mismatch(&descriptor, field, "an integer out of i64 range"))?,
            ),
            (FieldType::Bool, Value::Boolean(b)) => FieldValue::Bool(b),
            (FieldType::Bytes, Value::Binary(b)) => FieldValue::Bytes(b),
            (_, other) => return Err(type_mismatch(&descriptor, field, &other.to_string())),
        };
        record.insert_decoded(&descriptor, field, value)?;
    }

    Ok(M::from_record(record))
}

pub fn encode_text<M: Message>(message: &M) -> Result<String, CodecError> {
    let fields = ordered_fields(&M::DESCRIPTOR, message.to_record())?;
    let mut object = serde_json::Map::new();
    for (name, value) in fields {
        let value = match value {
            FieldValue::String(s) => serde_json::Value::String(s),
            FieldValue::Int64(i) => serde_json::Value::from(i),
            FieldValue::Bool(b) => serde_json::Value::Bool(b),
            FieldValue::Bytes(b) => serde_json::Value::from(b),
        };
        object.insert(name.to_string(), value);
    }
    serde_json::to_string(&serde_json::Value::Object(object))
        .map_err(|e| CodecError::Encode(e.to_string()))
}

pub fn decode_text<M: Message>(text: &str) -> Result<M, CodecError> {
    let descriptor = M::DESCRIPTOR;
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| CodecError::Malformed(format!("{}: {}", descriptor.name, e)))?;
    let object = match value {
        serde_json::Value::Object(object) => object,
        other => {
            return Err(CodecError::Malformed(format!(
                "{} must be a JSON object, got {}",
                descriptor.name, other
            )))
        }
    };

    let mut record = Record::new();
    for (key, value) in object {
        let field = lookup_field(&descriptor, &key)?;
        let value = match (field.ty, value) {
            (_, serde_json::Value::Null) => continue,
            (FieldType::String, serde_json::Value::String(s)) => FieldValue::String(s),
            (FieldType::Int64, serde_json::Value::Number(n)) => FieldValue::Int64(
                n.as_i64()
                    .ok_or_else(|| type_mismatch(&descriptor, field, &n.to_string()))?,
            ),
            (FieldType::Bool, serde_json::Value::Bool(b)) => FieldValue::Bool(b),
            (FieldType::Bytes, serde_json::Value::Array(items)) => {
                let bytes = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(|| type_mismatch(&descriptor, field, "an array that is not bytes"))?;
                FieldValue::Bytes(bytes)
            }
            (_, other) => return Err(type_mismatch(&descriptor, field, &other.to_string())),
        };
        record.insert_decoded(&descriptor, field, value)?;
    }

    Ok(M::from_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Sample {
        label: String,
        count: i64,
        enabled: bool,
        blob: Vec<u8>,
    }

    const SAMPLE_FIELDS: &[FieldDescriptor] = &[
        FieldDescriptor::new("label", FieldType::String),
        FieldDescriptor::new("count", FieldType::Int64),
        FieldDescriptor::new("enabled", FieldType::Bool),
        FieldDescriptor::new("blob", FieldType::Bytes),
    ];

    impl Message for Sample {
        const DESCRIPTOR: MessageDescriptor = MessageDescriptor {
            name: "Sample",
            fields: SAMPLE_FIELDS,
        };

        fn to_record(&self) -> Record {
            Record::new()
                .with("label", self.label.as_str())
                .with("count", self.count)
                .with("enabled", self.enabled)
                .with("blob", self.blob.clone())
        }

        fn from_record(mut record: Record) -> Self {
            Self {
                label: record.take_string("label"),
                count: record.take_i64("count"),
                enabled: record.take_bool("enabled"),
                blob: record.take_bytes("blob"),
            }
        }
    }

    fn sample() -> Sample {
        Sample {
            label: "héllo".into(),
            count: -42,
            enabled: true,
            blob: vec![0, 255, 7],
        }
    }

    fn raw_map(entries: Vec<(Value, Value)>) -> Vec<u8> {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &Value::Map(entries)).unwrap();
        buf
    }

    #[test]
    fn binary_round_trip() {
        let bytes = encode(&sample()).unwrap();
        assert_eq!(decode::<Sample>(&bytes).unwrap(), sample());
    }

    #[test]
    fn text_round_trip() {
        let text = encode_text(&sample()).unwrap();
        assert_eq!(decode_text::<Sample>(&text).unwrap(), sample());
    }

    #[test]
    fn absent_fields_read_as_zero() {
        let bytes = raw_map(vec![(Value::from("count"), Value::from(3))]);
        let decoded = decode::<Sample>(&bytes).unwrap();
        assert_eq!(
            decoded,
            Sample {
                count: 3,
                ..Sample::default()
            }
        );

        assert_eq!(decode::<Sample>(&[]).unwrap(), Sample::default());
        assert_eq!(decode_text::<Sample>("{}").unwrap(), Sample::default());
    }

    #[test]
    fn nil_is_treated_as_absent() {
        let bytes = raw_map(vec![(Value::from("label"), Value::Nil)]);
        assert_eq!(decode::<Sample>(&bytes).unwrap(), Sample::default());
    }

    #[test]
    fn garbage_is_malformed() {
        let err = decode::<Sample>(&[0xc1, 0x00, 0x13]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)), "{err:?}");
    }

    #[test]
    fn truncated_map_is_malformed() {
        let bytes = encode(&sample()).unwrap();
        let err = decode::<Sample>(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)), "{err:?}");
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0x01);
        let err = decode::<Sample>(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)), "{err:?}");
    }

    #[test]
    fn non_map_is_malformed() {
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &Value::from("just a string")).unwrap();
        assert!(matches!(decode::<Sample>(&buf), Err(CodecError::Malformed(_))));
        assert!(matches!(decode_text::<Sample>("[1,2]"), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn duplicate_field_is_malformed() {
        let bytes = raw_map(vec![
            (Value::from("label"), Value::from("a")),
            (Value::from("label"), Value::from("b")),
        ]);
        assert!(matches!(decode::<Sample>(&bytes), Err(CodecError::Malformed(_))));
    }

    #[test]
    fn unknown_field_is_schema_mismatch() {
        let bytes = raw_map(vec![(Value::from("colour"), Value::from("red"))]);
        let err = decode::<Sample>(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::SchemaMismatch(ref m) if m.contains("colour")), "{err:?}");

        let err = decode_text::<Sample>(r#"{"colour":"red"}"#).unwrap_err();
        assert!(matches!(err, CodecError::SchemaMismatch(_)), "{err:?}");
    }

    #[test]
    fn wrong_value_type_is_schema_mismatch() {
        let bytes = raw_map(vec![(Value::from("label"), Value::from(12))]);
        assert!(matches!(decode::<Sample>(&bytes), Err(CodecError::SchemaMismatch(_))));

        let err = decode_text::<Sample>(r#"{"blob":[1,300]}"#).unwrap_err();
        assert!(matches!(err, CodecError::SchemaMismatch(_)), "{err:?}");
    }

    #[test]
    fn encoding_rejects_records_that_disagree_with_descriptor() {
        struct Liar;
        impl Message for Liar {
            const DESCRIPTOR: MessageDescriptor = Sample::DESCRIPTOR;
            fn to_record(&self) -> Record {
                Record::new().with("label", 5i64)
            }
            fn from_record(_: Record) -> Self {
                Liar
            }
        }

        assert!(matches!(encode(&Liar), Err(CodecError::Encode(_))));
    }
}
