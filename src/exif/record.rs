use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// The closed set of fields a [`MetadataRecord`] may carry, in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Make,
    Model,
    FocalLength,
    Aperture,
    ShutterSpeed,
    Iso,
    Lens,
    DateTaken,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Make,
        Field::Model,
        Field::FocalLength,
        Field::Aperture,
        Field::ShutterSpeed,
        Field::Iso,
        Field::Lens,
        Field::DateTaken,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Field::Make => "make",
            Field::Model => "model",
            Field::FocalLength => "focalLength",
            Field::Aperture => "aperture",
            Field::ShutterSpeed => "shutterSpeed",
            Field::Iso => "iso",
            Field::Lens => "lens",
            Field::DateTaken => "dateTaken",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Normalized camera metadata for one photograph.
///
/// Absent fields are simply not present; serialization never emits nulls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataRecord {
    fields: BTreeMap<Field, FieldValue>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn set(&mut self, field: Field, value: FieldValue) {
        self.fields.insert(field, value);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }
}

impl Serialize for MetadataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, value) in &self.fields {
            map.serialize_entry(field.key(), value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_without_nulls() {
        let mut record = MetadataRecord::new();
        record.set(Field::Aperture, FieldValue::Float(2.8));
        record.set(Field::Make, FieldValue::Text("Acme".into()));
        record.set(Field::Iso, FieldValue::Integer(200));
        record.set(Field::ShutterSpeed, FieldValue::Text("1/500s".into()));

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"make":"Acme","aperture":2.8,"shutterSpeed":"1/500s","iso":200}"#
        );
    }

    #[test]
    fn empty_record_is_empty_object() {
        assert_eq!(serde_json::to_string(&MetadataRecord::new()).unwrap(), "{}");
    }

    #[test]
    fn numeric_views() {
        assert_eq!(FieldValue::Integer(35).as_f64(), Some(35.0));
        assert_eq!(FieldValue::Text("2.8".into()).as_f64(), Some(2.8));
        assert_eq!(FieldValue::Text("Acme".into()).as_f64(), None);
    }
}
