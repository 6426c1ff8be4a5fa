use std::collections::BTreeMap;

use super::rational::Ratio;

/// A decoded EXIF value, independent of where it was read from.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Rational(Ratio),
    Bytes(Vec<u8>),
    List(Vec<TagValue>),
}

impl TagValue {
    /// Collapse multi-valued entries to their first component.
    pub fn first(self) -> Option<TagValue> {
        match self {
            TagValue::List(items) => items.into_iter().next().and_then(TagValue::first),
            other => Some(other),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            TagValue::Integer(v) => Some(*v),
            TagValue::List(items) => items.first().and_then(TagValue::as_integer),
            _ => None,
        }
    }
}

/// Tag name → value, the common shape every metadata source converges on.
///
/// The first value inserted for a name wins, so sources feed the primary
/// section before the capture section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagMap {
    tags: BTreeMap<&'static str, TagValue>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &'static str, value: TagValue) {
        self.tags.entry(name).or_insert(value);
    }

    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.tags.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tags.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &TagValue)> {
        self.tags.iter().map(|(k, v)| (*k, v))
    }
}
