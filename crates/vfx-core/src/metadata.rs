//! Metadata bundle.
//!
//! Readers only rely on a set/get contract: string keys mapping to a small
//! set of typed values. Vectors, boxes and matrices are flattened into the
//! list variants.

use std::collections::BTreeMap;
use std::fmt;

/// Well-known key holding the bit depth label.
pub const KEY_DEPTH: &str = "input/bitsperchannel";
/// Well-known key holding newline-separated view names.
pub const KEY_VIEW_NAMES: &str = "input/view_names";

/// Typed metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
    /// Integer list (vectors, boxes, time codes)
    Ints(Vec<i64>),
    /// Float list (vectors, matrices, chromaticities)
    Floats(Vec<f64>),
    /// Text list
    Texts(Vec<String>),
}

impl MetaValue {
    /// Integer value, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, "]")
        }
        match self {
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::Text(v) => write!(f, "{v:?}"),
            MetaValue::Ints(v) => list(f, v),
            MetaValue::Floats(v) => list(f, v),
            MetaValue::Texts(v) => list(f, v),
        }
    }
}

/// Ordered key/value metadata container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaBundle {
    values: BTreeMap<String, MetaValue>,
}

impl MetaBundle {
    /// Empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) a value.
    pub fn set(&mut self, key: impl Into<String>, value: MetaValue) {
        self.values.insert(key.into(), value);
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.values.get(key)
    }

    /// Looks up an integer value.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(MetaValue::as_int)
    }

    /// Looks up a text value.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetaValue::as_text)
    }

    /// Whether the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut meta = MetaBundle::new();
        meta.set("exr/chunkCount", MetaValue::Int(4));
        meta.set(KEY_VIEW_NAMES, MetaValue::Text("left\nright".into()));
        assert_eq!(meta.get_int("exr/chunkCount"), Some(4));
        assert_eq!(meta.get_text(KEY_VIEW_NAMES), Some("left\nright"));
        assert_eq!(meta.get_int(KEY_VIEW_NAMES), None);
        assert_eq!(meta.len(), 2);
    }

    #[test]
    fn display_lists() {
        assert_eq!(MetaValue::Ints(vec![0, 0, 3, 1]).to_string(), "[0, 0, 3, 1]");
        assert_eq!(MetaValue::Text("a".into()).to_string(), "\"a\"");
    }
}
