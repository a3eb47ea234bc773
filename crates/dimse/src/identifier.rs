//! Sparse keyword/value datasets exchanged with DIMSE services
//!
//! An [`Identifier`] is the decoded form of a C-FIND identifier, an N-CREATE
//! attribute list or an N-SET modification list. Attributes are addressed by
//! their DICOM keyword (`PatientID`, `StudyInstanceUID`, ...). A zero-length
//! attribute is represented by an empty string, which in a query means
//! "return this key, match anything".

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of a single attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Any string-valued VR, possibly empty
    Text(String),
    /// Sequence of nested items (VR SQ)
    Sequence(Vec<Identifier>),
}

/// Keyword-addressed dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier {
    attributes: BTreeMap<String, AttributeValue>,
}

impl AttributeValue {
    /// String content, `None` for sequences
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s.as_str()),
            AttributeValue::Sequence(_) => None,
        }
    }

    /// Sequence items, `None` for string values
    pub fn items(&self) -> Option<&[Identifier]> {
        match self {
            AttributeValue::Sequence(items) => Some(items.as_slice()),
            AttributeValue::Text(_) => None,
        }
    }

    /// Zero-length value (empty string or empty sequence)
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::Text(s) => s.trim().is_empty(),
            AttributeValue::Sequence(items) => items.is_empty(),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<Vec<Identifier>> for AttributeValue {
    fn from(items: Vec<Identifier>) -> Self {
        AttributeValue::Sequence(items)
    }
}

impl Identifier {
    /// Create an empty identifier
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, keyword: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.insert(keyword, value);
        self
    }

    /// Set an attribute, replacing any previous value
    pub fn insert(&mut self, keyword: impl Into<String>, value: impl Into<AttributeValue>) {
        self.attributes.insert(keyword.into(), value.into());
    }

    /// Remove an attribute, returning its previous value
    pub fn remove(&mut self, keyword: &str) -> Option<AttributeValue> {
        self.attributes.remove(keyword)
    }

    pub fn get(&self, keyword: &str) -> Option<&AttributeValue> {
        self.attributes.get(keyword)
    }

    /// String value of an attribute; `None` if absent or a sequence
    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        self.get(keyword).and_then(AttributeValue::as_str)
    }

    /// Items of a sequence attribute; `None` if absent or not a sequence
    pub fn sequence(&self, keyword: &str) -> Option<&[Identifier]> {
        self.get(keyword).and_then(AttributeValue::items)
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.attributes.contains_key(keyword)
    }

    /// Keywords present, in lexical order
    pub fn keywords(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Merge `other` into `self`; attributes in `other` win
    pub fn update(&mut self, other: &Identifier) {
        for (keyword, value) in &other.attributes {
            self.attributes.insert(keyword.clone(), value.clone());
        }
    }
}

impl FromIterator<(String, AttributeValue)> for Identifier {
    fn from_iter<T: IntoIterator<Item = (String, AttributeValue)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}
