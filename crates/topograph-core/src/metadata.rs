//! The canonical metadata tree stored on every node and edge.
//!
//! A [`MetadataValue`] is a closed sum type: scalars, ordered lists, and
//! string-keyed maps. Maps are kept key-sorted, so equality, iteration and
//! serialization never depend on the order entries were inserted in.
//!
//! Values are produced by [`crate::normalize`]; nothing downstream of the
//! normalizer handles raw external shapes.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// A canonical metadata value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<MetadataValue>),
    Map(Metadata),
}

impl MetadataValue {
    /// Short name of the value's kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetadataValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Metadata> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// BLAKE3 digest (hex) of the value's canonical JSON encoding.
    ///
    /// Equal trees always produce equal digests, so consumers can compare
    /// digests instead of walking two trees.
    pub fn digest(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }

    /// Render the value as a compact string, as used for map keys.
    pub(crate) fn to_key_string(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Null => "null".to_string(),
            Self::List(_) | Self::Map(_) => serde_json::to_string(self).unwrap_or_default(),
        }
    }
}

/// Canonical form of a float: integral values inside the `i64` range become
/// `Int`, non-finite values fall back to their string form.
pub(crate) fn canonical_float(f: f64) -> MetadataValue {
    if f.is_nan() {
        return MetadataValue::String("NaN".to_string());
    }
    if f.is_infinite() {
        let s = if f > 0.0 { "inf" } else { "-inf" };
        return MetadataValue::String(s.to_string());
    }
    // i64::MAX as f64 rounds up to 2^63, which no longer fits.
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        MetadataValue::Int(f as i64)
    } else {
        MetadataValue::Float(f)
    }
}

pub(crate) fn canonical_u64(v: u64) -> MetadataValue {
    match i64::try_from(v) {
        Ok(i) => MetadataValue::Int(i),
        Err(_) => MetadataValue::Float(v as f64),
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        canonical_float(f)
    }
}

impl From<Metadata> for MetadataValue {
    fn from(m: Metadata) -> Self {
        Self::Map(m)
    }
}

impl From<Vec<MetadataValue>> for MetadataValue {
    fn from(items: Vec<MetadataValue>) -> Self {
        Self::List(items)
    }
}

impl<'de> Deserialize<'de> for MetadataValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(MetadataValueVisitor)
    }
}

struct MetadataValueVisitor;

impl<'de> Visitor<'de> for MetadataValueVisitor {
    type Value = MetadataValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a metadata value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(MetadataValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(MetadataValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(canonical_u64(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(canonical_float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(MetadataValue::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(MetadataValue::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(MetadataValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(MetadataValue::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        Deserialize::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(MetadataValue::List(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut md = Metadata::new();
        while let Some((key, value)) = map.next_entry::<String, MetadataValue>()? {
            md.insert(key, value);
        }
        Ok(MetadataValue::Map(md))
    }
}

// ── Metadata ──────────────────────────────────────────────────────

/// A mapping from string keys to canonical values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, MetadataValue>);

impl Metadata {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert a value, returning the previous value at `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: MetadataValue) -> Option<MetadataValue> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.0.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, MetadataValue> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a value by dotted path, e.g. `K8s.status.phase`.
    ///
    /// Each segment descends into a nested map; a numeric segment indexes
    /// into a list.
    pub fn get_field(&self, path: &str) -> Result<&MetadataValue, MetadataError> {
        let not_found = || MetadataError::FieldNotFound {
            path: path.to_string(),
        };

        let mut segments = path.split('.');
        let first = segments.next().ok_or_else(not_found)?;
        let mut current = self.0.get(first).ok_or_else(not_found)?;

        for segment in segments {
            current = match current {
                MetadataValue::Map(m) => m.0.get(segment),
                MetadataValue::List(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| items.get(idx)),
                _ => None,
            }
            .ok_or_else(not_found)?;
        }

        Ok(current)
    }

    pub fn get_string(&self, path: &str) -> Result<&str, MetadataError> {
        let value = self.get_field(path)?;
        value.as_str().ok_or_else(|| wrong_type(path, "string", value))
    }

    pub fn get_int(&self, path: &str) -> Result<i64, MetadataError> {
        let value = self.get_field(path)?;
        value.as_i64().ok_or_else(|| wrong_type(path, "int", value))
    }

    pub fn get_bool(&self, path: &str) -> Result<bool, MetadataError> {
        let value = self.get_field(path)?;
        value.as_bool().ok_or_else(|| wrong_type(path, "bool", value))
    }

    /// BLAKE3 digest (hex) of the canonical JSON encoding.
    pub fn digest(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&json).to_hex().to_string()
    }

    pub fn into_inner(self) -> BTreeMap<String, MetadataValue> {
        self.0
    }
}

fn wrong_type(path: &str, expected: &'static str, found: &MetadataValue) -> MetadataError {
    MetadataError::WrongType {
        path: path.to_string(),
        expected,
        found: found.kind(),
    }
}

impl From<BTreeMap<String, MetadataValue>> for Metadata {
    fn from(map: BTreeMap<String, MetadataValue>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>> FromIterator<(K, MetadataValue)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, MetadataValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

impl IntoIterator for Metadata {
    type Item = (String, MetadataValue);
    type IntoIter = btree_map::IntoIter<String, MetadataValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a MetadataValue);
    type IntoIter = btree_map::Iter<'a, String, MetadataValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
