//! The normalizer: converts any serializable value into a canonical
//! [`MetadataValue`] tree.
//!
//! Normalization is a serde [`Serializer`] that builds the tree directly, so
//! native structs, `serde_json::Value` documents and plain key/value maps all
//! go through the same code path and produce identical trees when they hold
//! the same data:
//!
//! - scalars map to themselves (`char` becomes a one-character string,
//!   `None` and unit become `Null`),
//! - sequences, tuples and byte strings map to ordered lists,
//! - maps and structs map to key-sorted maps; field names are kept verbatim
//!   and non-string keys are stringified,
//! - enums use the externally tagged JSON layout (`"Variant"` or
//!   `{"Variant": payload}`).
//!
//! Normalization never fails. A value whose `Serialize` impl errors is
//! replaced by a string fallback and a warning is logged, so one bad field
//! cannot abort the rest of the tree.

use std::fmt;

use serde::ser::{self, Serialize, Serializer};
use thiserror::Error;

use crate::metadata::{canonical_float, canonical_u64, Metadata, MetadataValue};

/// Normalize any serializable value into a canonical metadata tree.
///
/// Map entries are sorted by key, so `HashMap` and `BTreeMap` inputs agree.
/// Sequences keep the order the value yields them in, which for a `HashSet`
/// changes between instances holding the same elements. Use a `BTreeSet`
/// (or sort first) when a set must normalize deterministically.
pub fn normalize<T: Serialize + ?Sized>(value: &T) -> MetadataValue {
    match value.serialize(ValueSerializer) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Value could not be normalized, storing string fallback");
            MetadataValue::String(e.0)
        }
    }
}

/// Normalize a JSON document.
pub fn normalize_json(value: &serde_json::Value) -> MetadataValue {
    normalize(value)
}

/// Raised by a value's own `Serialize` impl; never escapes [`normalize`].
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NormalizeError(String);

impl ser::Error for NormalizeError {
    fn custom<T: fmt::Display>(msg: T) -> Self {
        Self(msg.to_string())
    }
}

/// Serializer producing [`MetadataValue`] trees.
pub struct ValueSerializer;

impl Serializer for ValueSerializer {
    type Ok = MetadataValue;
    type Error = NormalizeError;

    type SerializeSeq = SeqBuilder;
    type SerializeTuple = SeqBuilder;
    type SerializeTupleStruct = SeqBuilder;
    type SerializeTupleVariant = VariantSeqBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = VariantMapBuilder;

    fn serialize_bool(self, v: bool) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Bool(v))
    }

    fn serialize_i8(self, v: i8) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Int(v.into()))
    }

    fn serialize_i16(self, v: i16) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Int(v.into()))
    }

    fn serialize_i32(self, v: i32) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Int(v.into()))
    }

    fn serialize_i64(self, v: i64) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Int(v))
    }

    fn serialize_i128(self, v: i128) -> Result<MetadataValue, NormalizeError> {
        match i64::try_from(v) {
            Ok(i) => Ok(MetadataValue::Int(i)),
            Err(_) => Ok(canonical_float(v as f64)),
        }
    }

    fn serialize_u8(self, v: u8) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Int(v.into()))
    }

    fn serialize_u16(self, v: u16) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Int(v.into()))
    }

    fn serialize_u32(self, v: u32) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Int(v.into()))
    }

    fn serialize_u64(self, v: u64) -> Result<MetadataValue, NormalizeError> {
        Ok(canonical_u64(v))
    }

    fn serialize_u128(self, v: u128) -> Result<MetadataValue, NormalizeError> {
        match u64::try_from(v) {
            Ok(u) => Ok(canonical_u64(u)),
            Err(_) => Ok(canonical_float(v as f64)),
        }
    }

    fn serialize_f32(self, v: f32) -> Result<MetadataValue, NormalizeError> {
        Ok(canonical_float(v.into()))
    }

    fn serialize_f64(self, v: f64) -> Result<MetadataValue, NormalizeError> {
        Ok(canonical_float(v))
    }

    fn serialize_char(self, v: char) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::String(v.to_string()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::List(
            v.iter().map(|b| MetadataValue::Int((*b).into())).collect(),
        ))
    }

    fn serialize_none(self) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<MetadataValue, NormalizeError> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
    ) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::String(variant.to_string()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<MetadataValue, NormalizeError> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<MetadataValue, NormalizeError> {
        Ok(tagged(variant, normalize(value)))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<SeqBuilder, NormalizeError> {
        Ok(SeqBuilder {
            items: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<SeqBuilder, NormalizeError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<SeqBuilder, NormalizeError> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<VariantSeqBuilder, NormalizeError> {
        Ok(VariantSeqBuilder {
            variant,
            items: Vec::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapBuilder, NormalizeError> {
        Ok(MapBuilder {
            map: Metadata::new(),
            pending_key: None,
        })
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapBuilder, NormalizeError> {
        self.serialize_map(Some(len))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<VariantMapBuilder, NormalizeError> {
        Ok(VariantMapBuilder {
            variant,
            map: Metadata::new(),
        })
    }
}

fn tagged(variant: &str, payload: MetadataValue) -> MetadataValue {
    let mut map = Metadata::new();
    map.insert(variant, payload);
    MetadataValue::Map(map)
}

pub struct SeqBuilder {
    items: Vec<MetadataValue>,
}

impl ser::SerializeSeq for SeqBuilder {
    type Ok = MetadataValue;
    type Error = NormalizeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NormalizeError> {
        self.items.push(normalize(value));
        Ok(())
    }

    fn end(self) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::List(self.items))
    }
}

impl ser::SerializeTuple for SeqBuilder {
    type Ok = MetadataValue;
    type Error = NormalizeError;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NormalizeError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<MetadataValue, NormalizeError> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SeqBuilder {
    type Ok = MetadataValue;
    type Error = NormalizeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NormalizeError> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<MetadataValue, NormalizeError> {
        ser::SerializeSeq::end(self)
    }
}

pub struct VariantSeqBuilder {
    variant: &'static str,
    items: Vec<MetadataValue>,
}

impl ser::SerializeTupleVariant for VariantSeqBuilder {
    type Ok = MetadataValue;
    type Error = NormalizeError;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NormalizeError> {
        self.items.push(normalize(value));
        Ok(())
    }

    fn end(self) -> Result<MetadataValue, NormalizeError> {
        Ok(tagged(self.variant, MetadataValue::List(self.items)))
    }
}

pub struct MapBuilder {
    map: Metadata,
    pending_key: Option<String>,
}

impl ser::SerializeMap for MapBuilder {
    type Ok = MetadataValue;
    type Error = NormalizeError;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), NormalizeError> {
        self.pending_key = Some(normalize(key).to_key_string());
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), NormalizeError> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| NormalizeError("map value serialized before its key".to_string()))?;
        self.map.insert(key, normalize(value));
        Ok(())
    }

    fn end(self) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Map(self.map))
    }
}

impl ser::SerializeStruct for MapBuilder {
    type Ok = MetadataValue;
    type Error = NormalizeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), NormalizeError> {
        self.map.insert(key, normalize(value));
        Ok(())
    }

    fn end(self) -> Result<MetadataValue, NormalizeError> {
        Ok(MetadataValue::Map(self.map))
    }
}

pub struct VariantMapBuilder {
    variant: &'static str,
    map: Metadata,
}

impl ser::SerializeStructVariant for VariantMapBuilder {
    type Ok = MetadataValue;
    type Error = NormalizeError;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), NormalizeError> {
        self.map.insert(key, normalize(value));
        Ok(())
    }

    fn end(self) -> Result<MetadataValue, NormalizeError> {
        Ok(tagged(self.variant, MetadataValue::Map(self.map)))
    }
}
