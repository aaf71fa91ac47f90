//! Open metadata map attached to sessions and messages
//!
//! Values are drawn from a closed scalar set, expressed as the
//! [`MetadataValue`] tagged union. Every insertion path is fallible and
//! validated before anything reaches the network; nothing in here panics on
//! bad input.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TablememError};

/// A scalar value the store can hold in a column
///
/// This is also the native column value type of the [`TableStore`]
/// abstraction: metadata entries round-trip through the store without
/// re-validation or conversion.
///
/// [`TableStore`]: crate::store::TableStore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataValue {
    Str(String),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl MetadataValue {
    /// Render the value as a string, converting non-string scalars
    pub fn as_str_lossy(&self) -> String {
        match self {
            MetadataValue::Str(s) => s.clone(),
            MetadataValue::I32(v) => v.to_string(),
            MetadataValue::I64(v) => v.to_string(),
            MetadataValue::F32(v) => v.to_string(),
            MetadataValue::F64(v) => v.to_string(),
            MetadataValue::Bool(v) => v.to_string(),
            MetadataValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Coerce to i64 where a sensible conversion exists
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::I32(v) => Some(i64::from(*v)),
            MetadataValue::I64(v) => Some(*v),
            MetadataValue::F32(v) => Some(*v as i64),
            MetadataValue::F64(v) => Some(*v as i64),
            MetadataValue::Bool(v) => Some(i64::from(*v)),
            MetadataValue::Str(s) => s.parse().ok(),
            MetadataValue::Bytes(_) => None,
        }
    }

    /// Coerce to f64 where a sensible conversion exists
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::I32(v) => Some(f64::from(*v)),
            MetadataValue::I64(v) => Some(*v as f64),
            MetadataValue::F32(v) => Some(f64::from(*v)),
            MetadataValue::F64(v) => Some(*v),
            MetadataValue::Bool(v) => Some(f64::from(u8::from(*v))),
            MetadataValue::Str(s) => s.parse().ok(),
            MetadataValue::Bytes(_) => None,
        }
    }

    /// Coerce to bool where a sensible conversion exists
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(v) => Some(*v),
            MetadataValue::I32(v) => Some(*v != 0),
            MetadataValue::I64(v) => Some(*v != 0),
            MetadataValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        MetadataValue::I32(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::I64(v)
    }
}

impl From<f32> for MetadataValue {
    fn from(v: f32) -> Self {
        MetadataValue::F32(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::F64(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(v: Vec<u8>) -> Self {
        MetadataValue::Bytes(v)
    }
}

/// Open mapping from non-empty string keys to scalar values
///
/// Entries are stored as additional columns beyond the reserved entity
/// fields, so keys must not collide with reserved column names; that
/// collision is rejected when the owning entity is validated for a write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: BTreeMap<String, MetadataValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from key/value pairs, validating every key
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (String, MetadataValue)>,
    ) -> Result<Self> {
        let mut md = Metadata::new();
        for (k, v) in pairs {
            md.put(k, v)?;
        }
        Ok(md)
    }

    /// Insert a value under a non-empty key
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Result<()> {
        let key = key.into();
        if key.is_empty() {
            return Err(TablememError::Validation(
                "metadata key must not be blank".to_string(),
            ));
        }
        self.entries.insert(key, value.into());
        Ok(())
    }

    /// Insert a decoded column verbatim, bypassing validation.
    ///
    /// Used when decoding rows: values coming back from the store are typed
    /// by the store's native column value and are not re-validated.
    pub(crate) fn insert_unchecked(&mut self, key: String, value: MetadataValue) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(MetadataValue::as_str_lossy)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.entries.get(key).and_then(MetadataValue::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.entries.get(key).and_then(MetadataValue::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.entries.get(key).and_then(MetadataValue::as_bool)
    }

    /// Strict byte-sequence accessor: a present value of any other kind is an
    /// error rather than a coercion
    pub fn get_bytes(&self, key: &str) -> Result<Option<&[u8]>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(MetadataValue::Bytes(b)) => Ok(Some(b)),
            Some(other) => Err(TablememError::Validation(format!(
                "metadata entry '{key}' holds {other:?}, not bytes"
            ))),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merge with another map, refusing duplicate keys.
    ///
    /// The duplicate check runs before anything is copied, so a failed merge
    /// leaves no partial result behind.
    pub fn merge(&self, other: &Metadata) -> Result<Metadata> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        for key in other.keys() {
            if self.contains_key(key) {
                return Err(TablememError::Validation(format!(
                    "metadata keys are not unique, common key: {key}"
                )));
            }
        }
        let mut merged = self.clone();
        for (k, v) in other.iter() {
            merged.entries.insert(k.to_string(), v.clone());
        }
        Ok(merged)
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a MetadataValue);
    type IntoIter = std::collections::btree_map::Iter<'a, String, MetadataValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_rejects_blank_key() {
        let mut md = Metadata::new();
        assert!(md.put("", "value").is_err());
        assert!(md.put("valid_key", "value").is_ok());
    }

    #[test]
    fn test_lossy_getters() {
        let mut md = Metadata::new();
        md.put("count", 7i64).unwrap();
        md.put("flag", true).unwrap();
        md.put("ratio", 0.5f64).unwrap();
        assert_eq!(md.get_string("count").as_deref(), Some("7"));
        assert_eq!(md.get_i64("flag"), Some(1));
        assert_eq!(md.get_f64("ratio"), Some(0.5));
        assert_eq!(md.get_i64("missing"), None);
    }

    #[test]
    fn test_get_bytes_is_strict() {
        let mut md = Metadata::new();
        md.put("s", "string_value").unwrap();
        md.put("b", b"test_bytes".to_vec()).unwrap();

        assert!(md.get_bytes("missing").unwrap().is_none());
        assert!(md.get_bytes("s").is_err());
        assert_eq!(md.get_bytes("b").unwrap(), Some(&b"test_bytes"[..]));
    }

    #[test]
    fn test_merge_rejects_duplicates_without_partial_result() {
        let mut a = Metadata::new();
        a.put("x", 1i64).unwrap();
        a.put("y", 2i64).unwrap();
        let mut b = Metadata::new();
        b.put("y", 3i64).unwrap();
        b.put("z", 4i64).unwrap();

        assert!(a.merge(&b).is_err());
        assert_eq!(a.len(), 2);

        b.remove("y");
        let merged = a.merge(&b).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get_i64("z"), Some(4));
    }
}
