//! AMF value model
//!
//! AMF0 and AMF3 decode into the same [`AmfValue`]. Associative containers
//! keep wire order so that a decoded object can be re-encoded byte-for-byte.

use indexmap::IndexMap;

/// String-keyed container in wire order
pub type AmfObject = IndexMap<String, AmfValue>;

/// Decoded AMF value
#[derive(Debug, Clone, PartialEq)]
pub enum AmfValue {
    /// AMF0 0x05, AMF3 0x01
    Null,

    /// AMF0 0x06 (and 0x0D), AMF3 0x00
    Undefined,

    /// AMF0 0x01, AMF3 0x02/0x03
    Boolean(bool),

    /// IEEE 754 double (AMF0 0x00, AMF3 0x05)
    Number(f64),

    /// UTF-8 string. Long strings (AMF0 0x0C) decode here as well.
    String(String),

    /// Dense array (AMF0 strict array 0x0A, AMF3 array without assoc part)
    Array(Vec<AmfValue>),

    /// Anonymous object (AMF0 0x03, AMF3 0x0A with empty class name)
    Object(AmfObject),

    /// Associative array (AMF0 0x08). `onMetaData` usually arrives as one.
    EcmaArray(AmfObject),

    /// Object carrying a class name (AMF0 0x10)
    TypedObject {
        class_name: String,
        properties: AmfObject,
    },

    /// Milliseconds since the Unix epoch
    Date(f64),

    /// XML document text
    Xml(String),

    /// AMF3 only
    ByteArray(Vec<u8>),

    /// AMF3 only, 29-bit signed
    Integer(i32),
}

impl AmfValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AmfValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; AMF3 integers widen to f64
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AmfValue::Number(n) => Some(*n),
            AmfValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AmfValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Properties of any associative container
    pub fn as_object(&self) -> Option<&AmfObject> {
        match self {
            AmfValue::Object(m) | AmfValue::EcmaArray(m) => Some(m),
            AmfValue::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[AmfValue]> {
        match self {
            AmfValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_null_or_undefined(&self) -> bool {
        matches!(self, AmfValue::Null | AmfValue::Undefined)
    }

    /// Look up a property of an associative container
    pub fn get(&self, key: &str) -> Option<&AmfValue> {
        self.as_object()?.get(key)
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_number(&self, key: &str) -> Option<f64> {
        self.get(key)?.as_number()
    }
}

impl Default for AmfValue {
    fn default() -> Self {
        AmfValue::Null
    }
}

impl From<bool> for AmfValue {
    fn from(v: bool) -> Self {
        AmfValue::Boolean(v)
    }
}

impl From<f64> for AmfValue {
    fn from(v: f64) -> Self {
        AmfValue::Number(v)
    }
}

impl From<u32> for AmfValue {
    fn from(v: u32) -> Self {
        AmfValue::Number(v as f64)
    }
}

impl From<String> for AmfValue {
    fn from(v: String) -> Self {
        AmfValue::String(v)
    }
}

impl From<&str> for AmfValue {
    fn from(v: &str) -> Self {
        AmfValue::String(v.to_string())
    }
}

impl<V: Into<AmfValue>> From<Vec<V>> for AmfValue {
    fn from(v: Vec<V>) -> Self {
        AmfValue::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<AmfValue>> FromIterator<(K, V)> for AmfValue {
    /// Collects into an anonymous object, preserving iteration order
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        AmfValue::Object(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
