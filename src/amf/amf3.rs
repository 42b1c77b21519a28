//! AMF3 decoder
//!
//! Only reachable through the AMF0 AVM+ marker (0x11). Flash Player sends
//! `objectEncoding: 3` commands this way; the hub never emits AMF3, so there
//! is no encoder.
//!
//! Type Markers:
//! ```text
//! 0x00 - Undefined
//! 0x01 - Null
//! 0x02 - Boolean false
//! 0x03 - Boolean true
//! 0x04 - Integer (29-bit signed)
//! 0x05 - Double
//! 0x06 - String
//! 0x07 - XML Document (legacy)
//! 0x08 - Date
//! 0x09 - Array
//! 0x0A - Object
//! 0x0B - XML
//! 0x0C - ByteArray
//! ```
//!
//! Unlike AMF0, AMF3 references are resolved: strings, complex values and
//! traits each have their own table indexed by the low-bit-clear U29 form.

use bytes::{Buf, Bytes};

use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

const MARKER_UNDEFINED: u8 = 0x00;
const MARKER_NULL: u8 = 0x01;
const MARKER_FALSE: u8 = 0x02;
const MARKER_TRUE: u8 = 0x03;
const MARKER_INTEGER: u8 = 0x04;
const MARKER_DOUBLE: u8 = 0x05;
const MARKER_STRING: u8 = 0x06;
const MARKER_XML_DOC: u8 = 0x07;
const MARKER_DATE: u8 = 0x08;
const MARKER_ARRAY: u8 = 0x09;
const MARKER_OBJECT: u8 = 0x0A;
const MARKER_XML: u8 = 0x0B;
const MARKER_BYTE_ARRAY: u8 = 0x0C;

const MAX_NESTING_DEPTH: usize = 64;

#[derive(Clone, Debug)]
struct Traits {
    class_name: String,
    dynamic: bool,
    sealed: Vec<String>,
}

/// Either an inline payload length or an index into a reference table
enum Header {
    Inline(usize),
    Reference(usize),
}

/// AMF3 decoder with its three reference tables
#[derive(Default)]
pub struct Amf3Decoder {
    strings: Vec<String>,
    objects: Vec<AmfValue>,
    traits: Vec<Traits>,
    depth: usize,
}

impl Amf3Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.strings.clear();
        self.objects.clear();
        self.traits.clear();
        self.depth = 0;
    }

    /// Decode a single value
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        if !buf.has_remaining() {
            return Err(AmfError::Truncated {
                field: "amf3 type marker",
            });
        }
        let marker = buf.get_u8();

        if self.depth >= MAX_NESTING_DEPTH {
            return Err(AmfError::NestingTooDeep);
        }
        self.depth += 1;
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_UNDEFINED => Ok(AmfValue::Undefined),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_FALSE => Ok(AmfValue::Boolean(false)),
            MARKER_TRUE => Ok(AmfValue::Boolean(true)),
            MARKER_INTEGER => {
                let raw = read_u29(buf, "amf3 integer")?;
                // sign-extend from 29 bits
                Ok(AmfValue::Integer(((raw << 3) as i32) >> 3))
            }
            MARKER_DOUBLE => {
                if buf.remaining() < 8 {
                    return Err(AmfError::Truncated {
                        field: "amf3 double",
                    });
                }
                Ok(AmfValue::Number(buf.get_f64()))
            }
            MARKER_STRING => Ok(AmfValue::String(self.read_string(buf)?)),
            MARKER_XML | MARKER_XML_DOC => self.decode_xml(buf),
            MARKER_DATE => self.decode_date(buf),
            MARKER_ARRAY => self.decode_array(buf),
            MARKER_OBJECT => self.decode_object(buf),
            MARKER_BYTE_ARRAY => self.decode_byte_array(buf),
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    fn object_ref(&self, index: usize) -> Result<AmfValue, AmfError> {
        self.objects
            .get(index)
            .cloned()
            .ok_or(AmfError::InvalidReference(index))
    }

    fn decode_date(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match read_header(buf, "amf3 date")? {
            Header::Reference(index) => self.object_ref(index),
            Header::Inline(_) => {
                if buf.remaining() < 8 {
                    return Err(AmfError::Truncated { field: "amf3 date" });
                }
                let value = AmfValue::Date(buf.get_f64());
                self.objects.push(value.clone());
                Ok(value)
            }
        }
    }

    fn decode_xml(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match read_header(buf, "amf3 xml")? {
            Header::Reference(index) => self.object_ref(index),
            Header::Inline(len) => {
                let value = AmfValue::Xml(read_utf8(buf, len, "amf3 xml")?);
                self.objects.push(value.clone());
                Ok(value)
            }
        }
    }

    fn decode_byte_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match read_header(buf, "amf3 byte array")? {
            Header::Reference(index) => self.object_ref(index),
            Header::Inline(len) => {
                if buf.remaining() < len {
                    return Err(AmfError::Truncated {
                        field: "amf3 byte array",
                    });
                }
                let value = AmfValue::ByteArray(buf.copy_to_bytes(len).to_vec());
                self.objects.push(value.clone());
                Ok(value)
            }
        }
    }

    fn decode_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let dense_len = match read_header(buf, "amf3 array")? {
            Header::Reference(index) => return self.object_ref(index),
            Header::Inline(len) => len,
        };

        let slot = self.objects.len();
        self.objects.push(AmfValue::Null);

        let mut assoc = AmfObject::new();
        loop {
            let key = self.read_string(buf)?;
            if key.is_empty() {
                break;
            }
            let value = self.decode(buf)?;
            assoc.insert(key, value);
        }

        if buf.remaining() < dense_len {
            return Err(AmfError::Truncated {
                field: "amf3 array elements",
            });
        }
        let mut dense = Vec::with_capacity(dense_len.min(1024));
        for _ in 0..dense_len {
            dense.push(self.decode(buf)?);
        }

        let value = if assoc.is_empty() {
            AmfValue::Array(dense)
        } else {
            // mixed arrays keep dense entries under their index
            for (i, v) in dense.into_iter().enumerate() {
                assoc.insert(i.to_string(), v);
            }
            AmfValue::EcmaArray(assoc)
        };

        self.objects[slot] = value.clone();
        Ok(value)
    }

    fn decode_object(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let header = read_u29(buf, "amf3 object header")? as usize;
        if header & 1 == 0 {
            return self.object_ref(header >> 1);
        }

        let slot = self.objects.len();
        self.objects.push(AmfValue::Null);

        let traits = if header & 2 == 0 {
            let index = header >> 2;
            self.traits
                .get(index)
                .cloned()
                .ok_or(AmfError::InvalidReference(index))?
        } else if header & 4 != 0 {
            return Err(AmfError::Unsupported("amf3 externalizable object"));
        } else {
            let class_name = self.read_string(buf)?;
            let sealed_len = header >> 4;
            let mut sealed = Vec::with_capacity(sealed_len.min(256));
            for _ in 0..sealed_len {
                sealed.push(self.read_string(buf)?);
            }
            let traits = Traits {
                class_name,
                dynamic: header & 8 != 0,
                sealed,
            };
            self.traits.push(traits.clone());
            traits
        };

        let mut properties = AmfObject::new();
        for name in &traits.sealed {
            let value = self.decode(buf)?;
            properties.insert(name.clone(), value);
        }
        if traits.dynamic {
            loop {
                let key = self.read_string(buf)?;
                if key.is_empty() {
                    break;
                }
                let value = self.decode(buf)?;
                properties.insert(key, value);
            }
        }

        let value = if traits.class_name.is_empty() {
            AmfValue::Object(properties)
        } else {
            AmfValue::TypedObject {
                class_name: traits.class_name,
                properties,
            }
        };

        self.objects[slot] = value.clone();
        Ok(value)
    }

    /// String value or reference; the empty string is never a reference
    fn read_string(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        match read_header(buf, "amf3 string")? {
            Header::Reference(index) => self
                .strings
                .get(index)
                .cloned()
                .ok_or(AmfError::InvalidReference(index)),
            Header::Inline(0) => Ok(String::new()),
            Header::Inline(len) => {
                let s = read_utf8(buf, len, "amf3 string")?;
                self.strings.push(s.clone());
                Ok(s)
            }
        }
    }
}

fn read_header(buf: &mut Bytes, field: &'static str) -> Result<Header, AmfError> {
    let raw = read_u29(buf, field)? as usize;
    if raw & 1 == 0 {
        Ok(Header::Reference(raw >> 1))
    } else {
        Ok(Header::Inline(raw >> 1))
    }
}

/// Variable-length 29-bit unsigned integer: 7 bits in each of the first
/// three bytes, all 8 bits of the fourth
fn read_u29(buf: &mut Bytes, field: &'static str) -> Result<u32, AmfError> {
    let mut value: u32 = 0;
    for i in 0..4 {
        if !buf.has_remaining() {
            return Err(AmfError::Truncated { field });
        }
        let byte = buf.get_u8();
        if i == 3 {
            return Ok((value << 8) | byte as u32);
        }
        value = (value << 7) | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(value)
}

fn read_utf8(buf: &mut Bytes, len: usize, field: &'static str) -> Result<String, AmfError> {
    if buf.remaining() < len {
        return Err(AmfError::Truncated { field });
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8 { field })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &'static [u8]) -> Result<AmfValue, AmfError> {
        Amf3Decoder::new().decode(&mut Bytes::from_static(data))
    }

    #[test]
    fn test_scalars() {
        assert_eq!(decode(&[0x00]).unwrap(), AmfValue::Undefined);
        assert_eq!(decode(&[0x01]).unwrap(), AmfValue::Null);
        assert_eq!(decode(&[0x02]).unwrap(), AmfValue::Boolean(false));
        assert_eq!(decode(&[0x03]).unwrap(), AmfValue::Boolean(true));
        assert_eq!(
            decode(&[0x05, 0x40, 0x45, 0, 0, 0, 0, 0, 0]).unwrap(),
            AmfValue::Number(42.0)
        );
    }

    #[test]
    fn test_u29_integers() {
        assert_eq!(decode(&[0x04, 0x7F]).unwrap(), AmfValue::Integer(127));
        assert_eq!(decode(&[0x04, 0x81, 0x00]).unwrap(), AmfValue::Integer(128));
        // all 29 bits set is -1
        assert_eq!(
            decode(&[0x04, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap(),
            AmfValue::Integer(-1)
        );
        assert_eq!(
            decode(&[0x04, 0x81]),
            Err(AmfError::Truncated {
                field: "amf3 integer"
            })
        );
    }

    #[test]
    fn test_string_reference_table() {
        let mut decoder = Amf3Decoder::new();
        // "ab", then a reference to string 0
        let mut buf = Bytes::from_static(&[0x06, 0x05, b'a', b'b', 0x06, 0x00]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), AmfValue::from("ab"));
        assert_eq!(decoder.decode(&mut buf).unwrap(), AmfValue::from("ab"));

        let mut buf = Bytes::from_static(&[0x06, 0x02]);
        assert_eq!(decoder.decode(&mut buf), Err(AmfError::InvalidReference(1)));
    }

    #[test]
    fn test_dynamic_anonymous_object() {
        // inline traits, dynamic, 0 sealed, empty class name; {"k": 1}
        let value = decode(&[0x0A, 0x0B, 0x01, 0x03, b'k', 0x04, 0x01, 0x01]).unwrap();
        assert_eq!(value.get_number("k"), Some(1.0));
        assert!(matches!(value, AmfValue::Object(_)));
    }

    #[test]
    fn test_dense_array() {
        let value = decode(&[0x09, 0x05, 0x01, 0x04, 0x01, 0x03]).unwrap();
        assert_eq!(
            value,
            AmfValue::Array(vec![AmfValue::Integer(1), AmfValue::Boolean(true)])
        );
    }

    #[test]
    fn test_externalizable_rejected() {
        assert_eq!(
            decode(&[0x0A, 0x07, 0x01]),
            Err(AmfError::Unsupported("amf3 externalizable object"))
        );
    }

    #[test]
    fn test_unknown_marker() {
        assert_eq!(decode(&[0x0D]), Err(AmfError::UnknownMarker(0x0D)));
    }
}
