//! AMF0 encoder and decoder
//!
//! AMF0 is the encoding RTMP uses for command messages (`connect`,
//! `publish`, `play`, ...) and data messages (`@setDataFrame`,
//! `onMetaData`).
//!
//! Type Markers:
//! ```text
//! 0x00 - Number (IEEE 754 double)
//! 0x01 - Boolean
//! 0x02 - String (UTF-8, 16-bit length prefix)
//! 0x03 - Object (key-value pairs until 0x000009)
//! 0x04 - MovieClip (reserved, rejected)
//! 0x05 - Null
//! 0x06 - Undefined
//! 0x07 - Reference (rejected, see below)
//! 0x08 - ECMA Array (u32 count hint + object body)
//! 0x09 - Object End (0x000009 sequence)
//! 0x0A - Strict Array (u32 count + values)
//! 0x0B - Date (double + 2 reserved bytes)
//! 0x0C - Long String (UTF-8, 32-bit length prefix)
//! 0x0D - Unsupported
//! 0x0E - RecordSet (reserved, rejected)
//! 0x0F - XML Document
//! 0x10 - Typed Object (class name + object body)
//! 0x11 - AVM+ (switch to AMF3)
//! ```
//!
//! # Back-references
//!
//! Every object, ECMA array, strict array and typed object is appended to
//! the decoder's reference table as an empty container *before* its body is
//! read, which is the order the wire format assigns reference indices in.
//! Nothing reads that table back: marker 0x07 is rejected with
//! [`AmfError::Unsupported`]. The table exists so that reference indices
//! stay correct if resolution is ever added; until then it is a known
//! non-functional pathway.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::amf3::Amf3Decoder;
use super::value::{AmfObject, AmfValue};
use crate::error::AmfError;

pub const MARKER_NUMBER: u8 = 0x00;
pub const MARKER_BOOLEAN: u8 = 0x01;
pub const MARKER_STRING: u8 = 0x02;
pub const MARKER_OBJECT: u8 = 0x03;
pub const MARKER_MOVIECLIP: u8 = 0x04;
pub const MARKER_NULL: u8 = 0x05;
pub const MARKER_UNDEFINED: u8 = 0x06;
pub const MARKER_REFERENCE: u8 = 0x07;
pub const MARKER_ECMA_ARRAY: u8 = 0x08;
pub const MARKER_OBJECT_END: u8 = 0x09;
pub const MARKER_STRICT_ARRAY: u8 = 0x0A;
pub const MARKER_DATE: u8 = 0x0B;
pub const MARKER_LONG_STRING: u8 = 0x0C;
pub const MARKER_UNSUPPORTED: u8 = 0x0D;
pub const MARKER_RECORDSET: u8 = 0x0E;
pub const MARKER_XML_DOCUMENT: u8 = 0x0F;
pub const MARKER_TYPED_OBJECT: u8 = 0x10;
pub const MARKER_AVMPLUS: u8 = 0x11;

/// Maximum nesting depth for containers
const MAX_NESTING_DEPTH: usize = 64;

/// Stateful AMF0 decoder
///
/// One decoder is meant to span a single command or data message. Call
/// [`reset`](Self::reset) before reusing it for the next one.
#[derive(Default)]
pub struct Amf0Decoder {
    /// Containers in reference-index order (never resolved)
    references: Vec<AmfValue>,
    /// Delegate for values behind the AVM+ marker
    amf3: Amf3Decoder,
    depth: usize,
}

impl Amf0Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear per-message state
    pub fn reset(&mut self) {
        self.references.clear();
        self.amf3.reset();
        self.depth = 0;
    }

    /// Number of containers registered for back-reference so far
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Decode a single value, dispatching on its leading marker
    pub fn decode(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let marker = read_u8(buf, "type marker")?;

        if self.depth >= MAX_NESTING_DEPTH {
            return Err(AmfError::NestingTooDeep);
        }
        self.depth += 1;
        let result = self.decode_value(marker, buf);
        self.depth -= 1;
        result
    }

    /// Decode values until the buffer is exhausted
    pub fn decode_all(&mut self, buf: &mut Bytes) -> Result<Vec<AmfValue>, AmfError> {
        let mut values = Vec::new();
        while buf.has_remaining() {
            values.push(self.decode(buf)?);
        }
        Ok(values)
    }

    /// Read a value that must be a number
    pub fn read_number(&mut self, buf: &mut Bytes) -> Result<f64, AmfError> {
        expect_marker(buf, MARKER_NUMBER)?;
        read_f64(buf, "number")
    }

    /// Read a value that must be a boolean
    pub fn read_boolean(&mut self, buf: &mut Bytes) -> Result<bool, AmfError> {
        expect_marker(buf, MARKER_BOOLEAN)?;
        decode_boolean(buf)
    }

    /// Read a value that must be a (short) string
    pub fn read_string(&mut self, buf: &mut Bytes) -> Result<String, AmfError> {
        expect_marker(buf, MARKER_STRING)?;
        read_utf8(buf, "string")
    }

    /// Read a value that must be an anonymous object
    pub fn read_object(&mut self, buf: &mut Bytes) -> Result<AmfObject, AmfError> {
        expect_marker(buf, MARKER_OBJECT)?;
        self.register(AmfValue::Object(AmfObject::new()));
        self.read_object_body(buf)
    }

    fn decode_value(&mut self, marker: u8, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        match marker {
            MARKER_NUMBER => Ok(AmfValue::Number(read_f64(buf, "number")?)),
            MARKER_BOOLEAN => Ok(AmfValue::Boolean(decode_boolean(buf)?)),
            MARKER_STRING => Ok(AmfValue::String(read_utf8(buf, "string")?)),
            MARKER_OBJECT => {
                self.register(AmfValue::Object(AmfObject::new()));
                Ok(AmfValue::Object(self.read_object_body(buf)?))
            }
            MARKER_MOVIECLIP => Err(AmfError::Unsupported("movieclip")),
            MARKER_NULL => Ok(AmfValue::Null),
            MARKER_UNDEFINED | MARKER_UNSUPPORTED => Ok(AmfValue::Undefined),
            MARKER_REFERENCE => Err(AmfError::Unsupported("reference")),
            MARKER_ECMA_ARRAY => self.decode_ecma_array(buf),
            MARKER_STRICT_ARRAY => self.decode_strict_array(buf),
            MARKER_DATE => decode_date(buf),
            MARKER_LONG_STRING => Ok(AmfValue::String(read_utf8_long(buf, "long string")?)),
            MARKER_RECORDSET => Err(AmfError::Unsupported("recordset")),
            MARKER_XML_DOCUMENT => Ok(AmfValue::Xml(read_utf8_long(buf, "xml document")?)),
            MARKER_TYPED_OBJECT => self.decode_typed_object(buf),
            MARKER_AVMPLUS => self.amf3.decode(buf),
            other => Err(AmfError::UnknownMarker(other)),
        }
    }

    fn decode_ecma_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        // Count is a hint only; the body is terminated like an object
        let _count = read_u32(buf, "ecma array count")?;
        self.register(AmfValue::EcmaArray(AmfObject::new()));
        Ok(AmfValue::EcmaArray(self.read_object_body(buf)?))
    }

    fn decode_strict_array(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        let count = read_u32(buf, "strict array length")? as usize;
        self.register(AmfValue::Array(Vec::new()));

        // Every element takes at least one byte
        if buf.remaining() < count {
            return Err(AmfError::Truncated {
                field: "strict array elements",
            });
        }

        let mut elements = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            elements.push(self.decode(buf)?);
        }
        Ok(AmfValue::Array(elements))
    }

    fn decode_typed_object(&mut self, buf: &mut Bytes) -> Result<AmfValue, AmfError> {
        self.register(AmfValue::TypedObject {
            class_name: String::new(),
            properties: AmfObject::new(),
        });
        let class_name = read_utf8(buf, "typed object class name")?;
        let properties = self.read_object_body(buf)?;
        Ok(AmfValue::TypedObject {
            class_name,
            properties,
        })
    }

    /// Key/value pairs terminated by an empty key and the object-end marker
    fn read_object_body(&mut self, buf: &mut Bytes) -> Result<AmfObject, AmfError> {
        let mut properties = AmfObject::new();
        loop {
            let key = read_utf8(buf, "object key")?;
            if key.is_empty() {
                let end = read_u8(buf, "object end marker")?;
                if end != MARKER_OBJECT_END {
                    return Err(AmfError::UnexpectedMarker {
                        expected: MARKER_OBJECT_END,
                        found: end,
                    });
                }
                return Ok(properties);
            }

            let value = self.decode(buf)?;
            properties.insert(key, value);
        }
    }

    fn register(&mut self, placeholder: AmfValue) {
        self.references.push(placeholder);
    }
}

fn decode_boolean(buf: &mut Bytes) -> Result<bool, AmfError> {
    match read_u8(buf, "boolean")? {
        0x00 => Ok(false),
        0x01 => Ok(true),
        other => Err(AmfError::InvalidBoolean(other)),
    }
}

fn decode_date(buf: &mut Bytes) -> Result<AmfValue, AmfError> {
    let millis = read_f64(buf, "date")?;
    if buf.remaining() < 2 {
        return Err(AmfError::Truncated {
            field: "date timezone",
        });
    }
    buf.advance(2);
    Ok(AmfValue::Date(millis))
}

fn expect_marker(buf: &mut Bytes, expected: u8) -> Result<(), AmfError> {
    let found = read_u8(buf, "type marker")?;
    if found != expected {
        return Err(AmfError::UnexpectedMarker { expected, found });
    }
    Ok(())
}

fn read_u8(buf: &mut Bytes, field: &'static str) -> Result<u8, AmfError> {
    if !buf.has_remaining() {
        return Err(AmfError::Truncated { field });
    }
    Ok(buf.get_u8())
}

fn read_u32(buf: &mut Bytes, field: &'static str) -> Result<u32, AmfError> {
    if buf.remaining() < 4 {
        return Err(AmfError::Truncated { field });
    }
    Ok(buf.get_u32())
}

fn read_f64(buf: &mut Bytes, field: &'static str) -> Result<f64, AmfError> {
    if buf.remaining() < 8 {
        return Err(AmfError::Truncated { field });
    }
    Ok(buf.get_f64())
}

/// UTF-8 string with 16-bit length prefix
fn read_utf8(buf: &mut Bytes, field: &'static str) -> Result<String, AmfError> {
    if buf.remaining() < 2 {
        return Err(AmfError::Truncated { field });
    }
    let len = buf.get_u16() as usize;
    read_utf8_body(buf, len, field)
}

/// UTF-8 string with 32-bit length prefix
fn read_utf8_long(buf: &mut Bytes, field: &'static str) -> Result<String, AmfError> {
    let len = read_u32(buf, field)? as usize;
    read_utf8_body(buf, len, field)
}

fn read_utf8_body(buf: &mut Bytes, len: usize, field: &'static str) -> Result<String, AmfError> {
    if buf.remaining() < len {
        return Err(AmfError::Truncated { field });
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| AmfError::InvalidUtf8 { field })
}

/// AMF0 encoder
pub struct Amf0Encoder {
    buf: BytesMut,
}

impl Amf0Encoder {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Take the encoded bytes, leaving the encoder empty
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Encode a single value
    pub fn encode(&mut self, value: &AmfValue) {
        match value {
            AmfValue::Null => self.buf.put_u8(MARKER_NULL),
            AmfValue::Undefined => self.buf.put_u8(MARKER_UNDEFINED),
            AmfValue::Boolean(b) => {
                self.buf.put_u8(MARKER_BOOLEAN);
                self.buf.put_u8(u8::from(*b));
            }
            AmfValue::Number(n) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*n);
            }
            // No integer type in AMF0
            AmfValue::Integer(i) => {
                self.buf.put_u8(MARKER_NUMBER);
                self.buf.put_f64(*i as f64);
            }
            AmfValue::String(s) if s.len() > u16::MAX as usize => {
                self.buf.put_u8(MARKER_LONG_STRING);
                self.write_utf8_long(s);
            }
            AmfValue::String(s) => {
                self.buf.put_u8(MARKER_STRING);
                self.write_utf8(s);
            }
            AmfValue::Object(props) => {
                self.buf.put_u8(MARKER_OBJECT);
                self.write_object_body(props);
            }
            AmfValue::EcmaArray(props) => {
                self.buf.put_u8(MARKER_ECMA_ARRAY);
                self.buf.put_u32(props.len() as u32);
                self.write_object_body(props);
            }
            AmfValue::Array(elements) => {
                self.buf.put_u8(MARKER_STRICT_ARRAY);
                self.buf.put_u32(elements.len() as u32);
                for elem in elements {
                    self.encode(elem);
                }
            }
            AmfValue::Date(millis) => {
                self.buf.put_u8(MARKER_DATE);
                self.buf.put_f64(*millis);
                self.buf.put_i16(0);
            }
            AmfValue::Xml(s) => {
                self.buf.put_u8(MARKER_XML_DOCUMENT);
                self.write_utf8_long(s);
            }
            AmfValue::TypedObject {
                class_name,
                properties,
            } => {
                self.buf.put_u8(MARKER_TYPED_OBJECT);
                self.write_utf8(class_name);
                self.write_object_body(properties);
            }
            // AMF3 only
            AmfValue::ByteArray(_) => self.buf.put_u8(MARKER_NULL),
        }
    }

    pub fn encode_all(&mut self, values: &[AmfValue]) {
        for value in values {
            self.encode(value);
        }
    }

    fn write_object_body(&mut self, props: &AmfObject) {
        for (key, val) in props {
            self.write_utf8(key);
            self.encode(val);
        }
        self.buf.put_u16(0);
        self.buf.put_u8(MARKER_OBJECT_END);
    }

    /// 16-bit length prefix, no marker. Longer input is truncated on a
    /// character boundary.
    fn write_utf8(&mut self, s: &str) {
        let mut len = s.len().min(u16::MAX as usize);
        while !s.is_char_boundary(len) {
            len -= 1;
        }
        self.buf.put_u16(len as u16);
        self.buf.put_slice(&s.as_bytes()[..len]);
    }

    fn write_utf8_long(&mut self, s: &str) {
        self.buf.put_u32(s.len() as u32);
        self.buf.put_slice(s.as_bytes());
    }
}

impl Default for Amf0Encoder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn encode(value: &AmfValue) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode(value);
    encoder.finish()
}

pub fn encode_all(values: &[AmfValue]) -> Bytes {
    let mut encoder = Amf0Encoder::new();
    encoder.encode_all(values);
    encoder.finish()
}

pub fn decode(data: &[u8]) -> Result<AmfValue, AmfError> {
    let mut buf = Bytes::copy_from_slice(data);
    Amf0Decoder::new().decode(&mut buf)
}

pub fn decode_all(data: &[u8]) -> Result<Vec<AmfValue>, AmfError> {
    let mut buf = Bytes::copy_from_slice(data);
    Amf0Decoder::new().decode_all(&mut buf)
}
