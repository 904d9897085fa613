//! Data section encoding and decoding
//!
//! Implements the MaxMind DB data type encoding used both for record values
//! (referenced from the search tree) and for the metadata map at the end of
//! the file.
//!
//! # Supported Types
//!
//! - **Pointer**: reference to an earlier value (resolved on decode, never
//!   surfaced as a [`DataValue`])
//! - **String**: UTF-8 text data
//! - **Double**: 64-bit floating point (IEEE 754)
//! - **Bytes**: Raw byte arrays
//! - **Uint16** / **Uint32** / **Uint64** / **Uint128**: unsigned integers
//! - **Int32**: Signed 32-bit integers
//! - **Map**: Key-value pairs (string keys)
//! - **Array**: Ordered lists of values
//! - **Bool**: Boolean values
//! - **Float**: 32-bit floating point (IEEE 754)
//!
//! # Format
//!
//! A control byte carries the type (3 bits) and size (5 bits). Type 0 marks
//! an extended type whose id minus 7 follows in the next byte. Sizes of 29
//! and above spill into 1-3 extra bytes after the control byte(s).
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

const TYPE_EXTENDED: u8 = 0;
const TYPE_POINTER: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_BYTES: u8 = 4;
const TYPE_UINT16: u8 = 5;
const TYPE_UINT32: u8 = 6;
const TYPE_MAP: u8 = 7;
const TYPE_INT32: u8 = 8;
const TYPE_UINT64: u8 = 9;
const TYPE_UINT128: u8 = 10;
const TYPE_ARRAY: u8 = 11;
const TYPE_BOOL: u8 = 14;
const TYPE_FLOAT: u8 = 15;

/// Maximum nesting of maps/arrays/pointers accepted by the decoder
const MAX_DECODE_DEPTH: usize = 64;

/// Values a single `decode` may produce, pointer targets counted each time
/// they are followed
const MAX_DECODE_VALUES: usize = 1 << 20;

/// Data value that can be stored in the data section
///
/// Maps are ordered by key so that equality, iteration and encoding are all
/// deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only)
    Map(BTreeMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Short name of the variant, used in type conflict errors
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::String(_) => "string",
            DataValue::Double(_) => "double",
            DataValue::Bytes(_) => "bytes",
            DataValue::Uint16(_) => "uint16",
            DataValue::Uint32(_) => "uint32",
            DataValue::Map(_) => "map",
            DataValue::Int32(_) => "int32",
            DataValue::Uint64(_) => "uint64",
            DataValue::Uint128(_) => "uint128",
            DataValue::Array(_) => "array",
            DataValue::Bool(_) => "bool",
            DataValue::Float(_) => "float",
        }
    }

    /// Borrow the inner map, if this is a map
    pub fn as_map(&self) -> Option<&BTreeMap<String, DataValue>> {
        match self {
            DataValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the inner string, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widen any unsigned integer variant to u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            DataValue::Uint128(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Look up a key when this value is a map
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.as_map().and_then(|m| m.get(key))
    }
}

impl From<&str> for DataValue {
    fn from(s: &str) -> Self {
        DataValue::String(s.to_string())
    }
}

impl From<String> for DataValue {
    fn from(s: String) -> Self {
        DataValue::String(s)
    }
}

impl From<u32> for DataValue {
    fn from(n: u32) -> Self {
        DataValue::Uint32(n)
    }
}

impl From<i32> for DataValue {
    fn from(n: i32) -> Self {
        DataValue::Int32(n)
    }
}

impl From<f64> for DataValue {
    fn from(n: f64) -> Self {
        DataValue::Double(n)
    }
}

impl From<bool> for DataValue {
    fn from(b: bool) -> Self {
        DataValue::Bool(b)
    }
}

impl<K: Into<String>> FromIterator<(K, DataValue)> for DataValue {
    fn from_iter<I: IntoIterator<Item = (K, DataValue)>>(iter: I) -> Self {
        DataValue::Map(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Data section encoder
///
/// Builds a data section by encoding values and tracking offsets.
/// Identical top-level values get the same offset, and repeated nested
/// values (map keys, strings, sub-maps) are written as pointers to their
/// first occurrence whenever the pointer is shorter than the value.
pub struct DataEncoder {
    /// Encoded data buffer
    buffer: Vec<u8>,
    /// Map from standalone encoding to the offset of its first occurrence
    dedup_map: FxHashMap<Vec<u8>, u32>,
}

impl DataEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup_map: FxHashMap::default(),
        }
    }

    /// Encode a value and return its offset
    ///
    /// If the value was previously encoded, returns the existing offset.
    pub fn encode(&mut self, value: &DataValue) -> u32 {
        let key = Self::standalone(value);
        if let Some(&offset) = self.dedup_map.get(&key) {
            return offset;
        }
        self.write_new(value, key)
    }

    /// Get the final encoded data section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get current buffer size
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    fn write_new(&mut self, value: &DataValue, key: Vec<u8>) -> u32 {
        let offset = self.buffer.len() as u32;
        self.write_body(value, &key);
        self.dedup_map.insert(key, offset);
        offset
    }

    /// Write a value that lives inside a map or array
    fn encode_member(&mut self, value: &DataValue) {
        let key = Self::standalone(value);
        if let Some(&offset) = self.dedup_map.get(&key) {
            let mut pointer = Vec::with_capacity(5);
            encode_pointer(offset, &mut pointer);
            if pointer.len() < key.len() {
                self.buffer.extend_from_slice(&pointer);
            } else {
                self.write_body(value, &key);
            }
            return;
        }
        self.write_new(value, key);
    }

    fn write_body(&mut self, value: &DataValue, standalone: &[u8]) {
        match value {
            DataValue::Map(m) => {
                write_control(TYPE_MAP, m.len(), &mut self.buffer);
                for (k, v) in m {
                    self.encode_member(&DataValue::String(k.clone()));
                    self.encode_member(v);
                }
            }
            DataValue::Array(a) => {
                write_control(TYPE_ARRAY, a.len(), &mut self.buffer);
                for v in a {
                    self.encode_member(v);
                }
            }
            _ => self.buffer.extend_from_slice(standalone),
        }
    }

    /// Pointer-free encoding of a value, used as the deduplication key
    fn standalone(value: &DataValue) -> Vec<u8> {
        let mut buffer = Vec::new();
        encode_to_buffer(value, &mut buffer);
        buffer
    }
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a value with no pointers into a buffer
pub fn encode_to_buffer(value: &DataValue, buffer: &mut Vec<u8>) {
    match value {
        DataValue::String(s) => {
            write_control(TYPE_STRING, s.len(), buffer);
            buffer.extend_from_slice(s.as_bytes());
        }
        DataValue::Double(d) => {
            write_control(TYPE_DOUBLE, 8, buffer);
            buffer.extend_from_slice(&d.to_be_bytes());
        }
        DataValue::Bytes(b) => {
            write_control(TYPE_BYTES, b.len(), buffer);
            buffer.extend_from_slice(b);
        }
        DataValue::Uint16(n) => write_uint(TYPE_UINT16, &n.to_be_bytes(), buffer),
        DataValue::Uint32(n) => write_uint(TYPE_UINT32, &n.to_be_bytes(), buffer),
        DataValue::Map(m) => {
            write_control(TYPE_MAP, m.len(), buffer);
            for (k, v) in m {
                write_control(TYPE_STRING, k.len(), buffer);
                buffer.extend_from_slice(k.as_bytes());
                encode_to_buffer(v, buffer);
            }
        }
        DataValue::Int32(n) => {
            if *n < 0 {
                write_control(TYPE_INT32, 4, buffer);
                buffer.extend_from_slice(&n.to_be_bytes());
            } else {
                write_uint(TYPE_INT32, &n.to_be_bytes(), buffer);
            }
        }
        DataValue::Uint64(n) => write_uint(TYPE_UINT64, &n.to_be_bytes(), buffer),
        DataValue::Uint128(n) => write_uint(TYPE_UINT128, &n.to_be_bytes(), buffer),
        DataValue::Array(a) => {
            write_control(TYPE_ARRAY, a.len(), buffer);
            for v in a {
                encode_to_buffer(v, buffer);
            }
        }
        DataValue::Bool(b) => write_control(TYPE_BOOL, *b as usize, buffer),
        DataValue::Float(f) => {
            write_control(TYPE_FLOAT, 4, buffer);
            buffer.extend_from_slice(&f.to_be_bytes());
        }
    }
}

/// Unsigned integers drop their leading zero bytes
fn write_uint(type_id: u8, be_bytes: &[u8], buffer: &mut Vec<u8>) {
    let skip = be_bytes.iter().take_while(|&&b| b == 0).count();
    let payload = &be_bytes[skip..];
    write_control(type_id, payload.len(), buffer);
    buffer.extend_from_slice(payload);
}

/// Write the control byte(s) for a type and payload size
fn write_control(type_id: u8, size: usize, buffer: &mut Vec<u8>) {
    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 29 + 256 {
        (29, vec![(size - 29) as u8])
    } else if size < 29 + 256 + 65536 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        (31, ((size - 65821) as u32).to_be_bytes()[1..].to_vec())
    };

    if type_id > 7 {
        buffer.push((TYPE_EXTENDED << 5) | size_bits);
        buffer.push(type_id - 7);
    } else {
        buffer.push((type_id << 5) | size_bits);
    }
    buffer.extend_from_slice(&extra);
}

/// Pointer sizes: 11, 19 (+2048), 27 (+526336) or 32 bits
fn encode_pointer(offset: u32, buffer: &mut Vec<u8>) {
    let ctrl = TYPE_POINTER << 5;
    if offset < 0x800 {
        buffer.push(ctrl | ((offset >> 8) & 0x7) as u8);
        buffer.push(offset as u8);
    } else if offset < 0x80800 {
        let adjusted = offset - 0x800;
        buffer.push(ctrl | (1 << 3) | ((adjusted >> 16) & 0x7) as u8);
        buffer.push((adjusted >> 8) as u8);
        buffer.push(adjusted as u8);
    } else if offset < 0x8080800 {
        let adjusted = offset - 0x80800;
        buffer.push(ctrl | (2 << 3) | ((adjusted >> 24) & 0x7) as u8);
        buffer.push((adjusted >> 16) as u8);
        buffer.push((adjusted >> 8) as u8);
        buffer.push(adjusted as u8);
    } else {
        buffer.push(ctrl | (3 << 3));
        buffer.extend_from_slice(&offset.to_be_bytes());
    }
}

/// Data section decoder
///
/// Decodes values from an encoded data section buffer. Pointers are
/// resolved against the start of the buffer.
pub struct DataDecoder<'a> {
    buffer: &'a [u8],
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder for a data section
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Decode a value at the given offset
    ///
    /// Shared pointer targets are decoded once per reference, so a value
    /// that expands past a fixed budget is rejected rather than
    /// materialized.
    pub fn decode(&self, offset: u32) -> Result<DataValue, &'static str> {
        let mut cursor = offset as usize;
        let mut budget = MAX_DECODE_VALUES;
        self.decode_at(&mut cursor, 0, &mut budget)
    }

    fn decode_at(
        &self,
        cursor: &mut usize,
        depth: usize,
        budget: &mut usize,
    ) -> Result<DataValue, &'static str> {
        if depth > MAX_DECODE_DEPTH {
            return Err("Data nested too deeply");
        }
        *budget = budget.checked_sub(1).ok_or("Data expands too far")?;

        let (type_id, size_bits) = self.read_control(cursor)?;

        if type_id == TYPE_POINTER {
            let target = self.read_pointer(cursor, size_bits)?;
            let mut target_cursor = target as usize;
            let (target_type, _) = self.peek_control(target_cursor)?;
            if target_type == TYPE_POINTER {
                return Err("Pointer to pointer");
            }
            return self.decode_at(&mut target_cursor, depth + 1, budget);
        }

        let size = self.read_size(cursor, size_bits)?;

        match type_id {
            TYPE_STRING => {
                let bytes = self.take(cursor, size)?;
                let s = std::str::from_utf8(bytes).map_err(|_| "Invalid UTF-8")?;
                Ok(DataValue::String(s.to_string()))
            }
            TYPE_DOUBLE => {
                if size != 8 {
                    return Err("Invalid double size");
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(self.take(cursor, 8)?);
                Ok(DataValue::Double(f64::from_be_bytes(bytes)))
            }
            TYPE_BYTES => Ok(DataValue::Bytes(self.take(cursor, size)?.to_vec())),
            TYPE_UINT16 => Ok(DataValue::Uint16(self.read_uint(cursor, size, 2)? as u16)),
            TYPE_UINT32 => Ok(DataValue::Uint32(self.read_uint(cursor, size, 4)? as u32)),
            TYPE_MAP => {
                let mut map = BTreeMap::new();
                for _ in 0..size {
                    let key = match self.decode_at(cursor, depth + 1, budget)? {
                        DataValue::String(s) => s,
                        _ => return Err("Map key must be string"),
                    };
                    let value = self.decode_at(cursor, depth + 1, budget)?;
                    map.insert(key, value);
                }
                Ok(DataValue::Map(map))
            }
            TYPE_INT32 => Ok(DataValue::Int32(self.read_uint(cursor, size, 4)? as u32 as i32)),
            TYPE_UINT64 => Ok(DataValue::Uint64(self.read_uint(cursor, size, 8)? as u64)),
            TYPE_UINT128 => Ok(DataValue::Uint128(self.read_uint(cursor, size, 16)?)),
            TYPE_ARRAY => {
                let mut array = Vec::with_capacity(size.min(1024));
                for _ in 0..size {
                    array.push(self.decode_at(cursor, depth + 1, budget)?);
                }
                Ok(DataValue::Array(array))
            }
            TYPE_BOOL => match size {
                0 => Ok(DataValue::Bool(false)),
                1 => Ok(DataValue::Bool(true)),
                _ => Err("Invalid bool size"),
            },
            TYPE_FLOAT => {
                if size != 4 {
                    return Err("Invalid float size");
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(self.take(cursor, 4)?);
                Ok(DataValue::Float(f32::from_be_bytes(bytes)))
            }
            _ => Err("Unknown data type"),
        }
    }

    fn peek_control(&self, cursor: usize) -> Result<(u8, u8), &'static str> {
        let mut probe = cursor;
        self.read_control(&mut probe)
    }

    /// Returns (type id, 5 size bits), resolving extended types
    fn read_control(&self, cursor: &mut usize) -> Result<(u8, u8), &'static str> {
        let ctrl = *self.buffer.get(*cursor).ok_or("Cursor out of bounds")?;
        *cursor += 1;

        let type_id = ctrl >> 5;
        let size_bits = ctrl & 0x1F;

        if type_id != TYPE_EXTENDED {
            return Ok((type_id, size_bits));
        }

        let ext = *self.buffer.get(*cursor).ok_or("Extended type truncated")?;
        *cursor += 1;
        let ext_type = ext as u16 + 7;
        if ext_type < 8 || ext_type > TYPE_FLOAT as u16 {
            return Err("Unknown extended type");
        }
        Ok((ext_type as u8, size_bits))
    }

    fn read_pointer(&self, cursor: &mut usize, size_bits: u8) -> Result<u32, &'static str> {
        let ptr_size = (size_bits >> 3) & 0x3;
        let high = (size_bits & 0x7) as u32;
        let offset = match ptr_size {
            0 => {
                let b = self.take(cursor, 1)?;
                (high << 8) | b[0] as u32
            }
            1 => {
                let b = self.take(cursor, 2)?;
                0x800 + ((high << 16) | (b[0] as u32) << 8 | b[1] as u32)
            }
            2 => {
                let b = self.take(cursor, 3)?;
                0x80800 + ((high << 24) | (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32)
            }
            _ => {
                let b = self.take(cursor, 4)?;
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
        };
        Ok(offset)
    }

    fn read_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize, &'static str> {
        match size_bits {
            0..=28 => Ok(size_bits as usize),
            29 => Ok(29 + self.take(cursor, 1)?[0] as usize),
            30 => {
                let b = self.take(cursor, 2)?;
                Ok(285 + u16::from_be_bytes([b[0], b[1]]) as usize)
            }
            _ => {
                let b = self.take(cursor, 3)?;
                Ok(65821 + ((b[0] as usize) << 16 | (b[1] as usize) << 8 | b[2] as usize))
            }
        }
    }

    fn read_uint(&self, cursor: &mut usize, size: usize, max: usize) -> Result<u128, &'static str> {
        if size > max {
            return Err("Integer wider than its type");
        }
        Ok(self
            .take(cursor, size)?
            .iter()
            .fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    fn take(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8], &'static str> {
        let end = cursor.checked_add(len).ok_or("Length overflow")?;
        let bytes = self.buffer.get(*cursor..end).ok_or("Data out of bounds")?;
        *cursor = end;
        Ok(bytes)
    }
}
