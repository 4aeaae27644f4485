//! OPACK object encoding.
//!
//! OPACK is the compact binary serialization Companion devices use for frame
//! bodies. Every value starts with a one-byte tag:
//!
//! ```text
//! 0x01/0x02        true / false
//! 0x04             null
//! 0x05             UUID (16 bytes follow)
//! 0x08..=0x2F      integer 0..=39 inline
//! 0x30..=0x33      integer, 1/2/4/8 bytes little-endian
//! 0x35 / 0x36      f32 / f64 little-endian
//! 0x40..=0x60      string, length 0..=32 inline
//! 0x61..=0x64      string, 1/2/3/4-byte length
//! 0x70..=0x90      data, length 0..=32 inline
//! 0x91..=0x94      data, 1/2/4/8-byte length
//! 0xA0..=0xC0      back-reference to object 0..=32
//! 0xC1..=0xC4      back-reference, 1/2/3/4-byte index
//! 0xD0..=0xDF      array (0xDF: open-ended, closed by 0x03)
//! 0xE0..=0xEF      dictionary (0xEF: open-ended, closed by 0x03)
//! ```
//!
//! Encoder and decoder keep the same object table: a value is appended once
//! its encoding is complete, if that encoding is longer than one byte and an
//! equal value is not already present. Repeated values are then written as a
//! reference into the table.

use companion_core::error::DecodeError;

const TAG_TRUE: u8 = 0x01;
const TAG_FALSE: u8 = 0x02;
const TAG_TERMINATOR: u8 = 0x03;
const TAG_NULL: u8 = 0x04;
const TAG_UUID: u8 = 0x05;
const TAG_INT_BASE: u8 = 0x08;
const TAG_FLOAT32: u8 = 0x35;
const TAG_FLOAT64: u8 = 0x36;
const TAG_STRING_BASE: u8 = 0x40;
const TAG_DATA_BASE: u8 = 0x70;
const TAG_REF_BASE: u8 = 0xA0;
const TAG_ARRAY_BASE: u8 = 0xD0;
const TAG_DICT_BASE: u8 = 0xE0;

/// Largest integer stored directly in the tag byte.
const MAX_INLINE_INT: i64 = 0x27;
/// Largest string or data length stored directly in the tag byte.
const MAX_INLINE_LEN: usize = 0x20;
/// Largest table index stored directly in the tag byte.
const MAX_INLINE_REF: usize = 0x20;
/// Containers with this many items or more are terminator-delimited.
const OPEN_ENDED_COUNT: usize = 0x0F;
/// Deepest container nesting accepted when unpacking.
const MAX_DEPTH: usize = 64;

/// A decoded OPACK value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Data(Vec<u8>),
    Uuid([u8; 16]),
    Array(Vec<Value>),
    /// Key/value pairs in wire order.
    Dict(Vec<(Value, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Data(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Look up a string key in a dictionary value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dict(pairs) => pairs
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Data(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Data(v.to_vec())
    }
}

/// Serialize a value.
pub fn pack(value: &Value) -> Vec<u8> {
    let mut packer = Packer::default();
    packer.pack(value);
    packer.out
}

/// Deserialize one value from the start of `data`.
///
/// Returns the value and the number of bytes it occupied; trailing bytes
/// are left for the caller.
pub fn unpack(data: &[u8]) -> Result<(Value, usize), DecodeError> {
    let mut unpacker = Unpacker {
        data,
        pos: 0,
        depth: 0,
        objects: Vec::new(),
    };
    let value = unpacker.unpack()?;
    Ok((value, unpacker.pos))
}

#[derive(Default)]
struct Packer {
    out: Vec<u8>,
    objects: Vec<Value>,
}

impl Packer {
    fn pack(&mut self, value: &Value) {
        let known = self.objects.iter().position(|o| o == value);
        if let Some(index) = known {
            if self.write_reference(index) {
                return;
            }
        }

        let start = self.out.len();
        match value {
            Value::Null => self.out.push(TAG_NULL),
            Value::Bool(true) => self.out.push(TAG_TRUE),
            Value::Bool(false) => self.out.push(TAG_FALSE),
            Value::Uuid(bytes) => {
                self.out.push(TAG_UUID);
                self.out.extend_from_slice(bytes);
            }
            Value::Int(i) => self.write_int(*i),
            Value::Float(f) => {
                self.out.push(TAG_FLOAT64);
                self.out.extend_from_slice(&f.to_le_bytes());
            }
            Value::String(s) => self.write_string(s),
            Value::Data(d) => self.write_data(d),
            Value::Array(items) => {
                self.write_container_tag(TAG_ARRAY_BASE, items.len());
                for item in items {
                    self.pack(item);
                }
                if items.len() >= OPEN_ENDED_COUNT {
                    self.out.push(TAG_TERMINATOR);
                }
            }
            Value::Dict(pairs) => {
                self.write_container_tag(TAG_DICT_BASE, pairs.len());
                for (key, item) in pairs {
                    self.pack(key);
                    self.pack(item);
                }
                if pairs.len() >= OPEN_ENDED_COUNT {
                    self.out.push(TAG_TERMINATOR);
                }
            }
        }

        if known.is_none() && self.out.len() - start > 1 {
            self.objects.push(value.clone());
        }
    }

    /// Emit a table reference. Returns false when the index has no encoding.
    fn write_reference(&mut self, index: usize) -> bool {
        if index <= MAX_INLINE_REF {
            self.out.push(TAG_REF_BASE + index as u8);
        } else if index <= 0xFF {
            self.out.push(0xC1);
            self.out.push(index as u8);
        } else if index <= 0xFFFF {
            self.out.push(0xC2);
            self.out.extend_from_slice(&(index as u16).to_le_bytes());
        } else if index <= 0xFF_FFFF {
            self.out.push(0xC3);
            self.out.extend_from_slice(&(index as u32).to_le_bytes()[..3]);
        } else if let Ok(index) = u32::try_from(index) {
            self.out.push(0xC4);
            self.out.extend_from_slice(&index.to_le_bytes());
        } else {
            return false;
        }
        true
    }

    fn write_int(&mut self, i: i64) {
        if (0..=MAX_INLINE_INT).contains(&i) {
            self.out.push(TAG_INT_BASE + i as u8);
        } else if (0..=0xFF).contains(&i) {
            self.out.push(0x30);
            self.out.push(i as u8);
        } else if (0..=0xFFFF).contains(&i) {
            self.out.push(0x31);
            self.out.extend_from_slice(&(i as u16).to_le_bytes());
        } else if (0..=0xFFFF_FFFF).contains(&i) {
            self.out.push(0x32);
            self.out.extend_from_slice(&(i as u32).to_le_bytes());
        } else {
            self.out.push(0x33);
            self.out.extend_from_slice(&i.to_le_bytes());
        }
    }

    fn write_string(&mut self, s: &str) {
        let len = s.len();
        if len <= MAX_INLINE_LEN {
            self.out.push(TAG_STRING_BASE + len as u8);
        } else if len <= 0xFF {
            self.out.push(0x61);
            self.out.push(len as u8);
        } else if len <= 0xFFFF {
            self.out.push(0x62);
            self.out.extend_from_slice(&(len as u16).to_le_bytes());
        } else if len <= 0xFF_FFFF {
            self.out.push(0x63);
            self.out.extend_from_slice(&(len as u32).to_le_bytes()[..3]);
        } else {
            self.out.push(0x64);
            self.out.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.out.extend_from_slice(s.as_bytes());
    }

    fn write_data(&mut self, d: &[u8]) {
        let len = d.len();
        if len <= MAX_INLINE_LEN {
            self.out.push(TAG_DATA_BASE + len as u8);
        } else if len <= 0xFF {
            self.out.push(0x91);
            self.out.push(len as u8);
        } else if len <= 0xFFFF {
            self.out.push(0x92);
            self.out.extend_from_slice(&(len as u16).to_le_bytes());
        } else if len <= 0xFFFF_FFFF {
            self.out.push(0x93);
            self.out.extend_from_slice(&(len as u32).to_le_bytes());
        } else {
            self.out.push(0x94);
            self.out.extend_from_slice(&(len as u64).to_le_bytes());
        }
        self.out.extend_from_slice(d);
    }

    fn write_container_tag(&mut self, base: u8, count: usize) {
        self.out.push(base + count.min(OPEN_ENDED_COUNT) as u8);
    }
}

struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
    /// Containers currently open.
    depth: usize,
    objects: Vec<Value>,
}

impl<'a> Unpacker<'a> {
    fn unpack(&mut self) -> Result<Value, DecodeError> {
        let start = self.pos;
        let tag = self.take_u8()?;

        let value = match tag {
            TAG_TRUE => Value::Bool(true),
            TAG_FALSE => Value::Bool(false),
            TAG_NULL => Value::Null,
            TAG_UUID => Value::Uuid(self.take_array::<16>()?),
            0x08..=0x2F => Value::Int(i64::from(tag - TAG_INT_BASE)),
            0x30 => Value::Int(self.take_uint(1)? as i64),
            0x31 => Value::Int(self.take_uint(2)? as i64),
            0x32 => Value::Int(self.take_uint(4)? as i64),
            0x33 => Value::Int(i64::from_le_bytes(self.take_array::<8>()?)),
            TAG_FLOAT32 => Value::Float(f64::from(f32::from_le_bytes(self.take_array::<4>()?))),
            TAG_FLOAT64 => Value::Float(f64::from_le_bytes(self.take_array::<8>()?)),
            0x40..=0x60 => self.take_string(usize::from(tag - TAG_STRING_BASE))?,
            0x61..=0x64 => {
                let len = self.take_len(usize::from(tag - 0x60))?;
                self.take_string(len)?
            }
            0x70..=0x90 => Value::Data(self.take(usize::from(tag - TAG_DATA_BASE))?.to_vec()),
            0x91..=0x94 => {
                let width = match tag {
                    0x91 => 1,
                    0x92 => 2,
                    0x93 => 4,
                    _ => 8,
                };
                let len = self.take_len(width)?;
                Value::Data(self.take(len)?.to_vec())
            }
            0xA0..=0xC0 => return self.reference(usize::from(tag - TAG_REF_BASE)),
            0xC1..=0xC4 => {
                let index = self.take_len(usize::from(tag - 0xC0))?;
                return self.reference(index);
            }
            0xD0..=0xDF => {
                let mut items = Vec::new();
                self.take_items(tag & 0x0F, |u| {
                    items.push(u.unpack()?);
                    Ok(())
                })?;
                Value::Array(items)
            }
            0xE0..=0xEF => {
                let mut pairs = Vec::new();
                self.take_items(tag & 0x0F, |u| {
                    let key = u.unpack()?;
                    let item = u.unpack()?;
                    pairs.push((key, item));
                    Ok(())
                })?;
                Value::Dict(pairs)
            }
            other => {
                return Err(DecodeError::Opack(format!(
                    "unsupported tag 0x{:02x} at offset {}",
                    other, start
                )))
            }
        };

        if self.pos - start > 1 && !self.objects.contains(&value) {
            self.objects.push(value.clone());
        }
        Ok(value)
    }

    /// Run `item` for each container element. A nibble of 0xF means the
    /// element count is open and a terminator ends the container.
    fn take_items(
        &mut self,
        nibble: u8,
        item: impl FnMut(&mut Self) -> Result<(), DecodeError>,
    ) -> Result<(), DecodeError> {
        if self.depth >= MAX_DEPTH {
            return Err(DecodeError::Opack(format!(
                "containers nested deeper than {} at offset {}",
                MAX_DEPTH,
                self.pos - 1
            )));
        }
        self.depth += 1;
        let result = self.take_elements(nibble, item);
        self.depth -= 1;
        result
    }

    fn take_elements(
        &mut self,
        nibble: u8,
        mut item: impl FnMut(&mut Self) -> Result<(), DecodeError>,
    ) -> Result<(), DecodeError> {
        if usize::from(nibble) < OPEN_ENDED_COUNT {
            for _ in 0..nibble {
                item(self)?;
            }
            return Ok(());
        }
        loop {
            match self.data.get(self.pos) {
                Some(&TAG_TERMINATOR) => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(_) => item(self)?,
                None => {
                    return Err(DecodeError::Opack(
                        "container missing terminator".to_string(),
                    ))
                }
            }
        }
    }

    fn reference(&self, index: usize) -> Result<Value, DecodeError> {
        self.objects.get(index).cloned().ok_or_else(|| {
            DecodeError::Opack(format!(
                "reference {} outside object table of {}",
                index,
                self.objects.len()
            ))
        })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let available = self.data.len() - self.pos;
        if len > available {
            return Err(DecodeError::Truncated {
                needed: len,
                available,
            });
        }
        let data = self.data;
        let slice = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Little-endian unsigned integer of `width` bytes.
    fn take_uint(&mut self, width: usize) -> Result<u64, DecodeError> {
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(self.take(width)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn take_len(&mut self, width: usize) -> Result<usize, DecodeError> {
        let len = self.take_uint(width)?;
        usize::try_from(len).map_err(|_| DecodeError::Opack(format!("length {} overflows", len)))
    }

    fn take_string(&mut self, len: usize) -> Result<Value, DecodeError> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|e| DecodeError::Opack(format!("invalid UTF-8 in string: {}", e)))?;
        Ok(Value::String(s.to_string()))
    }
}
