//! TLV8 encoding/decoding for the `_pd` pairing payload.
//!
//! TLV8 format: [Type: 1 byte][Length: 1 byte][Value: 0-255 bytes]
//! Values longer than 255 bytes are fragmented across multiple TLVs.

use companion_core::error::{DecodeError, ProtocolError};
use std::collections::HashMap;

/// TLV type constants shared with device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    Method = 0x00,
    Identifier = 0x01,
    Salt = 0x02,
    PublicKey = 0x03,
    Proof = 0x04,
    EncryptedData = 0x05,
    /// Sequence number of the pairing message (M1..M6).
    State = 0x06,
    Error = 0x07,
    /// Back-off delay requested by the device.
    RetryDelay = 0x08,
    Signature = 0x0A,
}

/// Parsed TLV8 message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tlv8 {
    items: HashMap<u8, Vec<u8>>,
}

impl Tlv8 {
    /// Create empty TLV8 message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TLV8 from bytes.
    ///
    /// Handles fragmented values (values > 255 bytes split across multiple TLVs).
    /// Consecutive TLVs with the same type are concatenated.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let mut items: HashMap<u8, Vec<u8>> = HashMap::new();
        let mut i = 0;
        let mut last_type: Option<u8> = None;

        while i < data.len() {
            if i + 2 > data.len() {
                return Err(DecodeError::Tlv("truncated header".to_string()));
            }

            let typ = data[i];
            let len = data[i + 1] as usize;
            i += 2;

            if i + len > data.len() {
                return Err(DecodeError::Tlv(format!(
                    "truncated value (expected {} bytes, got {})",
                    len,
                    data.len() - i
                )));
            }

            let value = &data[i..i + len];
            i += len;

            if Some(typ) == last_type {
                if let Some(existing) = items.get_mut(&typ) {
                    existing.extend_from_slice(value);
                }
            } else {
                items
                    .entry(typ)
                    .or_insert_with(Vec::new)
                    .extend_from_slice(value);
            }

            last_type = Some(typ);
        }

        Ok(Self { items })
    }

    /// Encode to bytes, ordered by type.
    pub fn encode(&self) -> Vec<u8> {
        let mut result = Vec::new();

        let mut types: Vec<_> = self.items.keys().collect();
        types.sort();

        for typ in types {
            let value = &self.items[typ];

            if value.is_empty() {
                result.push(*typ);
                result.push(0);
            } else {
                for chunk in value.chunks(255) {
                    result.push(*typ);
                    result.push(chunk.len() as u8);
                    result.extend_from_slice(chunk);
                }
            }
        }

        result
    }

    /// Get value for type.
    pub fn get(&self, typ: TlvType) -> Option<&[u8]> {
        self.items.get(&(typ as u8)).map(|v| v.as_slice())
    }

    /// Get value for type, failing when absent.
    pub fn require(&self, typ: TlvType) -> Result<&[u8], ProtocolError> {
        self.get(typ).ok_or(ProtocolError::MissingTlv(typ as u8))
    }

    /// Get value for raw type.
    pub fn get_raw(&self, typ: u8) -> Option<&[u8]> {
        self.items.get(&typ).map(|v| v.as_slice())
    }

    /// Set value for type.
    pub fn set(&mut self, typ: TlvType, value: impl Into<Vec<u8>>) {
        self.items.insert(typ as u8, value.into());
    }

    /// Builder-style `set`.
    pub fn with(mut self, typ: TlvType, value: impl Into<Vec<u8>>) -> Self {
        self.set(typ, value);
        self
    }

    /// Check if type is present.
    pub fn contains(&self, typ: TlvType) -> bool {
        self.items.contains_key(&(typ as u8))
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get state (sequence number) value.
    pub fn state(&self) -> Option<u8> {
        self.get(TlvType::State).and_then(|v| v.first().copied())
    }

    /// Get error value (single byte).
    pub fn error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }

    /// Get retry delay value in seconds.
    /// The value is little-endian encoded (1-2 bytes).
    pub fn retry_delay(&self) -> Option<u16> {
        self.get(TlvType::RetryDelay).map(|v| match v.len() {
            0 => 0,
            1 => v[0] as u16,
            _ => u16::from_le_bytes([v[0], v[1]]),
        })
    }

    /// Get error description string.
    pub fn error_description(&self) -> Option<String> {
        let error_code = self.error()?;
        let error_name = match error_code {
            0x01 => "Unknown",
            0x02 => "Authentication",
            0x03 => "Backoff (rate limited)",
            0x04 => "MaxPeers",
            0x05 => "MaxTries",
            0x06 => "Unavailable",
            0x07 => "Busy",
            _ => "Unknown error code",
        };

        let mut desc = format!("Error 0x{:02x}: {}", error_code, error_name);

        if let Some(delay) = self.retry_delay() {
            if delay > 0 {
                desc.push_str(&format!(" (retry after {} seconds)", delay));
            }
        }

        Some(desc)
    }
}

impl TlvType {
    /// Convert from raw byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Self::Method),
            0x01 => Some(Self::Identifier),
            0x02 => Some(Self::Salt),
            0x03 => Some(Self::PublicKey),
            0x04 => Some(Self::Proof),
            0x05 => Some(Self::EncryptedData),
            0x06 => Some(Self::State),
            0x07 => Some(Self::Error),
            0x08 => Some(Self::RetryDelay),
            0x0A => Some(Self::Signature),
            _ => None,
        }
    }
}
