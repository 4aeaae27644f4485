//! Companion frame encoding and decoding.
//!
//! Wire layout:
//!
//! ```text
//! +------+----------------------+--------------------+
//! | type | body length (24 bit) | OPACK body         |
//! | 1 B  | big-endian           | `length` bytes     |
//! +------+----------------------+--------------------+
//! ```
//!
//! The body is an OPACK dictionary with string keys. During pair-setup the
//! `_pd` entry carries TLV8 bytes and `_pwTy` announces PIN authentication.

use std::collections::BTreeMap;

use companion_core::error::{DecodeError, ProtocolError};
use companion_crypto::Tlv8;

use crate::opack::{self, Value};

/// Type byte plus 24-bit length.
pub const HEADER_SIZE: usize = 4;

/// Largest body the 24-bit length field can describe.
pub const MAX_BODY_SIZE: usize = 0xFF_FFFF;

/// Payload key holding TLV8 pairing data.
pub const PAIRING_DATA_KEY: &str = "_pd";

/// Payload key announcing the password type.
pub const PASSWORD_TYPE_KEY: &str = "_pwTy";

/// `_pwTy` value for PIN authentication.
pub const PASSWORD_TYPE_PIN: i64 = 1;

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Unknown = 0,
    NoOp = 1,
    /// Pair-setup start.
    PsStart = 3,
    /// Pair-setup continuation.
    PsNext = 4,
    /// Pair-verify start.
    PvStart = 5,
    /// Pair-verify continuation.
    PvNext = 6,
    /// Unencrypted OPACK message.
    UOpack = 7,
    /// Encrypted OPACK message.
    EOpack = 8,
    /// Packed OPACK message.
    POpack = 9,
    PaReq = 10,
    PaRsp = 11,
    SessionStartRequest = 16,
    SessionStartResponse = 17,
    SessionData = 18,
    FamilyIdentityRequest = 32,
    FamilyIdentityResponse = 33,
    FamilyIdentityUpdate = 34,
}

impl FrameType {
    /// Parse frame type from a byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Unknown),
            1 => Some(Self::NoOp),
            3 => Some(Self::PsStart),
            4 => Some(Self::PsNext),
            5 => Some(Self::PvStart),
            6 => Some(Self::PvNext),
            7 => Some(Self::UOpack),
            8 => Some(Self::EOpack),
            9 => Some(Self::POpack),
            10 => Some(Self::PaReq),
            11 => Some(Self::PaRsp),
            16 => Some(Self::SessionStartRequest),
            17 => Some(Self::SessionStartResponse),
            18 => Some(Self::SessionData),
            32 => Some(Self::FamilyIdentityRequest),
            33 => Some(Self::FamilyIdentityResponse),
            34 => Some(Self::FamilyIdentityUpdate),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether this frame belongs to the pair-setup exchange.
    pub fn is_pair_setup(self) -> bool {
        matches!(self, Self::PsStart | Self::PsNext)
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_type: FrameType,
    /// Body entries other than `_pd`.
    pub payload: BTreeMap<String, Value>,
    /// Parsed `_pd` entry, if the body had one.
    pub pairing_data: Option<Tlv8>,
}

impl Frame {
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            payload: BTreeMap::new(),
            pairing_data: None,
        }
    }

    pub fn with_pairing_data(mut self, tlv: Tlv8) -> Self {
        self.pairing_data = Some(tlv);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Body as an OPACK dictionary, `_pd` first.
    pub fn body(&self) -> Value {
        let mut pairs = Vec::with_capacity(self.payload.len() + 1);
        if let Some(tlv) = &self.pairing_data {
            pairs.push((Value::from(PAIRING_DATA_KEY), Value::Data(tlv.encode())));
        }
        for (key, value) in &self.payload {
            pairs.push((Value::String(key.clone()), value.clone()));
        }
        Value::Dict(pairs)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        encode_frame(self.frame_type, &self.body())
    }
}

/// Serialize a frame with the given body.
pub fn encode_frame(frame_type: FrameType, body: &Value) -> Result<Vec<u8>, ProtocolError> {
    let packed = opack::pack(body);
    if packed.len() > MAX_BODY_SIZE {
        return Err(ProtocolError::FrameTooLarge(packed.len()));
    }

    let len = (packed.len() as u32).to_be_bytes();
    let mut out = Vec::with_capacity(HEADER_SIZE + packed.len());
    out.push(frame_type.as_byte());
    out.extend_from_slice(&len[1..]);
    out.extend_from_slice(&packed);
    Ok(out)
}

/// Total size of the frame at the start of `buffer`, once the header is in.
pub fn frame_length(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < HEADER_SIZE {
        return None;
    }
    Some(HEADER_SIZE + body_length(buffer))
}

fn body_length(buffer: &[u8]) -> usize {
    u32::from_be_bytes([0, buffer[1], buffer[2], buffer[3]]) as usize
}

/// Decode the frame at the start of `buffer`, returning it and the bytes
/// after it.
pub fn decode_frame(buffer: &[u8]) -> Result<(Frame, &[u8]), DecodeError> {
    if buffer.len() < HEADER_SIZE {
        return Err(DecodeError::Truncated {
            needed: HEADER_SIZE,
            available: buffer.len(),
        });
    }

    let frame_type =
        FrameType::from_byte(buffer[0]).ok_or(DecodeError::UnknownFrameType(buffer[0]))?;
    let declared = body_length(buffer);
    let total = HEADER_SIZE + declared;
    if buffer.len() < total {
        return Err(DecodeError::Truncated {
            needed: total,
            available: buffer.len(),
        });
    }

    let (body, consumed) = opack::unpack(&buffer[HEADER_SIZE..total])?;
    if consumed != declared {
        return Err(DecodeError::LengthMismatch { declared, consumed });
    }

    let pairs = match body {
        Value::Dict(pairs) => pairs,
        other => {
            return Err(DecodeError::InvalidPayload(format!(
                "body is not a dictionary: {:?}",
                other
            )))
        }
    };

    let mut frame = Frame::new(frame_type);
    for (key, value) in pairs {
        let key = match key {
            Value::String(key) => key,
            other => {
                return Err(DecodeError::InvalidPayload(format!(
                    "non-string key: {:?}",
                    other
                )))
            }
        };

        if key == PAIRING_DATA_KEY {
            let bytes = value.as_bytes().ok_or_else(|| {
                DecodeError::InvalidPayload(format!("{} is not data", PAIRING_DATA_KEY))
            })?;
            frame.pairing_data = Some(Tlv8::parse(bytes)?);
        } else {
            frame.payload.insert(key, value);
        }
    }

    Ok((frame, &buffer[total..]))
}
