//! Error types for the Companion pairing client.

use thiserror::Error;

/// Primary error type for all Companion operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Operation timed out")]
    Timeout,

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Precondition violated: {0}")]
    Precondition(String),
}

/// Malformed bytes on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("Truncated input: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Declared body length {declared} but object spans {consumed} bytes")]
    LengthMismatch { declared: usize, consumed: usize },

    #[error("Invalid frame payload: {0}")]
    InvalidPayload(String),

    #[error("OPACK: {0}")]
    Opack(String),

    #[error("TLV8: {0}")]
    Tlv(String),
}

/// Well-formed messages that violate the pairing exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Missing required TLV type: 0x{0:02x}")]
    MissingTlv(u8),

    #[error("Missing pairing data in {0} response")]
    MissingPairingData(&'static str),

    #[error("Device returned {0}")]
    DeviceError(String),

    #[error("Unexpected frame type: {0}")]
    UnexpectedFrame(String),

    #[error("Frame body too large: {0} bytes (max 16777215)")]
    FrameTooLarge(usize),
}

/// Cryptographic operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid server public key: {0}")]
    InvalidServerPublicKey(String),

    #[error("SRP verification failed")]
    SrpVerificationFailed,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Invalid engine state: {0}")]
    InvalidState(String),
}

/// Uniform error surfaced by the public pairing API.
///
/// Wraps whichever internal error aborted the attempt; the display output is
/// the underlying message unchanged.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct PairingError {
    source: Error,
}

impl PairingError {
    /// The internal error that caused the failure.
    pub fn kind(&self) -> &Error {
        &self.source
    }

    /// Unwrap into the internal error.
    pub fn into_inner(self) -> Error {
        self.source
    }

    /// Shorthand for a precondition failure.
    pub fn precondition(message: impl Into<String>) -> Self {
        Error::Precondition(message.into()).into()
    }
}

impl From<Error> for PairingError {
    fn from(source: Error) -> Self {
        Self { source }
    }
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
