//! # companion-core
//!
//! Error definitions and logging helpers shared across all Companion crates.
//!
//! This crate provides:
//! - The internal error taxonomy (connection, timeout, decode, protocol, crypto)
//! - The uniform `PairingError` surfaced by the public pairing API
//! - Hex-dump style logging for binary payloads

pub mod error;
pub mod logging;

pub use error::{CryptoError, DecodeError, Error, PairingError, ProtocolError, Result};
pub use logging::log_binary;
