//! # companion-crypto
//!
//! Cryptographic building blocks for Companion pair-setup.
//!
//! This crate provides:
//! - TLV8 encoding for the nested pairing payload
//! - SRP-6a (3072-bit, SHA-512) client math
//! - HKDF-SHA512 derivation for the M5/M6 exchange
//! - ChaCha20-Poly1305 sealing of encrypted data
//! - Ed25519 long-term identity
//!
//! All secret material is zeroized on drop.

pub mod chacha;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use ed25519::IdentityKeyPair;
pub use keys::HapCredentials;
pub use srp::{SrpClient, SrpGroup, SrpProof};
pub use tlv::{Tlv8, TlvType};
