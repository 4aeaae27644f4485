//! # companion-protocol
//!
//! Wire layer of the Companion protocol.
//!
//! This crate provides:
//! - OPACK value encoding with object back-references
//! - Frame encoding/decoding (type byte, 24-bit length, OPACK body)
//! - An async TCP transport with a buffered inbound queue

mod connection;
pub mod frame;
pub mod opack;
mod traits;

pub use connection::{TcpTransport, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
pub use frame::{decode_frame, encode_frame, frame_length, Frame, FrameType};
pub use opack::Value;
pub use traits::CompanionTransport;
