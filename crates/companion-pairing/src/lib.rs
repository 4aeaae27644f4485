//! # companion-pairing
//!
//! Companion pair-setup for Apple TV style devices.
//!
//! This crate implements:
//! - The PIN-based pair-setup procedure (PS_Start / PS_Next exchange)
//! - An SRP-6a engine producing long-term HAP credentials
//! - A session API for `begin` / `pin` / `finish` driven UIs

mod config;
mod procedure;
mod session;
mod srp_handler;
#[cfg(test)]
mod testing;
mod traits;

pub use companion_core::error::{Error, PairingError};
pub use companion_crypto::HapCredentials;
pub use config::{PairingConfig, CONNECT_TIMEOUT_ENV, READ_TIMEOUT_ENV};
pub use procedure::{PairingProcedure, PairingState};
pub use session::{PairingSession, PIN_LENGTH};
pub use srp_handler::SrpAuthHandler;
pub use traits::SrpEngine;
