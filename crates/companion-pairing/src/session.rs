//! User-facing pairing session.
//!
//! A session wraps one [`PairingProcedure`] behind the call order a pairing
//! UI follows: `begin()` makes the device display a PIN, `pin()` records what
//! the user typed, `finish()` completes the exchange.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> Result<(), companion_pairing::PairingError> {
//! use companion_pairing::{PairingConfig, PairingSession};
//!
//! let mut session = PairingSession::new(&PairingConfig::new("192.168.1.20", 49153));
//! session.begin().await?;
//! session.pin(1234)?;
//! session.finish().await?;
//! println!("{}", session.credentials().unwrap_or_default());
//! session.close();
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;

use companion_core::error::{Error, PairingError};
use companion_protocol::{CompanionTransport, TcpTransport};
use tracing::{debug, info};

use crate::config::PairingConfig;
use crate::procedure::{PairingProcedure, PairingState};
use crate::srp_handler::SrpAuthHandler;
use crate::traits::SrpEngine;

/// Number of digits in a Companion PIN.
pub const PIN_LENGTH: usize = 4;

/// High-level pairing session.
pub struct PairingSession<T = TcpTransport, E = SrpAuthHandler> {
    procedure: PairingProcedure<T, E>,
    pin: Option<String>,
    credentials: Option<String>,
    has_paired: bool,
}

impl PairingSession<TcpTransport, SrpAuthHandler> {
    /// Session over TCP to the configured device. Nothing is opened until
    /// [`begin`](Self::begin).
    pub fn new(config: &PairingConfig) -> Self {
        let span = tracing::info_span!("pairing", host = %config.host(), port = config.port());
        let procedure =
            PairingProcedure::with_span(config.transport(), SrpAuthHandler::new(), span);
        Self::from_procedure(procedure)
    }
}

impl<T: CompanionTransport, E: SrpEngine> PairingSession<T, E> {
    /// Session over any transport and engine.
    pub fn with_parts(transport: T, engine: E) -> Self {
        Self::from_procedure(PairingProcedure::new(transport, engine))
    }

    fn from_procedure(procedure: PairingProcedure<T, E>) -> Self {
        Self {
            procedure,
            pin: None,
            credentials: None,
            has_paired: false,
        }
    }

    /// Start pairing; the device displays a PIN on success.
    pub async fn begin(&mut self) -> Result<(), PairingError> {
        self.procedure.start().await?;
        info!("Device is displaying a PIN");
        Ok(())
    }

    /// Record the PIN. Shorter values are zero-padded to four digits.
    pub fn pin(&mut self, pin: impl Display) -> Result<(), PairingError> {
        self.pin = Some(normalize_pin(pin)?);
        debug!("PIN recorded");
        Ok(())
    }

    /// Complete pairing with the recorded PIN.
    pub async fn finish(&mut self) -> Result<(), PairingError> {
        let pin = self
            .pin
            .as_deref()
            .ok_or_else(|| PairingError::precondition("no pin given"))?;

        let credentials = self.procedure.finish(pin).await?;
        self.credentials = Some(credentials.to_string());
        self.has_paired = true;
        info!("Pairing complete");
        Ok(())
    }

    /// Whether a pairing has completed on this session.
    pub fn has_paired(&self) -> bool {
        self.has_paired
    }

    /// Credential string from the last successful pairing.
    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    /// The PIN is always shown on the device and entered here.
    pub fn device_provides_pin(&self) -> bool {
        true
    }

    pub fn state(&self) -> PairingState {
        self.procedure.state()
    }

    /// Underlying procedure, for diagnostics after a failure.
    pub fn procedure(&self) -> &PairingProcedure<T, E> {
        &self.procedure
    }

    /// Release the connection.
    pub fn close(&mut self) {
        self.procedure.close();
    }
}

fn normalize_pin(pin: impl Display) -> Result<String, Error> {
    let raw = pin.to_string();
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Precondition(format!(
            "PIN must be digits only, got {:?}",
            raw
        )));
    }
    if raw.len() > PIN_LENGTH {
        return Err(Error::Precondition(format!(
            "PIN must be at most {} digits, got {}",
            PIN_LENGTH,
            raw.len()
        )));
    }
    Ok(format!("{:0>width$}", raw, width = PIN_LENGTH))
}
