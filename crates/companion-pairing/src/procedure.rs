//! Companion pair-setup procedure.
//!
//! Pair-setup runs in two halves separated by user input:
//!
//! ```text
//! start():   PS_Start {Method=0, State=1} ──>  <── {Salt, PublicKey}
//!                      (user reads the PIN off the device screen)
//! finish():  PS_Next  {State=3, A, M1}      ──>  <── {Proof M2}
//!            PS_Next  {State=5, Encrypted}  ──>  <── {Encrypted device identity}
//! ```
//!
//! Every response must arrive as a complete frame before the next request is
//! sent. Bytes that arrive past the end of a frame are kept for the next
//! receive.

use companion_core::error::{DecodeError, Error, ProtocolError, Result};
use companion_core::log_binary;
use companion_crypto::{HapCredentials, Tlv8, TlvType};
use companion_protocol::frame::{PASSWORD_TYPE_KEY, PASSWORD_TYPE_PIN};
use companion_protocol::{decode_frame, frame_length, CompanionTransport, Frame, FrameType};
use tracing::{debug, info, warn, Instrument, Span};

use crate::traits::SrpEngine;

/// Progress through pair-setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingState {
    NotStarted,
    Connected,
    SaltAndPubKeyReceived,
    ProofExchanged,
    EncryptedDataReceived,
    Finished,
    Failed,
}

impl PairingState {
    /// Finished and Failed admit no further steps.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// Drives one pair-setup attempt over a transport.
pub struct PairingProcedure<T, E> {
    transport: T,
    engine: E,
    state: PairingState,
    /// Received bytes not yet consumed by a frame.
    pending: Vec<u8>,
    salt: Option<Vec<u8>>,
    public_key: Option<Vec<u8>>,
    server_proof: Option<Vec<u8>>,
    span: Span,
}

impl<T: CompanionTransport, E: SrpEngine> PairingProcedure<T, E> {
    pub fn new(transport: T, engine: E) -> Self {
        Self::with_span(transport, engine, tracing::debug_span!("pair_setup"))
    }

    /// Create a procedure that logs under the given span.
    pub fn with_span(transport: T, engine: E, span: Span) -> Self {
        Self {
            transport,
            engine,
            state: PairingState::NotStarted,
            pending: Vec::new(),
            salt: None,
            public_key: None,
            server_proof: None,
            span,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Salt from the device, once received.
    pub fn server_salt(&self) -> Option<&[u8]> {
        self.salt.as_deref()
    }

    /// SRP public key B from the device, once received.
    pub fn server_public_key(&self) -> Option<&[u8]> {
        self.public_key.as_deref()
    }

    /// SRP proof M2 from the device, once received.
    pub fn server_proof(&self) -> Option<&[u8]> {
        self.server_proof.as_deref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Close the transport.
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Connect and request the device's salt and public key.
    ///
    /// The device shows a PIN once this succeeds.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != PairingState::NotStarted {
            return Err(Error::Precondition(format!(
                "pairing already started (state {:?})",
                self.state
            )));
        }

        let span = self.span.clone();
        let result = self.run_start().instrument(span).await;
        self.settle(result)
    }

    /// Complete pairing with the PIN shown on the device.
    pub async fn finish(&mut self, pin: &str) -> Result<HapCredentials> {
        if self.state != PairingState::SaltAndPubKeyReceived {
            return Err(Error::Precondition(format!(
                "finish requires a started pairing (state {:?})",
                self.state
            )));
        }

        let span = self.span.clone();
        let result = self.run_finish(pin).instrument(span).await;
        self.settle(result)
    }

    async fn run_start(&mut self) -> Result<()> {
        self.engine.initialize()?;
        self.transport.connect().await?;
        self.state = PairingState::Connected;

        debug!("Requesting salt and public key");
        let request = Frame::new(FrameType::PsStart)
            .with_pairing_data(
                Tlv8::new()
                    .with(TlvType::Method, vec![0x00])
                    .with(TlvType::State, vec![0x01]),
            )
            .with_field(PASSWORD_TYPE_KEY, PASSWORD_TYPE_PIN);
        let response = self.exchange(request, "PS_Start").await?;

        let salt = response.require(TlvType::Salt)?.to_vec();
        let public_key = response.require(TlvType::PublicKey)?.to_vec();
        log_binary(
            "Device challenge",
            &[("Salt", &salt), ("PublicKey", &public_key)],
        );

        self.salt = Some(salt);
        self.public_key = Some(public_key);
        self.state = PairingState::SaltAndPubKeyReceived;
        Ok(())
    }

    async fn run_finish(&mut self, pin: &str) -> Result<HapCredentials> {
        let (salt, public_key) = match (&self.salt, &self.public_key) {
            (Some(salt), Some(public_key)) => (salt.clone(), public_key.clone()),
            _ => {
                return Err(Error::Precondition(
                    "device challenge not received".to_string(),
                ))
            }
        };

        self.engine.step1(pin)?;
        let (client_public_key, client_proof) = self.engine.step2(&public_key, &salt)?;

        debug!("Sending client proof");
        let request = Frame::new(FrameType::PsNext)
            .with_pairing_data(
                Tlv8::new()
                    .with(TlvType::State, vec![0x03])
                    .with(TlvType::PublicKey, client_public_key)
                    .with(TlvType::Proof, client_proof),
            )
            .with_field(PASSWORD_TYPE_KEY, PASSWORD_TYPE_PIN);
        let response = self.exchange(request, "proof").await?;

        let server_proof = response.require(TlvType::Proof)?.to_vec();
        log_binary("Device proof", &[("Proof", &server_proof)]);
        self.server_proof = Some(server_proof.clone());
        self.engine.verify_server_proof(&server_proof)?;
        self.state = PairingState::ProofExchanged;

        debug!("Sending encrypted controller identity");
        let encrypted = self.engine.step3()?;
        let request = Frame::new(FrameType::PsNext).with_pairing_data(
            Tlv8::new()
                .with(TlvType::State, vec![0x05])
                .with(TlvType::EncryptedData, encrypted),
        );
        let response = self.exchange(request, "encrypted data").await?;

        let device_data = response.require(TlvType::EncryptedData)?.to_vec();
        self.state = PairingState::EncryptedDataReceived;

        let credentials = self.engine.step4(&device_data)?;
        self.state = PairingState::Finished;
        info!("Pair-setup finished");
        Ok(credentials)
    }

    /// Send one request and return the pairing data of the response.
    async fn exchange(&mut self, request: Frame, step: &'static str) -> Result<Tlv8> {
        self.transport.send(&request.encode()?)?;
        let response = self.receive().await?;

        if !response.frame_type.is_pair_setup() {
            return Err(ProtocolError::UnexpectedFrame(format!(
                "{:?} in reply to {}",
                response.frame_type, step
            ))
            .into());
        }

        let tlv = response
            .pairing_data
            .ok_or(ProtocolError::MissingPairingData(step))?;
        if let Some(description) = tlv.error_description() {
            return Err(ProtocolError::DeviceError(description).into());
        }
        Ok(tlv)
    }

    /// Read until one whole frame is buffered, then decode it.
    async fn receive(&mut self) -> Result<Frame> {
        loop {
            if let Some(&tag) = self.pending.first() {
                if FrameType::from_byte(tag).is_none() {
                    return Err(DecodeError::UnknownFrameType(tag).into());
                }
            }
            if let Some(total) = frame_length(&self.pending) {
                if self.pending.len() >= total {
                    let (frame, rest) = decode_frame(&self.pending)?;
                    let consumed = self.pending.len() - rest.len();
                    self.pending.drain(..consumed);
                    return Ok(frame);
                }
            }

            let chunk = self.transport.read().await?;
            self.pending.extend_from_slice(&chunk);
        }
    }

    fn settle<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            warn!(parent: &self.span, error = %e, state = ?self.state, "Pair-setup failed");
            self.state = PairingState::Failed;
        }
        result
    }
}
