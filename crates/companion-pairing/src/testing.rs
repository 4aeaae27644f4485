//! Test doubles shared by the procedure and session tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use companion_core::error::{Error, Result};
use companion_crypto::{Tlv8, TlvType};
use companion_protocol::{
    frame::{PASSWORD_TYPE_KEY, PASSWORD_TYPE_PIN},
    CompanionTransport, Frame, FrameType,
};

/// Transport that replays canned reads and records everything sent.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    reads: VecDeque<Result<Vec<u8>>>,
    pub sent: Vec<Vec<u8>>,
    pub connects: usize,
    pub closes: usize,
    connected: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for a later `read`.
    pub fn then_read(mut self, bytes: Vec<u8>) -> Self {
        self.reads.push_back(Ok(bytes));
        self
    }

    pub fn then_fail(mut self, error: Error) -> Self {
        self.reads.push_back(Err(error));
        self
    }

    /// Decode the `index`th frame that was sent.
    pub fn sent_frame(&self, index: usize) -> Frame {
        companion_protocol::decode_frame(&self.sent[index]).unwrap().0
    }
}

#[async_trait]
impl CompanionTransport for ScriptedTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connects += 1;
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.sent.push(data.to_vec());
        Ok(())
    }

    async fn read(&mut self) -> Result<Vec<u8>> {
        // Running dry behaves like a silent device.
        self.reads.pop_front().unwrap_or(Err(Error::Timeout))
    }

    fn close(&mut self) {
        self.closes += 1;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Encoded device response carrying `tlv`.
pub(crate) fn device_frame(tlv: Tlv8) -> Vec<u8> {
    Frame::new(FrameType::PsNext)
        .with_pairing_data(tlv)
        .encode()
        .unwrap()
}

/// Device answer to PS_Start.
pub(crate) fn salt_response() -> Vec<u8> {
    device_frame(
        Tlv8::new()
            .with(TlvType::State, vec![0x02])
            .with(TlvType::Salt, vec![0u8; 16])
            .with(TlvType::PublicKey, vec![0x01; 384]),
    )
}

pub(crate) fn proof_response(proof: Vec<u8>) -> Vec<u8> {
    device_frame(
        Tlv8::new()
            .with(TlvType::State, vec![0x04])
            .with(TlvType::Proof, proof),
    )
}

pub(crate) fn encrypted_response(data: Vec<u8>) -> Vec<u8> {
    device_frame(
        Tlv8::new()
            .with(TlvType::State, vec![0x06])
            .with(TlvType::EncryptedData, data),
    )
}

/// Whether a sent frame announced PIN authentication.
pub(crate) fn announces_pin(frame: &Frame) -> bool {
    frame
        .field(PASSWORD_TYPE_KEY)
        .and_then(|v| v.as_int())
        == Some(PASSWORD_TYPE_PIN)
}
