//! SRP engine backed by companion-crypto.

use companion_core::error::CryptoError;
use companion_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    ed25519, hkdf,
    srp::{N_BYTES, SALT_BYTES},
    HapCredentials, IdentityKeyPair, SrpClient, SrpProof, Tlv8, TlvType,
};
use tracing::debug;

use crate::traits::SrpEngine;

/// SRP username for pair-setup.
const SRP_IDENTITY: &[u8] = b"Pair-Setup";

/// Nonce for the controller's encrypted identity.
const PS_MSG05_NONCE: &[u8] = b"PS-Msg05";
/// Nonce for the device's encrypted identity.
const PS_MSG06_NONCE: &[u8] = b"PS-Msg06";

/// Controller identity registered with the device.
struct Controller {
    keys: IdentityKeyPair,
    pairing_id: String,
}

/// Production [`SrpEngine`].
#[derive(Default)]
pub struct SrpAuthHandler {
    controller: Option<Controller>,
    client: Option<SrpClient>,
    proof: Option<SrpProof>,
    server_verified: bool,
}

impl SrpAuthHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairing identifier sent to the device, once initialized.
    pub fn pairing_id(&self) -> Option<&str> {
        self.controller.as_ref().map(|c| c.pairing_id.as_str())
    }

    fn controller(&self) -> Result<&Controller, CryptoError> {
        self.controller
            .as_ref()
            .ok_or_else(|| out_of_order("initialize has not been called"))
    }

    fn verified_proof(&self) -> Result<&SrpProof, CryptoError> {
        let proof = self
            .proof
            .as_ref()
            .ok_or_else(|| out_of_order("step2 has not completed"))?;
        if !self.server_verified {
            return Err(out_of_order("server proof has not been verified"));
        }
        Ok(proof)
    }
}

impl SrpEngine for SrpAuthHandler {
    fn initialize(&mut self) -> Result<(), CryptoError> {
        let keys = IdentityKeyPair::generate();
        let pairing_id = keys.pairing_id();
        debug!(pairing_id = %pairing_id, "Generated controller identity");
        self.controller = Some(Controller { keys, pairing_id });
        self.client = None;
        self.proof = None;
        self.server_verified = false;
        Ok(())
    }

    fn step1(&mut self, pin: &str) -> Result<(), CryptoError> {
        self.controller()?;
        self.client = Some(SrpClient::new(SRP_IDENTITY, pin.as_bytes())?);
        self.proof = None;
        self.server_verified = false;
        Ok(())
    }

    fn step2(
        &mut self,
        server_public_key: &[u8],
        salt: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| out_of_order("step1 has not been called"))?;

        let salt: [u8; SALT_BYTES] =
            salt.try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: SALT_BYTES,
                    actual: salt.len(),
                })?;

        // Devices may strip leading zero bytes from B.
        if server_public_key.len() > N_BYTES {
            return Err(CryptoError::InvalidServerPublicKey(format!(
                "{} bytes (expected <= {})",
                server_public_key.len(),
                N_BYTES
            )));
        }
        let mut padded = vec![0u8; N_BYTES - server_public_key.len()];
        padded.extend_from_slice(server_public_key);

        let proof = client.process_challenge(&salt, &padded)?;
        let result = (client.public_key(), proof.client_proof.clone());
        self.proof = Some(proof);
        Ok(result)
    }

    fn verify_server_proof(&mut self, proof: &[u8]) -> Result<(), CryptoError> {
        let expected = self
            .proof
            .as_ref()
            .ok_or_else(|| out_of_order("step2 has not completed"))?;
        if !expected.verify_server_proof(proof) {
            return Err(CryptoError::SrpVerificationFailed);
        }
        self.server_verified = true;
        Ok(())
    }

    fn step3(&mut self) -> Result<Vec<u8>, CryptoError> {
        let controller = self.controller()?;
        let proof = self.verified_proof()?;

        let sign_key = hkdf::derive_controller_sign_key(&proof.shared_secret)?;
        let ltpk = controller.keys.public_key();
        let pairing_id = controller.pairing_id.as_bytes();

        let mut message = Vec::with_capacity(sign_key.len() + pairing_id.len() + ltpk.len());
        message.extend_from_slice(&sign_key);
        message.extend_from_slice(pairing_id);
        message.extend_from_slice(&ltpk);
        let signature = controller.keys.sign(&message);

        let inner = Tlv8::new()
            .with(TlvType::Identifier, pairing_id)
            .with(TlvType::PublicKey, ltpk.to_vec())
            .with(TlvType::Signature, signature.to_vec())
            .encode();

        let session_key = hkdf::derive_pair_setup_key(&proof.shared_secret)?;
        encrypt_with_nonce(&session_key, &nonce_from_string(PS_MSG05_NONCE), &inner)
    }

    fn step4(&mut self, encrypted: &[u8]) -> Result<HapCredentials, CryptoError> {
        let controller = self.controller()?;
        let proof = self.verified_proof()?;

        let session_key = hkdf::derive_pair_setup_key(&proof.shared_secret)?;
        let decrypted =
            decrypt_with_nonce(&session_key, &nonce_from_string(PS_MSG06_NONCE), encrypted)?;
        let inner = Tlv8::parse(&decrypted)
            .map_err(|e| CryptoError::Decryption(format!("device identity: {}", e)))?;

        let device_id = require(&inner, TlvType::Identifier)?;
        let device_ltpk = require(&inner, TlvType::PublicKey)?;
        let signature = require(&inner, TlvType::Signature)?;

        let sign_key = hkdf::derive_accessory_sign_key(&proof.shared_secret)?;
        let mut message = Vec::with_capacity(sign_key.len() + device_id.len() + device_ltpk.len());
        message.extend_from_slice(&sign_key);
        message.extend_from_slice(device_id);
        message.extend_from_slice(device_ltpk);
        ed25519::verify(device_ltpk, &message, signature)?;

        debug!(device_id = %String::from_utf8_lossy(device_id), "Device identity verified");

        Ok(HapCredentials::new(
            device_ltpk,
            controller.keys.seed().to_vec(),
            device_id,
            controller.pairing_id.as_bytes(),
        ))
    }
}

fn require(tlv: &Tlv8, typ: TlvType) -> Result<&[u8], CryptoError> {
    tlv.get(typ)
        .ok_or_else(|| CryptoError::Decryption(format!("device identity missing {:?}", typ)))
}

fn out_of_order(message: &str) -> CryptoError {
    CryptoError::InvalidState(message.to_string())
}
