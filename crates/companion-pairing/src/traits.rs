//! Traits for the pair-setup crypto engine.

use companion_core::error::CryptoError;
use companion_crypto::HapCredentials;

/// Four-step SRP state machine driven by the pairing procedure.
///
/// The procedure calls the steps strictly in order:
/// `initialize`, `step1`, `step2`, `verify_server_proof`, `step3`, `step4`.
#[cfg_attr(test, mockall::automock)]
pub trait SrpEngine: Send {
    /// Prepare a fresh controller identity.
    fn initialize(&mut self) -> Result<(), CryptoError>;

    /// Begin SRP with the user-supplied PIN.
    fn step1(&mut self, pin: &str) -> Result<(), CryptoError>;

    /// Process the device's public key and salt.
    ///
    /// Returns the client public key and the client proof.
    fn step2(
        &mut self,
        server_public_key: &[u8],
        salt: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError>;

    /// Check the device's proof of the shared secret.
    fn verify_server_proof(&mut self, proof: &[u8]) -> Result<(), CryptoError>;

    /// Produce the encrypted controller identity.
    fn step3(&mut self) -> Result<Vec<u8>, CryptoError>;

    /// Open the device's encrypted identity and produce credentials.
    fn step4(&mut self, encrypted: &[u8]) -> Result<HapCredentials, CryptoError>;
}
