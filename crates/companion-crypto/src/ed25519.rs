//! Ed25519 long-term identity used to register the controller.

use companion_core::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::ZeroizeOnDrop;

/// Long-term Ed25519 identity key pair (LTPK/LTSK).
#[derive(Clone, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32], // Ed25519 seed (32 bytes, not expanded)
}

impl IdentityKeyPair {
    /// Generate a new random identity key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_seed(&signing_key.to_bytes())
    }

    /// Create from seed bytes (32 bytes).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self {
            public: signing_key.verifying_key().to_bytes(),
            secret: *seed,
        }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Sign a message, returning 64-byte signature.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        SigningKey::from_bytes(&self.secret).sign(message).to_bytes()
    }

    /// Export the seed (32 bytes).
    pub fn seed(&self) -> [u8; 32] {
        self.secret
    }

    /// Pairing identifier in UUID layout, derived from the public key.
    pub fn pairing_id(&self) -> String {
        let pk = &self.public;
        format!(
            "{}-{}-{}-{}-{}",
            hex::encode_upper(&pk[0..4]),
            hex::encode_upper(&pk[4..6]),
            hex::encode_upper(&pk[6..8]),
            hex::encode_upper(&pk[8..10]),
            hex::encode_upper(&pk[10..16]),
        )
    }
}

/// Verify an Ed25519 signature given raw key and signature bytes.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let public_key: [u8; 32] =
        public_key
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength {
                expected: 32,
                actual: public_key.len(),
            })?;
    let signature: [u8; 64] = signature
        .try_into()
        .map_err(|_| CryptoError::SignatureInvalid)?;

    let verifying_key = VerifyingKey::from_bytes(&public_key)
        .map_err(|e| CryptoError::Encryption(format!("Invalid public key: {}", e)))?;

    verifying_key
        .verify(message, &Signature::from_bytes(&signature))
        .map_err(|_| CryptoError::SignatureInvalid)
}
