//! HKDF-SHA512 key derivation for pair-setup.

use companion_core::error::CryptoError;

use hkdf::Hkdf;
use sha2::Sha512;

/// Derive a 32-byte key using HKDF-SHA512.
pub fn derive_key_32(ikm: &[u8], salt: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha512>::new(Some(salt), ikm);
    let mut okm = [0u8; 32];
    hk.expand(info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation("HKDF expand failed".to_string()))?;
    Ok(okm)
}

/// Well-known salt and info strings for pair-setup.
pub mod constants {
    pub const PAIR_SETUP_ENCRYPT_SALT: &[u8] = b"Pair-Setup-Encrypt-Salt";
    pub const PAIR_SETUP_ENCRYPT_INFO: &[u8] = b"Pair-Setup-Encrypt-Info";

    pub const CONTROLLER_SIGN_SALT: &[u8] = b"Pair-Setup-Controller-Sign-Salt";
    pub const CONTROLLER_SIGN_INFO: &[u8] = b"Pair-Setup-Controller-Sign-Info";

    pub const ACCESSORY_SIGN_SALT: &[u8] = b"Pair-Setup-Accessory-Sign-Salt";
    pub const ACCESSORY_SIGN_INFO: &[u8] = b"Pair-Setup-Accessory-Sign-Info";
}

/// Key protecting the M5/M6 encrypted data.
pub fn derive_pair_setup_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::PAIR_SETUP_ENCRYPT_SALT,
        constants::PAIR_SETUP_ENCRYPT_INFO,
    )
}

/// Material the controller signs along with its identity.
pub fn derive_controller_sign_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::CONTROLLER_SIGN_SALT,
        constants::CONTROLLER_SIGN_INFO,
    )
}

/// Material the device signs along with its identity.
pub fn derive_accessory_sign_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    derive_key_32(
        shared_secret,
        constants::ACCESSORY_SIGN_SALT,
        constants::ACCESSORY_SIGN_INFO,
    )
}
