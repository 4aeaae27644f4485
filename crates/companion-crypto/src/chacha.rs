//! ChaCha20-Poly1305 sealing for pair-setup encrypted data.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use companion_core::error::CryptoError;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Encrypt with explicit 12-byte nonce. Output has the 16-byte tag appended.
pub fn encrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::Encryption(format!("Invalid key: {}", e)))?;

    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))
}

/// Decrypt with explicit 12-byte nonce.
///
/// Expects ciphertext with 16-byte auth tag appended.
pub fn decrypt_with_nonce(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Decryption(
            "Ciphertext too short (missing tag)".to_string(),
        ));
    }

    let cipher = ChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| CryptoError::Decryption(format!("Invalid key: {}", e)))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption("Decryption/authentication failed".to_string()))
}

/// Create a 12-byte nonce from a label, right-aligned and left-padded with zeros.
///
/// "PS-Msg05" becomes `\x00\x00\x00\x00PS-Msg05`.
pub fn nonce_from_string(s: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let len = s.len().min(12);
    nonce[12 - len..].copy_from_slice(&s[..len]);
    nonce
}
