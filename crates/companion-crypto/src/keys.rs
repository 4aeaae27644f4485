//! Long-term credentials produced by pair-setup.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Keys and identifiers established by a successful pairing.
///
/// The string form is the four fields hex-encoded and joined by `:`,
/// in the order `ltpk:ltsk:atv_id:client_id`.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct HapCredentials {
    /// Device long-term public key.
    #[zeroize(skip)]
    pub ltpk: Vec<u8>,
    /// Controller long-term secret key (Ed25519 seed).
    pub ltsk: Vec<u8>,
    /// Device pairing identifier.
    #[zeroize(skip)]
    pub atv_id: Vec<u8>,
    /// Controller pairing identifier.
    #[zeroize(skip)]
    pub client_id: Vec<u8>,
}

impl HapCredentials {
    pub fn new(
        ltpk: impl Into<Vec<u8>>,
        ltsk: impl Into<Vec<u8>>,
        atv_id: impl Into<Vec<u8>>,
        client_id: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            ltpk: ltpk.into(),
            ltsk: ltsk.into(),
            atv_id: atv_id.into(),
            client_id: client_id.into(),
        }
    }
}

impl fmt::Display for HapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            hex::encode(&self.ltpk),
            hex::encode(&self.ltsk),
            hex::encode(&self.atv_id),
            hex::encode(&self.client_id)
        )
    }
}

// Keep the secret half out of debug output.
impl fmt::Debug for HapCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HapCredentials")
            .field("ltpk", &hex::encode(&self.ltpk))
            .field("ltsk", &"<redacted>")
            .field("atv_id", &String::from_utf8_lossy(&self.atv_id))
            .field("client_id", &String::from_utf8_lossy(&self.client_id))
            .finish()
    }
}
