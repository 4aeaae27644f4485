//! SRP-6a client for Companion pair-setup.
//!
//! Uses 3072-bit prime (RFC 5054), generator g=5, SHA-512.

use companion_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// Salt size used by Companion devices.
pub const SALT_BYTES: usize = 16;

/// RFC 5054 3072-bit prime N as hex string.
const RFC5054_N_3072: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E08",
    "8A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B",
    "302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9",
    "A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE6",
    "49286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8",
    "FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C",
    "180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D",
    "04507A33A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7D",
    "B3970F85A6E1E4C7ABF5AE8CDB0933D71E8C94E04A25619DCEE3D226",
    "1AD2EE6BF12FFA06D98A0864D87602733EC86A64521F2B18177B200C",
    "BBE117577A615D6C770988C0BAD946E208E24FA074E5AB3143DB5BFC",
    "E0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF"
);

/// SRP-6a group parameters.
#[derive(Debug, Clone)]
pub struct SrpGroup {
    /// Safe prime modulus.
    pub n: BigUint,
    /// Generator.
    pub g: BigUint,
}

impl SrpGroup {
    /// The 3072-bit group from RFC 5054 with g=5.
    pub fn rfc5054_3072() -> Result<Self, CryptoError> {
        let n = BigUint::parse_bytes(RFC5054_N_3072.as_bytes(), 16).ok_or_else(|| {
            CryptoError::KeyDerivation("Invalid RFC 5054 prime constant".to_string())
        })?;
        Ok(Self {
            n,
            g: BigUint::from(5u32),
        })
    }
}

/// Client-side SRP state.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    group: SrpGroup,
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Output of processing the device challenge.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpProof {
    /// M1, sent to the device.
    pub client_proof: Vec<u8>,
    /// K = H(S), the session secret.
    pub shared_secret: Vec<u8>,
    /// M2 the device must answer with.
    pub expected_server_proof: Vec<u8>,
}

impl SrpProof {
    /// Constant-time check of the device's M2.
    pub fn verify_server_proof(&self, proof: &[u8]) -> bool {
        proof.ct_eq(self.expected_server_proof.as_slice()).into()
    }
}

impl SrpClient {
    /// Create new SRP client with identity and password.
    ///
    /// For pair-setup the identity is "Pair-Setup" and the password is the PIN.
    pub fn new(identity: &[u8], password: &[u8]) -> Result<Self, CryptoError> {
        let a = OsRng.gen_biguint(256);
        Self::with_private_key(identity, password, &a.to_bytes_be())
    }

    /// Create SRP client with a specific private key.
    pub fn with_private_key(
        identity: &[u8],
        password: &[u8],
        private_key: &[u8],
    ) -> Result<Self, CryptoError> {
        let group = SrpGroup::rfc5054_3072()?;
        let a = BigUint::from_bytes_be(private_key);
        // A = g^a mod N
        let public_key = group.g.modpow(&a, &group.n);

        Ok(Self {
            group,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: private_key.to_vec(),
            public_key,
        })
    }

    /// Client public key A, padded to 384 bytes.
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Process the device's salt and public key B, producing M1, K and expected M2.
    pub fn process_challenge(
        &self,
        salt: &[u8; SALT_BYTES],
        server_public_key: &[u8],
    ) -> Result<SrpProof, CryptoError> {
        let n = &self.group.n;
        let g = &self.group.g;
        let b = BigUint::from_bytes_be(server_public_key);

        if &b % n == BigUint::ZERO {
            return Err(CryptoError::InvalidServerPublicKey(
                "B mod N = 0".to_string(),
            ));
        }

        let a = BigUint::from_bytes_be(&self.private_key);

        // u = H(PAD(A) || PAD(B))
        let u = BigUint::from_bytes_be(&sha512(&[&pad_to_n(&self.public_key), &pad_to_n(&b)]));
        if u == BigUint::ZERO {
            return Err(CryptoError::InvalidServerPublicKey("u = 0".to_string()));
        }

        // x = H(salt || H(identity || ":" || password))
        let inner = sha512(&[&self.identity, b":", &self.password]);
        let x = BigUint::from_bytes_be(&sha512(&[salt, &inner]));

        // k = H(N || PAD(g))
        let k = BigUint::from_bytes_be(&sha512(&[&pad_to_n(n), &pad_to_n(g)]));

        // S = (B - k * g^x)^(a + u*x) mod N
        let k_gx = (&k * g.modpow(&x, n)) % n;
        let base = if b >= k_gx {
            (&b - &k_gx) % n
        } else {
            (&b + n - &k_gx) % n
        };
        let exponent = (&a + &u * &x) % (n - BigUint::from(1u32));
        let s = base.modpow(&exponent, n);

        let shared_secret = sha512(&[&pad_to_n(&s)]);
        let client_proof = self.compute_m1(salt, &b, &shared_secret);
        // M2 = H(PAD(A) || M1 || K)
        let expected_server_proof =
            sha512(&[&pad_to_n(&self.public_key), &client_proof, &shared_secret]);

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }

    /// M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K)
    fn compute_m1(&self, salt: &[u8], b: &BigUint, k: &[u8]) -> Vec<u8> {
        let h_n = sha512(&[&pad_to_n(&self.group.n)]);
        // H(g) is over the raw generator byte, not PAD(g)
        let h_g = sha512(&[&self.group.g.to_bytes_be()]);
        let xor: Vec<u8> = h_n.iter().zip(h_g.iter()).map(|(n, g)| n ^ g).collect();
        let h_i = sha512(&[&self.identity]);

        sha512(&[
            &xor,
            &h_i,
            salt,
            &pad_to_n(&self.public_key),
            &pad_to_n(b),
            k,
        ])
    }
}

fn sha512(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Pad BigUint to N_BYTES with leading zeros.
pub fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}
