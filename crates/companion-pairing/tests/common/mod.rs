//! Simulated Companion device for pairing integration tests.
//!
//! The device listens on a local port, accepts a single connection and
//! answers pair-setup frames according to its [`Behaviour`].

#![allow(dead_code)]

use std::time::Duration;

use companion_crypto::{
    chacha::{decrypt_with_nonce, encrypt_with_nonce, nonce_from_string},
    ed25519, hkdf,
    srp::{pad_to_n, SrpGroup},
    IdentityKeyPair, Tlv8, TlvType,
};
use companion_protocol::{decode_frame, frame_length, Frame, FrameType};
use num_bigint::{BigUint, RandBigInt};
use rand::rngs::OsRng;
use sha2::{Digest, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Identifier the honest device reports for itself.
pub const DEVICE_ID: &[u8] = b"AA:BB:CC:DD:EE:FF";

pub enum Behaviour {
    /// Real SRP server that knows the PIN.
    Honest { pin: &'static str },
    /// Reply to each request with the next canned frame, then stay silent.
    Scripted(Vec<Vec<u8>>),
    /// Valid challenge, then a proof that matches nothing.
    BogusProof,
    /// Accept the connection and never answer.
    Silent,
    /// Send the challenge, then drop the connection on the next request.
    HangUpAfterChallenge,
}

/// What the device saw during the session.
#[derive(Default)]
pub struct DeviceLog {
    pub frames: Vec<Frame>,
    /// Controller pairing identifier from a decrypted identity frame.
    pub controller_id: Option<Vec<u8>>,
    /// Device long-term public key, when the honest device got that far.
    pub device_ltpk: Option<Vec<u8>>,
}

pub struct SimulatedDevice {
    pub port: u16,
    handle: JoinHandle<DeviceLog>,
}

impl SimulatedDevice {
    pub async fn spawn(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            serve(stream, behaviour).await
        });
        Self { port, handle }
    }

    /// Wait for the device to finish its session.
    pub async fn log(self) -> DeviceLog {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("device did not finish")
            .unwrap()
    }
}

/// Encoded device reply carrying `tlv`.
pub fn reply(tlv: Tlv8) -> Vec<u8> {
    Frame::new(FrameType::PsNext)
        .with_pairing_data(tlv)
        .encode()
        .unwrap()
}

/// Challenge with an all-zero salt and a fixed public key.
pub fn fixed_challenge() -> Vec<u8> {
    reply(
        Tlv8::new()
            .with(TlvType::State, vec![0x02])
            .with(TlvType::Salt, vec![0u8; 16])
            .with(TlvType::PublicKey, vec![0x01; 384]),
    )
}

async fn serve(mut stream: TcpStream, behaviour: Behaviour) -> DeviceLog {
    let mut log = DeviceLog::default();
    let mut pending = Vec::new();
    let mut buf = vec![0u8; 4096];

    let mut honest = match &behaviour {
        Behaviour::Honest { pin } => Some(SrpServer::new(pin)),
        _ => None,
    };
    let mut script = match behaviour {
        Behaviour::Scripted(ref frames) => frames.clone(),
        _ => Vec::new(),
    };
    script.reverse();

    loop {
        let frame = loop {
            if let Some(total) = frame_length(&pending) {
                if pending.len() >= total {
                    let (frame, _) = decode_frame(&pending).unwrap();
                    pending.drain(..total);
                    break frame;
                }
            }
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => return log,
                Ok(n) => pending.extend_from_slice(&buf[..n]),
            }
        };

        let request = frame.pairing_data.clone().unwrap_or_default();
        let seq = request.state();
        log.frames.push(frame);

        let response = match &behaviour {
            Behaviour::Silent => None,
            Behaviour::Scripted(_) => script.pop(),
            Behaviour::BogusProof => match seq {
                Some(1) => Some(fixed_challenge()),
                _ => Some(reply(
                    Tlv8::new()
                        .with(TlvType::State, vec![0x04])
                        .with(TlvType::Proof, vec![0x5A; 64]),
                )),
            },
            Behaviour::HangUpAfterChallenge => match seq {
                Some(1) => Some(fixed_challenge()),
                _ => return log,
            },
            Behaviour::Honest { .. } => honest
                .as_mut()
                .map(|server| server.respond(&request, &mut log)),
        };

        if let Some(bytes) = response {
            stream.write_all(&bytes).await.unwrap();
        }
    }
}

/// Device side of SRP-6a plus the identity exchange.
struct SrpServer {
    group: SrpGroup,
    salt: [u8; 16],
    verifier: BigUint,
    private_key: BigUint,
    public_key: BigUint,
    identity: IdentityKeyPair,
    shared_secret: Option<Vec<u8>>,
}

impl SrpServer {
    fn new(pin: &str) -> Self {
        let group = SrpGroup::rfc5054_3072().unwrap();
        let mut salt = [0u8; 16];
        rand::RngCore::fill_bytes(&mut OsRng, &mut salt);

        // v = g^x, x = H(salt || H(I ":" P))
        let inner = sha512(&[b"Pair-Setup", b":", pin.as_bytes()]);
        let x = BigUint::from_bytes_be(&sha512(&[&salt, &inner]));
        let verifier = group.g.modpow(&x, &group.n);

        // B = k*v + g^b
        let b = OsRng.gen_biguint(256);
        let k = BigUint::from_bytes_be(&sha512(&[&pad_to_n(&group.n), &pad_to_n(&group.g)]));
        let public_key = ((&k * &verifier) + group.g.modpow(&b, &group.n)) % &group.n;

        Self {
            group,
            salt,
            verifier,
            private_key: b,
            public_key,
            identity: IdentityKeyPair::generate(),
            shared_secret: None,
        }
    }

    fn respond(&mut self, request: &Tlv8, log: &mut DeviceLog) -> Vec<u8> {
        match request.state() {
            Some(1) => reply(
                Tlv8::new()
                    .with(TlvType::State, vec![0x02])
                    .with(TlvType::Salt, self.salt.to_vec())
                    .with(TlvType::PublicKey, pad_to_n(&self.public_key)),
            ),
            Some(3) => self.check_proof(request),
            Some(5) => self.exchange_identity(request, log),
            _ => error_reply(0x04, 0x01),
        }
    }

    fn check_proof(&mut self, request: &Tlv8) -> Vec<u8> {
        let client_public = request.get(TlvType::PublicKey).unwrap();
        let client_proof = request.get(TlvType::Proof).unwrap();
        let n = &self.group.n;

        let a = BigUint::from_bytes_be(client_public);
        let a_padded = pad_to_n(&a);
        let b_padded = pad_to_n(&self.public_key);
        let u = BigUint::from_bytes_be(&sha512(&[&a_padded, &b_padded]));

        // S = (A * v^u)^b
        let base = (&a * self.verifier.modpow(&u, n)) % n;
        let s = base.modpow(&self.private_key, n);
        let key = sha512(&[&pad_to_n(&s)]);

        let h_n = sha512(&[&pad_to_n(n)]);
        let h_g = sha512(&[&self.group.g.to_bytes_be()]);
        let xor: Vec<u8> = h_n.iter().zip(&h_g).map(|(x, y)| x ^ y).collect();
        let m1 = sha512(&[
            &xor,
            &sha512(&[b"Pair-Setup"]),
            &self.salt,
            &a_padded,
            &b_padded,
            &key,
        ]);

        if m1 != client_proof {
            return error_reply(0x04, 0x02);
        }

        let m2 = sha512(&[&a_padded, &m1, &key]);
        self.shared_secret = Some(key);
        reply(
            Tlv8::new()
                .with(TlvType::State, vec![0x04])
                .with(TlvType::Proof, m2),
        )
    }

    fn exchange_identity(&self, request: &Tlv8, log: &mut DeviceLog) -> Vec<u8> {
        let Some(secret) = self.shared_secret.as_ref() else {
            return error_reply(0x06, 0x02);
        };
        let session_key = hkdf::derive_pair_setup_key(secret).unwrap();

        let sealed = request.get(TlvType::EncryptedData).unwrap();
        let opened =
            decrypt_with_nonce(&session_key, &nonce_from_string(b"PS-Msg05"), sealed).unwrap();
        let controller = Tlv8::parse(&opened).unwrap();
        let controller_id = controller.get(TlvType::Identifier).unwrap();
        let controller_ltpk = controller.get(TlvType::PublicKey).unwrap();
        let controller_sig = controller.get(TlvType::Signature).unwrap();

        let mut signed = hkdf::derive_controller_sign_key(secret).unwrap().to_vec();
        signed.extend_from_slice(controller_id);
        signed.extend_from_slice(controller_ltpk);
        if ed25519::verify(controller_ltpk, &signed, controller_sig).is_err() {
            return error_reply(0x06, 0x02);
        }
        log.controller_id = Some(controller_id.to_vec());

        let ltpk = self.identity.public_key();
        let mut message = hkdf::derive_accessory_sign_key(secret).unwrap().to_vec();
        message.extend_from_slice(DEVICE_ID);
        message.extend_from_slice(&ltpk);
        let inner = Tlv8::new()
            .with(TlvType::Identifier, DEVICE_ID)
            .with(TlvType::PublicKey, ltpk.to_vec())
            .with(TlvType::Signature, self.identity.sign(&message).to_vec())
            .encode();
        log.device_ltpk = Some(ltpk.to_vec());

        let sealed =
            encrypt_with_nonce(&session_key, &nonce_from_string(b"PS-Msg06"), &inner).unwrap();
        reply(
            Tlv8::new()
                .with(TlvType::State, vec![0x06])
                .with(TlvType::EncryptedData, sealed),
        )
    }
}

fn error_reply(state: u8, code: u8) -> Vec<u8> {
    reply(
        Tlv8::new()
            .with(TlvType::State, vec![state])
            .with(TlvType::Error, vec![code]),
    )
}

fn sha512(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}
