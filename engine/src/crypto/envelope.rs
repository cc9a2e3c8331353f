//! Envelope key wrapping: the two independent crypto layers of the engine.
//!
//! Layer (a): AEAD symmetric encryption (AES-256-GCM) of entry payloads and
//! private-key halves under a 256-bit key. Blobs are `nonce || ciphertext`
//! with a fresh random nonce per encryption.
//!
//! Layer (b): asymmetric sealing of key shares under an actor-factor's X25519
//! public key: an ephemeral Diffie-Hellman exchange whose shared secret is
//! run through the BLAKE3 KDF to key the same AEAD. Blobs are
//! `ephemeral_public || nonce || ciphertext`.
//!
//! All failures on the unwrap side collapse to `InvalidKey` so callers can
//! surface a single generic failure.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Domain separator for deriving AEAD keys from X25519 shared secrets.
const ENVELOPE_KDF_CONTEXT: &str = "vault-engine 2026 x25519 envelope key";

/// A 256-bit symmetric key (data key, group access key, or system key).
/// Zeroized on drop, never serialized.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; KEY_LEN]>);

impl SymmetricKey {
    /// Fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| VaultError::Validation(format!("key must be {KEY_LEN} bytes")))?;
        Ok(Self(Zeroizing::new(arr)))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// An X25519 key pair. The private half is zeroized on drop; persisting it
/// always goes through `aead_encrypt` first.
pub struct AsymmetricKeyPair {
    pub public: [u8; 32],
    pub private: Zeroizing<[u8; 32]>,
}

/// Generate a fresh X25519 key pair.
pub fn generate_keypair() -> AsymmetricKeyPair {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    AsymmetricKeyPair {
        public: *public.as_bytes(),
        private: Zeroizing::new(secret.to_bytes()),
    }
}

fn cipher(key: &SymmetricKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// AEAD-encrypt `plaintext` under `key`. Output is `nonce || ciphertext`.
pub fn aead_encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher(key)
        .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
        .map_err(|_| VaultError::InvalidKey)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// AEAD-decrypt a `nonce || ciphertext` blob. Any structural or tag failure
/// is the generic `InvalidKey`.
pub fn aead_decrypt(key: &SymmetricKey, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() < NONCE_LEN {
        return Err(VaultError::InvalidKey);
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let plaintext = cipher(key)
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| VaultError::InvalidKey)?;
    Ok(Zeroizing::new(plaintext))
}

/// Seal `plaintext` to the holder of `recipient_public`'s private key.
/// Output is `ephemeral_public || nonce || ciphertext`.
pub fn seal(recipient_public: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient_public));
    let aead_key = SymmetricKey::from_bytes(blake3::derive_key(
        ENVELOPE_KDF_CONTEXT,
        shared.as_bytes(),
    ));

    let mut out = Vec::with_capacity(32 + NONCE_LEN + plaintext.len() + 16);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&aead_encrypt(&aead_key, plaintext)?);
    Ok(out)
}

/// Open a blob produced by [`seal`] with the recipient's private key.
pub fn open(recipient_private: &[u8; 32], blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() < 32 + NONCE_LEN {
        return Err(VaultError::InvalidKey);
    }
    let (ephemeral_bytes, sealed) = blob.split_at(32);
    let ephemeral_public: [u8; 32] = ephemeral_bytes
        .try_into()
        .map_err(|_| VaultError::InvalidKey)?;

    let secret = StaticSecret::from(*recipient_private);
    let shared = secret.diffie_hellman(&PublicKey::from(ephemeral_public));
    let aead_key = SymmetricKey::from_bytes(blake3::derive_key(
        ENVELOPE_KDF_CONTEXT,
        shared.as_bytes(),
    ));
    aead_decrypt(&aead_key, sealed)
}
