//! Storage-level integrity authentication.
//!
//! Every persisted row carrying cryptographic material is MAC-protected over
//! a canonical, field-order-stable concatenation of its fields, keyed by the
//! system authentication key. The MAC is independent of any AEAD tag inside
//! the row: it distinguishes "storage record tampered" (an adversary with
//! database write access) from "ciphertext corrupted".
//!
//! Verification happens on every read, inside `store::CryptoStore`. A
//! mismatch is a `Tamper` error: CRITICAL, logged, and the read is refused.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::error;

use crate::crypto::envelope::SymmetricKey;
use crate::error::{Result, VaultError};

/// Keyed BLAKE3 tag stored alongside each protected record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMac(pub [u8; 32]);

impl RecordMac {
    /// Placeholder used while a record is being built, before sealing.
    pub fn unsealed() -> Self {
        Self([0u8; 32])
    }
}

/// Canonical MAC input: a record-kind domain separator followed by each field
/// as a little-endian u64 length prefix plus the field bytes. The framing
/// makes the concatenation unambiguous regardless of field contents.
pub struct MacInput {
    buf: Vec<u8>,
}

impl MacInput {
    pub fn new(record_kind: &str) -> Self {
        let mut input = MacInput { buf: Vec::new() };
        input.field(record_kind.as_bytes());
        input
    }

    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(bytes);
        self
    }

    fn finish(&self, key: &SymmetricKey) -> RecordMac {
        RecordMac(*blake3::keyed_hash(key.as_bytes(), &self.buf).as_bytes())
    }
}

/// Implemented by every persisted record type that carries a storage MAC.
pub trait MacProtected {
    /// Stable name of the relation, used as a MAC domain separator and in
    /// tamper logs.
    fn record_kind(&self) -> &'static str;
    /// Canonical concatenation of all covered fields, excluding the MAC itself.
    fn mac_input(&self) -> MacInput;
    fn mac(&self) -> &RecordMac;
    fn set_mac(&mut self, mac: RecordMac);
}

/// Compute and attach the MAC for a record about to be persisted.
pub fn seal<R: MacProtected>(record: &mut R, key: &SymmetricKey) {
    let mac = record.mac_input().finish(key);
    record.set_mac(mac);
}

/// Verify a freshly loaded record. Constant-time comparison; a mismatch is
/// logged at error severity and refused as `Tamper`.
pub fn verify<R: MacProtected>(record: &R, key: &SymmetricKey) -> Result<()> {
    let expected = record.mac_input().finish(key);
    if expected.0.ct_eq(&record.mac().0).into() {
        Ok(())
    } else {
        error!(
            record_kind = record.record_kind(),
            "CRITICAL: storage MAC mismatch, refusing read"
        );
        Err(VaultError::Tamper(format!(
            "MAC mismatch on {} record",
            record.record_kind()
        )))
    }
}
