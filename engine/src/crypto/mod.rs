//! Cryptographic building blocks: AEAD/asymmetric envelopes and storage MACs.

pub mod envelope;
pub mod mac;
