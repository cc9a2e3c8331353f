//! Centralized vault engine error types.

use thiserror::Error;

/// Convenience alias used across the engine.
pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Error, Debug)]
pub enum VaultError {
    /// Malformed or out-of-range input (bad threshold, empty secret, ...).
    #[error("Validation error: {0}")]
    Validation(String),
    /// Missing entry, link, key pair or other addressed record.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Storage-level MAC mismatch. CRITICAL: indicates write-level tampering,
    /// never retried, the read is refused.
    #[error("Tamper detected: {0}")]
    Tamper(String),
    /// The actor has not proven enough authentication factors.
    #[error("Authentication error: {0}")]
    Authentication(String),
    /// The actor is not enrolled for all factors a security class requires.
    #[error("Eligibility error: {0}")]
    Eligibility(String),
    /// Authenticated but not authorized for the requested operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Too few shares, or shares from mismatched splits.
    #[error("Reconstruction error: {0}")]
    Reconstruction(String),
    /// AEAD or asymmetric unwrap failure. Deliberately carries no detail so
    /// the capability-link path cannot be used as an oracle.
    #[error("Invalid key")]
    InvalidKey,
    /// A design-level invariant would be violated (e.g. removing the last
    /// holder of a group access key).
    #[error("Invariant violation: {0}")]
    Invariant(String),
    /// Persistence backend failure (lock poisoned, backend unavailable).
    #[error("Storage error: {0}")]
    Storage(String),
    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serde(String),
}
