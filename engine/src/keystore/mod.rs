//! Per-actor key stores.
//!
//! Users and groups implement the same capability independently: users
//! recover secrets share-by-share through their authenticated factors,
//! groups hold one key pair per security class whose private half members
//! reach through the group access key.
//!
//! Shared here: the split-and-wrap write path (threshold-split a symmetric
//! key across a user's factor key pairs) and the unwrap-and-recover read
//! path (authenticated factors only, stop at t shares).

mod group;
mod user;

pub use group::GroupKeyStore;
pub use user::UserKeyStore;

use tracing::warn;
use zeroize::Zeroizing;

use crate::bootstrap::Engine;
use crate::crypto::envelope::{self, SymmetricKey, KEY_LEN};
use crate::error::{Result, VaultError};
use crate::shamir::{self, KeyShare};
use crate::types::{KeyPairId, SecurityClass, UserId};

/// Outcome of an access-key lookup. "No access path" is an expected case,
/// not an error; genuine failures use the error channel of `Result`.
#[derive(Debug)]
pub enum AccessResult {
    Found(SymmetricKey),
    NotFound,
}

impl AccessResult {
    pub fn found(self) -> Option<SymmetricKey> {
        match self {
            AccessResult::Found(key) => Some(key),
            AccessResult::NotFound => None,
        }
    }
}

/// A freshly wrapped share destined for one (user, factor) row.
pub(crate) struct WrappedShare {
    pub key_pair: KeyPairId,
    pub blob: Vec<u8>,
}

/// Threshold-split `secret` across the user's enrolled key pairs for every
/// factor of `class` and seal share i under factor i's public key.
///
/// Fails with `Eligibility` if the user is not enrolled for all n factors;
/// the write path never produces a partial factor set.
pub(crate) fn wrap_key_for_user(
    engine: &Engine,
    user: &UserId,
    class: &SecurityClass,
    secret: &SymmetricKey,
) -> Result<Vec<WrappedShare>> {
    let mut key_pairs = Vec::with_capacity(class.factor_plugins.len());
    for plugin in &class.factor_plugins {
        let pair = engine.store.auth_key_pair(user, plugin)?.ok_or_else(|| {
            VaultError::Eligibility(format!(
                "user {user} is not enrolled for factor {plugin} required by class {}",
                class.id
            ))
        })?;
        key_pairs.push(pair);
    }

    let shares = shamir::split(
        secret.as_bytes(),
        class.factor_plugins.len() as u8,
        class.required_factors,
    )?;

    let mut wrapped = Vec::with_capacity(shares.len());
    for (share, pair) in shares.iter().zip(&key_pairs) {
        wrapped.push(WrappedShare {
            key_pair: pair.id,
            blob: envelope::seal(&pair.public_key, &share.to_bytes())?,
        });
    }
    Ok(wrapped)
}

/// Recover a symmetric key from wrapped-share rows using only factors the
/// user has authenticated in the current session. Unauthenticated factors
/// are skipped; recovery stops as soon as t shares are in hand.
pub(crate) fn recover_for_user(
    engine: &Engine,
    user: &UserId,
    rows: &[(KeyPairId, Vec<u8>)],
) -> Result<SymmetricKey> {
    let mut shares: Vec<KeyShare> = Vec::new();
    let mut threshold: Option<u8> = None;

    for (key_pair_id, blob) in rows {
        let Some(pair) = engine.store.auth_key_pair_by_id(key_pair_id)? else {
            // Stale row referencing a revoked factor; unusable but not fatal.
            warn!(user = %user, key_pair = %key_pair_id, "wrapped share references missing key pair");
            continue;
        };
        let plugin = engine.registry.plugin(&pair.plugin)?;
        if !plugin.is_authenticated(user) {
            continue;
        }

        let derived = plugin.derived_key(user)?;
        let private_bytes = envelope::aead_decrypt(&derived, &pair.encrypted_private_key)?;
        if private_bytes.len() != KEY_LEN {
            return Err(VaultError::InvalidKey);
        }
        let mut private = Zeroizing::new([0u8; KEY_LEN]);
        private.copy_from_slice(&private_bytes);

        let share_bytes = envelope::open(&private, blob)?;
        let share = KeyShare::from_bytes(&share_bytes)?;
        let t = *threshold.get_or_insert(share.threshold);
        shares.push(share);
        if shares.len() >= t as usize {
            break;
        }
    }

    if shares.is_empty() {
        return Err(VaultError::Reconstruction(format!(
            "no authenticated factors available for user {user}"
        )));
    }

    let secret = shamir::recover(&shares)?;
    SymmetricKey::from_slice(&secret)
        .map_err(|_| VaultError::Reconstruction("recovered key has wrong length".to_string()))
}
