//! (t, n) threshold secret splitting over GF(256).
//!
//! `split` protects each secret byte with its own random polynomial of degree
//! t - 1 whose constant term is the secret byte; share i holds the
//! evaluations at x = i. Any t shares reconstruct the secret exactly via
//! Lagrange interpolation at zero; fewer than t shares are information-
//! theoretically independent of the secret.
//!
//! Splitting draws fresh randomness from the OS RNG on every call; recovery
//! is deterministic in its inputs.

mod field;

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

/// One share of a split secret. `index` is the non-zero x-coordinate,
/// `threshold` the t this split was produced with, `body` the per-byte
/// polynomial evaluations (same length as the secret).
#[derive(Clone)]
pub struct KeyShare {
    pub index: u8,
    pub threshold: u8,
    pub body: Zeroizing<Vec<u8>>,
}

impl KeyShare {
    /// Serialize as `index || threshold || body` for envelope wrapping.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(2 + self.body.len()));
        out.push(self.index);
        out.push(self.threshold);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 3 {
            return Err(VaultError::Reconstruction(
                "share blob too short".to_string(),
            ));
        }
        let index = bytes[0];
        let threshold = bytes[1];
        if index == 0 || threshold == 0 {
            return Err(VaultError::Reconstruction(
                "malformed share header".to_string(),
            ));
        }
        Ok(KeyShare {
            index,
            threshold,
            body: Zeroizing::new(bytes[2..].to_vec()),
        })
    }
}

impl std::fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose share bytes through Debug.
        write!(f, "KeyShare(index={}, t={})", self.index, self.threshold)
    }
}

/// Split `secret` into `n` shares with recovery threshold `t`.
pub fn split(secret: &[u8], n: u8, t: u8) -> Result<Vec<KeyShare>> {
    if secret.is_empty() {
        return Err(VaultError::Validation("cannot split an empty secret".into()));
    }
    if t == 0 || t > n {
        return Err(VaultError::Validation(format!(
            "invalid threshold parameters: t={t}, n={n}"
        )));
    }

    let mut shares: Vec<KeyShare> = (1..=n)
        .map(|index| KeyShare {
            index,
            threshold: t,
            body: Zeroizing::new(vec![0u8; secret.len()]),
        })
        .collect();

    let mut coefficients = Zeroizing::new(vec![0u8; t as usize]);
    for (byte_index, &secret_byte) in secret.iter().enumerate() {
        coefficients[0] = secret_byte;
        OsRng.fill_bytes(&mut coefficients[1..]);

        for share in &mut shares {
            share.body[byte_index] = field::eval_poly(&coefficients, share.index);
        }
    }

    Ok(shares)
}

/// Recover the secret from at least t structurally valid shares of the same
/// split. Fails with `Reconstruction` on too few shares, duplicate indices,
/// or shares with mismatched parameters.
pub fn recover(shares: &[KeyShare]) -> Result<Zeroizing<Vec<u8>>> {
    let first = shares.first().ok_or_else(|| {
        VaultError::Reconstruction("no shares supplied".to_string())
    })?;
    let threshold = first.threshold;
    let secret_len = first.body.len();

    if shares.len() < threshold as usize {
        return Err(VaultError::Reconstruction(format!(
            "{} shares supplied, {} required",
            shares.len(),
            threshold
        )));
    }

    let mut seen = [false; 256];
    for share in shares.iter().take(threshold as usize) {
        if share.index == 0 {
            return Err(VaultError::Reconstruction(
                "share with zero index".to_string(),
            ));
        }
        if seen[share.index as usize] {
            return Err(VaultError::Reconstruction(format!(
                "duplicate share index {}",
                share.index
            )));
        }
        seen[share.index as usize] = true;
        if share.threshold != threshold || share.body.len() != secret_len {
            return Err(VaultError::Reconstruction(
                "shares come from mismatched splits".to_string(),
            ));
        }
    }

    let mut secret = Zeroizing::new(vec![0u8; secret_len]);
    let mut points = vec![(0u8, 0u8); threshold as usize];
    for byte_index in 0..secret_len {
        for (point, share) in points.iter_mut().zip(shares.iter()) {
            *point = (share.index, share.body[byte_index]);
        }
        secret[byte_index] = field::interpolate_at_zero(&points);
    }

    Ok(secret)
}
