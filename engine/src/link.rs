//! Capability links: bearer-URL access to exactly one entry, independent of
//! actor login, scoped by expiry, use count, and an optional password.
//!
//! The access descriptor is AEAD-encrypted under the system link key. A
//! descriptor that fails to decode is deleted on the spot; a link that can
//! no longer be interpreted fails destructively rather than open.
//!
//! Every failure on the access path - token check, password derivation, key
//! unwrap - surfaces as the same generic `InvalidKey`, so the path cannot be
//! used as an oracle for which sub-check failed.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use crate::bootstrap::Engine;
use crate::crypto::envelope::{self, SymmetricKey};
use crate::crypto::mac::RecordMac;
use crate::error::{Result, VaultError};
use crate::keystore::AccessResult;
use crate::types::{
    AccessDescriptor, ActorId, CapabilityLink, EntryId, LinkCall, LinkId, UserId,
};

/// Scope limits for a new link.
#[derive(Debug, Clone, Default)]
pub struct LinkOptions {
    pub valid_until: Option<DateTime<Utc>>,
    pub max_calls: Option<u32>,
    pub password: Option<String>,
}

/// Who is knocking: an optional authenticated user plus free-form metadata
/// (address, user agent) recorded in the call journal.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub user: Option<UserId>,
    pub agent: String,
}

/// Result of issuing a link: the id plus the bearer token that goes into
/// the URL. The token is never persisted; only its digest is.
#[derive(Debug)]
pub struct LinkGrant {
    pub link: LinkId,
    pub token: [u8; 32],
}

impl LinkGrant {
    /// URL-safe rendering of the bearer token.
    pub fn token_string(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.token)
    }
}

/// Decode a token string produced by [`LinkGrant::token_string`]. Malformed
/// input maps to the same generic error as a wrong token.
pub fn parse_token(token: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| VaultError::InvalidKey)
}

pub struct LinkIssuer<'e> {
    engine: &'e Engine,
}

impl<'e> LinkIssuer<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    /// Issue a link for an entry the acting user owns and can decrypt.
    pub fn create(
        &self,
        acting: UserId,
        entry_id: &EntryId,
        options: LinkOptions,
    ) -> Result<LinkGrant> {
        let entry = self.engine.store.require_entry(entry_id)?;
        let owns = match entry.owner {
            ActorId::User(owner) => owner == acting,
            ActorId::Group(group) => self
                .engine
                .directory
                .group_members(&group)?
                .contains(&acting),
        };
        if !owns || !self.engine.permissions.may_share(&acting) {
            return Err(VaultError::PermissionDenied(format!(
                "user {acting} may not issue links for entry {entry_id}"
            )));
        }

        let data_key = match self.engine.user_keys(acting)?.entry_data_key(entry_id)? {
            AccessResult::Found(key) => key,
            AccessResult::NotFound => {
                return Err(VaultError::PermissionDenied(format!(
                    "user {acting} has no access path to entry {entry_id}"
                )))
            }
        };

        let mut token = [0u8; 32];
        OsRng.fill_bytes(&mut token);
        let mut salt = [0u8; 16];
        OsRng.fill_bytes(&mut salt);

        let wrapped_data_key = match &options.password {
            Some(password) => {
                let derived = self.derive_password_key(password, &salt)?;
                envelope::aead_encrypt(&derived, data_key.as_bytes())?
            }
            None => envelope::aead_encrypt(&self.engine.link_key, data_key.as_bytes())?,
        };

        let descriptor = AccessDescriptor {
            hash: *blake3::hash(&token).as_bytes(),
            valid_until: options.valid_until,
            max_calls: options.max_calls,
            call_count: 0,
            calls: Vec::new(),
            password_protected: options.password.is_some(),
            encryption_salt: salt,
            wrapped_data_key,
        };

        let link = CapabilityLink {
            id: LinkId::generate(),
            entry: *entry_id,
            active: true,
            encrypted_descriptor: self.encrypt_descriptor(&descriptor)?,
            mac: RecordMac::unsealed(),
        };
        let id = link.id;
        self.engine.store.put_link(link)?;
        info!(link = %id, entry = %entry_id, "capability link issued");
        Ok(LinkGrant { link: id, token })
    }

    /// Bearer access: verify the token, unwrap the data key (through the
    /// password KDF if the link is protected), decrypt the payload, and
    /// account for the call. All failures collapse to `InvalidKey`.
    pub fn get_password(
        &self,
        link_id: &LinkId,
        token: &[u8],
        password: Option<&str>,
        caller: &CallerContext,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let mut link = self.engine.store.require_link(link_id)?;
        if !link.active {
            return Err(VaultError::InvalidKey);
        }

        let mut descriptor = self.decode(&link)?;
        if Self::is_spent(&descriptor) {
            self.deactivate(&mut link, &descriptor)?;
            return Err(VaultError::InvalidKey);
        }

        let presented = blake3::hash(token);
        if !bool::from(presented.as_bytes().ct_eq(&descriptor.hash)) {
            return Err(VaultError::InvalidKey);
        }

        let data_key_bytes = if descriptor.password_protected {
            let password = password.ok_or(VaultError::InvalidKey)?;
            let derived = self
                .derive_password_key(password, &descriptor.encryption_salt)
                .map_err(|_| VaultError::InvalidKey)?;
            envelope::aead_decrypt(&derived, &descriptor.wrapped_data_key)
                .map_err(|_| VaultError::InvalidKey)?
        } else {
            envelope::aead_decrypt(&self.engine.link_key, &descriptor.wrapped_data_key)
                .map_err(|_| VaultError::InvalidKey)?
        };
        let data_key =
            SymmetricKey::from_slice(&data_key_bytes).map_err(|_| VaultError::InvalidKey)?;

        let entry = self.engine.store.require_entry(&link.entry)?;
        let payload = envelope::aead_decrypt(&data_key, &entry.encrypted_payload)
            .map_err(|_| VaultError::InvalidKey)?;

        // An authenticated caller with independent decrypt access does not
        // consume the usage budget.
        if !self.caller_has_ordinary_access(caller, &link.entry)? {
            descriptor.call_count += 1;
            descriptor.calls.push(LinkCall {
                at: Utc::now(),
                caller: caller.agent.clone(),
            });
            if Self::is_spent(&descriptor) {
                link.active = false;
            }
            link.encrypted_descriptor = self.encrypt_descriptor(&descriptor)?;
            self.engine.store.put_link(link)?;
        }

        Ok(payload)
    }

    /// Deactivate every active link of an entry. Consumed as the owner-change
    /// domain event from the entry manager.
    pub fn handle_owner_change(&self, entry_id: &EntryId) -> Result<()> {
        for mut link in self.engine.store.links_for_entry(entry_id)? {
            if link.active {
                link.active = false;
                self.engine.store.put_link(link)?;
            }
        }
        info!(entry = %entry_id, "capability links deactivated after owner change");
        Ok(())
    }

    /// Best-effort batch sweep: walk all active links through the lazy
    /// decode path and deactivate the expired/exhausted ones eagerly.
    /// Returns the number of links deactivated.
    pub fn sweep_expired(&self) -> Result<usize> {
        let mut deactivated = 0;
        for mut link in self.engine.store.active_links()? {
            let descriptor = match self.decode(&link) {
                Ok(d) => d,
                // Corrupt links are already deleted by decode.
                Err(_) => continue,
            };
            if Self::is_spent(&descriptor) {
                self.deactivate(&mut link, &descriptor)?;
                deactivated += 1;
            }
        }
        Ok(deactivated)
    }

    /// Decrypt and parse a link's access descriptor. Decode failure is
    /// corruption: the link is permanently deleted, never served.
    fn decode(&self, link: &CapabilityLink) -> Result<AccessDescriptor> {
        let plaintext = match envelope::aead_decrypt(&self.engine.link_key, &link.encrypted_descriptor)
        {
            Ok(p) => p,
            Err(_) => return self.destroy_corrupt(link),
        };
        match bincode::deserialize(&plaintext) {
            Ok(descriptor) => Ok(descriptor),
            Err(_) => self.destroy_corrupt(link),
        }
    }

    fn destroy_corrupt(&self, link: &CapabilityLink) -> Result<AccessDescriptor> {
        error!(link = %link.id, entry = %link.entry, "corrupt access descriptor, deleting link");
        self.engine.store.delete_link(&link.id)?;
        Err(VaultError::InvalidKey)
    }

    fn encrypt_descriptor(&self, descriptor: &AccessDescriptor) -> Result<Vec<u8>> {
        let plaintext = Zeroizing::new(
            bincode::serialize(descriptor).map_err(|e| VaultError::Serde(e.to_string()))?,
        );
        envelope::aead_encrypt(&self.engine.link_key, &plaintext)
    }

    fn is_spent(descriptor: &AccessDescriptor) -> bool {
        if let Some(valid_until) = descriptor.valid_until {
            if Utc::now() > valid_until {
                return true;
            }
        }
        if let Some(max_calls) = descriptor.max_calls {
            if descriptor.call_count >= max_calls {
                return true;
            }
        }
        false
    }

    fn deactivate(&self, link: &mut CapabilityLink, descriptor: &AccessDescriptor) -> Result<()> {
        warn!(link = %link.id, calls = descriptor.call_count, "capability link deactivated");
        link.active = false;
        self.engine.store.put_link(link.clone())?;
        Ok(())
    }

    fn caller_has_ordinary_access(
        &self,
        caller: &CallerContext,
        entry_id: &EntryId,
    ) -> Result<bool> {
        let Some(user) = caller.user else {
            return Ok(false);
        };
        let Ok(keys) = self.engine.user_keys(user) else {
            return Ok(false);
        };
        match keys.entry_data_key(entry_id) {
            Ok(AccessResult::Found(_)) => Ok(true),
            Ok(AccessResult::NotFound) => Ok(false),
            // Holding records without enough live factors still means no
            // independent access right now.
            Err(VaultError::Reconstruction(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn derive_password_key(&self, password: &str, salt: &[u8; 16]) -> Result<SymmetricKey> {
        let cost = self.engine.kdf;
        let params = Params::new(cost.m_kib, cost.t, cost.p, Some(32))
            .map_err(|e| VaultError::Validation(format!("bad KDF parameters: {e}")))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut out = Zeroizing::new([0u8; 32]);
        argon
            .hash_password_into(password.as_bytes(), salt, &mut out[..])
            .map_err(|_| VaultError::InvalidKey)?;
        Ok(SymmetricKey::from_bytes(*out))
    }
}
