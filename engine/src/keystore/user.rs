//! User-side key store: factor enrollment, access-key recovery, and the
//! re-encryption fan-out that follows every change of the enrolled-factor
//! set.

use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::bootstrap::Engine;
use crate::crypto::envelope::{self, SymmetricKey, KEY_LEN};
use crate::error::{Result, VaultError};
use crate::keystore::{self, AccessResult};
use crate::policy;
use crate::store::FanoutSubject;
use crate::types::{
    ActorId, AuthKeyPair, ClassId, EntryId, GroupId, KeyPairId, PluginId, UserAccessRecord,
    UserId, UserToGroupShare,
};

/// Key-store view scoped to one user actor for one request.
pub struct UserKeyStore<'e> {
    engine: &'e Engine,
    user: UserId,
}

impl<'e> UserKeyStore<'e> {
    pub(crate) fn new(engine: &'e Engine, user: UserId) -> Self {
        Self { engine, user }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Fetch the enrolled key pair for a factor, or fail with `NotFound`.
    pub fn auth_key_pair(&self, plugin: &PluginId) -> Result<AuthKeyPair> {
        self.engine.store.require_auth_key_pair(&self.user, plugin)
    }

    pub fn enrolled_factors(&self) -> Result<Vec<PluginId>> {
        let mut plugins: Vec<PluginId> = self
            .engine
            .store
            .auth_key_pairs_for_user(&self.user)?
            .into_iter()
            .map(|pair| pair.plugin)
            .collect();
        plugins.sort();
        Ok(plugins)
    }

    /// Enroll a factor: generate an X25519 pair, encrypt the private half
    /// under the plugin-derived key, persist, and fan out re-encryption so
    /// existing shares cover the new factor set. Idempotent.
    pub fn enroll_factor(&self, plugin_id: &PluginId) -> Result<KeyPairId> {
        let plugin = self.engine.registry.plugin(plugin_id)?;
        if !plugin.is_registered(&self.user) {
            return Err(VaultError::Eligibility(format!(
                "user {} is not registered with factor plugin {plugin_id}",
                self.user
            )));
        }
        if let Some(existing) = self.engine.store.auth_key_pair(&self.user, plugin_id)? {
            return Ok(existing.id);
        }

        let pair = envelope::generate_keypair();
        let derived = plugin.derived_key(&self.user)?;
        let record = AuthKeyPair {
            id: KeyPairId::generate(),
            owner: self.user,
            plugin: plugin_id.clone(),
            public_key: pair.public,
            encrypted_private_key: envelope::aead_encrypt(&derived, &*pair.private)?,
            mac: crate::crypto::mac::RecordMac::unsealed(),
        };
        let id = record.id;
        self.engine.store.put_auth_key_pair(record)?;
        info!(user = %self.user, plugin = %plugin_id, "factor enrolled");

        self.re_encrypt_all_keys()?;
        Ok(id)
    }

    /// Revoke a factor and fan out re-encryption across the remaining set.
    pub fn revoke_factor(&self, plugin_id: &PluginId) -> Result<()> {
        let pair = self.auth_key_pair(plugin_id)?;
        self.engine.store.delete_auth_key_pair(&pair.id)?;
        info!(user = %self.user, plugin = %plugin_id, "factor revoked");
        self.re_encrypt_all_keys()
    }

    /// Recover the data key for an entry: direct records first, group access
    /// as the fallback path. `NotFound` means no access path exists, which is
    /// an expected outcome, not an error.
    pub fn entry_data_key(&self, entry_id: &EntryId) -> Result<AccessResult> {
        let records = self.engine.store.user_access(&self.user, entry_id)?;
        if !records.is_empty() {
            let rows: Vec<(KeyPairId, Vec<u8>)> = records
                .into_iter()
                .map(|r| (r.key_pair, r.wrapped_share))
                .collect();
            // Records exist: an unmet threshold is a hard Reconstruction
            // failure, not a missing access path.
            let key = keystore::recover_for_user(self.engine, &self.user, &rows)?;
            return Ok(AccessResult::Found(key));
        }

        self.entry_data_key_via_groups(entry_id)
    }

    fn entry_data_key_via_groups(&self, entry_id: &EntryId) -> Result<AccessResult> {
        let entry = self.engine.store.require_entry(entry_id)?;
        let mut candidates: Vec<GroupId> = entry.shared_groups.iter().copied().collect();
        if let ActorId::Group(owner) = entry.owner {
            candidates.push(owner);
        }

        for group in candidates {
            let members = self.engine.directory.group_members(&group)?;
            if !members.contains(&self.user) {
                continue;
            }
            let Some(access) = self.engine.store.group_access(&group, entry_id)? else {
                continue;
            };
            let group_key = match self.group_access_key(&group, &entry.security_class) {
                Ok(key) => key,
                // This member may hold no shares for the class; another
                // candidate group can still provide the path.
                Err(VaultError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let pair = self
                .engine
                .store
                .require_group_key_pair(&group, &entry.security_class)?;
            let private_bytes =
                envelope::aead_decrypt(&group_key, &pair.encrypted_private_key)?;
            if private_bytes.len() != KEY_LEN {
                return Err(VaultError::InvalidKey);
            }
            let mut private = Zeroizing::new([0u8; KEY_LEN]);
            private.copy_from_slice(&private_bytes);

            let data_key_bytes = envelope::open(&private, &access.wrapped_key)?;
            let key = SymmetricKey::from_slice(&data_key_bytes)
                .map_err(|_| VaultError::InvalidKey)?;
            debug!(user = %self.user, entry = %entry_id, group = %group, "data key recovered via group");
            return Ok(AccessResult::Found(key));
        }

        Ok(AccessResult::NotFound)
    }

    /// Recover this user's copy of a group access key, the same fragment
    /// recovery as direct entry access but scoped to (user, group, class).
    pub fn group_access_key(&self, group: &GroupId, class: &ClassId) -> Result<SymmetricKey> {
        let shares = self.engine.store.group_shares(&self.user, group, class)?;
        if shares.is_empty() {
            return Err(VaultError::NotFound(format!(
                "no group access key shares for user {} in group {group}, class {class}",
                self.user
            )));
        }
        let rows: Vec<(KeyPairId, Vec<u8>)> = shares
            .into_iter()
            .map(|s| (s.key_pair, s.wrapped_share))
            .collect();
        keystore::recover_for_user(self.engine, &self.user, &rows)
    }

    /// Re-split and re-wrap this user's direct access to one entry under the
    /// current factor set. Idempotent and resumable: each replacement row is
    /// fully computed before it is written, and stale rows are removed only
    /// after every new row is in place.
    pub fn re_encrypt_entry_access(&self, entry_id: &EntryId) -> Result<()> {
        let _token = self
            .engine
            .fanout
            .acquire(FanoutSubject::Entry(*entry_id))?;

        let records = self.engine.store.user_access(&self.user, entry_id)?;
        if records.is_empty() {
            return Ok(());
        }
        let entry = self.engine.store.require_entry(entry_id)?;
        let class = self.engine.registry.class(&entry.security_class)?;

        if !policy::is_eligible(class, &self.engine.registry, &self.engine.store, &self.user)? {
            // The factor set no longer satisfies the class; the shares
            // cannot be rebuilt, so direct access lapses.
            warn!(user = %self.user, entry = %entry_id, "user no longer eligible, direct access removed");
            self.engine.store.delete_user_access(&self.user, entry_id)?;
            return Ok(());
        }

        let rows: Vec<(KeyPairId, Vec<u8>)> = records
            .iter()
            .map(|r| (r.key_pair, r.wrapped_share.clone()))
            .collect();
        let data_key = keystore::recover_for_user(self.engine, &self.user, &rows)?;

        let wrapped = keystore::wrap_key_for_user(self.engine, &self.user, class, &data_key)?;
        let fresh: Vec<KeyPairId> = wrapped.iter().map(|w| w.key_pair).collect();
        for share in wrapped {
            self.engine.store.put_user_access(UserAccessRecord {
                user: self.user,
                entry: *entry_id,
                key_pair: share.key_pair,
                wrapped_share: share.blob,
                mac: crate::crypto::mac::RecordMac::unsealed(),
            })?;
        }
        for record in records {
            if !fresh.contains(&record.key_pair) {
                self.engine.store.delete_user_access_record(
                    &self.user,
                    entry_id,
                    &record.key_pair,
                )?;
            }
        }
        debug!(user = %self.user, entry = %entry_id, "direct access re-encrypted");
        Ok(())
    }

    /// Re-split and re-wrap this user's shares of a group access key under
    /// the current factor set.
    pub fn re_encrypt_group_access(&self, group: &GroupId, class_id: &ClassId) -> Result<()> {
        let _token = self
            .engine
            .fanout
            .acquire(FanoutSubject::Group(*group, *class_id))?;

        let shares = self.engine.store.group_shares(&self.user, group, class_id)?;
        if shares.is_empty() {
            return Ok(());
        }
        let class = self.engine.registry.class(class_id)?;

        if !policy::is_eligible(class, &self.engine.registry, &self.engine.store, &self.user)? {
            let holders = self.engine.store.group_holders(group)?;
            if holders.len() <= 1 {
                // Dropping the last holder would orphan the group key
                // permanently; keep the stale shares instead.
                return Err(VaultError::Invariant(format!(
                    "user {} is the last holder of group {group}'s access key",
                    self.user
                )));
            }
            warn!(user = %self.user, group = %group, "user no longer eligible, group shares removed");
            for share in &shares {
                self.engine.store.delete_group_share_record(
                    &self.user,
                    group,
                    class_id,
                    &share.key_pair,
                )?;
            }
            return Ok(());
        }

        let rows: Vec<(KeyPairId, Vec<u8>)> = shares
            .iter()
            .map(|s| (s.key_pair, s.wrapped_share.clone()))
            .collect();
        let group_key = keystore::recover_for_user(self.engine, &self.user, &rows)?;

        let wrapped = keystore::wrap_key_for_user(self.engine, &self.user, class, &group_key)?;
        let fresh: Vec<KeyPairId> = wrapped.iter().map(|w| w.key_pair).collect();
        for share in wrapped {
            self.engine.store.put_group_share(UserToGroupShare {
                user: self.user,
                group: *group,
                security_class: *class_id,
                key_pair: share.key_pair,
                wrapped_share: share.blob,
                mac: crate::crypto::mac::RecordMac::unsealed(),
            })?;
        }
        for share in shares {
            if !fresh.contains(&share.key_pair) {
                self.engine.store.delete_group_share_record(
                    &self.user,
                    group,
                    class_id,
                    &share.key_pair,
                )?;
            }
        }
        debug!(user = %self.user, group = %group, class = %class_id, "group shares re-encrypted");
        Ok(())
    }

    /// Fan out re-encryption over everything this user holds: every direct
    /// entry access and every group share. The mandatory response to any
    /// change in the enrolled-factor set. Safe to re-run.
    pub fn re_encrypt_all_keys(&self) -> Result<()> {
        for entry in self.engine.store.user_access_entries(&self.user)? {
            self.re_encrypt_entry_access(&entry)?;
        }
        for (group, class) in self.engine.store.group_share_subjects(&self.user)? {
            self.re_encrypt_group_access(&group, &class)?;
        }
        Ok(())
    }
}
