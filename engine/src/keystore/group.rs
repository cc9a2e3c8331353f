//! Group-side key store.
//!
//! A group holds one key pair per security class it is enrolled in. The
//! private half is encrypted under the group access key, which is
//! threshold-split independently per member across that member's factor key
//! pairs. Adding a member therefore issues a fresh split for the newcomer
//! only; existing members' shares stay valid untouched.

use tracing::info;

use crate::bootstrap::Engine;
use crate::crypto::envelope::{self, SymmetricKey};
use crate::crypto::mac::RecordMac;
use crate::entry;
use crate::error::{Result, VaultError};
use crate::keystore;
use crate::policy;
use crate::types::{ActorId, ClassId, GroupId, GroupKeyPair, UserId, UserToGroupShare};

/// Key-store view scoped to one group actor.
pub struct GroupKeyStore<'e> {
    engine: &'e Engine,
    group: GroupId,
}

impl<'e> GroupKeyStore<'e> {
    pub(crate) fn new(engine: &'e Engine, group: GroupId) -> Self {
        Self { engine, group }
    }

    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// Security classes this group holds a key pair for.
    pub fn security_classes(&self) -> Result<Vec<ClassId>> {
        let mut classes: Vec<ClassId> = self
            .engine
            .store
            .group_key_pairs(&self.group)?
            .into_iter()
            .map(|pair| pair.security_class)
            .collect();
        classes.sort();
        Ok(classes)
    }

    /// Enroll the group in a security class: generate a fresh group key pair
    /// and group access key, and issue one independent share split per
    /// member. Requires every current member to be eligible for the class.
    /// Idempotent if the group already holds a key pair for the class.
    pub fn add_security_class(&self, class_id: &ClassId) -> Result<()> {
        let class = self.engine.registry.class(class_id)?;
        if self.engine.store.group_key_pair(&self.group, class_id)?.is_some() {
            return Ok(());
        }

        let members = self.engine.directory.group_members(&self.group)?;
        if members.is_empty() {
            return Err(VaultError::Invariant(format!(
                "group {} has no members to hold its access key",
                self.group
            )));
        }
        for member in &members {
            if !policy::is_eligible(class, &self.engine.registry, &self.engine.store, member)? {
                return Err(VaultError::Eligibility(format!(
                    "member {member} of group {} is not eligible for class {class_id}",
                    self.group
                )));
            }
        }

        let pair = envelope::generate_keypair();
        let access_key = SymmetricKey::generate();
        self.engine.store.put_group_key_pair(GroupKeyPair {
            group: self.group,
            security_class: *class_id,
            public_key: pair.public,
            encrypted_private_key: envelope::aead_encrypt(&access_key, &*pair.private)?,
            mac: RecordMac::unsealed(),
        })?;

        for member in &members {
            self.issue_member_shares(member, class_id, &access_key)?;
        }
        info!(group = %self.group, class = %class_id, members = members.len(), "security class added");
        Ok(())
    }

    /// Drop a security class: delete every entry the group owns under it
    /// (with full cascade), the group's access records for entries of that
    /// class, all member shares, and the group key pair itself.
    pub fn remove_security_class(&self, class_id: &ClassId) -> Result<()> {
        for vault_entry in self.engine.store.list_entries()? {
            if vault_entry.owner == ActorId::Group(self.group)
                && vault_entry.security_class == *class_id
            {
                entry::delete_entry_cascade(self.engine, &vault_entry.id)?;
            }
        }

        for access in self.engine.store.group_access_for_group(&self.group)? {
            match self.engine.store.get_entry(&access.entry)? {
                Some(e) if e.security_class == *class_id => {
                    self.engine.store.delete_group_access(&self.group, &access.entry)?;
                }
                _ => {}
            }
        }

        self.engine
            .store
            .delete_group_shares_for_class(&self.group, class_id)?;
        self.engine.store.delete_group_key_pair(&self.group, class_id)?;
        info!(group = %self.group, class = %class_id, "security class removed");
        Ok(())
    }

    /// Add a member: for each enrolled class, recover the group access key
    /// through an existing member and issue a fresh independent split for
    /// the newcomer. Existing members' shares are untouched.
    pub fn add_member(&self, new_member: &UserId, acting_member: &UserId) -> Result<()> {
        if !self.engine.directory.user_exists(new_member) {
            return Err(VaultError::NotFound(format!("user {new_member}")));
        }
        let key_pairs = self.engine.store.group_key_pairs(&self.group)?;
        for pair in &key_pairs {
            let class = self.engine.registry.class(&pair.security_class)?;
            if !policy::is_eligible(class, &self.engine.registry, &self.engine.store, new_member)? {
                return Err(VaultError::Eligibility(format!(
                    "user {new_member} is not eligible for class {} held by group {}",
                    pair.security_class, self.group
                )));
            }
        }

        let acting = self.engine.user_keys(*acting_member)?;
        for pair in &key_pairs {
            if !self
                .engine
                .store
                .group_shares(new_member, &self.group, &pair.security_class)?
                .is_empty()
            {
                continue;
            }
            let access_key = acting.group_access_key(&self.group, &pair.security_class)?;
            self.issue_member_shares(new_member, &pair.security_class, &access_key)?;
        }
        info!(group = %self.group, user = %new_member, "member key shares issued");
        Ok(())
    }

    /// Remove a member's shares. Rejected if the member is the last holder:
    /// a zero-holder group access key is permanently unrecoverable.
    pub fn remove_member(&self, member: &UserId) -> Result<()> {
        let holders = self.engine.store.group_holders(&self.group)?;
        if !holders.contains(member) {
            return Ok(());
        }
        if holders.len() == 1 {
            return Err(VaultError::Invariant(format!(
                "user {member} is the last holder of group {}'s access key",
                self.group
            )));
        }
        self.engine.store.delete_group_shares(member, &self.group)?;
        info!(group = %self.group, user = %member, "member key shares removed");
        Ok(())
    }

    fn issue_member_shares(
        &self,
        member: &UserId,
        class_id: &ClassId,
        access_key: &SymmetricKey,
    ) -> Result<()> {
        let class = self.engine.registry.class(class_id)?;
        let wrapped = keystore::wrap_key_for_user(self.engine, member, class, access_key)?;
        for share in wrapped {
            self.engine.store.put_group_share(UserToGroupShare {
                user: *member,
                group: self.group,
                security_class: *class_id,
                key_pair: share.key_pair,
                wrapped_share: share.blob,
                mac: RecordMac::unsealed(),
            })?;
        }
        Ok(())
    }
}
