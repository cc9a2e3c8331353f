//! Vault entry lifecycle: creation, viewing, editing, sharing, security
//! class migration, ownership transfer, and deletion with full cascade.
//!
//! All operations run through an `EntrySession` holding the decrypted data
//! key for the duration of one request only; the key is zeroized when the
//! session drops and is never promoted to any longer-lived cache.
//!
//! Permission matrix (checked before any state transition):
//!   VIEW         access path + authenticated for the entry's class
//!   EDIT         current owner
//!   SHARE        owner + general share permission
//!   SHARE_GROUP  owner of a group-owned entry + group-share permission
//!                or group admin
//!   DELETE       owner, super-actor, or group-delete permission holder

use chrono::Utc;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::bootstrap::Engine;
use crate::crypto::envelope::{self, SymmetricKey};
use crate::crypto::mac::RecordMac;
use crate::error::{Result, VaultError};
use crate::keystore::{self, AccessResult};
use crate::policy;
use crate::store::FanoutSubject;
use crate::types::{
    ActorId, ClassId, EntryId, EntryRevision, GroupAccessRecord, GroupId, KeyPairId,
    UserAccessRecord, UserId, VaultEntry,
};

/// Lifecycle states of an entry session. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Constructed,
    Decrypted,
    Edited,
    Shared,
    OwnerChanged,
    Saved,
    Deleted,
}

/// A per-request handle on one entry with its recovered data key.
#[derive(Debug)]
pub struct EntrySession {
    entry: VaultEntry,
    data_key: SymmetricKey,
    state: EntryState,
    actor: UserId,
}

impl EntrySession {
    pub fn entry(&self) -> &VaultEntry {
        &self.entry
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// Decrypt the payload. Transitions `Constructed` -> `Decrypted`.
    pub fn read_payload(&mut self) -> Result<Zeroizing<Vec<u8>>> {
        let payload = envelope::aead_decrypt(&self.data_key, &self.entry.encrypted_payload)?;
        if self.state == EntryState::Constructed {
            self.state = EntryState::Decrypted;
        }
        Ok(payload)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == EntryState::Deleted {
            return Err(VaultError::Validation(format!(
                "entry {} session is deleted",
                self.entry.id
            )));
        }
        Ok(())
    }
}

pub struct EntryManager<'e> {
    engine: &'e Engine,
}

impl<'e> EntryManager<'e> {
    pub(crate) fn new(engine: &'e Engine) -> Self {
        Self { engine }
    }

    /// Create an entry: generate the data key, encrypt the payload, persist
    /// the entry, and grant the owner its access path.
    pub fn create(
        &self,
        acting: UserId,
        owner: ActorId,
        class_id: ClassId,
        title: impl Into<String>,
        description: impl Into<String>,
        payload: &[u8],
    ) -> Result<EntryId> {
        let class = self.engine.registry.class(&class_id)?;
        match owner {
            ActorId::User(user) => {
                if user != acting {
                    return Err(VaultError::PermissionDenied(format!(
                        "user {acting} cannot create an entry owned by {user}"
                    )));
                }
                if !policy::is_eligible(class, &self.engine.registry, &self.engine.store, &user)? {
                    return Err(VaultError::Eligibility(format!(
                        "owner {user} is not enrolled for all factors of class {class_id}"
                    )));
                }
            }
            ActorId::Group(group) => {
                let members = self.engine.directory.group_members(&group)?;
                if !members.contains(&acting) {
                    return Err(VaultError::PermissionDenied(format!(
                        "user {acting} is not a member of owning group {group}"
                    )));
                }
                if self.engine.store.group_key_pair(&group, &class_id)?.is_none() {
                    return Err(VaultError::Eligibility(format!(
                        "group {group} holds no key pair for class {class_id}"
                    )));
                }
            }
        }

        let data_key = SymmetricKey::generate();
        let entry = VaultEntry {
            id: EntryId::generate(),
            title: title.into(),
            description: description.into(),
            security_class: class_id,
            owner,
            encrypted_payload: envelope::aead_encrypt(&data_key, payload)?,
            shared_users: Default::default(),
            shared_groups: Default::default(),
            history: Vec::new(),
            mac_fields: VaultEntry::default_mac_fields(),
            mac: RecordMac::unsealed(),
        };
        let id = entry.id;
        self.engine.store.put_entry(entry)?;

        match owner {
            ActorId::User(user) => self.grant_user_access(&id, &class_id, &data_key, &user)?,
            ActorId::Group(group) => self.grant_group_access(&id, &class_id, &data_key, &group)?,
        }
        info!(entry = %id, owner = %owner, class = %class_id, "entry created");
        Ok(id)
    }

    /// VIEW: open an entry for an authenticated actor with a working access
    /// path. Returns a session in the `Constructed` state.
    pub fn open(&self, acting: UserId, entry_id: &EntryId) -> Result<EntrySession> {
        let entry = self.engine.store.require_entry(entry_id)?;
        let class = self.engine.registry.class(&entry.security_class)?;
        policy::check_authentication(class, &self.engine.registry, &acting)?;

        let keys = self.engine.user_keys(acting)?;
        match keys.entry_data_key(entry_id)? {
            AccessResult::Found(data_key) => Ok(EntrySession {
                entry,
                data_key,
                state: EntryState::Constructed,
                actor: acting,
            }),
            AccessResult::NotFound => Err(VaultError::PermissionDenied(format!(
                "user {acting} has no access path to entry {entry_id}"
            ))),
        }
    }

    /// EDIT: replace title/description/payload. The previous payload is
    /// pushed onto the entry history.
    pub fn edit(
        &self,
        session: &mut EntrySession,
        title: impl Into<String>,
        description: impl Into<String>,
        payload: &[u8],
    ) -> Result<()> {
        session.ensure_live()?;
        self.require_owner(session)?;

        let previous = std::mem::take(&mut session.entry.encrypted_payload);
        session.entry.history.push(EntryRevision {
            encrypted_payload: previous,
            edited_at: Utc::now(),
        });
        session.entry.title = title.into();
        session.entry.description = description.into();
        session.entry.encrypted_payload = envelope::aead_encrypt(&session.data_key, payload)?;
        session.state = EntryState::Edited;
        Ok(())
    }

    /// Persist the session's entry.
    pub fn save(&self, session: &mut EntrySession) -> Result<()> {
        session.ensure_live()?;
        self.engine.store.put_entry(session.entry.clone())?;
        session.state = EntryState::Saved;
        Ok(())
    }

    /// SHARE: grant another user direct access. Idempotent.
    pub fn share_with_user(&self, session: &mut EntrySession, target: UserId) -> Result<()> {
        session.ensure_live()?;
        self.require_owner(session)?;
        if !self.engine.permissions.may_share(&session.actor) {
            return Err(VaultError::PermissionDenied(format!(
                "user {} lacks the share permission",
                session.actor
            )));
        }
        if !self.engine.directory.user_exists(&target) {
            return Err(VaultError::NotFound(format!("user {target}")));
        }

        self.create_user_access(session, target)?;
        session.entry.shared_users.insert(target);
        self.engine.store.put_entry(session.entry.clone())?;
        session.state = EntryState::Shared;
        Ok(())
    }

    /// SHARE_GROUP: grant a group access. Idempotent.
    pub fn share_with_group(&self, session: &mut EntrySession, target: GroupId) -> Result<()> {
        session.ensure_live()?;
        self.require_owner(session)?;
        let permitted = match session.entry.owner {
            ActorId::Group(owner_group) => {
                self.engine
                    .permissions
                    .may_share_group(&session.actor, &owner_group)
                    || self
                        .engine
                        .directory
                        .is_group_admin(&session.actor, &owner_group)
            }
            ActorId::User(_) => self.engine.permissions.may_share(&session.actor),
        };
        if !permitted {
            return Err(VaultError::PermissionDenied(format!(
                "user {} lacks the group-share permission",
                session.actor
            )));
        }
        if !self.engine.directory.group_exists(&target) {
            return Err(VaultError::NotFound(format!("group {target}")));
        }

        self.create_group_access(session, target)?;
        session.entry.shared_groups.insert(target);
        self.engine.store.put_entry(session.entry.clone())?;
        session.state = EntryState::Shared;
        Ok(())
    }

    /// Revoke a user's direct share. Owner-gated.
    pub fn revoke_user_access(&self, session: &mut EntrySession, target: UserId) -> Result<()> {
        session.ensure_live()?;
        self.require_owner(session)?;
        if session.entry.owner == ActorId::User(target) {
            return Err(VaultError::Validation(format!(
                "cannot revoke the owner {target}'s access"
            )));
        }
        self.engine
            .store
            .delete_user_access(&target, &session.entry.id)?;
        session.entry.shared_users.remove(&target);
        self.engine.store.put_entry(session.entry.clone())?;
        session.state = EntryState::Shared;
        Ok(())
    }

    /// Revoke a group's share. Owner-gated.
    pub fn revoke_group_access(&self, session: &mut EntrySession, target: GroupId) -> Result<()> {
        session.ensure_live()?;
        self.require_owner(session)?;
        if session.entry.owner == ActorId::Group(target) {
            return Err(VaultError::Validation(format!(
                "cannot revoke the owning group {target}'s access"
            )));
        }
        self.engine
            .store
            .delete_group_access(&target, &session.entry.id)?;
        session.entry.shared_groups.remove(&target);
        self.engine.store.put_entry(session.entry.clone())?;
        session.state = EntryState::Shared;
        Ok(())
    }

    /// Migrate the entry to a new security class, recomputing every holder's
    /// wrapping. Holders ineligible under the new class lose access
    /// silently; that is the intended side effect of a class change.
    pub fn set_security_class(
        &self,
        session: &mut EntrySession,
        new_class_id: ClassId,
    ) -> Result<()> {
        session.ensure_live()?;
        self.require_owner(session)?;
        let new_class = self.engine.registry.class(&new_class_id)?;
        let entry_id = session.entry.id;
        let _token = self.engine.fanout.acquire(FanoutSubject::Entry(entry_id))?;

        // Direct holders: re-split under the new factor set or drop.
        let existing = self.engine.store.user_access_for_entry(&entry_id)?;
        let mut holders: Vec<UserId> = existing.iter().map(|r| r.user).collect();
        holders.sort();
        holders.dedup();
        for holder in holders {
            let eligible = policy::is_eligible(
                new_class,
                &self.engine.registry,
                &self.engine.store,
                &holder,
            )?;
            if !eligible {
                warn!(entry = %entry_id, user = %holder, class = %new_class_id,
                    "holder ineligible under new class, access removed");
                self.engine.store.delete_user_access(&holder, &entry_id)?;
                session.entry.shared_users.remove(&holder);
                continue;
            }
            let wrapped =
                keystore::wrap_key_for_user(self.engine, &holder, new_class, &session.data_key)?;
            let fresh: Vec<KeyPairId> = wrapped.iter().map(|w| w.key_pair).collect();
            for share in wrapped {
                self.engine.store.put_user_access(UserAccessRecord {
                    user: holder,
                    entry: entry_id,
                    key_pair: share.key_pair,
                    wrapped_share: share.blob,
                    mac: RecordMac::unsealed(),
                })?;
            }
            for record in existing.iter().filter(|r| r.user == holder) {
                if !fresh.contains(&record.key_pair) {
                    self.engine.store.delete_user_access_record(
                        &holder,
                        &entry_id,
                        &record.key_pair,
                    )?;
                }
            }
        }

        // Group holders: rewrap under the group's key pair for the new
        // class, or drop groups not enrolled in it.
        for access in self.engine.store.group_access_for_entry(&entry_id)? {
            match self.engine.store.group_key_pair(&access.group, &new_class_id)? {
                Some(pair) => {
                    self.engine.store.put_group_access(GroupAccessRecord {
                        group: access.group,
                        entry: entry_id,
                        wrapped_key: envelope::seal(
                            &pair.public_key,
                            session.data_key.as_bytes(),
                        )?,
                        mac: RecordMac::unsealed(),
                    })?;
                }
                None => {
                    warn!(entry = %entry_id, group = %access.group, class = %new_class_id,
                        "group not enrolled in new class, access removed");
                    self.engine
                        .store
                        .delete_group_access(&access.group, &entry_id)?;
                    session.entry.shared_groups.remove(&access.group);
                }
            }
        }

        session.entry.security_class = new_class_id;
        self.engine.store.put_entry(session.entry.clone())?;
        session.state = EntryState::Saved;
        info!(entry = %entry_id, class = %new_class_id, "security class migrated");
        Ok(())
    }

    /// Transfer ownership. The prior owner loses its distinguished status
    /// and its direct access; the new owner is granted an access path. All
    /// active capability links of the entry are deactivated.
    pub fn change_owner(&self, session: &mut EntrySession, new_owner: ActorId) -> Result<()> {
        session.ensure_live()?;
        self.require_owner(session)?;
        let entry_id = session.entry.id;
        let class_id = session.entry.security_class;
        let previous = session.entry.owner;
        if previous == new_owner {
            return Ok(());
        }

        match new_owner {
            ActorId::User(user) => {
                if !self.engine.directory.user_exists(&user) {
                    return Err(VaultError::NotFound(format!("user {user}")));
                }
                self.grant_user_access(&entry_id, &class_id, &session.data_key, &user)?;
                session.entry.shared_users.remove(&user);
            }
            ActorId::Group(group) => {
                if !self.engine.directory.group_exists(&group) {
                    return Err(VaultError::NotFound(format!("group {group}")));
                }
                self.grant_group_access(&entry_id, &class_id, &session.data_key, &group)?;
                session.entry.shared_groups.remove(&group);
            }
        }

        match previous {
            ActorId::User(user) => self.engine.store.delete_user_access(&user, &entry_id)?,
            ActorId::Group(group) => self.engine.store.delete_group_access(&group, &entry_id)?,
        }

        session.entry.owner = new_owner;
        self.engine.store.put_entry(session.entry.clone())?;
        session.state = EntryState::OwnerChanged;

        // Domain event consumed by the link issuer: links issued under the
        // previous owner's policy do not survive the transfer.
        self.engine.links().handle_owner_change(&entry_id)?;
        info!(entry = %entry_id, from = %previous, to = %new_owner, "ownership transferred");
        Ok(())
    }

    /// DELETE with full cascade: access records, capability links, entry.
    pub fn delete(&self, acting: UserId, entry_id: &EntryId) -> Result<()> {
        let entry = self.engine.store.require_entry(entry_id)?;
        let permitted = match entry.owner {
            ActorId::User(owner) => {
                owner == acting || self.engine.permissions.is_super_actor(&acting)
            }
            ActorId::Group(group) => {
                self.engine.permissions.is_super_actor(&acting)
                    || self.engine.directory.is_group_admin(&acting, &group)
                    || self
                        .engine
                        .permissions
                        .may_delete_group_entries(&acting, &group)
            }
        };
        if !permitted {
            return Err(VaultError::PermissionDenied(format!(
                "user {acting} may not delete entry {entry_id}"
            )));
        }
        delete_entry_cascade(self.engine, entry_id)?;
        info!(entry = %entry_id, by = %acting, "entry deleted");
        Ok(())
    }

    /// Split-and-wrap the session's data key for a user. Idempotent no-op if
    /// direct access already exists.
    pub fn create_user_access(&self, session: &EntrySession, target: UserId) -> Result<()> {
        if !self
            .engine
            .store
            .user_access(&target, &session.entry.id)?
            .is_empty()
        {
            return Ok(());
        }
        self.grant_user_access(
            &session.entry.id,
            &session.entry.security_class,
            &session.data_key,
            &target,
        )
    }

    /// Wrap the session's data key under a group's public key. Idempotent
    /// no-op if group access already exists.
    pub fn create_group_access(&self, session: &EntrySession, target: GroupId) -> Result<()> {
        if self
            .engine
            .store
            .group_access(&target, &session.entry.id)?
            .is_some()
        {
            return Ok(());
        }
        self.grant_group_access(
            &session.entry.id,
            &session.entry.security_class,
            &session.data_key,
            &target,
        )
    }

    fn grant_user_access(
        &self,
        entry_id: &EntryId,
        class_id: &ClassId,
        data_key: &SymmetricKey,
        user: &UserId,
    ) -> Result<()> {
        let class = self.engine.registry.class(class_id)?;
        if !policy::is_eligible(class, &self.engine.registry, &self.engine.store, user)? {
            return Err(VaultError::Eligibility(format!(
                "user {user} is not enrolled for all factors of class {class_id}"
            )));
        }
        let wrapped = keystore::wrap_key_for_user(self.engine, user, class, data_key)?;
        for share in wrapped {
            self.engine.store.put_user_access(UserAccessRecord {
                user: *user,
                entry: *entry_id,
                key_pair: share.key_pair,
                wrapped_share: share.blob,
                mac: RecordMac::unsealed(),
            })?;
        }
        Ok(())
    }

    fn grant_group_access(
        &self,
        entry_id: &EntryId,
        class_id: &ClassId,
        data_key: &SymmetricKey,
        group: &GroupId,
    ) -> Result<()> {
        let pair = self
            .engine
            .store
            .group_key_pair(group, class_id)?
            .ok_or_else(|| {
                VaultError::Eligibility(format!(
                    "group {group} holds no key pair for class {class_id}"
                ))
            })?;
        self.engine.store.put_group_access(GroupAccessRecord {
            group: *group,
            entry: *entry_id,
            wrapped_key: envelope::seal(&pair.public_key, data_key.as_bytes())?,
            mac: RecordMac::unsealed(),
        })?;
        Ok(())
    }

    /// EDIT-level ownership check: the acting user is the owner, or a member
    /// of the owning group.
    fn require_owner(&self, session: &EntrySession) -> Result<()> {
        let permitted = match session.entry.owner {
            ActorId::User(owner) => owner == session.actor,
            ActorId::Group(group) => self
                .engine
                .directory
                .group_members(&group)?
                .contains(&session.actor),
        };
        if permitted {
            Ok(())
        } else {
            Err(VaultError::PermissionDenied(format!(
                "user {} is not the owner of entry {}",
                session.actor, session.entry.id
            )))
        }
    }
}

/// Delete an entry and everything hanging off it: direct access records,
/// group access records, capability links, then the entry row itself.
pub(crate) fn delete_entry_cascade(engine: &Engine, entry_id: &EntryId) -> Result<()> {
    for record in engine.store.user_access_for_entry(entry_id)? {
        engine
            .store
            .delete_user_access_record(&record.user, entry_id, &record.key_pair)?;
    }
    for access in engine.store.group_access_for_entry(entry_id)? {
        engine.store.delete_group_access(&access.group, entry_id)?;
    }
    for link in engine.store.links_for_entry(entry_id)? {
        engine.store.delete_link(&link.id)?;
    }
    engine.store.delete_entry(entry_id)
}
