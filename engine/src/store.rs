//! Schema-level persistence contract and the in-memory backend.
//!
//! `Store` is the raw relational contract (Entries, UserAccessRecords,
//! GroupAccessRecords, GroupKeyPairs, UserToGroupShares, AuthKeyPairs,
//! CapabilityLinks). `MemoryStore` backs it with RwLock'd maps for tests and
//! embedding; a host can swap in a database-backed impl.
//!
//! Domain code never talks to `Store` directly: it goes through
//! `CryptoStore`, which seals the storage MAC on every write and verifies it
//! on every read, so a tampered row is refused before any field is used.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use crate::crypto::envelope::SymmetricKey;
use crate::crypto::mac::{self, MacProtected};
use crate::error::{Result, VaultError};
use crate::types::{
    AuthKeyPair, CapabilityLink, ClassId, EntryId, GroupAccessRecord, GroupId, GroupKeyPair,
    KeyPairId, LinkId, PluginId, UserAccessRecord, UserId, UserToGroupShare, VaultEntry,
};

/// Raw persistence contract over the seven relations.
pub trait Store: Send + Sync {
    // Entries
    fn put_entry(&self, entry: VaultEntry) -> Result<()>;
    fn get_entry(&self, id: &EntryId) -> Result<Option<VaultEntry>>;
    fn delete_entry(&self, id: &EntryId) -> Result<()>;
    fn list_entries(&self) -> Result<Vec<VaultEntry>>;

    // User access records, keyed (user, entry, key_pair)
    fn put_user_access(&self, record: UserAccessRecord) -> Result<()>;
    fn user_access(&self, user: &UserId, entry: &EntryId) -> Result<Vec<UserAccessRecord>>;
    fn user_access_for_entry(&self, entry: &EntryId) -> Result<Vec<UserAccessRecord>>;
    /// Entry ids for which this user holds any direct record.
    fn user_access_entries(&self, user: &UserId) -> Result<Vec<EntryId>>;
    fn delete_user_access(&self, user: &UserId, entry: &EntryId) -> Result<()>;
    fn delete_user_access_record(
        &self,
        user: &UserId,
        entry: &EntryId,
        key_pair: &KeyPairId,
    ) -> Result<()>;

    // Group access records, keyed (group, entry)
    fn put_group_access(&self, record: GroupAccessRecord) -> Result<()>;
    fn group_access(&self, group: &GroupId, entry: &EntryId)
        -> Result<Option<GroupAccessRecord>>;
    fn group_access_for_entry(&self, entry: &EntryId) -> Result<Vec<GroupAccessRecord>>;
    fn group_access_for_group(&self, group: &GroupId) -> Result<Vec<GroupAccessRecord>>;
    fn delete_group_access(&self, group: &GroupId, entry: &EntryId) -> Result<()>;

    // Group key pairs, keyed (group, class)
    fn put_group_key_pair(&self, record: GroupKeyPair) -> Result<()>;
    fn group_key_pair(&self, group: &GroupId, class: &ClassId) -> Result<Option<GroupKeyPair>>;
    fn group_key_pairs(&self, group: &GroupId) -> Result<Vec<GroupKeyPair>>;
    fn delete_group_key_pair(&self, group: &GroupId, class: &ClassId) -> Result<()>;

    // User-to-group shares, keyed (user, group, class, key_pair)
    fn put_group_share(&self, record: UserToGroupShare) -> Result<()>;
    fn group_shares(
        &self,
        user: &UserId,
        group: &GroupId,
        class: &ClassId,
    ) -> Result<Vec<UserToGroupShare>>;
    fn group_shares_for_class(
        &self,
        group: &GroupId,
        class: &ClassId,
    ) -> Result<Vec<UserToGroupShare>>;
    /// (group, class) pairs this user holds shares for.
    fn group_share_subjects(&self, user: &UserId) -> Result<Vec<(GroupId, ClassId)>>;
    /// Distinct users holding any share of this group's access keys.
    fn group_holders(&self, group: &GroupId) -> Result<Vec<UserId>>;
    fn delete_group_shares(&self, user: &UserId, group: &GroupId) -> Result<()>;
    fn delete_group_share_record(
        &self,
        user: &UserId,
        group: &GroupId,
        class: &ClassId,
        key_pair: &KeyPairId,
    ) -> Result<()>;
    fn delete_group_shares_for_class(&self, group: &GroupId, class: &ClassId) -> Result<()>;

    // Auth key pairs
    fn put_auth_key_pair(&self, record: AuthKeyPair) -> Result<()>;
    fn auth_key_pair(&self, user: &UserId, plugin: &PluginId) -> Result<Option<AuthKeyPair>>;
    fn auth_key_pair_by_id(&self, id: &KeyPairId) -> Result<Option<AuthKeyPair>>;
    fn auth_key_pairs_for_user(&self, user: &UserId) -> Result<Vec<AuthKeyPair>>;
    fn delete_auth_key_pair(&self, id: &KeyPairId) -> Result<()>;

    // Capability links
    fn put_link(&self, link: CapabilityLink) -> Result<()>;
    fn get_link(&self, id: &LinkId) -> Result<Option<CapabilityLink>>;
    fn links_for_entry(&self, entry: &EntryId) -> Result<Vec<CapabilityLink>>;
    fn active_links(&self) -> Result<Vec<CapabilityLink>>;
    fn delete_link(&self, id: &LinkId) -> Result<()>;
}

#[derive(Default)]
struct MemoryTables {
    entries: HashMap<EntryId, VaultEntry>,
    user_access: HashMap<(UserId, EntryId, KeyPairId), UserAccessRecord>,
    group_access: HashMap<(GroupId, EntryId), GroupAccessRecord>,
    group_key_pairs: HashMap<(GroupId, ClassId), GroupKeyPair>,
    group_shares: HashMap<(UserId, GroupId, ClassId, KeyPairId), UserToGroupShare>,
    auth_key_pairs: HashMap<KeyPairId, AuthKeyPair>,
    links: HashMap<LinkId, CapabilityLink>,
}

/// In-memory backend. Individual puts/deletes are atomic per row, matching
/// the re-encryption fan-out model of independent per-record updates.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, MemoryTables>> {
        self.tables
            .read()
            .map_err(|_| VaultError::Storage("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, MemoryTables>> {
        self.tables
            .write()
            .map_err(|_| VaultError::Storage("store lock poisoned".to_string()))
    }
}

impl Store for MemoryStore {
    fn put_entry(&self, entry: VaultEntry) -> Result<()> {
        self.write()?.entries.insert(entry.id, entry);
        Ok(())
    }

    fn get_entry(&self, id: &EntryId) -> Result<Option<VaultEntry>> {
        Ok(self.read()?.entries.get(id).cloned())
    }

    fn delete_entry(&self, id: &EntryId) -> Result<()> {
        self.write()?.entries.remove(id);
        Ok(())
    }

    fn list_entries(&self) -> Result<Vec<VaultEntry>> {
        Ok(self.read()?.entries.values().cloned().collect())
    }

    fn put_user_access(&self, record: UserAccessRecord) -> Result<()> {
        self.write()?
            .user_access
            .insert((record.user, record.entry, record.key_pair), record);
        Ok(())
    }

    fn user_access(&self, user: &UserId, entry: &EntryId) -> Result<Vec<UserAccessRecord>> {
        Ok(self
            .read()?
            .user_access
            .values()
            .filter(|r| &r.user == user && &r.entry == entry)
            .cloned()
            .collect())
    }

    fn user_access_for_entry(&self, entry: &EntryId) -> Result<Vec<UserAccessRecord>> {
        Ok(self
            .read()?
            .user_access
            .values()
            .filter(|r| &r.entry == entry)
            .cloned()
            .collect())
    }

    fn user_access_entries(&self, user: &UserId) -> Result<Vec<EntryId>> {
        let guard = self.read()?;
        let mut entries: Vec<EntryId> = guard
            .user_access
            .values()
            .filter(|r| &r.user == user)
            .map(|r| r.entry)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn delete_user_access(&self, user: &UserId, entry: &EntryId) -> Result<()> {
        self.write()?
            .user_access
            .retain(|(u, e, _), _| !(u == user && e == entry));
        Ok(())
    }

    fn delete_user_access_record(
        &self,
        user: &UserId,
        entry: &EntryId,
        key_pair: &KeyPairId,
    ) -> Result<()> {
        self.write()?.user_access.remove(&(*user, *entry, *key_pair));
        Ok(())
    }

    fn put_group_access(&self, record: GroupAccessRecord) -> Result<()> {
        self.write()?
            .group_access
            .insert((record.group, record.entry), record);
        Ok(())
    }

    fn group_access(
        &self,
        group: &GroupId,
        entry: &EntryId,
    ) -> Result<Option<GroupAccessRecord>> {
        Ok(self.read()?.group_access.get(&(*group, *entry)).cloned())
    }

    fn group_access_for_entry(&self, entry: &EntryId) -> Result<Vec<GroupAccessRecord>> {
        Ok(self
            .read()?
            .group_access
            .values()
            .filter(|r| &r.entry == entry)
            .cloned()
            .collect())
    }

    fn group_access_for_group(&self, group: &GroupId) -> Result<Vec<GroupAccessRecord>> {
        Ok(self
            .read()?
            .group_access
            .values()
            .filter(|r| &r.group == group)
            .cloned()
            .collect())
    }

    fn delete_group_access(&self, group: &GroupId, entry: &EntryId) -> Result<()> {
        self.write()?.group_access.remove(&(*group, *entry));
        Ok(())
    }

    fn put_group_key_pair(&self, record: GroupKeyPair) -> Result<()> {
        self.write()?
            .group_key_pairs
            .insert((record.group, record.security_class), record);
        Ok(())
    }

    fn group_key_pair(&self, group: &GroupId, class: &ClassId) -> Result<Option<GroupKeyPair>> {
        Ok(self.read()?.group_key_pairs.get(&(*group, *class)).cloned())
    }

    fn group_key_pairs(&self, group: &GroupId) -> Result<Vec<GroupKeyPair>> {
        Ok(self
            .read()?
            .group_key_pairs
            .values()
            .filter(|r| &r.group == group)
            .cloned()
            .collect())
    }

    fn delete_group_key_pair(&self, group: &GroupId, class: &ClassId) -> Result<()> {
        self.write()?.group_key_pairs.remove(&(*group, *class));
        Ok(())
    }

    fn put_group_share(&self, record: UserToGroupShare) -> Result<()> {
        self.write()?.group_shares.insert(
            (
                record.user,
                record.group,
                record.security_class,
                record.key_pair,
            ),
            record,
        );
        Ok(())
    }

    fn group_shares(
        &self,
        user: &UserId,
        group: &GroupId,
        class: &ClassId,
    ) -> Result<Vec<UserToGroupShare>> {
        Ok(self
            .read()?
            .group_shares
            .values()
            .filter(|r| &r.user == user && &r.group == group && &r.security_class == class)
            .cloned()
            .collect())
    }

    fn group_shares_for_class(
        &self,
        group: &GroupId,
        class: &ClassId,
    ) -> Result<Vec<UserToGroupShare>> {
        Ok(self
            .read()?
            .group_shares
            .values()
            .filter(|r| &r.group == group && &r.security_class == class)
            .cloned()
            .collect())
    }

    fn group_share_subjects(&self, user: &UserId) -> Result<Vec<(GroupId, ClassId)>> {
        let guard = self.read()?;
        let mut subjects: Vec<(GroupId, ClassId)> = guard
            .group_shares
            .values()
            .filter(|r| &r.user == user)
            .map(|r| (r.group, r.security_class))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        subjects.sort();
        Ok(subjects)
    }

    fn group_holders(&self, group: &GroupId) -> Result<Vec<UserId>> {
        let guard = self.read()?;
        let mut holders: Vec<UserId> = guard
            .group_shares
            .values()
            .filter(|r| &r.group == group)
            .map(|r| r.user)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        holders.sort();
        Ok(holders)
    }

    fn delete_group_shares(&self, user: &UserId, group: &GroupId) -> Result<()> {
        self.write()?
            .group_shares
            .retain(|(u, g, _, _), _| !(u == user && g == group));
        Ok(())
    }

    fn delete_group_share_record(
        &self,
        user: &UserId,
        group: &GroupId,
        class: &ClassId,
        key_pair: &KeyPairId,
    ) -> Result<()> {
        self.write()?
            .group_shares
            .remove(&(*user, *group, *class, *key_pair));
        Ok(())
    }

    fn delete_group_shares_for_class(&self, group: &GroupId, class: &ClassId) -> Result<()> {
        self.write()?
            .group_shares
            .retain(|(_, g, c, _), _| !(g == group && c == class));
        Ok(())
    }

    fn put_auth_key_pair(&self, record: AuthKeyPair) -> Result<()> {
        self.write()?.auth_key_pairs.insert(record.id, record);
        Ok(())
    }

    fn auth_key_pair(&self, user: &UserId, plugin: &PluginId) -> Result<Option<AuthKeyPair>> {
        Ok(self
            .read()?
            .auth_key_pairs
            .values()
            .find(|r| &r.owner == user && &r.plugin == plugin)
            .cloned())
    }

    fn auth_key_pair_by_id(&self, id: &KeyPairId) -> Result<Option<AuthKeyPair>> {
        Ok(self.read()?.auth_key_pairs.get(id).cloned())
    }

    fn auth_key_pairs_for_user(&self, user: &UserId) -> Result<Vec<AuthKeyPair>> {
        Ok(self
            .read()?
            .auth_key_pairs
            .values()
            .filter(|r| &r.owner == user)
            .cloned()
            .collect())
    }

    fn delete_auth_key_pair(&self, id: &KeyPairId) -> Result<()> {
        self.write()?.auth_key_pairs.remove(id);
        Ok(())
    }

    fn put_link(&self, link: CapabilityLink) -> Result<()> {
        self.write()?.links.insert(link.id, link);
        Ok(())
    }

    fn get_link(&self, id: &LinkId) -> Result<Option<CapabilityLink>> {
        Ok(self.read()?.links.get(id).cloned())
    }

    fn links_for_entry(&self, entry: &EntryId) -> Result<Vec<CapabilityLink>> {
        Ok(self
            .read()?
            .links
            .values()
            .filter(|l| &l.entry == entry)
            .cloned()
            .collect())
    }

    fn active_links(&self) -> Result<Vec<CapabilityLink>> {
        Ok(self
            .read()?
            .links
            .values()
            .filter(|l| l.active)
            .cloned()
            .collect())
    }

    fn delete_link(&self, id: &LinkId) -> Result<()> {
        self.write()?.links.remove(id);
        Ok(())
    }
}

/// MAC-enforcing facade over the raw store. Seals every row on write and
/// verifies every row on read; domain code only ever sees verified records.
pub struct CryptoStore {
    backend: Arc<dyn Store>,
    mac_key: SymmetricKey,
}

impl CryptoStore {
    pub fn new(backend: Arc<dyn Store>, mac_key: SymmetricKey) -> Self {
        Self { backend, mac_key }
    }

    fn sealed<R: MacProtected>(&self, mut record: R) -> R {
        mac::seal(&mut record, &self.mac_key);
        record
    }

    fn verified<R: MacProtected>(&self, record: R) -> Result<R> {
        mac::verify(&record, &self.mac_key)?;
        Ok(record)
    }

    fn verified_all<R: MacProtected>(&self, records: Vec<R>) -> Result<Vec<R>> {
        records.into_iter().map(|r| self.verified(r)).collect()
    }

    fn verified_opt<R: MacProtected>(&self, record: Option<R>) -> Result<Option<R>> {
        record.map(|r| self.verified(r)).transpose()
    }

    // Entries

    pub fn put_entry(&self, entry: VaultEntry) -> Result<()> {
        self.backend.put_entry(self.sealed(entry))
    }

    pub fn get_entry(&self, id: &EntryId) -> Result<Option<VaultEntry>> {
        self.verified_opt(self.backend.get_entry(id)?)
    }

    /// Like `get_entry` but a missing row is `NotFound`.
    pub fn require_entry(&self, id: &EntryId) -> Result<VaultEntry> {
        self.get_entry(id)?
            .ok_or_else(|| VaultError::NotFound(format!("entry {id}")))
    }

    pub fn delete_entry(&self, id: &EntryId) -> Result<()> {
        self.backend.delete_entry(id)
    }

    pub fn list_entries(&self) -> Result<Vec<VaultEntry>> {
        self.verified_all(self.backend.list_entries()?)
    }

    // User access

    pub fn put_user_access(&self, record: UserAccessRecord) -> Result<()> {
        self.backend.put_user_access(self.sealed(record))
    }

    pub fn user_access(&self, user: &UserId, entry: &EntryId) -> Result<Vec<UserAccessRecord>> {
        self.verified_all(self.backend.user_access(user, entry)?)
    }

    pub fn user_access_for_entry(&self, entry: &EntryId) -> Result<Vec<UserAccessRecord>> {
        self.verified_all(self.backend.user_access_for_entry(entry)?)
    }

    pub fn user_access_entries(&self, user: &UserId) -> Result<Vec<EntryId>> {
        self.backend.user_access_entries(user)
    }

    pub fn delete_user_access(&self, user: &UserId, entry: &EntryId) -> Result<()> {
        self.backend.delete_user_access(user, entry)
    }

    pub fn delete_user_access_record(
        &self,
        user: &UserId,
        entry: &EntryId,
        key_pair: &KeyPairId,
    ) -> Result<()> {
        self.backend.delete_user_access_record(user, entry, key_pair)
    }

    // Group access

    pub fn put_group_access(&self, record: GroupAccessRecord) -> Result<()> {
        self.backend.put_group_access(self.sealed(record))
    }

    pub fn group_access(
        &self,
        group: &GroupId,
        entry: &EntryId,
    ) -> Result<Option<GroupAccessRecord>> {
        self.verified_opt(self.backend.group_access(group, entry)?)
    }

    pub fn group_access_for_entry(&self, entry: &EntryId) -> Result<Vec<GroupAccessRecord>> {
        self.verified_all(self.backend.group_access_for_entry(entry)?)
    }

    pub fn group_access_for_group(&self, group: &GroupId) -> Result<Vec<GroupAccessRecord>> {
        self.verified_all(self.backend.group_access_for_group(group)?)
    }

    pub fn delete_group_access(&self, group: &GroupId, entry: &EntryId) -> Result<()> {
        self.backend.delete_group_access(group, entry)
    }

    // Group key pairs

    pub fn put_group_key_pair(&self, record: GroupKeyPair) -> Result<()> {
        self.backend.put_group_key_pair(self.sealed(record))
    }

    pub fn group_key_pair(
        &self,
        group: &GroupId,
        class: &ClassId,
    ) -> Result<Option<GroupKeyPair>> {
        self.verified_opt(self.backend.group_key_pair(group, class)?)
    }

    pub fn require_group_key_pair(
        &self,
        group: &GroupId,
        class: &ClassId,
    ) -> Result<GroupKeyPair> {
        self.group_key_pair(group, class)?.ok_or_else(|| {
            VaultError::NotFound(format!("group key pair for group {group}, class {class}"))
        })
    }

    pub fn group_key_pairs(&self, group: &GroupId) -> Result<Vec<GroupKeyPair>> {
        self.verified_all(self.backend.group_key_pairs(group)?)
    }

    pub fn delete_group_key_pair(&self, group: &GroupId, class: &ClassId) -> Result<()> {
        self.backend.delete_group_key_pair(group, class)
    }

    // User-to-group shares

    pub fn put_group_share(&self, record: UserToGroupShare) -> Result<()> {
        self.backend.put_group_share(self.sealed(record))
    }

    pub fn group_shares(
        &self,
        user: &UserId,
        group: &GroupId,
        class: &ClassId,
    ) -> Result<Vec<UserToGroupShare>> {
        self.verified_all(self.backend.group_shares(user, group, class)?)
    }

    pub fn group_shares_for_class(
        &self,
        group: &GroupId,
        class: &ClassId,
    ) -> Result<Vec<UserToGroupShare>> {
        self.verified_all(self.backend.group_shares_for_class(group, class)?)
    }

    pub fn group_share_subjects(&self, user: &UserId) -> Result<Vec<(GroupId, ClassId)>> {
        self.backend.group_share_subjects(user)
    }

    pub fn group_holders(&self, group: &GroupId) -> Result<Vec<UserId>> {
        self.backend.group_holders(group)
    }

    pub fn delete_group_shares(&self, user: &UserId, group: &GroupId) -> Result<()> {
        self.backend.delete_group_shares(user, group)
    }

    pub fn delete_group_share_record(
        &self,
        user: &UserId,
        group: &GroupId,
        class: &ClassId,
        key_pair: &KeyPairId,
    ) -> Result<()> {
        self.backend
            .delete_group_share_record(user, group, class, key_pair)
    }

    pub fn delete_group_shares_for_class(&self, group: &GroupId, class: &ClassId) -> Result<()> {
        self.backend.delete_group_shares_for_class(group, class)
    }

    // Auth key pairs

    pub fn put_auth_key_pair(&self, record: AuthKeyPair) -> Result<()> {
        self.backend.put_auth_key_pair(self.sealed(record))
    }

    pub fn auth_key_pair(&self, user: &UserId, plugin: &PluginId) -> Result<Option<AuthKeyPair>> {
        self.verified_opt(self.backend.auth_key_pair(user, plugin)?)
    }

    pub fn require_auth_key_pair(&self, user: &UserId, plugin: &PluginId) -> Result<AuthKeyPair> {
        self.auth_key_pair(user, plugin)?.ok_or_else(|| {
            VaultError::NotFound(format!("auth key pair for user {user}, plugin {plugin}"))
        })
    }

    pub fn auth_key_pair_by_id(&self, id: &KeyPairId) -> Result<Option<AuthKeyPair>> {
        self.verified_opt(self.backend.auth_key_pair_by_id(id)?)
    }

    pub fn auth_key_pairs_for_user(&self, user: &UserId) -> Result<Vec<AuthKeyPair>> {
        self.verified_all(self.backend.auth_key_pairs_for_user(user)?)
    }

    pub fn delete_auth_key_pair(&self, id: &KeyPairId) -> Result<()> {
        self.backend.delete_auth_key_pair(id)
    }

    // Capability links

    pub fn put_link(&self, link: CapabilityLink) -> Result<()> {
        self.backend.put_link(self.sealed(link))
    }

    pub fn get_link(&self, id: &LinkId) -> Result<Option<CapabilityLink>> {
        self.verified_opt(self.backend.get_link(id)?)
    }

    pub fn require_link(&self, id: &LinkId) -> Result<CapabilityLink> {
        self.get_link(id)?
            .ok_or_else(|| VaultError::NotFound(format!("capability link {id}")))
    }

    pub fn links_for_entry(&self, entry: &EntryId) -> Result<Vec<CapabilityLink>> {
        self.verified_all(self.backend.links_for_entry(entry)?)
    }

    pub fn active_links(&self) -> Result<Vec<CapabilityLink>> {
        self.verified_all(self.backend.active_links()?)
    }

    pub fn delete_link(&self, id: &LinkId) -> Result<()> {
        self.backend.delete_link(id)
    }
}

/// Subject of a re-encryption fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanoutSubject {
    Entry(EntryId),
    Group(GroupId, ClassId),
}

impl std::fmt::Display for FanoutSubject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FanoutSubject::Entry(id) => write!(f, "entry {id}"),
            FanoutSubject::Group(g, c) => write!(f, "group {g} class {c}"),
        }
    }
}

/// Mutual-exclusion tokens for re-encryption fan-out. Fan-out is a sequence
/// of independent per-record updates; two concurrent fan-outs over the same
/// subject would interleave old- and new-generation wrappings, so the second
/// one fails fast instead.
#[derive(Default)]
pub struct FanoutGuard {
    in_flight: Mutex<HashSet<FanoutSubject>>,
}

impl FanoutGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, subject: FanoutSubject) -> Result<FanoutToken<'_>> {
        let mut in_flight = self
            .in_flight
            .lock()
            .map_err(|_| VaultError::Storage("fan-out guard poisoned".to_string()))?;
        if !in_flight.insert(subject) {
            return Err(VaultError::Validation(format!(
                "re-encryption already in progress for {subject}"
            )));
        }
        Ok(FanoutToken {
            guard: self,
            subject,
        })
    }
}

/// Held for the duration of one fan-out; released on drop.
pub struct FanoutToken<'a> {
    guard: &'a FanoutGuard,
    subject: FanoutSubject,
}

impl Drop for FanoutToken<'_> {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.guard.in_flight.lock() {
            in_flight.remove(&self.subject);
        }
    }
}
