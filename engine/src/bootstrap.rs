//! Engine configuration and wiring.
//!
//! All collaborators (store backend, auth plugins, directory, permission
//! checker) are injected here once at startup; nothing in the engine is
//! global or static.

use std::sync::Arc;

use crate::crypto::envelope::SymmetricKey;
use crate::directory::{ActorDirectory, PermissionChecker};
use crate::entry::EntryManager;
use crate::error::{Result, VaultError};
use crate::keystore::{GroupKeyStore, UserKeyStore};
use crate::link::LinkIssuer;
use crate::registry::Registry;
use crate::store::{CryptoStore, FanoutGuard, Store};
use crate::types::{GroupId, UserId};

/// Argon2id cost parameters for capability-link password derivation.
#[derive(Debug, Clone, Copy)]
pub struct KdfCost {
    pub m_kib: u32,
    pub t: u32,
    pub p: u32,
}

impl Default for KdfCost {
    fn default() -> Self {
        // Memory-hard enough for bearer-link passwords without making a
        // single decode take seconds.
        KdfCost {
            m_kib: 64 * 1024,
            t: 3,
            p: 1,
        }
    }
}

/// System-level keys held outside any payload encryption path.
pub struct SystemKeys {
    /// Keys every persisted record's storage MAC.
    pub mac_key: SymmetricKey,
    /// Encrypts capability-link access descriptors.
    pub link_key: SymmetricKey,
}

impl SystemKeys {
    pub fn generate() -> Self {
        SystemKeys {
            mac_key: SymmetricKey::generate(),
            link_key: SymmetricKey::generate(),
        }
    }

    /// Load from raw key material, e.g. a host-managed secret file.
    pub fn from_bytes(mac_key: &[u8], link_key: &[u8]) -> Result<Self> {
        Ok(SystemKeys {
            mac_key: SymmetricKey::from_slice(mac_key)?,
            link_key: SymmetricKey::from_slice(link_key)?,
        })
    }

    /// Load from hex strings as they appear in host configuration.
    pub fn from_hex(mac_key: &str, link_key: &str) -> Result<Self> {
        let decode = |s: &str| {
            hex::decode(s)
                .map_err(|e| VaultError::Validation(format!("bad hex key material: {e}")))
        };
        Self::from_bytes(&decode(mac_key)?, &decode(link_key)?)
    }
}

pub struct EngineConfig {
    pub system_keys: SystemKeys,
    pub kdf: KdfCost,
}

impl EngineConfig {
    pub fn new(system_keys: SystemKeys) -> Self {
        EngineConfig {
            system_keys,
            kdf: KdfCost::default(),
        }
    }
}

/// The assembled engine. Handed to the host request layer; all operations
/// are synchronous and scoped to a single actor request.
pub struct Engine {
    pub(crate) store: CryptoStore,
    pub(crate) registry: Registry,
    pub(crate) directory: Arc<dyn ActorDirectory>,
    pub(crate) permissions: Arc<dyn PermissionChecker>,
    pub(crate) link_key: SymmetricKey,
    pub(crate) kdf: KdfCost,
    pub(crate) fanout: FanoutGuard,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn Store>,
        registry: Registry,
        directory: Arc<dyn ActorDirectory>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        Engine {
            store: CryptoStore::new(backend, config.system_keys.mac_key),
            registry,
            directory,
            permissions,
            link_key: config.system_keys.link_key,
            kdf: config.kdf,
            fanout: FanoutGuard::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &CryptoStore {
        &self.store
    }

    /// Key-store view for one user actor.
    pub fn user_keys(&self, user: UserId) -> Result<UserKeyStore<'_>> {
        if !self.directory.user_exists(&user) {
            return Err(VaultError::NotFound(format!("user {user}")));
        }
        Ok(UserKeyStore::new(self, user))
    }

    /// Key-store view for one group actor.
    pub fn group_keys(&self, group: GroupId) -> Result<GroupKeyStore<'_>> {
        if !self.directory.group_exists(&group) {
            return Err(VaultError::NotFound(format!("group {group}")));
        }
        Ok(GroupKeyStore::new(self, group))
    }

    pub fn entries(&self) -> EntryManager<'_> {
        EntryManager::new(self)
    }

    pub fn links(&self) -> LinkIssuer<'_> {
        LinkIssuer::new(self)
    }
}
