//! Shared test fixture: an engine wired with in-memory fakes for the actor
//! directory, permission checker, and auth plugins.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use vault_engine::directory::{ActorDirectory, AuthPlugin, PermissionChecker};
use vault_engine::{
    ClassId, Engine, EngineConfig, GroupId, KdfCost, MemoryStore, PluginId, Registry, Result,
    SecurityClass, SymmetricKey, SystemKeys, UserId,
};

/// Factor plugin fake: registration and session authentication are plain
/// sets, and the derived key is deterministic per (plugin, user).
pub struct FakePlugin {
    id: PluginId,
    registered: Mutex<HashSet<UserId>>,
    authenticated: Mutex<HashSet<UserId>>,
}

impl FakePlugin {
    pub fn new(id: PluginId) -> Self {
        Self {
            id,
            registered: Mutex::new(HashSet::new()),
            authenticated: Mutex::new(HashSet::new()),
        }
    }

    pub fn register(&self, user: UserId) {
        self.registered.lock().unwrap().insert(user);
    }

    pub fn unregister(&self, user: &UserId) {
        self.registered.lock().unwrap().remove(user);
        self.authenticated.lock().unwrap().remove(user);
    }

    pub fn authenticate(&self, user: UserId) {
        self.authenticated.lock().unwrap().insert(user);
    }

    pub fn deauthenticate(&self, user: &UserId) {
        self.authenticated.lock().unwrap().remove(user);
    }
}

impl AuthPlugin for FakePlugin {
    fn id(&self) -> &PluginId {
        &self.id
    }

    fn is_registered(&self, user: &UserId) -> bool {
        self.registered.lock().unwrap().contains(user)
    }

    fn is_authenticated(&self, user: &UserId) -> bool {
        self.authenticated.lock().unwrap().contains(user)
    }

    fn derived_key(&self, user: &UserId) -> Result<SymmetricKey> {
        let context = format!("test factor {}", self.id);
        let key = blake3::derive_key(&context, user.0.as_bytes());
        Ok(SymmetricKey::from_bytes(key))
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    users: Mutex<HashSet<UserId>>,
    groups: Mutex<HashMap<GroupId, Vec<UserId>>>,
    admins: Mutex<HashSet<(UserId, GroupId)>>,
}

impl FakeDirectory {
    pub fn add_user(&self) -> UserId {
        let user = UserId::generate();
        self.users.lock().unwrap().insert(user);
        user
    }

    pub fn add_group(&self, members: &[UserId]) -> GroupId {
        let group = GroupId::generate();
        self.groups.lock().unwrap().insert(group, members.to_vec());
        group
    }

    pub fn set_members(&self, group: GroupId, members: &[UserId]) {
        self.groups.lock().unwrap().insert(group, members.to_vec());
    }

    pub fn make_admin(&self, user: UserId, group: GroupId) {
        self.admins.lock().unwrap().insert((user, group));
    }
}

impl ActorDirectory for FakeDirectory {
    fn user_exists(&self, user: &UserId) -> bool {
        self.users.lock().unwrap().contains(user)
    }

    fn group_exists(&self, group: &GroupId) -> bool {
        self.groups.lock().unwrap().contains_key(group)
    }

    fn group_members(&self, group: &GroupId) -> Result<Vec<UserId>> {
        Ok(self
            .groups
            .lock()
            .unwrap()
            .get(group)
            .cloned()
            .unwrap_or_default())
    }

    fn is_group_admin(&self, user: &UserId, group: &GroupId) -> bool {
        self.admins.lock().unwrap().contains(&(*user, *group))
    }
}

/// Everyone may share by default; the deny/grant sets override per test.
#[derive(Default)]
pub struct FakePermissions {
    share_denied: Mutex<HashSet<UserId>>,
    super_actors: Mutex<HashSet<UserId>>,
    group_deleters: Mutex<HashSet<(UserId, GroupId)>>,
}

impl FakePermissions {
    pub fn deny_share(&self, user: UserId) {
        self.share_denied.lock().unwrap().insert(user);
    }

    pub fn make_super(&self, user: UserId) {
        self.super_actors.lock().unwrap().insert(user);
    }

    pub fn allow_group_delete(&self, user: UserId, group: GroupId) {
        self.group_deleters.lock().unwrap().insert((user, group));
    }
}

impl PermissionChecker for FakePermissions {
    fn may_share(&self, user: &UserId) -> bool {
        !self.share_denied.lock().unwrap().contains(user)
    }

    fn may_share_group(&self, user: &UserId, _group: &GroupId) -> bool {
        self.may_share(user)
    }

    fn may_delete_group_entries(&self, user: &UserId, group: &GroupId) -> bool {
        self.group_deleters.lock().unwrap().contains(&(*user, *group))
    }

    fn is_super_actor(&self, user: &UserId) -> bool {
        self.super_actors.lock().unwrap().contains(user)
    }
}

pub struct TestVault {
    pub engine: Engine,
    pub backend: Arc<MemoryStore>,
    pub directory: Arc<FakeDirectory>,
    pub permissions: Arc<FakePermissions>,
    pub plugins: Vec<Arc<FakePlugin>>,
}

impl TestVault {
    /// Engine with one security class of `n` factor plugins and recovery
    /// threshold `t`. Plugins are named "factor-0".."factor-n".
    pub fn with_class(n: usize, t: u8) -> (Self, ClassId) {
        let indices: Vec<usize> = (0..n).collect();
        let (tv, mut classes) = Self::with_classes(n, &[(&indices, t)]);
        (tv, classes.remove(0))
    }

    /// Engine with `n_plugins` factor plugins and one security class per
    /// `(plugin indices, threshold)` entry.
    pub fn with_classes(n_plugins: usize, classes: &[(&[usize], u8)]) -> (Self, Vec<ClassId>) {
        let mut registry = Registry::new();
        let mut plugins = Vec::with_capacity(n_plugins);
        for i in 0..n_plugins {
            let plugin = Arc::new(FakePlugin::new(PluginId::new(format!("factor-{i}"))));
            registry.register_plugin(plugin.clone()).unwrap();
            plugins.push(plugin);
        }
        let mut class_ids = Vec::with_capacity(classes.len());
        for (indices, t) in classes {
            let class_id = ClassId::generate();
            registry
                .register_class(SecurityClass {
                    id: class_id,
                    label: format!("class {t}-of-{}", indices.len()),
                    factor_plugins: indices.iter().map(|&i| plugins[i].id().clone()).collect(),
                    required_factors: *t,
                })
                .unwrap();
            class_ids.push(class_id);
        }

        let backend = Arc::new(MemoryStore::new());
        let directory = Arc::new(FakeDirectory::default());
        let permissions = Arc::new(FakePermissions::default());
        let mut config = EngineConfig::new(SystemKeys::generate());
        // Keep link-password derivation fast in tests.
        config.kdf = KdfCost {
            m_kib: 32,
            t: 1,
            p: 1,
        };
        let engine = Engine::new(
            config,
            backend.clone(),
            registry,
            directory.clone(),
            permissions.clone(),
        );
        (
            Self {
                engine,
                backend,
                directory,
                permissions,
                plugins,
            },
            class_ids,
        )
    }

    /// Create a user registered and enrolled for all factors, authenticated
    /// for the given plugin indices.
    pub fn user_with_factors(&self, authenticated: &[usize]) -> UserId {
        let enrolled: Vec<usize> = (0..self.plugins.len()).collect();
        self.user_with_enrollment(&enrolled, authenticated)
    }

    /// Create a user registered with every plugin but enrolled only for the
    /// given subset, authenticated for `authenticated`.
    pub fn user_with_enrollment(&self, enrolled: &[usize], authenticated: &[usize]) -> UserId {
        let user = self.directory.add_user();
        for plugin in &self.plugins {
            plugin.register(user);
        }
        for &i in authenticated {
            self.plugins[i].authenticate(user);
        }
        let keys = self.engine.user_keys(user).unwrap();
        for &i in enrolled {
            keys.enroll_factor(self.plugins[i].id()).unwrap();
        }
        user
    }
}
