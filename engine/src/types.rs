//! Shared data types: actor ids, persisted cryptographic records, and the
//! capability-link access descriptor.
//!
//! Every persisted record that carries cryptographic material also carries a
//! storage-level MAC (see `crypto::mac`); the `MacProtected` impls that define
//! each record's canonical field ordering live here next to the fields.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::mac::{MacInput, MacProtected, RecordMac};

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of a user actor.
    UserId
);
uuid_id!(
    /// Unique identifier of a group actor.
    GroupId
);
uuid_id!(
    /// Unique identifier of a vault entry.
    EntryId
);
uuid_id!(
    /// Unique identifier of an enrolled auth key pair.
    KeyPairId
);
uuid_id!(
    /// Unique identifier of a security class.
    ClassId
);
uuid_id!(
    /// Unique identifier of a capability link.
    LinkId
);

/// Identifier of an authentication-factor plugin (e.g. "password", "totp").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginId(pub String);

impl PluginId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An actor is either a user or a group. Ownership and sharing are expressed
/// against this opaque id; behavior differences live in the key stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorId {
    User(UserId),
    Group(GroupId),
}

impl ActorId {
    /// Canonical bytes used in MAC inputs: a kind tag followed by the uuid.
    pub fn canonical_bytes(&self) -> [u8; 17] {
        let mut out = [0u8; 17];
        match self {
            ActorId::User(id) => {
                out[0] = 1;
                out[1..].copy_from_slice(id.0.as_bytes());
            }
            ActorId::Group(id) => {
                out[0] = 2;
                out[1..].copy_from_slice(id.0.as_bytes());
            }
        }
        out
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorId::User(id) => write!(f, "user:{id}"),
            ActorId::Group(id) => write!(f, "group:{id}"),
        }
    }
}

/// Policy bundle: which factor plugins a class requires and how many of them
/// must be proven to recover a key (`required_factors` = t, plugins.len() = n).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityClass {
    pub id: ClassId,
    pub label: String,
    /// Ordered set of factor plugins. Order is stable and duplicate-free.
    pub factor_plugins: Vec<PluginId>,
    /// Recovery threshold t, 1 <= t <= factor_plugins.len().
    pub required_factors: u8,
}

/// One enrolled authentication factor of a user: an X25519 key pair whose
/// private half is AEAD-encrypted under a key only the factor plugin derives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthKeyPair {
    pub id: KeyPairId,
    pub owner: UserId,
    pub plugin: PluginId,
    pub public_key: [u8; 32],
    pub encrypted_private_key: Vec<u8>,
    pub mac: RecordMac,
}

impl MacProtected for AuthKeyPair {
    fn record_kind(&self) -> &'static str {
        "auth_key_pair"
    }

    fn mac_input(&self) -> MacInput {
        let mut input = MacInput::new(self.record_kind());
        input
            .field(self.id.0.as_bytes())
            .field(self.owner.0.as_bytes())
            .field(self.plugin.as_str().as_bytes())
            .field(&self.public_key)
            .field(&self.encrypted_private_key);
        input
    }

    fn mac(&self) -> &RecordMac {
        &self.mac
    }

    fn set_mac(&mut self, mac: RecordMac) {
        self.mac = mac;
    }
}

/// A single revision of an entry payload, pushed on every successful edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryRevision {
    pub encrypted_payload: Vec<u8>,
    pub edited_at: DateTime<Utc>,
}

/// A vault entry. Title and description are public metadata; the payload is
/// AEAD-encrypted under a per-entry data key that is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultEntry {
    pub id: EntryId,
    pub title: String,
    pub description: String,
    pub security_class: ClassId,
    pub owner: ActorId,
    pub encrypted_payload: Vec<u8>,
    pub shared_users: BTreeSet<UserId>,
    pub shared_groups: BTreeSet<GroupId>,
    pub history: Vec<EntryRevision>,
    /// Names of the fields the MAC covers, in MAC input order.
    pub mac_fields: Vec<String>,
    pub mac: RecordMac,
}

impl VaultEntry {
    /// Default MAC coverage for new entries: every persisted field, so any
    /// single-field rewrite behind the store fails the next read.
    pub fn default_mac_fields() -> Vec<String> {
        [
            "id",
            "title",
            "description",
            "security_class",
            "owner",
            "encrypted_payload",
            "shared_users",
            "shared_groups",
            "history",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Canonical bytes of the shared-user set (BTreeSet order is stable).
    fn shared_users_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.shared_users.len() * 16);
        for user in &self.shared_users {
            buf.extend_from_slice(user.0.as_bytes());
        }
        buf
    }

    fn shared_groups_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.shared_groups.len() * 16);
        for group in &self.shared_groups {
            buf.extend_from_slice(group.0.as_bytes());
        }
        buf
    }

    /// Canonical bytes of the revision history: per revision the timestamp
    /// in microseconds and the length-prefixed encrypted payload.
    fn history_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for revision in &self.history {
            buf.extend_from_slice(&revision.edited_at.timestamp_micros().to_le_bytes());
            buf.extend_from_slice(&(revision.encrypted_payload.len() as u64).to_le_bytes());
            buf.extend_from_slice(&revision.encrypted_payload);
        }
        buf
    }
}

impl MacProtected for VaultEntry {
    fn record_kind(&self) -> &'static str {
        "entry"
    }

    fn mac_input(&self) -> MacInput {
        let mut input = MacInput::new(self.record_kind());
        // The field list itself is part of the input, so a tampered list can
        // never shrink the coverage without failing verification.
        for name in &self.mac_fields {
            input.field(name.as_bytes());
            match name.as_str() {
                "id" => input.field(self.id.0.as_bytes()),
                "title" => input.field(self.title.as_bytes()),
                "description" => input.field(self.description.as_bytes()),
                "security_class" => input.field(self.security_class.0.as_bytes()),
                "owner" => input.field(&self.owner.canonical_bytes()),
                "encrypted_payload" => input.field(&self.encrypted_payload),
                "shared_users" => input.field(&self.shared_users_bytes()),
                "shared_groups" => input.field(&self.shared_groups_bytes()),
                "history" => input.field(&self.history_bytes()),
                // Unknown names still contribute their label above, which
                // guarantees a mismatch against the sealed value.
                _ => input.field(b"?"),
            };
        }
        input
    }

    fn mac(&self) -> &RecordMac {
        &self.mac
    }

    fn set_mac(&mut self, mac: RecordMac) {
        self.mac = mac;
    }
}

/// Direct user-to-entry access: one row per (user, factor), each holding one
/// threshold share of the entry data key sealed under that factor's key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccessRecord {
    pub user: UserId,
    pub entry: EntryId,
    pub key_pair: KeyPairId,
    pub wrapped_share: Vec<u8>,
    pub mac: RecordMac,
}

impl MacProtected for UserAccessRecord {
    fn record_kind(&self) -> &'static str {
        "user_access"
    }

    fn mac_input(&self) -> MacInput {
        let mut input = MacInput::new(self.record_kind());
        input
            .field(self.user.0.as_bytes())
            .field(self.entry.0.as_bytes())
            .field(self.key_pair.0.as_bytes())
            .field(&self.wrapped_share);
        input
    }

    fn mac(&self) -> &RecordMac {
        &self.mac
    }

    fn set_mac(&mut self, mac: RecordMac) {
        self.mac = mac;
    }
}

/// Group-to-entry access: one row per group holding the full data key sealed
/// under the group's public key. Members recover the group private key via
/// their own shares of the group access key, so no per-member rows exist here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAccessRecord {
    pub group: GroupId,
    pub entry: EntryId,
    pub wrapped_key: Vec<u8>,
    pub mac: RecordMac,
}

impl MacProtected for GroupAccessRecord {
    fn record_kind(&self) -> &'static str {
        "group_access"
    }

    fn mac_input(&self) -> MacInput {
        let mut input = MacInput::new(self.record_kind());
        input
            .field(self.group.0.as_bytes())
            .field(self.entry.0.as_bytes())
            .field(&self.wrapped_key);
        input
    }

    fn mac(&self) -> &RecordMac {
        &self.mac
    }

    fn set_mac(&mut self, mac: RecordMac) {
        self.mac = mac;
    }
}

/// One X25519 key pair per (group, security class); the private half is
/// AEAD-encrypted under the group access key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupKeyPair {
    pub group: GroupId,
    pub security_class: ClassId,
    pub public_key: [u8; 32],
    pub encrypted_private_key: Vec<u8>,
    pub mac: RecordMac,
}

impl MacProtected for GroupKeyPair {
    fn record_kind(&self) -> &'static str {
        "group_key_pair"
    }

    fn mac_input(&self) -> MacInput {
        let mut input = MacInput::new(self.record_kind());
        input
            .field(self.group.0.as_bytes())
            .field(self.security_class.0.as_bytes())
            .field(&self.public_key)
            .field(&self.encrypted_private_key);
        input
    }

    fn mac(&self) -> &RecordMac {
        &self.mac
    }

    fn set_mac(&mut self, mac: RecordMac) {
        self.mac = mac;
    }
}

/// A member's share of a group access key: one row per (member, factor),
/// sealed under the member's key pair for that factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserToGroupShare {
    pub user: UserId,
    pub group: GroupId,
    pub security_class: ClassId,
    pub key_pair: KeyPairId,
    pub wrapped_share: Vec<u8>,
    pub mac: RecordMac,
}

impl MacProtected for UserToGroupShare {
    fn record_kind(&self) -> &'static str {
        "user_group_share"
    }

    fn mac_input(&self) -> MacInput {
        let mut input = MacInput::new(self.record_kind());
        input
            .field(self.user.0.as_bytes())
            .field(self.group.0.as_bytes())
            .field(self.security_class.0.as_bytes())
            .field(self.key_pair.0.as_bytes())
            .field(&self.wrapped_share);
        input
    }

    fn mac(&self) -> &RecordMac {
        &self.mac
    }

    fn set_mac(&mut self, mac: RecordMac) {
        self.mac = mac;
    }
}

/// Bearer access to exactly one entry. Everything scoping the grant lives in
/// the descriptor, which is AEAD-encrypted under the system link key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityLink {
    pub id: LinkId,
    pub entry: EntryId,
    pub active: bool,
    pub encrypted_descriptor: Vec<u8>,
    pub mac: RecordMac,
}

impl MacProtected for CapabilityLink {
    fn record_kind(&self) -> &'static str {
        "capability_link"
    }

    fn mac_input(&self) -> MacInput {
        let mut input = MacInput::new(self.record_kind());
        input
            .field(self.id.0.as_bytes())
            .field(self.entry.0.as_bytes())
            .field(&[self.active as u8])
            .field(&self.encrypted_descriptor);
        input
    }

    fn mac(&self) -> &RecordMac {
        &self.mac
    }

    fn set_mac(&mut self, mac: RecordMac) {
        self.mac = mac;
    }
}

/// One recorded use of a capability link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCall {
    pub at: DateTime<Utc>,
    pub caller: String,
}

/// Decrypted contents of a capability link. Never persisted in the clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDescriptor {
    /// Bearer token digest the presented value is compared against.
    pub hash: [u8; 32],
    pub valid_until: Option<DateTime<Utc>>,
    pub max_calls: Option<u32>,
    pub call_count: u32,
    pub calls: Vec<LinkCall>,
    pub password_protected: bool,
    pub encryption_salt: [u8; 16],
    /// Entry data key, AEAD-wrapped under the link key or a password-derived key.
    pub wrapped_data_key: Vec<u8>,
}
