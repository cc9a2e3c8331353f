//! Multi-party key management for a shared-credential vault.
//!
//! Every vault entry is encrypted under its own data key. Data keys are
//! never stored; they are threshold-split per user across that user's
//! authentication-factor key pairs, and sealed per group under the group's
//! class key pair. Recovering a key requires authenticating the threshold
//! number of factors demanded by the entry's security class.
//!
//! The engine is a passive library: the host injects the storage backend,
//! actor directory, permission checker, and factor plugins through
//! [`bootstrap::Engine::new`], then drives it with per-request views
//! ([`keystore::UserKeyStore`], [`keystore::GroupKeyStore`],
//! [`entry::EntryManager`], [`link::LinkIssuer`]).

pub mod bootstrap;
pub mod crypto;
pub mod directory;
pub mod entry;
pub mod error;
pub mod keystore;
pub mod link;
pub mod logging;
pub mod policy;
pub mod registry;
pub mod shamir;
pub mod store;
pub mod types;

pub use bootstrap::{Engine, EngineConfig, KdfCost, SystemKeys};
pub use crypto::envelope::SymmetricKey;
pub use entry::{EntryManager, EntrySession, EntryState};
pub use error::{Result, VaultError};
pub use keystore::{AccessResult, GroupKeyStore, UserKeyStore};
pub use link::{CallerContext, LinkGrant, LinkIssuer, LinkOptions};
pub use registry::Registry;
pub use store::{MemoryStore, Store};
pub use types::{
    ActorId, ClassId, EntryId, GroupId, KeyPairId, LinkId, PluginId, SecurityClass, UserId,
};
