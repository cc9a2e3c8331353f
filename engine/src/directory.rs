//! Collaborator interfaces consumed, not implemented, by the engine.
//!
//! The host wires these in at bootstrap: the actor directory resolves
//! identity and membership, auth plugins prove factors and derive the keys
//! that protect enrolled key pairs, and the permission checker evaluates the
//! non-cryptographic authorization predicates of the permission matrix.

use crate::crypto::envelope::SymmetricKey;
use crate::error::Result;
use crate::types::{GroupId, PluginId, UserId};

/// Resolves user/group existence, group membership, and group admin status.
pub trait ActorDirectory: Send + Sync {
    fn user_exists(&self, user: &UserId) -> bool;
    fn group_exists(&self, group: &GroupId) -> bool;
    fn group_members(&self, group: &GroupId) -> Result<Vec<UserId>>;
    fn is_group_admin(&self, user: &UserId, group: &GroupId) -> bool;
}

/// One authentication-factor plugin. The proof protocol itself is out of
/// scope; the engine only consumes these three capabilities.
pub trait AuthPlugin: Send + Sync {
    fn id(&self) -> &PluginId;
    /// Whether the user has registered this factor with the plugin.
    fn is_registered(&self, user: &UserId) -> bool;
    /// Whether the user has supplied a valid proof in the current session.
    fn is_authenticated(&self, user: &UserId) -> bool;
    /// Factor-specific symmetric key used to (de)wrap the private half of
    /// this factor's enrolled key pair. Only the plugin can derive it.
    fn derived_key(&self, user: &UserId) -> Result<SymmetricKey>;
}

/// Non-cryptographic authorization predicates evaluated by the host.
pub trait PermissionChecker: Send + Sync {
    /// The general share permission (SHARE row of the permission matrix).
    fn may_share(&self, user: &UserId) -> bool;
    /// The group-share permission (SHARE_GROUP row).
    fn may_share_group(&self, user: &UserId, group: &GroupId) -> bool;
    /// The group-delete permission (DELETE row for group-owned entries).
    fn may_delete_group_entries(&self, user: &UserId, group: &GroupId) -> bool;
    /// Super-actors may delete any entry.
    fn is_super_actor(&self, user: &UserId) -> bool;
}
