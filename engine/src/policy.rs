//! Security-class policy checks: live authentication and enrollment
//! eligibility.
//!
//! A class declares n factor plugins and a recovery threshold t.
//! Authentication asks whether at least t factors are proven in the current
//! session. Eligibility is deliberately stricter: the user must hold an
//! enrolled key pair for all n factors, so a later increase of t never
//! silently excludes an already-eligible user.

use tracing::debug;

use crate::error::{Result, VaultError};
use crate::registry::Registry;
use crate::store::CryptoStore;
use crate::types::{SecurityClass, UserId};

/// True if the user has proven at least `required_factors` of the class's
/// factors in the current session.
pub fn is_authenticated(
    class: &SecurityClass,
    registry: &Registry,
    user: &UserId,
) -> Result<bool> {
    let mut proven = 0usize;
    for plugin_id in &class.factor_plugins {
        let plugin = registry.plugin(plugin_id)?;
        if plugin.is_authenticated(user) {
            proven += 1;
            if proven >= class.required_factors as usize {
                return Ok(true);
            }
        }
    }
    debug!(
        class = %class.id,
        user = %user,
        proven,
        required = class.required_factors,
        "authentication threshold not met"
    );
    Ok(false)
}

/// True if the user is enrolled (holds an auth key pair, and is registered
/// with the plugin) for every factor of the class.
pub fn is_eligible(
    class: &SecurityClass,
    registry: &Registry,
    store: &CryptoStore,
    user: &UserId,
) -> Result<bool> {
    for plugin_id in &class.factor_plugins {
        let plugin = registry.plugin(plugin_id)?;
        if !plugin.is_registered(user) {
            return Ok(false);
        }
        if store.auth_key_pair(user, plugin_id)?.is_none() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Fails with `Authentication` unless `is_authenticated` holds.
pub fn check_authentication(
    class: &SecurityClass,
    registry: &Registry,
    user: &UserId,
) -> Result<()> {
    if is_authenticated(class, registry, user)? {
        Ok(())
    } else {
        Err(VaultError::Authentication(format!(
            "user {user} has not proven {} of {} factors for class {}",
            class.required_factors,
            class.factor_plugins.len(),
            class.id
        )))
    }
}
