//! Target registry
//!
//! The registry is the persisted configuration of known targets and of the
//! SendTargets discovery portals that feed it. Mutations are applied in
//! memory and only become durable on `sync`.

pub mod file;

use crate::portal::{DiscoveryPortal, Portal, TargetName};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use thiserror::Error;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed registry {path:?}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("target not found: {0}")]
    TargetNotFound(TargetName),

    #[error("target already exists: {0}")]
    TargetExists(TargetName),

    #[error("discovery portal not found: {0}")]
    PortalNotFound(DiscoveryPortal),

    #[error("discovery portal already exists: {0}")]
    PortalExists(DiscoveryPortal),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// How a target entry came to be configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetConfigType {
    /// Configured by an operator
    Static,
    /// Maintained by SendTargets discovery
    DynamicSendTargets,
    /// Any other mechanism (iSNS, SLP, ...)
    Other,
}

/// A persisted target entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub config_type: TargetConfigType,

    /// Portals keyed by address
    pub portals: BTreeMap<String, Portal>,

    /// Discovery portal that last reported this target (dynamic entries only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_portal: Option<DiscoveryPortal>,

    /// Marked for removal; the next discovery pass logs out and removes it
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retired: bool,
}

impl RegistryEntry {
    /// New entry owned by a SendTargets discovery portal
    pub fn dynamic(portal: Portal, owner: DiscoveryPortal) -> Self {
        let mut entry = Self {
            config_type: TargetConfigType::DynamicSendTargets,
            portals: BTreeMap::new(),
            discovery_portal: Some(owner),
            retired: false,
        };
        entry.set_portal(portal);
        entry
    }

    /// New operator-configured entry
    pub fn static_target(portals: impl IntoIterator<Item = Portal>) -> Self {
        let mut entry = Self {
            config_type: TargetConfigType::Static,
            portals: BTreeMap::new(),
            discovery_portal: None,
            retired: false,
        };
        for portal in portals {
            entry.set_portal(portal);
        }
        entry
    }

    /// Add or replace the portal with the same address.
    /// Returns false if an identical portal was already present.
    pub fn set_portal(&mut self, portal: Portal) -> bool {
        match self.portals.get(&portal.address) {
            Some(existing) if *existing == portal => false,
            _ => {
                self.portals.insert(portal.address.clone(), portal);
                true
            }
        }
    }
}

/// Persisted target configuration store.
///
/// Implementations must keep mutations in memory until `sync` so that one
/// discovery pass becomes visible to readers of the durable store at once.
pub trait TargetRegistry {
    /// Guard held while this process has the durable store to itself
    type Lock;

    /// Block until no other process can mutate the durable store.
    /// Held from `refresh` through `sync` so edits are never lost.
    fn lock(&self) -> RegistryResult<Self::Lock>;

    /// Whether an entry exists for `target`
    fn contains(&self, target: &TargetName) -> bool;

    /// Config type of `target`, if present
    fn config_type(&self, target: &TargetName) -> Option<TargetConfigType>;

    /// Discovery portal owning `target`, if it is a dynamic entry
    fn owner_of(&self, target: &TargetName) -> Option<DiscoveryPortal>;

    /// Add or replace `portal` under an existing `target`.
    /// The entry's config type and owner are left as they are.
    /// Returns whether the entry changed.
    fn merge_portal(
        &mut self,
        target: &TargetName,
        portal: &Portal,
        owner: &DiscoveryPortal,
    ) -> RegistryResult<bool>;

    /// Create a DynamicSendTargets entry for a target not yet present
    fn create_dynamic(
        &mut self,
        target: &TargetName,
        portal: &Portal,
        owner: &DiscoveryPortal,
    ) -> RegistryResult<()>;

    /// Names of all entries owned by `owner`
    fn entries_owned_by(&self, owner: &DiscoveryPortal) -> BTreeSet<TargetName>;

    /// Remove the entry for `target`
    fn remove(&mut self, target: &TargetName) -> RegistryResult<()>;

    /// Entries waiting to be logged out and removed: those marked retired,
    /// and dynamic entries whose discovery portal is no longer configured
    fn retired(&self) -> BTreeSet<TargetName>;

    /// Configured SendTargets discovery portals, in configuration order
    fn send_targets_portals(&self) -> Vec<DiscoveryPortal>;

    /// Resolve a configured discovery portal name to its network portal
    fn send_targets_portal(&self, name: &DiscoveryPortal) -> Option<Portal>;

    /// Reload from durable storage, discarding unsynced changes
    fn refresh(&mut self) -> RegistryResult<()>;

    /// Flush to durable storage
    fn sync(&mut self) -> RegistryResult<()>;
}

pub use file::{FileTargetRegistry, RegistryLock};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_portal_replaces_same_address() {
        let owner = DiscoveryPortal::new("10.0.0.1:3260");
        let mut entry = RegistryEntry::dynamic(Portal::new("10.0.0.5", 3260), owner);

        assert!(entry.set_portal(Portal::new("10.0.0.5", 3261)));
        assert!(entry.set_portal(Portal::new("10.0.0.6", 3260)));
        assert!(!entry.set_portal(Portal::new("10.0.0.6", 3260)));

        assert_eq!(entry.portals.len(), 2);
        assert_eq!(entry.portals["10.0.0.5"].port, 3261);
    }

    #[test]
    fn test_static_entry_has_no_owner() {
        let entry = RegistryEntry::static_target(vec![Portal::new("10.0.0.5", 3260)]);
        assert_eq!(entry.config_type, TargetConfigType::Static);
        assert!(entry.discovery_portal.is_none());
        assert!(!entry.retired);
    }

    #[test]
    fn test_retired_flag_omitted_when_unset() {
        let entry = RegistryEntry::static_target(vec![Portal::new("10.0.0.5", 3260)]);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(!json.contains("retired"));

        let mut entry: RegistryEntry = serde_json::from_str(&json).unwrap();
        entry.retired = true;
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"retired\":true"));
    }
}
