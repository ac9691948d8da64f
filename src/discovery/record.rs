//! Discovery records
//!
//! The structured result of one SendTargets query: target name to portal
//! group tag to an ordered list of portals.

use crate::portal::{Portal, TargetName};
use std::collections::BTreeMap;
use std::fmt;

/// Target portal group tag as returned by discovery
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortalGroupTag(String);

impl PortalGroupTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortalGroupTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type PortalGroups = BTreeMap<PortalGroupTag, Vec<Portal>>;

/// Immutable SendTargets result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryRecord {
    targets: BTreeMap<TargetName, PortalGroups>,
}

impl DiscoveryRecord {
    pub fn builder() -> DiscoveryRecordBuilder {
        DiscoveryRecordBuilder::default()
    }

    /// Advertised targets
    pub fn targets(&self) -> impl Iterator<Item = &TargetName> {
        self.targets.keys()
    }

    /// Portal group tags advertised for `target`
    pub fn portal_group_tags(&self, target: &TargetName) -> impl Iterator<Item = &PortalGroupTag> {
        self.targets.get(target).into_iter().flat_map(|groups| groups.keys())
    }

    /// Portals of one portal group, in advertised order
    pub fn portals(&self, target: &TargetName, tag: &PortalGroupTag) -> &[Portal] {
        self.targets
            .get(target)
            .and_then(|groups| groups.get(tag))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, target: &TargetName) -> bool {
        self.targets.contains_key(target)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Builds a `DiscoveryRecord`
#[derive(Debug, Default)]
pub struct DiscoveryRecordBuilder {
    targets: BTreeMap<TargetName, PortalGroups>,
}

impl DiscoveryRecordBuilder {
    /// Declare a target, possibly without any portal (SendTargets may
    /// report a TargetName with no TargetAddress)
    pub fn target(mut self, target: impl Into<TargetName>) -> Self {
        self.targets.entry(target.into()).or_default();
        self
    }

    /// Append a portal to `target` under portal group `tag`
    pub fn portal(
        mut self,
        target: impl Into<TargetName>,
        tag: impl Into<String>,
        portal: Portal,
    ) -> Self {
        self.targets
            .entry(target.into())
            .or_default()
            .entry(PortalGroupTag::new(tag))
            .or_default()
            .push(portal);
        self
    }

    pub fn build(self) -> DiscoveryRecord {
        DiscoveryRecord {
            targets: self.targets,
        }
    }
}
