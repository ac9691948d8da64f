//! Reconcile one discovery portal's results against the registry
//!
//! Targets reported by the portal are added or merged, then dynamic targets
//! the portal owns but no longer reports are logged out and removed.
//! Static and other non-discovery entries are never touched, and neither
//! are entries owned by a different discovery portal.

use super::{DiscoveryRecord, TransportError};
use crate::portal::{DiscoveryPortal, TargetName};
use crate::registry::{RegistryResult, TargetConfigType, TargetRegistry};
use crate::session::{LogoutStatus, SessionDirectory, SessionId};
use std::collections::HashSet;

/// A stale target removed by pruning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrunedTarget {
    pub target: TargetName,
    /// Session that was logged out, with the logout outcome
    pub logout: Option<(SessionId, Result<LogoutStatus, TransportError>)>,
}

/// What one reconciliation step did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<TargetName>,
    pub updated: Vec<TargetName>,
    /// Already configured statically (or by another mechanism)
    pub conflicts: Vec<TargetName>,
    /// Dynamic targets owned by another discovery portal
    pub foreign: Vec<TargetName>,
    pub pruned: Vec<PrunedTarget>,
}

impl ReconcileReport {
    /// True when the registry was not modified
    pub fn is_unchanged(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.pruned.is_empty()
    }
}

/// Applies a discovery record for one discovery portal
pub struct TargetReconciler<'a, R: ?Sized, S: ?Sized> {
    registry: &'a mut R,
    sessions: &'a mut S,
}

impl<'a, R, S> TargetReconciler<'a, R, S>
where
    R: TargetRegistry + ?Sized,
    S: SessionDirectory + ?Sized,
{
    pub fn new(registry: &'a mut R, sessions: &'a mut S) -> Self {
        Self { registry, sessions }
    }

    /// Merge every target in `record` and then prune what `discovery_portal`
    /// no longer reports. Registry failures abort the step.
    pub fn reconcile(
        &mut self,
        discovery_portal: &DiscoveryPortal,
        record: &DiscoveryRecord,
    ) -> RegistryResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut seen = HashSet::new();

        for target in record.targets() {
            self.classify_and_apply(target, record, discovery_portal, &mut report)?;
            seen.insert(target.clone());
        }

        report.pruned = self.prune_stale_targets(discovery_portal, &seen)?;
        Ok(report)
    }

    fn classify_and_apply(
        &mut self,
        target: &TargetName,
        record: &DiscoveryRecord,
        discovery_portal: &DiscoveryPortal,
        report: &mut ReconcileReport,
    ) -> RegistryResult<()> {
        match self.registry.config_type(target) {
            Some(TargetConfigType::Static) | Some(TargetConfigType::Other) => {
                log::info!(
                    iqn = target.as_str(), discovery_portal = discovery_portal.as_str();
                    "discovered target already exists with static configuration"
                );
                report.conflicts.push(target.clone());
            }
            Some(TargetConfigType::DynamicSendTargets)
                if self.registry.owner_of(target).as_ref() != Some(discovery_portal) =>
            {
                let owner = self.registry.owner_of(target);
                log::info!(
                    iqn = target.as_str(),
                    discovery_portal = discovery_portal.as_str(),
                    owner = owner.as_ref().map(DiscoveryPortal::as_str).unwrap_or("-");
                    "discovered target is owned by another discovery portal"
                );
                report.foreign.push(target.clone());
            }
            existing => {
                let changed = self.apply_discovered_target(target, record, discovery_portal)?;
                match (existing, changed) {
                    (None, true) => {
                        log::info!(
                            iqn = target.as_str(), discovery_portal = discovery_portal.as_str();
                            "discovered target over discovery portal"
                        );
                        report.added.push(target.clone());
                    }
                    (Some(_), true) => {
                        log::info!(
                            iqn = target.as_str(), discovery_portal = discovery_portal.as_str();
                            "updated target over discovery portal"
                        );
                        report.updated.push(target.clone());
                    }
                    (None, false) => {
                        log::info!(
                            iqn = target.as_str(), discovery_portal = discovery_portal.as_str();
                            "discovered target has no portals"
                        );
                    }
                    (Some(_), false) => {
                        log::debug!("Target {} unchanged over {}", target, discovery_portal);
                    }
                }
            }
        }
        Ok(())
    }

    /// Add every advertised portal of `target` to the registry, creating a
    /// dynamic entry owned by `discovery_portal` if the target is new.
    /// Never removes anything. Returns whether the registry changed.
    pub fn apply_discovered_target(
        &mut self,
        target: &TargetName,
        record: &DiscoveryRecord,
        discovery_portal: &DiscoveryPortal,
    ) -> RegistryResult<bool> {
        let mut changed = false;
        for tag in record.portal_group_tags(target) {
            for portal in record.portals(target, tag) {
                if self.registry.contains(target) {
                    changed |= self.registry.merge_portal(target, portal, discovery_portal)?;
                } else {
                    self.registry.create_dynamic(target, portal, discovery_portal)?;
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    /// Remove targets owned by `discovery_portal` that are not in `seen`,
    /// logging out any active session first. Logout failures never stop
    /// the removal.
    pub fn prune_stale_targets(
        &mut self,
        discovery_portal: &DiscoveryPortal,
        seen: &HashSet<TargetName>,
    ) -> RegistryResult<Vec<PrunedTarget>> {
        let mut pruned = Vec::new();

        for target in self.registry.entries_owned_by(discovery_portal) {
            if seen.contains(&target) {
                continue;
            }

            let removed = self.logout_and_remove(target)?;
            log::info!(
                iqn = removed.target.as_str(), discovery_portal = discovery_portal.as_str();
                "removed target no longer reported by discovery portal"
            );
            pruned.push(removed);
        }

        Ok(pruned)
    }

    /// Log out and remove every entry the registry holds for removal:
    /// targets an operator deleted and targets of deleted discovery portals
    pub fn retire_targets(&mut self) -> RegistryResult<Vec<PrunedTarget>> {
        let mut retired = Vec::new();

        for target in self.registry.retired() {
            let removed = self.logout_and_remove(target)?;
            log::info!(iqn = removed.target.as_str(); "removed retired target");
            retired.push(removed);
        }

        Ok(retired)
    }

    fn logout_and_remove(&mut self, target: TargetName) -> RegistryResult<PrunedTarget> {
        let logout = self.sessions.active_session_for(&target).map(|session| {
            let outcome = self.sessions.logout(session);
            log_logout(&target, session, &outcome);
            (session, outcome)
        });

        self.registry.remove(&target)?;
        Ok(PrunedTarget { target, logout })
    }
}

fn log_logout(
    target: &TargetName,
    session: SessionId,
    outcome: &Result<LogoutStatus, TransportError>,
) {
    match outcome {
        Ok(status) if status.is_success() => {
            log::info!(iqn = target.as_str(), session = session.0; "logged out of stale target");
        }
        Ok(status) => {
            log::error!(
                iqn = target.as_str(), session = session.0, status = status.code();
                "logout of stale target failed"
            );
        }
        Err(e) => {
            log::error!(
                iqn = target.as_str(), session = session.0, code = e.code;
                "logout of stale target failed with system error"
            );
        }
    }
}
