//! One SendTargets discovery pass
//!
//! Queries every configured discovery portal in turn and reconciles each
//! successful answer. A failing portal is logged and skipped. The registry
//! is synced exactly once, after the last portal, and its store lock is held
//! from the opening refresh to that sync.

use super::reconcile::{PrunedTarget, ReconcileReport, TargetReconciler};
use super::{AuthMethod, LoginStatus, PortalQuery, TransportError};
use crate::portal::DiscoveryPortal;
use crate::registry::{RegistryResult, TargetRegistry};
use crate::session::SessionDirectory;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Registry and session directory, mutated together under one lock
#[derive(Debug)]
pub struct DiscoveryState<R, S> {
    pub registry: R,
    pub sessions: S,
}

impl<R, S> DiscoveryState<R, S> {
    pub fn new(registry: R, sessions: S) -> Self {
        Self { registry, sessions }
    }

    /// Wrap for sharing with other subsystems that log in or out
    pub fn shared(registry: R, sessions: S) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(registry, sessions)))
    }
}

/// Process shutdown flag checked between portals
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How one discovery portal fared in a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalOutcome {
    /// Query succeeded and the registry was reconciled
    Reconciled(ReconcileReport),
    /// The query could not be performed
    TransportFailed(TransportError),
    /// The portal answered but rejected the discovery login
    LoginFailed(LoginStatus),
    /// The configured name no longer resolves to a portal
    Unresolved,
}

/// Result of a discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Targets marked for removal that were logged out and removed
    pub retired: Vec<PrunedTarget>,
    pub portals: Vec<(DiscoveryPortal, PortalOutcome)>,
    /// Shutdown was requested and remaining portals were abandoned
    pub cancelled: bool,
}

impl PassReport {
    pub fn outcome(&self, portal: &DiscoveryPortal) -> Option<&PortalOutcome> {
        self.portals
            .iter()
            .find(|(name, _)| name == portal)
            .map(|(_, outcome)| outcome)
    }

    /// Number of portals whose query failed
    pub fn failures(&self) -> usize {
        self.portals
            .iter()
            .filter(|(_, o)| !matches!(o, PortalOutcome::Reconciled(_)))
            .count()
    }
}

/// Runs discovery passes over all configured SendTargets portals
pub struct DiscoveryRunner<Q, R, S> {
    query: Q,
    state: Arc<Mutex<DiscoveryState<R, S>>>,
    auth: AuthMethod,
    shutdown: ShutdownSignal,
}

impl<Q, R, S> DiscoveryRunner<Q, R, S>
where
    Q: PortalQuery,
    R: TargetRegistry,
    S: SessionDirectory,
{
    pub fn new(query: Q, state: Arc<Mutex<DiscoveryState<R, S>>>) -> Self {
        Self {
            query,
            state,
            auth: AuthMethod::None,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Authentication used for every discovery login
    pub fn with_auth(mut self, auth: AuthMethod) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn state(&self) -> Arc<Mutex<DiscoveryState<R, S>>> {
        Arc::clone(&self.state)
    }

    /// Run one pass. Only registry failures are returned; per-portal
    /// failures are logged and reported in the `PassReport`.
    pub fn run_pass(&self) -> RegistryResult<PassReport> {
        // Other processes editing the store wait until after the sync
        let _store = self.lock_state().registry.lock()?;

        let mut report = PassReport::default();
        let portals = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            state.registry.refresh()?;
            report.retired = TargetReconciler::new(&mut state.registry, &mut state.sessions)
                .retire_targets()?;
            state.registry.send_targets_portals()
        };

        log::debug!("Starting SendTargets discovery of {} portal(s)", portals.len());

        let total = portals.len();
        for (idx, name) in portals.into_iter().enumerate() {
            if self.shutdown.is_triggered() {
                log::info!(
                    remaining = total - idx;
                    "Shutdown requested, abandoning SendTargets discovery"
                );
                report.cancelled = true;
                break;
            }

            let outcome = self.discover_portal(&name)?;
            report.portals.push((name, outcome));
        }

        self.lock_state().registry.sync()?;
        Ok(report)
    }

    fn discover_portal(&self, name: &DiscoveryPortal) -> RegistryResult<PortalOutcome> {
        let portal = match self.lock_state().registry.send_targets_portal(name) {
            Some(portal) => portal,
            None => {
                log::info!(
                    discovery_portal = name.as_str();
                    "discovery portal is no longer configured"
                );
                return Ok(PortalOutcome::Unresolved);
            }
        };

        // No lock held across the network round-trip
        let response = match self.query.query_portal_for_targets(&portal, &self.auth) {
            Ok(response) => response,
            Err(e) => {
                log::error!(
                    discovery_portal = name.as_str(), code = e.code, error = e.message.as_str();
                    "system error occurred during SendTargets discovery"
                );
                return Ok(PortalOutcome::TransportFailed(e));
            }
        };

        if !response.status.is_success() {
            log::error!(
                discovery_portal = name.as_str(), code = response.status.code();
                "login failed during SendTargets discovery"
            );
            return Ok(PortalOutcome::LoginFailed(response.status));
        }

        let mut guard = self.lock_state();
        let state = &mut *guard;
        let report = TargetReconciler::new(&mut state.registry, &mut state.sessions)
            .reconcile(name, &response.record)?;

        log::debug!(
            "Discovery portal {} reported {} target(s): {} added, {} updated, {} pruned",
            name,
            response.record.len(),
            report.added.len(),
            report.updated.len(),
            report.pruned.len()
        );

        Ok(PortalOutcome::Reconciled(report))
    }

    fn lock_state(&self) -> MutexGuard<'_, DiscoveryState<R, S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
