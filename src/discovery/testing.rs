//! In-memory collaborators for discovery tests
//!
//! Every fake records into a shared `Journal` so tests can assert on call
//! order across the registry, the session directory and the portal query.
//! `capture_logs` collects the log lines emitted on the calling thread.

use super::{AuthMethod, PortalQuery, QueryResponse, ShutdownSignal, TransportError};
use crate::portal::{DiscoveryPortal, Portal, TargetName};
use crate::registry::{
    RegistryEntry, RegistryError, RegistryResult, TargetConfigType, TargetRegistry,
};
use crate::session::{LogoutStatus, SessionDirectory, SessionId};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Once};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Lock,
    Query(Portal),
    CreateDynamic(TargetName),
    MergePortal(TargetName),
    Remove(TargetName),
    Logout(SessionId),
    Refresh,
    Sync,
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Call>>>);

impl Journal {
    pub fn record(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Both calls were made and `first` came before `second`
    pub fn happened_before(&self, first: &Call, second: &Call) -> bool {
        let calls = self.calls();
        let a = calls.iter().position(|c| c == first);
        let b = calls.iter().position(|c| c == second);
        matches!((a, b), (Some(a), Some(b)) if a < b)
    }
}

pub struct FakeRegistry {
    journal: Journal,
    targets: BTreeMap<TargetName, RegistryEntry>,
    portals: Vec<(DiscoveryPortal, Portal)>,
    fail_mutations: bool,
    fail_sync: bool,
}

impl FakeRegistry {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            targets: BTreeMap::new(),
            portals: Vec::new(),
            fail_mutations: false,
            fail_sync: false,
        }
    }

    pub fn insert(&mut self, target: TargetName, entry: RegistryEntry) {
        self.targets.insert(target, entry);
    }

    pub fn entry(&self, target: &TargetName) -> Option<&RegistryEntry> {
        self.targets.get(target)
    }

    pub fn snapshot(&self) -> BTreeMap<TargetName, RegistryEntry> {
        self.targets.clone()
    }

    /// Configure a discovery portal named after its address
    pub fn add_discovery_portal(&mut self, addr: &str) -> DiscoveryPortal {
        let portal: Portal = addr.parse().unwrap();
        let name = DiscoveryPortal::from(&portal);
        self.portals.push((name.clone(), portal));
        name
    }

    /// Configure a discovery portal name that resolves to nothing
    pub fn add_unresolvable_portal(&mut self, name: &str) -> DiscoveryPortal {
        let name = DiscoveryPortal::new(name);
        self.portals.push((name.clone(), Portal::new("", 0)));
        name
    }

    pub fn fail_mutations(&mut self) {
        self.fail_mutations = true;
    }

    pub fn fail_sync(&mut self) {
        self.fail_sync = true;
    }

    fn check_mutation(&self, target: &TargetName) -> RegistryResult<()> {
        if self.fail_mutations {
            return Err(RegistryError::Io {
                path: "fake".into(),
                source: std::io::Error::other(format!("write failed for {}", target)),
            });
        }
        Ok(())
    }
}

impl TargetRegistry for FakeRegistry {
    type Lock = ();

    fn lock(&self) -> RegistryResult<()> {
        self.journal.record(Call::Lock);
        Ok(())
    }

    fn contains(&self, target: &TargetName) -> bool {
        self.targets.contains_key(target)
    }

    fn config_type(&self, target: &TargetName) -> Option<TargetConfigType> {
        self.targets.get(target).map(|e| e.config_type)
    }

    fn owner_of(&self, target: &TargetName) -> Option<DiscoveryPortal> {
        self.targets.get(target).and_then(|e| e.discovery_portal.clone())
    }

    fn merge_portal(
        &mut self,
        target: &TargetName,
        portal: &Portal,
        _owner: &DiscoveryPortal,
    ) -> RegistryResult<bool> {
        self.check_mutation(target)?;
        self.journal.record(Call::MergePortal(target.clone()));
        Ok(self
            .targets
            .get_mut(target)
            .ok_or_else(|| RegistryError::TargetNotFound(target.clone()))?
            .set_portal(portal.clone()))
    }

    fn create_dynamic(
        &mut self,
        target: &TargetName,
        portal: &Portal,
        owner: &DiscoveryPortal,
    ) -> RegistryResult<()> {
        self.check_mutation(target)?;
        self.journal.record(Call::CreateDynamic(target.clone()));
        self.targets.insert(
            target.clone(),
            RegistryEntry::dynamic(portal.clone(), owner.clone()),
        );
        Ok(())
    }

    fn entries_owned_by(&self, owner: &DiscoveryPortal) -> BTreeSet<TargetName> {
        self.targets
            .iter()
            .filter(|(_, e)| e.discovery_portal.as_ref() == Some(owner))
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn remove(&mut self, target: &TargetName) -> RegistryResult<()> {
        self.check_mutation(target)?;
        self.journal.record(Call::Remove(target.clone()));
        self.targets
            .remove(target)
            .map(|_| ())
            .ok_or_else(|| RegistryError::TargetNotFound(target.clone()))
    }

    fn retired(&self) -> BTreeSet<TargetName> {
        self.targets
            .iter()
            .filter(|(_, e)| {
                e.retired
                    || e.discovery_portal
                        .as_ref()
                        .is_some_and(|owner| !self.portals.iter().any(|(n, _)| n == owner))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn send_targets_portals(&self) -> Vec<DiscoveryPortal> {
        self.portals.iter().map(|(name, _)| name.clone()).collect()
    }

    fn send_targets_portal(&self, name: &DiscoveryPortal) -> Option<Portal> {
        self.portals
            .iter()
            .find(|(n, p)| n == name && !p.address.is_empty())
            .map(|(_, p)| p.clone())
    }

    fn refresh(&mut self) -> RegistryResult<()> {
        self.journal.record(Call::Refresh);
        Ok(())
    }

    fn sync(&mut self) -> RegistryResult<()> {
        self.journal.record(Call::Sync);
        if self.fail_sync {
            return Err(RegistryError::Io {
                path: "fake".into(),
                source: std::io::Error::other("disk full"),
            });
        }
        Ok(())
    }
}

pub struct FakeSessions {
    journal: Journal,
    sessions: HashMap<TargetName, SessionId>,
    outcomes: HashMap<SessionId, Result<LogoutStatus, TransportError>>,
    next_id: u16,
}

impl FakeSessions {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            sessions: HashMap::new(),
            outcomes: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn login(&mut self, target: TargetName) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.sessions.insert(target, id);
        id
    }

    pub fn fail_logout(&mut self, id: SessionId, outcome: Result<LogoutStatus, TransportError>) {
        self.outcomes.insert(id, outcome);
    }
}

impl SessionDirectory for FakeSessions {
    fn active_session_for(&self, target: &TargetName) -> Option<SessionId> {
        self.sessions.get(target).copied()
    }

    fn logout(&mut self, session: SessionId) -> Result<LogoutStatus, TransportError> {
        self.journal.record(Call::Logout(session));
        self.sessions.retain(|_, id| *id != session);
        self.outcomes
            .remove(&session)
            .unwrap_or(Ok(LogoutStatus::Success))
    }
}

/// Scripted portal query keyed by portal address
#[derive(Default)]
pub struct FakeQuery {
    journal: Journal,
    responses: Mutex<HashMap<String, Result<QueryResponse, TransportError>>>,
    trip: Mutex<Option<ShutdownSignal>>,
}

impl FakeQuery {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Default::default()
        }
    }

    pub fn respond(&self, addr: &str, response: Result<QueryResponse, TransportError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(addr.to_string(), response);
    }

    /// Raise `signal` the first time any portal is queried
    pub fn trip_on_query(&self, signal: ShutdownSignal) {
        *self.trip.lock().unwrap() = Some(signal);
    }
}

impl PortalQuery for FakeQuery {
    fn query_portal_for_targets(
        &self,
        portal: &Portal,
        _auth: &AuthMethod,
    ) -> Result<QueryResponse, TransportError> {
        self.journal.record(Call::Query(portal.clone()));
        if let Some(signal) = self.trip.lock().unwrap().take() {
            signal.trigger();
        }
        self.responses
            .lock()
            .unwrap()
            .get(&portal.address)
            .cloned()
            .unwrap_or_else(|| Err(TransportError::new(61, "connection refused")))
    }
}

/// One captured log line with its structured fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: log::Level,
    pub message: String,
    pub fields: BTreeMap<String, String>,
}

impl LogLine {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

thread_local! {
    static CAPTURED: RefCell<Option<Vec<LogLine>>> = const { RefCell::new(None) };
}

struct CaptureLogger;

static LOGGER: CaptureLogger = CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        CAPTURED.with(|captured| {
            if let Some(lines) = captured.borrow_mut().as_mut() {
                let mut fields = BTreeMap::new();
                let _ = record.key_values().visit(&mut FieldCollector(&mut fields));
                lines.push(LogLine {
                    level: record.level(),
                    message: record.args().to_string(),
                    fields,
                });
            }
        });
    }

    fn flush(&self) {}
}

struct FieldCollector<'a>(&'a mut BTreeMap<String, String>);

impl<'kvs> log::kv::VisitSource<'kvs> for FieldCollector<'_> {
    fn visit_pair(
        &mut self,
        key: log::kv::Key<'kvs>,
        value: log::kv::Value<'kvs>,
    ) -> Result<(), log::kv::Error> {
        self.0.insert(key.as_str().to_string(), value.to_string());
        Ok(())
    }
}

/// Run `f` and return what it logged on this thread
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, Vec<LogLine>) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);
    });

    CAPTURED.with(|captured| *captured.borrow_mut() = Some(Vec::new()));
    let result = f();
    let lines = CAPTURED.with(|captured| captured.borrow_mut().take().unwrap_or_default());
    (result, lines)
}

/// Lines carrying exactly `message`
pub fn lines_with<'a>(lines: &'a [LogLine], message: &str) -> Vec<&'a LogLine> {
    lines.iter().filter(|l| l.message == message).collect()
}
