//! Active session directory
//!
//! Tracks logged-in sessions by target so discovery can tear a session down
//! before deleting the configuration behind it.

use crate::discovery::TransportError;
use crate::portal::{Portal, TargetName};
use std::collections::HashMap;
use std::fmt;

/// Session identifier (iSCSI SSID-equivalent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u16);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logout response codes (RFC 3720 section 10.15.1)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutStatus {
    Success = 0,
    CidNotFound = 1,
    RecoveryNotSupported = 2,
    CleanupFailed = 3,
}

impl LogoutStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == LogoutStatus::Success
    }
}

/// Directory of active sessions
pub trait SessionDirectory {
    /// Active session for `target`, if logged in
    fn active_session_for(&self, target: &TargetName) -> Option<SessionId>;

    /// Log out `session`. A transport error means the peer could not be
    /// reached; the session is gone locally either way.
    fn logout(&mut self, session: SessionId) -> Result<LogoutStatus, TransportError>;
}

/// An active session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub target: TargetName,
    pub portal: Portal,
}

/// In-memory session table
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, SessionInfo>,
    next_id: u16,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session to `target` over `portal`.
    /// Returns None when the target already has a session or ids are exhausted.
    pub fn open(&mut self, target: TargetName, portal: Portal) -> Option<SessionId> {
        if self.active_session_for(&target).is_some() {
            return None;
        }

        let id = self.allocate_id()?;
        log::info!(iqn = target.as_str(), session = id.0; "Session opened");
        self.sessions.insert(id, SessionInfo { id, target, portal });
        Some(id)
    }

    /// Drop a session without a logout exchange
    pub fn close(&mut self, id: SessionId) -> Option<SessionInfo> {
        self.sessions.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<&SessionInfo> {
        self.sessions.get(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn allocate_id(&mut self) -> Option<SessionId> {
        for _ in 0..=u16::MAX {
            let candidate = SessionId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.sessions.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

impl SessionDirectory for SessionTable {
    fn active_session_for(&self, target: &TargetName) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|s| &s.target == target)
            .map(|s| s.id)
    }

    fn logout(&mut self, session: SessionId) -> Result<LogoutStatus, TransportError> {
        match self.sessions.remove(&session) {
            Some(info) => {
                log::info!(iqn = info.target.as_str(), session = session.0; "Session logged out");
                Ok(LogoutStatus::Success)
            }
            None => Ok(LogoutStatus::CidNotFound),
        }
    }
}
