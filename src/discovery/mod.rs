//! SendTargets discovery
//!
//! Periodically asks each configured discovery portal which targets it
//! advertises and reconciles the answer against the target registry.

pub mod query;
pub mod reconcile;
pub mod record;
pub mod runner;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testing;

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

pub use query::{PortalQuery, QueryResponse};
pub use reconcile::{PrunedTarget, ReconcileReport, TargetReconciler};
pub use record::{DiscoveryRecord, DiscoveryRecordBuilder, PortalGroupTag};
pub use runner::{DiscoveryRunner, DiscoveryState, PassReport, PortalOutcome, ShutdownSignal};
pub use scheduler::{DiscoveryScheduler, SchedulerHandle};

/// Failure to perform a network exchange at all
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("system error (code {code}): {message}")]
pub struct TransportError {
    /// OS error number, or -1 when none is available
    pub code: i32,
    pub message: String,
}

impl TransportError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self {
            code: e.raw_os_error().unwrap_or(-1),
            message: e.to_string(),
        }
    }
}

/// Login response status (RFC 3720 section 10.13.5): class in the high byte,
/// detail in the low byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoginStatus(pub u16);

impl LoginStatus {
    pub const SUCCESS: LoginStatus = LoginStatus(0x0000);
    pub const TARGET_MOVED_TEMP: LoginStatus = LoginStatus(0x0101);
    pub const TARGET_MOVED_PERM: LoginStatus = LoginStatus(0x0102);
    pub const INITIATOR_ERROR: LoginStatus = LoginStatus(0x0200);
    pub const AUTH_FAILURE: LoginStatus = LoginStatus(0x0201);
    pub const ACCESS_DENIED: LoginStatus = LoginStatus(0x0202);
    pub const NOT_FOUND: LoginStatus = LoginStatus(0x0203);
    pub const TARGET_REMOVED: LoginStatus = LoginStatus(0x0204);
    pub const UNSUPPORTED_VERSION: LoginStatus = LoginStatus(0x0205);
    pub const TOO_MANY_CONNECTIONS: LoginStatus = LoginStatus(0x0206);
    pub const MISSING_PARAMETER: LoginStatus = LoginStatus(0x0207);
    pub const CANT_INCLUDE_IN_SESSION: LoginStatus = LoginStatus(0x0208);
    pub const SESSION_TYPE_UNSUPPORTED: LoginStatus = LoginStatus(0x0209);
    pub const SESSION_DOES_NOT_EXIST: LoginStatus = LoginStatus(0x020a);
    pub const INVALID_REQUEST_DURING_LOGIN: LoginStatus = LoginStatus(0x020b);
    pub const TARGET_ERROR: LoginStatus = LoginStatus(0x0300);
    pub const SERVICE_UNAVAILABLE: LoginStatus = LoginStatus(0x0301);
    pub const OUT_OF_RESOURCES: LoginStatus = LoginStatus(0x0302);

    pub fn code(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    fn description(self) -> Option<&'static str> {
        let text = match self {
            Self::SUCCESS => "success",
            Self::TARGET_MOVED_TEMP => "target moved temporarily",
            Self::TARGET_MOVED_PERM => "target moved permanently",
            Self::INITIATOR_ERROR => "initiator error",
            Self::AUTH_FAILURE => "authentication failure",
            Self::ACCESS_DENIED => "authorization failure",
            Self::NOT_FOUND => "not found",
            Self::TARGET_REMOVED => "target removed",
            Self::UNSUPPORTED_VERSION => "unsupported version",
            Self::TOO_MANY_CONNECTIONS => "too many connections",
            Self::MISSING_PARAMETER => "missing parameter",
            Self::CANT_INCLUDE_IN_SESSION => "can't include in session",
            Self::SESSION_TYPE_UNSUPPORTED => "session type not supported",
            Self::SESSION_DOES_NOT_EXIST => "session does not exist",
            Self::INVALID_REQUEST_DURING_LOGIN => "invalid during login",
            Self::TARGET_ERROR => "target error",
            Self::SERVICE_UNAVAILABLE => "service unavailable",
            Self::OUT_OF_RESOURCES => "out of resources",
            _ => return None,
        };
        Some(text)
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(text) => write!(f, "0x{:04x} ({})", self.0, text),
            None => write!(f, "0x{:04x}", self.0),
        }
    }
}

/// Authentication used for the discovery login
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    None,
    Chap { user: String, secret: String },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::None => f.write_str("None"),
            AuthMethod::Chap { user, .. } => f
                .debug_struct("Chap")
                .field("user", user)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}
