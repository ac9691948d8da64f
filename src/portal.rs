//! Portal and target identifiers
//!
//! Value types shared by the registry, the session directory and discovery.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Well-known iSCSI port
pub const DEFAULT_ISCSI_PORT: u16 = 3260;

/// Portal parse errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortalParseError {
    #[error("empty portal address")]
    EmptyAddress,

    #[error("invalid port in portal {0}")]
    InvalidPort(String),
}

/// Network portal (address, port and optional host interface)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Portal {
    /// Host name or IP address
    pub address: String,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host interface to bind to (None lets the OS choose)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_interface: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_ISCSI_PORT
}

impl Portal {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            host_interface: None,
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.host_interface = Some(interface.into());
        self
    }
}

impl FromStr for Portal {
    type Err = PortalParseError;

    /// Parses `addr`, `addr:port`, `[v6]` or `[v6]:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        let (address, port) = if let Some(rest) = s.strip_prefix('[') {
            match rest.split_once(']') {
                Some((addr, "")) => (addr, None),
                Some((addr, tail)) => match tail.strip_prefix(':') {
                    Some(port) => (addr, Some(port)),
                    None => return Err(PortalParseError::InvalidPort(s.to_string())),
                },
                None => return Err(PortalParseError::InvalidPort(s.to_string())),
            }
        } else if s.matches(':').count() == 1 {
            let (addr, port) = s.split_once(':').unwrap_or((s, ""));
            (addr, Some(port))
        } else {
            // bare hostname/IPv4, or an unbracketed IPv6 address
            (s, None)
        };

        if address.is_empty() {
            return Err(PortalParseError::EmptyAddress);
        }

        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| PortalParseError::InvalidPort(s.to_string()))?,
            None => DEFAULT_ISCSI_PORT,
        };

        Ok(Portal::new(address, port))
    }
}

impl fmt::Display for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Name under which a SendTargets discovery portal is configured
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscoveryPortal(String);

impl DiscoveryPortal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Portal> for DiscoveryPortal {
    fn from(portal: &Portal) -> Self {
        Self(portal.to_string())
    }
}

impl fmt::Display for DiscoveryPortal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target name (IQN, EUI or NAA form)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetName(String);

impl TargetName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TargetName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
