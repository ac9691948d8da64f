//! VoE SendTargets discovery
//!
//! Keeps the initiator's persisted target configuration in step with what
//! the configured SendTargets discovery portals advertise. New targets are
//! added as dynamic entries, rediscovered ones gain any new portals, and
//! targets a portal stops advertising are logged out and removed.

pub mod config;
pub mod discovery;
pub mod portal;
pub mod registry;
pub mod session;

pub use config::Config;
pub use discovery::{DiscoveryRecord, DiscoveryRunner, DiscoveryScheduler, PortalQuery};
pub use portal::{DiscoveryPortal, Portal, TargetName};
pub use registry::{FileTargetRegistry, RegistryError, TargetConfigType, TargetRegistry};
pub use session::{SessionDirectory, SessionTable};
