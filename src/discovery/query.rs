//! Portal query collaborator
//!
//! The login + SendTargets text exchange lives behind this trait. Timeouts
//! belong to the implementation; a query that times out returns a
//! `TransportError` (ETIMEDOUT).

use super::{AuthMethod, DiscoveryRecord, LoginStatus, TransportError};
use crate::portal::Portal;

/// A completed query. `record` is only meaningful when `status` is success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResponse {
    pub record: DiscoveryRecord,
    pub status: LoginStatus,
}

impl QueryResponse {
    pub fn success(record: DiscoveryRecord) -> Self {
        Self {
            record,
            status: LoginStatus::SUCCESS,
        }
    }

    pub fn rejected(status: LoginStatus) -> Self {
        Self {
            record: DiscoveryRecord::default(),
            status,
        }
    }
}

/// Performs a discovery session against one portal
pub trait PortalQuery: Send + Sync {
    fn query_portal_for_targets(
        &self,
        portal: &Portal,
        auth: &AuthMethod,
    ) -> Result<QueryResponse, TransportError>;
}

impl<Q: PortalQuery + ?Sized> PortalQuery for std::sync::Arc<Q> {
    fn query_portal_for_targets(
        &self,
        portal: &Portal,
        auth: &AuthMethod,
    ) -> Result<QueryResponse, TransportError> {
        (**self).query_portal_for_targets(portal, auth)
    }
}
