//! Leases gate revocation.
//!
//! Before we can replace an active claim we ask the ordering service for a
//! (downgrade) lease on the link we're about to revoke. The lease is issued
//! against a specific [merkle root][MerkleRoot], expires on its own, and can be
//! consumed by exactly one submission. If someone else (another device,
//! another process) is revoking the same link, only one of us gets the lease.

use crate::{
    chain::{LinkID, MerkleRoot},
    error::{Error, Result},
    util::{bounded, Timestamp},
};
use async_trait::async_trait;
use getset;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A lease's ID, which has to accompany the submission that consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseID(String);

impl LeaseID {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LeaseID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A short-lived permission to revoke specific links.
#[derive(Debug, Clone, PartialEq, getset::Getters)]
#[getset(get = "pub")]
pub struct Lease {
    id: LeaseID,
    /// The links this lease allows revoking
    link_ids: Vec<LinkID>,
    /// The snapshot the lease was issued against
    merkle_root: MerkleRoot,
    expires_at: Timestamp,
}

impl Lease {
    pub fn new(id: LeaseID, link_ids: Vec<LinkID>, merkle_root: MerkleRoot, expires_at: Timestamp) -> Self {
        Self {
            id,
            link_ids,
            merkle_root,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: &Timestamp) -> bool {
        &self.expires_at <= now
    }

    /// Does this lease cover exactly the given links?
    pub fn covers(&self, link_ids: &[LinkID]) -> bool {
        self.link_ids.len() == link_ids.len() && link_ids.iter().all(|id| self.link_ids.contains(id))
    }
}

/// The ordering service that hands out leases.
#[async_trait]
pub trait LeaseService: Send + Sync {
    /// Ask for a lease on the given links, anchored to the service's current
    /// merkle root. Fails with `LeaseUnavailable` if the links can't be
    /// leased (already revoked, unknown, nothing to revoke).
    async fn request_downgrade_lease(&self, link_ids: &[LinkID]) -> Result<Lease>;
}

#[async_trait]
impl<T: LeaseService + ?Sized> LeaseService for Arc<T> {
    async fn request_downgrade_lease(&self, link_ids: &[LinkID]) -> Result<Lease> {
        (**self).request_downgrade_lease(link_ids).await
    }
}

/// Obtains the lease needed to supersede existing links.
///
/// There's no retry here. Losing a lease race is a legitimate outcome (someone
/// else revoked the link first) and retrying blindly would just target stale
/// state.
pub struct LeaseCoordinator<'a, L> {
    service: &'a L,
    timeout: Duration,
}

impl<'a, L: LeaseService> LeaseCoordinator<'a, L> {
    pub fn new(service: &'a L, timeout: Duration) -> Self {
        Self { service, timeout }
    }

    pub async fn request(&self, link_ids: &[LinkID]) -> Result<Lease> {
        debug!(links = link_ids.len(), "requesting downgrade lease");
        let lease = bounded("lease request", self.timeout, self.service.request_downgrade_lease(link_ids))
            .await
            .map_err(|e| {
                warn!(error = %e, "lease request failed");
                e
            })?;
        if !lease.covers(link_ids) {
            Err(Error::LeaseUnavailable(format!("lease {} does not cover the requested links", lease.id())))?;
        }
        if lease.is_expired_at(&Timestamp::now()) {
            Err(Error::LeaseUnavailable(format!("lease {} expired on arrival", lease.id())))?;
        }
        debug!(lease = %lease.id(), merkle_seqno = lease.merkle_root().seqno(), "got downgrade lease");
        Ok(lease)
    }
}
