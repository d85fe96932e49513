//! Posting signed links to the chain store.
//!
//! A rejected link is never retried here. The chain has usually moved, so the
//! caller starts over from a fresh read.

use crate::{
    chain::IdentityID,
    error::{Error, Result},
    lease::Lease,
    signer::{SignatureVersion, SignedLink},
    store::{ChainStore, SubmitRequest},
    util::bounded,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Build the wire request for a signed link. The inner payload only goes
/// along for V2 links, and the lease id only when something is revoked.
pub fn build_request(link: &SignedLink, lease: Option<&Lease>) -> SubmitRequest {
    let sig_inner = match link.version() {
        SignatureVersion::V1 => None,
        SignatureVersion::V2 => link.sig_inner().clone(),
    };
    SubmitRequest::new(
        link.sig().clone(),
        link.signing_kid().as_string(),
        link.link_type().as_str().to_string(),
        lease.map(|l| l.id().as_str().to_string()),
        sig_inner,
    )
}

/// Posts signed links to the chain store.
///
/// The store has the final say on ordering. If it rejects a link, the whole
/// operation has to start over from a fresh chain read; nothing is retried
/// here.
pub struct ChainSubmitter<'a, S> {
    store: &'a S,
    timeout: Duration,
}

impl<'a, S: ChainStore> ChainSubmitter<'a, S> {
    pub fn new(store: &'a S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn submit(&self, identity: &IdentityID, link: &SignedLink, lease: Option<&Lease>) -> Result<()> {
        let request = build_request(link, lease);
        debug!(identity = %identity, link = %link.link_id(), lease = ?request.downgrade_lease_id(), "submitting link");
        bounded("link submission", self.timeout, self.store.post_link(identity, request))
            .await
            .map_err(|e| {
                warn!(identity = %identity, link = %link.link_id(), error = %e, "link submission failed");
                match e {
                    Error::SubmissionRejected(_) | Error::Unreachable(_) => e,
                    other => Error::SubmissionRejected(other.to_string()),
                }
            })
    }
}
