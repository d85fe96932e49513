//! The chain store is the authoritative home of every identity's chain. It
//! decides which links are accepted and in what order; everything we compute
//! locally is a proposal until the store takes it.

use crate::{
    chain::{ChainState, IdentityID},
    error::Result,
};
use async_trait::async_trait;
use getset;
use serde_derive::{Deserialize, Serialize};
use std::sync::Arc;

/// A single link submission, as it goes over the wire. Field names here are
/// the wire names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::CopyGetters)]
pub struct SubmitRequest {
    /// The encoded outer signature
    #[getset(get = "pub")]
    sig: String,
    /// The ID of the key that made `sig`
    #[getset(get = "pub")]
    signing_kid: String,
    /// Always false here: these are local claims, not proofs checked against
    /// some remote service.
    #[getset(get_copy = "pub")]
    is_remote_proof: bool,
    /// The link type tag (`"cryptocurrency"`, `"revoke"`)
    #[serde(rename = "type")]
    #[getset(get = "pub")]
    ty: String,
    /// Present iff this link revokes something.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[getset(get = "pub")]
    downgrade_lease_id: Option<String>,
    /// Present iff the link was signed with V2, so the store can check the
    /// envelope against the payload itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[getset(get = "pub")]
    sig_inner: Option<String>,
}

impl SubmitRequest {
    pub fn new(
        sig: String,
        signing_kid: String,
        ty: String,
        downgrade_lease_id: Option<String>,
        sig_inner: Option<String>,
    ) -> Self {
        Self {
            sig,
            signing_kid,
            is_remote_proof: false,
            ty,
            downgrade_lease_id,
            sig_inner,
        }
    }
}

/// Where chains live.
///
/// `load_chain` must return a consistent snapshot. `post_link` must reject
/// (with `SubmissionRejected`) any link that doesn't come right after the
/// current tip, rather than reordering it. Transport problems should come back
/// as `Unreachable`.
#[async_trait]
pub trait ChainStore: Send + Sync {
    async fn load_chain(&self, identity: &IdentityID) -> Result<ChainState>;

    async fn post_link(&self, identity: &IdentityID, request: SubmitRequest) -> Result<()>;
}

#[async_trait]
impl<T: ChainStore + ?Sized> ChainStore for Arc<T> {
    async fn load_chain(&self, identity: &IdentityID) -> Result<ChainState> {
        (**self).load_chain(identity).await
    }

    async fn post_link(&self, identity: &IdentityID, request: SubmitRequest) -> Result<()> {
        (**self).post_link(identity, request).await
    }
}
