//! An in-process chain store and lease service.
//!
//! This plays the part of the authoritative server: it verifies every link it
//! is handed, only accepts a link at the next sequence number, keeps one
//! active claim per family, and only lets a link be revoked under a valid,
//! unused lease. Good for tests and local tooling.

use crate::{
    chain::{ActiveClaim, ChainLink, ChainState, ChainTip, IdentityID, LinkID, MerkleRoot, SeqType},
    claim::ClaimFamily,
    config::Config,
    crypto::{Hash, SignKeypairPublic, SigningKey},
    error::{Error, Result},
    lease::{Lease, LeaseID, LeaseService},
    signer::{verify_signed, ClaimSigner, LinkBody},
    store::{ChainStore, SubmitRequest},
    submit::build_request,
    util::Timestamp,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

struct IdentityChain {
    key: SignKeypairPublic,
    links: Vec<ChainLink>,
}

struct LeaseRecord {
    lease: Lease,
    consumed: bool,
}

struct Inner {
    chains: HashMap<IdentityID, IdentityChain>,
    revoked: HashSet<LinkID>,
    leases: HashMap<LeaseID, LeaseRecord>,
    merkle_root: MerkleRoot,
    leases_issued: u64,
    submissions: usize,
}

impl Inner {
    fn state(&self, identity: &IdentityID) -> Result<ChainState> {
        let chain = self
            .chains
            .get(identity)
            .ok_or_else(|| Error::IdentityNotFound(identity.to_string()))?;
        let tip = chain
            .links
            .last()
            .map(|link| ChainTip::new(link.seqno(), Some(link.link_id().clone())))
            .unwrap_or_default();
        let mut active = BTreeMap::new();
        for link in &chain.links {
            if let Some(claim) = link.claim() {
                if !self.revoked.contains(link.link_id()) {
                    active.insert(claim.family(), ActiveClaim::new(link.link_id().clone(), link.seqno(), claim.clone()));
                }
            }
        }
        Ok(ChainState::new(identity.clone(), tip, active))
    }

    fn find_link(&self, link_id: &LinkID) -> Option<&ChainLink> {
        self.chains
            .values()
            .flat_map(|chain| chain.links.iter())
            .find(|link| link.link_id() == link_id)
    }

    fn issue_lease(&mut self, link_ids: &[LinkID], ttl: Duration) -> Result<Lease> {
        if link_ids.is_empty() {
            Err(Error::LeaseUnavailable(String::from("no links given")))?;
        }
        let now = Timestamp::now();
        for id in link_ids {
            if self.revoked.contains(id) {
                Err(Error::LeaseUnavailable(format!("link {} is already revoked", id)))?;
            }
            let link = self
                .find_link(id)
                .ok_or_else(|| Error::LeaseUnavailable(format!("unknown link {}", id)))?;
            if link.claim().is_none() {
                Err(Error::LeaseUnavailable(format!("link {} has nothing to revoke", id)))?;
            }
        }
        // an unused lease on any of these links is replaced by the new one,
        // so a caller that failed after leasing can start over right away
        self.leases.retain(|lease_id, rec| {
            let superseded = !rec.consumed && rec.lease.link_ids().iter().any(|id| link_ids.contains(id));
            if superseded {
                debug!(lease = %lease_id, "superseding unused lease");
            }
            !superseded && !rec.lease.is_expired_at(&now)
        });
        self.leases_issued += 1;
        let lease = Lease::new(
            LeaseID::new(format!("lease-{:08}", self.leases_issued)),
            link_ids.to_vec(),
            self.merkle_root.clone(),
            now.offset(ttl),
        );
        self.leases.insert(
            lease.id().clone(),
            LeaseRecord {
                lease: lease.clone(),
                consumed: false,
            },
        );
        Ok(lease)
    }

    fn accept(&mut self, identity: &IdentityID, request: SubmitRequest) -> Result<ChainLink> {
        let reject = |msg: String| Error::SubmissionRejected(msg);
        let state = self.state(identity).map_err(|e| reject(e.to_string()))?;
        if request.is_remote_proof() {
            Err(reject(String::from("remote proofs are not accepted here")))?;
        }
        let verified =
            verify_signed(request.sig(), request.sig_inner().as_deref()).map_err(|e| reject(format!("bad signature: {}", e)))?;
        let payload = verified.payload();
        let body = payload.body();
        if let Some(chain) = self.chains.get(identity) {
            if &chain.key != verified.signing_key() {
                Err(reject(format!("link is not signed by {}'s key", identity)))?;
            }
        }
        if request.signing_kid() != &verified.signing_key().key_id().as_string() {
            Err(reject(String::from("signing_kid does not match the signature")))?;
        }
        if payload.identity() != identity.as_str() {
            Err(reject(format!("link was signed for {}", payload.identity())))?;
        }
        if request.ty() != body.link_type().as_str() {
            Err(reject(format!("type {:?} does not match a {} link", request.ty(), body.link_type().as_str())))?;
        }
        if self.find_link(verified.link_id()).is_some() {
            Err(reject(format!("link {} is already committed", verified.link_id())))?;
        }

        let tip = state.tip();
        let (seqno, prev) = match verified.outer() {
            Some(outer) => {
                if outer.seqno() != tip.next_seqno() || outer.prev() != tip.link_id() {
                    Err(reject(format!("expected seqno {}, got {}", tip.next_seqno(), outer.seqno())))?;
                }
                (outer.seqno(), outer.prev().clone())
            }
            None => (tip.next_seqno(), tip.link_id().clone()),
        };

        let family = body.family();
        let revokes = payload.revokes();
        let now = Timestamp::now();
        let lease_id = match (revokes.is_empty(), request.downgrade_lease_id()) {
            (true, None) => None,
            (true, Some(_)) => Err(reject(String::from("lease given but nothing is revoked")))?,
            (false, None) => Err(reject(String::from("revocation without a lease")))?,
            (false, Some(id)) => {
                let id = LeaseID::new(id.as_str());
                let record = self.leases.get(&id).ok_or_else(|| reject(format!("unknown lease {}", id)))?;
                if record.consumed {
                    Err(reject(format!("lease {} was already used", id)))?;
                }
                if record.lease.is_expired_at(&now) {
                    Err(reject(format!("lease {} has expired", id)))?;
                }
                if !record.lease.covers(revokes) {
                    Err(reject(format!("lease {} does not cover the revoked links", id)))?;
                }
                if payload.merkle_root().as_ref() != Some(record.lease.merkle_root()) {
                    Err(reject(format!("signed anchor does not match lease {}", id)))?;
                }
                Some(id)
            }
        };

        for target in revokes {
            let active = state
                .active()
                .values()
                .find(|a| a.link_id() == target)
                .ok_or_else(|| reject(format!("link {} is not an active claim", target)))?;
            if active.claim().family() != family {
                Err(reject(format!("link {} is not in the {} family", target, family)))?;
            }
        }
        match body {
            LinkBody::Cryptocurrency { .. } => {
                if let Some(active) = state.active_for(family) {
                    if !revokes.contains(active.link_id()) {
                        Err(reject(format!("{} already has an active claim", family)))?;
                    }
                }
            }
            LinkBody::Revoke { .. } => {
                if revokes.is_empty() {
                    Err(reject(String::from("revoke link revokes nothing")))?;
                }
            }
        }

        let link = ChainLink::new(
            seqno,
            prev,
            verified.link_id().clone(),
            body.link_type(),
            *verified.version(),
            !revokes.is_empty(),
            SeqType::Public,
            verified.signing_key().key_id(),
            request.sig().clone(),
            request.sig_inner().clone(),
            revokes.clone(),
            body.claim(),
        );
        for target in revokes {
            self.revoked.insert(target.clone());
        }
        if let Some(id) = lease_id {
            if let Some(record) = self.leases.get_mut(&id) {
                record.consumed = true;
            }
        }
        self.merkle_root = MerkleRoot::new(
            self.merkle_root.seqno() + 1,
            Hash::new_blake3_chained(&[self.merkle_root.hash().as_bytes(), link.link_id().as_bytes()]),
        );
        self.chains
            .get_mut(identity)
            .ok_or_else(|| reject(format!("unknown identity {}", identity)))?
            .links
            .push(link.clone());
        Ok(link)
    }
}

/// Chain store and lease service in one, held in memory.
pub struct MemoryChainStore {
    inner: Mutex<Inner>,
    lease_ttl: Duration,
    latency: Option<Duration>,
}

impl Default for MemoryChainStore {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl MemoryChainStore {
    /// A store whose leases last `lease_ttl_secs` from the config.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.lease_ttl())
    }

    pub fn new(lease_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                chains: HashMap::new(),
                revoked: HashSet::new(),
                leases: HashMap::new(),
                merkle_root: MerkleRoot::new(0, Hash::new_blake3(b"")),
                leases_issued: 0,
                submissions: 0,
            }),
            lease_ttl,
            latency: None,
        }
    }

    /// Make every call wait a bit before it's served, like a network would.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Start an empty chain for an identity whose links must be signed by
    /// `key`. Does nothing if the identity already has a chain.
    pub fn register_identity(&self, identity: IdentityID, key: SignKeypairPublic) {
        self.inner
            .lock()
            .chains
            .entry(identity)
            .or_insert_with(|| IdentityChain { key, links: Vec::new() });
    }

    /// Every committed link for an identity, in order.
    pub fn links(&self, identity: &IdentityID) -> Vec<ChainLink> {
        self.inner
            .lock()
            .chains
            .get(identity)
            .map(|chain| chain.links.clone())
            .unwrap_or_default()
    }

    pub fn is_revoked(&self, link_id: &LinkID) -> bool {
        self.inner.lock().revoked.contains(link_id)
    }

    /// How many times `post_link` has been called, accepted or not.
    pub fn submission_count(&self) -> usize {
        self.inner.lock().submissions
    }

    pub fn merkle_root(&self) -> MerkleRoot {
        self.inner.lock().merkle_root.clone()
    }

    /// Whether a lease has been used up. `None` if we never issued it, or it
    /// has since been replaced or purged.
    pub fn lease_consumed(&self, lease_id: &LeaseID) -> Option<bool> {
        self.inner.lock().leases.get(lease_id).map(|rec| rec.consumed)
    }

    /// Revoke an identity's active claim in a family as if another device
    /// did it: lease, sign, and commit a revoke link, all in one step.
    pub fn revoke_externally(&self, identity: &IdentityID, family: ClaimFamily, key: &SigningKey) -> Result<LinkID> {
        let mut inner = self.inner.lock();
        let state = inner.state(identity)?;
        let active = state
            .active_for(family)
            .ok_or_else(|| Error::ClaimNotFound(family.to_string()))?
            .clone();
        let lease = inner.issue_lease(&[active.link_id().clone()], self.lease_ttl)?;
        let signed = ClaimSigner::new(key).sign_revoke(identity, family, state.tip(), active.link_id(), lease.merkle_root())?;
        let link = inner.accept(identity, build_request(&signed, Some(&lease)))?;
        debug!(identity = %identity, family = %family, link = %link.link_id(), "revoked claim out of band");
        Ok(link.link_id().clone())
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ChainStore for MemoryChainStore {
    async fn load_chain(&self, identity: &IdentityID) -> Result<ChainState> {
        self.delay().await;
        self.inner.lock().state(identity)
    }

    async fn post_link(&self, identity: &IdentityID, request: SubmitRequest) -> Result<()> {
        self.delay().await;
        let mut inner = self.inner.lock();
        inner.submissions += 1;
        match inner.accept(identity, request) {
            Ok(link) => {
                debug!(identity = %identity, seqno = link.seqno(), link = %link.link_id(), "accepted link");
                Ok(())
            }
            Err(e) => {
                warn!(identity = %identity, error = %e, "rejected link");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl LeaseService for MemoryChainStore {
    async fn request_downgrade_lease(&self, link_ids: &[LinkID]) -> Result<Lease> {
        self.delay().await;
        self.inner.lock().issue_lease(link_ids, self.lease_ttl)
    }
}
