//! The claim chain: an append-only, hash-linked list of signed links for one
//! identity.
//!
//! Every link has a sequence number (strictly increasing, starting at 1) and
//! points at the link before it by [LinkID]. The chain store is the source of
//! truth for which links exist; this module holds the types we use to talk
//! about the chain and a loader that reads a consistent snapshot of it.

mod loader;

pub use loader::ChainStateLoader;

use crate::{
    claim::{Claim, ClaimFamily},
    crypto::{Hash, KeyID},
    error::{Error, Result},
    signer::SignatureVersion,
};
use getset;
use rasn::{AsnType, Decode, Encode};
use std::collections::BTreeMap;
use std::ops::Deref;

/// The name of an identity that owns a claim chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityID(String);

impl IdentityID {
    pub fn new<T: Into<String>>(name: T) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            Err(Error::InvalidIdentity(String::from("identity name cannot be empty")))?;
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a committed link. This is the hash of the link's signature blob,
/// so it commits to everything the link signed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, AsnType, Encode, Decode)]
#[rasn(delegate)]
pub struct LinkID(Hash);

impl LinkID {
    /// Derive a link's ID from its encoded signature blob.
    pub fn from_signed(blob: &[u8]) -> Self {
        Self(Hash::new_blake3(blob))
    }

    #[cfg(test)]
    pub(crate) fn random() -> Self {
        Self(Hash::random_blake3())
    }
}

impl Deref for LinkID {
    type Target = Hash;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<&str> for LinkID {
    type Error = Error;

    fn try_from(string: &str) -> std::result::Result<Self, Self::Error> {
        Ok(Self(Hash::try_from(string)?))
    }
}

impl std::fmt::Display for LinkID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of change a link makes to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsnType, Encode, Decode)]
#[rasn(choice)]
pub enum LinkType {
    /// Register a cryptocurrency address claim.
    #[rasn(tag(explicit(0)))]
    Cryptocurrency,
    /// Revoke one or more earlier links without replacing them.
    #[rasn(tag(explicit(1)))]
    Revoke,
}

impl LinkType {
    /// The tag sent to the chain store as the submission's `type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cryptocurrency => "cryptocurrency",
            Self::Revoke => "revoke",
        }
    }
}

/// Which sequence a link is part of. We only ever write public links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsnType, Encode, Decode)]
#[rasn(choice)]
pub enum SeqType {
    #[rasn(tag(explicit(0)))]
    Public,
    #[rasn(tag(explicit(1)))]
    Private,
    #[rasn(tag(explicit(2)))]
    Semiprivate,
}

/// A snapshot of the global ordering structure. Leases are issued against one
/// of these, and a revocation signs the one its lease was issued against.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode, getset::Getters, getset::CopyGetters)]
pub struct MerkleRoot {
    #[rasn(tag(explicit(0)))]
    #[getset(get_copy = "pub")]
    seqno: u64,
    #[rasn(tag(explicit(1)))]
    #[getset(get = "pub")]
    hash: Hash,
}

impl MerkleRoot {
    pub fn new(seqno: u64, hash: Hash) -> Self {
        Self { seqno, hash }
    }
}

/// The last committed link of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Default, getset::Getters, getset::CopyGetters)]
pub struct ChainTip {
    /// Sequence number of the last link, 0 for an empty chain.
    #[getset(get_copy = "pub")]
    seqno: u64,
    /// ID of the last link, `None` for an empty chain.
    #[getset(get = "pub")]
    link_id: Option<LinkID>,
}

impl ChainTip {
    pub fn new(seqno: u64, link_id: Option<LinkID>) -> Self {
        Self { seqno, link_id }
    }

    /// The sequence number the next link must carry.
    pub fn next_seqno(&self) -> u64 {
        self.seqno + 1
    }
}

/// The currently-active claim for a family, and the link that made it.
#[derive(Debug, Clone, PartialEq, Eq, getset::Getters, getset::CopyGetters)]
pub struct ActiveClaim {
    #[getset(get = "pub")]
    link_id: LinkID,
    #[getset(get_copy = "pub")]
    seqno: u64,
    #[getset(get = "pub")]
    claim: Claim,
}

impl ActiveClaim {
    pub fn new(link_id: LinkID, seqno: u64, claim: Claim) -> Self {
        Self { link_id, seqno, claim }
    }
}

/// A point-in-time view of an identity's chain: its tip and what's active.
#[derive(Debug, Clone, PartialEq, getset::Getters)]
#[getset(get = "pub")]
pub struct ChainState {
    identity: IdentityID,
    tip: ChainTip,
    active: BTreeMap<ClaimFamily, ActiveClaim>,
}

impl ChainState {
    pub fn new(identity: IdentityID, tip: ChainTip, active: BTreeMap<ClaimFamily, ActiveClaim>) -> Self {
        Self { identity, tip, active }
    }

    /// The active claim in a family, if there is one.
    pub fn active_for(&self, family: ClaimFamily) -> Option<&ActiveClaim> {
        self.active.get(&family)
    }
}

/// A link as committed to the chain. Produced by the signer, appended by the
/// store, never changed after that. Whether a link has since been revoked is
/// tracked by the store, not the link.
#[derive(Debug, Clone, PartialEq, getset::Getters, getset::CopyGetters)]
pub struct ChainLink {
    #[getset(get_copy = "pub")]
    seqno: u64,
    #[getset(get = "pub")]
    prev: Option<LinkID>,
    #[getset(get = "pub")]
    link_id: LinkID,
    #[getset(get_copy = "pub")]
    link_type: LinkType,
    #[getset(get_copy = "pub")]
    version: SignatureVersion,
    #[getset(get_copy = "pub")]
    has_revokes: bool,
    #[getset(get_copy = "pub")]
    seq_type: SeqType,
    #[getset(get = "pub")]
    signing_kid: KeyID,
    /// The encoded outer signature, as submitted
    #[getset(get = "pub")]
    sig: String,
    /// The encoded inner payload (V2 only), as submitted
    #[getset(get = "pub")]
    sig_inner: Option<String>,
    /// The links this one revoked
    #[getset(get = "pub")]
    revokes: Vec<LinkID>,
    /// The claim this link made, if it made one
    #[getset(get = "pub")]
    claim: Option<Claim>,
}

impl ChainLink {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        seqno: u64,
        prev: Option<LinkID>,
        link_id: LinkID,
        link_type: LinkType,
        version: SignatureVersion,
        has_revokes: bool,
        seq_type: SeqType,
        signing_kid: KeyID,
        sig: String,
        sig_inner: Option<String>,
        revokes: Vec<LinkID>,
        claim: Option<Claim>,
    ) -> Self {
        Self {
            seqno,
            prev,
            link_id,
            link_type,
            version,
            has_revokes,
            seq_type,
            signing_kid,
            sig,
            sig_inner,
            revokes,
            claim,
        }
    }
}
