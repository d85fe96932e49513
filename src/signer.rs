//! Turns a validated claim into a signed chain link.
//!
//! The claim itself (and whatever it revokes) goes into an [InnerPayload].
//! What gets signed depends on the [SignatureVersion]:
//!
//! - V1 signs the encoded inner payload directly. The link commits to nothing
//!   about its position in the chain; the store places it.
//! - V2 wraps the payload's hash in an [OuterLink] envelope that commits the
//!   sequence number, the previous link, the link type, and whether the link
//!   revokes anything, and signs the envelope. The inner payload travels next
//!   to the signature so the store can check the two against each other.
//!
//! Either way, the thing submitted is a base64-encoded [SignedBlob], and the
//! link's [ID][LinkID] is the hash of that blob.

use crate::{
    chain::{ChainTip, IdentityID, LinkID, LinkType, MerkleRoot, SeqType},
    claim::{Claim, ClaimFamily, ClaimType},
    crypto::{Hash, KeyID, SignKeypairPublic, SignKeypairSignature, SigningKey},
    error::{Error, Result},
    util::{ser, Timestamp},
};
use getset;
use rasn::{types::OctetString, AsnType, Decode, Encode};
use tracing::debug;

/// Which encoding a link's signature uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureVersion {
    /// Signature over the inner payload only.
    V1,
    /// Signature over an envelope binding the payload into the chain.
    #[default]
    V2,
}

impl SignatureVersion {
    /// Map the raw version number callers hand us. `0` means "unset" and gets
    /// the latest version.
    pub fn from_raw(version: u8) -> Result<Self> {
        match version {
            0 | 2 => Ok(Self::V2),
            1 => Ok(Self::V1),
            _ => Err(Error::InvalidSignatureVersion(version)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

impl std::fmt::Display for SignatureVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_u8())
    }
}

/// What a link does.
#[derive(Debug, Clone, PartialEq, AsnType, Encode, Decode)]
#[rasn(choice)]
pub enum LinkBody {
    /// Claim an address.
    #[rasn(tag(explicit(0)))]
    Cryptocurrency {
        #[rasn(tag(explicit(0)))]
        family: ClaimFamily,
        #[rasn(tag(explicit(1)))]
        ty: ClaimType,
        #[rasn(tag(explicit(2)))]
        address: String,
    },
    /// Drop the active claim in a family without replacing it.
    #[rasn(tag(explicit(1)))]
    Revoke {
        #[rasn(tag(explicit(0)))]
        family: ClaimFamily,
    },
}

impl LinkBody {
    pub fn link_type(&self) -> LinkType {
        match self {
            Self::Cryptocurrency { .. } => LinkType::Cryptocurrency,
            Self::Revoke { .. } => LinkType::Revoke,
        }
    }

    pub fn family(&self) -> ClaimFamily {
        match self {
            Self::Cryptocurrency { family, .. } => *family,
            Self::Revoke { family } => *family,
        }
    }

    /// The claim this body makes, if it makes one.
    pub fn claim(&self) -> Option<Claim> {
        match self {
            Self::Cryptocurrency { ty, address, .. } => Some(Claim::new(*ty, address.clone())),
            Self::Revoke { .. } => None,
        }
    }
}

/// The signed content of a link.
#[derive(Debug, Clone, PartialEq, AsnType, Encode, Decode, getset::Getters, getset::CopyGetters)]
pub struct InnerPayload {
    #[rasn(tag(explicit(0)))]
    #[getset(get_copy = "pub")]
    version: u8,
    #[rasn(tag(explicit(1)))]
    #[getset(get = "pub")]
    identity: String,
    /// Creation time, unix seconds
    #[rasn(tag(explicit(2)))]
    #[getset(get_copy = "pub")]
    ctime: i64,
    #[rasn(tag(explicit(3)))]
    #[getset(get = "pub")]
    signing_key: SignKeypairPublic,
    #[rasn(tag(explicit(4)))]
    #[getset(get = "pub")]
    body: LinkBody,
    /// The links this one revokes
    #[rasn(tag(explicit(5)))]
    #[getset(get = "pub")]
    revokes: Vec<LinkID>,
    /// The snapshot the revocation lease was issued against
    #[rasn(tag(explicit(6)))]
    #[getset(get = "pub")]
    merkle_root: Option<MerkleRoot>,
}

/// The V2 envelope. Everything here can be rebuilt by a verifier from the
/// chain it's appending to plus the inner payload.
#[derive(Debug, Clone, PartialEq, AsnType, Encode, Decode, getset::Getters, getset::CopyGetters)]
pub struct OuterLink {
    #[rasn(tag(explicit(0)))]
    #[getset(get_copy = "pub")]
    version: u8,
    #[rasn(tag(explicit(1)))]
    #[getset(get_copy = "pub")]
    seqno: u64,
    #[rasn(tag(explicit(2)))]
    #[getset(get = "pub")]
    prev: Option<LinkID>,
    #[rasn(tag(explicit(3)))]
    #[getset(get = "pub")]
    inner_hash: Hash,
    #[rasn(tag(explicit(4)))]
    #[getset(get_copy = "pub")]
    link_type: LinkType,
    #[rasn(tag(explicit(5)))]
    #[getset(get_copy = "pub")]
    seq_type: SeqType,
    #[rasn(tag(explicit(6)))]
    #[getset(get_copy = "pub")]
    has_revokes: bool,
    /// Always false: a store that doesn't understand this link type must
    /// reject it rather than skip it.
    #[rasn(tag(explicit(7)))]
    #[getset(get_copy = "pub")]
    ignore_if_unsupported: bool,
}

impl OuterLink {
    /// Rebuild the envelope a V2 link at `seqno` (after `prev`) must have
    /// signed for the given inner payload bytes.
    pub fn reconstruct(seqno: u64, prev: Option<LinkID>, inner: &[u8], link_type: LinkType, has_revokes: bool) -> Self {
        Self {
            version: 2,
            seqno,
            prev,
            inner_hash: Hash::new_blake3(inner),
            link_type,
            seq_type: SeqType::Public,
            has_revokes,
            ignore_if_unsupported: false,
        }
    }
}

/// The outer signature, as it goes over the wire.
#[derive(Debug, Clone, PartialEq, AsnType, Encode, Decode)]
#[rasn(choice)]
pub enum SignedBlob {
    #[rasn(tag(explicit(0)))]
    V1 {
        #[rasn(tag(explicit(0)))]
        key: SignKeypairPublic,
        #[rasn(tag(explicit(1)))]
        payload: OctetString,
        #[rasn(tag(explicit(2)))]
        signature: SignKeypairSignature,
    },
    #[rasn(tag(explicit(1)))]
    V2 {
        #[rasn(tag(explicit(0)))]
        key: SignKeypairPublic,
        #[rasn(tag(explicit(1)))]
        outer: OctetString,
        #[rasn(tag(explicit(2)))]
        signature: SignKeypairSignature,
    },
}

/// A link that's been signed but not yet submitted.
#[derive(Debug, Clone, PartialEq, getset::Getters, getset::CopyGetters)]
pub struct SignedLink {
    #[getset(get_copy = "pub")]
    version: SignatureVersion,
    /// base64 of the encoded [SignedBlob]
    #[getset(get = "pub")]
    sig: String,
    /// base64 of the encoded [InnerPayload], V2 only
    #[getset(get = "pub")]
    sig_inner: Option<String>,
    #[getset(get = "pub")]
    link_id: LinkID,
    /// The seqno this link was signed to land at
    #[getset(get_copy = "pub")]
    seqno: u64,
    #[getset(get_copy = "pub")]
    link_type: LinkType,
    #[getset(get_copy = "pub")]
    has_revokes: bool,
    #[getset(get = "pub")]
    signing_kid: KeyID,
}

/// Produces signed links with a borrowed key. The key is only used for the
/// duration of the signer.
pub struct ClaimSigner<'a> {
    key: &'a SigningKey,
}

impl<'a> ClaimSigner<'a> {
    pub fn new(key: &'a SigningKey) -> Self {
        Self { key }
    }

    /// Sign a claim registration to be appended after `tip`. If it replaces an
    /// existing claim, `revoke` names the link being superseded and `anchor`
    /// is the merkle root the revocation lease was issued against.
    pub fn sign_claim(
        &self,
        identity: &IdentityID,
        claim: &Claim,
        version: SignatureVersion,
        tip: &ChainTip,
        revoke: Option<&LinkID>,
        anchor: Option<&MerkleRoot>,
    ) -> Result<SignedLink> {
        let body = LinkBody::Cryptocurrency {
            family: claim.family(),
            ty: *claim.ty(),
            address: claim.address().clone(),
        };
        self.sign_link(identity, body, version, tip, revoke.into_iter().cloned().collect(), anchor)
    }

    /// Sign a plain revocation of a family's active claim. Revocations only
    /// exist as V2 links.
    pub fn sign_revoke(
        &self,
        identity: &IdentityID,
        family: ClaimFamily,
        tip: &ChainTip,
        revoke: &LinkID,
        anchor: &MerkleRoot,
    ) -> Result<SignedLink> {
        self.sign_link(
            identity,
            LinkBody::Revoke { family },
            SignatureVersion::V2,
            tip,
            vec![revoke.clone()],
            Some(anchor),
        )
    }

    fn sign_link(
        &self,
        identity: &IdentityID,
        body: LinkBody,
        version: SignatureVersion,
        tip: &ChainTip,
        revokes: Vec<LinkID>,
        anchor: Option<&MerkleRoot>,
    ) -> Result<SignedLink> {
        self.key
            .check()
            .map_err(|e| Error::SigningFailed(format!("key {} failed its check: {}", self.key.key_id(), e)))?;
        let link_type = body.link_type();
        let has_revokes = !revokes.is_empty();
        let inner = InnerPayload {
            version: version.as_u8(),
            identity: identity.as_str().to_string(),
            ctime: Timestamp::now().unix(),
            signing_key: self.key.public(),
            body,
            revokes,
            merkle_root: anchor.cloned(),
        };
        let inner_bytes = ser::serialize(&inner).map_err(|e| Error::SigningFailed(format!("encoding payload: {}", e)))?;
        let (blob, sig_inner) = match version {
            SignatureVersion::V1 => {
                let signature = self.sign_bytes(&inner_bytes)?;
                let blob = SignedBlob::V1 {
                    key: self.key.public(),
                    payload: OctetString::from(inner_bytes),
                    signature,
                };
                (blob, None)
            }
            SignatureVersion::V2 => {
                let outer = OuterLink::reconstruct(tip.next_seqno(), tip.link_id().clone(), &inner_bytes, link_type, has_revokes);
                let outer_bytes = ser::serialize(&outer).map_err(|e| Error::SigningFailed(format!("encoding envelope: {}", e)))?;
                let signature = self.sign_bytes(&outer_bytes)?;
                let blob = SignedBlob::V2 {
                    key: self.key.public(),
                    outer: OctetString::from(outer_bytes),
                    signature,
                };
                (blob, Some(ser::base64_encode(&inner_bytes)))
            }
        };
        let blob_bytes = ser::serialize(&blob).map_err(|e| Error::SigningFailed(format!("encoding signature: {}", e)))?;
        let link_id = LinkID::from_signed(&blob_bytes);
        debug!(link = %link_id, seqno = tip.next_seqno(), version = %version, link_type = link_type.as_str(), "signed link");
        Ok(SignedLink {
            version,
            sig: ser::base64_encode(&blob_bytes),
            sig_inner,
            link_id,
            seqno: tip.next_seqno(),
            link_type,
            has_revokes,
            signing_kid: self.key.key_id(),
        })
    }

    fn sign_bytes(&self, data: &[u8]) -> Result<SignKeypairSignature> {
        self.key.sign(data).map_err(|e| Error::SigningFailed(e.to_string()))
    }
}

/// A signed link taken apart and checked.
#[derive(Debug, Clone, PartialEq, getset::Getters)]
#[getset(get = "pub")]
pub struct VerifiedLink {
    version: SignatureVersion,
    link_id: LinkID,
    signing_key: SignKeypairPublic,
    payload: InnerPayload,
    /// The envelope, V2 only
    outer: Option<OuterLink>,
}

fn decode_blob(sig: &str) -> Result<(LinkID, SignedBlob)> {
    let bytes = ser::base64_decode(sig)?;
    let blob: SignedBlob = ser::deserialize(&bytes)?;
    Ok((LinkID::from_signed(&bytes), blob))
}

fn check_payload_key(payload: &InnerPayload, key: &SignKeypairPublic) -> Result<()> {
    if payload.signing_key() != key {
        Err(Error::InvalidLink(String::from("payload names a different signing key than the signature")))?;
    }
    Ok(())
}

/// Verify a V1 link: the signature must cover the inner payload.
pub fn verify_v1(sig: &str) -> Result<VerifiedLink> {
    let (link_id, blob) = decode_blob(sig)?;
    match blob {
        SignedBlob::V1 { key, payload, signature } => {
            key.verify(&signature, payload.as_ref())?;
            let payload: InnerPayload = ser::deserialize(payload.as_ref())?;
            check_payload_key(&payload, &key)?;
            if payload.version() != SignatureVersion::V1.as_u8() {
                Err(Error::InvalidLink(format!("v1 signature over a v{} payload", payload.version())))?;
            }
            Ok(VerifiedLink {
                version: SignatureVersion::V1,
                link_id,
                signing_key: key,
                payload,
                outer: None,
            })
        }
        SignedBlob::V2 { .. } => Err(Error::InvalidLink(String::from("expected a v1 signature"))),
    }
}

/// Verify a V2 link: the signature must cover the envelope, and the envelope
/// must commit to exactly the inner payload we were given.
pub fn verify_v2(sig: &str, sig_inner: &str) -> Result<VerifiedLink> {
    let (link_id, blob) = decode_blob(sig)?;
    match blob {
        SignedBlob::V2 { key, outer, signature } => {
            key.verify(&signature, outer.as_ref())?;
            let outer: OuterLink = ser::deserialize(outer.as_ref())?;
            let inner_bytes = ser::base64_decode(sig_inner)?;
            if outer.version() != 2 {
                Err(Error::InvalidLink(format!("envelope version {}", outer.version())))?;
            }
            if outer.inner_hash() != &Hash::new_blake3(&inner_bytes) {
                Err(Error::InvalidLink(String::from("envelope does not commit to the inner payload")))?;
            }
            let payload: InnerPayload = ser::deserialize(&inner_bytes)?;
            check_payload_key(&payload, &key)?;
            if payload.version() != SignatureVersion::V2.as_u8() {
                Err(Error::InvalidLink(format!("v2 envelope around a v{} payload", payload.version())))?;
            }
            if outer.has_revokes() == payload.revokes().is_empty() {
                Err(Error::InvalidLink(String::from("envelope revocation flag disagrees with the payload")))?;
            }
            if outer.link_type() != payload.body().link_type() {
                Err(Error::InvalidLink(String::from("envelope link type disagrees with the payload")))?;
            }
            if outer.seqno() == 0 || (outer.seqno() == 1) != outer.prev().is_none() {
                Err(Error::InvalidLink(format!("bad linkage at seqno {}", outer.seqno())))?;
            }
            Ok(VerifiedLink {
                version: SignatureVersion::V2,
                link_id,
                signing_key: key,
                payload,
                outer: Some(outer),
            })
        }
        SignedBlob::V1 { .. } => Err(Error::InvalidLink(String::from("expected a v2 signature"))),
    }
}

/// Verify a submitted link of either version.
pub fn verify_signed(sig: &str, sig_inner: Option<&str>) -> Result<VerifiedLink> {
    match sig_inner {
        Some(inner) => verify_v2(sig, inner),
        None => verify_v1(sig),
    }
}
