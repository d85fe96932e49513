//! The main error enum for the project lives here, and documents the various
//! conditions that can arise while mutating a claim chain.

use thiserror::Error;

/// This is our error enum. It contains an entry for any part of the system in
/// which an expectation is not met or a problem occurs.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to encode a value into its ASN.1 (DER) form.
    #[error("error encoding ASN.1 value")]
    ASNSerialize,

    /// Failed to decode a value from its ASN.1 (DER) form.
    #[error("error decoding ASN.1 value")]
    ASNDeserialize,

    /// The key-access collaborator refused to hand over a signing key (bad
    /// passphrase, unknown identity, locked keyring...)
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Some bytes were not the length we expected.
    #[error("bad length")]
    BadLength,

    /// The chain snapshot we loaded doesn't hold together (a link without its
    /// predecessor, an active claim past the tip, etc).
    #[error("chain state is inconsistent: {0}")]
    ChainInconsistent(String),

    /// The identity already has an active claim in this family and replacement
    /// was not requested.
    #[error("an active claim already exists for family {0}")]
    ClaimAlreadyExists(String),

    /// There is no active claim in the given family.
    #[error("no active claim found for family {0}")]
    ClaimNotFound(String),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    /// A tagged value used an algorithm we don't know about.
    #[error("cryptographic algorithm mismatch")]
    CryptoAlgoMismatch,

    /// Bad key.
    #[error("key is invalid")]
    CryptoBadKey,

    /// Could not generate key from passphrase
    #[error("key derivation from passphrase failed")]
    CryptoKDFFailed,

    /// Failed to open a sealed object.
    #[error("failed to open a sealed object")]
    CryptoOpenFailed,

    /// Failed to seal an object.
    #[error("failed to seal an object")]
    CryptoSealFailed,

    /// A signature failed to verify.
    #[error("the given signature/public key/data combo does not verify")]
    CryptoSignatureVerificationFailed,

    /// An error while decoding base64.
    #[error("base64 deserialization error")]
    DeserializeBase64(#[from] base64::DecodeError),

    /// Another chain-mutating operation holds the identity's guard.
    #[error("chain is locked by another operation: {0}")]
    GuardBusy(String),

    /// The identity is not known to the chain store.
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// The identity name given is not usable.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// The address given is malformed or doesn't belong to the wanted family.
    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    /// A signed link decoded fine but what it says doesn't hold together (the
    /// envelope disagrees with the payload, the wrong key is named...)
    #[error("invalid link: {0}")]
    InvalidLink(String),

    /// We were handed a signature version we can't produce.
    #[error("invalid signature version: {0}")]
    InvalidSignatureVersion(u8),

    /// The lease service refused to issue a lease (link already revoked
    /// elsewhere, stale anchor, conflicting lease outstanding).
    #[error("lease unavailable: {0}")]
    LeaseUnavailable(String),

    /// The signing key is bad or the signature could not be produced.
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// The chain store refused the link (sequence mismatch, bad lease, bad
    /// signature). The whole flow must restart from a fresh chain read.
    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    /// A collaborator could not be reached (or did not answer in time).
    #[error("unreachable: {0}")]
    Unreachable(String),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        // serde_yaml::Error is not eq-able, so compare the debug output.
        format!("{:?}", self) == format!("{:?}", other)
    }
}

/// Wraps `std::result::Result` around our `Error` enum
pub type Result<T> = std::result::Result<T, Error>;
