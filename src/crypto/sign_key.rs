use crate::{
    crypto::SecretBytes,
    error::{Error, Result},
    util::ser,
};
use rand::{CryptoRng, RngCore};
use rasn::{types::OctetString, AsnType, Decode, Encode};
use zeroize::Zeroize;

/// A signature derived from a signing keypair.
#[derive(Debug, Clone, PartialEq, Eq, AsnType, Encode, Decode)]
#[rasn(choice)]
pub enum SignKeypairSignature {
    #[rasn(tag(explicit(0)))]
    Ed25519(OctetString),
}

impl AsRef<[u8]> for SignKeypairSignature {
    fn as_ref(&self) -> &[u8] {
        match self {
            Self::Ed25519(sig) => sig.as_ref(),
        }
    }
}

/// An asymmetric signing public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, AsnType, Encode, Decode)]
#[rasn(choice)]
pub enum SignKeypairPublic {
    /// Ed25519 signing public key
    #[rasn(tag(explicit(0)))]
    Ed25519(OctetString),
}

impl SignKeypairPublic {
    /// Verify a value with a detached signature given the public key of the
    /// signer.
    pub fn verify(&self, signature: &SignKeypairSignature, data: &[u8]) -> Result<()> {
        match (self, signature) {
            (Self::Ed25519(pubkey_bytes), SignKeypairSignature::Ed25519(sig_bytes)) => {
                let pub_arr: [u8; 32] = pubkey_bytes.as_ref().try_into().map_err(|_| Error::CryptoSignatureVerificationFailed)?;
                let sig_arr: [u8; 64] = sig_bytes.as_ref().try_into().map_err(|_| Error::CryptoSignatureVerificationFailed)?;
                let pubkey = ed25519_consensus::VerificationKey::try_from(pub_arr)
                    .map_err(|_| Error::CryptoSignatureVerificationFailed)?;
                let sig = ed25519_consensus::Signature::from(sig_arr);
                pubkey.verify(&sig, data).map_err(|_| Error::CryptoSignatureVerificationFailed)?;
                Ok(())
            }
        }
    }

    /// Create a KeyID from this public key.
    pub fn key_id(&self) -> KeyID {
        KeyID(self.clone())
    }
}

/// A value that lets us reference a signing key by a unique identifier. This is
/// what gets sent along with a signature as the `signing_kid`.
///
/// When stringified, the format is `base64([<pubkey bytes>|<u8 tag>])`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyID(SignKeypairPublic);

impl KeyID {
    pub fn as_string(&self) -> String {
        let mut bytes = match &self.0 {
            SignKeypairPublic::Ed25519(pubkey) => Vec::from(pubkey.as_ref()),
        };
        match &self.0 {
            SignKeypairPublic::Ed25519(..) => bytes.push(0),
        }
        ser::base64_encode(&bytes)
    }

    /// The public key this ID references.
    pub fn public(&self) -> &SignKeypairPublic {
        &self.0
    }
}

impl std::fmt::Display for KeyID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

/// A signing key for a device. This is handed to us by whatever manages keys
/// for the identity, used for the duration of one operation, then dropped. It
/// never gets serialized.
pub enum SigningKey {
    /// Ed25519 signing keypair
    Ed25519 { public: [u8; 32], secret: SecretBytes },
}

impl SigningKey {
    /// Create a new ed25519 key
    pub fn new_ed25519<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut randbuf = [0u8; 32];
        rng.fill_bytes(&mut randbuf);
        let key = Self::new_ed25519_from_seed(randbuf);
        randbuf.zeroize();
        key
    }

    /// Create a new ed25519 key from a cryptographic seed
    pub fn new_ed25519_from_seed(seed: [u8; 32]) -> Self {
        let secret = ed25519_consensus::SigningKey::from(seed);
        let public = secret.verification_key().to_bytes();
        Self::Ed25519 {
            public,
            secret: SecretBytes::new(seed),
        }
    }

    /// Build a key from halves we got from somewhere else. Nothing is checked
    /// here, see [check][SigningKey::check].
    pub fn from_parts(public: [u8; 32], seed: [u8; 32]) -> Self {
        Self::Ed25519 {
            public,
            secret: SecretBytes::new(seed),
        }
    }

    /// Make sure the public half of this key actually belongs to the secret
    /// half.
    pub fn check(&self) -> Result<()> {
        match self {
            Self::Ed25519 { public, secret } => {
                let derived = ed25519_consensus::SigningKey::from(*secret.expose_secret()).verification_key().to_bytes();
                if &derived != public {
                    Err(Error::CryptoBadKey)?;
                }
                Ok(())
            }
        }
    }

    /// Sign a value with this key.
    pub fn sign(&self, data: &[u8]) -> Result<SignKeypairSignature> {
        match self {
            Self::Ed25519 { secret, .. } => {
                let seckey = ed25519_consensus::SigningKey::from(*secret.expose_secret());
                let sig_obj = seckey.sign(data);
                Ok(SignKeypairSignature::Ed25519(OctetString::copy_from_slice(&sig_obj.to_bytes())))
            }
        }
    }

    /// Verify a value with a detached signature.
    pub fn verify(&self, signature: &SignKeypairSignature, data: &[u8]) -> Result<()> {
        self.public().verify(signature, data)
    }

    /// Return the public half of this key.
    pub fn public(&self) -> SignKeypairPublic {
        match self {
            Self::Ed25519 { public, .. } => SignKeypairPublic::Ed25519(OctetString::copy_from_slice(public)),
        }
    }

    /// Create a KeyID from this key.
    pub fn key_id(&self) -> KeyID {
        self.public().key_id()
    }

    /// Grab the raw seed so it can be locked away.
    pub(crate) fn seed(&self) -> &[u8; 32] {
        match self {
            Self::Ed25519 { secret, .. } => secret.expose_secret(),
        }
    }
}

impl Clone for SigningKey {
    fn clone(&self) -> Self {
        match self {
            Self::Ed25519 { public, secret } => Self::from_parts(*public, *secret.expose_secret()),
        }
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ed25519 { .. } => write!(f, "SigningKey::Ed25519({})", self.key_id()),
        }
    }
}
