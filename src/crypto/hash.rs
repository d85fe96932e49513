use crate::{
    error::Error,
    util::ser,
};
use rasn::{types::OctetString, AsnType, Decode, Encode};
use std::hash::{Hash as StdHash, Hasher};

/// A cryptographic hash. By defining this as an enum, we allow expansion of
/// hash algorithms in the future.
///
/// When stringified, the hash is in the format `base64([<hash bytes>|<u8 tag>])`
/// where the `tag` is the specific hash algorithm we use.
#[derive(Clone, Debug, PartialEq, Eq, AsnType, Encode, Decode)]
#[rasn(choice)]
pub enum Hash {
    /// Blake3 256bit hash
    #[rasn(tag(explicit(0)))]
    Blake3(OctetString),
}

impl Hash {
    /// Create a new blake3 hash from a message
    pub fn new_blake3(message: &[u8]) -> Self {
        let hash = blake3::hash(message);
        Self::Blake3(OctetString::copy_from_slice(hash.as_bytes()))
    }

    /// Hash several byte strings in sequence, as if they were concatenated.
    pub fn new_blake3_chained(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self::Blake3(OctetString::copy_from_slice(hasher.finalize().as_bytes()))
    }

    /// Return the byte slice representing this hash.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Blake3(bin) => bin.as_ref(),
        }
    }

    #[cfg(test)]
    pub(crate) fn random_blake3() -> Self {
        use rand::RngCore;
        let mut randbuf = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut randbuf);
        Self::Blake3(OctetString::copy_from_slice(&randbuf))
    }
}

impl StdHash for Hash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl From<&Hash> for String {
    fn from(hash: &Hash) -> Self {
        let mut enc = Vec::from(hash.as_bytes());
        match hash {
            Hash::Blake3(..) => enc.push(0),
        }
        ser::base64_encode(&enc)
    }
}

impl TryFrom<&str> for Hash {
    type Error = Error;

    fn try_from(string: &str) -> std::result::Result<Self, Self::Error> {
        let dec = ser::base64_decode(string)?;
        let (tag, bytes) = dec.split_last().ok_or(Error::BadLength)?;
        match tag {
            0 => {
                if bytes.len() != 32 {
                    Err(Error::BadLength)?;
                }
                Ok(Self::Blake3(OctetString::copy_from_slice(bytes)))
            }
            _ => Err(Error::CryptoAlgoMismatch),
        }
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from(self))
    }
}
