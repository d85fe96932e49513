//! Helpful serialization tools.
//!
//! Anything that gets signed or hashed is encoded as ASN.1 DER so that every
//! party gets the same bytes for the same value. Anything a human might edit
//! (config) is YAML. Binary data that needs to travel as a string is URL-safe
//! base64 without padding.

use crate::error::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rasn::{Decode, Encode};
use serde::de::DeserializeOwned;

/// Encode a value into its canonical (DER) bytes.
pub(crate) fn serialize<T: Encode>(obj: &T) -> Result<Vec<u8>> {
    rasn::der::encode(obj).map_err(|_| Error::ASNSerialize)
}

/// Decode a value from DER bytes.
pub(crate) fn deserialize<T: Decode>(bytes: &[u8]) -> Result<T> {
    rasn::der::decode::<T>(bytes).map_err(|_| Error::ASNDeserialize)
}

pub(crate) fn deserialize_human<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_yaml::from_slice(bytes)?)
}

/// Convert bytes to base64
pub fn base64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
    URL_SAFE_NO_PAD.encode(bytes.as_ref())
}

/// Convert base64 to bytes
pub fn base64_decode<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<u8>> {
    Ok(URL_SAFE_NO_PAD.decode(bytes.as_ref())?)
}
