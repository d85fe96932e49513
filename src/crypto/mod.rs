//! The crypto module wraps the algorithms we use for hashing, signing, and
//! locking away key material.
//!
//! Specific algorithms are wrapped in descriptive enums (a `Hash` can be a
//! `Blake3` hash, a `SigningKey` can be an `Ed25519` key) so the primitives can
//! be expanded without building new interfaces around them.

mod hash;
mod secret_key;
mod sign_key;

pub use hash::*;
pub use secret_key::*;
pub use sign_key::*;
