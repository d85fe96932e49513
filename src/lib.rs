//! Claimchain core: registering cryptocurrency address claims on an identity's
//! signature chain.
//!
//! Every identity owns an append-only chain of signed links. A link either
//! claims an address ("this bitcoin address is mine") or revokes earlier
//! links. Claims are grouped into families, and an identity may only have one
//! active claim per family, so replacing an address means revoking the old
//! claim in the same link that makes the new one.
//!
//! The hard part is doing that safely:
//!
//! 1. The old claim can only be revoked under a short-lived lease from the
//! ordering service, issued against a specific merkle root. If someone else is
//! revoking the same claim (another device, another process) only one of us
//! gets the lease.
//! 1. Links are signed in one of two formats. V1 signs the claim payload
//! alone. V2 signs an envelope binding the payload to its place in the chain
//! (sequence number, previous link, revocation flag).
//! 1. Within a process, every operation that reads an identity's chain tip,
//! signs against it, and submits is serialized per identity, so two of them
//! can't both land at the same sequence number.
//!
//! Everything this crate talks to (the chain store, the lease service, key
//! access) is a trait, with in-memory implementations in [memory] and
//! [keys] for tests and local use. Start with [registrar::Registrar].

pub mod error;
pub(crate) mod util;
pub mod crypto;
pub mod claim;
pub mod chain;
pub mod config;
pub mod guard;
pub mod keys;
pub mod lease;
pub mod memory;
pub mod registrar;
pub mod signer;
pub mod store;
pub mod submit;

pub use util::{ser::base64_decode, ser::base64_encode, Timestamp};
