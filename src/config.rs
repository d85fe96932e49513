//! Knobs for the registrar. Everything has a default, so an empty YAML
//! document is a valid config.

use crate::{
    error::Result,
    signer::SignatureVersion,
    util::ser,
};
use getset;
use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::CopyGetters)]
#[serde(default)]
#[getset(get_copy = "pub")]
pub struct Config {
    /// The signature version used when a caller doesn't pick one (raw `0`).
    default_sig_version: u8,
    /// How long we wait for the key-access collaborator. This covers a human
    /// typing a passphrase, so it's generous.
    key_timeout_ms: u64,
    lease_timeout_ms: u64,
    store_timeout_ms: u64,
    /// How long leases issued by the in-memory store last.
    lease_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_sig_version: 2,
            key_timeout_ms: 120_000,
            lease_timeout_ms: 10_000,
            store_timeout_ms: 10_000,
            lease_ttl_secs: 60,
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        ser::deserialize_human(yaml.as_bytes())
    }

    pub fn key_timeout(&self) -> Duration {
        Duration::from_millis(self.key_timeout_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Resolve a caller's raw signature version. `0` falls back to the
    /// configured default.
    pub fn sig_version(&self, requested: u8) -> Result<SignatureVersion> {
        match requested {
            0 => SignatureVersion::from_raw(self.default_sig_version),
            v => SignatureVersion::from_raw(v),
        }
    }

    pub fn with_timeouts(mut self, key: Duration, lease: Duration, store: Duration) -> Self {
        self.key_timeout_ms = key.as_millis() as u64;
        self.lease_timeout_ms = lease.as_millis() as u64;
        self.store_timeout_ms = store.as_millis() as u64;
        self
    }
}
