//! Getting hold of a signing key.
//!
//! The core never keeps keys around. Whenever it needs to sign, it asks a
//! [KeyAccess] for the identity's key (with a human-readable reason, in case
//! someone has to be asked for a passphrase), uses it, and drops it.

use crate::{
    chain::IdentityID,
    crypto::{derive_secret_key, Sealed, SigningKey, KDF_MEM_INTERACTIVE, KDF_OPS_INTERACTIVE},
    error::{Error, Result},
};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::{CryptoRng, RngCore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Supplies signing keys.
#[async_trait]
pub trait KeyAccess: Send + Sync {
    /// Return the identity's signing key, or `AuthFailed` if it can't be
    /// unlocked.
    async fn signing_key(&self, identity: &IdentityID, reason: &str) -> Result<SigningKey>;
}

#[async_trait]
impl<T: KeyAccess + ?Sized> KeyAccess for Arc<T> {
    async fn signing_key(&self, identity: &IdentityID, reason: &str) -> Result<SigningKey> {
        (**self).signing_key(identity, reason).await
    }
}

/// Asks someone (usually a person) for the passphrase that unlocks an
/// identity's key.
#[async_trait]
pub trait SecretPrompt: Send + Sync {
    async fn passphrase(&self, identity: &IdentityID, reason: &str) -> Result<Zeroizing<String>>;
}

/// Keys held in memory, unlocked. Mostly useful for testing.
#[derive(Default)]
pub struct MemoryKeyAccess {
    keys: RwLock<HashMap<IdentityID, SigningKey>>,
}

impl MemoryKeyAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: IdentityID, key: SigningKey) {
        self.keys.write().insert(identity, key);
    }
}

#[async_trait]
impl KeyAccess for MemoryKeyAccess {
    async fn signing_key(&self, identity: &IdentityID, _reason: &str) -> Result<SigningKey> {
        self.keys
            .read()
            .get(identity)
            .cloned()
            .ok_or_else(|| Error::AuthFailed(format!("no key for {}", identity)))
    }
}

struct LockedKey {
    public: [u8; 32],
    salt: [u8; 16],
    sealed: Sealed,
}

/// Holds each identity's key sealed under a passphrase-derived key (Argon2id,
/// then XChaCha20-Poly1305) and asks a [SecretPrompt] for the passphrase
/// whenever a key is needed.
pub struct Keyring<P> {
    prompt: P,
    keys: RwLock<HashMap<IdentityID, LockedKey>>,
    kdf_ops: u32,
    kdf_mem: u32,
}

impl<P: SecretPrompt> Keyring<P> {
    pub fn new(prompt: P) -> Self {
        Self::with_kdf(prompt, KDF_OPS_INTERACTIVE, KDF_MEM_INTERACTIVE)
    }

    /// Use non-default Argon2 difficulty (`ops` passes over `mem` KiB).
    pub fn with_kdf(prompt: P, kdf_ops: u32, kdf_mem: u32) -> Self {
        Self {
            prompt,
            keys: RwLock::new(HashMap::new()),
            kdf_ops,
            kdf_mem,
        }
    }

    /// Lock an identity's key away under a passphrase, replacing whatever was
    /// there before.
    pub fn store<R: RngCore + CryptoRng>(&self, rng: &mut R, identity: &IdentityID, key: &SigningKey, passphrase: &str) -> Result<()> {
        key.check()?;
        let mut salt = [0u8; 16];
        rng.fill_bytes(&mut salt);
        let master = derive_secret_key(passphrase.as_bytes(), &salt, self.kdf_ops, self.kdf_mem)?;
        let sealed = master.seal(rng, key.seed())?;
        let public = match key {
            SigningKey::Ed25519 { public, .. } => *public,
        };
        self.keys.write().insert(identity.clone(), LockedKey { public, salt, sealed });
        debug!(identity = %identity, kid = %key.key_id(), "stored key in keyring");
        Ok(())
    }

    pub fn contains(&self, identity: &IdentityID) -> bool {
        self.keys.read().contains_key(identity)
    }

    fn unlock(&self, identity: &IdentityID, passphrase: &str) -> Result<SigningKey> {
        let keys = self.keys.read();
        let locked = keys
            .get(identity)
            .ok_or_else(|| Error::AuthFailed(format!("no key for {}", identity)))?;
        let master = derive_secret_key(passphrase.as_bytes(), &locked.salt, self.kdf_ops, self.kdf_mem)?;
        let seed = Zeroizing::new(master.open(&locked.sealed).map_err(|_| Error::AuthFailed(String::from("incorrect passphrase")))?);
        let seed: [u8; 32] = seed
            .as_slice()
            .try_into()
            .map_err(|_| Error::AuthFailed(String::from("stored key is corrupt")))?;
        let key = SigningKey::from_parts(locked.public, seed);
        key.check().map_err(|_| Error::AuthFailed(String::from("stored key is corrupt")))?;
        Ok(key)
    }
}

#[async_trait]
impl<P: SecretPrompt> KeyAccess for Keyring<P> {
    async fn signing_key(&self, identity: &IdentityID, reason: &str) -> Result<SigningKey> {
        if !self.contains(identity) {
            Err(Error::AuthFailed(format!("no key for {}", identity)))?;
        }
        let passphrase = self.prompt.passphrase(identity, reason).await?;
        self.unlock(identity, passphrase.as_str()).map_err(|e| {
            warn!(identity = %identity, error = %e, "failed to unlock key");
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test::{identity, rng, signing_key};
    use parking_lot::Mutex;

    struct FixedPrompt {
        answer: &'static str,
        asked: Mutex<Vec<String>>,
    }

    impl FixedPrompt {
        fn new(answer: &'static str) -> Self {
            Self {
                answer,
                asked: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SecretPrompt for FixedPrompt {
        async fn passphrase(&self, _identity: &IdentityID, reason: &str) -> Result<Zeroizing<String>> {
            self.asked.lock().push(reason.to_string());
            Ok(Zeroizing::new(self.answer.to_string()))
        }
    }

    #[tokio::test]
    async fn memory_keys() {
        let keys = MemoryKeyAccess::new();
        let key = signing_key();
        keys.insert(identity("jerry"), key.clone());
        let got = keys.signing_key(&identity("jerry"), "testing").await.unwrap();
        assert_eq!(got.key_id(), key.key_id());
        let res = keys.signing_key(&identity("tom"), "testing").await;
        assert!(matches!(res, Err(Error::AuthFailed(_))));
    }

    #[tokio::test]
    async fn keyring_unlocks_with_passphrase() {
        let mut rng = rng();
        let key = signing_key();
        let keyring = Keyring::with_kdf(FixedPrompt::new("hunter2"), 1, 1024);
        keyring.store(&mut rng, &identity("jerry"), &key, "hunter2").unwrap();
        let got = keyring.signing_key(&identity("jerry"), "to register a cryptocurrency address").await.unwrap();
        assert_eq!(got.key_id(), key.key_id());
        assert_eq!(got.check(), Ok(()));
        assert_eq!(keyring.prompt.asked.lock().as_slice(), &[String::from("to register a cryptocurrency address")]);
    }

    #[tokio::test]
    async fn keyring_rejects_bad_passphrase() {
        let mut rng = rng();
        let keyring = Keyring::with_kdf(FixedPrompt::new("wrong"), 1, 1024);
        keyring.store(&mut rng, &identity("jerry"), &signing_key(), "hunter2").unwrap();
        let res = keyring.signing_key(&identity("jerry"), "testing").await;
        assert_eq!(res.err(), Some(Error::AuthFailed(String::from("incorrect passphrase"))));
    }

    #[tokio::test]
    async fn keyring_unknown_identity_never_prompts() {
        let keyring = Keyring::with_kdf(FixedPrompt::new("hunter2"), 1, 1024);
        let res = keyring.signing_key(&identity("nobody"), "testing").await;
        assert!(matches!(res, Err(Error::AuthFailed(_))));
        assert!(keyring.prompt.asked.lock().is_empty());
    }
}
