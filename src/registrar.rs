//! The registrar runs the whole claim-chain mutation flow for one request:
//!
//! guard → classify → load chain → (lease) → unlock key → sign → submit
//!
//! The guard is held from before the chain is read until after the store has
//! answered, and is released however the operation ends.

use crate::{
    chain::{ChainStateLoader, IdentityID, LinkID},
    claim::{AddressParser, ClaimFamily, ClaimFamilyClassifier, ClaimType, StandardAddressParser},
    config::Config,
    crypto::SigningKey,
    error::{Error, Result},
    guard::ChainMutationGuard,
    keys::KeyAccess,
    lease::{LeaseCoordinator, LeaseService},
    signer::ClaimSigner,
    store::ChainStore,
    submit::ChainSubmitter,
    util::bounded,
};
use getset;
use std::sync::Arc;
use tracing::{debug, info};

const GUARD_LABEL: &str = "CryptocurrencyEngine";
const REVOKE_GUARD_LABEL: &str = "CryptocurrencyRevoke";
const KEY_REASON: &str = "to register a cryptocurrency address";
const REVOKE_KEY_REASON: &str = "to revoke a cryptocurrency address";

/// What to register.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegisterAddressArg {
    pub address: String,
    /// If set (and not empty), the address must belong to this family
    /// (`"bitcoin"`, `"zcash"`).
    pub wanted_family: Option<String>,
    /// Replace the family's active claim if there is one.
    pub force: bool,
    /// Raw signature version: 0 (use the default), 1, or 2.
    pub sig_version: u8,
}

impl RegisterAddressArg {
    pub fn new<T: Into<String>>(address: T) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }
}

/// What got registered.
#[derive(Debug, Clone, PartialEq, getset::Getters, getset::CopyGetters)]
pub struct RegisterAddressRes {
    #[getset(get_copy = "pub")]
    family: ClaimFamily,
    #[getset(get_copy = "pub")]
    ty: ClaimType,
    /// The committed link carrying the claim
    #[getset(get = "pub")]
    link_id: LinkID,
}

/// Registers and revokes cryptocurrency address claims on identities' chains.
pub struct Registrar<K, L, S, P = StandardAddressParser> {
    keys: K,
    leases: L,
    store: S,
    classifier: ClaimFamilyClassifier<P>,
    guard: Arc<ChainMutationGuard>,
    config: Config,
}

impl<K, L, S> Registrar<K, L, S>
where
    K: KeyAccess,
    L: LeaseService,
    S: ChainStore,
{
    pub fn new(keys: K, leases: L, store: S, config: Config) -> Self {
        Self {
            keys,
            leases,
            store,
            classifier: ClaimFamilyClassifier::default(),
            guard: Arc::new(ChainMutationGuard::new()),
            config,
        }
    }
}

impl<K, L, S, P> Registrar<K, L, S, P>
where
    K: KeyAccess,
    L: LeaseService,
    S: ChainStore,
    P: AddressParser,
{
    /// Share a guard with everything else in the process that mutates chains.
    pub fn with_guard(mut self, guard: Arc<ChainMutationGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Swap in a different address parser.
    pub fn with_parser<P2: AddressParser>(self, parser: P2) -> Registrar<K, L, S, P2> {
        Registrar {
            keys: self.keys,
            leases: self.leases,
            store: self.store,
            classifier: ClaimFamilyClassifier::new(parser),
            guard: self.guard,
            config: self.config,
        }
    }

    pub fn name(&self) -> &'static str {
        "Cryptocurrency"
    }

    pub fn guard(&self) -> &Arc<ChainMutationGuard> {
        &self.guard
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn signing_key(&self, identity: &IdentityID, reason: &str) -> Result<SigningKey> {
        bounded("key access", self.config.key_timeout(), self.keys.signing_key(identity, reason)).await
    }

    /// Claim an address for an identity. If the identity already has an active
    /// claim in the address's family, this fails with `ClaimAlreadyExists`
    /// unless `force` is set, in which case the old claim is revoked by the
    /// new link.
    pub async fn register_address(&self, identity: &IdentityID, arg: RegisterAddressArg) -> Result<RegisterAddressRes> {
        let _permit = self.guard.acquire(identity, GUARD_LABEL).await;

        let claim = self.classifier.classify(&arg.address, arg.wanted_family.as_deref())?;
        let version = self.config.sig_version(arg.sig_version)?;
        let family = claim.family();

        let state = ChainStateLoader::new(&self.store, self.config.store_timeout())
            .load(identity)
            .await?;
        let (revoke, lease) = match state.active_for(family) {
            Some(_) if !arg.force => Err(Error::ClaimAlreadyExists(family.to_string()))?,
            Some(active) => {
                debug!(identity = %identity, family = %family, link = %active.link_id(), "replacing active claim");
                let lease = LeaseCoordinator::new(&self.leases, self.config.lease_timeout())
                    .request(&[active.link_id().clone()])
                    .await?;
                (Some(active.link_id().clone()), Some(lease))
            }
            None => (None, None),
        };

        let key = self.signing_key(identity, KEY_REASON).await?;
        let signed = ClaimSigner::new(&key).sign_claim(
            identity,
            &claim,
            version,
            state.tip(),
            revoke.as_ref(),
            lease.as_ref().map(|l| l.merkle_root()),
        )?;
        drop(key);

        ChainSubmitter::new(&self.store, self.config.store_timeout())
            .submit(identity, &signed, lease.as_ref())
            .await?;
        info!(
            identity = %identity,
            family = %family,
            ty = %claim.ty(),
            seqno = signed.seqno(),
            version = %version,
            replaced = revoke.is_some(),
            "registered address"
        );
        Ok(RegisterAddressRes {
            family,
            ty: *claim.ty(),
            link_id: signed.link_id().clone(),
        })
    }

    /// Revoke a family's active claim without replacing it. Returns the ID of
    /// the revoke link.
    pub async fn revoke_family(&self, identity: &IdentityID, family: ClaimFamily) -> Result<LinkID> {
        let _permit = self.guard.acquire(identity, REVOKE_GUARD_LABEL).await;

        let state = ChainStateLoader::new(&self.store, self.config.store_timeout())
            .load(identity)
            .await?;
        let active = state
            .active_for(family)
            .ok_or_else(|| Error::ClaimNotFound(family.to_string()))?;
        let lease = LeaseCoordinator::new(&self.leases, self.config.lease_timeout())
            .request(&[active.link_id().clone()])
            .await?;

        let key = self.signing_key(identity, REVOKE_KEY_REASON).await?;
        let signed = ClaimSigner::new(&key).sign_revoke(identity, family, state.tip(), active.link_id(), lease.merkle_root())?;
        drop(key);

        ChainSubmitter::new(&self.store, self.config.store_timeout())
            .submit(identity, &signed, Some(&lease))
            .await?;
        info!(identity = %identity, family = %family, revoked = %active.link_id(), "revoked address");
        Ok(signed.link_id().clone())
    }
}
