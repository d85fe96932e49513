use claimchain_core::{
    base64_decode,
    chain::{IdentityID, LinkID, LinkType},
    claim::{ClaimFamily, ClaimFamilyClassifier, ClaimType},
    config::Config,
    crypto::SigningKey,
    error::{Error, Result},
    guard::ChainMutationGuard,
    keys::{KeyAccess, MemoryKeyAccess},
    lease::{Lease, LeaseID, LeaseService},
    memory::MemoryChainStore,
    registrar::{RegisterAddressArg, Registrar},
    signer::{verify_signed, ClaimSigner, OuterLink, SignatureVersion, SignedBlob},
    store::ChainStore,
    submit::build_request,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::sync::Arc;
use std::time::Duration;

const BTC_ADDR: &str = "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2";
const BTC_ADDR2: &str = "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy";
const BTC_BECH32: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
const ZEC_ADDR: &str = "t1Zo4ZJ3rPsaRXRtKFe8sWiJw85xF8NqKfv";

/// Passes lease requests through to the store, keeping a copy of every lease
/// handed out.
struct RecordingLeases {
    store: Arc<MemoryChainStore>,
    issued: Mutex<Vec<Lease>>,
    requests: Mutex<usize>,
}

#[async_trait]
impl LeaseService for RecordingLeases {
    async fn request_downgrade_lease(&self, link_ids: &[LinkID]) -> Result<Lease> {
        *self.requests.lock() += 1;
        let lease = self.store.request_downgrade_lease(link_ids).await?;
        self.issued.lock().push(lease.clone());
        Ok(lease)
    }
}

/// Another device gets in first: right before our lease request reaches the
/// service, the active claim is revoked out from under us.
struct RacingLeases {
    store: Arc<MemoryChainStore>,
    identity: IdentityID,
    family: ClaimFamily,
    key: SigningKey,
}

#[async_trait]
impl LeaseService for RacingLeases {
    async fn request_downgrade_lease(&self, link_ids: &[LinkID]) -> Result<Lease> {
        self.store.revoke_externally(&self.identity, self.family, &self.key)?;
        self.store.request_downgrade_lease(link_ids).await
    }
}

/// Gets the passphrase wrong the first time it's asked.
struct MistypedOnce {
    keys: Arc<MemoryKeyAccess>,
    mistyped: Mutex<bool>,
}

#[async_trait]
impl KeyAccess for MistypedOnce {
    async fn signing_key(&self, identity: &IdentityID, reason: &str) -> Result<SigningKey> {
        {
            let mut mistyped = self.mistyped.lock();
            if !*mistyped {
                *mistyped = true;
                return Err(Error::AuthFailed(String::from("incorrect passphrase")));
            }
        }
        self.keys.signing_key(identity, reason).await
    }
}

type TestRegistrar<L> = Registrar<Arc<MemoryKeyAccess>, Arc<L>, Arc<MemoryChainStore>>;

struct Harness {
    id: IdentityID,
    key: SigningKey,
    store: Arc<MemoryChainStore>,
    keys: Arc<MemoryKeyAccess>,
    leases: Arc<RecordingLeases>,
    registrar: TestRegistrar<RecordingLeases>,
}

fn harness_with(store: MemoryChainStore) -> Harness {
    let id = IdentityID::new("zed").unwrap();
    let key = SigningKey::new_ed25519(&mut ChaCha20Rng::seed_from_u64(42));
    let store = Arc::new(store);
    store.register_identity(id.clone(), key.public());
    let keys = Arc::new(MemoryKeyAccess::new());
    keys.insert(id.clone(), key.clone());
    let leases = Arc::new(RecordingLeases {
        store: store.clone(),
        issued: Mutex::new(Vec::new()),
        requests: Mutex::new(0),
    });
    let registrar = Registrar::new(keys.clone(), leases.clone(), store.clone(), Config::default());
    Harness {
        id,
        key,
        store,
        keys,
        leases,
        registrar,
    }
}

fn harness() -> Harness {
    harness_with(MemoryChainStore::default())
}

fn forced(address: &str) -> RegisterAddressArg {
    RegisterAddressArg {
        force: true,
        ..RegisterAddressArg::new(address)
    }
}

#[tokio::test]
async fn scenario_a_first_claim() {
    let h = harness();
    let res = h.registrar.register_address(&h.id, RegisterAddressArg::new(BTC_ADDR)).await.unwrap();
    assert_eq!(res.family(), ClaimFamily::Bitcoin);
    assert_eq!(res.ty(), ClaimType::BitcoinP2PKH);

    let state = h.store.load_chain(&h.id).await.unwrap();
    assert_eq!(state.tip().seqno(), 1);
    assert_eq!(*h.leases.requests.lock(), 0);
    let active = state.active_for(ClaimFamily::Bitcoin).unwrap();
    assert_eq!(active.claim().address(), BTC_ADDR);
    assert_eq!(active.link_id(), res.link_id());

    let links = h.store.links(&h.id);
    assert!(links[0].prev().is_none());
    assert!(!links[0].has_revokes());
    assert_eq!(links[0].version(), SignatureVersion::V2);
}

#[tokio::test]
async fn scenario_b_forced_replacement() {
    let h = harness();
    let first = h.registrar.register_address(&h.id, RegisterAddressArg::new(BTC_ADDR)).await.unwrap();
    let anchor = h.store.merkle_root();

    let second = h.registrar.register_address(&h.id, forced(BTC_BECH32)).await.unwrap();
    assert_eq!(second.ty(), ClaimType::BitcoinBech32);

    // the lease covered the old link and was anchored to the current root
    let issued = h.leases.issued.lock().clone();
    assert_eq!(issued.len(), 1);
    let lease = &issued[0];
    assert_eq!(lease.link_ids(), &vec![first.link_id().clone()]);
    assert_eq!(lease.merkle_root(), &anchor);
    assert_eq!(h.store.lease_consumed(lease.id()), Some(true));

    let links = h.store.links(&h.id);
    assert_eq!(links.len(), 2);
    let link = &links[1];
    assert!(link.has_revokes());
    assert_eq!(link.revokes(), &vec![first.link_id().clone()]);
    let verified = verify_signed(link.sig(), link.sig_inner().as_deref()).unwrap();
    let outer = verified.outer().as_ref().unwrap();
    assert!(outer.has_revokes());
    assert_eq!(outer.link_type(), LinkType::Cryptocurrency);
    assert_eq!(verified.payload().merkle_root(), &Some(anchor));

    assert!(h.store.is_revoked(first.link_id()));
    let state = h.store.load_chain(&h.id).await.unwrap();
    let active = state.active_for(ClaimFamily::Bitcoin).unwrap();
    assert_eq!(active.claim().address(), BTC_BECH32);
    assert_eq!(active.link_id(), second.link_id());
}

#[tokio::test]
async fn scenario_c_lost_revocation_race() {
    let h = harness();
    h.registrar.register_address(&h.id, RegisterAddressArg::new(BTC_ADDR)).await.unwrap();
    let racing = Arc::new(RacingLeases {
        store: h.store.clone(),
        identity: h.id.clone(),
        family: ClaimFamily::Bitcoin,
        key: h.key.clone(),
    });
    let registrar = Registrar::new(h.keys.clone(), racing, h.store.clone(), Config::default());
    let submissions = h.store.submission_count();

    let res = registrar.register_address(&h.id, forced(BTC_ADDR2)).await;
    assert!(matches!(res, Err(Error::LeaseUnavailable(_))), "{:?}", res);
    assert_eq!(h.store.submission_count(), submissions);

    // whatever the winner did stands: the family is empty
    let state = h.store.load_chain(&h.id).await.unwrap();
    assert!(state.active_for(ClaimFamily::Bitcoin).is_none());
    assert_eq!(state.tip().seqno(), 2);
    assert_eq!(h.store.links(&h.id)[1].link_type(), LinkType::Revoke);
}

#[tokio::test]
async fn scenario_d_concurrent_registrations_serialize() {
    let h = harness_with(MemoryChainStore::default().with_latency(Duration::from_millis(20)));
    let guard = Arc::new(ChainMutationGuard::new());
    let registrar_a = Registrar::new(h.keys.clone(), h.leases.clone(), h.store.clone(), Config::default()).with_guard(guard.clone());
    let registrar_b = Registrar::new(h.keys.clone(), h.leases.clone(), h.store.clone(), Config::default()).with_guard(guard);

    let (a, b) = tokio::join!(
        registrar_a.register_address(&h.id, RegisterAddressArg::new(BTC_ADDR)),
        registrar_b.register_address(&h.id, RegisterAddressArg::new(ZEC_ADDR)),
    );
    a.unwrap();
    b.unwrap();

    let links = h.store.links(&h.id);
    assert_eq!(links.len(), 2);
    assert_eq!(links[0].seqno(), 1);
    assert_eq!(links[1].seqno(), 2);
    assert_eq!(links[1].prev(), &Some(links[0].link_id().clone()));
    assert_eq!(h.store.submission_count(), 2);

    let state = h.store.load_chain(&h.id).await.unwrap();
    assert!(state.active_for(ClaimFamily::Bitcoin).is_some());
    assert!(state.active_for(ClaimFamily::Zcash).is_some());
}

#[tokio::test]
async fn existing_claim_without_force_never_submits() {
    let h = harness();
    h.registrar.register_address(&h.id, RegisterAddressArg::new(BTC_ADDR)).await.unwrap();
    let submissions = h.store.submission_count();
    for addr in [BTC_ADDR2, BTC_BECH32, BTC_ADDR] {
        let res = h.registrar.register_address(&h.id, RegisterAddressArg::new(addr)).await;
        assert_eq!(res.err(), Some(Error::ClaimAlreadyExists(String::from("bitcoin"))));
    }
    assert_eq!(h.store.submission_count(), submissions);
    assert_eq!(*h.leases.requests.lock(), 0);
}

#[tokio::test]
async fn chain_stays_linked_and_gap_free() {
    let h = harness();
    let steps = [
        (BTC_ADDR, false, 1),
        (ZEC_ADDR, false, 2),
        (BTC_ADDR2, true, 0),
        (BTC_BECH32, true, 1),
        (BTC_ADDR, true, 2),
    ];
    for (addr, force, sig_version) in steps {
        let arg = RegisterAddressArg {
            force,
            sig_version,
            ..RegisterAddressArg::new(addr)
        };
        h.registrar.register_address(&h.id, arg).await.unwrap();
    }

    let links = h.store.links(&h.id);
    assert_eq!(links.len(), steps.len());
    for (i, link) in links.iter().enumerate() {
        assert_eq!(link.seqno(), i as u64 + 1);
        match i {
            0 => assert!(link.prev().is_none()),
            _ => assert_eq!(link.prev(), &Some(links[i - 1].link_id().clone())),
        }
    }
    assert_eq!(links[0].version(), SignatureVersion::V1);

    // never more than one live claim per family
    for family in [ClaimFamily::Bitcoin, ClaimFamily::Zcash] {
        let live = links
            .iter()
            .filter(|l| l.claim().as_ref().map(|c| c.family()) == Some(family))
            .filter(|l| !h.store.is_revoked(l.link_id()))
            .count();
        assert_eq!(live, 1, "{}", family);
    }
}

#[tokio::test]
async fn signatures_verify_from_their_parts() {
    let h = harness();
    let arg = RegisterAddressArg {
        sig_version: 1,
        ..RegisterAddressArg::new(ZEC_ADDR)
    };
    h.registrar.register_address(&h.id, arg).await.unwrap();
    h.registrar.register_address(&h.id, RegisterAddressArg::new(BTC_ADDR)).await.unwrap();
    let links = h.store.links(&h.id);

    // v1: the signature covers the payload alone
    let v1 = &links[0];
    assert!(v1.sig_inner().is_none());
    match rasn::der::decode::<SignedBlob>(&base64_decode(v1.sig()).unwrap()).unwrap() {
        SignedBlob::V1 { key, payload, signature } => {
            assert_eq!(key, h.key.public());
            assert_eq!(key.verify(&signature, payload.as_ref()), Ok(()));
        }
        SignedBlob::V2 { .. } => panic!("expected a v1 blob"),
    }

    // v2: the signature covers an envelope we can rebuild from the chain
    let v2 = &links[1];
    let inner = base64_decode(v2.sig_inner().as_ref().unwrap()).unwrap();
    let rebuilt = OuterLink::reconstruct(2, Some(v1.link_id().clone()), &inner, LinkType::Cryptocurrency, false);
    let rebuilt = rasn::der::encode(&rebuilt).unwrap();
    match rasn::der::decode::<SignedBlob>(&base64_decode(v2.sig()).unwrap()).unwrap() {
        SignedBlob::V2 { key, outer, signature } => {
            assert_eq!(outer.as_ref(), rebuilt.as_slice());
            assert_eq!(key.verify(&signature, &rebuilt), Ok(()));
        }
        SignedBlob::V1 { .. } => panic!("expected a v2 blob"),
    }
}

#[tokio::test]
async fn consumed_lease_cannot_be_reused() {
    let h = harness();
    let first = h.registrar.register_address(&h.id, RegisterAddressArg::new(BTC_ADDR)).await.unwrap();
    h.registrar.register_address(&h.id, forced(BTC_ADDR2)).await.unwrap();
    let lease = h.leases.issued.lock()[0].clone();
    assert_eq!(lease.id(), &LeaseID::new("lease-00000001"));

    let state = h.store.load_chain(&h.id).await.unwrap();
    let claim = <ClaimFamilyClassifier>::default().classify(BTC_BECH32, None).unwrap();
    let replay = ClaimSigner::new(&h.key)
        .sign_claim(&h.id, &claim, SignatureVersion::V2, state.tip(), Some(first.link_id()), Some(lease.merkle_root()))
        .unwrap();
    let submissions = h.store.submission_count();
    let res = h.store.post_link(&h.id, build_request(&replay, Some(&lease))).await;
    assert_eq!(res.err(), Some(Error::SubmissionRejected(String::from("lease lease-00000001 was already used"))));
    assert_eq!(h.store.submission_count(), submissions + 1);
    assert_eq!(h.store.links(&h.id).len(), 2);
}

#[tokio::test]
async fn forced_replacement_retries_after_bad_passphrase() {
    let h = harness();
    let first = h.registrar.register_address(&h.id, RegisterAddressArg::new(BTC_ADDR)).await.unwrap();
    let keys = Arc::new(MistypedOnce {
        keys: h.keys.clone(),
        mistyped: Mutex::new(false),
    });
    let registrar = Registrar::new(keys, h.leases.clone(), h.store.clone(), Config::default());

    let res = registrar.register_address(&h.id, forced(BTC_ADDR2)).await;
    assert_eq!(res.err(), Some(Error::AuthFailed(String::from("incorrect passphrase"))));
    assert_eq!(h.store.links(&h.id).len(), 1);
    assert!(!h.store.is_revoked(first.link_id()));

    let res = registrar.register_address(&h.id, forced(BTC_ADDR2)).await.unwrap();
    assert_eq!(res.ty(), ClaimType::BitcoinP2SH);
    assert!(h.store.is_revoked(first.link_id()));
    let issued = h.leases.issued.lock().clone();
    assert_eq!(issued.len(), 2);
    assert_eq!(h.store.lease_consumed(issued[0].id()), None);
    assert_eq!(h.store.lease_consumed(issued[1].id()), Some(true));
}

#[tokio::test]
async fn revoke_then_register_again() {
    let h = harness();
    let first = h.registrar.register_address(&h.id, RegisterAddressArg::new(ZEC_ADDR)).await.unwrap();
    h.registrar.revoke_family(&h.id, ClaimFamily::Zcash).await.unwrap();
    assert!(h.store.is_revoked(first.link_id()));
    assert_eq!(*h.leases.requests.lock(), 1);

    h.registrar.register_address(&h.id, RegisterAddressArg::new(ZEC_ADDR)).await.unwrap();
    let links = h.store.links(&h.id);
    assert_eq!(links.len(), 3);
    assert_eq!(links[1].link_type(), LinkType::Revoke);
    assert!(links[2].claim().is_some());
}

#[tokio::test]
async fn config_from_yaml_drives_versions() {
    let h = harness();
    let config = Config::from_yaml("default_sig_version: 1\n").unwrap();
    let registrar = Registrar::new(h.keys.clone(), h.leases.clone(), h.store.clone(), config);
    registrar.register_address(&h.id, RegisterAddressArg::new(BTC_ADDR)).await.unwrap();
    assert_eq!(h.store.links(&h.id)[0].version(), SignatureVersion::V1);
}
