//! Serializes chain mutations per identity within this process.
//!
//! Anything that reads an identity's tip, signs against it, and submits must
//! do so while holding a [MutationPermit] for that identity. Otherwise two
//! operations could both see tip N and both try to land at N+1. This only
//! covers this process; the store's sequence check and the lease service
//! cover everyone else.

use crate::{
    chain::IdentityID,
    error::{Error, Result},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    holder: Mutex<Option<&'static str>>,
}

/// Hands out per-identity sessions. Share one of these (in an `Arc`) between
/// everything in the process that mutates chains.
///
/// Slots are held weakly: once every session and permit for an identity is
/// gone, its slot is dropped and the entry is pruned on the next lookup.
#[derive(Default)]
pub struct ChainMutationGuard {
    slots: Mutex<HashMap<IdentityID, Weak<Slot>>>,
}

impl ChainMutationGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for an identity. Sessions for the same identity share
    /// one lock; sessions for different identities never contend.
    pub fn session(&self, identity: &IdentityID) -> IdentitySession {
        let mut slots = self.slots.lock();
        slots.retain(|_, slot| slot.strong_count() > 0);
        let slot = match slots.get(identity).and_then(Weak::upgrade) {
            Some(slot) => slot,
            None => {
                let slot = Arc::new(Slot::default());
                slots.insert(identity.clone(), Arc::downgrade(&slot));
                slot
            }
        };
        IdentitySession {
            identity: identity.clone(),
            slot,
        }
    }

    /// Wait for exclusive access to an identity's chain.
    pub async fn acquire(&self, identity: &IdentityID, label: &'static str) -> MutationPermit {
        self.session(identity).acquire(label).await
    }

    /// Take exclusive access to an identity's chain if nobody has it.
    pub fn try_acquire(&self, identity: &IdentityID, label: &'static str) -> Result<MutationPermit> {
        self.session(identity).try_acquire(label)
    }
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots.lock().values().filter(|slot| slot.strong_count() > 0).count()
    }
}

/// One identity's view of the guard.
pub struct IdentitySession {
    identity: IdentityID,
    slot: Arc<Slot>,
}

impl IdentitySession {
    pub async fn acquire(&self, label: &'static str) -> MutationPermit {
        let lock = self.slot.lock.clone().lock_owned().await;
        self.permit(lock, label)
    }

    /// Fails with `GuardBusy`, naming whoever holds the guard.
    pub fn try_acquire(&self, label: &'static str) -> Result<MutationPermit> {
        match self.slot.lock.clone().try_lock_owned() {
            Ok(lock) => Ok(self.permit(lock, label)),
            Err(_) => Err(Error::GuardBusy(self.holder().unwrap_or("unknown").to_string())),
        }
    }

    /// The label of the operation currently holding the guard, if any.
    pub fn holder(&self) -> Option<&'static str> {
        *self.slot.holder.lock()
    }

    fn permit(&self, lock: OwnedMutexGuard<()>, label: &'static str) -> MutationPermit {
        *self.slot.holder.lock() = Some(label);
        debug!(identity = %self.identity, label, "chain guard acquired");
        MutationPermit {
            identity: self.identity.clone(),
            label,
            slot: self.slot.clone(),
            _lock: lock,
        }
    }
}

/// Exclusive access to one identity's chain. Released when dropped, whether
/// that's a normal return, an early `?`, or a cancelled future.
pub struct MutationPermit {
    identity: IdentityID,
    label: &'static str,
    slot: Arc<Slot>,
    _lock: OwnedMutexGuard<()>,
}

impl MutationPermit {
    pub fn identity(&self) -> &IdentityID {
        &self.identity
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for MutationPermit {
    fn drop(&mut self) {
        *self.slot.holder.lock() = None;
        debug!(identity = %self.identity, label = self.label, "chain guard released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test::identity;
    use std::time::Duration;

    #[tokio::test]
    async fn busy_names_the_holder() {
        let guard = ChainMutationGuard::new();
        let id = identity("butch");
        let permit = guard.acquire(&id, "CryptocurrencyEngine").await;
        assert_eq!(permit.label(), "CryptocurrencyEngine");
        assert_eq!(guard.session(&id).holder(), Some("CryptocurrencyEngine"));
        let res = guard.try_acquire(&id, "Revoke");
        assert_eq!(res.err(), Some(Error::GuardBusy(String::from("CryptocurrencyEngine"))));
        drop(permit);
        assert_eq!(guard.session(&id).holder(), None);
        let permit = guard.try_acquire(&id, "Revoke").unwrap();
        assert_eq!(permit.identity(), &id);
    }

    #[tokio::test]
    async fn identities_are_independent() {
        let guard = ChainMutationGuard::new();
        let _one = guard.acquire(&identity("butch"), "a").await;
        let two = guard.try_acquire(&identity("sundance"), "b");
        assert!(two.is_ok());
    }

    #[tokio::test]
    async fn slots_are_dropped_when_idle() {
        let guard = ChainMutationGuard::new();
        let permit = guard.acquire(&identity("butch"), "a").await;
        let session = guard.session(&identity("sundance"));
        assert_eq!(guard.tracked(), 2);
        drop(permit);
        assert_eq!(guard.tracked(), 1);
        let held = session.try_acquire("b").unwrap();
        drop(session);
        assert_eq!(guard.tracked(), 1);
        // the permit keeps the slot alive, so a new session still contends
        let res = guard.try_acquire(&identity("sundance"), "c");
        assert_eq!(res.err(), Some(Error::GuardBusy(String::from("b"))));
        drop(held);
        assert_eq!(guard.tracked(), 0);
        let _etta = guard.session(&identity("etta"));
        assert_eq!(guard.slots.lock().len(), 1);
    }

    #[tokio::test]
    async fn released_on_error_paths() {
        async fn fails(guard: &ChainMutationGuard, id: &IdentityID) -> Result<()> {
            let _permit = guard.acquire(id, "failing").await;
            Err(Error::Unreachable(String::from("store went away")))?;
            Ok(())
        }
        let guard = ChainMutationGuard::new();
        let id = identity("butch");
        assert!(fails(&guard, &id).await.is_err());
        assert!(guard.try_acquire(&id, "after").is_ok());
    }

    #[tokio::test]
    async fn released_on_cancel() {
        let guard = Arc::new(ChainMutationGuard::new());
        let id = identity("butch");
        let task = {
            let guard = guard.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _permit = guard.acquire(&id, "sleepy").await;
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
        };
        // wait for the task to take the guard
        while guard.session(&id).holder().is_none() {
            tokio::task::yield_now().await;
        }
        assert!(guard.try_acquire(&id, "impatient").is_err());
        task.abort();
        let _ = task.await;
        let permit = tokio::time::timeout(Duration::from_secs(1), guard.acquire(&id, "after")).await;
        assert!(permit.is_ok());
    }

    #[tokio::test]
    async fn waiters_run_in_turn() {
        let guard = Arc::new(ChainMutationGuard::new());
        let id = identity("butch");
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = guard.acquire(&id, "first").await;
        let waiter = {
            let guard = guard.clone();
            let id = id.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let _permit = guard.acquire(&id, "second").await;
                log.lock().push("second");
            })
        };
        tokio::task::yield_now().await;
        log.lock().push("first");
        drop(first);
        waiter.await.unwrap();
        assert_eq!(*log.lock(), vec!["first", "second"]);
    }
}
