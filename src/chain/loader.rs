use crate::{
    chain::{ChainState, IdentityID},
    error::{Error, Result},
    store::ChainStore,
    util::bounded,
};
use std::time::Duration;
use tracing::debug;

/// Reads the current state of an identity's chain from the chain store.
///
/// Read-only. Whatever the store hands back is checked for internal
/// consistency before anyone gets to sign against it; store failures come back
/// as-is and are never retried here.
pub struct ChainStateLoader<'a, S> {
    store: &'a S,
    timeout: Duration,
}

impl<'a, S: ChainStore> ChainStateLoader<'a, S> {
    pub fn new(store: &'a S, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn load(&self, identity: &IdentityID) -> Result<ChainState> {
        let state = bounded("chain load", self.timeout, self.store.load_chain(identity)).await?;
        Self::check(identity, &state)?;
        debug!(identity = %identity, seqno = state.tip().seqno(), active = state.active().len(), "loaded chain state");
        Ok(state)
    }

    fn check(identity: &IdentityID, state: &ChainState) -> Result<()> {
        if state.identity() != identity {
            Err(Error::ChainInconsistent(format!("asked for {} but got chain for {}", identity, state.identity())))?;
        }
        let tip = state.tip();
        match (tip.seqno(), tip.link_id()) {
            (0, None) => {}
            (0, Some(_)) => Err(Error::ChainInconsistent(String::from("empty chain has a tip link")))?,
            (_, None) => Err(Error::ChainInconsistent(format!("tip at seqno {} has no link", tip.seqno())))?,
            (_, Some(_)) => {}
        }
        for (family, active) in state.active() {
            if &active.claim().family() != family {
                Err(Error::ChainInconsistent(format!("claim filed under the wrong family: {}", family)))?;
            }
            if active.seqno() == 0 || active.seqno() > tip.seqno() {
                Err(Error::ChainInconsistent(format!(
                    "active {} claim at seqno {} but tip is {}",
                    family,
                    active.seqno(),
                    tip.seqno()
                )))?;
            }
        }
        Ok(())
    }
}
