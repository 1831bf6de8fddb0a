use std::cell::RefCell;

use crate::beaver::BeaverCache;
use crate::{BeaverSource, Communicator, EvalContext, PrssSource};

/// Session-wide configuration knobs.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Open `x - a` and `y - b` in two sequential rounds instead of one
    /// batched round. Result-preserving; only the round count changes.
    pub disable_vectorized_open: bool,
}

/// One party's view of a distributed computation session: communicator,
/// correlated randomness, beaver source and replay cache. Created once per
/// session and handed by reference to every kernel call.
pub struct Semi2kContext<C, P, B> {
    comm: C,
    prss: P,
    beaver: B,
    cache: RefCell<BeaverCache>,
    config: Config,
}

impl<C, P, B> Semi2kContext<C, P, B> {
    pub fn new(comm: C, prss: P, beaver: B) -> Self {
        Self::with_config(comm, prss, beaver, Config::default())
    }

    pub fn with_config(comm: C, prss: P, beaver: B, config: Config) -> Self {
        Semi2kContext {
            comm,
            prss,
            beaver,
            cache: RefCell::new(BeaverCache::new()),
            config,
        }
    }
}

impl<C, P, B> EvalContext for Semi2kContext<C, P, B>
where
    C: Communicator,
    P: PrssSource,
    B: BeaverSource,
{
    type Comm = C;
    type Prss = P;
    type Beaver = B;

    fn comm(&self) -> &C {
        &self.comm
    }

    fn prss(&self) -> &P {
        &self.prss
    }

    fn beaver(&self) -> &B {
        &self.beaver
    }

    fn beaver_cache(&self) -> &RefCell<BeaverCache> {
        &self.cache
    }

    fn config(&self) -> &Config {
        &self.config
    }
}
