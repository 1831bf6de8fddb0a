//! Single-process multi-party simulation harness.
//!
//! Spawns one future per party over an in-memory full mesh, with lockstep
//! fake randomness sources standing in for a trusted dealer. Everything here
//! is deliberately insecure; it exists so kernel semantics and round counts
//! can be tested deterministically.

mod comm;
mod dealer;

pub use comm::{BincodeDuplex, BincodeStreamSink, DuplexCommunicator, TestMessage};
pub use dealer::{FakeBeaverSource, LocalPrss};

use futures::future::LocalBoxFuture;

use crate::context::{Config, Semi2kContext};

/// The context type every simulated party runs with.
pub type TestContext = Semi2kContext<DuplexCommunicator, LocalPrss, FakeBeaverSource>;

const SIMULATION_SEED: u64 = 0x5ee1_feed_90ab_cdef;

/// Run `f` once per party, concurrently on the current thread, and collect
/// the outputs ordered by rank.
pub async fn simulate<T, F>(world_size: usize, f: F) -> Vec<T>
where
    F: Fn(TestContext) -> LocalBoxFuture<'static, T>,
{
    simulate_with(world_size, Config::default(), f).await
}

/// [`simulate`] with explicit session configuration.
pub async fn simulate_with<T, F>(world_size: usize, config: Config, f: F) -> Vec<T>
where
    F: Fn(TestContext) -> LocalBoxFuture<'static, T>,
{
    let futures: Vec<_> = DuplexCommunicator::mesh(world_size)
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            let ctx = Semi2kContext::with_config(
                comm,
                LocalPrss::new(world_size, rank, SIMULATION_SEED),
                FakeBeaverSource::new(world_size, rank, SIMULATION_SEED),
                config.clone(),
            );
            f(ctx)
        })
        .collect();
    futures::future::join_all(futures).await
}
