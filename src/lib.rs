//! Arithmetic-sharing MPC kernels over Z/2^k rings (semi2k).
//!
//! Values are secret-shared additively among N parties; the kernels in
//! [`kernels`] convert between public, arithmetic-share and single-owner
//! private forms, multiply shares with beaver triples (amortizing repeated
//! openings through a replay cache), and truncate shared fixed-point values
//! with bounded error.
//!
//! The collaborators a party needs — communicator, correlated randomness,
//! beaver triple source — are traits defined here; an in-memory,
//! intentionally insecure implementation for tests lives in [`testing`].
//!
//! Correctness requires that all parties invoke the same kernels in the same
//! order; this is a caller contract the kernels cannot check.

use std::cell::RefCell;

use async_trait::async_trait;

pub mod beaver;
pub mod context;
pub mod error;
pub mod kernels;
pub mod ring;
pub mod testing;
pub mod value;

pub use beaver::{BeaverCache, CacheState, MulKind, ReplayDescriptor, ReplayStatus};
pub use context::{Config, Semi2kContext};
pub use error::{MpcError, Result};
pub use ring::{FieldType, OperandId, RingArray};
pub use value::{ShareType, Value};

/// Correlated randomness source.
pub trait PrssSource {
    /// Pseudorandom pair correlated across neighbouring parties, without
    /// communication: summed over all parties, `r0 - r1` telescopes to zero.
    fn gen_prss_pair(&self, field: FieldType, shape: &[usize]) -> (RingArray, RingArray);

    /// Pseudorandom array known only to the calling party.
    fn gen_private(&self, field: FieldType, shape: &[usize]) -> RingArray;
}

/// Source of correlated beaver randomness.
///
/// Each method returns this party's shares; the per-call consistency
/// invariants (e.g. `Σa · Σb = Σc`) are the source's responsibility. A
/// descriptor in [`ReplayStatus::Init`] state is bound to the freshly drawn
/// mask (and flipped to `Replayed`); a `Replayed` descriptor makes the source
/// re-derive the identical mask share instead of consuming new randomness.
pub trait BeaverSource {
    /// Elementwise triple `(a, b, c)` with `Σa · Σb = Σc`.
    fn mul(
        &self,
        field: FieldType,
        shape: &[usize],
        x_replay: Option<&mut ReplayDescriptor>,
        y_replay: Option<&mut ReplayDescriptor>,
    ) -> Result<(RingArray, RingArray, RingArray)>;

    /// Dot triple for an `(m, k) x (k, n)` matrix product:
    /// `a: (m, k)`, `b: (k, n)`, `c: (m, n)` with `Σa · Σb = Σc`.
    fn dot(
        &self,
        field: FieldType,
        m: usize,
        n: usize,
        k: usize,
        x_replay: Option<&mut ReplayDescriptor>,
        y_replay: Option<&mut ReplayDescriptor>,
    ) -> Result<(RingArray, RingArray, RingArray)>;

    /// Square pair `(a, b)` with `Σb = (Σa)^2`.
    fn square(
        &self,
        field: FieldType,
        shape: &[usize],
        replay: Option<&mut ReplayDescriptor>,
    ) -> Result<(RingArray, RingArray)>;

    /// Truncation pair `(r, r >> bits)` (arithmetic shift of the plaintext).
    fn trunc_pair(
        &self,
        field: FieldType,
        shape: &[usize],
        bits: usize,
    ) -> Result<(RingArray, RingArray)>;

    /// Probabilistic-truncation triple `(r, rc, rb)`: `r` uniform,
    /// `rc = (r mod 2^(k-1)) >> bits`, `rb` the top bit of `r`.
    fn trunc_pr(
        &self,
        field: FieldType,
        shape: &[usize],
        bits: usize,
    ) -> Result<(RingArray, RingArray, RingArray)>;

    /// Two-party private-multiply pair: rank r gets `(a_r, c_r)` with
    /// `a_0 · a_1 = c_0 + c_1`.
    fn mul_priv(&self, field: FieldType, shape: &[usize]) -> Result<(RingArray, RingArray)>;
}

/// Synchronous collective communication among the parties.
///
/// Every operation blocks the calling party until the collective completes;
/// `tag` is an accounting label, not a correctness requirement.
#[async_trait(?Send)]
pub trait Communicator {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    /// Elementwise additive reduction across all parties; one round.
    async fn all_reduce_add(&self, x: RingArray, tag: &str) -> Result<RingArray>;

    /// Reduce several arrays in a single round where the transport supports
    /// it. The default falls back to sequential rounds.
    async fn all_reduce_add_batch(&self, xs: Vec<RingArray>, tag: &str) -> Result<Vec<RingArray>> {
        let mut out = Vec::with_capacity(xs.len());
        for x in xs {
            out.push(self.all_reduce_add(x, tag).await?);
        }
        Ok(out)
    }

    async fn send(&self, to: usize, x: RingArray, tag: &str) -> Result<()>;

    async fn recv(&self, from: usize, tag: &str) -> Result<RingArray>;

    /// Gather every party's array at `root`, ordered by rank. Non-root
    /// parties receive an empty vector.
    async fn gather(&self, x: RingArray, root: usize, tag: &str) -> Result<Vec<RingArray>>;
}

/// Evaluation context handed to every kernel: the party's view of the
/// external services plus the replay cache and session configuration.
pub trait EvalContext {
    type Comm: Communicator;
    type Prss: PrssSource;
    type Beaver: BeaverSource;

    fn comm(&self) -> &Self::Comm;
    fn prss(&self) -> &Self::Prss;
    fn beaver(&self) -> &Self::Beaver;
    fn beaver_cache(&self) -> &RefCell<BeaverCache>;
    fn config(&self) -> &Config;

    fn rank(&self) -> usize {
        self.comm().rank()
    }

    fn world_size(&self) -> usize {
        self.comm().world_size()
    }
}
