//! The semi2k kernel set.
//!
//! Every kernel is a pure function of `(context, typed values, parameters)`
//! returning a new typed value, failing fatally on shape/field/tag
//! mismatches before any communication happens. Kernels that need a
//! communication round are async; purely local ones are not.

mod arithmetic;
mod conversion;
mod truncation;

pub use arithmetic::{
    matmul_aa, matmul_ap, mul_a1b, mul_aa, mul_ap, mul_vvs, set_beaver_cache, square_a,
};
pub use conversion::{a2p, a2v, add_aa, add_ap, lshift_a, negate_a, p2a, rand_a, v2a};
pub use truncation::{trunc_a, trunc_a_pr, trunc_a_pr2};
