//! Fixed-point truncation protocols.
//!
//! All three kernels divide a shared fixed-point value by `2^bits` with at
//! most one unit of error in the last place; they differ in party count,
//! randomness cost and round count.

use tracing::trace;

use crate::error::{MpcError, Result};
use crate::kernels::arithmetic::mul_vvs;
use crate::ring::{FieldType, RingArray};
use crate::value::Value;
use crate::{BeaverSource, Communicator, EvalContext};

/// Truncation needs the shift to be meaningful and two bits of sign headroom.
fn check_bits(field: FieldType, bits: usize) -> Result<()> {
    if bits == 0 || bits + 2 >= field.bits() {
        return Err(MpcError::TruncBits { field, bits });
    }
    Ok(())
}

/// Truncate an arithmetic share by `bits`.
///
/// With two parties each share is shifted locally, no communication; the
/// result can be off by one ulp and, with negligible probability, off by the
/// top bit when the shares happen to wrap. With more parties a truncation
/// pair is consumed: open `x - r`, shift the public difference, add the
/// pre-truncated `r`.
pub async fn trunc_a<E: EvalContext>(ctx: &E, x: &Value, bits: usize) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    check_bits(x.field(), bits)?;
    if ctx.world_size() == 2 {
        trace!(bits, "trunc_a local");
        return Ok(Value::arithmetic(xr.arshift(bits)));
    }
    let (r, r_trunc) = ctx.beaver().trunc_pair(x.field(), x.shape(), bits)?;
    let x_r = ctx
        .comm()
        .all_reduce_add(xr.sub(&r)?, "trunc_a:open(x-r)")
        .await?;
    let mut out = r_trunc;
    if ctx.rank() == 0 {
        out = out.add(&x_r.arshift(bits))?;
    }
    Ok(Value::arithmetic(out))
}

/// Probabilistic truncation for any party count, one opening.
///
/// Requires the plaintext in `[-2^(k-2), 2^(k-2))`. Rank 0 re-centers by
/// `2^(k-2)`, the parties open `x + r`, and the wrap of the top bit is
/// corrected with the shared bit `rb` of `r`:
/// `b = rb ^ c_{k-1}`, `y = (c mod 2^(k-1)) / 2^bits - rc + b·2^(k-1-bits)`,
/// minus the re-centering at rank 0.
pub async fn trunc_a_pr<E: EvalContext>(ctx: &E, x: &Value, bits: usize) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let field = x.field();
    let k = field.bits();
    check_bits(field, bits)?;

    let (r, rc, rb) = ctx.beaver().trunc_pr(field, x.shape(), bits)?;

    let mut masked = xr.clone();
    if ctx.rank() == 0 {
        masked = masked.add_scalar(1u128 << (k - 2));
    }
    let c = ctx
        .comm()
        .all_reduce_add(masked.add(&r)?, "trunc_pr:open(x+r)")
        .await?;

    let c_top = c.shr(k - 1);
    // b = rb ^ c_{k-1} = rb + c_{k-1} - 2·c_{k-1}·rb; the public bit is added
    // by rank 0 only
    let mut b = rb.sub(&c_top.mul(&rb)?.mul_scalar(2))?;
    if ctx.rank() == 0 {
        b = b.add(&c_top)?;
    }
    let b_shifted = b.shl(k - 1 - bits);

    let out = if ctx.rank() == 0 {
        let c_hat = c.shl(1).shr(1 + bits);
        c_hat
            .sub(&rc)?
            .add(&b_shifted)?
            .sub_scalar(1u128 << (k - 2 - bits))
    } else {
        b_shifted.sub(&rc)?
    };
    Ok(Value::arithmetic(out))
}

/// Wrap indicator: an arithmetic share (over the narrow covering ring) of
/// whether the two shares of `x` wrapped around the ring modulus.
async fn compute_wrap<E: EvalContext>(
    ctx: &E,
    x: &RingArray,
    narrow: FieldType,
) -> Result<RingArray> {
    let k = x.field().bits();
    let quarter = 1u128 << (k - 2);
    let half = 1u128 << (k - 1);

    let rank = ctx.rank();
    // each side classifies its own share against L/4 and L/2
    let star = match rank {
        0 => x.sub_scalar(quarter).ge_scalar(half),
        1 => x.ge_scalar(half),
        r => return Err(MpcError::InvalidRank(r)),
    }
    .cast(narrow);

    let (lhs, rhs) = if rank == 0 {
        (
            Value::private(0, star),
            Value::private_placeholder(1, narrow, x.shape()),
        )
    } else {
        (
            Value::private_placeholder(0, narrow, x.shape()),
            Value::private(1, star),
        )
    };
    let mut wrap = mul_vvs(ctx, &lhs, &rhs).await?.into_data();
    if rank == 0 {
        wrap = wrap.add(&x.ge_scalar(quarter).cast(narrow))?;
    }
    Ok(wrap)
}

/// Two-party probabilistic truncation without a truncation pair: each party
/// shifts its share logically and the shared wrap indicator repairs the high
/// bits, `y_i = (x_i >> bits) - w_i·2^(k-bits) + rank`.
///
/// Requires the plaintext in `[-2^(k-2), 2^(k-2))`; off by at most one ulp.
pub async fn trunc_a_pr2<E: EvalContext>(ctx: &E, x: &Value, bits: usize) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let field = x.field();
    let k = field.bits();
    check_bits(field, bits)?;
    let rank = ctx.rank();
    if rank > 1 {
        return Err(MpcError::InvalidRank(rank));
    }

    // the wrap bit only needs a ring wide enough for the shifted correction
    let narrow = FieldType::covering(bits).ok_or(MpcError::TruncBits { field, bits })?;
    let wrap = compute_wrap(ctx, xr, narrow).await?;

    let correction = wrap.cast(field).mul_scalar(1u128 << (k - bits));
    let out = xr
        .shr(bits)
        .sub(&correction)?
        .add_scalar(rank as u128);
    Ok(Value::arithmetic(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{a2p, p2a};
    use crate::testing::simulate;
    use crate::{EvalContext, FieldType, RingArray, Value};

    fn signed(field: FieldType, v: u128) -> i128 {
        let k = field.bits();
        if k == 128 || v < 1u128 << (k - 1) {
            v as i128
        } else {
            v as i128 - (1i128 << k)
        }
    }

    fn encode(field: FieldType, v: i128) -> u128 {
        let mask = if field.bits() == 128 {
            u128::MAX
        } else {
            (1u128 << field.bits()) - 1
        };
        (v as u128) & mask
    }

    #[derive(Clone, Copy)]
    enum Protocol {
        Pair,
        Probabilistic,
        Wrap,
    }

    async fn reconstruct_signed(
        world: usize,
        field: FieldType,
        values: Vec<i128>,
        bits: usize,
        protocol: Protocol,
    ) -> Vec<Vec<i128>> {
        let values = std::rc::Rc::new(values);
        simulate(world, move |ctx| {
            let values = values.clone();
            Box::pin(async move {
                let raw: Vec<u128> = values.iter().map(|&v| encode(field, v)).collect();
                let x = p2a(
                    &ctx,
                    &Value::public(RingArray::from_vec(field, &[raw.len()], &raw).unwrap()),
                )
                .unwrap();
                let y = match protocol {
                    Protocol::Pair => trunc_a(&ctx, &x, bits).await,
                    Protocol::Probabilistic => trunc_a_pr(&ctx, &x, bits).await,
                    Protocol::Wrap => trunc_a_pr2(&ctx, &x, bits).await,
                }
                .unwrap();
                a2p(&ctx, &y)
                    .await
                    .unwrap()
                    .data()
                    .to_vec()
                    .into_iter()
                    .map(|v| signed(field, v))
                    .collect::<Vec<_>>()
            })
        })
        .await
    }

    fn assert_within_one_ulp(outs: &[Vec<i128>], values: &[i128], bits: usize) {
        for out in outs {
            for (got, &v) in out.iter().zip(values) {
                let exact = v >> bits;
                assert!(
                    (got - exact).abs() <= 1,
                    "trunc({v}, {bits}) = {got}, want {exact} +/- 1"
                );
            }
        }
    }

    #[tokio::test]
    async fn two_party_truncation_from_clean_shares() {
        // 100 = 64 + 36; both shares shift without losing carries, so the
        // result is exact: 100 >> 2 == 25
        let outs = simulate(2, |ctx| {
            Box::pin(async move {
                let share = if ctx.rank() == 0 { 64 } else { 36 };
                let x = Value::arithmetic(
                    RingArray::from_vec(FieldType::FM64, &[1], &[share]).unwrap(),
                );
                let y = trunc_a(&ctx, &x, 2).await.unwrap();
                a2p(&ctx, &y).await.unwrap().data().to_vec()
            })
        })
        .await;
        for out in outs {
            assert_eq!(out, vec![25]);
        }
    }

    #[tokio::test]
    async fn pair_truncation_three_parties() {
        let values = vec![100, -1000, 1 << 40, -(1 << 40)];
        let outs =
            reconstruct_signed(3, FieldType::FM64, values.clone(), 2, Protocol::Pair).await;
        assert_within_one_ulp(&outs, &values, 2);
    }

    #[tokio::test]
    async fn probabilistic_truncation() {
        let values = vec![100, -1000, 123456, -7, 0];
        for world in [2, 3] {
            let outs = reconstruct_signed(
                world,
                FieldType::FM64,
                values.clone(),
                3,
                Protocol::Probabilistic,
            )
            .await;
            assert_within_one_ulp(&outs, &values, 3);
        }
    }

    #[tokio::test]
    async fn probabilistic_truncation_narrow_ring() {
        let values = vec![1000, -200, 4097];
        let outs = reconstruct_signed(
            2,
            FieldType::FM32,
            values.clone(),
            4,
            Protocol::Probabilistic,
        )
        .await;
        assert_within_one_ulp(&outs, &values, 4);
    }

    #[tokio::test]
    async fn two_party_wrap_truncation() {
        let values = vec![1000, -1000, 1 << 50, -(1 << 50), 5];
        let outs =
            reconstruct_signed(2, FieldType::FM64, values.clone(), 4, Protocol::Wrap).await;
        assert_within_one_ulp(&outs, &values, 4);
    }

    #[tokio::test]
    async fn wrap_truncation_rejects_extra_parties() {
        let outs = simulate(3, |ctx| {
            Box::pin(async move {
                let x = p2a(
                    &ctx,
                    &Value::public(RingArray::from_vec(FieldType::FM64, &[1], &[80]).unwrap()),
                )
                .unwrap();
                if ctx.rank() > 1 {
                    return trunc_a_pr2(&ctx, &x, 2).await.is_err();
                }
                true
            })
        })
        .await;
        assert!(outs.into_iter().all(|ok| ok));
    }

    #[tokio::test]
    async fn bit_counts_are_validated() {
        let outs = simulate(2, |ctx| {
            Box::pin(async move {
                let x = Value::arithmetic(RingArray::zeros(FieldType::FM32, &[1]));
                let zero = trunc_a(&ctx, &x, 0).await.unwrap_err();
                let wide = trunc_a_pr(&ctx, &x, 30).await.unwrap_err();
                (zero, wide, ctx.comm().rounds())
            })
        })
        .await;
        for (zero, wide, rounds) in outs {
            assert!(matches!(zero, MpcError::TruncBits { bits: 0, .. }));
            assert!(matches!(wide, MpcError::TruncBits { bits: 30, .. }));
            assert_eq!(rounds, 0);
        }
    }
}
