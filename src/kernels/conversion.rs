//! Share conversion and linear kernels.

use tracing::trace;

use crate::error::{MpcError, Result};
use crate::ring::{FieldType, RingArray};
use crate::value::{check_same_field, Value};
use crate::{Communicator, EvalContext, PrssSource};

/// Draw an arithmetic share of an unknown random value, without
/// communication. The reconstructed value keeps two bits of headroom below
/// the ring size so downstream comparisons stay meaningful.
pub fn rand_a<E: EvalContext>(ctx: &E, field: FieldType, shape: &[usize]) -> Result<Value> {
    let (r0, r1) = ctx.prss().gen_prss_pair(field, shape);
    Ok(Value::arithmetic(r0.sub(&r1)?.shr(2)))
}

/// Share a public value: zero-sum PRSS masks plus the plaintext at rank 0.
pub fn p2a<E: EvalContext>(ctx: &E, x: &Value) -> Result<Value> {
    let data = x.expect_public()?;
    let (r0, r1) = ctx.prss().gen_prss_pair(x.field(), x.shape());
    let mut share = r0.sub(&r1)?;
    if ctx.rank() == 0 {
        share = share.add(data)?;
    }
    Ok(Value::arithmetic(share))
}

/// Reveal an arithmetic share to every party.
pub async fn a2p<E: EvalContext>(ctx: &E, x: &Value) -> Result<Value> {
    let data = x.expect_arithmetic()?;
    let opened = ctx.comm().all_reduce_add(data.clone(), "a2p").await?;
    Ok(Value::public(opened))
}

/// Reveal an arithmetic share to a single owning rank; everyone else ends up
/// with a placeholder.
pub async fn a2v<E: EvalContext>(ctx: &E, x: &Value, owner: usize) -> Result<Value> {
    let data = x.expect_arithmetic()?;
    if owner >= ctx.world_size() {
        return Err(MpcError::InvalidRank(owner));
    }
    let shares = ctx.comm().gather(data.clone(), owner, "a2v").await?;
    if ctx.rank() != owner {
        return Ok(Value::private_placeholder(owner, x.field(), x.shape()));
    }
    if shares.len() != ctx.world_size() {
        return Err(MpcError::GatherCount {
            expected: ctx.world_size(),
            actual: shares.len(),
        });
    }
    let mut sum = RingArray::zeros(x.field(), x.shape());
    for share in &shares {
        sum = sum.add(share)?;
    }
    Ok(Value::private(owner, sum))
}

/// Share a single-owner private value, without communication: the owner folds
/// the plaintext into its PRSS mask share.
pub fn v2a<E: EvalContext>(ctx: &E, x: &Value) -> Result<Value> {
    let (owner, data) = x.expect_private()?;
    if owner >= ctx.world_size() {
        return Err(MpcError::InvalidRank(owner));
    }
    let (r0, r1) = ctx.prss().gen_prss_pair(x.field(), x.shape());
    let mut share = r0.sub(&r1)?;
    if ctx.rank() == owner {
        share = share.add(data)?;
    }
    trace!(owner, "v2a");
    Ok(Value::arithmetic(share))
}

pub fn negate_a<E: EvalContext>(_ctx: &E, x: &Value) -> Result<Value> {
    let data = x.expect_arithmetic()?;
    Ok(Value::arithmetic(data.neg()))
}

/// `x + y` for arithmetic `x` and public `y`; only rank 0 adds the plaintext.
pub fn add_ap<E: EvalContext>(ctx: &E, x: &Value, y: &Value) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let yr = y.expect_public()?;
    check_same_field(x, y)?;
    if ctx.rank() != 0 {
        if xr.shape() != yr.shape() {
            return Err(MpcError::ShapeMismatch(
                xr.shape().to_vec(),
                yr.shape().to_vec(),
            ));
        }
        return Ok(Value::arithmetic(xr.clone()));
    }
    Ok(Value::arithmetic(xr.add(yr)?))
}

pub fn add_aa<E: EvalContext>(_ctx: &E, x: &Value, y: &Value) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let yr = y.expect_arithmetic()?;
    check_same_field(x, y)?;
    Ok(Value::arithmetic(xr.add(yr)?))
}

/// Logical left shift of each share; linear, so no communication.
pub fn lshift_a<E: EvalContext>(_ctx: &E, x: &Value, bits: usize) -> Result<Value> {
    let data = x.expect_arithmetic()?;
    if bits >= x.field().bits() {
        return Err(MpcError::TruncBits {
            field: x.field(),
            bits,
        });
    }
    Ok(Value::arithmetic(data.shl(bits)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::simulate;
    use crate::{EvalContext, FieldType, RingArray, ShareType, Value};

    fn plain64(data: &[u128]) -> Value {
        Value::public(RingArray::from_vec(FieldType::FM64, &[data.len()], data).unwrap())
    }

    #[tokio::test]
    async fn public_share_round_trip() {
        for world in [2, 3, 4] {
            let outs = simulate(world, |ctx| {
                Box::pin(async move {
                    let x = plain64(&[1, u64::MAX as u128, 42]);
                    let shared = p2a(&ctx, &x).unwrap();
                    assert_eq!(shared.share_type(), ShareType::Arithmetic);
                    a2p(&ctx, &shared).await.unwrap().data().to_vec()
                })
            })
            .await;
            for out in outs {
                assert_eq!(out, vec![1, u64::MAX as u128, 42]);
            }
        }
    }

    #[tokio::test]
    async fn private_round_trip() {
        let world = 3;
        for owner in 0..world {
            let outs = simulate(world, move |ctx| {
                Box::pin(async move {
                    let shared = p2a(&ctx, &plain64(&[17, 5])).unwrap();
                    let private = a2v(&ctx, &shared, owner).await.unwrap();
                    assert_eq!(private.share_type(), ShareType::Private(owner));
                    if ctx.rank() == owner {
                        assert_eq!(private.data().to_vec(), vec![17, 5]);
                    } else {
                        assert_eq!(private.data().to_vec(), vec![0, 0]);
                    }
                    let reshared = v2a(&ctx, &private).unwrap();
                    a2p(&ctx, &reshared).await.unwrap().data().to_vec()
                })
            })
            .await;
            for out in outs {
                assert_eq!(out, vec![17, 5]);
            }
        }
    }

    #[tokio::test]
    async fn linear_kernels() {
        let outs = simulate(3, |ctx| {
            Box::pin(async move {
                let x = p2a(&ctx, &plain64(&[10, 200])).unwrap();
                let y = p2a(&ctx, &plain64(&[7, 1])).unwrap();

                let sum = add_aa(&ctx, &x, &y).unwrap();
                let sum_p = add_ap(&ctx, &x, &plain64(&[1, 2])).unwrap();
                let neg = negate_a(&ctx, &x).unwrap();
                let shifted = lshift_a(&ctx, &x, 3).unwrap();

                (
                    a2p(&ctx, &sum).await.unwrap().data().to_vec(),
                    a2p(&ctx, &sum_p).await.unwrap().data().to_vec(),
                    a2p(&ctx, &neg).await.unwrap().data().to_vec(),
                    a2p(&ctx, &shifted).await.unwrap().data().to_vec(),
                )
            })
        })
        .await;
        for (sum, sum_p, neg, shifted) in outs {
            assert_eq!(sum, vec![17, 201]);
            assert_eq!(sum_p, vec![11, 202]);
            assert_eq!(neg, vec![10u64.wrapping_neg() as u128, 200u64.wrapping_neg() as u128]);
            assert_eq!(shifted, vec![80, 1600]);
        }
    }

    #[tokio::test]
    async fn rand_a_is_consistent() {
        let outs = simulate(2, |ctx| {
            Box::pin(async move {
                let r = rand_a(&ctx, FieldType::FM32, &[5]).unwrap();
                assert_eq!(r.field(), FieldType::FM32);
                assert_eq!(r.shape(), &[5]);
                a2p(&ctx, &r).await.unwrap().data().to_vec()
            })
        })
        .await;
        // every party reconstructs the same random value
        assert_eq!(outs[0], outs[1]);
    }

    #[tokio::test]
    async fn share_type_mismatch_is_fatal() {
        let outs = simulate(2, |ctx| {
            Box::pin(async move {
                let x = plain64(&[1]);
                // a public value is not an arithmetic share
                let err = a2p(&ctx, &x).await.unwrap_err();
                (format!("{err}"), ctx.comm().rounds())
            })
        })
        .await;
        for (msg, rounds) in outs {
            assert!(msg.contains("arithmetic"));
            assert_eq!(rounds, 0);
        }
    }
}
