//! Beaver-triple multiplication kernels and the replay cache control.

use tracing::trace;

use crate::beaver::{MulKind, ReplayStatus};
use crate::error::{MpcError, Result};
use crate::ring::RingArray;
use crate::value::{check_same_field, Value};
use crate::{BeaverSource, Communicator, EvalContext};

/// Everything a multiplication needs after the opening round: this party's
/// triple shares and the two publicly reconstructed maskings.
struct Opened {
    a: RingArray,
    b: RingArray,
    c: RingArray,
    x_a: RingArray,
    y_b: RingArray,
}

/// Shared front half of every triple-based multiply: validate, consult the
/// replay cache, fetch the triple and open `x - a`, `y - b`.
///
/// The cache is consulted once, before any suspension point; openings made by
/// concurrent kernels on the same party cannot interleave with this decision.
async fn mul_open<E: EvalContext>(
    ctx: &E,
    x: &RingArray,
    y: &RingArray,
    kind: MulKind,
) -> Result<Opened> {
    if x.field() != y.field() {
        return Err(MpcError::FieldMismatch(x.field(), y.field()));
    }
    match kind {
        MulKind::Elementwise => {
            if x.shape() != y.shape() {
                return Err(MpcError::ShapeMismatch(
                    x.shape().to_vec(),
                    y.shape().to_vec(),
                ));
            }
        }
        MulKind::Dot => {
            if x.ndim() != 2 || y.ndim() != 2 || x.shape()[1] != y.shape()[0] {
                return Err(MpcError::ShapeMismatch(
                    x.shape().to_vec(),
                    y.shape().to_vec(),
                ));
            }
        }
    }

    let mut x_state = ctx.beaver_cache().borrow().lookup(x, kind);
    let mut y_state = ctx.beaver_cache().borrow().lookup(y, kind);

    // x * x with caching enabled and no opening bound yet: both descriptors
    // would bind to the same slot. Let x's side win this call; y replays it
    // next time.
    if x.id() == y.id() && x_state.enabled && x_state.desc.status == ReplayStatus::Init {
        y_state.enabled = false;
    }

    let x_hit = x_state.hit();
    let y_hit = y_state.hit();
    trace!(x_hit, y_hit, ?kind, "mul_open");

    let (a, b, c) = {
        let x_desc = if x_state.enabled {
            Some(&mut x_state.desc)
        } else {
            None
        };
        let y_desc = if y_state.enabled {
            Some(&mut y_state.desc)
        } else {
            None
        };
        match kind {
            MulKind::Elementwise => ctx.beaver().mul(x.field(), x.shape(), x_desc, y_desc)?,
            MulKind::Dot => ctx.beaver().dot(
                x.field(),
                x.shape()[0],
                y.shape()[1],
                x.shape()[1],
                x_desc,
                y_desc,
            )?,
        }
    };

    let (x_a, y_b) = if ctx.config().disable_vectorized_open || x_hit || y_hit {
        let x_a = match (x_hit, x_state.open.clone()) {
            (true, Some(open)) => open,
            _ => ctx.comm().all_reduce_add(x.sub(&a)?, "open(x-a)").await?,
        };
        let y_b = match (y_hit, y_state.open.clone()) {
            (true, Some(open)) => open,
            _ => ctx.comm().all_reduce_add(y.sub(&b)?, "open(y-b)").await?,
        };
        (x_a, y_b)
    } else {
        let opened = ctx
            .comm()
            .all_reduce_add_batch(vec![x.sub(&a)?, y.sub(&b)?], "open(x-a,y-b)")
            .await?;
        let mut opened = opened.into_iter();
        match (opened.next(), opened.next()) {
            (Some(x_a), Some(y_b)) => (x_a, y_b),
            _ => return Err(MpcError::Comm("batched open returned too few arrays".into())),
        }
    };

    // Bind fresh openings for later replay. The source has flipped the
    // descriptors to Replayed when it drew their masks.
    if x_state.enabled && !x_hit {
        ctx.beaver_cache()
            .borrow_mut()
            .store(x, kind, x_state.desc.clone(), x_a.clone());
    }
    if y_state.enabled && !y_hit {
        ctx.beaver_cache()
            .borrow_mut()
            .store(y, kind, y_state.desc.clone(), y_b.clone());
    }

    Ok(Opened { a, b, c, x_a, y_b })
}

/// Elementwise product of two arithmetic shares.
///
/// With `X = open(x - a)` and `Y = open(y - b)` each party holds
/// `z_i = c_i + X·b_i + Y·a_i`, and rank 0 adds the public `X·Y` once.
pub async fn mul_aa<E: EvalContext>(ctx: &E, x: &Value, y: &Value) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let yr = y.expect_arithmetic()?;
    check_same_field(x, y)?;
    let o = mul_open(ctx, xr, yr, MulKind::Elementwise).await?;
    let mut z = o.b.mul(&o.x_a)?.add(&o.a.mul(&o.y_b)?)?.add(&o.c)?;
    if ctx.rank() == 0 {
        z = z.add(&o.x_a.mul(&o.y_b)?)?;
    }
    Ok(Value::arithmetic(z))
}

/// Square of an arithmetic share, from a square pair instead of a full
/// triple: half the correlated randomness and a single opening.
pub async fn square_a<E: EvalContext>(ctx: &E, x: &Value) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let mut state = ctx.beaver_cache().borrow().lookup(xr, MulKind::Elementwise);
    let hit = state.hit();
    trace!(hit, "square_a");

    let (a, b) = {
        let desc = if state.enabled {
            Some(&mut state.desc)
        } else {
            None
        };
        ctx.beaver().square(x.field(), x.shape(), desc)?
    };

    let x_a = match (hit, state.open.clone()) {
        (true, Some(open)) => open,
        _ => ctx.comm().all_reduce_add(xr.sub(&a)?, "open(x-a)").await?,
    };
    if state.enabled && !hit {
        ctx.beaver_cache()
            .borrow_mut()
            .store(xr, MulKind::Elementwise, state.desc.clone(), x_a.clone());
    }

    // z_i = b_i + 2·X·a_i, plus the public X·X at rank 0
    let mut z = a.mul(&x_a)?.mul_scalar(2).add(&b)?;
    if ctx.rank() == 0 {
        z = z.add(&x_a.mul(&x_a)?)?;
    }
    Ok(Value::arithmetic(z))
}

/// Elementwise product of an arithmetic share with a public array; local.
pub fn mul_ap<E: EvalContext>(_ctx: &E, x: &Value, y: &Value) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let yr = y.expect_public()?;
    check_same_field(x, y)?;
    Ok(Value::arithmetic(xr.mul(yr)?))
}

/// Matrix product of an arithmetic share with a public matrix; local.
pub fn matmul_ap<E: EvalContext>(_ctx: &E, x: &Value, y: &Value) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let yr = y.expect_public()?;
    check_same_field(x, y)?;
    Ok(Value::arithmetic(xr.matmul(yr)?))
}

/// Matrix product of two arithmetic shares, from a dot triple.
pub async fn matmul_aa<E: EvalContext>(ctx: &E, x: &Value, y: &Value) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let yr = y.expect_arithmetic()?;
    check_same_field(x, y)?;
    let o = mul_open(ctx, xr, yr, MulKind::Dot).await?;
    let mut z = o.x_a.matmul(&o.b)?.add(&o.a.matmul(&o.y_b)?)?.add(&o.c)?;
    if ctx.rank() == 0 {
        z = z.add(&o.x_a.matmul(&o.y_b)?)?;
    }
    Ok(Value::arithmetic(z))
}

/// Product of an arithmetic share with a one-bit arithmetic share.
///
/// `y` is reduced to its low bit first, so shares carrying garbage above bit
/// zero still select correctly. Computed as `x·y = x·yy + xx·yy` where
/// `xx = x·(1 - 2·yy)` folds the sign flip that makes the selection exact.
pub async fn mul_a1b<E: EvalContext>(ctx: &E, x: &Value, y: &Value) -> Result<Value> {
    let xr = x.expect_arithmetic()?;
    let yr = y.expect_arithmetic()?;
    check_same_field(x, y)?;
    if xr.shape() != yr.shape() {
        return Err(MpcError::ShapeMismatch(
            xr.shape().to_vec(),
            yr.shape().to_vec(),
        ));
    }
    let yy = yr.bitmask(1);
    let ones = RingArray::ones(x.field(), x.shape());
    let xx = ones.sub(&yy.shl(1))?.mul(xr)?;

    let o = mul_open(ctx, &xx, &yy, MulKind::Elementwise).await?;
    let mut z = o.b.mul(&o.x_a)?.add(&o.a.mul(&o.y_b)?)?.add(&o.c)?;
    z = z.sub(&xx.mul(&yy)?)?;
    if ctx.rank() == 0 {
        z = z.add(&o.x_a.mul(&o.y_b)?)?;
    }
    z = z.add(&xr.mul(&yy)?)?;
    Ok(Value::arithmetic(z))
}

/// Two-party product of private values held by distinct owners, yielding an
/// arithmetic share. Each side sends its masked input once; with the pair
/// `a_0·a_1 = c_0 + c_1`,
/// `z_0 = x·(y + a_1) + c_0` and `z_1 = -a_1·(x + a_0) + c_1` sum to `x·y`.
pub async fn mul_vvs<E: EvalContext>(ctx: &E, x: &Value, y: &Value) -> Result<Value> {
    let (x_owner, xr) = x.expect_private()?;
    let (y_owner, yr) = y.expect_private()?;
    if x_owner == y_owner {
        return Err(MpcError::SameOwner(x_owner));
    }
    let field = check_same_field(x, y)?;
    if xr.shape() != yr.shape() {
        return Err(MpcError::ShapeMismatch(
            xr.shape().to_vec(),
            yr.shape().to_vec(),
        ));
    }

    let rank = ctx.rank();
    if rank > 1 || (rank != x_owner && rank != y_owner) {
        return Err(MpcError::InvalidRank(rank));
    }
    let input = if rank == x_owner { xr } else { yr };

    let (a, c) = ctx.beaver().mul_priv(field, x.shape())?;
    let peer = 1 - rank;
    ctx.comm()
        .send(peer, input.add(&a)?, "mul_vvs:masked")
        .await?;
    let theirs = ctx.comm().recv(peer, "mul_vvs:masked").await?;

    let z = if rank == 0 {
        theirs.mul(input)?.add(&c)?
    } else {
        theirs.mul(&a.neg())?.add(&c)?
    };
    Ok(Value::arithmetic(z))
}

/// Opt a value's backing arrays (real and imaginary part alike) in or out of
/// opening replay. Purely local; no communication, no result change.
pub fn set_beaver_cache<E: EvalContext>(ctx: &E, x: &Value, enable: bool) {
    let mut cache = ctx.beaver_cache().borrow_mut();
    if enable {
        cache.enable(x.data());
        if let Some(imag) = x.imag() {
            cache.enable(imag);
        }
    } else {
        cache.disable(x.data());
        if let Some(imag) = x.imag() {
            cache.disable(imag);
        }
    }
}
