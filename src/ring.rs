use std::sync::Arc;

use ndarray::{ArrayD, IxDyn, Zip};
use num_traits::{PrimInt, WrappingAdd, WrappingMul, WrappingNeg, WrappingSub};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{MpcError, Result};

/// Ring width of a shared value: Z/2^k for k in {32, 64, 128}.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldType {
    FM32,
    FM64,
    FM128,
}

impl FieldType {
    /// Ring width k in bits.
    pub fn bits(self) -> usize {
        match self {
            FieldType::FM32 => 32,
            FieldType::FM64 => 64,
            FieldType::FM128 => 128,
        }
    }

    /// Smallest supported field that fits `bits` bits, if any.
    pub fn covering(bits: usize) -> Option<FieldType> {
        if bits <= 32 {
            Some(FieldType::FM32)
        } else if bits <= 64 {
            Some(FieldType::FM64)
        } else if bits <= 128 {
            Some(FieldType::FM128)
        } else {
            None
        }
    }
}

/// Fixed-width unsigned ring element. Implemented for u32/u64/u128 only.
pub trait RingElem:
    PrimInt + WrappingAdd + WrappingSub + WrappingMul + WrappingNeg + Send + Sync + 'static
{
    const BITS: usize;

    /// Truncating conversion from u128.
    fn from_u128(v: u128) -> Self;

    /// Zero-extending conversion to u128.
    fn to_u128(self) -> u128;

    /// Arithmetic (sign-extending) right shift. Shifts of `BITS` or more
    /// saturate to the sign.
    fn arshift(self, bits: usize) -> Self;
}

macro_rules! impl_ring_elem {
    ($t:ty, $s:ty, $bits:expr) => {
        impl RingElem for $t {
            const BITS: usize = $bits;

            fn from_u128(v: u128) -> Self {
                v as $t
            }

            fn to_u128(self) -> u128 {
                self as u128
            }

            fn arshift(self, bits: usize) -> Self {
                let bits = bits.min($bits - 1);
                ((self as $s) >> bits) as $t
            }
        }
    };
}

impl_ring_elem!(u32, i32, 32);
impl_ring_elem!(u64, i64, 64);
impl_ring_elem!(u128, i128, 128);

/// Stable identity of the allocation backing a `RingArray`.
///
/// Clones of an array share the identity; any arithmetic op produces a fresh
/// one. Used as the replay-cache key, never as value equality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperandId(usize);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum RingBuf {
    Fm32(ArrayD<u32>),
    Fm64(ArrayD<u64>),
    Fm128(ArrayD<u128>),
}

/// Unary dispatch over the field width; `$body` is monomorphized per width.
macro_rules! map_buf {
    ($buf:expr, |$a:ident| $body:expr) => {
        match $buf {
            RingBuf::Fm32($a) => RingBuf::Fm32($body),
            RingBuf::Fm64($a) => RingBuf::Fm64($body),
            RingBuf::Fm128($a) => RingBuf::Fm128($body),
        }
    };
}

/// Binary dispatch; operands must already be field-checked.
macro_rules! zip_buf {
    ($x:expr, $y:expr, |$a:ident, $b:ident| $body:expr) => {
        match ($x, $y) {
            (RingBuf::Fm32($a), RingBuf::Fm32($b)) => RingBuf::Fm32($body),
            (RingBuf::Fm64($a), RingBuf::Fm64($b)) => RingBuf::Fm64($body),
            (RingBuf::Fm128($a), RingBuf::Fm128($b)) => RingBuf::Fm128($body),
            _ => unreachable!("field mismatch must be rejected before dispatch"),
        }
    };
}

/// Immutable N-dimensional array of ring elements mod 2^k.
///
/// The backing buffer is shared, so clones are cheap and keep the operand
/// identity of the original. Every operation returns a new array.
#[derive(Clone, Debug)]
pub struct RingArray {
    buf: Arc<RingBuf>,
}

impl PartialEq for RingArray {
    fn eq(&self, other: &Self) -> bool {
        *self.buf == *other.buf
    }
}

impl Serialize for RingArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.buf.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RingArray {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        RingBuf::deserialize(deserializer).map(RingArray::from_buf)
    }
}

fn zip_elems<T: RingElem>(a: &ArrayD<T>, b: &ArrayD<T>, f: impl Fn(T, T) -> T) -> ArrayD<T> {
    Zip::from(a).and(b).map_collect(|&x, &y| f(x, y))
}

fn shl_elems<T: RingElem>(a: &ArrayD<T>, bits: usize) -> ArrayD<T> {
    if bits >= T::BITS {
        a.mapv(|_| T::zero())
    } else {
        a.mapv(|x| x << bits)
    }
}

fn shr_elems<T: RingElem>(a: &ArrayD<T>, bits: usize) -> ArrayD<T> {
    if bits >= T::BITS {
        a.mapv(|_| T::zero())
    } else {
        a.mapv(|x| x >> bits)
    }
}

fn bitmask_elems<T: RingElem>(a: &ArrayD<T>, bits: usize) -> ArrayD<T> {
    if bits >= T::BITS {
        a.clone()
    } else {
        let mask = (T::one() << bits).wrapping_sub(&T::one());
        a.mapv(move |x| x & mask)
    }
}

fn add_scalar_elems<T: RingElem>(a: &ArrayD<T>, v: u128) -> ArrayD<T> {
    let s = T::from_u128(v);
    a.mapv(move |x| x.wrapping_add(&s))
}

fn mul_scalar_elems<T: RingElem>(a: &ArrayD<T>, v: u128) -> ArrayD<T> {
    let s = T::from_u128(v);
    a.mapv(move |x| x.wrapping_mul(&s))
}

fn ge_scalar_elems<T: RingElem>(a: &ArrayD<T>, v: u128) -> ArrayD<T> {
    let s = T::from_u128(v);
    a.mapv(move |x| if x >= s { T::one() } else { T::zero() })
}

fn matmul_elems<T: RingElem>(a: &ArrayD<T>, b: &ArrayD<T>) -> ArrayD<T> {
    let m = a.shape()[0];
    let inner = a.shape()[1];
    let n = b.shape()[1];
    let mut out = ArrayD::<T>::zeros(IxDyn(&[m, n]));
    for i in 0..m {
        for j in 0..n {
            let mut acc = T::zero();
            for l in 0..inner {
                acc = acc.wrapping_add(&a[[i, l]].wrapping_mul(&b[[l, j]]));
            }
            out[[i, j]] = acc;
        }
    }
    out
}

impl RingArray {
    fn from_buf(buf: RingBuf) -> Self {
        RingArray { buf: Arc::new(buf) }
    }

    pub fn zeros(field: FieldType, shape: &[usize]) -> Self {
        let dim = IxDyn(shape);
        Self::from_buf(match field {
            FieldType::FM32 => RingBuf::Fm32(ArrayD::zeros(dim)),
            FieldType::FM64 => RingBuf::Fm64(ArrayD::zeros(dim)),
            FieldType::FM128 => RingBuf::Fm128(ArrayD::zeros(dim)),
        })
    }

    pub fn ones(field: FieldType, shape: &[usize]) -> Self {
        let dim = IxDyn(shape);
        Self::from_buf(match field {
            FieldType::FM32 => RingBuf::Fm32(ArrayD::ones(dim)),
            FieldType::FM64 => RingBuf::Fm64(ArrayD::ones(dim)),
            FieldType::FM128 => RingBuf::Fm128(ArrayD::ones(dim)),
        })
    }

    /// Build an array from row-major u128 values, truncated into the field.
    pub fn from_vec(field: FieldType, shape: &[usize], data: &[u128]) -> Result<Self> {
        fn build<T: RingElem>(shape: &[usize], data: &[u128]) -> Result<ArrayD<T>> {
            let elems = data.iter().map(|&v| T::from_u128(v)).collect();
            ArrayD::from_shape_vec(IxDyn(shape), elems)
                .map_err(|_| MpcError::ShapeMismatch(shape.to_vec(), vec![data.len()]))
        }
        Ok(Self::from_buf(match field {
            FieldType::FM32 => RingBuf::Fm32(build(shape, data)?),
            FieldType::FM64 => RingBuf::Fm64(build(shape, data)?),
            FieldType::FM128 => RingBuf::Fm128(build(shape, data)?),
        }))
    }

    /// Row-major elements, zero-extended to u128.
    pub fn to_vec(&self) -> Vec<u128> {
        match &*self.buf {
            RingBuf::Fm32(a) => a.iter().map(|&x| x.to_u128()).collect(),
            RingBuf::Fm64(a) => a.iter().map(|&x| x.to_u128()).collect(),
            RingBuf::Fm128(a) => a.iter().map(|&x| x.to_u128()).collect(),
        }
    }

    pub fn field(&self) -> FieldType {
        match &*self.buf {
            RingBuf::Fm32(_) => FieldType::FM32,
            RingBuf::Fm64(_) => FieldType::FM64,
            RingBuf::Fm128(_) => FieldType::FM128,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match &*self.buf {
            RingBuf::Fm32(a) => a.shape(),
            RingBuf::Fm64(a) => a.shape(),
            RingBuf::Fm128(a) => a.shape(),
        }
    }

    pub fn numel(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    pub fn id(&self) -> OperandId {
        OperandId(Arc::as_ptr(&self.buf) as usize)
    }

    fn check_binary(&self, rhs: &RingArray) -> Result<()> {
        if self.field() != rhs.field() {
            return Err(MpcError::FieldMismatch(self.field(), rhs.field()));
        }
        if self.shape() != rhs.shape() {
            return Err(MpcError::ShapeMismatch(
                self.shape().to_vec(),
                rhs.shape().to_vec(),
            ));
        }
        Ok(())
    }

    pub fn add(&self, rhs: &RingArray) -> Result<RingArray> {
        self.check_binary(rhs)?;
        Ok(Self::from_buf(zip_buf!(&*self.buf, &*rhs.buf, |a, b| {
            zip_elems(a, b, |x, y| x.wrapping_add(y))
        })))
    }

    pub fn sub(&self, rhs: &RingArray) -> Result<RingArray> {
        self.check_binary(rhs)?;
        Ok(Self::from_buf(zip_buf!(&*self.buf, &*rhs.buf, |a, b| {
            zip_elems(a, b, |x, y| x.wrapping_sub(y))
        })))
    }

    pub fn mul(&self, rhs: &RingArray) -> Result<RingArray> {
        self.check_binary(rhs)?;
        Ok(Self::from_buf(zip_buf!(&*self.buf, &*rhs.buf, |a, b| {
            zip_elems(a, b, |x, y| x.wrapping_mul(y))
        })))
    }

    /// Matrix product of two 2-D arrays; output shape `(rows(x), cols(y))`.
    pub fn matmul(&self, rhs: &RingArray) -> Result<RingArray> {
        if self.field() != rhs.field() {
            return Err(MpcError::FieldMismatch(self.field(), rhs.field()));
        }
        if self.ndim() != 2 || rhs.ndim() != 2 || self.shape()[1] != rhs.shape()[0] {
            return Err(MpcError::ShapeMismatch(
                self.shape().to_vec(),
                rhs.shape().to_vec(),
            ));
        }
        Ok(Self::from_buf(zip_buf!(&*self.buf, &*rhs.buf, |a, b| {
            matmul_elems(a, b)
        })))
    }

    pub fn neg(&self) -> RingArray {
        Self::from_buf(map_buf!(&*self.buf, |a| a.mapv(|x| x.wrapping_neg())))
    }

    /// Logical left shift; shifts of the full width or more yield zero.
    pub fn shl(&self, bits: usize) -> RingArray {
        Self::from_buf(map_buf!(&*self.buf, |a| shl_elems(a, bits)))
    }

    /// Logical right shift; shifts of the full width or more yield zero.
    pub fn shr(&self, bits: usize) -> RingArray {
        Self::from_buf(map_buf!(&*self.buf, |a| shr_elems(a, bits)))
    }

    /// Arithmetic right shift, treating elements as two's complement.
    pub fn arshift(&self, bits: usize) -> RingArray {
        Self::from_buf(map_buf!(&*self.buf, |a| a.mapv(|x| x.arshift(bits))))
    }

    /// Keep the low `bits` bits of every element.
    pub fn bitmask(&self, bits: usize) -> RingArray {
        Self::from_buf(map_buf!(&*self.buf, |a| bitmask_elems(a, bits)))
    }

    pub fn add_scalar(&self, v: u128) -> RingArray {
        Self::from_buf(map_buf!(&*self.buf, |a| add_scalar_elems(a, v)))
    }

    pub fn sub_scalar(&self, v: u128) -> RingArray {
        self.add_scalar(v.wrapping_neg())
    }

    pub fn mul_scalar(&self, v: u128) -> RingArray {
        Self::from_buf(map_buf!(&*self.buf, |a| mul_scalar_elems(a, v)))
    }

    /// Elementwise unsigned comparison against a scalar; 1 where `x >= v`.
    pub fn ge_scalar(&self, v: u128) -> RingArray {
        Self::from_buf(map_buf!(&*self.buf, |a| ge_scalar_elems(a, v)))
    }

    /// Re-encode into another field, zero-extending or truncating elements.
    pub fn cast(&self, field: FieldType) -> RingArray {
        if field == self.field() {
            return self.clone();
        }
        fn elems<T: RingElem>(src: &RingBuf) -> ArrayD<T> {
            match src {
                RingBuf::Fm32(a) => a.mapv(|x| T::from_u128(x.to_u128())),
                RingBuf::Fm64(a) => a.mapv(|x| T::from_u128(x.to_u128())),
                RingBuf::Fm128(a) => a.mapv(|x| T::from_u128(x.to_u128())),
            }
        }
        Self::from_buf(match field {
            FieldType::FM32 => RingBuf::Fm32(elems(&self.buf)),
            FieldType::FM64 => RingBuf::Fm64(elems(&self.buf)),
            FieldType::FM128 => RingBuf::Fm128(elems(&self.buf)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arr(field: FieldType, data: &[u128]) -> RingArray {
        RingArray::from_vec(field, &[data.len()], data).unwrap()
    }

    #[test]
    fn wrapping_arithmetic() {
        let x = arr(FieldType::FM32, &[u32::MAX as u128, 3]);
        let y = arr(FieldType::FM32, &[1, 5]);
        assert_eq!(x.add(&y).unwrap().to_vec(), vec![0, 8]);
        assert_eq!(y.sub(&x).unwrap().to_vec(), vec![2, 2]);
        assert_eq!(x.mul(&y).unwrap().to_vec(), vec![u32::MAX as u128, 15]);
        assert_eq!(y.neg().to_vec(), vec![(1u128 << 32) - 1, (1u128 << 32) - 5]);

        let w = arr(FieldType::FM128, &[u128::MAX, 2]);
        let v = arr(FieldType::FM128, &[2, 3]);
        assert_eq!(w.add(&v).unwrap().to_vec(), vec![1, 5]);
        assert_eq!(w.sub(&v).unwrap().to_vec(), vec![u128::MAX - 2, u128::MAX]);
        assert_eq!(w.mul(&v).unwrap().to_vec(), vec![u128::MAX - 1, 6]);
    }

    #[test]
    fn field_mismatch_rejected() {
        let x = arr(FieldType::FM32, &[1]);
        let y = arr(FieldType::FM64, &[1]);
        assert!(matches!(x.add(&y), Err(MpcError::FieldMismatch(_, _))));
    }

    #[test]
    fn shape_mismatch_rejected() {
        let x = arr(FieldType::FM64, &[1, 2]);
        let y = arr(FieldType::FM64, &[1, 2, 3]);
        assert!(matches!(x.add(&y), Err(MpcError::ShapeMismatch(_, _))));
    }

    #[test]
    fn shifts_and_masks() {
        let minus_8 = 8u64.wrapping_neg() as u128;
        let x = arr(FieldType::FM64, &[minus_8, 13]);
        assert_eq!(
            x.arshift(2).to_vec(),
            vec![2u64.wrapping_neg() as u128, 3]
        );
        assert_eq!(x.shr(1).to_vec(), vec![(minus_8 as u64 >> 1) as u128, 6]);
        assert_eq!(x.shl(62).to_vec(), vec![0, 1 << 62]);
        assert_eq!(x.bitmask(1).to_vec(), vec![0, 1]);
        assert_eq!(x.shl(64).to_vec(), vec![0, 0]);
    }

    #[test]
    fn matmul_shapes_and_values() {
        let x = RingArray::from_vec(FieldType::FM64, &[2, 3], &[1, 2, 3, 4, 5, 6]).unwrap();
        let y = RingArray::from_vec(FieldType::FM64, &[3, 2], &[7, 8, 9, 10, 11, 12]).unwrap();
        let z = x.matmul(&y).unwrap();
        assert_eq!(z.shape(), &[2, 2]);
        assert_eq!(z.to_vec(), vec![58, 64, 139, 154]);
        assert!(y.matmul(&x).unwrap().shape() == &[3, 3]);
        assert!(matches!(
            x.matmul(&x),
            Err(MpcError::ShapeMismatch(_, _))
        ));
    }

    #[test]
    fn scalar_ops() {
        let x = arr(FieldType::FM32, &[5, 0]);
        assert_eq!(x.add_scalar(3).to_vec(), vec![8, 3]);
        assert_eq!(x.sub_scalar(6).to_vec(), vec![(1u128 << 32) - 1, (1u128 << 32) - 6]);
        assert_eq!(x.mul_scalar(2).to_vec(), vec![10, 0]);
        assert_eq!(x.ge_scalar(5).to_vec(), vec![1, 0]);
    }

    #[test]
    fn cast_truncates_and_extends() {
        let x = arr(FieldType::FM64, &[(1u128 << 40) | 7]);
        assert_eq!(x.cast(FieldType::FM32).to_vec(), vec![7]);
        assert_eq!(x.cast(FieldType::FM128).to_vec(), vec![(1u128 << 40) | 7]);
    }

    #[test]
    fn identity_follows_allocation() {
        let x = arr(FieldType::FM64, &[1, 2]);
        let y = x.clone();
        assert_eq!(x.id(), y.id());
        let z = x.add(&y).unwrap();
        assert_ne!(z.id(), x.id());
        assert_eq!(z, arr(FieldType::FM64, &[2, 4]));
    }
}
