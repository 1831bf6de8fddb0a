use crate::error::{MpcError, Result};
use crate::ring::{FieldType, RingArray};

/// Tag classifying how a ring array is shared among the parties.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareType {
    /// Known in plaintext to every party.
    Public,
    /// Additive share; the per-party arrays sum to the secret mod 2^k.
    Arithmetic,
    /// Known in full only to the owning rank; placeholder zeros elsewhere.
    Private(usize),
}

impl ShareType {
    fn name(self) -> &'static str {
        match self {
            ShareType::Public => "public",
            ShareType::Arithmetic => "arithmetic",
            ShareType::Private(_) => "private",
        }
    }
}

/// A typed share value: ring array plus sharing tag, with an optional
/// imaginary component for complex-valued tensors.
#[derive(Clone, Debug)]
pub struct Value {
    data: RingArray,
    ty: ShareType,
    imag: Option<RingArray>,
}

impl Value {
    pub fn public(data: RingArray) -> Self {
        Value {
            data,
            ty: ShareType::Public,
            imag: None,
        }
    }

    pub fn arithmetic(data: RingArray) -> Self {
        Value {
            data,
            ty: ShareType::Arithmetic,
            imag: None,
        }
    }

    pub fn private(owner: usize, data: RingArray) -> Self {
        Value {
            data,
            ty: ShareType::Private(owner),
            imag: None,
        }
    }

    /// Private value as seen by a non-owning rank: a well-defined zero
    /// placeholder, never garbage.
    pub fn private_placeholder(owner: usize, field: FieldType, shape: &[usize]) -> Self {
        Value::private(owner, RingArray::zeros(field, shape))
    }

    pub fn with_imag(mut self, imag: RingArray) -> Self {
        self.imag = Some(imag);
        self
    }

    pub fn data(&self) -> &RingArray {
        &self.data
    }

    pub fn into_data(self) -> RingArray {
        self.data
    }

    pub fn share_type(&self) -> ShareType {
        self.ty
    }

    pub fn imag(&self) -> Option<&RingArray> {
        self.imag.as_ref()
    }

    pub fn field(&self) -> FieldType {
        self.data.field()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    fn mismatch(&self, expected: &'static str) -> MpcError {
        MpcError::ShareTypeMismatch {
            expected,
            actual: self.ty.name().to_string(),
        }
    }

    pub fn expect_public(&self) -> Result<&RingArray> {
        match self.ty {
            ShareType::Public => Ok(&self.data),
            _ => Err(self.mismatch("public")),
        }
    }

    pub fn expect_arithmetic(&self) -> Result<&RingArray> {
        match self.ty {
            ShareType::Arithmetic => Ok(&self.data),
            _ => Err(self.mismatch("arithmetic")),
        }
    }

    pub fn expect_private(&self) -> Result<(usize, &RingArray)> {
        match self.ty {
            ShareType::Private(owner) => Ok((owner, &self.data)),
            _ => Err(self.mismatch("private")),
        }
    }
}

/// Fail unless both operands live in the same ring.
pub fn check_same_field(lhs: &Value, rhs: &Value) -> Result<FieldType> {
    if lhs.field() != rhs.field() {
        return Err(MpcError::FieldMismatch(lhs.field(), rhs.field()));
    }
    Ok(lhs.field())
}
