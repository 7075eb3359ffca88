//! Element-type descriptors and the dynamic value layer.
//!
//! Matrices store their values in untyped byte buffers; a [`Type`]
//! descriptor fixes the element size and code for the lifetime of the
//! matrix. Two layers read those buffers:
//!
//! - [`Scalar`]: a dynamic value used by the generic kernel path, the
//!   element-level API (`set_element` / `extract_element`) and the cast
//!   table. One decode/encode per touched element.
//! - [`Element`] (crate-internal): a monomorphization trait the kernel
//!   registry uses to stamp out fused typed inner loops.
//!
//! Casts between built-ins follow Rust `as` semantics (float→int
//! saturates, bool→int is 0/1, int→bool is `!= 0`). User types are
//! opaque fixed-size blobs: they never cast implicitly, and only the
//! generic kernel path touches them.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{Error, Result};

// ============================================================================
// TYPE CODES
// ============================================================================

/// Code identifying a built-in element type, or `User` for opaque types.
///
/// The order is significant only in that it is stable; the kernel
/// registry keys on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeCode {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Fp32,
    Fp64,
    User,
}

impl TypeCode {
    /// Size in bytes of one element of this code.
    ///
    /// # Panics
    ///
    /// `User` has no intrinsic size; asking for it is a bug.
    #[inline]
    pub fn size(self) -> usize {
        match self {
            TypeCode::Bool | TypeCode::Int8 | TypeCode::UInt8 => 1,
            TypeCode::Int16 | TypeCode::UInt16 => 2,
            TypeCode::Int32 | TypeCode::UInt32 | TypeCode::Fp32 => 4,
            TypeCode::Int64 | TypeCode::UInt64 | TypeCode::Fp64 => 8,
            TypeCode::User => panic!("user types carry their own size"),
        }
    }

    /// True for every code except `User`.
    #[inline]
    pub fn is_builtin(self) -> bool {
        !matches!(self, TypeCode::User)
    }

    /// True for the two IEEE-754 codes.
    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, TypeCode::Fp32 | TypeCode::Fp64)
    }
}

// ============================================================================
// TYPE DESCRIPTORS
// ============================================================================

static NEXT_USER_TYPE_ID: AtomicU32 = AtomicU32::new(1);

/// An element-type descriptor: code plus size, immutable once built.
///
/// Built-in descriptors are the `Type::BOOL` .. `Type::FP64` constants.
/// User descriptors carry a process-unique id so two distinct user types
/// of equal size do not compare equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Type {
    code: TypeCode,
    size: usize,
    uid: u32,
}

impl Type {
    pub const BOOL: Type = Type::builtin(TypeCode::Bool, 1);
    pub const INT8: Type = Type::builtin(TypeCode::Int8, 1);
    pub const INT16: Type = Type::builtin(TypeCode::Int16, 2);
    pub const INT32: Type = Type::builtin(TypeCode::Int32, 4);
    pub const INT64: Type = Type::builtin(TypeCode::Int64, 8);
    pub const UINT8: Type = Type::builtin(TypeCode::UInt8, 1);
    pub const UINT16: Type = Type::builtin(TypeCode::UInt16, 2);
    pub const UINT32: Type = Type::builtin(TypeCode::UInt32, 4);
    pub const UINT64: Type = Type::builtin(TypeCode::UInt64, 8);
    pub const FP32: Type = Type::builtin(TypeCode::Fp32, 4);
    pub const FP64: Type = Type::builtin(TypeCode::Fp64, 8);

    const fn builtin(code: TypeCode, size: usize) -> Type {
        Type { code, size, uid: 0 }
    }

    /// Create an opaque user type of the given byte size.
    ///
    /// User-typed values flow through the engine as raw blobs; only
    /// user-supplied operators can interpret them.
    pub fn user(size: usize) -> Result<Type> {
        if size == 0 {
            return Err(Error::InvalidValue {
                what: "user type size must be nonzero".into(),
            });
        }
        let uid = NEXT_USER_TYPE_ID.fetch_add(1, Ordering::Relaxed);
        Ok(Type {
            code: TypeCode::User,
            size,
            uid,
        })
    }

    #[inline]
    pub fn code(&self) -> TypeCode {
        self.code
    }

    /// Size in bytes of one element.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_builtin(&self) -> bool {
        self.code.is_builtin()
    }

    /// Whether a value of `from` may be cast to `self`.
    ///
    /// Built-ins cast freely among themselves; a user type is compatible
    /// only with itself.
    pub fn compatible_with(&self, from: &Type) -> bool {
        if self.is_builtin() && from.is_builtin() {
            true
        } else {
            self == from
        }
    }
}

// ============================================================================
// DYNAMIC SCALARS
// ============================================================================

/// A dynamically-typed built-in value.
///
/// This is the unit the generic kernel path, the cast table, and the
/// element-level matrix API trade in.
///
/// # Examples
///
/// ```
/// use sparsering::{Scalar, TypeCode};
///
/// let s = Scalar::Int32(-7);
/// assert_eq!(s.cast(TypeCode::Fp64), Scalar::Fp64(-7.0));
/// assert_eq!(s.cast(TypeCode::Bool), Scalar::Bool(true));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Fp32(f32),
    Fp64(f64),
}

macro_rules! scalar_as {
    ($name:ident, $t:ty) => {
        /// Cast to the named primitive with `as` semantics.
        #[inline]
        pub fn $name(self) -> $t {
            match self {
                Scalar::Bool(v) => v as u8 as $t,
                Scalar::Int8(v) => v as $t,
                Scalar::Int16(v) => v as $t,
                Scalar::Int32(v) => v as $t,
                Scalar::Int64(v) => v as $t,
                Scalar::UInt8(v) => v as $t,
                Scalar::UInt16(v) => v as $t,
                Scalar::UInt32(v) => v as $t,
                Scalar::UInt64(v) => v as $t,
                Scalar::Fp32(v) => v as $t,
                Scalar::Fp64(v) => v as $t,
            }
        }
    };
}

impl Scalar {
    scalar_as!(as_i8, i8);
    scalar_as!(as_i16, i16);
    scalar_as!(as_i32, i32);
    scalar_as!(as_i64, i64);
    scalar_as!(as_u8, u8);
    scalar_as!(as_u16, u16);
    scalar_as!(as_u32, u32);
    scalar_as!(as_u64, u64);
    scalar_as!(as_f32, f32);
    scalar_as!(as_f64, f64);

    /// Cast to `bool`: nonzero is true (NaN is true, matching `!= 0.0`).
    #[inline]
    pub fn as_bool(self) -> bool {
        match self {
            Scalar::Bool(v) => v,
            Scalar::Int8(v) => v != 0,
            Scalar::Int16(v) => v != 0,
            Scalar::Int32(v) => v != 0,
            Scalar::Int64(v) => v != 0,
            Scalar::UInt8(v) => v != 0,
            Scalar::UInt16(v) => v != 0,
            Scalar::UInt32(v) => v != 0,
            Scalar::UInt64(v) => v != 0,
            Scalar::Fp32(v) => v != 0.0,
            Scalar::Fp64(v) => v != 0.0,
        }
    }

    /// The code of this value's type.
    #[inline]
    pub fn code(&self) -> TypeCode {
        match self {
            Scalar::Bool(_) => TypeCode::Bool,
            Scalar::Int8(_) => TypeCode::Int8,
            Scalar::Int16(_) => TypeCode::Int16,
            Scalar::Int32(_) => TypeCode::Int32,
            Scalar::Int64(_) => TypeCode::Int64,
            Scalar::UInt8(_) => TypeCode::UInt8,
            Scalar::UInt16(_) => TypeCode::UInt16,
            Scalar::UInt32(_) => TypeCode::UInt32,
            Scalar::UInt64(_) => TypeCode::UInt64,
            Scalar::Fp32(_) => TypeCode::Fp32,
            Scalar::Fp64(_) => TypeCode::Fp64,
        }
    }

    /// Cast this value to another built-in code.
    ///
    /// # Panics
    ///
    /// `TypeCode::User` is not a scalar code.
    pub fn cast(self, to: TypeCode) -> Scalar {
        match to {
            TypeCode::Bool => Scalar::Bool(self.as_bool()),
            TypeCode::Int8 => Scalar::Int8(self.as_i8()),
            TypeCode::Int16 => Scalar::Int16(self.as_i16()),
            TypeCode::Int32 => Scalar::Int32(self.as_i32()),
            TypeCode::Int64 => Scalar::Int64(self.as_i64()),
            TypeCode::UInt8 => Scalar::UInt8(self.as_u8()),
            TypeCode::UInt16 => Scalar::UInt16(self.as_u16()),
            TypeCode::UInt32 => Scalar::UInt32(self.as_u32()),
            TypeCode::UInt64 => Scalar::UInt64(self.as_u64()),
            TypeCode::Fp32 => Scalar::Fp32(self.as_f32()),
            TypeCode::Fp64 => Scalar::Fp64(self.as_f64()),
            TypeCode::User => panic!("user types have no scalar representation"),
        }
    }

    /// Decode one element of `code` from the front of `bytes`.
    ///
    /// Buffers are little-endian, matching [`Scalar::write`].
    pub fn read(code: TypeCode, bytes: &[u8]) -> Scalar {
        match code {
            TypeCode::Bool => Scalar::Bool(bytes[0] != 0),
            TypeCode::Int8 => Scalar::Int8(bytes[0] as i8),
            TypeCode::Int16 => Scalar::Int16(i16::from_le_bytes([bytes[0], bytes[1]])),
            TypeCode::Int32 => {
                Scalar::Int32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            TypeCode::Int64 => Scalar::Int64(i64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])),
            TypeCode::UInt8 => Scalar::UInt8(bytes[0]),
            TypeCode::UInt16 => Scalar::UInt16(u16::from_le_bytes([bytes[0], bytes[1]])),
            TypeCode::UInt32 => {
                Scalar::UInt32(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            TypeCode::UInt64 => Scalar::UInt64(u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])),
            TypeCode::Fp32 => {
                Scalar::Fp32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            }
            TypeCode::Fp64 => Scalar::Fp64(f64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ])),
            TypeCode::User => panic!("user types have no scalar representation"),
        }
    }

    /// Encode this value into the front of `bytes`.
    pub fn write(self, bytes: &mut [u8]) {
        match self {
            Scalar::Bool(v) => bytes[0] = v as u8,
            Scalar::Int8(v) => bytes[0] = v as u8,
            Scalar::Int16(v) => bytes[..2].copy_from_slice(&v.to_le_bytes()),
            Scalar::Int32(v) => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            Scalar::Int64(v) => bytes[..8].copy_from_slice(&v.to_le_bytes()),
            Scalar::UInt8(v) => bytes[0] = v,
            Scalar::UInt16(v) => bytes[..2].copy_from_slice(&v.to_le_bytes()),
            Scalar::UInt32(v) => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            Scalar::UInt64(v) => bytes[..8].copy_from_slice(&v.to_le_bytes()),
            Scalar::Fp32(v) => bytes[..4].copy_from_slice(&v.to_le_bytes()),
            Scalar::Fp64(v) => bytes[..8].copy_from_slice(&v.to_le_bytes()),
        }
    }

    /// Encode as a fresh byte vector of exactly the element size.
    pub fn to_bytes(self) -> Vec<u8> {
        let mut out = vec![0u8; self.code().size()];
        self.write(&mut out);
        out
    }
}

macro_rules! scalar_from {
    ($t:ty, $variant:ident) => {
        impl From<$t> for Scalar {
            #[inline]
            fn from(v: $t) -> Scalar {
                Scalar::$variant(v)
            }
        }
    };
}

scalar_from!(bool, Bool);
scalar_from!(i8, Int8);
scalar_from!(i16, Int16);
scalar_from!(i32, Int32);
scalar_from!(i64, Int64);
scalar_from!(u8, UInt8);
scalar_from!(u16, UInt16);
scalar_from!(u32, UInt32);
scalar_from!(u64, UInt64);
scalar_from!(f32, Fp32);
scalar_from!(f64, Fp64);

// ============================================================================
// CAST TABLE
// ============================================================================

/// Cast one element from `src` bytes (type `from`) into `dst` bytes
/// (type `to`). Same-type casts degenerate to a copy, which also covers
/// user types (the only cast they admit).
pub fn cast_bytes(to: TypeCode, dst: &mut [u8], from: TypeCode, src: &[u8]) {
    if to == from {
        dst[..src.len()].copy_from_slice(src);
    } else {
        Scalar::read(from, src).cast(to).write(dst);
    }
}

// ============================================================================
// MONOMORPHIZATION TRAIT
// ============================================================================

/// Fixed-size element the kernel registry can stamp typed loops for.
///
/// Implementations decode from and encode to the little-endian buffers
/// that back every matrix, so fused kernels pay no dynamic dispatch per
/// element.
pub(crate) trait Element: Copy + PartialEq + Send + Sync {
    const CODE: TypeCode;
    const SIZE: usize;

    fn decode(bytes: &[u8]) -> Self;
    fn encode(self, bytes: &mut [u8]);
}

macro_rules! impl_element {
    ($t:ty, $code:expr, $size:expr) => {
        impl Element for $t {
            const CODE: TypeCode = $code;
            const SIZE: usize = $size;

            #[inline(always)]
            fn decode(bytes: &[u8]) -> Self {
                <$t>::from_le_bytes(bytes[..$size].try_into().unwrap())
            }

            #[inline(always)]
            fn encode(self, bytes: &mut [u8]) {
                bytes[..$size].copy_from_slice(&self.to_le_bytes());
            }
        }
    };
}

impl_element!(i8, TypeCode::Int8, 1);
impl_element!(i16, TypeCode::Int16, 2);
impl_element!(i32, TypeCode::Int32, 4);
impl_element!(i64, TypeCode::Int64, 8);
impl_element!(u8, TypeCode::UInt8, 1);
impl_element!(u16, TypeCode::UInt16, 2);
impl_element!(u32, TypeCode::UInt32, 4);
impl_element!(u64, TypeCode::UInt64, 8);
impl_element!(f32, TypeCode::Fp32, 4);
impl_element!(f64, TypeCode::Fp64, 8);

impl Element for bool {
    const CODE: TypeCode = TypeCode::Bool;
    const SIZE: usize = 1;

    #[inline(always)]
    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    #[inline(always)]
    fn encode(self, bytes: &mut [u8]) {
        bytes[0] = self as u8;
    }
}
