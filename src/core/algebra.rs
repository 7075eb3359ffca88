//! Monoid and semiring descriptors.
//!
//! A monoid is a binary operator closed on one type, with an identity and
//! optionally a **terminal** (absorbing) value: once a reduction reaches
//! the terminal it can stop early, since `f(T, v) = T` for all `v`. A
//! semiring pairs an additive monoid with a compatible multiplier whose
//! ztype equals the monoid type.
//!
//! Identity and terminal values are stored as encoded element bytes so
//! inner loops can seed workspaces and test for early exit with plain
//! byte compares.

use crate::error::{Error, Result};
use crate::ops::{BinaryOp, BinaryOpcode};
use crate::types::{Scalar, Type, TypeCode};

// ============================================================================
// TYPE EXTREMES
// ============================================================================

/// Largest value of a built-in code (`+inf` for floats, `true` for bool).
pub(crate) fn type_max(code: TypeCode) -> Scalar {
    match code {
        TypeCode::Bool => Scalar::Bool(true),
        TypeCode::Int8 => Scalar::Int8(i8::MAX),
        TypeCode::Int16 => Scalar::Int16(i16::MAX),
        TypeCode::Int32 => Scalar::Int32(i32::MAX),
        TypeCode::Int64 => Scalar::Int64(i64::MAX),
        TypeCode::UInt8 => Scalar::UInt8(u8::MAX),
        TypeCode::UInt16 => Scalar::UInt16(u16::MAX),
        TypeCode::UInt32 => Scalar::UInt32(u32::MAX),
        TypeCode::UInt64 => Scalar::UInt64(u64::MAX),
        TypeCode::Fp32 => Scalar::Fp32(f32::INFINITY),
        TypeCode::Fp64 => Scalar::Fp64(f64::INFINITY),
        TypeCode::User => panic!("user types have no extremes"),
    }
}

/// Smallest value of a built-in code (`-inf` for floats, `false` for bool).
pub(crate) fn type_min(code: TypeCode) -> Scalar {
    match code {
        TypeCode::Bool => Scalar::Bool(false),
        TypeCode::Int8 => Scalar::Int8(i8::MIN),
        TypeCode::Int16 => Scalar::Int16(i16::MIN),
        TypeCode::Int32 => Scalar::Int32(i32::MIN),
        TypeCode::Int64 => Scalar::Int64(i64::MIN),
        TypeCode::UInt8 => Scalar::UInt8(0),
        TypeCode::UInt16 => Scalar::UInt16(0),
        TypeCode::UInt32 => Scalar::UInt32(0),
        TypeCode::UInt64 => Scalar::UInt64(0),
        TypeCode::Fp32 => Scalar::Fp32(f32::NEG_INFINITY),
        TypeCode::Fp64 => Scalar::Fp64(f64::NEG_INFINITY),
        TypeCode::User => panic!("user types have no extremes"),
    }
}

// ============================================================================
// MONOIDS
// ============================================================================

/// An additive monoid: a binary operator closed on one type, its
/// identity, and an optional terminal value.
#[derive(Clone, Debug, PartialEq)]
pub struct Monoid {
    pub op: BinaryOp,
    identity: Vec<u8>,
    terminal: Option<Vec<u8>>,
}

impl Monoid {
    /// Build a monoid from an operator and identity scalar.
    ///
    /// The operator must be closed (`ztype == xtype == ytype`).
    pub fn new(op: BinaryOp, identity: Scalar, terminal: Option<Scalar>) -> Result<Monoid> {
        if op.ztype != op.xtype || op.ztype != op.ytype {
            return Err(Error::DomainMismatch {
                expected: op.ztype.code(),
                got: op.xtype.code(),
            });
        }
        if !op.ztype.is_builtin() {
            // user-typed identities go through new_user as raw bytes
            return Err(Error::DomainMismatch {
                expected: op.ztype.code(),
                got: identity.code(),
            });
        }
        let zc = op.ztype.code();
        Ok(Monoid {
            op,
            identity: identity.cast(zc).to_bytes(),
            terminal: terminal.map(|t| t.cast(zc).to_bytes()),
        })
    }

    /// Build a monoid for a user operator from raw identity bytes.
    pub fn new_user(op: BinaryOp, identity: &[u8], terminal: Option<&[u8]>) -> Result<Monoid> {
        if op.ztype != op.xtype || op.ztype != op.ytype {
            return Err(Error::DomainMismatch {
                expected: op.ztype.code(),
                got: op.xtype.code(),
            });
        }
        if identity.len() != op.ztype.size() {
            return Err(Error::InvalidValue {
                what: "identity size does not match operator type".into(),
            });
        }
        Ok(Monoid {
            op,
            identity: identity.to_vec(),
            terminal: terminal.map(|t| t.to_vec()),
        })
    }

    // ------------------------------------------------------------------------
    // built-in constructors
    // ------------------------------------------------------------------------

    /// PLUS monoid: identity 0, no terminal.
    pub fn plus(t: Type) -> Result<Monoid> {
        let op = BinaryOp::builtin(BinaryOpcode::Plus, t)?;
        Monoid::new(op, Scalar::UInt8(0), None)
    }

    /// TIMES monoid: identity 1; terminal 0 for integer types only
    /// (floating multiply never absorbs because of NaN).
    pub fn times(t: Type) -> Result<Monoid> {
        let op = BinaryOp::builtin(BinaryOpcode::Times, t)?;
        let terminal = if t.code().is_float() {
            None
        } else {
            Some(Scalar::UInt8(0))
        };
        Monoid::new(op, Scalar::UInt8(1), terminal)
    }

    /// MIN monoid: identity is the type maximum, terminal the minimum.
    pub fn min(t: Type) -> Result<Monoid> {
        let op = BinaryOp::builtin(BinaryOpcode::Min, t)?;
        Monoid::new(op, type_max(t.code()), Some(type_min(t.code())))
    }

    /// MAX monoid: identity is the type minimum, terminal the maximum.
    pub fn max(t: Type) -> Result<Monoid> {
        let op = BinaryOp::builtin(BinaryOpcode::Max, t)?;
        Monoid::new(op, type_min(t.code()), Some(type_max(t.code())))
    }

    /// Boolean OR monoid: identity false, terminal true.
    pub fn lor() -> Monoid {
        let op = BinaryOp::builtin(BinaryOpcode::Lor, Type::BOOL).unwrap();
        Monoid::new(op, Scalar::Bool(false), Some(Scalar::Bool(true))).unwrap()
    }

    /// Boolean AND monoid: identity true, terminal false.
    pub fn land() -> Monoid {
        let op = BinaryOp::builtin(BinaryOpcode::Land, Type::BOOL).unwrap();
        Monoid::new(op, Scalar::Bool(true), Some(Scalar::Bool(false))).unwrap()
    }

    /// Boolean XOR monoid: identity false, no terminal.
    pub fn lxor() -> Monoid {
        let op = BinaryOp::builtin(BinaryOpcode::Lxor, Type::BOOL).unwrap();
        Monoid::new(op, Scalar::Bool(false), None).unwrap()
    }

    /// Boolean EQ (xnor) monoid: identity true, no terminal.
    pub fn eq() -> Monoid {
        let op = BinaryOp::builtin(BinaryOpcode::Eq, Type::BOOL).unwrap();
        Monoid::new(op, Scalar::Bool(true), None).unwrap()
    }

    /// ANY monoid: keeps whichever value arrives first; terminal as soon
    /// as one entry has been absorbed.
    pub fn any(t: Type) -> Result<Monoid> {
        let op = BinaryOp::builtin(BinaryOpcode::Any, t)?;
        Monoid::new(op, Scalar::UInt8(0), None)
    }

    // ------------------------------------------------------------------------
    // accessors
    // ------------------------------------------------------------------------

    /// The monoid's element type.
    #[inline]
    pub fn ztype(&self) -> Type {
        self.op.ztype
    }

    /// Identity, encoded in the monoid type.
    #[inline]
    pub fn identity_bytes(&self) -> &[u8] {
        &self.identity
    }

    /// Terminal value bytes, if the monoid has one.
    #[inline]
    pub fn terminal_bytes(&self) -> Option<&[u8]> {
        self.terminal.as_deref()
    }

    /// Whether an accumulated cell has reached the absorbing state and
    /// further folds cannot change it.
    #[inline]
    pub fn reached_terminal(&self, acc: &[u8]) -> bool {
        if self.op.opcode == BinaryOpcode::Any {
            // any value absorbs once one entry has been taken
            return true;
        }
        match &self.terminal {
            Some(t) => acc == &t[..],
            None => false,
        }
    }

    /// Fold `v` into the accumulator, in place.
    #[inline]
    pub(crate) fn fold(&self, acc: &mut [u8], v: &[u8]) {
        let mut z = vec![0u8; self.op.ztype.size()];
        self.op.apply(&mut z, acc, v);
        acc.copy_from_slice(&z);
    }
}

// ============================================================================
// SEMIRINGS
// ============================================================================

/// A semiring: additive monoid plus a multiplier whose output type equals
/// the monoid type.
///
/// # Examples
///
/// ```
/// use sparsering::{Semiring, Type, TypeCode};
///
/// let sr = Semiring::plus_times(Type::INT64).unwrap();
/// assert_eq!(sr.add.ztype().code(), TypeCode::Int64);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Semiring {
    pub add: Monoid,
    pub mult: BinaryOp,
}

impl Semiring {
    pub fn new(add: Monoid, mult: BinaryOp) -> Result<Semiring> {
        if add.ztype() != mult.ztype {
            return Err(Error::DomainMismatch {
                expected: add.ztype().code(),
                got: mult.ztype.code(),
            });
        }
        Ok(Semiring { add, mult })
    }

    /// The conventional arithmetic semiring.
    pub fn plus_times(t: Type) -> Result<Semiring> {
        Semiring::new(Monoid::plus(t)?, BinaryOp::builtin(BinaryOpcode::Times, t)?)
    }

    /// Tropical (shortest-path) semiring.
    pub fn min_plus(t: Type) -> Result<Semiring> {
        Semiring::new(Monoid::min(t)?, BinaryOp::builtin(BinaryOpcode::Plus, t)?)
    }

    /// Widest-path style semiring.
    pub fn max_times(t: Type) -> Result<Semiring> {
        Semiring::new(Monoid::max(t)?, BinaryOp::builtin(BinaryOpcode::Times, t)?)
    }

    /// Boolean reachability semiring.
    pub fn lor_land() -> Semiring {
        Semiring::new(
            Monoid::lor(),
            BinaryOp::builtin(BinaryOpcode::Land, Type::BOOL).unwrap(),
        )
        .unwrap()
    }

    /// Structural semiring: counts nothing, multiplies nothing, just
    /// propagates the pattern.
    pub fn any_pair(t: Type) -> Result<Semiring> {
        Semiring::new(Monoid::any(t)?, BinaryOp::builtin(BinaryOpcode::Pair, t)?)
    }
}
