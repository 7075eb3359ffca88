//! Operator descriptors: unary, binary, and index-unary.
//!
//! Opcodes are a closed sum over the built-ins plus one `User` arm that
//! carries a function pointer and explicit input/output types. The kernel
//! registry keys on built-in opcodes only; the `User` arm always routes
//! to the generic path.
//!
//! Two opcode rewrites run before any kernel lookup:
//!
//! - **Boolean renaming**: with boolean inputs many opcodes collapse
//!   (`DIV→FIRST`, `MIN/TIMES→LAND`, `MAX/PLUS→LOR`, ...), so a single
//!   boolean kernel serves many named operators.
//! - **flipxy**: computing `z = f(b, a)` instead of `z = f(a, b)` is done
//!   by rewriting the opcode (`FIRST↔SECOND`, `LT↔GT`, `DIV↔RDIV`, ...)
//!   rather than re-threading kernel inputs. Commutative opcodes are
//!   unchanged; user operators swap arguments at the call site instead.
//!
//! Integer arithmetic wraps; integer division by zero saturates (`0/0 = 0`,
//! positive/0 = MAX, negative/0 = MIN) so no operator can panic.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{Scalar, Type, TypeCode};

// ============================================================================
// OPCODES
// ============================================================================

/// Built-in unary opcodes plus the user arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOpcode {
    Identity,
    /// Additive inverse, `z = -x`.
    Ainv,
    /// Multiplicative inverse, `z = 1/x`.
    Minv,
    /// Logical not, `z = !(x != 0)`.
    Lnot,
    /// Constant one.
    One,
    Abs,
    User,
}

/// Built-in binary opcodes plus the user arm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOpcode {
    /// `z = x`; the y operand is pattern-only.
    First,
    /// `z = y`; the x operand is pattern-only.
    Second,
    /// Constant one; both operands are pattern-only.
    Pair,
    /// Either operand; this implementation returns `x`.
    Any,
    Plus,
    Minus,
    /// Reverse minus, `z = y - x`.
    Rminus,
    Times,
    Div,
    /// Reverse divide, `z = y / x`.
    Rdiv,
    Min,
    Max,
    Land,
    Lor,
    Lxor,
    /// Comparison; `ztype` is bool.
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    /// Comparison returning 0/1 in the operand type.
    Iseq,
    Isne,
    Islt,
    Isgt,
    Isle,
    Isge,
    User,
}

impl BinaryOpcode {
    /// True when `f(x, y) == f(y, x)` for all operands.
    pub fn is_commutative(self) -> bool {
        use BinaryOpcode::*;
        matches!(
            self,
            Pair | Any | Plus | Times | Min | Max | Land | Lor | Lxor | Eq | Ne | Iseq | Isne
        )
    }

    /// True when the opcode never reads its first operand's value.
    pub fn x_is_pattern(self) -> bool {
        matches!(self, BinaryOpcode::Second | BinaryOpcode::Pair)
    }

    /// True when the opcode never reads its second operand's value.
    pub fn y_is_pattern(self) -> bool {
        matches!(
            self,
            BinaryOpcode::First | BinaryOpcode::Pair | BinaryOpcode::Any
        )
    }

    /// True for the six comparisons whose result type is bool.
    pub fn is_comparison(self) -> bool {
        use BinaryOpcode::*;
        matches!(self, Eq | Ne | Lt | Gt | Le | Ge)
    }
}

/// Collapse an opcode applied to boolean operands onto its canonical
/// boolean form. Runs before kernel lookup so one boolean kernel serves
/// many named operators.
pub fn boolean_rename(op: BinaryOpcode) -> BinaryOpcode {
    use BinaryOpcode::*;
    match op {
        Div => First,
        Rdiv => Second,
        Min | Times => Land,
        Max | Plus => Lor,
        Ne | Isne | Rminus | Minus => Lxor,
        Iseq => Eq,
        Isgt => Gt,
        Islt => Lt,
        Isge => Ge,
        Isle => Le,
        other => other,
    }
}

/// Rewrite an opcode so that `flipped(x, y) == original(y, x)`.
///
/// Returns `None` when the swap cannot be expressed as an opcode rewrite
/// (the `User` arm); callers then swap the arguments themselves.
pub fn flip_opcode(op: BinaryOpcode) -> Option<BinaryOpcode> {
    use BinaryOpcode::*;
    match op {
        First => Some(Second),
        Second => Some(First),
        Gt => Some(Lt),
        Lt => Some(Gt),
        Ge => Some(Le),
        Le => Some(Ge),
        Isgt => Some(Islt),
        Islt => Some(Isgt),
        Isge => Some(Isle),
        Isle => Some(Isge),
        Div => Some(Rdiv),
        Rdiv => Some(Div),
        Minus => Some(Rminus),
        Rminus => Some(Minus),
        User => None,
        other => Some(other), // commutative, or Any/Pair where it cannot matter
    }
}

// ============================================================================
// BUILT-IN EVALUATION
// ============================================================================

macro_rules! signed_arith {
    ($op:expr, $a:expr, $b:expr, $t:ty) => {
        match $op {
            BinaryOpcode::Plus => $a.wrapping_add($b),
            BinaryOpcode::Minus => $a.wrapping_sub($b),
            BinaryOpcode::Rminus => $b.wrapping_sub($a),
            BinaryOpcode::Times => $a.wrapping_mul($b),
            BinaryOpcode::Div => {
                if $b == 0 {
                    if $a == 0 {
                        0
                    } else if $a < 0 {
                        <$t>::MIN
                    } else {
                        <$t>::MAX
                    }
                } else {
                    $a.wrapping_div($b)
                }
            }
            BinaryOpcode::Rdiv => {
                if $a == 0 {
                    if $b == 0 {
                        0
                    } else if $b < 0 {
                        <$t>::MIN
                    } else {
                        <$t>::MAX
                    }
                } else {
                    $b.wrapping_div($a)
                }
            }
            BinaryOpcode::Min => $a.min($b),
            BinaryOpcode::Max => $a.max($b),
            _ => unreachable!("non-arithmetic opcode in arithmetic dispatch"),
        }
    };
}

macro_rules! unsigned_arith {
    ($op:expr, $a:expr, $b:expr, $t:ty) => {
        match $op {
            BinaryOpcode::Plus => $a.wrapping_add($b),
            BinaryOpcode::Minus => $a.wrapping_sub($b),
            BinaryOpcode::Rminus => $b.wrapping_sub($a),
            BinaryOpcode::Times => $a.wrapping_mul($b),
            BinaryOpcode::Div => {
                if $b == 0 {
                    if $a == 0 {
                        0
                    } else {
                        <$t>::MAX
                    }
                } else {
                    $a / $b
                }
            }
            BinaryOpcode::Rdiv => {
                if $a == 0 {
                    if $b == 0 {
                        0
                    } else {
                        <$t>::MAX
                    }
                } else {
                    $b / $a
                }
            }
            BinaryOpcode::Min => $a.min($b),
            BinaryOpcode::Max => $a.max($b),
            _ => unreachable!("non-arithmetic opcode in arithmetic dispatch"),
        }
    };
}

macro_rules! float_arith {
    ($op:expr, $a:expr, $b:expr) => {
        match $op {
            BinaryOpcode::Plus => $a + $b,
            BinaryOpcode::Minus => $a - $b,
            BinaryOpcode::Rminus => $b - $a,
            BinaryOpcode::Times => $a * $b,
            BinaryOpcode::Div => $a / $b,
            BinaryOpcode::Rdiv => $b / $a,
            BinaryOpcode::Min => $a.min($b),
            BinaryOpcode::Max => $a.max($b),
            _ => unreachable!("non-arithmetic opcode in arithmetic dispatch"),
        }
    };
}

fn eval_arith(op: BinaryOpcode, x: Scalar, y: Scalar) -> Scalar {
    match (x, y) {
        (Scalar::Int8(a), Scalar::Int8(b)) => Scalar::Int8(signed_arith!(op, a, b, i8)),
        (Scalar::Int16(a), Scalar::Int16(b)) => Scalar::Int16(signed_arith!(op, a, b, i16)),
        (Scalar::Int32(a), Scalar::Int32(b)) => Scalar::Int32(signed_arith!(op, a, b, i32)),
        (Scalar::Int64(a), Scalar::Int64(b)) => Scalar::Int64(signed_arith!(op, a, b, i64)),
        (Scalar::UInt8(a), Scalar::UInt8(b)) => Scalar::UInt8(unsigned_arith!(op, a, b, u8)),
        (Scalar::UInt16(a), Scalar::UInt16(b)) => Scalar::UInt16(unsigned_arith!(op, a, b, u16)),
        (Scalar::UInt32(a), Scalar::UInt32(b)) => Scalar::UInt32(unsigned_arith!(op, a, b, u32)),
        (Scalar::UInt64(a), Scalar::UInt64(b)) => Scalar::UInt64(unsigned_arith!(op, a, b, u64)),
        (Scalar::Fp32(a), Scalar::Fp32(b)) => Scalar::Fp32(float_arith!(op, a, b)),
        (Scalar::Fp64(a), Scalar::Fp64(b)) => Scalar::Fp64(float_arith!(op, a, b)),
        _ => unreachable!("operands must share a non-bool type after casting"),
    }
}

fn eval_compare(op: BinaryOpcode, x: Scalar, y: Scalar) -> bool {
    macro_rules! cmp {
        ($a:expr, $b:expr) => {
            match op {
                BinaryOpcode::Eq | BinaryOpcode::Iseq => $a == $b,
                BinaryOpcode::Ne | BinaryOpcode::Isne => $a != $b,
                BinaryOpcode::Lt | BinaryOpcode::Islt => $a < $b,
                BinaryOpcode::Gt | BinaryOpcode::Isgt => $a > $b,
                BinaryOpcode::Le | BinaryOpcode::Isle => $a <= $b,
                BinaryOpcode::Ge | BinaryOpcode::Isge => $a >= $b,
                _ => unreachable!("non-comparison opcode in comparison dispatch"),
            }
        };
    }
    match (x, y) {
        (Scalar::Bool(a), Scalar::Bool(b)) => cmp!(a, b),
        (Scalar::Int8(a), Scalar::Int8(b)) => cmp!(a, b),
        (Scalar::Int16(a), Scalar::Int16(b)) => cmp!(a, b),
        (Scalar::Int32(a), Scalar::Int32(b)) => cmp!(a, b),
        (Scalar::Int64(a), Scalar::Int64(b)) => cmp!(a, b),
        (Scalar::UInt8(a), Scalar::UInt8(b)) => cmp!(a, b),
        (Scalar::UInt16(a), Scalar::UInt16(b)) => cmp!(a, b),
        (Scalar::UInt32(a), Scalar::UInt32(b)) => cmp!(a, b),
        (Scalar::UInt64(a), Scalar::UInt64(b)) => cmp!(a, b),
        (Scalar::Fp32(a), Scalar::Fp32(b)) => cmp!(a, b),
        (Scalar::Fp64(a), Scalar::Fp64(b)) => cmp!(a, b),
        _ => unreachable!("operands must share a type after casting"),
    }
}

/// Evaluate a built-in binary opcode on two operands of the same code.
///
/// The result stays in the operand domain except for the six
/// bool-returning comparisons; the caller casts to the operator's ztype.
pub(crate) fn eval_binary(op: BinaryOpcode, x: Scalar, y: Scalar) -> Scalar {
    use BinaryOpcode::*;
    let op = if x.code() == TypeCode::Bool {
        boolean_rename(op)
    } else {
        op
    };
    match op {
        First => x,
        Second => y,
        Pair => Scalar::UInt8(1).cast(x.code()),
        Any => x,
        Land => Scalar::Bool(x.as_bool() && y.as_bool()).cast(x.code()),
        Lor => Scalar::Bool(x.as_bool() || y.as_bool()).cast(x.code()),
        Lxor => Scalar::Bool(x.as_bool() != y.as_bool()).cast(x.code()),
        Eq | Ne | Lt | Gt | Le | Ge => Scalar::Bool(eval_compare(op, x, y)),
        Iseq | Isne | Islt | Isgt | Isle | Isge => {
            Scalar::Bool(eval_compare(op, x, y)).cast(x.code())
        }
        Plus | Minus | Rminus | Times | Div | Rdiv | Min | Max => eval_arith(op, x, y),
        User => unreachable!("user opcode in builtin evaluation"),
    }
}

/// Evaluate a built-in unary opcode.
pub(crate) fn eval_unary(op: UnaryOpcode, x: Scalar) -> Scalar {
    match op {
        UnaryOpcode::Identity => x,
        UnaryOpcode::Lnot => Scalar::Bool(!x.as_bool()).cast(x.code()),
        UnaryOpcode::One => Scalar::UInt8(1).cast(x.code()),
        UnaryOpcode::Ainv => match x {
            Scalar::Bool(v) => Scalar::Bool(v),
            Scalar::Int8(v) => Scalar::Int8(v.wrapping_neg()),
            Scalar::Int16(v) => Scalar::Int16(v.wrapping_neg()),
            Scalar::Int32(v) => Scalar::Int32(v.wrapping_neg()),
            Scalar::Int64(v) => Scalar::Int64(v.wrapping_neg()),
            Scalar::UInt8(v) => Scalar::UInt8(v.wrapping_neg()),
            Scalar::UInt16(v) => Scalar::UInt16(v.wrapping_neg()),
            Scalar::UInt32(v) => Scalar::UInt32(v.wrapping_neg()),
            Scalar::UInt64(v) => Scalar::UInt64(v.wrapping_neg()),
            Scalar::Fp32(v) => Scalar::Fp32(-v),
            Scalar::Fp64(v) => Scalar::Fp64(-v),
        },
        UnaryOpcode::Minv => {
            let one = Scalar::UInt8(1).cast(x.code());
            eval_binary(BinaryOpcode::Div, one, x)
        }
        UnaryOpcode::Abs => match x {
            Scalar::Bool(v) => Scalar::Bool(v),
            Scalar::Int8(v) => Scalar::Int8(v.wrapping_abs()),
            Scalar::Int16(v) => Scalar::Int16(v.wrapping_abs()),
            Scalar::Int32(v) => Scalar::Int32(v.wrapping_abs()),
            Scalar::Int64(v) => Scalar::Int64(v.wrapping_abs()),
            u @ (Scalar::UInt8(_)
            | Scalar::UInt16(_)
            | Scalar::UInt32(_)
            | Scalar::UInt64(_)) => u,
            Scalar::Fp32(v) => Scalar::Fp32(v.abs()),
            Scalar::Fp64(v) => Scalar::Fp64(v.abs()),
        },
        UnaryOpcode::User => unreachable!("user opcode in builtin evaluation"),
    }
}

// ============================================================================
// OPERATOR DESCRIPTORS
// ============================================================================

/// Signature of a user binary function: `z <- f(x, y)` over raw element
/// bytes of the declared types.
pub type UserBinaryFn = dyn Fn(&mut [u8], &[u8], &[u8]) + Send + Sync;

/// Signature of a user unary function: `z <- f(x)`.
pub type UserUnaryFn = dyn Fn(&mut [u8], &[u8]) + Send + Sync;

/// Signature of a user index-unary function: `z <- f(x, i, j, thunk)`.
pub type UserIndexFn = dyn Fn(&mut [u8], &[u8], usize, usize, &[u8]) + Send + Sync;

/// A binary operator descriptor, immutable once constructed.
#[derive(Clone)]
pub struct BinaryOp {
    pub opcode: BinaryOpcode,
    pub ztype: Type,
    pub xtype: Type,
    pub ytype: Type,
    func: Option<Arc<UserBinaryFn>>,
    name: String,
}

impl fmt::Debug for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryOp")
            .field("opcode", &self.opcode)
            .field("name", &self.name)
            .field("ztype", &self.ztype.code())
            .finish()
    }
}

impl PartialEq for BinaryOp {
    fn eq(&self, other: &Self) -> bool {
        self.opcode == other.opcode
            && self.ztype == other.ztype
            && self.xtype == other.xtype
            && self.ytype == other.ytype
            && match (&self.func, &other.func) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
    }
}

impl BinaryOp {
    /// A built-in operator instantiated on one operand type.
    ///
    /// Comparisons get a bool ztype; everything else stays in `t`.
    ///
    /// # Examples
    ///
    /// ```
    /// use sparsering::{BinaryOp, BinaryOpcode, Type, TypeCode};
    ///
    /// let lt = BinaryOp::builtin(BinaryOpcode::Lt, Type::INT32).unwrap();
    /// assert_eq!(lt.ztype.code(), TypeCode::Bool);
    /// assert_eq!(lt.xtype.code(), TypeCode::Int32);
    /// ```
    pub fn builtin(opcode: BinaryOpcode, t: Type) -> Result<BinaryOp> {
        if opcode == BinaryOpcode::User {
            return Err(Error::InvalidValue {
                what: "User opcode requires BinaryOp::user".into(),
            });
        }
        if !t.is_builtin() {
            return Err(Error::DomainMismatch {
                expected: TypeCode::Fp64,
                got: t.code(),
            });
        }
        let ztype = if opcode.is_comparison() { Type::BOOL } else { t };
        Ok(BinaryOp {
            opcode,
            ztype,
            xtype: t,
            ytype: t,
            func: None,
            name: format!("{:?}", opcode).to_lowercase(),
        })
    }

    /// A user-defined operator carrying its own function.
    pub fn user(
        f: Arc<UserBinaryFn>,
        ztype: Type,
        xtype: Type,
        ytype: Type,
        name: &str,
    ) -> BinaryOp {
        BinaryOp {
            opcode: BinaryOpcode::User,
            ztype,
            xtype,
            ytype,
            func: Some(f),
            name: name.to_string(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_builtin(&self) -> bool {
        self.opcode != BinaryOpcode::User
    }

    /// Apply the operator to raw operand bytes, writing the result.
    ///
    /// Operands must already be in `xtype` / `ytype`; the result lands in
    /// `ztype`. This is the generic (function-pointer) path; fused
    /// kernels from the registry bypass it.
    pub fn apply(&self, z: &mut [u8], x: &[u8], y: &[u8]) {
        match &self.func {
            Some(f) => f(z, x, y),
            None => {
                let xs = Scalar::read(self.xtype.code(), x);
                let ys = Scalar::read(self.ytype.code(), y).cast(self.xtype.code());
                eval_binary(self.opcode, xs, ys)
                    .cast(self.ztype.code())
                    .write(z);
            }
        }
    }

    /// Apply on dynamic scalars (element-level API and accumulators).
    pub(crate) fn apply_scalar(&self, x: Scalar, y: Scalar) -> Scalar {
        let xs = x.cast(self.xtype.code());
        let ys = y.cast(self.xtype.code());
        eval_binary(self.opcode, xs, ys).cast(self.ztype.code())
    }
}

/// A unary operator descriptor.
#[derive(Clone)]
pub struct UnaryOp {
    pub opcode: UnaryOpcode,
    pub ztype: Type,
    pub xtype: Type,
    func: Option<Arc<UserUnaryFn>>,
    name: String,
}

impl fmt::Debug for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnaryOp")
            .field("opcode", &self.opcode)
            .field("name", &self.name)
            .finish()
    }
}

impl UnaryOp {
    pub fn builtin(opcode: UnaryOpcode, t: Type) -> Result<UnaryOp> {
        if opcode == UnaryOpcode::User {
            return Err(Error::InvalidValue {
                what: "User opcode requires UnaryOp::user".into(),
            });
        }
        if !t.is_builtin() {
            return Err(Error::DomainMismatch {
                expected: TypeCode::Fp64,
                got: t.code(),
            });
        }
        Ok(UnaryOp {
            opcode,
            ztype: t,
            xtype: t,
            func: None,
            name: format!("{:?}", opcode).to_lowercase(),
        })
    }

    pub fn user(f: Arc<UserUnaryFn>, ztype: Type, xtype: Type, name: &str) -> UnaryOp {
        UnaryOp {
            opcode: UnaryOpcode::User,
            ztype,
            xtype,
            func: Some(f),
            name: name.to_string(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the operator passes values through unchanged, so apply
    /// can go shallow if no cast is needed.
    #[inline]
    pub fn is_identity_shape(&self) -> bool {
        self.opcode == UnaryOpcode::Identity
    }

    pub fn apply(&self, z: &mut [u8], x: &[u8]) {
        match &self.func {
            Some(f) => f(z, x),
            None => {
                let xs = Scalar::read(self.xtype.code(), x);
                eval_unary(self.opcode, xs).cast(self.ztype.code()).write(z);
            }
        }
    }
}

// ============================================================================
// INDEX-UNARY AND SELECT
// ============================================================================

/// Index-unary opcodes: positional producers and select predicates.
///
/// `z = f(x, i, j, thunk)` where `thunk` is a scalar bound at call time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexUnaryOpcode {
    /// `z = i + thunk` (i64).
    RowIndex,
    /// `z = j + thunk` (i64).
    ColIndex,
    /// `z = j - i + thunk` (i64).
    DiagIndex,
    /// Keep `j - i <= thunk` (lower triangle).
    Tril,
    /// Keep `j - i >= thunk` (upper triangle).
    Triu,
    /// Keep `j - i == thunk`.
    Diag,
    /// Keep `j - i != thunk`.
    Offdiag,
    /// Keep `i <= thunk`.
    RowLe,
    /// Keep `i > thunk`.
    RowGt,
    /// Keep `j <= thunk`.
    ColLe,
    /// Keep `j > thunk`.
    ColGt,
    ValueEq,
    ValueNe,
    ValueLt,
    ValueLe,
    ValueGt,
    ValueGe,
    /// Keep `x != 0`; ignores the thunk.
    Nonzero,
    User,
}

impl IndexUnaryOpcode {
    /// True when the predicate depends only on `(i, j)`, so values need
    /// not be fetched.
    pub fn is_positional(self) -> bool {
        use IndexUnaryOpcode::*;
        matches!(
            self,
            RowIndex | ColIndex | DiagIndex | Tril | Triu | Diag | Offdiag | RowLe | RowGt
                | ColLe | ColGt
        )
    }
}

/// An index-unary operator descriptor; also the select-operator form.
#[derive(Clone)]
pub struct IndexUnaryOp {
    pub opcode: IndexUnaryOpcode,
    pub ztype: Type,
    pub xtype: Type,
    /// Type of the bound thunk scalar.
    pub ttype: Type,
    func: Option<Arc<UserIndexFn>>,
    name: String,
}

impl fmt::Debug for IndexUnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexUnaryOp")
            .field("opcode", &self.opcode)
            .field("name", &self.name)
            .finish()
    }
}

impl IndexUnaryOp {
    /// A built-in index-unary on value type `t`.
    ///
    /// Positional opcodes take an i64 thunk and produce i64 (or bool for
    /// predicates); value predicates compare in `t` and produce bool.
    pub fn builtin(opcode: IndexUnaryOpcode, t: Type) -> Result<IndexUnaryOp> {
        use IndexUnaryOpcode::*;
        if opcode == User {
            return Err(Error::InvalidValue {
                what: "User opcode requires IndexUnaryOp::user".into(),
            });
        }
        let (ztype, ttype) = match opcode {
            RowIndex | ColIndex | DiagIndex => (Type::INT64, Type::INT64),
            Tril | Triu | Diag | Offdiag | RowLe | RowGt | ColLe | ColGt => {
                (Type::BOOL, Type::INT64)
            }
            ValueEq | ValueNe | ValueLt | ValueLe | ValueGt | ValueGe => (Type::BOOL, t),
            Nonzero => (Type::BOOL, t),
            User => unreachable!(),
        };
        Ok(IndexUnaryOp {
            opcode,
            ztype,
            xtype: t,
            ttype,
            func: None,
            name: format!("{:?}", opcode).to_lowercase(),
        })
    }

    pub fn user(
        f: Arc<UserIndexFn>,
        ztype: Type,
        xtype: Type,
        ttype: Type,
        name: &str,
    ) -> IndexUnaryOp {
        IndexUnaryOp {
            opcode: IndexUnaryOpcode::User,
            ztype,
            xtype,
            ttype,
            func: Some(f),
            name: name.to_string(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate at entry `(i, j)` with value bytes `x` and thunk bytes.
    ///
    /// `i` is the row index and `j` the column index regardless of the
    /// matrix orientation; callers map stored coordinates first.
    pub fn apply(&self, z: &mut [u8], x: &[u8], i: usize, j: usize, thunk: &[u8]) {
        use IndexUnaryOpcode::*;
        if let Some(f) = &self.func {
            f(z, x, i, j, thunk);
            return;
        }
        let it = || Scalar::read(TypeCode::Int64, thunk).as_i64();
        let out = match self.opcode {
            RowIndex => Scalar::Int64(i as i64 + it()),
            ColIndex => Scalar::Int64(j as i64 + it()),
            DiagIndex => Scalar::Int64(j as i64 - i as i64 + it()),
            Tril => Scalar::Bool(j as i64 - (i as i64) <= it()),
            Triu => Scalar::Bool(j as i64 - (i as i64) >= it()),
            Diag => Scalar::Bool(j as i64 - (i as i64) == it()),
            Offdiag => Scalar::Bool(j as i64 - (i as i64) != it()),
            RowLe => Scalar::Bool(i as i64 <= it()),
            RowGt => Scalar::Bool(i as i64 > it()),
            ColLe => Scalar::Bool(j as i64 <= it()),
            ColGt => Scalar::Bool(j as i64 > it()),
            ValueEq | ValueNe | ValueLt | ValueLe | ValueGt | ValueGe => {
                let xs = Scalar::read(self.xtype.code(), x);
                let ts = Scalar::read(self.ttype.code(), thunk).cast(self.xtype.code());
                let cmp = match self.opcode {
                    ValueEq => BinaryOpcode::Eq,
                    ValueNe => BinaryOpcode::Ne,
                    ValueLt => BinaryOpcode::Lt,
                    ValueLe => BinaryOpcode::Le,
                    ValueGt => BinaryOpcode::Gt,
                    _ => BinaryOpcode::Ge,
                };
                Scalar::Bool(eval_compare(cmp, xs, ts))
            }
            Nonzero => Scalar::Bool(Scalar::read(self.xtype.code(), x).as_bool()),
            User => unreachable!(),
        };
        out.cast(self.ztype.code()).write(z);
    }

    /// Evaluate as a keep/drop predicate for select.
    pub(crate) fn test(&self, x: &[u8], i: usize, j: usize, thunk: &[u8]) -> bool {
        let mut z = vec![0u8; self.ztype.size()];
        self.apply(&mut z, x, i, j, thunk);
        Scalar::read(self.ztype.code(), &z).as_bool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_rename_table() {
        use BinaryOpcode::*;
        assert_eq!(boolean_rename(Div), First);
        assert_eq!(boolean_rename(Rdiv), Second);
        assert_eq!(boolean_rename(Min), Land);
        assert_eq!(boolean_rename(Times), Land);
        assert_eq!(boolean_rename(Max), Lor);
        assert_eq!(boolean_rename(Plus), Lor);
        assert_eq!(boolean_rename(Minus), Lxor);
        assert_eq!(boolean_rename(Rminus), Lxor);
        assert_eq!(boolean_rename(Ne), Lxor);
        assert_eq!(boolean_rename(Isne), Lxor);
        assert_eq!(boolean_rename(Iseq), Eq);
        assert_eq!(boolean_rename(Isgt), Gt);
        assert_eq!(boolean_rename(Isle), Le);
        assert_eq!(boolean_rename(Lor), Lor);
    }

    #[test]
    fn test_flip_is_involutive_on_flippables() {
        use BinaryOpcode::*;
        for op in [
            First, Second, Gt, Lt, Ge, Le, Isgt, Islt, Isge, Isle, Div, Rdiv, Minus, Rminus,
        ] {
            let flipped = flip_opcode(op).unwrap();
            assert_eq!(flip_opcode(flipped), Some(op));
        }
        assert_eq!(flip_opcode(Plus), Some(Plus));
        assert_eq!(flip_opcode(User), None);
    }

    #[test]
    fn test_flip_matches_swapped_arguments() {
        use BinaryOpcode::*;
        let x = Scalar::Int32(7);
        let y = Scalar::Int32(3);
        for op in [Minus, Div, Lt, Ge, First, Islt] {
            let flipped = flip_opcode(op).unwrap();
            assert_eq!(eval_binary(flipped, x, y), eval_binary(op, y, x));
        }
    }

    #[test]
    fn test_integer_division_by_zero_saturates() {
        assert_eq!(
            eval_binary(BinaryOpcode::Div, Scalar::Int32(5), Scalar::Int32(0)),
            Scalar::Int32(i32::MAX)
        );
        assert_eq!(
            eval_binary(BinaryOpcode::Div, Scalar::Int32(-5), Scalar::Int32(0)),
            Scalar::Int32(i32::MIN)
        );
        assert_eq!(
            eval_binary(BinaryOpcode::Div, Scalar::Int32(0), Scalar::Int32(0)),
            Scalar::Int32(0)
        );
        assert_eq!(
            eval_binary(BinaryOpcode::Div, Scalar::UInt8(9), Scalar::UInt8(0)),
            Scalar::UInt8(u8::MAX)
        );
    }

    #[test]
    fn test_comparison_ops_return_bool() {
        let lt = BinaryOp::builtin(BinaryOpcode::Lt, Type::FP64).unwrap();
        assert_eq!(lt.ztype, Type::BOOL);
        let mut z = [0u8; 1];
        lt.apply(&mut z, &1.0f64.to_le_bytes(), &2.0f64.to_le_bytes());
        assert_eq!(z[0], 1);
    }

    #[test]
    fn test_is_ops_return_operand_type() {
        let iseq = BinaryOp::builtin(BinaryOpcode::Iseq, Type::INT32).unwrap();
        assert_eq!(iseq.ztype, Type::INT32);
        let mut z = [0u8; 4];
        iseq.apply(&mut z, &3i32.to_le_bytes(), &3i32.to_le_bytes());
        assert_eq!(i32::from_le_bytes(z), 1);
    }

    #[test]
    fn test_user_binary_op_applies_function() {
        let f: Arc<UserBinaryFn> = Arc::new(|z, x, y| {
            let xv = i64::from_le_bytes(x.try_into().unwrap());
            let yv = i64::from_le_bytes(y.try_into().unwrap());
            z.copy_from_slice(&(xv * 10 + yv).to_le_bytes());
        });
        let op = BinaryOp::user(f, Type::INT64, Type::INT64, Type::INT64, "decimal_shift");
        let mut z = [0u8; 8];
        op.apply(&mut z, &4i64.to_le_bytes(), &2i64.to_le_bytes());
        assert_eq!(i64::from_le_bytes(z), 42);
        assert_eq!(op.name(), "decimal_shift");
    }

    #[test]
    fn test_unary_ops() {
        assert_eq!(
            eval_unary(UnaryOpcode::Ainv, Scalar::Int32(4)),
            Scalar::Int32(-4)
        );
        assert_eq!(
            eval_unary(UnaryOpcode::Minv, Scalar::Fp64(4.0)),
            Scalar::Fp64(0.25)
        );
        assert_eq!(
            eval_unary(UnaryOpcode::Lnot, Scalar::UInt8(3)),
            Scalar::UInt8(0)
        );
        assert_eq!(
            eval_unary(UnaryOpcode::One, Scalar::Fp32(9.0)),
            Scalar::Fp32(1.0)
        );
        assert_eq!(
            eval_unary(UnaryOpcode::Abs, Scalar::Int16(-7)),
            Scalar::Int16(7)
        );
    }

    #[test]
    fn test_index_unary_predicates() {
        let tril = IndexUnaryOp::builtin(IndexUnaryOpcode::Tril, Type::FP64).unwrap();
        let thunk = 0i64.to_le_bytes();
        // on or below the diagonal
        assert!(tril.test(&[0; 8], 2, 2, &thunk));
        assert!(tril.test(&[0; 8], 3, 1, &thunk));
        assert!(!tril.test(&[0; 8], 1, 3, &thunk));

        let vgt = IndexUnaryOp::builtin(IndexUnaryOpcode::ValueGt, Type::INT32).unwrap();
        let t = 5i32.to_le_bytes();
        assert!(vgt.test(&9i32.to_le_bytes(), 0, 0, &t));
        assert!(!vgt.test(&5i32.to_le_bytes(), 0, 0, &t));
    }

    #[test]
    fn test_pattern_flags() {
        assert!(BinaryOpcode::Second.x_is_pattern());
        assert!(BinaryOpcode::Pair.x_is_pattern());
        assert!(BinaryOpcode::Pair.y_is_pattern());
        assert!(BinaryOpcode::First.y_is_pattern());
        assert!(!BinaryOpcode::Times.x_is_pattern());
    }
}
