//! The kernel registry: pre-specialized semiring inner loops.
//!
//! The registry maps `(⊕-opcode, ⊗-opcode, element code)` to a fused
//! multiply-add compiled for that exact combination, so the hot loops of
//! the multiply engines pay one direct call per flop. When the semiring
//! or the operand types fall outside the table — user operators, user
//! types, mixed types needing casts — the registry declines and the
//! **generic path** runs the same outer structure through function
//! pointers with per-operand casting.
//!
//! Two rewrites happen before lookup:
//!
//! - boolean renaming collapses redundant opcodes when the multiplier
//!   inputs (and separately the monoid) are boolean;
//! - `flipxy` is absorbed by rewriting the multiply opcode, so kernels
//!   never re-thread their inputs. User multiplies swap arguments in the
//!   generic path instead.
//!
//! The decline signal is internal; callers of [`build_kernel`] always
//! get a working kernel back.

use crate::algebra::{type_max, type_min, Monoid, Semiring};
use crate::config::burble;
use crate::error::{Error, Result};
use crate::ops::{boolean_rename, flip_opcode, BinaryOp, BinaryOpcode};
use crate::types::{cast_bytes, Element, Scalar, Type, TypeCode};

// ============================================================================
// OP SPECS
// ============================================================================

/// A multiply specialized for one element type.
pub(crate) trait MulSpec<T>: Send + Sync {
    fn mul(a: T, b: T) -> T;
}

/// A monoid fold specialized for one element type.
pub(crate) trait AddSpec<T>: Send + Sync {
    fn fold(acc: T, z: T) -> T;
}

pub(crate) struct MTimes;
pub(crate) struct MPlus;
pub(crate) struct MMin;
pub(crate) struct MMax;
pub(crate) struct MFirst;
pub(crate) struct MSecond;
pub(crate) struct MPair;
pub(crate) struct MLand;
pub(crate) struct MLor;
pub(crate) struct MLxor;
pub(crate) struct MEq;

pub(crate) struct APlus;
pub(crate) struct ATimes;
pub(crate) struct AMin;
pub(crate) struct AMax;
pub(crate) struct AAny;
pub(crate) struct ALor;
pub(crate) struct ALand;
pub(crate) struct ALxor;
pub(crate) struct AEq;

macro_rules! impl_int_specs {
    ($($t:ty),*) => {$(
        impl MulSpec<$t> for MTimes {
            #[inline(always)]
            fn mul(a: $t, b: $t) -> $t { a.wrapping_mul(b) }
        }
        impl MulSpec<$t> for MPlus {
            #[inline(always)]
            fn mul(a: $t, b: $t) -> $t { a.wrapping_add(b) }
        }
        impl MulSpec<$t> for MMin {
            #[inline(always)]
            fn mul(a: $t, b: $t) -> $t { a.min(b) }
        }
        impl MulSpec<$t> for MMax {
            #[inline(always)]
            fn mul(a: $t, b: $t) -> $t { a.max(b) }
        }
        impl AddSpec<$t> for APlus {
            #[inline(always)]
            fn fold(acc: $t, z: $t) -> $t { acc.wrapping_add(z) }
        }
        impl AddSpec<$t> for ATimes {
            #[inline(always)]
            fn fold(acc: $t, z: $t) -> $t { acc.wrapping_mul(z) }
        }
        impl AddSpec<$t> for AMin {
            #[inline(always)]
            fn fold(acc: $t, z: $t) -> $t { acc.min(z) }
        }
        impl AddSpec<$t> for AMax {
            #[inline(always)]
            fn fold(acc: $t, z: $t) -> $t { acc.max(z) }
        }
    )*};
}

macro_rules! impl_float_specs {
    ($($t:ty),*) => {$(
        impl MulSpec<$t> for MTimes {
            #[inline(always)]
            fn mul(a: $t, b: $t) -> $t { a * b }
        }
        impl MulSpec<$t> for MPlus {
            #[inline(always)]
            fn mul(a: $t, b: $t) -> $t { a + b }
        }
        impl MulSpec<$t> for MMin {
            #[inline(always)]
            fn mul(a: $t, b: $t) -> $t { a.min(b) }
        }
        impl MulSpec<$t> for MMax {
            #[inline(always)]
            fn mul(a: $t, b: $t) -> $t { a.max(b) }
        }
        impl AddSpec<$t> for APlus {
            #[inline(always)]
            fn fold(acc: $t, z: $t) -> $t { acc + z }
        }
        impl AddSpec<$t> for ATimes {
            #[inline(always)]
            fn fold(acc: $t, z: $t) -> $t { acc * z }
        }
        impl AddSpec<$t> for AMin {
            #[inline(always)]
            fn fold(acc: $t, z: $t) -> $t { acc.min(z) }
        }
        impl AddSpec<$t> for AMax {
            #[inline(always)]
            fn fold(acc: $t, z: $t) -> $t { acc.max(z) }
        }
    )*};
}

macro_rules! impl_common_specs {
    ($($t:ty),*) => {$(
        impl MulSpec<$t> for MFirst {
            #[inline(always)]
            fn mul(a: $t, _b: $t) -> $t { a }
        }
        impl MulSpec<$t> for MSecond {
            #[inline(always)]
            fn mul(_a: $t, b: $t) -> $t { b }
        }
        impl AddSpec<$t> for AAny {
            #[inline(always)]
            fn fold(acc: $t, _z: $t) -> $t { acc }
        }
    )*};
}

macro_rules! impl_pair_numeric {
    ($($t:ty),*) => {$(
        impl MulSpec<$t> for MPair {
            #[inline(always)]
            fn mul(_a: $t, _b: $t) -> $t { 1 as $t }
        }
    )*};
}

impl_int_specs!(i8, i16, i32, i64, u8, u16, u32, u64);
impl_float_specs!(f32, f64);
impl_common_specs!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64, bool);
impl_pair_numeric!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl MulSpec<bool> for MPair {
    #[inline(always)]
    fn mul(_a: bool, _b: bool) -> bool {
        true
    }
}
impl MulSpec<bool> for MLand {
    #[inline(always)]
    fn mul(a: bool, b: bool) -> bool {
        a && b
    }
}
impl MulSpec<bool> for MLor {
    #[inline(always)]
    fn mul(a: bool, b: bool) -> bool {
        a || b
    }
}
impl MulSpec<bool> for MLxor {
    #[inline(always)]
    fn mul(a: bool, b: bool) -> bool {
        a != b
    }
}
impl MulSpec<bool> for MEq {
    #[inline(always)]
    fn mul(a: bool, b: bool) -> bool {
        a == b
    }
}
impl AddSpec<bool> for ALor {
    #[inline(always)]
    fn fold(acc: bool, z: bool) -> bool {
        acc || z
    }
}
impl AddSpec<bool> for ALand {
    #[inline(always)]
    fn fold(acc: bool, z: bool) -> bool {
        acc && z
    }
}
impl AddSpec<bool> for ALxor {
    #[inline(always)]
    fn fold(acc: bool, z: bool) -> bool {
        acc != z
    }
}
impl AddSpec<bool> for AEq {
    #[inline(always)]
    fn fold(acc: bool, z: bool) -> bool {
        acc == z
    }
}

// ============================================================================
// FUSED KERNELS
// ============================================================================

/// `z <- a ⊗ b`, fully typed.
pub(crate) type FusedMult = fn(&mut [u8], &[u8], &[u8]);

/// `acc <- acc ⊕ (a ⊗ b)`, fully typed.
pub(crate) type FusedMultAdd = fn(&mut [u8], &[u8], &[u8]);

fn fused_mult<T: Element, M: MulSpec<T>>(z: &mut [u8], a: &[u8], b: &[u8]) {
    M::mul(T::decode(a), T::decode(b)).encode(z);
}

fn fused_multadd<T: Element, A: AddSpec<T>, M: MulSpec<T>>(acc: &mut [u8], a: &[u8], b: &[u8]) {
    let z = M::mul(T::decode(a), T::decode(b));
    A::fold(T::decode(acc), z).encode(acc);
}

/// Look up the fused pair for `(⊕, ⊗, code)`. `None` means "declined;
/// take the generic path".
fn lookup(add: BinaryOpcode, mult: BinaryOpcode, code: TypeCode) -> Option<(FusedMultAdd, FusedMult)> {
    use BinaryOpcode::*;
    macro_rules! numeric_table {
        ($t:ty) => {
            match (add, mult) {
                (Plus, Times) => Some((
                    fused_multadd::<$t, APlus, MTimes>,
                    fused_mult::<$t, MTimes>,
                )),
                (Plus, Plus) => Some((fused_multadd::<$t, APlus, MPlus>, fused_mult::<$t, MPlus>)),
                (Plus, Min) => Some((fused_multadd::<$t, APlus, MMin>, fused_mult::<$t, MMin>)),
                (Plus, Max) => Some((fused_multadd::<$t, APlus, MMax>, fused_mult::<$t, MMax>)),
                (Plus, First) => Some((
                    fused_multadd::<$t, APlus, MFirst>,
                    fused_mult::<$t, MFirst>,
                )),
                (Plus, Second) => Some((
                    fused_multadd::<$t, APlus, MSecond>,
                    fused_mult::<$t, MSecond>,
                )),
                (Plus, Pair) => Some((fused_multadd::<$t, APlus, MPair>, fused_mult::<$t, MPair>)),
                (Times, Times) => Some((
                    fused_multadd::<$t, ATimes, MTimes>,
                    fused_mult::<$t, MTimes>,
                )),
                (Times, Plus) => Some((
                    fused_multadd::<$t, ATimes, MPlus>,
                    fused_mult::<$t, MPlus>,
                )),
                (Times, First) => Some((
                    fused_multadd::<$t, ATimes, MFirst>,
                    fused_mult::<$t, MFirst>,
                )),
                (Times, Second) => Some((
                    fused_multadd::<$t, ATimes, MSecond>,
                    fused_mult::<$t, MSecond>,
                )),
                (Min, Times) => Some((fused_multadd::<$t, AMin, MTimes>, fused_mult::<$t, MTimes>)),
                (Min, Plus) => Some((fused_multadd::<$t, AMin, MPlus>, fused_mult::<$t, MPlus>)),
                (Min, Min) => Some((fused_multadd::<$t, AMin, MMin>, fused_mult::<$t, MMin>)),
                (Min, Max) => Some((fused_multadd::<$t, AMin, MMax>, fused_mult::<$t, MMax>)),
                (Min, First) => Some((fused_multadd::<$t, AMin, MFirst>, fused_mult::<$t, MFirst>)),
                (Min, Second) => Some((
                    fused_multadd::<$t, AMin, MSecond>,
                    fused_mult::<$t, MSecond>,
                )),
                (Max, Times) => Some((fused_multadd::<$t, AMax, MTimes>, fused_mult::<$t, MTimes>)),
                (Max, Plus) => Some((fused_multadd::<$t, AMax, MPlus>, fused_mult::<$t, MPlus>)),
                (Max, Min) => Some((fused_multadd::<$t, AMax, MMin>, fused_mult::<$t, MMin>)),
                (Max, Max) => Some((fused_multadd::<$t, AMax, MMax>, fused_mult::<$t, MMax>)),
                (Max, First) => Some((fused_multadd::<$t, AMax, MFirst>, fused_mult::<$t, MFirst>)),
                (Max, Second) => Some((
                    fused_multadd::<$t, AMax, MSecond>,
                    fused_mult::<$t, MSecond>,
                )),
                (Any, Times) => Some((fused_multadd::<$t, AAny, MTimes>, fused_mult::<$t, MTimes>)),
                (Any, Plus) => Some((fused_multadd::<$t, AAny, MPlus>, fused_mult::<$t, MPlus>)),
                (Any, First) => Some((fused_multadd::<$t, AAny, MFirst>, fused_mult::<$t, MFirst>)),
                (Any, Second) => Some((
                    fused_multadd::<$t, AAny, MSecond>,
                    fused_mult::<$t, MSecond>,
                )),
                (Any, Pair) => Some((fused_multadd::<$t, AAny, MPair>, fused_mult::<$t, MPair>)),
                _ => None,
            }
        };
    }
    macro_rules! bool_table {
        () => {
            match (add, mult) {
                (Lor, Land) => Some((
                    fused_multadd::<bool, ALor, MLand>,
                    fused_mult::<bool, MLand>,
                )),
                (Lor, Lor) => Some((fused_multadd::<bool, ALor, MLor>, fused_mult::<bool, MLor>)),
                (Lor, Lxor) => Some((
                    fused_multadd::<bool, ALor, MLxor>,
                    fused_mult::<bool, MLxor>,
                )),
                (Lor, Eq) => Some((fused_multadd::<bool, ALor, MEq>, fused_mult::<bool, MEq>)),
                (Lor, First) => Some((
                    fused_multadd::<bool, ALor, MFirst>,
                    fused_mult::<bool, MFirst>,
                )),
                (Lor, Second) => Some((
                    fused_multadd::<bool, ALor, MSecond>,
                    fused_mult::<bool, MSecond>,
                )),
                (Lor, Pair) => Some((
                    fused_multadd::<bool, ALor, MPair>,
                    fused_mult::<bool, MPair>,
                )),
                (Land, Lor) => Some((
                    fused_multadd::<bool, ALand, MLor>,
                    fused_mult::<bool, MLor>,
                )),
                (Land, Land) => Some((
                    fused_multadd::<bool, ALand, MLand>,
                    fused_mult::<bool, MLand>,
                )),
                (Land, Lxor) => Some((
                    fused_multadd::<bool, ALand, MLxor>,
                    fused_mult::<bool, MLxor>,
                )),
                (Land, Eq) => Some((fused_multadd::<bool, ALand, MEq>, fused_mult::<bool, MEq>)),
                (Land, First) => Some((
                    fused_multadd::<bool, ALand, MFirst>,
                    fused_mult::<bool, MFirst>,
                )),
                (Land, Second) => Some((
                    fused_multadd::<bool, ALand, MSecond>,
                    fused_mult::<bool, MSecond>,
                )),
                (Land, Pair) => Some((
                    fused_multadd::<bool, ALand, MPair>,
                    fused_mult::<bool, MPair>,
                )),
                (Lxor, Land) => Some((
                    fused_multadd::<bool, ALxor, MLand>,
                    fused_mult::<bool, MLand>,
                )),
                (Lxor, Lor) => Some((
                    fused_multadd::<bool, ALxor, MLor>,
                    fused_mult::<bool, MLor>,
                )),
                (Lxor, Pair) => Some((
                    fused_multadd::<bool, ALxor, MPair>,
                    fused_mult::<bool, MPair>,
                )),
                (Eq, Land) => Some((
                    fused_multadd::<bool, AEq, MLand>,
                    fused_mult::<bool, MLand>,
                )),
                (Eq, Lor) => Some((fused_multadd::<bool, AEq, MLor>, fused_mult::<bool, MLor>)),
                (Any, Land) => Some((
                    fused_multadd::<bool, AAny, MLand>,
                    fused_mult::<bool, MLand>,
                )),
                (Any, Lor) => Some((
                    fused_multadd::<bool, AAny, MLor>,
                    fused_mult::<bool, MLor>,
                )),
                (Any, First) => Some((
                    fused_multadd::<bool, AAny, MFirst>,
                    fused_mult::<bool, MFirst>,
                )),
                (Any, Second) => Some((
                    fused_multadd::<bool, AAny, MSecond>,
                    fused_mult::<bool, MSecond>,
                )),
                (Any, Pair) => Some((
                    fused_multadd::<bool, AAny, MPair>,
                    fused_mult::<bool, MPair>,
                )),
                _ => None,
            }
        };
    }
    match code {
        TypeCode::Bool => bool_table!(),
        TypeCode::Int8 => numeric_table!(i8),
        TypeCode::Int16 => numeric_table!(i16),
        TypeCode::Int32 => numeric_table!(i32),
        TypeCode::Int64 => numeric_table!(i64),
        TypeCode::UInt8 => numeric_table!(u8),
        TypeCode::UInt16 => numeric_table!(u16),
        TypeCode::UInt32 => numeric_table!(u32),
        TypeCode::UInt64 => numeric_table!(u64),
        TypeCode::Fp32 => numeric_table!(f32),
        TypeCode::Fp64 => numeric_table!(f64),
        TypeCode::User => None,
    }
}

// ============================================================================
// RUNTIME KERNEL
// ============================================================================

/// Per-task scratch for the generic path (cast and multiply landing
/// zones). Fused kernels never touch it.
#[derive(Clone, Debug, Default)]
pub(crate) struct Scratch {
    xa: Vec<u8>,
    yb: Vec<u8>,
    zt: Vec<u8>,
    za: Vec<u8>,
}

enum MultAddImpl {
    Fused {
        multadd: FusedMultAdd,
        mult: FusedMult,
    },
    Generic {
        mult: BinaryOp,
        add: BinaryOp,
        atype: Type,
        btype: Type,
        /// flipxy that could not be absorbed into the opcode: call the
        /// user multiply as `f(b, a)`.
        swap: bool,
    },
}

/// A ready-to-run semiring kernel bound to concrete operand types.
pub(crate) struct SemiringKernel {
    imp: MultAddImpl,
    /// The monoid operator, used to fold values already in the monoid
    /// type (per-task partials, heap merges).
    add_op: BinaryOp,
    pub ztype: Type,
    pub identity: Vec<u8>,
    terminal: Option<Vec<u8>>,
    any_monoid: bool,
    pub a_is_pattern: bool,
    pub b_is_pattern: bool,
}

impl SemiringKernel {
    /// Fresh scratch sized for this kernel.
    pub fn scratch(&self) -> Scratch {
        match &self.imp {
            MultAddImpl::Fused { .. } => Scratch::default(),
            MultAddImpl::Generic { mult, .. } => Scratch {
                xa: vec![0u8; mult.xtype.size()],
                yb: vec![0u8; mult.ytype.size()],
                zt: vec![0u8; mult.ztype.size()],
                za: Vec::new(),
            },
        }
    }

    /// `z <- a ⊗ b` (first contribution to a cell).
    #[inline]
    pub fn mult_into(&self, z: &mut [u8], a: &[u8], b: &[u8], s: &mut Scratch) {
        match &self.imp {
            MultAddImpl::Fused { mult, .. } => mult(z, a, b),
            MultAddImpl::Generic {
                mult,
                atype,
                btype,
                swap,
                ..
            } => {
                let (x, y, xt, yt) = if *swap { (b, a, btype, atype) } else { (a, b, atype, btype) };
                cast_bytes(mult.xtype.code(), &mut s.xa, xt.code(), x);
                cast_bytes(mult.ytype.code(), &mut s.yb, yt.code(), y);
                mult.apply(z, &s.xa, &s.yb);
            }
        }
    }

    /// `acc <- acc ⊕ (a ⊗ b)` (later contributions).
    #[inline]
    pub fn multadd(&self, acc: &mut [u8], a: &[u8], b: &[u8], s: &mut Scratch) {
        match &self.imp {
            MultAddImpl::Fused { multadd, .. } => multadd(acc, a, b),
            MultAddImpl::Generic {
                mult,
                add,
                atype,
                btype,
                swap,
            } => {
                let (x, y, xt, yt) = if *swap { (b, a, btype, atype) } else { (a, b, atype, btype) };
                cast_bytes(mult.xtype.code(), &mut s.xa, xt.code(), x);
                cast_bytes(mult.ytype.code(), &mut s.yb, yt.code(), y);
                let mut z = std::mem::take(&mut s.zt);
                mult.apply(&mut z, &s.xa, &s.yb);
                s.za.clear();
                s.za.extend_from_slice(acc);
                add.apply(acc, &s.za, &z);
                s.zt = z;
            }
        }
    }

    /// `acc <- acc ⊕ z` where `z` is already in the monoid type.
    #[inline]
    pub fn fold(&self, acc: &mut [u8], z: &[u8]) {
        let acc_copy = acc.to_vec();
        self.add_op.apply(acc, &acc_copy, z);
    }

    /// True when the monoid can absorb at all, enabling short-circuits.
    #[inline]
    pub fn has_terminal(&self) -> bool {
        self.any_monoid || self.terminal.is_some()
    }

    /// Whether `acc` has reached the absorbing state.
    #[inline]
    pub fn reached_terminal(&self, acc: &[u8]) -> bool {
        if self.any_monoid {
            return true;
        }
        match &self.terminal {
            Some(t) => acc == &t[..],
            None => false,
        }
    }

    pub fn terminal_bytes(&self) -> Option<&[u8]> {
        self.terminal.as_deref()
    }
}

/// Terminal of a built-in monoid after boolean renaming, by opcode and
/// element code.
fn builtin_terminal(op: BinaryOpcode, code: TypeCode) -> Option<Scalar> {
    match op {
        BinaryOpcode::Min => Some(type_min(code)),
        BinaryOpcode::Max => Some(type_max(code)),
        BinaryOpcode::Lor => Some(Scalar::Bool(true)),
        BinaryOpcode::Land => Some(Scalar::Bool(false)),
        BinaryOpcode::Times if !code.is_float() && code != TypeCode::Bool => {
            Some(Scalar::UInt8(0).cast(code))
        }
        _ => None,
    }
}

/// Bind a semiring to operand types, consulting the registry first and
/// falling back to the generic path when it declines.
pub(crate) fn build_kernel(
    sr: &Semiring,
    atype: Type,
    btype: Type,
    flipxy: bool,
) -> Result<SemiringKernel> {
    let mult = &sr.mult;
    let add: &Monoid = &sr.add;
    let ztype = add.ztype();

    let mut mult_opcode = mult.opcode;
    let mut add_opcode = add.op.opcode;
    let a_is_pattern = if flipxy {
        mult_opcode.y_is_pattern()
    } else {
        mult_opcode.x_is_pattern()
    };
    let b_is_pattern = if flipxy {
        mult_opcode.x_is_pattern()
    } else {
        mult_opcode.y_is_pattern()
    };

    // domain checks: operand types must be castable into the multiply
    let (want_a, want_b) = if flipxy {
        (mult.ytype, mult.xtype)
    } else {
        (mult.xtype, mult.ytype)
    };
    if !a_is_pattern && !want_a.compatible_with(&atype) {
        return Err(Error::DomainMismatch {
            expected: want_a.code(),
            got: atype.code(),
        });
    }
    if !b_is_pattern && !want_b.compatible_with(&btype) {
        return Err(Error::DomainMismatch {
            expected: want_b.code(),
            got: btype.code(),
        });
    }

    // the registry handles exact-type builtin semirings only
    let xycode = mult.xtype.code();
    let builtin = mult.is_builtin()
        && add.op.is_builtin()
        && ztype.is_builtin()
        && (a_is_pattern || atype == mult.xtype)
        && (b_is_pattern || btype == mult.ytype)
        && mult.xtype == mult.ytype;

    if builtin {
        if xycode == TypeCode::Bool {
            mult_opcode = boolean_rename(mult_opcode);
        }
        if ztype.code() == TypeCode::Bool {
            add_opcode = boolean_rename(add_opcode);
        }
        let effective_mult = if flipxy {
            flip_opcode(mult_opcode).unwrap_or(mult_opcode)
        } else {
            mult_opcode
        };
        // comparisons change type between xy and z; the table carries
        // same-type kernels only
        if ztype.code() == xycode {
            if let Some((multadd, mult_only)) = lookup(add_opcode, effective_mult, xycode) {
                return Ok(SemiringKernel {
                    imp: MultAddImpl::Fused {
                        multadd,
                        mult: mult_only,
                    },
                    add_op: add.op.clone(),
                    ztype,
                    identity: add.identity_bytes().to_vec(),
                    terminal: builtin_terminal(add_opcode, ztype.code())
                        .map(|s| s.cast(ztype.code()).to_bytes()),
                    any_monoid: add_opcode == BinaryOpcode::Any,
                    a_is_pattern,
                    b_is_pattern,
                });
            }
        }
        burble!(
            "registry declined ({:?}, {:?}, {:?}); generic path",
            add_opcode,
            effective_mult,
            xycode
        );
    }

    // generic path: rewrite the opcode for flipxy when possible, swap
    // arguments otherwise
    let (generic_mult, swap) = if flipxy {
        match flip_opcode(mult.opcode) {
            Some(flipped) if flipped != mult.opcode => {
                let mut m = mult.clone();
                m.opcode = flipped;
                (m, false)
            }
            Some(_) => (mult.clone(), false),
            None => (mult.clone(), true),
        }
    } else {
        (mult.clone(), false)
    };

    let terminal = if add.op.is_builtin() {
        builtin_terminal(
            if ztype.code() == TypeCode::Bool {
                boolean_rename(add.op.opcode)
            } else {
                add.op.opcode
            },
            ztype.code(),
        )
        .map(|s| s.cast(ztype.code()).to_bytes())
    } else {
        add.terminal_bytes().map(|t| t.to_vec())
    };

    Ok(SemiringKernel {
        imp: MultAddImpl::Generic {
            mult: generic_mult,
            add: add.op.clone(),
            atype,
            btype,
            swap,
        },
        add_op: add.op.clone(),
        ztype,
        identity: add.identity_bytes().to_vec(),
        terminal,
        any_monoid: add.op.opcode == BinaryOpcode::Any,
        a_is_pattern,
        b_is_pattern,
    })
}
