//! Apply and select: unary traversals of a matrix pattern.
//!
//! Apply rewrites every stored value through an operator — unary, a
//! binary with one side bound to a scalar, or an index-unary seeing
//! `(value, i, j, thunk)` — leaving the pattern untouched. An
//! identity-shaped operator with no typecast keeps the value buffer as
//! is, the shallow case.
//!
//! Select is apply with filtering instead of rewriting: an index-unary
//! predicate decides per entry whether it survives, values pass through
//! unchanged (iso stays iso).

use rayon::prelude::*;

use crate::config::burble;
use crate::convert;
use crate::error::{Error, Result};
use crate::mask::{self, MaskSpec};
use crate::matrix::Matrix;
use crate::ops::{BinaryOp, IndexUnaryOp, UnaryOp};
use crate::slicer;
use crate::transpose::{logical_transpose, transpose_to_orientation};
use crate::types::{cast_bytes, Scalar, TypeCode};
use crate::Descriptor;

/// Which transform an apply performs per entry.
enum Transform<'a> {
    Unary(&'a UnaryOp),
    /// `z = f(bound, a)`.
    Bind1st(&'a BinaryOp, Vec<u8>),
    /// `z = f(a, bound)`.
    Bind2nd(&'a BinaryOp, Vec<u8>),
    /// `z = f(a, i, j, thunk)`.
    Index(&'a IndexUnaryOp, Vec<u8>),
}

impl<'a> Transform<'a> {
    fn ztype(&self) -> crate::types::Type {
        match self {
            Transform::Unary(f) => f.ztype,
            Transform::Bind1st(f, _) | Transform::Bind2nd(f, _) => f.ztype,
            Transform::Index(f, _) => f.ztype,
        }
    }

    /// True when values pass through untouched and the buffer can be
    /// reused wholesale.
    fn is_shallow(&self, atype: crate::types::Type) -> bool {
        match self {
            Transform::Unary(f) => f.is_identity_shape() && f.ztype == atype && f.xtype == atype,
            _ => false,
        }
    }

    fn eval(&self, dst: &mut [u8], aval: &[u8], atype: TypeCode, row: usize, col: usize) {
        match self {
            Transform::Unary(f) => {
                if f.xtype.code() == atype {
                    f.apply(dst, aval);
                } else {
                    let mut xa = vec![0u8; f.xtype.size()];
                    cast_bytes(f.xtype.code(), &mut xa, atype, aval);
                    f.apply(dst, &xa);
                }
            }
            Transform::Bind1st(f, bound) => {
                let mut yb = vec![0u8; f.ytype.size()];
                cast_bytes(f.ytype.code(), &mut yb, atype, aval);
                f.apply(dst, bound, &yb);
            }
            Transform::Bind2nd(f, bound) => {
                let mut xa = vec![0u8; f.xtype.size()];
                cast_bytes(f.xtype.code(), &mut xa, atype, aval);
                f.apply(dst, &xa, bound);
            }
            Transform::Index(f, thunk) => {
                if f.xtype.code() == atype {
                    f.apply(dst, aval, row, col, thunk);
                } else {
                    let mut xa = vec![0u8; f.xtype.size()];
                    cast_bytes(f.xtype.code(), &mut xa, atype, aval);
                    f.apply(dst, &xa, row, col, thunk);
                }
            }
        }
    }
}

// ============================================================================
// APPLY
// ============================================================================

/// `C⟨M⟩ = accum(C, f(A))`.
pub fn apply_unary(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    op: &UnaryOp,
    a: &Matrix,
    desc: &Descriptor,
) -> Result<()> {
    apply_transform(c, mask, accum, Transform::Unary(op), a, desc)
}

/// `C⟨M⟩ = accum(C, f(x, A))` with `x` bound up front.
pub fn apply_bind1st(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    op: &BinaryOp,
    x: Scalar,
    a: &Matrix,
    desc: &Descriptor,
) -> Result<()> {
    if op.xtype.code() == TypeCode::User {
        return Err(Error::DomainMismatch {
            expected: op.xtype.code(),
            got: x.code(),
        });
    }
    let bound = x.cast(op.xtype.code()).to_bytes();
    apply_transform(c, mask, accum, Transform::Bind1st(op, bound), a, desc)
}

/// `C⟨M⟩ = accum(C, f(A, y))` with `y` bound up front.
pub fn apply_bind2nd(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    op: &BinaryOp,
    a: &Matrix,
    y: Scalar,
    desc: &Descriptor,
) -> Result<()> {
    if op.ytype.code() == TypeCode::User {
        return Err(Error::DomainMismatch {
            expected: op.ytype.code(),
            got: y.code(),
        });
    }
    let bound = y.cast(op.ytype.code()).to_bytes();
    apply_transform(c, mask, accum, Transform::Bind2nd(op, bound), a, desc)
}

/// `C⟨M⟩ = accum(C, f(A, i, j, thunk))`.
pub fn apply_index_unary(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    op: &IndexUnaryOp,
    a: &Matrix,
    thunk: Scalar,
    desc: &Descriptor,
) -> Result<()> {
    if op.ttype.code() == TypeCode::User {
        return Err(Error::DomainMismatch {
            expected: op.ttype.code(),
            got: thunk.code(),
        });
    }
    let bound = thunk.cast(op.ttype.code()).to_bytes();
    apply_transform(c, mask, accum, Transform::Index(op, bound), a, desc)
}

fn apply_transform(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    tf: Transform<'_>,
    a: &Matrix,
    desc: &Descriptor,
) -> Result<()> {
    crate::config::context()?;
    let input_t = match &tf {
        Transform::Unary(f) => f.xtype,
        Transform::Bind1st(f, _) => f.ytype,
        Transform::Bind2nd(f, _) => f.xtype,
        Transform::Index(f, _) => f.xtype,
    };
    if !input_t.compatible_with(&a.typ) {
        return Err(Error::DomainMismatch {
            expected: input_t.code(),
            got: a.typ.code(),
        });
    }
    let a_eff = effective(a, desc.input0_transpose, c.is_csc)?;
    if a_eff.nrows() != c.nrows() || a_eff.ncols() != c.ncols() {
        return Err(Error::DimensionMismatch {
            expected: (c.nrows(), c.ncols()),
            got: (a_eff.nrows(), a_eff.ncols()),
        });
    }

    // shallow: same values, same pattern
    if tf.is_shallow(a_eff.typ) {
        burble!("apply: shallow pass-through");
        return mask::apply_mask_accum(
            c,
            mask,
            accum,
            a_eff,
            desc.output_replace,
            MaskSpec {
                comp: desc.mask_comp,
                structural: desc.mask_struct,
            },
            false,
        );
    }

    let ztype = tf.ztype();
    let zsize = ztype.size();
    let av = a_eff.sparse_view();
    let atype = a_eff.typ.code();
    let is_csc = a_eff.is_csc;

    // index-dependent transforms break the one-value-in, one-value-out
    // property that lets iso survive
    let index_dependent = matches!(&tf, Transform::Index(_, _));

    let (zi, zp): (Vec<i64>, Vec<usize>) = {
        // pattern is unchanged; expand hyper into plain offsets
        let mut p = vec![0usize; a_eff.vdim + 1];
        for k in 0..av.nvec() {
            p[av.outer(k) + 1] = av.range(k).len();
        }
        for k in 0..a_eff.vdim {
            p[k + 1] += p[k];
        }
        (av.i.to_vec(), p)
    };

    let mut zx;
    let iso_out = a_eff.iso && !index_dependent;
    if iso_out {
        // one value in, one value out
        zx = vec![0u8; zsize];
        if !av.x.is_empty() {
            tf.eval(&mut zx, av.val(0), atype, 0, 0);
        }
    } else {
        zx = vec![0u8; zi.len() * zsize];
        let ranges = slicer::coarse_ranges(&zp, slicer::task_count(zi.len().max(1)));
        let slices = slicer::split_byte_slices(&mut zx, &ranges, &zp, zsize);
        ranges
            .into_par_iter()
            .zip(slices)
            .for_each(|(range, slice)| {
                let base = zp[range.start];
                for j in range {
                    for pos in av.range_of_outer(j) {
                        let inner = av.i[pos] as usize;
                        let (row, col) = if is_csc { (inner, j) } else { (j, inner) };
                        let w = pos - base;
                        tf.eval(
                            &mut slice[w * zsize..(w + 1) * zsize],
                            av.val(pos),
                            atype,
                            row,
                            col,
                        );
                    }
                }
            });
    }

    let z = Matrix::from_sparse_parts(
        ztype,
        a_eff.vlen,
        a_eff.vdim,
        is_csc,
        zp,
        zi,
        zx,
        iso_out,
    );
    mask::apply_mask_accum(
        c,
        mask,
        accum,
        z,
        desc.output_replace,
        MaskSpec {
            comp: desc.mask_comp,
            structural: desc.mask_struct,
        },
        false,
    )
}

// ============================================================================
// SELECT
// ============================================================================

/// `C⟨M⟩ = accum(C, select(f, A, thunk))`: keep entries satisfying the
/// predicate, values untouched.
pub fn select(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    op: &IndexUnaryOp,
    a: &Matrix,
    thunk: Scalar,
    desc: &Descriptor,
) -> Result<()> {
    crate::config::context()?;
    if a.typ.code() == TypeCode::User
        && !op.opcode.is_positional()
        && op.opcode != crate::ops::IndexUnaryOpcode::User
    {
        return Err(Error::DomainMismatch {
            expected: op.xtype.code(),
            got: TypeCode::User,
        });
    }
    if op.ttype.code() == TypeCode::User {
        return Err(Error::DomainMismatch {
            expected: op.ttype.code(),
            got: thunk.code(),
        });
    }
    let a_eff = effective(a, desc.input0_transpose, c.is_csc)?;
    if a_eff.nrows() != c.nrows() || a_eff.ncols() != c.ncols() {
        return Err(Error::DimensionMismatch {
            expected: (c.nrows(), c.ncols()),
            got: (a_eff.nrows(), a_eff.ncols()),
        });
    }
    let bound = thunk.cast(op.ttype.code()).to_bytes();

    let av = a_eff.sparse_view();
    let is_csc = a_eff.is_csc;
    let vdim = a_eff.vdim;

    // phase 1: count survivors per vector
    let mut full_p = vec![0usize; vdim + 1];
    for k in 0..av.nvec() {
        full_p[av.outer(k) + 1] = av.range(k).len();
    }
    for k in 0..vdim {
        full_p[k + 1] += full_p[k];
    }
    let ranges = slicer::coarse_ranges(&full_p, slicer::task_count(av.i.len().max(1)));
    let keeps: Vec<Vec<bool>> = ranges
        .clone()
        .into_par_iter()
        .map(|range| {
            let mut keep = Vec::new();
            for j in range {
                for pos in av.range_of_outer(j) {
                    let inner = av.i[pos] as usize;
                    let (row, col) = if is_csc { (inner, j) } else { (j, inner) };
                    keep.push(op.test(av.val(pos), row, col, &bound));
                }
            }
            keep
        })
        .collect();

    // cumulative sum and phase-2 fill
    let mut zp = vec![0usize; vdim + 1];
    let mut zi = Vec::new();
    let mut zx = Vec::new();
    let mut cursor = 0usize;
    for (range, keep) in ranges.iter().zip(&keeps) {
        let mut k = 0usize;
        for j in range.clone() {
            for pos in av.range_of_outer(j) {
                if keep[k] {
                    zi.push(av.i[pos]);
                    if !a_eff.iso {
                        zx.extend_from_slice(av.val(pos));
                    }
                }
                k += 1;
            }
            cursor += 1;
            zp[cursor] = zi.len();
        }
    }
    debug_assert_eq!(cursor, vdim);
    let iso_out = a_eff.iso && !zi.is_empty();
    if iso_out {
        zx = av.val(0).to_vec();
    } else if a_eff.iso {
        zx = Vec::new();
    }
    burble!("select: {} of {} entries kept", zi.len(), av.i.len());

    let z = Matrix::from_sparse_parts(
        a_eff.typ,
        a_eff.vlen,
        vdim,
        is_csc,
        zp,
        zi,
        zx,
        iso_out,
    );
    mask::apply_mask_accum(
        c,
        mask,
        accum,
        z,
        desc.output_replace,
        MaskSpec {
            comp: desc.mask_comp,
            structural: desc.mask_struct,
        },
        false,
    )
}

fn effective(m: &Matrix, transposed: bool, want_csc: bool) -> Result<Matrix> {
    let oriented = if transposed {
        let lt = logical_transpose(m)?;
        transpose_to_orientation(&lt, want_csc)?
    } else {
        transpose_to_orientation(m, want_csc)?
    };
    Ok(convert::prepared(&oriented)?.into_owned())
}
