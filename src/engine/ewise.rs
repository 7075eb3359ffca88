//! The elementwise engine: set-union add and set-intersection mult.
//!
//! Both run in two phases over the stored vectors:
//!
//! - **phase 1** counts the entries each output vector will hold, from
//!   the pattern merge of `A(:,j)` and `B(:,j)` (and the mask when it is
//!   exploited);
//! - a cumulative sum turns the counts into offsets;
//! - **phase 2** fills index and value arrays, each task writing into
//!   its pre-assigned slice.
//!
//! Per-vector merging picks among a linear two-pointer walk, a binary
//! search of the much-denser side (intersection only — a union must
//! visit everything anyway), and a mask-driven walk when the mask is
//! much sparser than both operands.
//!
//! Union semantics: a cell present on one side only passes through with
//! a typecast; both present fold through the operator. Intersection
//! semantics are strict: a cell missing on either side is absent in the
//! result, whatever the other side holds.

use rayon::prelude::*;

use crate::config::burble;
use crate::convert;
use crate::error::{Error, Result};
use crate::mask::{self, MaskSpec};
use crate::matrix::{Matrix, SparseView};
use crate::ops::BinaryOp;
use crate::slicer;
use crate::transpose::{logical_transpose, transpose_to_orientation};
use crate::types::{cast_bytes, Scalar, Type, TypeCode};
use crate::Descriptor;

/// An operand this many times denser than the other flips the
/// intersection merge to binary search.
const BINARY_SEARCH_FACTOR: usize = 64;

/// A mask this many times sparser than the operands is exploited during
/// the compute phases instead of afterwards.
const MASK_PRUNE_FACTOR: usize = 8;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum EwiseKind {
    Add,
    Mult,
}

/// `C⟨M⟩ = accum(C, A ⊕ B)` over the pattern union.
pub fn ewise_add(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    op: &BinaryOp,
    a: &Matrix,
    b: &Matrix,
    desc: &Descriptor,
) -> Result<()> {
    ewise(c, mask, accum, op, a, b, desc, EwiseKind::Add)
}

/// `C⟨M⟩ = accum(C, A ⊗ B)` over the pattern intersection.
pub fn ewise_mult(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    op: &BinaryOp,
    a: &Matrix,
    b: &Matrix,
    desc: &Descriptor,
) -> Result<()> {
    ewise(c, mask, accum, op, a, b, desc, EwiseKind::Mult)
}

#[allow(clippy::too_many_arguments)]
fn ewise(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    op: &BinaryOp,
    a: &Matrix,
    b: &Matrix,
    desc: &Descriptor,
    kind: EwiseKind,
) -> Result<()> {
    crate::config::context()?;
    if let Some(m) = mask {
        if m.element_type().code() == TypeCode::User && !desc.mask_struct {
            return Err(Error::DomainMismatch {
                expected: TypeCode::Bool,
                got: TypeCode::User,
            });
        }
    }
    if !op.xtype.compatible_with(&a.typ) {
        return Err(Error::DomainMismatch {
            expected: op.xtype.code(),
            got: a.typ.code(),
        });
    }
    if !op.ytype.compatible_with(&b.typ) {
        return Err(Error::DomainMismatch {
            expected: op.ytype.code(),
            got: b.typ.code(),
        });
    }

    let a_eff = effective_operand(a, desc.input0_transpose, c.is_csc)?;
    let b_eff = effective_operand(b, desc.input1_transpose, c.is_csc)?;
    if a_eff.nrows() != c.nrows()
        || a_eff.ncols() != c.ncols()
        || b_eff.nrows() != c.nrows()
        || b_eff.ncols() != c.ncols()
    {
        return Err(Error::DimensionMismatch {
            expected: (c.nrows(), c.ncols()),
            got: (a_eff.nrows(), a_eff.ncols()),
        });
    }

    let av = a_eff.sparse_view();
    let bv = b_eff.sparse_view();

    // exploit the mask during compute only when it is much sparser than
    // the operands and can be read without casting surprises
    let total_ab = av.i.len() + bv.i.len();
    let mask_usable = match mask {
        Some(m)
            if !desc.mask_comp
                && m.is_csc == c.is_csc
                && (desc.mask_struct || m.element_type().code() != TypeCode::User) =>
        {
            let mn = m.nvals_stored();
            mn.saturating_mul(MASK_PRUNE_FACTOR) <= total_ab
        }
        _ => false,
    };
    let mask_prep = if mask_usable {
        Some(convert::prepared(mask.unwrap())?)
    } else {
        None
    };
    let mv = mask_prep.as_ref().map(|m| m.sparse_view());
    let mcode = mask.map(|m| m.element_type().code()).unwrap_or(TypeCode::Bool);

    let ztype = op.ztype;
    let zsize = ztype.size();
    let vdim = a_eff.vdim;
    let vlen = a_eff.vlen;

    // phase 1: count per vector
    let mut guide = vec![0usize; vdim + 1];
    for k in 0..vdim {
        guide[k + 1] = guide[k] + av.range_of_outer(k).len() + bv.range_of_outer(k).len();
    }
    let ranges = slicer::coarse_ranges(&guide, slicer::task_count(total_ab.max(1)));
    let counts: Vec<Vec<usize>> = ranges
        .clone()
        .into_par_iter()
        .map(|range| {
            range
                .map(|j| {
                    let ar = av.range_of_outer(j);
                    let br = bv.range_of_outer(j);
                    match (&mv, kind) {
                        (Some(m), _) => {
                            count_masked(&av, &bv, m, mcode, desc.mask_struct, j, kind)
                        }
                        (None, EwiseKind::Add) => count_union(&av.i[ar], &bv.i[br]),
                        (None, EwiseKind::Mult) => count_intersect(&av.i[ar], &bv.i[br]),
                    }
                })
                .collect()
        })
        .collect();

    // cumulative sum across all tasks
    let mut zp = vec![0usize; vdim + 1];
    {
        let mut at = 0usize;
        for task_counts in &counts {
            for &count in task_counts {
                zp[at + 1] = zp[at] + count;
                at += 1;
            }
        }
        debug_assert_eq!(at, vdim);
    }
    let nvals = zp[vdim];

    // phase 2: fill, each task writing its pre-assigned slice
    let mut zi = vec![0i64; nvals];
    let mut zx = vec![0u8; nvals * zsize];
    {
        let islices = slicer::split_index_slices(&mut zi, &ranges, &zp);
        let xslices = slicer::split_byte_slices(&mut zx, &ranges, &zp, zsize);
        ranges
            .clone()
            .into_par_iter()
            .zip(islices)
            .zip(xslices)
            .for_each(|((range, islice), xslice)| {
                let base = zp[range.start];
                let mut fill = Filler {
                    av: &av,
                    bv: &bv,
                    op,
                    atype: a_eff.typ,
                    btype: b_eff.typ,
                    ztype,
                    xa: vec![0u8; op.xtype.size()],
                    yb: vec![0u8; op.ytype.size()],
                    zt: vec![0u8; op.ztype.size()],
                };
                for j in range {
                    let at = zp[j] - base;
                    match (&mv, kind) {
                        (Some(m), _) => fill.fill_masked(
                            m,
                            mcode,
                            desc.mask_struct,
                            j,
                            kind,
                            &mut islice[at..],
                            &mut xslice[at * zsize..],
                        ),
                        (None, EwiseKind::Add) => {
                            fill.fill_union(j, &mut islice[at..], &mut xslice[at * zsize..])
                        }
                        (None, EwiseKind::Mult) => {
                            fill.fill_intersect(j, &mut islice[at..], &mut xslice[at * zsize..])
                        }
                    }
                }
            });
    }
    burble!(
        "ewise {:?}: {} + {} -> {} entries{}",
        kind,
        av.i.len(),
        bv.i.len(),
        nvals,
        if mv.is_some() { " (mask exploited)" } else { "" }
    );

    let z = Matrix::from_sparse_parts(ztype, vlen, vdim, c.is_csc, zp, zi, zx, false);
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
        mv.is_some(),
    )
}

/// The operand as the caller meant it: optionally transposed, stored in
/// the output's orientation, finalized sparse.
fn effective_operand(m: &Matrix, transposed: bool, want_csc: bool) -> Result<Matrix> {
    let oriented = if transposed {
        let lt = logical_transpose(m)?;
        transpose_to_orientation(&lt, want_csc)?
    } else {
        transpose_to_orientation(m, want_csc)?
    };
    Ok(convert::prepared(&oriented)?.into_owned())
}

// ============================================================================
// PHASE 1: COUNTS
// ============================================================================

fn count_union(a: &[i64], b: &[i64]) -> usize {
    let mut i = 0;
    let mut j = 0;
    let mut count = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                i += 1;
                j += 1;
            }
        }
        count += 1;
    }
    count + (a.len() - i) + (b.len() - j)
}

fn count_intersect(a: &[i64], b: &[i64]) -> usize {
    // binary-search the much-denser side instead of walking it
    if a.len() > BINARY_SEARCH_FACTOR * b.len().max(1) {
        return b.iter().filter(|i| a.binary_search(i).is_ok()).count();
    }
    if b.len() > BINARY_SEARCH_FACTOR * a.len().max(1) {
        return a.iter().filter(|i| b.binary_search(i).is_ok()).count();
    }
    let mut i = 0;
    let mut j = 0;
    let mut count = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                i += 1;
                j += 1;
            }
        }
    }
    count
}

fn count_masked(
    av: &SparseView<'_>,
    bv: &SparseView<'_>,
    mv: &SparseView<'_>,
    mcode: TypeCode,
    structural: bool,
    j: usize,
    kind: EwiseKind,
) -> usize {
    let ar = av.range_of_outer(j);
    let br = bv.range_of_outer(j);
    let a = &av.i[ar];
    let b = &bv.i[br];
    let mut count = 0;
    for mpos in mv.range_of_outer(j) {
        if !structural && !Scalar::read(mcode, mv.val(mpos)).as_bool() {
            continue;
        }
        let inner = mv.i[mpos];
        let in_a = a.binary_search(&inner).is_ok();
        let in_b = b.binary_search(&inner).is_ok();
        let present = match kind {
            EwiseKind::Add => in_a || in_b,
            EwiseKind::Mult => in_a && in_b,
        };
        if present {
            count += 1;
        }
    }
    count
}

// ============================================================================
// PHASE 2: FILL
// ============================================================================

struct Filler<'a> {
    av: &'a SparseView<'a>,
    bv: &'a SparseView<'a>,
    op: &'a BinaryOp,
    atype: Type,
    btype: Type,
    ztype: Type,
    xa: Vec<u8>,
    yb: Vec<u8>,
    zt: Vec<u8>,
}

impl<'a> Filler<'a> {
    /// `z <- op(a, b)` with casts on the way in and out.
    fn combine(&mut self, dst: &mut [u8], aval: &[u8], bval: &[u8]) {
        cast_bytes(self.op.xtype.code(), &mut self.xa, self.atype.code(), aval);
        cast_bytes(self.op.ytype.code(), &mut self.yb, self.btype.code(), bval);
        let mut zt = std::mem::take(&mut self.zt);
        self.op.apply(&mut zt, &self.xa, &self.yb);
        cast_bytes(self.ztype.code(), dst, self.op.ztype.code(), &zt);
        self.zt = zt;
    }

    fn pass_a(&mut self, dst: &mut [u8], aval: &[u8]) {
        cast_bytes(self.ztype.code(), dst, self.atype.code(), aval);
    }

    fn pass_b(&mut self, dst: &mut [u8], bval: &[u8]) {
        cast_bytes(self.ztype.code(), dst, self.btype.code(), bval);
    }

    fn fill_union(&mut self, j: usize, zi: &mut [i64], zx: &mut [u8]) {
        let zsize = self.ztype.size();
        let ar = self.av.range_of_outer(j);
        let br = self.bv.range_of_outer(j);
        let mut ap = ar.start;
        let mut bp = br.start;
        let mut w = 0usize;
        while ap < ar.end || bp < br.end {
            let ia = if ap < ar.end { self.av.i[ap] } else { i64::MAX };
            let ib = if bp < br.end { self.bv.i[bp] } else { i64::MAX };
            let dst = &mut zx[w * zsize..(w + 1) * zsize];
            if ia < ib {
                zi[w] = ia;
                let aval = self.av.val(ap);
                self.pass_a(dst, aval);
                ap += 1;
            } else if ib < ia {
                zi[w] = ib;
                let bval = self.bv.val(bp);
                self.pass_b(dst, bval);
                bp += 1;
            } else {
                zi[w] = ia;
                let aval = self.av.val(ap);
                let bval = self.bv.val(bp);
                self.combine(dst, aval, bval);
                ap += 1;
                bp += 1;
            }
            w += 1;
        }
    }

    fn fill_intersect(&mut self, j: usize, zi: &mut [i64], zx: &mut [u8]) {
        let zsize = self.ztype.size();
        let ar = self.av.range_of_outer(j);
        let br = self.bv.range_of_outer(j);
        let mut w = 0usize;
        let a_len = ar.len();
        let b_len = br.len();
        if a_len > BINARY_SEARCH_FACTOR * b_len.max(1)
            || b_len > BINARY_SEARCH_FACTOR * a_len.max(1)
        {
            // probe the much-denser side by binary search
            let (probe_from, into, swap) = if a_len > b_len {
                (br.clone(), ar.clone(), false)
            } else {
                (ar.clone(), br.clone(), true)
            };
            let dense_i = if a_len > b_len {
                &self.av.i[into.clone()]
            } else {
                &self.bv.i[into.clone()]
            };
            for pos in probe_from {
                let inner = if swap { self.av.i[pos] } else { self.bv.i[pos] };
                if let Ok(off) = dense_i.binary_search(&inner) {
                    zi[w] = inner;
                    let dense_pos = into.start + off;
                    let (aval, bval) = if swap {
                        (self.av.val(pos), self.bv.val(dense_pos))
                    } else {
                        (self.av.val(dense_pos), self.bv.val(pos))
                    };
                    let dst = &mut zx[w * zsize..(w + 1) * zsize];
                    self.combine(dst, aval, bval);
                    w += 1;
                }
            }
            return;
        }
        let mut ap = ar.start;
        let mut bp = br.start;
        while ap < ar.end && bp < br.end {
            match self.av.i[ap].cmp(&self.bv.i[bp]) {
                std::cmp::Ordering::Less => ap += 1,
                std::cmp::Ordering::Greater => bp += 1,
                std::cmp::Ordering::Equal => {
                    zi[w] = self.av.i[ap];
                    let aval = self.av.val(ap);
                    let bval = self.bv.val(bp);
                    let dst = &mut zx[w * zsize..(w + 1) * zsize];
                    self.combine(dst, aval, bval);
                    ap += 1;
                    bp += 1;
                    w += 1;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fill_masked(
        &mut self,
        mv: &SparseView<'_>,
        mcode: TypeCode,
        structural: bool,
        j: usize,
        kind: EwiseKind,
        zi: &mut [i64],
        zx: &mut [u8],
    ) {
        let zsize = self.ztype.size();
        let ar = self.av.range_of_outer(j);
        let br = self.bv.range_of_outer(j);
        let mut w = 0usize;
        for mpos in mv.range_of_outer(j) {
            if !structural && !Scalar::read(mcode, mv.val(mpos)).as_bool() {
                continue;
            }
            let inner = mv.i[mpos];
            let fa = self.av.i[ar.clone()].binary_search(&inner).ok();
            let fb = self.bv.i[br.clone()].binary_search(&inner).ok();
            let hit = match kind {
                EwiseKind::Add => fa.is_some() || fb.is_some(),
                EwiseKind::Mult => fa.is_some() && fb.is_some(),
            };
            if !hit {
                continue;
            }
            zi[w] = inner;
            let dst = &mut zx[w * zsize..(w + 1) * zsize];
            match (fa, fb) {
                (Some(oa), Some(ob)) => {
                    let aval = self.av.val(ar.start + oa);
                    let bval = self.bv.val(br.start + ob);
                    self.combine(dst, aval, bval);
                }
                (Some(oa), None) => {
                    let aval = self.av.val(ar.start + oa);
                    self.pass_a(dst, aval);
                }
                (None, Some(ob)) => {
                    let bval = self.bv.val(br.start + ob);
                    self.pass_b(dst, bval);
                }
                (None, None) => unreachable!(),
            }
            w += 1;
        }
    }
}
