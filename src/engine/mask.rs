//! The masked accumulation protocol.
//!
//! Every primitive computes a tentative result `Z` and then funnels it
//! through this module to produce the final output:
//!
//! ```text
//! for each cell (i, j):
//!     m = M(i, j) under (struct, comp)     // absent mask => true
//!     if !m:  keep C(i,j) unless replace, which deletes it
//!     else if accum is None:  C(i,j) := Z(i,j)    (absent stays absent)
//!     else:   fold present pairs with accum; single-sided cells pass
//!             through; both-absent stays absent
//! ```
//!
//! This is the only place a caller ever observes `Z` applied to `C`.
//! Absence is a first-class value here, never an error.
//!
//! Fast paths:
//! - **transplant**: no accumulator and nothing of `C` survives (no
//!   mask, or the mask was already applied while building `Z` and
//!   `replace` is set) — `Z`'s storage moves into `C` wholesale;
//! - **dense accumulate**: `C` full, no mask, accumulator present —
//!   `Z`'s entries fold into `C` in place without rebuilding the
//!   pattern.

use rayon::prelude::*;

use crate::config::burble;
use crate::convert;
use crate::error::{Error, Result};
use crate::matrix::{Format, Matrix, SparseView, Store};
use crate::ops::BinaryOp;
use crate::slicer;
use crate::transpose::transpose_to_orientation;
use crate::types::{cast_bytes, Scalar, TypeCode};

/// Mask interpretation flags from the descriptor.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MaskSpec {
    pub comp: bool,
    pub structural: bool,
}

/// True when the mask admits cell `inner` of the given mask vector.
#[inline]
fn mask_admits(mv: &SparseView<'_>, mcode: TypeCode, range: std::ops::Range<usize>, inner: i64, spec: MaskSpec) -> bool {
    let found = mv.i[range.clone()].binary_search(&inner);
    let present = match found {
        Ok(off) => {
            if spec.structural {
                true
            } else {
                let val = mv.val(range.start + off);
                Scalar::read(mcode, val).as_bool()
            }
        }
        Err(_) => false,
    };
    present != spec.comp
}

/// Apply `Z` to `C` under the mask/accum protocol, consuming `Z`.
///
/// `mask_applied` records that `Z` was computed only where the mask
/// admits, letting the transplant fast path fire.
pub(crate) fn apply_mask_accum(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    mut z: Matrix,
    replace: bool,
    spec: MaskSpec,
    mask_applied: bool,
) -> Result<()> {
    debug_assert_eq!(c.nrows(), z.nrows());
    debug_assert_eq!(c.ncols(), z.ncols());
    if let Some(m) = mask {
        if m.nrows() != c.nrows() || m.ncols() != c.ncols() {
            return Err(Error::DimensionMismatch {
                expected: (c.nrows(), c.ncols()),
                got: (m.nrows(), m.ncols()),
            });
        }
        if m.element_type().code() == TypeCode::User && !spec.structural {
            // user-typed masks have no boolean interpretation
            return Err(Error::DomainMismatch {
                expected: TypeCode::Bool,
                got: TypeCode::User,
            });
        }
    }
    if let Some(acc) = accum {
        if !acc.xtype.compatible_with(&c.typ)
            || !acc.ytype.compatible_with(&z.typ)
            || !c.typ.compatible_with(&acc.ztype)
        {
            return Err(Error::DomainMismatch {
                expected: acc.xtype.code(),
                got: c.typ.code(),
            });
        }
    }

    // the complement of the implicit all-true mask admits nothing
    if mask.is_none() && spec.comp {
        if replace {
            c.clear();
        }
        return Ok(());
    }

    // orient Z like C; engines produce matching orientations except
    // through transposing wrappers
    if z.is_csc != c.is_csc {
        z = transpose_to_orientation(&z, c.is_csc)?;
    }

    // transplant: nothing of C survives
    let effective_mask_gone = mask.is_none() || (mask_applied && !spec.comp);
    if accum.is_none() && effective_mask_gone && (replace || mask.is_none()) {
        burble!("mask protocol: transplant");
        return transplant(c, z);
    }

    // dense accumulate: C full, no mask, accumulator present
    if mask.is_none() && accum.is_some() && c.format() == Format::Full && !z.is_iso() {
        if let Some(acc) = accum {
            return dense_accumulate(c, acc, &z);
        }
    }

    general_path(c, mask, accum, z, replace, spec)
}

/// Move `Z`'s storage into `C`, casting values if the types differ.
fn transplant(c: &mut Matrix, mut z: Matrix) -> Result<()> {
    if z.typ != c.typ {
        z.wait()?;
        cast_values_in_place(&mut z, c.typ.code())?;
    }
    c.store = z.store;
    c.iso = z.iso;
    c.nzombies = z.nzombies;
    c.pending = z.pending;
    c.jumbled = z.jumbled;
    c.nvec_nonempty = z.nvec_nonempty;
    c.wait()?;
    convert::conform(c)
}

/// Rewrite a matrix's value buffer into another element code.
fn cast_values_in_place(m: &mut Matrix, to: TypeCode) -> Result<()> {
    let from = m.typ.code();
    if from == to {
        return Ok(());
    }
    if from == TypeCode::User || to == TypeCode::User {
        return Err(Error::DomainMismatch {
            expected: to,
            got: from,
        });
    }
    let esize_from = m.typ.size();
    let esize_to = to.size();
    let recode = |x: &Vec<u8>| -> Vec<u8> {
        let n = x.len() / esize_from;
        let mut out = vec![0u8; n * esize_to];
        for k in 0..n {
            cast_bytes(
                to,
                &mut out[k * esize_to..(k + 1) * esize_to],
                from,
                &x[k * esize_from..(k + 1) * esize_from],
            );
        }
        out
    };
    match &mut m.store {
        Store::Sparse { x, .. } | Store::Hyper { x, .. } => *x = recode(x),
        Store::Bitmap { x, .. } | Store::Full { x } => *x = recode(x),
    }
    m.typ = match to {
        TypeCode::Bool => crate::types::Type::BOOL,
        TypeCode::Int8 => crate::types::Type::INT8,
        TypeCode::Int16 => crate::types::Type::INT16,
        TypeCode::Int32 => crate::types::Type::INT32,
        TypeCode::Int64 => crate::types::Type::INT64,
        TypeCode::UInt8 => crate::types::Type::UINT8,
        TypeCode::UInt16 => crate::types::Type::UINT16,
        TypeCode::UInt32 => crate::types::Type::UINT32,
        TypeCode::UInt64 => crate::types::Type::UINT64,
        TypeCode::Fp32 => crate::types::Type::FP32,
        TypeCode::Fp64 => crate::types::Type::FP64,
        TypeCode::User => unreachable!(),
    };
    Ok(())
}

/// Fold sparse `Z` into a full `C` in place.
fn dense_accumulate(c: &mut Matrix, accum: &BinaryOp, z: &Matrix) -> Result<()> {
    burble!("mask protocol: dense accumulate");
    let zp = convert::prepared(z)?;
    let zv = zp.sparse_view();
    let ctype = c.typ;
    let esize = ctype.size();
    // divergent writes are coming; stop sharing the single iso value
    if !zv.i.is_empty() {
        c.expand_iso();
    }
    let vlen = c.vlen;
    let ztype = zp.typ;
    if let Store::Full { x } = &mut c.store {
        let mut xa = vec![0u8; accum.xtype.size()];
        let mut yb = vec![0u8; accum.ytype.size()];
        let mut zt = vec![0u8; accum.ztype.size()];
        for k in 0..zv.nvec() {
            let j = zv.outer(k);
            for pos in zv.range(k) {
                let cell = j * vlen + zv.i[pos] as usize;
                let cslot = &mut x[cell * esize..(cell + 1) * esize];
                cast_bytes(accum.xtype.code(), &mut xa, ctype.code(), cslot);
                cast_bytes(accum.ytype.code(), &mut yb, ztype.code(), zv.val(pos));
                accum.apply(&mut zt, &xa, &yb);
                cast_bytes(ctype.code(), cslot, accum.ztype.code(), &zt);
            }
        }
    }
    Ok(())
}

/// The cell-wise protocol over a per-vector three-way merge.
fn general_path(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    z: Matrix,
    replace: bool,
    spec: MaskSpec,
) -> Result<()> {
    c.wait()?;
    convert::to_sparse(c)?;
    let zp = convert::prepared(&z)?;

    // the mask must be oriented like C before its vectors line up
    let m_oriented;
    let mp = match mask {
        Some(m) if m.is_csc != c.is_csc => {
            m_oriented = transpose_to_orientation(m, c.is_csc)?;
            Some(convert::prepared(&m_oriented)?)
        }
        Some(m) => Some(convert::prepared(m)?),
        None => None,
    };

    let cv = c.sparse_view();
    let zv = zp.sparse_view();
    let mv = mp.as_ref().map(|m| m.sparse_view());
    let mcode = mask.map(|m| m.typ.code()).unwrap_or(TypeCode::Bool);
    let ctype = c.typ;
    let ztype = zp.typ;
    let esize = ctype.size();
    let vdim = c.vdim;

    // per-vector merge; tasks balanced over combined entry counts
    let mut guide = vec![0usize; vdim + 1];
    for k in 0..vdim {
        guide[k + 1] =
            guide[k] + (cv.p[k + 1] - cv.p[k]) + zv.range_of_outer(k).len();
    }
    let ranges = slicer::coarse_ranges(&guide, slicer::task_count(cv.i.len() + zv.i.len()));

    let pieces: Vec<(Vec<usize>, Vec<i64>, Vec<u8>)> = ranges
        .into_par_iter()
        .map(|range| {
            let mut counts = Vec::with_capacity(range.len());
            let mut ri: Vec<i64> = Vec::new();
            let mut rx: Vec<u8> = Vec::new();
            let mut xa = vec![0u8; accum.map_or(0, |a| a.xtype.size())];
            let mut yb = vec![0u8; accum.map_or(0, |a| a.ytype.size())];
            let mut zt = vec![0u8; accum.map_or(0, |a| a.ztype.size())];
            for j in range {
                let start = ri.len();
                let crange = cv.range_of_outer(j);
                let zrange = zv.range_of_outer(j);
                let mrange = mv.as_ref().map(|m| m.range_of_outer(j));
                let mut cp = crange.start;
                let mut zpos = zrange.start;
                while cp < crange.end || zpos < zrange.end {
                    let ci = if cp < crange.end { cv.i[cp] } else { i64::MAX };
                    let zi = if zpos < zrange.end { zv.i[zpos] } else { i64::MAX };
                    let inner = ci.min(zi);
                    let c_here = ci == inner;
                    let z_here = zi == inner;
                    let admitted = match (&mv, &mrange) {
                        (Some(m), Some(mr)) => {
                            mask_admits(m, mcode, mr.clone(), inner, spec)
                        }
                        _ => true,
                    };
                    if !admitted {
                        if c_here && !replace {
                            ri.push(inner);
                            rx.extend_from_slice(cv.val(cp));
                        }
                    } else if let Some(acc) = accum {
                        match (c_here, z_here) {
                            (true, true) => {
                                ri.push(inner);
                                cast_bytes(acc.xtype.code(), &mut xa, ctype.code(), cv.val(cp));
                                cast_bytes(acc.ytype.code(), &mut yb, ztype.code(), zv.val(zpos));
                                acc.apply(&mut zt, &xa, &yb);
                                let at = rx.len();
                                rx.resize(at + esize, 0);
                                cast_bytes(ctype.code(), &mut rx[at..], acc.ztype.code(), &zt);
                            }
                            (false, true) => {
                                ri.push(inner);
                                let at = rx.len();
                                rx.resize(at + esize, 0);
                                cast_bytes(ctype.code(), &mut rx[at..], ztype.code(), zv.val(zpos));
                            }
                            (true, false) => {
                                ri.push(inner);
                                rx.extend_from_slice(cv.val(cp));
                            }
                            (false, false) => unreachable!(),
                        }
                    } else if z_here {
                        ri.push(inner);
                        let at = rx.len();
                        rx.resize(at + esize, 0);
                        cast_bytes(ctype.code(), &mut rx[at..], ztype.code(), zv.val(zpos));
                    }
                    // absent z under an admitted mask with no accum drops c
                    if c_here {
                        cp += 1;
                    }
                    if z_here {
                        zpos += 1;
                    }
                }
                counts.push(ri.len() - start);
            }
            (counts, ri, rx)
        })
        .collect();

    // stitch the per-task pieces into one sparse store
    let mut p = vec![0usize; vdim + 1];
    let mut i: Vec<i64> = Vec::new();
    let mut x: Vec<u8> = Vec::new();
    let mut at = 0usize;
    for (counts, ri, rx) in pieces {
        for count in counts {
            at += 1;
            p[at] = p[at - 1] + count;
        }
        i.extend_from_slice(&ri);
        x.extend_from_slice(&rx);
    }
    debug_assert_eq!(at, vdim);
    debug_assert_eq!(*p.last().unwrap(), i.len());

    c.store = Store::Sparse { p, i, x };
    c.iso = false;
    c.nzombies = 0;
    c.pending = None;
    c.jumbled = false;
    c.nvec_nonempty = None;
    convert::conform(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::ops::BinaryOpcode;
    use crate::types::{Scalar, Type};

    fn setup() {
        config::init(Config::default()).ok();
    }

    fn mat(entries: &[(usize, usize, i32)], n: usize) -> Matrix {
        let mut m = Matrix::new(Type::INT32, n, n).unwrap();
        let (mut r, mut c, mut v) = (Vec::new(), Vec::new(), Vec::new());
        for &(i, j, val) in entries {
            r.push(i);
            c.push(j);
            v.push(Scalar::Int32(val));
        }
        m.build(&r, &c, &v, None).unwrap();
        m
    }

    fn entries(m: &Matrix) -> Vec<(usize, usize, i32)> {
        let (r, c, v) = m.clone().extract_tuples().unwrap();
        r.into_iter()
            .zip(c)
            .zip(v)
            .map(|((i, j), s)| (i, j, s.as_i32()))
            .collect()
    }

    #[test]
    fn test_no_mask_no_accum_is_transplant() {
        setup();
        let mut c = mat(&[(0, 0, 1), (1, 1, 2)], 3);
        let z = mat(&[(2, 2, 9)], 3);
        apply_mask_accum(&mut c, None, None, z, false, MaskSpec::default(), false).unwrap();
        assert_eq!(entries(&c), vec![(2, 2, 9)]);
    }

    #[test]
    fn test_accum_merges_cells() {
        setup();
        let mut c = mat(&[(0, 0, 1), (1, 1, 2)], 3);
        let z = mat(&[(1, 1, 10), (2, 2, 9)], 3);
        let plus = BinaryOp::builtin(BinaryOpcode::Plus, Type::INT32).unwrap();
        apply_mask_accum(
            &mut c,
            None,
            Some(&plus),
            z,
            false,
            MaskSpec::default(),
            false,
        )
        .unwrap();
        assert_eq!(entries(&c), vec![(0, 0, 1), (1, 1, 12), (2, 2, 9)]);
    }

    #[test]
    fn test_mask_keeps_unadmitted_cells() {
        setup();
        let mut c = mat(&[(0, 0, 1), (1, 1, 2)], 3);
        let z = mat(&[(0, 0, 5), (1, 1, 6)], 3);
        // mask admits only (0,0)
        let m = mat(&[(0, 0, 1)], 3);
        apply_mask_accum(&mut c, Some(&m), None, z, false, MaskSpec::default(), false).unwrap();
        assert_eq!(entries(&c), vec![(0, 0, 5), (1, 1, 2)]);
    }

    #[test]
    fn test_mask_replace_deletes_unadmitted() {
        setup();
        let mut c = mat(&[(0, 0, 1), (1, 1, 2)], 3);
        let z = mat(&[(0, 0, 5), (1, 1, 6)], 3);
        let m = mat(&[(0, 0, 1)], 3);
        apply_mask_accum(&mut c, Some(&m), None, z, true, MaskSpec::default(), false).unwrap();
        assert_eq!(entries(&c), vec![(0, 0, 5)]);
    }

    #[test]
    fn test_complemented_mask() {
        setup();
        let mut c = mat(&[], 3);
        let z = mat(&[(0, 0, 5), (1, 1, 6), (2, 0, 7)], 3);
        let m = mat(&[(1, 1, 1)], 3);
        let spec = MaskSpec {
            comp: true,
            structural: false,
        };
        apply_mask_accum(&mut c, Some(&m), None, z, false, spec, false).unwrap();
        assert_eq!(entries(&c), vec![(0, 0, 5), (2, 0, 7)]);
    }

    #[test]
    fn test_structural_mask_ignores_values() {
        setup();
        let mut c = mat(&[], 2);
        let z = mat(&[(0, 0, 5), (1, 1, 6)], 2);
        // mask value is zero, but structurally present
        let m = mat(&[(0, 0, 0)], 2);
        let spec = MaskSpec {
            comp: false,
            structural: true,
        };
        apply_mask_accum(&mut c, Some(&m), None, z, false, spec, false).unwrap();
        assert_eq!(entries(&c), vec![(0, 0, 5)]);

        // without structural, a zero mask value hides the cell
        let mut c2 = mat(&[], 2);
        let z2 = mat(&[(0, 0, 5)], 2);
        apply_mask_accum(&mut c2, Some(&m), None, z2, false, MaskSpec::default(), false).unwrap();
        assert_eq!(entries(&c2), vec![]);
    }

    #[test]
    fn test_absent_z_with_no_accum_drops_c_under_mask() {
        setup();
        let mut c = mat(&[(0, 0, 1)], 2);
        let z = mat(&[], 2);
        let m = mat(&[(0, 0, 1)], 2);
        apply_mask_accum(&mut c, Some(&m), None, z, false, MaskSpec::default(), false).unwrap();
        assert_eq!(entries(&c), vec![]);
    }

    #[test]
    fn test_typecast_on_transplant() {
        setup();
        let mut c = Matrix::new(Type::FP64, 2, 2).unwrap();
        let z = mat(&[(0, 1, 3)], 2);
        apply_mask_accum(&mut c, None, None, z, true, MaskSpec::default(), false).unwrap();
        assert_eq!(c.element_type(), Type::FP64);
        assert_eq!(
            c.extract_element(0, 1).unwrap(),
            Some(Scalar::Fp64(3.0))
        );
    }
}
