//! Monoid reductions: whole matrix to a scalar, or per-row to a vector.
//!
//! The scalar form folds per-task partials over entry slices and then
//! combines them pairwise in task order, so the same partition always
//! produces the same value even for non-associative floating-point
//! sums. A monoid with a terminal value short-circuits: once a task's
//! partial absorbs, that task stops reading.

use rayon::prelude::*;

use crate::algebra::Monoid;
use crate::config::burble;
use crate::convert;
use crate::error::{Error, Result};
use crate::mask::{self, MaskSpec};
use crate::matrix::Matrix;
use crate::ops::BinaryOp;
use crate::slicer;
use crate::transpose::transpose_to_orientation;
use crate::types::{cast_bytes, Scalar, TypeCode};
use crate::Descriptor;

/// Reduce every entry of `a` into one value of the monoid type.
/// An empty matrix reduces to the identity.
pub fn reduce_scalar(monoid: &Monoid, a: &Matrix) -> Result<Scalar> {
    let bytes = reduce_scalar_raw(monoid, a)?;
    if monoid.ztype().code() == TypeCode::User {
        return Err(Error::DomainMismatch {
            expected: TypeCode::User,
            got: TypeCode::User,
        });
    }
    Ok(Scalar::read(monoid.ztype().code(), &bytes))
}

/// Raw-bytes reduction, the only form user-typed monoids support.
pub fn reduce_scalar_raw(monoid: &Monoid, a: &Matrix) -> Result<Vec<u8>> {
    crate::config::context()?;
    if !monoid.op.xtype.compatible_with(&a.typ) {
        return Err(Error::DomainMismatch {
            expected: monoid.op.xtype.code(),
            got: a.typ.code(),
        });
    }
    let ap = convert::prepared(a)?;
    let av = ap.sparse_view();
    let zcode = monoid.ztype().code();
    let zsize = monoid.ztype().size();
    let acode = ap.typ.code();

    if av.i.is_empty() {
        return Ok(monoid.identity_bytes().to_vec());
    }

    // fine-grained tasks over the entry array
    let tasks = slicer::slice_work(av.p, slicer::task_count(av.i.len()));
    let partials: Vec<Option<Vec<u8>>> = tasks
        .par_iter()
        .map(|task| {
            let mut acc: Option<Vec<u8>> = None;
            let mut cast = vec![0u8; zsize];
            for pos in task.pstart..task.pend {
                cast_bytes(zcode, &mut cast, acode, av.val(pos));
                match &mut acc {
                    None => acc = Some(cast.clone()),
                    Some(accv) => monoid.fold(accv, &cast),
                }
                if monoid.reached_terminal(acc.as_deref().unwrap_or(&[])) {
                    break;
                }
            }
            acc
        })
        .collect();

    // pairwise combination in task order keeps the result stable for a
    // fixed partition
    let mut result: Option<Vec<u8>> = None;
    for partial in partials.into_iter().flatten() {
        match &mut result {
            None => result = Some(partial),
            Some(acc) => {
                monoid.fold(acc, &partial);
                if monoid.reached_terminal(acc) {
                    break;
                }
            }
        }
    }
    burble!("reduce: {} entries folded", av.i.len());
    Ok(result.unwrap_or_else(|| monoid.identity_bytes().to_vec()))
}

/// `w⟨m⟩ = accum(w, reduce_rows(A))`: `w(i) = ⊕_j A(i, j)`. With the
/// descriptor's first transpose set, columns reduce instead.
pub fn reduce_vector(
    w: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    monoid: &Monoid,
    a: &Matrix,
    desc: &Descriptor,
) -> Result<()> {
    crate::config::context()?;
    if w.ncols() != 1 {
        return Err(Error::InvalidValue {
            what: "reduce_vector output must be single-column".into(),
        });
    }
    if !monoid.op.xtype.compatible_with(&a.typ) {
        return Err(Error::DomainMismatch {
            expected: monoid.op.xtype.code(),
            got: a.typ.code(),
        });
    }
    // rows must be the stored vectors for a per-row fold
    let want_rows = !desc.input0_transpose;
    let stored = if want_rows {
        transpose_to_orientation(a, false)?
    } else {
        transpose_to_orientation(a, true)?
    };
    let expected_len = if want_rows { a.nrows() } else { a.ncols() };
    if w.nrows() != expected_len {
        return Err(Error::DimensionMismatch {
            expected: (expected_len, 1),
            got: (w.nrows(), w.ncols()),
        });
    }

    let sp = convert::prepared(&stored)?;
    let sv = sp.sparse_view();
    let zcode = monoid.ztype().code();
    let zsize = monoid.ztype().size();
    let acode = sp.typ.code();

    let ranges = slicer::coarse_ranges(sv.p, slicer::task_count(sv.i.len().max(1)));
    let pieces: Vec<(Vec<i64>, Vec<u8>)> = ranges
        .into_par_iter()
        .map(|range| {
            let mut ti = Vec::new();
            let mut tx = Vec::new();
            let mut cast = vec![0u8; zsize];
            for k in range {
                let r = sv.range(k);
                if r.is_empty() {
                    continue;
                }
                let mut acc: Option<Vec<u8>> = None;
                for pos in r {
                    cast_bytes(zcode, &mut cast, acode, sv.val(pos));
                    match &mut acc {
                        None => acc = Some(cast.clone()),
                        Some(accv) => monoid.fold(accv, &cast),
                    }
                    if monoid.reached_terminal(acc.as_deref().unwrap_or(&[])) {
                        break;
                    }
                }
                ti.push(sv.outer(k) as i64);
                tx.extend_from_slice(&acc.unwrap());
            }
            (ti, tx)
        })
        .collect();

    let mut zi = Vec::new();
    let mut zx = Vec::new();
    for (ti, tx) in pieces {
        zi.extend_from_slice(&ti);
        zx.extend_from_slice(&tx);
    }
    let zp = vec![0usize, zi.len()];
    let z = Matrix::from_sparse_parts(
        monoid.ztype(),
        expected_len,
        1,
        true,
        zp,
        zi,
        zx,
        false,
    );
    mask::apply_mask_accum(
        w,
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
