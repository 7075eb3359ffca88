//! Kronecker product: `C⟨M⟩ = accum(C, A ⊗ B)` with
//! `C(ia·bm + ib, ja·bn + jb) = op(A(ia,ja), B(ib,jb))`.
//!
//! Every pair of an `A` entry and a `B` entry produces exactly one
//! output entry, so the output pattern is the direct product of the two
//! patterns and each output column `ja·bn + jb` is built from one
//! column of `A` and one of `B`.

use rayon::prelude::*;

use crate::config::burble;
use crate::convert;
use crate::error::{Error, Result};
use crate::mask::{self, MaskSpec};
use crate::matrix::Matrix;
use crate::ops::BinaryOp;
use crate::transpose::{logical_transpose, transpose_to_orientation};
use crate::types::cast_bytes;
use crate::Descriptor;

/// `C⟨M⟩ = accum(C, kron(op, A, B))`.
pub fn kronecker(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    op: &BinaryOp,
    a: &Matrix,
    b: &Matrix,
    desc: &Descriptor,
) -> Result<()> {
    crate::config::context()?;
    if !op.xtype.compatible_with(&a.typ) || !op.ytype.compatible_with(&b.typ) {
        return Err(Error::DomainMismatch {
            expected: op.xtype.code(),
            got: a.typ.code(),
        });
    }
    let a_eff = effective(a, desc.input0_transpose)?;
    let b_eff = effective(b, desc.input1_transpose)?;
    let (am, an) = (a_eff.nrows(), a_eff.ncols());
    let (bm, bn) = (b_eff.nrows(), b_eff.ncols());
    if c.nrows() != am * bm || c.ncols() != an * bn {
        return Err(Error::DimensionMismatch {
            expected: (am * bm, an * bn),
            got: (c.nrows(), c.ncols()),
        });
    }

    let av = a_eff.sparse_view();
    let bv = b_eff.sparse_view();
    let ztype = op.ztype;
    let zsize = ztype.size();
    let acode = a_eff.typ.code();
    let bcode = b_eff.typ.code();

    // one output column per (A column, B column) pair; parallel over
    // the A columns, each owning a contiguous block of output columns
    let pieces: Vec<(Vec<(usize, usize)>, Vec<i64>, Vec<u8>)> = (0..av.nvec())
        .into_par_iter()
        .map(|ka| {
            let ja = av.outer(ka);
            let arange = av.range(ka);
            let mut cols = Vec::new();
            let mut ti: Vec<i64> = Vec::new();
            let mut tx: Vec<u8> = Vec::new();
            let mut xa = vec![0u8; op.xtype.size()];
            let mut yb = vec![0u8; op.ytype.size()];
            let mut zt = vec![0u8; op.ztype.size()];
            for kb in 0..bv.nvec() {
                let jb = bv.outer(kb);
                let j_out = ja * bn + jb;
                let before = ti.len();
                for apos in arange.clone() {
                    let ia = av.i[apos] as usize;
                    cast_bytes(op.xtype.code(), &mut xa, acode, av.val(apos));
                    for bpos in bv.range(kb) {
                        let ib = bv.i[bpos] as usize;
                        cast_bytes(op.ytype.code(), &mut yb, bcode, bv.val(bpos));
                        op.apply(&mut zt, &xa, &yb);
                        ti.push((ia * bm + ib) as i64);
                        tx.extend_from_slice(&zt);
                    }
                }
                // entries arrive grouped by ia then ib, already sorted
                cols.push((j_out, ti.len() - before));
            }
            (cols, ti, tx)
        })
        .collect();

    let n_out = an * bn;
    let mut p = vec![0usize; n_out + 1];
    for (cols, _, _) in &pieces {
        for &(j, count) in cols {
            p[j + 1] = count;
        }
    }
    for k in 0..n_out {
        p[k + 1] += p[k];
    }
    let mut zi = Vec::with_capacity(p[n_out]);
    let mut zx = Vec::with_capacity(p[n_out] * zsize);
    for (_, ti, tx) in pieces {
        zi.extend_from_slice(&ti);
        zx.extend_from_slice(&tx);
    }
    burble!("kronecker: {} entries", zi.len());

    let z = Matrix::from_sparse_parts(ztype, am * bm, n_out, true, p, zi, zx, false);
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

fn effective(m: &Matrix, transposed: bool) -> Result<Matrix> {
    let oriented = if transposed {
        let lt = logical_transpose(m)?;
        transpose_to_orientation(&lt, true)?
    } else {
        transpose_to_orientation(m, true)?
    };
    Ok(convert::prepared(&oriented)?.into_owned())
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

    #[test]
    fn test_kronecker_identity_pattern() {
        setup();
        // I2 ⊗ B scatters B along the block diagonal
        let mut i2 = Matrix::new(Type::INT32, 2, 2).unwrap();
        i2.build(&[0, 1], &[0, 1], &[Scalar::Int32(1); 2].to_vec(), None)
            .unwrap();
        let mut b = Matrix::new(Type::INT32, 2, 2).unwrap();
        b.build(
            &[0, 1],
            &[1, 0],
            &[Scalar::Int32(5), Scalar::Int32(7)],
            None,
        )
        .unwrap();
        let times = BinaryOp::builtin(BinaryOpcode::Times, Type::INT32).unwrap();
        let mut c = Matrix::new(Type::INT32, 4, 4).unwrap();
        kronecker(&mut c, None, None, &times, &i2, &b, &Descriptor::default()).unwrap();
        let (rows, cols, vals) = c.extract_tuples().unwrap();
        let mut got: Vec<_> = rows
            .into_iter()
            .zip(cols)
            .zip(vals)
            .map(|((r, c), v)| (r, c, v.as_i32()))
            .collect();
        got.sort_unstable_by_key(|&(r, c, _)| (r, c));
        assert_eq!(
            got,
            vec![(0, 1, 5), (1, 0, 7), (2, 3, 5), (3, 2, 7)]
        );
    }

    #[test]
    fn test_kronecker_shape_check() {
        setup();
        let a = Matrix::new(Type::INT32, 2, 2).unwrap();
        let b = Matrix::new(Type::INT32, 3, 3).unwrap();
        let times = BinaryOp::builtin(BinaryOpcode::Times, Type::INT32).unwrap();
        let mut c = Matrix::new(Type::INT32, 5, 5).unwrap();
        assert!(matches!(
            kronecker(&mut c, None, None, &times, &a, &b, &Descriptor::default()),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
