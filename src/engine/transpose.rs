//! Transpose: logical reorientation and the physical bucket sort.
//!
//! Two distinct moves hide behind "transpose":
//!
//! - flipping the orientation flag swaps the meaning of stored vectors
//!   and is a free **logical** transpose;
//! - the **physical** transpose is a two-pass bucket sort by inner
//!   index — one pass to count, one pass to scatter — optionally fusing
//!   a typecast and a unary operator into the scatter so the values are
//!   touched exactly once.
//!
//! The engines use physical transposition to line orientations up before
//! a kernel runs; the public primitive is the logical form funneled
//! through the mask/accum protocol.

use crate::config::burble;
use crate::convert;
use crate::error::Result;
use crate::mask::{self, MaskSpec};
use crate::matrix::Matrix;
use crate::ops::{BinaryOp, UnaryOp};
use crate::types::{cast_bytes, Type};
use crate::Descriptor;

/// Physical transpose of the stored view, with optional fused unary op
/// and cast to `ztype`. Keeping the orientation flag makes the result
/// the logical transpose of `a`.
pub(crate) fn transpose_physical(
    a: &Matrix,
    op: Option<&UnaryOp>,
    ztype: Type,
) -> Result<Matrix> {
    let ap = convert::prepared(a)?;
    let av = ap.sparse_view();
    let esize_in = ap.esize();
    let esize_out = ztype.size();
    let new_vdim = ap.vlen;
    let new_vlen = ap.vdim;

    // pass 1: bucket counts by inner index
    let mut p = vec![0usize; new_vdim + 1];
    for &i in av.i {
        p[i as usize + 1] += 1;
    }
    for k in 0..new_vdim {
        p[k + 1] += p[k];
    }

    // iso survives when the fused op maps one value to one value
    let iso_out = ap.iso;
    let nvals = av.i.len();
    let mut i_out = vec![0i64; nvals];
    let mut x_out = vec![0u8; if iso_out { esize_out } else { nvals * esize_out }];
    if iso_out && nvals > 0 {
        write_value(&mut x_out[..esize_out], av.val(0), op, &ap.typ, ztype);
    }

    // pass 2: scatter; source order keeps each destination vector sorted
    let mut next = p.clone();
    for k in 0..av.nvec() {
        let j = av.outer(k);
        for pos in av.range(k) {
            let i = av.i[pos] as usize;
            let dst = next[i];
            next[i] += 1;
            i_out[dst] = j as i64;
            if !iso_out {
                write_value(
                    &mut x_out[dst * esize_out..(dst + 1) * esize_out],
                    av.val(pos),
                    op,
                    &ap.typ,
                    ztype,
                );
            }
        }
    }
    burble!("transpose: {} entries bucket-sorted", nvals);

    let mut t = Matrix::from_sparse_parts(
        ztype,
        new_vlen,
        new_vdim,
        ap.is_csc,
        p,
        i_out,
        x_out,
        iso_out,
    );
    t.sparsity_control = a.sparsity_control;
    Ok(t)
}

#[inline]
fn write_value(dst: &mut [u8], src: &[u8], op: Option<&UnaryOp>, from: &Type, to: Type) {
    match op {
        None => cast_bytes(to.code(), dst, from.code(), src),
        Some(f) => {
            let mut fx = vec![0u8; f.xtype.size()];
            cast_bytes(f.xtype.code(), &mut fx, from.code(), src);
            if f.ztype == to {
                f.apply(dst, &fx);
            } else {
                let mut fz = vec![0u8; f.ztype.size()];
                f.apply(&mut fz, &fx);
                cast_bytes(to.code(), dst, f.ztype.code(), &fz);
            }
        }
    }
}

/// The same logical matrix, stored in the requested orientation.
pub(crate) fn transpose_to_orientation(m: &Matrix, want_csc: bool) -> Result<Matrix> {
    if m.is_csc == want_csc {
        return Ok(m.clone());
    }
    // physically transposing the stored view and flipping the flag
    // leaves the logical content unchanged
    let mut t = transpose_physical(m, None, m.typ)?;
    t.is_csc = want_csc;
    Ok(t)
}

/// The logical transpose, free of data movement.
pub(crate) fn logical_transpose(a: &Matrix) -> Result<Matrix> {
    let mut t = convert::prepared(a)?.into_owned();
    t.is_csc = !t.is_csc;
    Ok(t)
}

/// `C⟨M⟩ = accum(C, A')` — or `accum(C, A)` when the descriptor already
/// transposes the input, the two cancelling out.
pub fn transpose(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    a: &Matrix,
    desc: &Descriptor,
) -> Result<()> {
    crate::config::context()?;
    let z = if desc.input0_transpose {
        convert::prepared(a)?.into_owned()
    } else {
        logical_transpose(a)?
    };
    if z.nrows() != c.nrows() || z.ncols() != c.ncols() {
        return Err(crate::error::Error::DimensionMismatch {
            expected: (c.nrows(), c.ncols()),
            got: (z.nrows(), z.ncols()),
        });
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::types::Scalar;

    fn setup() {
        config::init(Config::default()).ok();
    }

    fn mat(entries: &[(usize, usize, i32)], nrows: usize, ncols: usize) -> Matrix {
        let mut m = Matrix::new(Type::INT32, nrows, ncols).unwrap();
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
        let mut out: Vec<_> = r
            .into_iter()
            .zip(c)
            .zip(v)
            .map(|((i, j), s)| (i, j, s.as_i32()))
            .collect();
        out.sort_unstable_by_key(|&(i, j, _)| (i, j));
        out
    }

    #[test]
    fn test_transpose_moves_entries() {
        setup();
        let a = mat(&[(0, 2, 1), (1, 0, 2)], 2, 3);
        let mut c = Matrix::new(Type::INT32, 3, 2).unwrap();
        transpose(&mut c, None, None, &a, &Descriptor::default()).unwrap();
        assert_eq!(entries(&c), vec![(0, 1, 2), (2, 0, 1)]);
    }

    #[test]
    fn test_transpose_involution_is_bit_exact() {
        setup();
        let a = Matrix::random(Type::INT64, 12, 9, 0.3, 11).unwrap();
        let mut t = Matrix::new(Type::INT64, 9, 12).unwrap();
        transpose(&mut t, None, None, &a, &Descriptor::default()).unwrap();
        let mut back = Matrix::new(Type::INT64, 12, 9).unwrap();
        transpose(&mut back, None, None, &t, &Descriptor::default()).unwrap();
        assert_eq!(
            a.clone().extract_tuples().unwrap(),
            back.extract_tuples().unwrap()
        );
    }

    #[test]
    fn test_descriptor_transpose_cancels() {
        setup();
        let a = mat(&[(0, 1, 5)], 2, 2);
        let mut c = Matrix::new(Type::INT32, 2, 2).unwrap();
        let desc = Descriptor {
            input0_transpose: true,
            ..Descriptor::default()
        };
        transpose(&mut c, None, None, &a, &desc).unwrap();
        assert_eq!(entries(&c), vec![(0, 1, 5)]);
    }

    #[test]
    fn test_physical_reorientation_preserves_logical_content() {
        setup();
        let a = mat(&[(0, 2, 1), (1, 0, 2), (1, 2, 3)], 2, 3);
        let by_row = transpose_to_orientation(&a, false).unwrap();
        assert!(!by_row.by_col());
        assert_eq!(entries(&by_row), entries(&a));
        let round = transpose_to_orientation(&by_row, true).unwrap();
        assert_eq!(entries(&round), entries(&a));
    }

    #[test]
    fn test_fused_unary_and_cast() {
        setup();
        let a = mat(&[(0, 1, -5)], 2, 2);
        let ainv = UnaryOp::builtin(crate::ops::UnaryOpcode::Ainv, Type::INT32).unwrap();
        let t = transpose_physical(&a, Some(&ainv), Type::INT64).unwrap();
        assert_eq!(t.element_type(), Type::INT64);
        // stored (0, 1) lands at stored (1, 0): vector 0, inner index 1
        let view = t.sparse_view();
        assert_eq!(view.p, &[0, 1, 1]);
        assert_eq!(view.i, &[1i64]);
        let got = i64::from_le_bytes(view.val(0).try_into().unwrap());
        assert_eq!(got, 5);
    }

    #[test]
    fn test_iso_transpose_stays_iso() {
        setup();
        let mut a = Matrix::new(Type::INT32, 3, 3).unwrap();
        a.build(
            &[0, 1, 2],
            &[1, 2, 0],
            &[Scalar::Int32(4); 3].to_vec(),
            None,
        )
        .unwrap();
        assert!(a.is_iso());
        let t = transpose_physical(&a, None, Type::INT32).unwrap();
        assert!(t.is_iso());
    }
}
