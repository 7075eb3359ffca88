//! Format transitions and the conformer.
//!
//! Conversions are pure: the logical `{(i, j, v)}` set never changes,
//! only its physical layout. After any mutating primitive the engine
//! calls [`conform`], which picks the best allowed format:
//!
//! 1. full, when fully dense;
//! 2. bitmap, when density reaches the matrix's `bitmap_switch`;
//! 3. hypersparse, when the fraction of non-empty vectors is at or below
//!    `hyper_switch`;
//! 4. sparse otherwise.
//!
//! The sparsity-control bitmask restricts which of those are eligible;
//! it is advisory in the sense that a matrix whose only allowed format
//! cannot represent it (full, with missing entries) keeps its current
//! format.

use std::borrow::Cow;

use crate::config::burble;
use crate::error::{Error, Result};
use crate::matrix::{sparsity, Format, Matrix, Store};

/// Number of non-empty vectors, computed lazily and cached.
pub(crate) fn nvec_nonempty(m: &mut Matrix) -> usize {
    if let Some(n) = m.nvec_nonempty {
        return n;
    }
    let n = match &m.store {
        Store::Sparse { p, .. } | Store::Hyper { p, .. } => {
            p.windows(2).filter(|w| w[1] > w[0]).count()
        }
        Store::Bitmap { b, .. } => (0..m.vdim)
            .filter(|&k| b[k * m.vlen..(k + 1) * m.vlen].iter().any(|&bit| bit != 0))
            .count(),
        Store::Full { .. } => {
            if m.vlen == 0 {
                0
            } else {
                m.vdim
            }
        }
    };
    m.nvec_nonempty = Some(n);
    n
}

// ============================================================================
// CONVERSIONS
// ============================================================================

/// Convert to sparse storage (full offset array).
pub(crate) fn to_sparse(m: &mut Matrix) -> Result<()> {
    if matches!(m.store, Store::Sparse { .. }) {
        return Ok(());
    }
    let esize = m.esize();
    let old = std::mem::replace(&mut m.store, Store::Full { x: Vec::new() });
    m.store = match old {
        Store::Sparse { .. } => unreachable!(),
        Store::Hyper { p, h, i, x } => {
            let mut np = vec![0usize; m.vdim + 1];
            for (k, &j) in h.iter().enumerate() {
                np[j + 1] = p[k + 1] - p[k];
            }
            for k in 0..m.vdim {
                np[k + 1] += np[k];
            }
            Store::Sparse { p: np, i, x }
        }
        Store::Bitmap { b, x, .. } => {
            let mut p = vec![0usize; m.vdim + 1];
            let mut i: Vec<i64> = Vec::new();
            let mut nx: Vec<u8> = Vec::new();
            for outer in 0..m.vdim {
                for inner in 0..m.vlen {
                    let pos = outer * m.vlen + inner;
                    if b[pos] != 0 {
                        i.push(inner as i64);
                        if !m.iso {
                            nx.extend_from_slice(&x[pos * esize..(pos + 1) * esize]);
                        }
                    }
                }
                p[outer + 1] = i.len();
            }
            if m.iso {
                nx = x[..esize.min(x.len())].to_vec();
            }
            Store::Sparse { p, i, x: nx }
        }
        Store::Full { x } => {
            let mut p = vec![0usize; m.vdim + 1];
            let mut i: Vec<i64> = Vec::with_capacity(m.vlen * m.vdim);
            for outer in 0..m.vdim {
                for inner in 0..m.vlen {
                    i.push(inner as i64);
                }
                p[outer + 1] = i.len();
            }
            Store::Sparse { p, i, x }
        }
    };
    Ok(())
}

/// Convert to hypersparse storage (empty vectors dropped).
pub(crate) fn to_hyper(m: &mut Matrix) -> Result<()> {
    match m.format() {
        Format::Hypersparse => return Ok(()),
        Format::Sparse => {}
        _ => to_sparse(m)?,
    }
    let old = std::mem::replace(&mut m.store, Store::Full { x: Vec::new() });
    m.store = match old {
        Store::Sparse { p, i, x } => {
            let mut h = Vec::new();
            let mut np = vec![0usize];
            for k in 0..m.vdim {
                if p[k + 1] > p[k] {
                    h.push(k);
                    np.push(p[k + 1]);
                }
            }
            Store::Hyper { p: np, h, i, x }
        }
        other => other,
    };
    Ok(())
}

/// Convert to bitmap storage. The matrix must be finalized.
pub(crate) fn to_bitmap(m: &mut Matrix) -> Result<()> {
    if !m.is_finalized() {
        return Err(Error::Internal {
            what: "bitmap conversion on a matrix with deferred work",
        });
    }
    let esize = m.esize();
    let cells = m.vlen * m.vdim;
    match m.format() {
        Format::Bitmap => Ok(()),
        Format::Full => {
            let old = std::mem::replace(&mut m.store, Store::Full { x: Vec::new() });
            if let Store::Full { x } = old {
                m.store = Store::Bitmap {
                    b: vec![1u8; cells],
                    x,
                    nvals: cells,
                };
            }
            Ok(())
        }
        Format::Sparse | Format::Hypersparse => {
            let (b, x, nvals) = {
                let view = m.sparse_view();
                let mut b = vec![0u8; cells];
                let mut x = vec![0u8; if m.iso { esize } else { cells * esize }];
                if m.iso && !view.x.is_empty() {
                    x.copy_from_slice(view.val(0));
                }
                let mut nvals = 0usize;
                for k in 0..view.nvec() {
                    let j = view.outer(k);
                    for pos in view.range(k) {
                        let cell = j * m.vlen + view.i[pos] as usize;
                        b[cell] = 1;
                        if !m.iso {
                            x[cell * esize..(cell + 1) * esize].copy_from_slice(view.val(pos));
                        }
                        nvals += 1;
                    }
                }
                (b, x, nvals)
            };
            m.store = Store::Bitmap { b, x, nvals };
            Ok(())
        }
    }
}

/// Convert to full storage. Allowed only when every cell is present.
pub(crate) fn to_full(m: &mut Matrix) -> Result<()> {
    if !m.is_finalized() {
        return Err(Error::Internal {
            what: "full conversion on a matrix with deferred work",
        });
    }
    if m.nvals_stored() != m.vlen * m.vdim {
        return Err(Error::InvalidObject {
            what: "full storage requires every cell present".into(),
        });
    }
    match m.format() {
        Format::Full => Ok(()),
        Format::Bitmap => {
            let old = std::mem::replace(&mut m.store, Store::Full { x: Vec::new() });
            if let Store::Bitmap { x, .. } = old {
                m.store = Store::Full { x };
            }
            Ok(())
        }
        _ => {
            to_bitmap(m)?;
            to_full(m)
        }
    }
}

// ============================================================================
// CONFORM
// ============================================================================

/// Settle the matrix into the best format its controls allow. Called
/// after every mutating primitive; matrices with deferred work keep
/// their sparse form untouched.
pub(crate) fn conform(m: &mut Matrix) -> Result<()> {
    if !m.is_finalized() {
        return Ok(());
    }
    let cells = m.vlen * m.vdim;
    let nvals = m.nvals_stored();
    let control = m.sparsity_control;
    let before = m.format();

    let want = if control & sparsity::FULL != 0 && cells > 0 && nvals == cells {
        Format::Full
    } else if control & sparsity::BITMAP != 0
        && cells > 0
        && (nvals as f64 / cells as f64) >= m.bitmap_switch
    {
        Format::Bitmap
    } else if control & sparsity::HYPERSPARSE != 0
        && m.vdim > 0
        && (control & sparsity::SPARSE == 0
            || (nvec_nonempty(m) as f64) <= m.hyper_switch * m.vdim as f64)
    {
        Format::Hypersparse
    } else if control & sparsity::SPARSE != 0 {
        Format::Sparse
    } else if control & sparsity::BITMAP != 0 && cells > 0 {
        Format::Bitmap
    } else {
        // nothing the control names can represent this matrix
        before
    };

    if want != before {
        match want {
            Format::Sparse => to_sparse(m)?,
            Format::Hypersparse => to_hyper(m)?,
            Format::Bitmap => to_bitmap(m)?,
            Format::Full => to_full(m)?,
        }
        burble!("conform: {:?} -> {:?} ({} entries)", before, want, nvals);
    }
    Ok(())
}

// ============================================================================
// KERNEL INPUT PREPARATION
// ============================================================================

/// Borrow `m` if it is already finalized sparse/hypersparse; otherwise
/// produce a finalized sparse copy. Compute kernels consume only the
/// sparse forms, so dense inputs pass through here on the way in.
pub(crate) fn prepared(m: &Matrix) -> Result<Cow<'_, Matrix>> {
    if m.is_finalized()
        && matches!(m.format(), Format::Sparse | Format::Hypersparse)
    {
        return Ok(Cow::Borrowed(m));
    }
    let mut own = m.clone();
    own.wait()?;
    if !matches!(own.format(), Format::Sparse | Format::Hypersparse) {
        to_sparse(&mut own)?;
    }
    Ok(Cow::Owned(own))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::types::{Scalar, Type};

    fn setup() {
        config::init(Config::default()).ok();
    }

    fn tuples(m: &Matrix) -> (Vec<usize>, Vec<usize>, Vec<Scalar>) {
        m.clone().extract_tuples().unwrap()
    }

    #[test]
    fn test_format_invariance() {
        setup();
        let mut m = Matrix::random(Type::INT32, 8, 8, 0.25, 7).unwrap();
        m.wait().unwrap();
        let reference = tuples(&m);
        for _ in 0..2 {
            to_hyper(&mut m).unwrap();
            assert_eq!(m.format(), Format::Hypersparse);
            assert_eq!(tuples(&m), reference);
            to_bitmap(&mut m).unwrap();
            assert_eq!(m.format(), Format::Bitmap);
            assert_eq!(tuples(&m), reference);
            to_sparse(&mut m).unwrap();
            assert_eq!(m.format(), Format::Sparse);
            assert_eq!(tuples(&m), reference);
        }
    }

    #[test]
    fn test_full_requires_density() {
        setup();
        let mut m = Matrix::new(Type::INT32, 2, 2).unwrap();
        m.set_element(0, 0, Scalar::Int32(1)).unwrap();
        m.wait().unwrap();
        assert!(to_full(&mut m).is_err());
        for (r, c) in [(0, 1), (1, 0), (1, 1)] {
            m.set_element(r, c, Scalar::Int32(2)).unwrap();
        }
        m.wait().unwrap();
        to_full(&mut m).unwrap();
        assert_eq!(m.format(), Format::Full);
        assert_eq!(tuples(&m).0.len(), 4);
    }

    #[test]
    fn test_conform_prefers_full_when_dense() {
        setup();
        let mut m = Matrix::new(Type::INT32, 2, 2).unwrap();
        for r in 0..2 {
            for c in 0..2 {
                m.set_element(r, c, Scalar::Int32(1)).unwrap();
            }
        }
        m.wait().unwrap();
        assert_eq!(m.format(), Format::Full);
    }

    #[test]
    fn test_conform_hypersparse_when_mostly_empty() {
        setup();
        let mut m = Matrix::new(Type::INT32, 100, 100).unwrap();
        m.set_element(3, 7, Scalar::Int32(1)).unwrap();
        m.wait().unwrap();
        // 1 non-empty vector out of 100 is well under the default switch
        assert_eq!(m.format(), Format::Hypersparse);
        assert_eq!(tuples(&m).0, vec![3]);
    }

    #[test]
    fn test_sparsity_control_restricts() {
        setup();
        let mut m = Matrix::new(Type::INT32, 100, 100).unwrap();
        m.set_element(3, 7, Scalar::Int32(1)).unwrap();
        m.wait().unwrap();
        m.set_sparsity_control(sparsity::SPARSE).unwrap();
        assert_eq!(m.format(), Format::Sparse);
    }

    #[test]
    fn test_prepared_borrows_when_clean() {
        setup();
        let mut m = Matrix::new(Type::INT32, 4, 4).unwrap();
        m.set_element(1, 1, Scalar::Int32(1)).unwrap();
        m.wait().unwrap();
        to_sparse(&mut m).unwrap();
        assert!(matches!(prepared(&m).unwrap(), Cow::Borrowed(_)));

        let mut dirty = Matrix::new(Type::INT32, 4, 4).unwrap();
        dirty.set_element(1, 1, Scalar::Int32(1)).unwrap();
        if dirty.pending.is_some() {
            assert!(matches!(prepared(&dirty).unwrap(), Cow::Owned(_)));
        }
    }
}
