//! Assign and subassign: `C(I,J)⟨M⟩ = accum(C(I,J), A)` for index
//! lists `I`, `J` and a matrix or scalar source.
//!
//! The two primitives differ only in what the mask covers and how far
//! `replace` reaches:
//!
//! - **assign**: the mask is the shape of `C`; with `replace`, entries
//!   of `C` anywhere the mask is false are deleted, even outside the
//!   `(I,J)` region.
//! - **subassign**: the mask is the shape of the region `|I|×|J|`, and
//!   `replace` cannot touch anything outside the region.
//!
//! Inside the region both follow the standard accumulation protocol
//! cell by cell. Index lists must not contain duplicates — the result
//! would depend on evaluation order.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::config::burble;
use crate::convert;
use crate::error::{Error, Result};
use crate::mask::MaskSpec;
use crate::matrix::{Matrix, SparseView, Store};
use crate::ops::BinaryOp;
use crate::slicer;
use crate::transpose::transpose_to_orientation;
use crate::types::{cast_bytes, Scalar, TypeCode};
use crate::Descriptor;

// ============================================================================
// INDEX LISTS
// ============================================================================

/// A selection of row or column indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexList {
    /// Every index of the dimension, in order.
    All,
    /// A half-open contiguous range.
    Range(usize, usize),
    /// Explicit indices; order matters, duplicates are rejected.
    List(Vec<usize>),
}

impl IndexList {
    /// Materialize against a dimension bound, validating every index.
    pub(crate) fn resolve(&self, bound: usize) -> Result<Vec<usize>> {
        match self {
            IndexList::All => Ok((0..bound).collect()),
            IndexList::Range(start, end) => {
                if start > end || *end > bound {
                    return Err(Error::IndexOutOfBounds {
                        index: *end,
                        bound,
                    });
                }
                Ok((*start..*end).collect())
            }
            IndexList::List(list) => {
                for &ix in list {
                    if ix >= bound {
                        return Err(Error::IndexOutOfBounds { index: ix, bound });
                    }
                }
                let mut sorted = list.clone();
                sorted.sort_unstable();
                if sorted.windows(2).any(|w| w[0] == w[1]) {
                    return Err(Error::InvalidValue {
                        what: "duplicate indices in assign list".into(),
                    });
                }
                Ok(list.clone())
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum AssignKind {
    Assign,
    Subassign,
}

enum Src<'a> {
    Matrix(&'a Matrix),
    Scalar(Vec<u8>),
}

// ============================================================================
// PUBLIC PRIMITIVES
// ============================================================================

/// `C⟨M⟩(I,J) = accum(C(I,J), A)` with the mask shaped like `C`.
pub fn assign(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    a: &Matrix,
    rows: &IndexList,
    cols: &IndexList,
    desc: &Descriptor,
) -> Result<()> {
    assign_common(c, mask, accum, Src::Matrix(a), rows, cols, desc, AssignKind::Assign)
}

/// `C⟨M⟩(I,J) = accum(C(I,J), v)` broadcasting one scalar.
pub fn assign_scalar(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    v: Scalar,
    rows: &IndexList,
    cols: &IndexList,
    desc: &Descriptor,
) -> Result<()> {
    if c.element_type().code() == TypeCode::User {
        return Err(Error::DomainMismatch {
            expected: TypeCode::User,
            got: v.code(),
        });
    }
    let bytes = v.cast(c.element_type().code()).to_bytes();
    assign_common(
        c,
        mask,
        accum,
        Src::Scalar(bytes),
        rows,
        cols,
        desc,
        AssignKind::Assign,
    )
}

/// `C(I,J)⟨M⟩ = accum(C(I,J), A)` with the mask shaped like the region.
pub fn subassign(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    a: &Matrix,
    rows: &IndexList,
    cols: &IndexList,
    desc: &Descriptor,
) -> Result<()> {
    assign_common(
        c,
        mask,
        accum,
        Src::Matrix(a),
        rows,
        cols,
        desc,
        AssignKind::Subassign,
    )
}

/// Scalar form of [`subassign`].
pub fn subassign_scalar(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    v: Scalar,
    rows: &IndexList,
    cols: &IndexList,
    desc: &Descriptor,
) -> Result<()> {
    if c.element_type().code() == TypeCode::User {
        return Err(Error::DomainMismatch {
            expected: TypeCode::User,
            got: v.code(),
        });
    }
    let bytes = v.cast(c.element_type().code()).to_bytes();
    assign_common(
        c,
        mask,
        accum,
        Src::Scalar(bytes),
        rows,
        cols,
        desc,
        AssignKind::Subassign,
    )
}

// ============================================================================
// IMPLEMENTATION
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn assign_common(
    c: &mut Matrix,
    mask: Option<&Matrix>,
    accum: Option<&BinaryOp>,
    src: Src<'_>,
    rows: &IndexList,
    cols: &IndexList,
    desc: &Descriptor,
    kind: AssignKind,
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
    let row_list = rows.resolve(c.nrows())?;
    let col_list = cols.resolve(c.ncols())?;

    // the source, oriented like C, possibly transposed by the descriptor
    let a_eff = match &src {
        Src::Matrix(a) => {
            let oriented = if desc.input0_transpose {
                let lt = crate::transpose::logical_transpose(a)?;
                transpose_to_orientation(&lt, c.is_csc)?
            } else {
                transpose_to_orientation(a, c.is_csc)?
            };
            let prepared = convert::prepared(&oriented)?.into_owned();
            if prepared.nrows() != row_list.len() || prepared.ncols() != col_list.len() {
                return Err(Error::DimensionMismatch {
                    expected: (row_list.len(), col_list.len()),
                    got: (prepared.nrows(), prepared.ncols()),
                });
            }
            if !c.element_type().compatible_with(&prepared.element_type()) {
                return Err(Error::DomainMismatch {
                    expected: c.element_type().code(),
                    got: prepared.element_type().code(),
                });
            }
            Some(prepared)
        }
        Src::Scalar(_) => None,
    };

    // the mask, oriented like C; its logical shape depends on the kind
    let mask_eff = match mask {
        Some(m) => {
            let (want_r, want_c) = match kind {
                AssignKind::Assign => (c.nrows(), c.ncols()),
                AssignKind::Subassign => (row_list.len(), col_list.len()),
            };
            if m.nrows() != want_r || m.ncols() != want_c {
                return Err(Error::DimensionMismatch {
                    expected: (want_r, want_c),
                    got: (m.nrows(), m.ncols()),
                });
            }
            Some(convert::prepared(&transpose_to_orientation(m, c.is_csc)?)?.into_owned())
        }
        None => None,
    };

    // map logical (rows, cols) onto stored (inner, outer)
    let (inner_list, outer_list) = if c.is_csc {
        (row_list, col_list)
    } else {
        (col_list, row_list)
    };
    let inner_map: HashMap<usize, usize> = inner_list
        .iter()
        .enumerate()
        .map(|(pos, &ix)| (ix, pos))
        .collect();
    let outer_map: HashMap<usize, usize> = outer_list
        .iter()
        .enumerate()
        .map(|(pos, &ix)| (ix, pos))
        .collect();

    c.wait()?;
    convert::to_sparse(c)?;
    let ctype = c.typ;
    let esize = ctype.size();
    let cv = c.sparse_view();
    let av = a_eff.as_ref().map(|a| a.sparse_view());
    let atype = a_eff.as_ref().map(|a| a.typ);
    let mv = mask_eff.as_ref().map(|m| m.sparse_view());
    let mcode = mask.map(|m| m.element_type().code()).unwrap_or(TypeCode::Bool);
    let spec = MaskSpec {
        comp: desc.mask_comp,
        structural: desc.mask_struct,
    };
    let replace = desc.output_replace;
    let vdim = c.vdim;
    let scalar_bytes = match &src {
        Src::Scalar(b) => Some(b.clone()),
        Src::Matrix(_) => None,
    };

    let ranges = slicer::coarse_ranges(cv.p, slicer::task_count(cv.i.len().max(1)));
    // extend the last range over all vectors so region columns in empty
    // tails are still visited
    let ranges = if ranges.is_empty() {
        vec![0..vdim]
    } else {
        ranges
    };

    let pieces: Vec<(Vec<usize>, Vec<i64>, Vec<u8>)> = ranges
        .clone()
        .into_par_iter()
        .map(|range| {
            let mut counts = Vec::with_capacity(range.len());
            let mut ri: Vec<i64> = Vec::new();
            let mut rx: Vec<u8> = Vec::new();
            let mut scratch = AccumScratch::new(accum);
            for j in range {
                let before = ri.len();
                let jj = outer_map.get(&j).copied();

                // gather the source entries of this region column,
                // mapped to target inner indices and sorted
                let mut incoming: Vec<(i64, SrcVal)> = Vec::new();
                if let Some(jj) = jj {
                    match (&av, &scalar_bytes) {
                        (Some(a), _) => {
                            for pos in a.range_of_outer(jj) {
                                let ii = a.i[pos] as usize;
                                incoming.push((inner_list[ii] as i64, SrcVal::At(pos)));
                            }
                        }
                        (None, Some(_)) => {
                            for &target in &inner_list {
                                incoming.push((target as i64, SrcVal::Broadcast));
                            }
                        }
                        (None, None) => unreachable!(),
                    }
                    incoming.sort_unstable_by_key(|&(t, _)| t);
                }

                let crange = cv.range_of_outer(j);
                let mut cp = crange.start;
                let mut sp = 0usize;
                while cp < crange.end || sp < incoming.len() {
                    let ci = if cp < crange.end { cv.i[cp] } else { i64::MAX };
                    let si = if sp < incoming.len() {
                        incoming[sp].0
                    } else {
                        i64::MAX
                    };
                    let inner = ci.min(si);
                    let c_here = ci == inner;
                    let s_here = si == inner;
                    let in_region = jj.is_some() && inner_map.contains_key(&(inner as usize));

                    let admitted = mask_admitted(
                        &mv,
                        mcode,
                        spec,
                        kind,
                        inner as usize,
                        j,
                        &inner_map,
                        jj,
                    );

                    if !in_region {
                        // untouched territory; assign-with-replace may
                        // still clear it where the mask says no
                        let keep = match kind {
                            AssignKind::Assign => !(replace && !admitted),
                            AssignKind::Subassign => true,
                        };
                        if c_here && keep {
                            ri.push(inner);
                            rx.extend_from_slice(cv.val(cp));
                        }
                    } else if !admitted {
                        if c_here && !replace {
                            ri.push(inner);
                            rx.extend_from_slice(cv.val(cp));
                        }
                    } else {
                        // resolve the source bytes and their type code
                        let sval: Option<(&[u8], TypeCode)> = if s_here {
                            Some(match incoming[sp].1 {
                                SrcVal::At(pos) => (
                                    av.as_ref().unwrap().val(pos),
                                    atype.unwrap().code(),
                                ),
                                SrcVal::Broadcast => (
                                    scalar_bytes.as_ref().unwrap().as_slice(),
                                    ctype.code(),
                                ),
                            })
                        } else {
                            None
                        };
                        match (accum, c_here, sval) {
                            (None, _, Some((sb, scode))) => {
                                ri.push(inner);
                                let at = rx.len();
                                rx.resize(at + esize, 0);
                                cast_bytes(ctype.code(), &mut rx[at..], scode, sb);
                            }
                            (None, _, None) => {
                                // inside the region with no source entry:
                                // the cell is overwritten by absence
                            }
                            (Some(acc), true, Some((sb, scode))) => {
                                ri.push(inner);
                                scratch.fold(&mut rx, esize, acc, cv.val(cp), ctype.code(), sb, scode);
                            }
                            (Some(_), false, Some((sb, scode))) => {
                                ri.push(inner);
                                let at = rx.len();
                                rx.resize(at + esize, 0);
                                cast_bytes(ctype.code(), &mut rx[at..], scode, sb);
                            }
                            (Some(_), true, None) => {
                                ri.push(inner);
                                rx.extend_from_slice(cv.val(cp));
                            }
                            (Some(_), false, None) => {}
                        }
                    }
                    if c_here {
                        cp += 1;
                    }
                    if s_here {
                        sp += 1;
                    }
                }
                counts.push(ri.len() - before);
            }
            (counts, ri, rx)
        })
        .collect();

    // stitch into C
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
    burble!("{:?}: region {}x{} written", kind, inner_list.len(), outer_list.len());

    c.store = Store::Sparse { p, i, x };
    c.iso = false;
    c.nvec_nonempty = None;
    convert::conform(c)
}

#[derive(Clone, Copy)]
enum SrcVal {
    At(usize),
    Broadcast,
}

/// Scratch buffers for the accumulate fold inside the merge loop.
struct AccumScratch {
    xa: Vec<u8>,
    yb: Vec<u8>,
    zt: Vec<u8>,
}

impl AccumScratch {
    fn new(accum: Option<&BinaryOp>) -> AccumScratch {
        match accum {
            Some(acc) => AccumScratch {
                xa: vec![0u8; acc.xtype.size()],
                yb: vec![0u8; acc.ytype.size()],
                zt: vec![0u8; acc.ztype.size()],
            },
            None => AccumScratch {
                xa: Vec::new(),
                yb: Vec::new(),
                zt: Vec::new(),
            },
        }
    }

    /// `rx <- rx ++ cast(accum(cast(cval), cast(sbytes)))`.
    #[allow(clippy::too_many_arguments)]
    fn fold(
        &mut self,
        rx: &mut Vec<u8>,
        esize: usize,
        acc: &BinaryOp,
        cval: &[u8],
        ccode: TypeCode,
        sbytes: &[u8],
        scode: TypeCode,
    ) {
        cast_bytes(acc.xtype.code(), &mut self.xa, ccode, cval);
        cast_bytes(acc.ytype.code(), &mut self.yb, scode, sbytes);
        acc.apply(&mut self.zt, &self.xa, &self.yb);
        let at = rx.len();
        rx.resize(at + esize, 0);
        cast_bytes(ccode, &mut rx[at..], acc.ztype.code(), &self.zt);
    }
}

#[allow(clippy::too_many_arguments)]
fn mask_admitted(
    mv: &Option<SparseView<'_>>,
    mcode: TypeCode,
    spec: MaskSpec,
    kind: AssignKind,
    inner: usize,
    outer: usize,
    inner_map: &HashMap<usize, usize>,
    jj: Option<usize>,
) -> bool {
    let Some(m) = mv else {
        // no mask: everything is admitted, unless the caller asked for
        // the complement of that
        return !spec.comp;
    };
    // assign masks live in C space; subassign masks in region space
    let (mi, mo) = match kind {
        AssignKind::Assign => (inner as i64, outer),
        AssignKind::Subassign => {
            let Some(ii) = inner_map.get(&inner) else {
                return !spec.comp;
            };
            let Some(jj) = jj else {
                return !spec.comp;
            };
            (*ii as i64, jj)
        }
    };
    let range = m.range_of_outer(mo);
    let present = match m.i[range.clone()].binary_search(&mi) {
        Ok(off) => {
            if spec.structural {
                true
            } else {
                Scalar::read(mcode, m.val(range.start + off)).as_bool()
            }
        }
        Err(_) => false,
    };
    present != spec.comp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::ops::BinaryOpcode;
    use crate::types::Type;

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
    fn test_assign_matrix_into_region() {
        setup();
        let mut c = mat(&[(0, 0, 1), (3, 3, 9)], 4, 4);
        let a = mat(&[(0, 0, 50), (1, 1, 60)], 2, 2);
        assign(
            &mut c,
            None,
            None,
            &a,
            &IndexList::List(vec![1, 2]),
            &IndexList::List(vec![1, 2]),
            &Descriptor::default(),
        )
        .unwrap();
        assert_eq!(
            entries(&c),
            vec![(0, 0, 1), (1, 1, 50), (2, 2, 60), (3, 3, 9)]
        );
    }

    #[test]
    fn test_assign_clears_region_cells_without_source() {
        setup();
        let mut c = mat(&[(1, 1, 7), (0, 0, 1)], 3, 3);
        let a = mat(&[], 2, 2);
        assign(
            &mut c,
            None,
            None,
            &a,
            &IndexList::Range(1, 3),
            &IndexList::Range(1, 3),
            &Descriptor::default(),
        )
        .unwrap();
        // (1,1) was inside the region and the source had nothing there
        assert_eq!(entries(&c), vec![(0, 0, 1)]);
    }

    #[test]
    fn test_assign_scalar_broadcast() {
        setup();
        let mut c = Matrix::new(Type::INT32, 3, 3).unwrap();
        assign_scalar(
            &mut c,
            None,
            None,
            Scalar::Int32(5),
            &IndexList::List(vec![0, 2]),
            &IndexList::All,
            &Descriptor::default(),
        )
        .unwrap();
        assert_eq!(c.nvals().unwrap(), 6);
        assert_eq!(c.extract_element(2, 1).unwrap(), Some(Scalar::Int32(5)));
        assert_eq!(c.extract_element(1, 1).unwrap(), None);
    }

    #[test]
    fn test_assign_with_accum_folds() {
        setup();
        let mut c = mat(&[(0, 0, 10)], 2, 2);
        let plus = BinaryOp::builtin(BinaryOpcode::Plus, Type::INT32).unwrap();
        assign_scalar(
            &mut c,
            None,
            Some(&plus),
            Scalar::Int32(1),
            &IndexList::All,
            &IndexList::All,
            &Descriptor::default(),
        )
        .unwrap();
        assert_eq!(
            entries(&c),
            vec![(0, 0, 11), (0, 1, 1), (1, 0, 1), (1, 1, 1)]
        );
    }

    #[test]
    fn test_subassign_mask_is_region_shaped() {
        setup();
        let mut c = Matrix::new(Type::INT32, 4, 4).unwrap();
        // region mask: admit only region cell (0, 0) -> C(2, 2)
        let m = mat(&[(0, 0, 1)], 2, 2);
        subassign_scalar(
            &mut c,
            Some(&m),
            None,
            Scalar::Int32(8),
            &IndexList::List(vec![2, 3]),
            &IndexList::List(vec![2, 3]),
            &Descriptor::default(),
        )
        .unwrap();
        assert_eq!(entries(&c), vec![(2, 2, 8)]);
    }

    #[test]
    fn test_assign_replace_reaches_outside_region() {
        setup();
        let mut c = mat(&[(0, 0, 1), (3, 3, 2)], 4, 4);
        // C-shaped mask admitting only column 0
        let m = mat(&[(0, 0, 1), (1, 0, 1), (2, 0, 1), (3, 0, 1)], 4, 4);
        let a = mat(&[(0, 0, 42)], 1, 1);
        let desc = Descriptor {
            output_replace: true,
            ..Descriptor::default()
        };
        assign(
            &mut c,
            Some(&m),
            None,
            &a,
            &IndexList::List(vec![0]),
            &IndexList::List(vec![0]),
            &desc,
        )
        .unwrap();
        // (3,3) is outside the region but the mask is false there and
        // replace is set, so it is gone
        assert_eq!(entries(&c), vec![(0, 0, 42)]);
    }

    #[test]
    fn test_subassign_replace_stays_inside_region() {
        setup();
        let mut c = mat(&[(0, 0, 1), (3, 3, 2)], 4, 4);
        let m = mat(&[(0, 0, 1)], 1, 1);
        let a = mat(&[(0, 0, 42)], 1, 1);
        let desc = Descriptor {
            output_replace: true,
            ..Descriptor::default()
        };
        subassign(
            &mut c,
            Some(&m),
            None,
            &a,
            &IndexList::List(vec![0]),
            &IndexList::List(vec![0]),
            &desc,
        )
        .unwrap();
        assert_eq!(entries(&c), vec![(0, 0, 42), (3, 3, 2)]);
    }

    #[test]
    fn test_duplicate_indices_rejected() {
        setup();
        let mut c = Matrix::new(Type::INT32, 3, 3).unwrap();
        let r = assign_scalar(
            &mut c,
            None,
            None,
            Scalar::Int32(1),
            &IndexList::List(vec![0, 0]),
            &IndexList::All,
            &Descriptor::default(),
        );
        assert!(matches!(r, Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_unordered_index_list_maps_positions() {
        setup();
        let mut c = Matrix::new(Type::INT32, 4, 1).unwrap();
        // A(0)=10 goes to row 3, A(1)=20 goes to row 1
        let a = mat(&[(0, 0, 10), (1, 0, 20)], 2, 1);
        assign(
            &mut c,
            None,
            None,
            &a,
            &IndexList::List(vec![3, 1]),
            &IndexList::All,
            &Descriptor::default(),
        )
        .unwrap();
        assert_eq!(entries(&c), vec![(1, 0, 20), (3, 0, 10)]);
    }
}
