//! The sparse matrix container.
//!
//! A matrix is a collection of `vdim` vectors of length `vlen`, stored in
//! one of four formats:
//!
//! | Format      | Pattern                     | Values            |
//! |-------------|-----------------------------|-------------------|
//! | Sparse      | offsets `p`, indices `i`    | `nvals` elements  |
//! | Hypersparse | `p`, `i`, non-empty list `h`| `nvals` elements  |
//! | Bitmap      | byte-per-cell `b`           | `vlen×vdim` slots |
//! | Full        | every cell present          | `vlen×vdim` slots |
//!
//! Orientation is `is_csc`: stored vectors are columns when true, rows
//! when false. All formats support both orientations, and format
//! transitions never change the logical `{(i, j, v)}` set.
//!
//! Values live in untyped little-endian byte buffers; the element type is
//! fixed at creation. An **iso** matrix stores exactly one value shared
//! by every present cell.
//!
//! Deferred work rides along with the matrix: **zombies** (deleted
//! entries whose inner index is bit-inverted in place), **pending
//! tuples** (inserts not yet merged), and the **jumbled** flag (unsorted
//! inner indices). `wait` resolves all three; observers that need a
//! finalized matrix call it implicitly.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{self, burble};
use crate::convert;
use crate::error::{Error, Result};
use crate::ops::BinaryOp;
use crate::pending::Pending;
use crate::types::{Scalar, Type, TypeCode};

// ============================================================================
// SPARSITY CONTROL
// ============================================================================

/// Bitmask of storage formats a matrix is allowed to take.
pub mod sparsity {
    pub const HYPERSPARSE: u8 = 1;
    pub const SPARSE: u8 = 2;
    pub const BITMAP: u8 = 4;
    pub const FULL: u8 = 8;
    /// Let the conformer pick freely.
    pub const AUTO: u8 = HYPERSPARSE | SPARSE | BITMAP | FULL;
}

/// The storage format a matrix currently uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Hypersparse,
    Sparse,
    Bitmap,
    Full,
}

// ============================================================================
// ZOMBIE ENCODING
// ============================================================================

/// Mark an inner index as a zombie (logically deleted in place).
#[inline(always)]
pub(crate) fn zombie(i: i64) -> i64 {
    !i
}

/// Recover the original index from a zombie.
#[inline(always)]
pub(crate) fn dezombie(i: i64) -> i64 {
    !i
}

/// Zombies are exactly the negative encodings.
#[inline(always)]
pub(crate) fn is_zombie(i: i64) -> bool {
    i < 0
}

// ============================================================================
// STORAGE
// ============================================================================

/// Physical storage, one variant per format.
#[derive(Clone, Debug)]
pub(crate) enum Store {
    Sparse {
        p: Vec<usize>,
        i: Vec<i64>,
        x: Vec<u8>,
    },
    Hyper {
        p: Vec<usize>,
        h: Vec<usize>,
        i: Vec<i64>,
        x: Vec<u8>,
    },
    Bitmap {
        b: Vec<u8>,
        x: Vec<u8>,
        nvals: usize,
    },
    Full {
        x: Vec<u8>,
    },
}

/// Read-only view of sparse or hypersparse storage, the form every
/// compute kernel consumes.
#[derive(Clone, Copy)]
pub(crate) struct SparseView<'a> {
    pub p: &'a [usize],
    pub h: Option<&'a [usize]>,
    pub i: &'a [i64],
    pub x: &'a [u8],
    pub iso: bool,
    pub esize: usize,
    pub vlen: usize,
    pub vdim: usize,
}

impl<'a> SparseView<'a> {
    /// Number of materialized vectors.
    #[inline]
    pub fn nvec(&self) -> usize {
        self.p.len() - 1
    }

    /// Outer index of the k-th materialized vector.
    #[inline]
    pub fn outer(&self, k: usize) -> usize {
        match self.h {
            Some(h) => h[k],
            None => k,
        }
    }

    /// Entry range of the k-th materialized vector.
    #[inline]
    pub fn range(&self, k: usize) -> std::ops::Range<usize> {
        self.p[k]..self.p[k + 1]
    }

    /// Value bytes of the entry at position `pos`, honoring iso.
    #[inline]
    pub fn val(&self, pos: usize) -> &'a [u8] {
        if self.iso {
            &self.x[..self.esize]
        } else {
            &self.x[pos * self.esize..(pos + 1) * self.esize]
        }
    }

    /// Locate the materialized vector holding outer index `j`, if any.
    /// Identity for sparse; binary search over `h` for hypersparse.
    pub fn find_vector(&self, j: usize) -> Option<usize> {
        match self.h {
            None => (j < self.nvec()).then_some(j),
            Some(h) => h.binary_search(&j).ok(),
        }
    }

    /// Entry range of outer index `j`; empty when the vector is absent.
    pub fn range_of_outer(&self, j: usize) -> std::ops::Range<usize> {
        match self.find_vector(j) {
            Some(k) => self.range(k),
            None => 0..0,
        }
    }
}

// ============================================================================
// MATRIX
// ============================================================================

/// A multi-format sparse matrix with deferred work.
///
/// # Examples
///
/// ```
/// use sparsering::{config, Config, Matrix, Scalar, Type};
///
/// config::init(Config::default()).ok();
/// let mut a = Matrix::new(Type::FP64, 4, 4).unwrap();
/// a.set_element(1, 2, Scalar::Fp64(3.5)).unwrap();
/// assert_eq!(a.nvals().unwrap(), 1);
/// assert_eq!(a.extract_element(1, 2).unwrap(), Some(Scalar::Fp64(3.5)));
/// ```
#[derive(Clone, Debug)]
pub struct Matrix {
    pub(crate) typ: Type,
    pub(crate) vlen: usize,
    pub(crate) vdim: usize,
    pub(crate) is_csc: bool,
    pub(crate) store: Store,
    pub(crate) iso: bool,
    pub(crate) nzombies: usize,
    pub(crate) pending: Option<Pending>,
    pub(crate) jumbled: bool,
    pub(crate) nvec_nonempty: Option<usize>,
    pub(crate) sparsity_control: u8,
    pub(crate) hyper_switch: f64,
    pub(crate) bitmap_switch: f64,
}

impl Matrix {
    // ------------------------------------------------------------------------
    // lifecycle
    // ------------------------------------------------------------------------

    /// A new empty matrix, column-oriented, free to take any format.
    pub fn new(typ: Type, nrows: usize, ncols: usize) -> Result<Matrix> {
        Matrix::new_with(typ, nrows, ncols, true, sparsity::AUTO)
    }

    /// A new empty matrix with explicit orientation and format control.
    pub fn new_with(
        typ: Type,
        nrows: usize,
        ncols: usize,
        is_csc: bool,
        sparsity_control: u8,
    ) -> Result<Matrix> {
        let cfg = config::context()?;
        if sparsity_control == 0 || sparsity_control > sparsity::AUTO {
            return Err(Error::InvalidValue {
                what: "sparsity control must be a nonempty format bitmask".into(),
            });
        }
        let (vlen, vdim) = if is_csc { (nrows, ncols) } else { (ncols, nrows) };
        let store = if sparsity_control & sparsity::SPARSE != 0 {
            Store::Sparse {
                p: vec![0; vdim + 1],
                i: Vec::new(),
                x: Vec::new(),
            }
        } else {
            Store::Hyper {
                p: vec![0],
                h: Vec::new(),
                i: Vec::new(),
                x: Vec::new(),
            }
        };
        Ok(Matrix {
            typ,
            vlen,
            vdim,
            is_csc,
            store,
            iso: false,
            nzombies: 0,
            pending: None,
            jumbled: false,
            nvec_nonempty: Some(0),
            sparsity_control,
            hyper_switch: cfg.hyper_switch,
            bitmap_switch: cfg.bitmap_switch,
        })
    }

    /// Deep copy, deferred work included.
    pub fn dup(&self) -> Matrix {
        self.clone()
    }

    /// Drop every entry, keeping shape, type, orientation, and controls.
    pub fn clear(&mut self) {
        self.store = if self.sparsity_control & sparsity::SPARSE != 0 {
            Store::Sparse {
                p: vec![0; self.vdim + 1],
                i: Vec::new(),
                x: Vec::new(),
            }
        } else {
            Store::Hyper {
                p: vec![0],
                h: Vec::new(),
                i: Vec::new(),
                x: Vec::new(),
            }
        };
        self.iso = false;
        self.nzombies = 0;
        self.pending = None;
        self.jumbled = false;
        self.nvec_nonempty = Some(0);
    }

    /// Change the logical shape, keeping entries that still fit.
    pub fn resize(&mut self, nrows: usize, ncols: usize) -> Result<()> {
        self.wait()?;
        let (new_vlen, new_vdim) = if self.is_csc {
            (nrows, ncols)
        } else {
            (ncols, nrows)
        };
        convert::to_sparse(self)?;
        let esize = self.esize();
        let (p, i, x) = match &self.store {
            Store::Sparse { p, i, x } => (p, i, x),
            _ => unreachable!("resize operates on sparse storage"),
        };
        let mut np = Vec::with_capacity(new_vdim + 1);
        let mut ni = Vec::new();
        let mut nx = Vec::new();
        np.push(0usize);
        for k in 0..new_vdim {
            if k < self.vdim {
                for pos in p[k]..p[k + 1] {
                    let row = i[pos] as usize;
                    if row < new_vlen {
                        ni.push(i[pos]);
                        if !self.iso {
                            nx.extend_from_slice(&x[pos * esize..(pos + 1) * esize]);
                        }
                    }
                }
            }
            np.push(ni.len());
        }
        if self.iso {
            nx = x[..esize.min(x.len())].to_vec();
        }
        if ni.is_empty() {
            self.iso = false;
            nx.clear();
        }
        self.vlen = new_vlen;
        self.vdim = new_vdim;
        self.store = Store::Sparse {
            p: np,
            i: ni,
            x: nx,
        };
        self.nvec_nonempty = None;
        convert::conform(self)
    }

    // ------------------------------------------------------------------------
    // shape and metadata
    // ------------------------------------------------------------------------

    #[inline]
    pub fn element_type(&self) -> Type {
        self.typ
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        if self.is_csc {
            self.vlen
        } else {
            self.vdim
        }
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        if self.is_csc {
            self.vdim
        } else {
            self.vlen
        }
    }

    /// True when stored by column.
    #[inline]
    pub fn by_col(&self) -> bool {
        self.is_csc
    }

    /// The format currently in use.
    pub fn format(&self) -> Format {
        match self.store {
            Store::Sparse { .. } => Format::Sparse,
            Store::Hyper { .. } => Format::Hypersparse,
            Store::Bitmap { .. } => Format::Bitmap,
            Store::Full { .. } => Format::Full,
        }
    }

    /// True when all entries are present in the logical shape.
    #[inline]
    pub fn is_iso(&self) -> bool {
        self.iso
    }

    /// True when no deferred work remains.
    #[inline]
    pub fn is_finalized(&self) -> bool {
        self.nzombies == 0 && self.pending.is_none() && !self.jumbled
    }

    /// Element size in bytes.
    #[inline]
    pub(crate) fn esize(&self) -> usize {
        self.typ.size()
    }

    /// Number of entries, resolving pending tuples if any are queued.
    /// Zombies are subtracted without forcing a full `wait`.
    pub fn nvals(&mut self) -> Result<usize> {
        if self.pending.is_some() {
            self.wait()?;
        }
        Ok(self.nvals_stored() - self.nzombies)
    }

    /// Entry slots currently materialized, zombies included.
    pub(crate) fn nvals_stored(&self) -> usize {
        match &self.store {
            Store::Sparse { i, .. } | Store::Hyper { i, .. } => i.len(),
            Store::Bitmap { nvals, .. } => *nvals,
            Store::Full { .. } => self.vlen * self.vdim,
        }
    }

    /// Restrict which formats the conformer may pick; re-conforms now.
    pub fn set_sparsity_control(&mut self, control: u8) -> Result<()> {
        if control == 0 || control > sparsity::AUTO {
            return Err(Error::InvalidValue {
                what: "sparsity control must be a nonempty format bitmask".into(),
            });
        }
        self.sparsity_control = control;
        self.wait()?;
        convert::conform(self)
    }

    pub fn set_hyper_switch(&mut self, f: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&f) {
            return Err(Error::InvalidValue {
                what: "hyper switch must be a fraction in [0, 1]".into(),
            });
        }
        self.hyper_switch = f;
        Ok(())
    }

    pub fn set_bitmap_switch(&mut self, f: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&f) {
            return Err(Error::InvalidValue {
                what: "bitmap switch must be a fraction in [0, 1]".into(),
            });
        }
        self.bitmap_switch = f;
        Ok(())
    }

    /// Switch between row- and column-oriented storage. The logical
    /// matrix is unchanged; stored vectors are physically rebuilt.
    pub fn set_by_col(&mut self, by_col: bool) -> Result<()> {
        if self.is_csc == by_col {
            return Ok(());
        }
        self.wait()?;
        let mut reoriented = crate::transpose::transpose_to_orientation(self, by_col)?;
        reoriented.sparsity_control = self.sparsity_control;
        reoriented.hyper_switch = self.hyper_switch;
        reoriented.bitmap_switch = self.bitmap_switch;
        *self = reoriented;
        convert::conform(self)
    }

    // ------------------------------------------------------------------------
    // sparse views and raw construction
    // ------------------------------------------------------------------------

    /// View sparse or hypersparse storage. Callers guarantee the format.
    pub(crate) fn sparse_view(&self) -> SparseView<'_> {
        match &self.store {
            Store::Sparse { p, i, x } => SparseView {
                p,
                h: None,
                i,
                x,
                iso: self.iso,
                esize: self.esize(),
                vlen: self.vlen,
                vdim: self.vdim,
            },
            Store::Hyper { p, h, i, x } => SparseView {
                p,
                h: Some(h),
                i,
                x,
                iso: self.iso,
                esize: self.esize(),
                vlen: self.vlen,
                vdim: self.vdim,
            },
            _ => panic!("sparse view requested on bitmap/full storage"),
        }
    }

    /// Assemble a matrix from freshly built sparse parts. The parts must
    /// satisfy the sparse-format invariants; engines build them directly.
    pub(crate) fn from_sparse_parts(
        typ: Type,
        vlen: usize,
        vdim: usize,
        is_csc: bool,
        p: Vec<usize>,
        i: Vec<i64>,
        x: Vec<u8>,
        iso: bool,
    ) -> Matrix {
        debug_assert_eq!(p.len(), vdim + 1);
        debug_assert_eq!(*p.last().unwrap(), i.len());
        let cfg = config::context().unwrap_or_default();
        Matrix {
            typ,
            vlen,
            vdim,
            is_csc,
            store: Store::Sparse { p, i, x },
            iso,
            nzombies: 0,
            pending: None,
            jumbled: false,
            nvec_nonempty: None,
            sparsity_control: sparsity::AUTO,
            hyper_switch: cfg.hyper_switch,
            bitmap_switch: cfg.bitmap_switch,
        }
    }

    // ------------------------------------------------------------------------
    // element-level access
    // ------------------------------------------------------------------------

    /// Map a logical `(row, col)` onto stored `(inner, outer)`.
    #[inline]
    pub(crate) fn to_stored(&self, row: usize, col: usize) -> (usize, usize) {
        if self.is_csc {
            (row, col)
        } else {
            (col, row)
        }
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.nrows() {
            return Err(Error::IndexOutOfBounds {
                index: row,
                bound: self.nrows(),
            });
        }
        if col >= self.ncols() {
            return Err(Error::IndexOutOfBounds {
                index: col,
                bound: self.ncols(),
            });
        }
        Ok(())
    }

    /// If the matrix is iso and the incoming value differs, expand the
    /// value buffer so per-entry writes become possible.
    pub(crate) fn expand_iso_for(&mut self, vbytes: &[u8]) {
        if !self.iso {
            return;
        }
        let esize = self.esize();
        let same = match &self.store {
            Store::Sparse { x, .. }
            | Store::Hyper { x, .. }
            | Store::Bitmap { x, .. }
            | Store::Full { x } => &x[..esize] == vbytes,
        };
        if !same {
            self.expand_iso();
        }
    }

    /// Replicate the single iso value into a per-entry buffer.
    pub(crate) fn expand_iso(&mut self) {
        if !self.iso {
            return;
        }
        let esize = self.esize();
        let n = match &self.store {
            Store::Sparse { i, .. } | Store::Hyper { i, .. } => i.len(),
            Store::Bitmap { .. } | Store::Full { .. } => self.vlen * self.vdim,
        };
        let expand = |x: &mut Vec<u8>, n: usize| {
            let one = x[..esize].to_vec();
            let mut full = Vec::with_capacity(n * esize);
            for _ in 0..n {
                full.extend_from_slice(&one);
            }
            *x = full;
        };
        match &mut self.store {
            Store::Sparse { x, .. } | Store::Hyper { x, .. } => expand(x, n),
            Store::Bitmap { x, .. } | Store::Full { x } => expand(x, n),
        }
        self.iso = false;
    }

    /// Position of `(inner, outer)` in sparse storage: `Ok(pos)` for a
    /// live entry, `Err(Some(pos))` for a zombie, `Err(None)` if absent.
    fn find_entry(&self, inner: usize, outer: usize) -> std::result::Result<usize, Option<usize>> {
        let view = self.sparse_view();
        let range = view.range_of_outer(outer);
        let i = &view.i[range.clone()];
        if self.jumbled || self.nzombies > 0 {
            // zombies break the sort order for binary search purposes
            for (off, &idx) in i.iter().enumerate() {
                if idx == inner as i64 {
                    return Ok(range.start + off);
                }
                if is_zombie(idx) && dezombie(idx) == inner as i64 {
                    return Err(Some(range.start + off));
                }
            }
            Err(None)
        } else {
            match i.binary_search(&(inner as i64)) {
                Ok(off) => Ok(range.start + off),
                Err(_) => Err(None),
            }
        }
    }

    /// Insert or overwrite one element.
    pub fn set_element(&mut self, row: usize, col: usize, v: Scalar) -> Result<()> {
        if self.typ.code() == TypeCode::User {
            return Err(Error::DomainMismatch {
                expected: self.typ.code(),
                got: v.code(),
            });
        }
        let bytes = v.cast(self.typ.code()).to_bytes();
        self.set_element_raw(row, col, &bytes)
    }

    /// Insert or overwrite one element from raw bytes of the matrix type.
    pub fn set_element_raw(&mut self, row: usize, col: usize, vbytes: &[u8]) -> Result<()> {
        self.check_bounds(row, col)?;
        if vbytes.len() != self.esize() {
            return Err(Error::InvalidValue {
                what: "element byte length does not match the matrix type".into(),
            });
        }
        let (inner, outer) = self.to_stored(row, col);
        let esize = self.esize();
        match self.format() {
            Format::Full => {
                self.expand_iso_for(vbytes);
                let vlen = self.vlen;
                if let Store::Full { x } = &mut self.store {
                    let pos = outer * vlen + inner;
                    x[pos * esize..(pos + 1) * esize].copy_from_slice(vbytes);
                }
                return Ok(());
            }
            Format::Bitmap => {
                self.expand_iso_for(vbytes);
                let vlen = self.vlen;
                let mut fresh = false;
                if let Store::Bitmap { b, x, nvals } = &mut self.store {
                    let pos = outer * vlen + inner;
                    if b[pos] == 0 {
                        b[pos] = 1;
                        *nvals += 1;
                        fresh = true;
                    }
                    x[pos * esize..(pos + 1) * esize].copy_from_slice(vbytes);
                }
                if fresh {
                    self.nvec_nonempty = None;
                }
                return Ok(());
            }
            _ => {}
        }
        match self.find_entry(inner, outer) {
            Ok(pos) => {
                self.expand_iso_for(vbytes);
                match &mut self.store {
                    Store::Sparse { x, .. } | Store::Hyper { x, .. } => {
                        if !self.iso {
                            x[pos * esize..(pos + 1) * esize].copy_from_slice(vbytes);
                        }
                    }
                    _ => unreachable!(),
                }
                Ok(())
            }
            Err(Some(pos)) => {
                // bring the zombie back to life with the new value
                self.expand_iso_for(vbytes);
                match &mut self.store {
                    Store::Sparse { i, x, .. } | Store::Hyper { i, x, .. } => {
                        i[pos] = dezombie(i[pos]);
                        if !self.iso {
                            x[pos * esize..(pos + 1) * esize].copy_from_slice(vbytes);
                        }
                    }
                    _ => unreachable!(),
                }
                self.nzombies -= 1;
                Ok(())
            }
            Err(None) => {
                let pending = self
                    .pending
                    .get_or_insert_with(|| Pending::new(esize, None));
                pending.push(outer, inner, vbytes);
                if config::blocking_mode() {
                    self.wait()?;
                }
                Ok(())
            }
        }
    }

    /// Delete one element if present. Deleting from sorted storage only
    /// marks a zombie; the repack happens at the next `wait`.
    pub fn remove_element(&mut self, row: usize, col: usize) -> Result<()> {
        self.check_bounds(row, col)?;
        let (inner, outer) = self.to_stored(row, col);
        match self.format() {
            Format::Full => {
                // full cannot represent absence
                convert::to_bitmap(self)?;
                return self.remove_element(row, col);
            }
            Format::Bitmap => {
                let vlen = self.vlen;
                let mut removed = false;
                if let Store::Bitmap { b, nvals, .. } = &mut self.store {
                    let pos = outer * vlen + inner;
                    if b[pos] != 0 {
                        b[pos] = 0;
                        *nvals -= 1;
                        removed = true;
                    }
                }
                if removed {
                    self.nvec_nonempty = None;
                }
                return Ok(());
            }
            _ => {}
        }
        if self.pending.is_some() {
            // the entry may still be queued; resolve before deleting.
            // wait may also re-conform the storage, so re-dispatch.
            self.wait()?;
            return self.remove_element(row, col);
        }
        match self.find_entry(inner, outer) {
            Ok(pos) => {
                match &mut self.store {
                    Store::Sparse { i, .. } | Store::Hyper { i, .. } => {
                        i[pos] = zombie(i[pos]);
                    }
                    _ => unreachable!(),
                }
                self.nzombies += 1;
                burble!("remove_element: zombie at ({}, {})", row, col);
                Ok(())
            }
            Err(_) => Ok(()),
        }
    }

    /// Fetch one element. Queued inserts are resolved first; zombies are
    /// skipped without a repack.
    pub fn extract_element(&mut self, row: usize, col: usize) -> Result<Option<Scalar>> {
        Ok(self
            .extract_element_raw(row, col)?
            .map(|bytes| Scalar::read(self.typ.code(), &bytes)))
    }

    /// Raw-bytes variant of [`Matrix::extract_element`]; the only form
    /// user-typed matrices support.
    pub fn extract_element_raw(&mut self, row: usize, col: usize) -> Result<Option<Vec<u8>>> {
        self.check_bounds(row, col)?;
        if self.pending.is_some() {
            self.wait()?;
        }
        let (inner, outer) = self.to_stored(row, col);
        let esize = self.esize();
        match &self.store {
            Store::Full { x } => {
                let pos = if self.iso { 0 } else { outer * self.vlen + inner };
                Ok(Some(x[pos * esize..(pos + 1) * esize].to_vec()))
            }
            Store::Bitmap { b, x, .. } => {
                let pos = outer * self.vlen + inner;
                if b[pos] == 0 {
                    Ok(None)
                } else {
                    let vp = if self.iso { 0 } else { pos };
                    Ok(Some(x[vp * esize..(vp + 1) * esize].to_vec()))
                }
            }
            _ => match self.find_entry(inner, outer) {
                Ok(pos) => {
                    let view = self.sparse_view();
                    Ok(Some(view.val(pos).to_vec()))
                }
                Err(_) => Ok(None),
            },
        }
    }

    // ------------------------------------------------------------------------
    // bulk construction and extraction
    // ------------------------------------------------------------------------

    /// Bulk-build from `(rows, cols, vals)` tuples. The matrix must be
    /// empty. Duplicates are folded with `dup` when given, otherwise the
    /// build fails on the first duplicate.
    ///
    /// If every value is equal the result is stored iso.
    pub fn build(
        &mut self,
        rows: &[usize],
        cols: &[usize],
        vals: &[Scalar],
        dup: Option<&BinaryOp>,
    ) -> Result<()> {
        if self.typ.code() == TypeCode::User {
            return Err(Error::DomainMismatch {
                expected: TypeCode::User,
                got: TypeCode::User,
            });
        }
        let esize = self.esize();
        let mut bytes = vec![0u8; vals.len() * esize];
        for (k, v) in vals.iter().enumerate() {
            v.cast(self.typ.code())
                .write(&mut bytes[k * esize..(k + 1) * esize]);
        }
        self.build_raw(rows, cols, &bytes, dup)
    }

    /// Raw-bytes bulk build; `vals` holds `rows.len()` packed elements.
    pub fn build_raw(
        &mut self,
        rows: &[usize],
        cols: &[usize],
        vals: &[u8],
        dup: Option<&BinaryOp>,
    ) -> Result<()> {
        if self.nvals_stored() != 0 || self.pending.is_some() {
            return Err(Error::OutputNotEmpty);
        }
        if rows.len() != cols.len() || vals.len() != rows.len() * self.esize() {
            return Err(Error::InvalidValue {
                what: "build arrays must have matching lengths".into(),
            });
        }
        let esize = self.esize();
        let nrows = self.nrows();
        let ncols = self.ncols();
        for (&r, &c) in rows.iter().zip(cols) {
            if r >= nrows {
                return Err(Error::IndexOutOfBounds {
                    index: r,
                    bound: nrows,
                });
            }
            if c >= ncols {
                return Err(Error::IndexOutOfBounds {
                    index: c,
                    bound: ncols,
                });
            }
        }

        // sort tuples by (outer, inner), stable so dup order is build order
        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.sort_by_key(|&k| {
            let (inner, outer) = self.to_stored(rows[k], cols[k]);
            (outer, inner)
        });

        let mut p = vec![0usize; self.vdim + 1];
        let mut i: Vec<i64> = Vec::with_capacity(order.len());
        let mut x: Vec<u8> = Vec::with_capacity(vals.len());
        let mut last: Option<(usize, usize)> = None;
        for &k in &order {
            let (inner, outer) = self.to_stored(rows[k], cols[k]);
            let v = &vals[k * esize..(k + 1) * esize];
            if last == Some((outer, inner)) {
                let dup = dup.ok_or_else(|| Error::InvalidValue {
                    what: format!("duplicate entry at ({}, {})", rows[k], cols[k]),
                })?;
                let pos = x.len() - esize;
                let mut xa = vec![0u8; dup.xtype.size()];
                let mut yb = vec![0u8; dup.ytype.size()];
                let mut z = vec![0u8; dup.ztype.size()];
                crate::types::cast_bytes(dup.xtype.code(), &mut xa, self.typ.code(), &x[pos..]);
                crate::types::cast_bytes(dup.ytype.code(), &mut yb, self.typ.code(), v);
                dup.apply(&mut z, &xa, &yb);
                crate::types::cast_bytes(
                    self.typ.code(),
                    &mut x[pos..],
                    dup.ztype.code(),
                    &z,
                );
            } else {
                i.push(inner as i64);
                x.extend_from_slice(v);
                p[outer + 1] += 1;
                last = Some((outer, inner));
            }
        }
        for k in 0..self.vdim {
            p[k + 1] += p[k];
        }

        // all-equal values collapse to iso storage
        let iso = !i.is_empty() && x.chunks_exact(esize).all(|c| c == &x[..esize]);
        if iso {
            x.truncate(esize);
        }
        burble!(
            "build: {} tuples -> {} entries{}",
            rows.len(),
            i.len(),
            if iso { " (iso)" } else { "" }
        );
        self.store = Store::Sparse { p, i, x };
        self.iso = iso;
        self.nvec_nonempty = None;
        convert::conform(self)
    }

    /// Extract every entry as `(rows, cols, vals)`, finalized and sorted.
    pub fn extract_tuples(&mut self) -> Result<(Vec<usize>, Vec<usize>, Vec<Scalar>)> {
        if self.typ.code() == TypeCode::User {
            return Err(Error::DomainMismatch {
                expected: TypeCode::User,
                got: TypeCode::User,
            });
        }
        let (rows, cols, bytes) = self.extract_tuples_raw()?;
        let esize = self.esize();
        let vals = bytes
            .chunks_exact(esize)
            .map(|c| Scalar::read(self.typ.code(), c))
            .collect();
        Ok((rows, cols, vals))
    }

    /// Raw-bytes variant of [`Matrix::extract_tuples`].
    pub fn extract_tuples_raw(&mut self) -> Result<(Vec<usize>, Vec<usize>, Vec<u8>)> {
        self.wait()?;
        let esize = self.esize();
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        match &self.store {
            Store::Sparse { .. } | Store::Hyper { .. } => {
                let view = self.sparse_view();
                for k in 0..view.nvec() {
                    let j = view.outer(k);
                    for pos in view.range(k) {
                        let inner = view.i[pos] as usize;
                        let (r, c) = if self.is_csc { (inner, j) } else { (j, inner) };
                        rows.push(r);
                        cols.push(c);
                        vals.extend_from_slice(view.val(pos));
                    }
                }
            }
            Store::Bitmap { b, x, .. } => {
                for outer in 0..self.vdim {
                    for inner in 0..self.vlen {
                        let pos = outer * self.vlen + inner;
                        if b[pos] != 0 {
                            let (r, c) = if self.is_csc {
                                (inner, outer)
                            } else {
                                (outer, inner)
                            };
                            rows.push(r);
                            cols.push(c);
                            let vp = if self.iso { 0 } else { pos };
                            vals.extend_from_slice(&x[vp * esize..(vp + 1) * esize]);
                        }
                    }
                }
            }
            Store::Full { x } => {
                for outer in 0..self.vdim {
                    for inner in 0..self.vlen {
                        let pos = outer * self.vlen + inner;
                        let (r, c) = if self.is_csc {
                            (inner, outer)
                        } else {
                            (outer, inner)
                        };
                        rows.push(r);
                        cols.push(c);
                        let vp = if self.iso { 0 } else { pos };
                        vals.extend_from_slice(&x[vp * esize..(vp + 1) * esize]);
                    }
                }
            }
        }
        Ok((rows, cols, vals))
    }

    // ------------------------------------------------------------------------
    // raw CSC import / export
    // ------------------------------------------------------------------------

    /// Take ownership of raw CSC components without copying. The
    /// components must satisfy the sparse-format invariants.
    pub fn import_csc(
        typ: Type,
        nrows: usize,
        ncols: usize,
        p: Vec<usize>,
        i: Vec<i64>,
        x: Vec<u8>,
        iso: bool,
    ) -> Result<Matrix> {
        if p.len() != ncols + 1 {
            return Err(Error::MissingComponent {
                what: "offset array of length ncols + 1",
            });
        }
        if p[0] != 0 || *p.last().unwrap() != i.len() {
            return Err(Error::InvalidObject {
                what: "offsets must start at 0 and end at nvals".into(),
            });
        }
        for w in p.windows(2) {
            if w[0] > w[1] {
                return Err(Error::InvalidObject {
                    what: "offsets must be monotone".into(),
                });
            }
        }
        for k in 0..ncols {
            let col = &i[p[k]..p[k + 1]];
            for w in col.windows(2) {
                if w[0] >= w[1] {
                    return Err(Error::InvalidObject {
                        what: "inner indices must be strictly increasing per vector".into(),
                    });
                }
            }
            for &row in col {
                if row < 0 || row as usize >= nrows {
                    return Err(Error::IndexOutOfBounds {
                        index: row as usize,
                        bound: nrows,
                    });
                }
            }
        }
        let expect = if iso {
            typ.size()
        } else {
            i.len() * typ.size()
        };
        if x.len() != expect && !(i.is_empty() && x.is_empty()) {
            return Err(Error::MissingComponent {
                what: "value array sized to the entry count",
            });
        }
        Ok(Matrix::from_sparse_parts(
            typ, nrows, ncols, true, p, i, x, iso,
        ))
    }

    /// Move the matrix out as raw CSC components `(p, i, x, iso)`,
    /// finalizing and converting as needed.
    pub fn export_csc(mut self) -> Result<(Vec<usize>, Vec<i64>, Vec<u8>, bool)> {
        self.wait()?;
        if !self.is_csc {
            self = crate::transpose::transpose_to_orientation(&self, true)?;
        }
        convert::to_sparse(&mut self)?;
        let iso = self.iso;
        match self.store {
            Store::Sparse { p, i, x } => Ok((p, i, x, iso)),
            _ => Err(Error::Internal {
                what: "export did not produce sparse storage",
            }),
        }
    }

    // ------------------------------------------------------------------------
    // deterministic random construction (test and bench support)
    // ------------------------------------------------------------------------

    /// A deterministic random matrix: same seed, same matrix. Density is
    /// the fraction of cells present; values are small integers encoded
    /// in the matrix type.
    pub fn random(typ: Type, nrows: usize, ncols: usize, density: f64, seed: u64) -> Result<Matrix> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut m = Matrix::new(typ, nrows, ncols)?;
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut vals = Vec::new();
        for r in 0..nrows {
            for c in 0..ncols {
                if rng.gen::<f64>() < density {
                    rows.push(r);
                    cols.push(c);
                    vals.push(Scalar::Int64(rng.gen_range(-4..=4)).cast(typ.code()));
                }
            }
        }
        m.build(&rows, &cols, &vals, None)?;
        Ok(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn setup() {
        config::init(Config::default()).ok();
    }

    #[test]
    fn test_new_matrix_is_empty() {
        setup();
        let mut m = Matrix::new(Type::FP64, 3, 5).unwrap();
        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 5);
        assert_eq!(m.nvals().unwrap(), 0);
        assert!(m.is_finalized());
    }

    #[test]
    fn test_set_then_extract() {
        setup();
        let mut m = Matrix::new(Type::INT32, 4, 4).unwrap();
        m.set_element(2, 1, Scalar::Int32(-9)).unwrap();
        m.set_element(0, 3, Scalar::Int32(7)).unwrap();
        assert_eq!(m.extract_element(2, 1).unwrap(), Some(Scalar::Int32(-9)));
        assert_eq!(m.extract_element(0, 0).unwrap(), None);
        assert_eq!(m.nvals().unwrap(), 2);
    }

    #[test]
    fn test_set_element_overwrites() {
        setup();
        let mut m = Matrix::new(Type::INT32, 2, 2).unwrap();
        m.set_element(0, 0, Scalar::Int32(1)).unwrap();
        m.wait().unwrap();
        m.set_element(0, 0, Scalar::Int32(2)).unwrap();
        assert_eq!(m.extract_element(0, 0).unwrap(), Some(Scalar::Int32(2)));
        assert_eq!(m.nvals().unwrap(), 1);
    }

    #[test]
    fn test_remove_makes_zombie_without_wait() {
        setup();
        let mut m = Matrix::new(Type::INT32, 4, 4).unwrap();
        for k in 0..4 {
            m.set_element(k, k, Scalar::Int32(k as i32)).unwrap();
        }
        m.wait().unwrap();
        m.remove_element(1, 1).unwrap();
        m.remove_element(3, 3).unwrap();
        assert_eq!(m.nzombies, 2);
        assert!(!m.is_finalized());
        // nvals subtracts zombies without forcing assembly
        assert_eq!(m.nvals().unwrap(), 2);
        assert_eq!(m.nzombies, 2);
        // extraction finalizes
        let (rows, _, _) = m.extract_tuples().unwrap();
        assert_eq!(rows, vec![0, 2]);
        assert!(m.is_finalized());
    }

    #[test]
    fn test_out_of_bounds() {
        setup();
        let mut m = Matrix::new(Type::FP32, 2, 3).unwrap();
        assert!(matches!(
            m.set_element(2, 0, Scalar::Fp32(1.0)),
            Err(Error::IndexOutOfBounds { index: 2, bound: 2 })
        ));
        assert!(m.extract_element(0, 3).is_err());
    }

    #[test]
    fn test_build_sorts_and_folds_duplicates() {
        setup();
        let mut m = Matrix::new(Type::INT64, 3, 3).unwrap();
        let plus = BinaryOp::builtin(crate::ops::BinaryOpcode::Plus, Type::INT64).unwrap();
        m.build(
            &[2, 0, 2, 1],
            &[1, 0, 1, 2],
            &[
                Scalar::Int64(5),
                Scalar::Int64(1),
                Scalar::Int64(7),
                Scalar::Int64(3),
            ],
            Some(&plus),
        )
        .unwrap();
        assert_eq!(m.nvals().unwrap(), 3);
        assert_eq!(m.extract_element(2, 1).unwrap(), Some(Scalar::Int64(12)));
    }

    #[test]
    fn test_build_duplicate_without_dup_fails() {
        setup();
        let mut m = Matrix::new(Type::INT64, 2, 2).unwrap();
        let r = m.build(
            &[0, 0],
            &[0, 0],
            &[Scalar::Int64(1), Scalar::Int64(2)],
            None,
        );
        assert!(matches!(r, Err(Error::InvalidValue { .. })));
    }

    #[test]
    fn test_build_requires_empty() {
        setup();
        let mut m = Matrix::new(Type::INT64, 2, 2).unwrap();
        m.set_element(0, 0, Scalar::Int64(1)).unwrap();
        m.wait().unwrap();
        let r = m.build(&[1], &[1], &[Scalar::Int64(2)], None);
        assert_eq!(r, Err(Error::OutputNotEmpty));
    }

    #[test]
    fn test_iso_build_and_extract() {
        setup();
        let mut m = Matrix::new(Type::INT32, 3, 3).unwrap();
        m.build(
            &[0, 1, 2],
            &[0, 1, 2],
            &[Scalar::Int32(7), Scalar::Int32(7), Scalar::Int32(7)],
            None,
        )
        .unwrap();
        assert!(m.is_iso());
        let (_, _, vals) = m.extract_tuples().unwrap();
        assert_eq!(vals, vec![Scalar::Int32(7); 3]);
    }

    #[test]
    fn test_iso_expands_on_divergent_write() {
        setup();
        let mut m = Matrix::new(Type::INT32, 2, 2).unwrap();
        m.build(&[0, 1], &[0, 1], &[Scalar::Int32(7), Scalar::Int32(7)], None)
            .unwrap();
        assert!(m.is_iso());
        m.set_element(0, 0, Scalar::Int32(8)).unwrap();
        assert!(!m.is_iso());
        assert_eq!(m.extract_element(0, 0).unwrap(), Some(Scalar::Int32(8)));
        assert_eq!(m.extract_element(1, 1).unwrap(), Some(Scalar::Int32(7)));
    }

    #[test]
    fn test_resize_truncates() {
        setup();
        let mut m = Matrix::new(Type::INT32, 4, 4).unwrap();
        for k in 0..4 {
            m.set_element(k, k, Scalar::Int32(k as i32)).unwrap();
        }
        m.resize(2, 3).unwrap();
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.ncols(), 3);
        assert_eq!(m.nvals().unwrap(), 2);
    }

    #[test]
    fn test_csr_orientation_round_trip() {
        setup();
        let mut m = Matrix::new_with(Type::INT32, 2, 3, false, sparsity::AUTO).unwrap();
        m.set_element(1, 2, Scalar::Int32(5)).unwrap();
        assert!(!m.by_col());
        assert_eq!(m.extract_element(1, 2).unwrap(), Some(Scalar::Int32(5)));
        let (rows, cols, vals) = m.extract_tuples().unwrap();
        assert_eq!((rows, cols), (vec![1], vec![2]));
        assert_eq!(vals, vec![Scalar::Int32(5)]);
    }

    #[test]
    fn test_import_csc_validates() {
        setup();
        // bad offsets
        assert!(Matrix::import_csc(Type::INT32, 2, 2, vec![0, 2, 1], vec![0, 1], vec![0; 8], false)
            .is_err());
        // good import
        let m = Matrix::import_csc(
            Type::INT32,
            2,
            2,
            vec![0, 1, 2],
            vec![0, 1],
            [1i32.to_le_bytes(), 2i32.to_le_bytes()].concat(),
            false,
        )
        .unwrap();
        let (p, i, _, iso) = m.export_csc().unwrap();
        assert_eq!(p, vec![0, 1, 2]);
        assert_eq!(i, vec![0, 1]);
        assert!(!iso);
    }

    #[test]
    fn test_set_by_col_round_trip() {
        setup();
        fn sorted(m: &Matrix) -> Vec<(usize, usize, Scalar)> {
            let (r, c, v) = m.clone().extract_tuples().unwrap();
            let mut out: Vec<_> = r.into_iter().zip(c).zip(v).map(|((a, b), s)| (a, b, s)).collect();
            out.sort_by_key(|&(a, b, _)| (a, b));
            out
        }
        let mut m = Matrix::new(Type::INT32, 3, 4).unwrap();
        m.set_element(1, 3, Scalar::Int32(8)).unwrap();
        m.set_element(2, 0, Scalar::Int32(9)).unwrap();
        let before = sorted(&m);
        m.set_by_col(false).unwrap();
        assert!(!m.by_col());
        assert_eq!(m.nrows(), 3);
        assert_eq!(sorted(&m), before);
        m.set_by_col(true).unwrap();
        assert_eq!(sorted(&m), before);
    }

    #[test]
    fn test_random_is_deterministic() {
        setup();
        let mut a = Matrix::random(Type::FP64, 10, 10, 0.3, 42).unwrap();
        let mut b = Matrix::random(Type::FP64, 10, 10, 0.3, 42).unwrap();
        assert_eq!(a.extract_tuples().unwrap(), b.extract_tuples().unwrap());
    }
}
