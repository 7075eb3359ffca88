//! Deferred-work resolution: zombies, pending tuples, jumbled vectors.
//!
//! `wait` brings a matrix to its finalized form:
//!
//! 1. compact zombies, rewriting the offsets;
//! 2. merge pending tuples under the pending accumulator (last write
//!    wins when there is none), reducing duplicates;
//! 3. leave every vector sorted.
//!
//! Zombies go first so the merge bounds stay correct; vectors are sorted
//! before the pending merge runs against them. `wait` is idempotent and
//! preserves the logical `{(i, j, v)}` set it is asked to materialize.

use crate::config::burble;
use crate::convert;
use crate::error::{Error, Result};
use crate::matrix::{dezombie, is_zombie, Matrix, Store};
use crate::ops::BinaryOp;
use crate::types::{cast_bytes, TypeCode};

/// `cast(op(cast(a), cast(b)))` with everything routed through the
/// accumulator's declared types; result is in `code`.
fn fold_through(op: &BinaryOp, code: TypeCode, esize: usize, a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut xa = vec![0u8; op.xtype.size()];
    let mut yb = vec![0u8; op.ytype.size()];
    let mut z = vec![0u8; op.ztype.size()];
    cast_bytes(op.xtype.code(), &mut xa, code, a);
    cast_bytes(op.ytype.code(), &mut yb, code, b);
    op.apply(&mut z, &xa, &yb);
    let mut out = vec![0u8; esize];
    cast_bytes(code, &mut out, op.ztype.code(), &z);
    out
}

/// Inserts not yet merged into sorted storage.
#[derive(Clone, Debug)]
pub(crate) struct Pending {
    pub outer: Vec<usize>,
    pub inner: Vec<usize>,
    pub vals: Vec<u8>,
    pub esize: usize,
    /// Accumulator folded into duplicates and collisions with stored
    /// entries; `None` means last write wins.
    pub op: Option<BinaryOp>,
}

impl Pending {
    pub fn new(esize: usize, op: Option<BinaryOp>) -> Pending {
        Pending {
            outer: Vec::new(),
            inner: Vec::new(),
            vals: Vec::new(),
            esize,
            op,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.outer.len()
    }

    #[inline]
    pub fn push(&mut self, outer: usize, inner: usize, val: &[u8]) {
        self.outer.push(outer);
        self.inner.push(inner);
        self.vals.extend_from_slice(val);
    }
}

impl Matrix {
    /// Resolve all deferred work. No-op on a finalized matrix.
    pub fn wait(&mut self) -> Result<()> {
        if self.is_finalized() {
            return Ok(());
        }
        burble!(
            "wait: {} zombies, {} pending, jumbled={}",
            self.nzombies,
            self.pending.as_ref().map_or(0, |p| p.len()),
            self.jumbled
        );
        if !matches!(self.store, Store::Sparse { .. } | Store::Hyper { .. }) {
            // bitmap and full never carry deferred work
            return Err(Error::Internal {
                what: "deferred work on dense storage",
            });
        }

        if self.nzombies > 0 {
            self.compact_zombies();
        }
        if self.jumbled {
            self.sort_vectors();
        }
        if let Some(pending) = self.pending.take() {
            self.merge_pending(pending)?;
        }
        self.nvec_nonempty = None;
        convert::conform(self)
    }

    /// Drop zombie slots, rewriting offsets in place. Hypersparse vectors
    /// that become empty are pruned from `h`.
    fn compact_zombies(&mut self) {
        let esize = self.esize();
        let iso = self.iso;
        match &mut self.store {
            Store::Sparse { p, i, x } => {
                let mut w = 0usize;
                let mut pstart = 0usize;
                for k in 0..p.len() - 1 {
                    let pend = p[k + 1];
                    for r in pstart..pend {
                        if !is_zombie(i[r]) {
                            i[w] = i[r];
                            if !iso {
                                x.copy_within(r * esize..(r + 1) * esize, w * esize);
                            }
                            w += 1;
                        }
                    }
                    pstart = pend;
                    p[k + 1] = w;
                }
                i.truncate(w);
                if !iso {
                    x.truncate(w * esize);
                }
            }
            Store::Hyper { p, h, i, x } => {
                let mut w = 0usize;
                let mut nk = 0usize;
                let mut pstart = 0usize;
                let mut np = vec![0usize];
                for k in 0..h.len() {
                    let pend = p[k + 1];
                    let start = w;
                    for r in pstart..pend {
                        if !is_zombie(i[r]) {
                            i[w] = i[r];
                            if !iso {
                                x.copy_within(r * esize..(r + 1) * esize, w * esize);
                            }
                            w += 1;
                        }
                    }
                    pstart = pend;
                    if w > start {
                        h[nk] = h[k];
                        np.push(w);
                        nk += 1;
                    }
                }
                h.truncate(nk);
                *p = np;
                i.truncate(w);
                if !iso {
                    x.truncate(w * esize);
                }
            }
            _ => unreachable!(),
        }
        self.nzombies = 0;
    }

    /// Sort each vector's inner indices, carrying values.
    fn sort_vectors(&mut self) {
        let esize = self.esize();
        let iso = self.iso;
        match &mut self.store {
            Store::Sparse { p, i, x } | Store::Hyper { p, i, x, .. } => {
                for k in 0..p.len() - 1 {
                    let (lo, hi) = (p[k], p[k + 1]);
                    if hi - lo < 2 {
                        continue;
                    }
                    let seg = &i[lo..hi];
                    if seg.windows(2).all(|w| w[0] < w[1]) {
                        continue;
                    }
                    let mut order: Vec<usize> = (0..hi - lo).collect();
                    order.sort_by_key(|&r| seg[r]);
                    let sorted_i: Vec<i64> = order.iter().map(|&r| seg[r]).collect();
                    i[lo..hi].copy_from_slice(&sorted_i);
                    if !iso {
                        let old = x[lo * esize..hi * esize].to_vec();
                        for (dst, &src) in order.iter().enumerate() {
                            x[(lo + dst) * esize..(lo + dst + 1) * esize]
                                .copy_from_slice(&old[src * esize..(src + 1) * esize]);
                        }
                    }
                }
            }
            _ => unreachable!(),
        }
        self.jumbled = false;
    }

    /// Merge pending tuples into sorted storage.
    fn merge_pending(&mut self, pending: Pending) -> Result<()> {
        if pending.len() == 0 {
            return Ok(());
        }
        let esize = self.esize();

        // pending values may break the iso property; an accumulator can
        // change even a matching value on collision
        if self.iso {
            if pending.op.is_some() {
                self.expand_iso();
            } else {
                let iso_bytes = match &self.store {
                    Store::Sparse { x, .. } | Store::Hyper { x, .. } => x[..esize].to_vec(),
                    _ => unreachable!(),
                };
                if let Some(chunk) = pending
                    .vals
                    .chunks_exact(esize)
                    .find(|c| *c != &iso_bytes[..])
                {
                    let diverging = chunk.to_vec();
                    self.expand_iso_for(&diverging);
                }
            }
        }

        // sort tuples by (outer, inner); stable keeps insertion order for
        // the duplicate fold
        let mut order: Vec<usize> = (0..pending.len()).collect();
        order.sort_by_key(|&k| (pending.outer[k], pending.inner[k]));

        // reduce duplicates within the pending list
        let mut t_outer: Vec<usize> = Vec::with_capacity(order.len());
        let mut t_inner: Vec<usize> = Vec::with_capacity(order.len());
        let mut t_vals: Vec<u8> = Vec::with_capacity(order.len() * esize);
        for &k in &order {
            let key = (pending.outer[k], pending.inner[k]);
            let v = &pending.vals[k * esize..(k + 1) * esize];
            if t_outer.last() == Some(&key.0) && t_inner.last() == Some(&key.1) {
                let pos = t_vals.len() - esize;
                match &pending.op {
                    Some(op) => {
                        let folded = fold_through(op, self.typ.code(), esize, &t_vals[pos..], v);
                        t_vals[pos..].copy_from_slice(&folded);
                    }
                    None => t_vals[pos..].copy_from_slice(v),
                }
            } else {
                t_outer.push(key.0);
                t_inner.push(key.1);
                t_vals.extend_from_slice(v);
            }
        }
        // merge the reduced tuples with the stored vectors
        let was_hyper = matches!(self.store, Store::Hyper { .. });
        let view = self.sparse_view();
        let iso = self.iso;
        let mut out_h: Vec<usize> = Vec::new();
        let mut out_p: Vec<usize> = vec![0];
        let mut out_i: Vec<i64> = Vec::with_capacity(view.i.len() + t_inner.len());
        let mut out_x: Vec<u8> = Vec::with_capacity(view.x.len() + t_vals.len());
        let iso_bytes = if iso { view.x[..esize].to_vec() } else { Vec::new() };

        let mut kv = 0usize; // stored vector cursor
        let mut tp = 0usize; // tuple cursor
        let nvec = view.nvec();
        while kv < nvec || tp < t_outer.len() {
            let jv = if kv < nvec { view.outer(kv) } else { usize::MAX };
            let jt = if tp < t_outer.len() {
                t_outer[tp]
            } else {
                usize::MAX
            };
            let j = jv.min(jt);
            let before = out_i.len();
            let mut a = if jv == j { view.range(kv) } else { 0..0 };
            let t_end = {
                let mut e = tp;
                while e < t_outer.len() && t_outer[e] == j {
                    e += 1;
                }
                e
            };
            let mut t = if jt == j { tp..t_end } else { 0..0 };

            while !a.is_empty() || !t.is_empty() {
                let ia = if a.is_empty() {
                    i64::MAX
                } else {
                    view.i[a.start]
                };
                let it = if t.is_empty() {
                    i64::MAX
                } else {
                    t_inner[t.start] as i64
                };
                if ia < it {
                    out_i.push(ia);
                    if !iso {
                        out_x.extend_from_slice(view.val(a.start));
                    }
                    a.start += 1;
                } else if it < ia {
                    out_i.push(it);
                    if !iso {
                        out_x.extend_from_slice(&t_vals[t.start * esize..(t.start + 1) * esize]);
                    }
                    t.start += 1;
                } else {
                    // collision: fold under the pending accumulator, or
                    // let the insert win
                    let tv = &t_vals[t.start * esize..(t.start + 1) * esize];
                    out_i.push(ia);
                    if !iso {
                        match &pending.op {
                            Some(op) => {
                                let folded =
                                    fold_through(op, self.typ.code(), esize, view.val(a.start), tv);
                                out_x.extend_from_slice(&folded);
                            }
                            None => out_x.extend_from_slice(tv),
                        }
                    }
                    a.start += 1;
                    t.start += 1;
                }
            }
            if out_i.len() > before {
                out_h.push(j);
                out_p.push(out_i.len());
            }
            if jv == j {
                kv += 1;
            }
            tp = t_end;
        }

        // iso survives only if the merged values are still uniform; with
        // iso still set here every pending value already matched
        let still_iso = iso;
        let x = if still_iso { iso_bytes } else { out_x };

        self.store = if was_hyper {
            Store::Hyper {
                p: out_p,
                h: out_h,
                i: out_i,
                x,
            }
        } else {
            let mut p = vec![0usize; self.vdim + 1];
            for (idx, &j) in out_h.iter().enumerate() {
                p[j + 1] = out_p[idx + 1] - out_p[idx];
            }
            for k in 0..self.vdim {
                p[k + 1] += p[k];
            }
            Store::Sparse { p, i: out_i, x }
        };
        self.iso = still_iso;
        Ok(())
    }
}
