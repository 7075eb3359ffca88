//! Work slicing for parallel primitives.
//!
//! Every parallel kernel starts by cutting its input into tasks. A
//! **coarse** task owns a contiguous run of whole vectors; a **fine**
//! task owns a contiguous entry slice inside one heavy vector. Slicing
//! depends only on the offset array and the requested task count, so
//! identical inputs always slice identically.
//!
//! The target task count is `32 × threads`, capped so no task drops
//! below [`crate::config::CHUNK`] entries of work.

use crate::config::{self, CHUNK};

/// One unit of schedulable work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Task {
    /// First vector this task touches.
    pub kfirst: usize,
    /// Last vector this task touches (inclusive).
    pub klast: usize,
    /// First entry position owned.
    pub pstart: usize,
    /// One past the last entry position owned.
    pub pend: usize,
    /// Fine tasks own a slice of a single vector.
    pub fine: bool,
}

/// How many tasks a primitive should aim for given its total work.
pub(crate) fn task_count(work: usize) -> usize {
    let threads = config::effective_threads();
    let cap = work.div_ceil(CHUNK).max(1);
    (32 * threads).min(cap)
}

/// Slice the vectors described by offsets `p` into tasks. Vectors whose
/// entry count exceeds the chunk size are split into fine tasks; runs of
/// small vectors are grouped into coarse tasks.
pub(crate) fn slice_work(p: &[usize], ntasks: usize) -> Vec<Task> {
    let nvec = p.len() - 1;
    let total = p[nvec];
    if nvec == 0 {
        return Vec::new();
    }
    let ntasks = ntasks.max(1);
    let chunk = total.div_ceil(ntasks).max(1);

    let mut tasks = Vec::new();
    let mut k = 0usize;
    while k < nvec {
        let len = p[k + 1] - p[k];
        if len > 2 * chunk {
            // heavy vector: split into fine slices
            let pieces = len.div_ceil(chunk);
            for piece in 0..pieces {
                let pstart = p[k] + piece * len / pieces;
                let pend = p[k] + (piece + 1) * len / pieces;
                tasks.push(Task {
                    kfirst: k,
                    klast: k,
                    pstart,
                    pend,
                    fine: true,
                });
            }
            k += 1;
        } else {
            // gather vectors until the task is full
            let kfirst = k;
            let pstart = p[k];
            let mut acc = 0usize;
            while k < nvec && (acc == 0 || acc + (p[k + 1] - p[k]) <= chunk) {
                let next = p[k + 1] - p[k];
                if next > 2 * chunk {
                    break;
                }
                acc += next;
                k += 1;
            }
            tasks.push(Task {
                kfirst,
                klast: k - 1,
                pstart,
                pend: p[k],
                fine: false,
            });
        }
    }
    tasks
}

/// Balanced coarse partition: contiguous vector ranges weighted by entry
/// count. The phase-1 / phase-2 engines use this form directly because a
/// range of whole vectors maps onto a disjoint slice of the output.
pub(crate) fn coarse_ranges(p: &[usize], ntasks: usize) -> Vec<std::ops::Range<usize>> {
    let nvec = p.len() - 1;
    if nvec == 0 {
        return Vec::new();
    }
    let total = p[nvec];
    let ntasks = ntasks.clamp(1, nvec);
    if total == 0 {
        // no entries to weigh; split vectors evenly
        let per = nvec.div_ceil(ntasks);
        return (0..nvec)
            .step_by(per)
            .map(|s| s..(s + per).min(nvec))
            .collect();
    }
    let mut ranges = Vec::with_capacity(ntasks);
    let mut start = 0usize;
    for t in 0..ntasks {
        if start >= nvec {
            break;
        }
        let target = total * (t + 1) / ntasks;
        // advance to the first vector boundary at or past the target
        let mut end = match p.binary_search(&target) {
            Ok(k) => k,
            Err(k) => k,
        };
        end = end.clamp(start + 1, nvec);
        if t + 1 == ntasks {
            end = nvec;
        }
        ranges.push(start..end);
        start = end;
    }
    if let Some(last) = ranges.last_mut() {
        if last.end < nvec {
            last.end = nvec;
        }
    }
    ranges
}

/// Split an index buffer into per-task windows along offset-array
/// boundaries, one window per task range. The windows are disjoint, so
/// phase-2 fills can write in parallel without locks.
pub(crate) fn split_index_slices<'a>(
    buf: &'a mut [i64],
    ranges: &[std::ops::Range<usize>],
    offsets: &[usize],
) -> Vec<&'a mut [i64]> {
    let mut out = Vec::with_capacity(ranges.len());
    let mut rest = buf;
    let mut at = 0usize;
    for range in ranges {
        let end = offsets[range.end];
        let (head, tail) = rest.split_at_mut(end - at);
        out.push(head);
        rest = tail;
        at = end;
    }
    out
}

/// Byte-buffer variant of [`split_index_slices`], scaled by element size.
pub(crate) fn split_byte_slices<'a>(
    buf: &'a mut [u8],
    ranges: &[std::ops::Range<usize>],
    offsets: &[usize],
    esize: usize,
) -> Vec<&'a mut [u8]> {
    let mut out = Vec::with_capacity(ranges.len());
    let mut rest = buf;
    let mut at = 0usize;
    for range in ranges {
        let end = offsets[range.end] * esize;
        let (head, tail) = rest.split_at_mut(end - at);
        out.push(head);
        rest = tail;
        at = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};

    fn setup() {
        config::init(Config::default()).ok();
    }

    #[test]
    fn test_slice_covers_all_vectors() {
        setup();
        let p = vec![0, 3, 3, 10, 11, 20];
        let tasks = slice_work(&p, 4);
        let mut covered = vec![false; 5];
        let mut entries = 0usize;
        for t in &tasks {
            for k in t.kfirst..=t.klast {
                covered[k] = true;
            }
            entries += t.pend - t.pstart;
        }
        assert!(covered.iter().all(|&c| c));
        assert_eq!(entries, 20);
    }

    #[test]
    fn test_heavy_vector_gets_fine_tasks() {
        setup();
        let p = vec![0, 1, 101, 102];
        let tasks = slice_work(&p, 8);
        let fine: Vec<_> = tasks.iter().filter(|t| t.fine).collect();
        assert!(!fine.is_empty());
        assert!(fine.iter().all(|t| t.kfirst == 1 && t.klast == 1));
        let fine_entries: usize = fine.iter().map(|t| t.pend - t.pstart).sum();
        assert_eq!(fine_entries, 100);
    }

    #[test]
    fn test_slicing_is_deterministic() {
        setup();
        let p = vec![0, 5, 9, 9, 40, 44, 60];
        assert_eq!(slice_work(&p, 3), slice_work(&p, 3));
        assert_eq!(coarse_ranges(&p, 3), coarse_ranges(&p, 3));
    }

    #[test]
    fn test_coarse_ranges_partition() {
        setup();
        let p = vec![0, 5, 9, 9, 40, 44, 60];
        let ranges = coarse_ranges(&p, 3);
        assert_eq!(ranges.first().unwrap().start, 0);
        assert_eq!(ranges.last().unwrap().end, 6);
        for w in ranges.windows(2) {
            assert_eq!(w[0].end, w[1].start);
        }
    }

    #[test]
    fn test_task_count_respects_chunk() {
        setup();
        assert_eq!(task_count(10), 1);
        assert!(task_count(1 << 20) > 1);
    }
}
