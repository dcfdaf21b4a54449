use std::collections::HashMap;

/// Maximum incoming message value per target, under point updates.
///
/// For every target `t` (a variable for the pi family, a precision
/// variable for the a and c families) the index answers
/// `max_s value(t, s)` over the fixed set of sources `s` (factors)
/// feeding into `t`. The source set is fixed at construction; only the
/// values change. Ties are broken towards the smallest source index.
///
/// Stored as one flat arena of per-target binary max-heaps (the same
/// offset-vector layout used for the factor rows), plus a back-index
/// from (target, source) to the current heap slot, so a point update
/// costs O(log s) where s is the in-degree of the target.
#[derive(Debug)]
pub struct MaxValueIndex {
    row_offset: Vec<usize>,
    heap_source: Vec<usize>,
    heap_value: Vec<f64>,
    slot: HashMap<(usize, usize), usize>,
}

impl MaxValueIndex {
    /// Builds the index from (target, source, value) entries.
    /// Panics if the same (target, source) pair appears twice or a
    /// target is out of range.
    pub fn new<I>(num_targets: usize, entries: I) -> Self
    where
        I: IntoIterator<Item = (usize, usize, f64)>,
    {
        let entries: Vec<(usize, usize, f64)> = entries.into_iter().collect();

        // Offsets by counting sort over targets
        let mut row_offset = vec![0; num_targets + 1];
        for (target, _, _) in &entries {
            assert!(*target < num_targets, "target {} out of range", target);
            row_offset[target + 1] += 1;
        }
        for t in 0..num_targets {
            row_offset[t + 1] += row_offset[t];
        }

        // Fill the arena in entry order
        let total = entries.len();
        let mut cursor = row_offset.clone();
        let mut heap_source = vec![0; total];
        let mut heap_value = vec![0.0; total];
        for (target, source, value) in &entries {
            let s = cursor[*target];
            cursor[*target] += 1;
            heap_source[s] = *source;
            heap_value[s] = *value;
        }

        let mut index = MaxValueIndex {
            row_offset,
            heap_source,
            heap_value,
            slot: HashMap::with_capacity(total),
        };

        // Heapify each row, then record final slots in the back-index
        for t in 0..num_targets {
            let (base, len) = index.row(t);
            for l in (0..len / 2).rev() {
                index.sift_down(t, base, len, l);
            }
        }
        for s in 0..total {
            let t = index.target_of_slot(s);
            let prev = index.slot.insert((t, index.heap_source[s]), s);
            assert!(prev.is_none(), "duplicate (target, source) entry");
        }
        index
    }

    pub fn num_targets(&self) -> usize {
        self.row_offset.len() - 1
    }

    // In-degree of a target
    pub fn len(&self, target: usize) -> usize {
        self.row_offset[target + 1] - self.row_offset[target]
    }

    pub fn is_empty(&self, target: usize) -> bool {
        self.len(target) == 0
    }

    /// Current maximum value over all sources of `target`, or negative
    /// infinity if no source feeds into it.
    pub fn max(&self, target: usize) -> f64 {
        let (base, len) = self.row(target);
        if len == 0 {
            f64::NEG_INFINITY
        } else {
            self.heap_value[base]
        }
    }

    /// Source attaining the maximum (smallest source index on ties).
    pub fn max_source(&self, target: usize) -> Option<usize> {
        let (base, len) = self.row(target);
        (len > 0).then(|| self.heap_source[base])
    }

    /// What `max(target)` would become after `update(target, source,
    /// value)`, answered in O(1) without mutating the index.
    pub fn max_if_replaced(&self, target: usize, source: usize, value: f64) -> f64 {
        let (base, len) = self.row(target);
        let s = self.slot[&(target, source)];
        if s == base {
            // Replacing the root: the runner-up is one of its children
            let mut best = value;
            if len > 1 {
                best = best.max(self.heap_value[base + 1]);
            }
            if len > 2 {
                best = best.max(self.heap_value[base + 2]);
            }
            best
        } else {
            value.max(self.heap_value[base])
        }
    }

    /// Replaces the stored value for (target, source) and restores the
    /// heap order. O(log s). Panics if the pair was not registered at
    /// construction.
    pub fn update(&mut self, target: usize, source: usize, value: f64) {
        let (base, len) = self.row(target);
        let s = self.slot[&(target, source)];
        self.heap_value[s] = value;
        let l = s - base;
        if l > 0 && self.ranks_above(s, base + (l - 1) / 2) {
            self.sift_up(target, base, l);
        } else {
            self.sift_down_tracked(target, base, len, l);
        }
    }

    fn row(&self, target: usize) -> (usize, usize) {
        let base = self.row_offset[target];
        (base, self.row_offset[target + 1] - base)
    }

    fn target_of_slot(&self, s: usize) -> usize {
        // Only used during construction; rows are short, offsets sorted
        self.row_offset.partition_point(|&off| off <= s) - 1
    }

    // Strict heap order: larger value first, smaller source on ties
    fn ranks_above(&self, s1: usize, s2: usize) -> bool {
        let (v1, v2) = (self.heap_value[s1], self.heap_value[s2]);
        v1 > v2 || (v1 == v2 && self.heap_source[s1] < self.heap_source[s2])
    }

    fn swap_slots(&mut self, target: usize, s1: usize, s2: usize) {
        self.heap_source.swap(s1, s2);
        self.heap_value.swap(s1, s2);
        self.slot.insert((target, self.heap_source[s1]), s1);
        self.slot.insert((target, self.heap_source[s2]), s2);
    }

    fn sift_up(&mut self, target: usize, base: usize, mut l: usize) {
        while l > 0 {
            let p = (l - 1) / 2;
            if self.ranks_above(base + l, base + p) {
                self.swap_slots(target, base + l, base + p);
                l = p;
            } else {
                break;
            }
        }
    }

    // Construction-time variant: the back-index is not populated yet
    fn sift_down(&mut self, _target: usize, base: usize, len: usize, mut l: usize) {
        loop {
            let c = 2 * l + 1;
            if c >= len {
                break;
            }
            let mut best = c;
            if c + 1 < len && self.ranks_above(base + c + 1, base + c) {
                best = c + 1;
            }
            if self.ranks_above(base + best, base + l) {
                self.heap_source.swap(base + l, base + best);
                self.heap_value.swap(base + l, base + best);
                l = best;
            } else {
                break;
            }
        }
    }

    fn sift_down_tracked(&mut self, target: usize, base: usize, len: usize, mut l: usize) {
        loop {
            let c = 2 * l + 1;
            if c >= len {
                break;
            }
            let mut best = c;
            if c + 1 < len && self.ranks_above(base + c + 1, base + c) {
                best = c + 1;
            }
            if self.ranks_above(base + best, base + l) {
                self.swap_slots(target, base + l, base + best);
                l = best;
            } else {
                break;
            }
        }
    }
}
