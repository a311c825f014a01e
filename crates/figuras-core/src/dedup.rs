//! Near-duplicate collapsing for same-label spans.
//!
//! Overlapping chunk windows make the annotator report the same figure
//! twice with slightly different boundaries. Within each label, spans whose
//! IoU reaches the threshold are linked; every connected component keeps a
//! single representative. Spans with different labels are never merged:
//! the same passage may legitimately carry several figures.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

use crate::label::Label;
use crate::overlap::iou;
use crate::span::{CoordinateSpace, Span};

/// Default IoU at which two same-label spans count as duplicates.
pub const DEFAULT_DEDUP_THRESHOLD: f64 = 0.5;

/// Collapses overlapping same-label spans.
#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_THRESHOLD)
    }
}

impl Deduplicator {
    /// Create a deduplicator linking spans with `iou >= threshold`.
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Deduplicate `spans`.
    ///
    /// The representative of a component is the span with the highest
    /// confidence; ties go to the earliest start, then the shortest span,
    /// then input order. The output is sorted by `(start_char, end_char,
    /// label)`, so running it twice changes nothing.
    pub fn dedup<C: CoordinateSpace>(&self, spans: Vec<Span<C>>) -> Vec<Span<C>> {
        let before = spans.len();

        let mut groups: BTreeMap<Label, Vec<(usize, Span<C>)>> = BTreeMap::new();
        for (index, span) in spans.into_iter().enumerate() {
            groups.entry(span.label).or_default().push((index, span));
        }

        let mut kept: Vec<(usize, Span<C>)> = Vec::with_capacity(before);
        for (_, group) in groups {
            kept.extend(self.collapse_group(group));
        }

        kept.sort_by(|(ia, a), (ib, b)| {
            a.start_char
                .cmp(&b.start_char)
                .then(a.end_char.cmp(&b.end_char))
                .then(a.label.cmp(&b.label))
                .then(ia.cmp(ib))
        });

        debug!(
            before,
            after = kept.len(),
            threshold = self.threshold,
            "Deduplicated spans"
        );

        kept.into_iter().map(|(_, span)| span).collect()
    }

    /// Keep one span per connected component of a single-label group.
    fn collapse_group<C: CoordinateSpace>(
        &self,
        group: Vec<(usize, Span<C>)>,
    ) -> Vec<(usize, Span<C>)> {
        let n = group.len();
        let mut components = DisjointSet::new(n);

        for i in 0..n {
            for j in (i + 1)..n {
                if iou(&group[i].1, &group[j].1) >= self.threshold {
                    components.union(i, j);
                }
            }
        }

        // Best member of each component, keyed by root
        let mut best: BTreeMap<usize, usize> = BTreeMap::new();
        for i in 0..n {
            let root = components.find(i);
            match best.get(&root) {
                Some(&current) if !is_better(&group[i], &group[current]) => {}
                _ => {
                    best.insert(root, i);
                }
            }
        }

        let mut keep = vec![false; n];
        for &i in best.values() {
            keep[i] = true;
        }

        group
            .into_iter()
            .zip(keep)
            .filter_map(|(entry, k)| k.then_some(entry))
            .collect()
    }
}

/// Deduplicate with the default threshold.
pub fn dedup<C: CoordinateSpace>(spans: Vec<Span<C>>) -> Vec<Span<C>> {
    Deduplicator::default().dedup(spans)
}

/// Whether `a` should replace `b` as a component's representative.
fn is_better<C: CoordinateSpace>(a: &(usize, Span<C>), b: &(usize, Span<C>)) -> bool {
    let (ia, sa) = a;
    let (ib, sb) = b;
    let order = sa
        .confidence
        .total_cmp(&sb.confidence)
        .then(sb.start_char.cmp(&sa.start_char))
        .then(sb.len().cmp(&sa.len()))
        .then(ib.cmp(ia));
    order == Ordering::Greater
}

/// Union-find over `0..n` with path halving.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}
