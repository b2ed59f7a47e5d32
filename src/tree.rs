//! Static interval tree over the annotations of one reference
//!
//! The tree is an implicit augmented binary search tree laid out in a single
//! sorted array: intervals are sorted by start, node `i` at level `k` has its
//! lowest `k` bits set, and every node stores the largest end found in its
//! subtree. Overlap queries walk the tree top down and prune every subtree whose
//! largest end lies before the query, which keeps the average cost logarithmic in
//! the number of stored intervals even when many of them overlap.

use std::cmp::Ordering;

use crate::record::IntervalAnnotation;

/// Subtrees at or below this level are scanned linearly
const SCAN_LEVEL: u32 = 3;

#[derive(Debug, Clone)]
struct Node {
    /// Inclusive start
    start: i64,
    /// Exclusive end
    end: i64,
    /// Largest exclusive end in the subtree rooted here
    max_end: i64,
    annotation: IntervalAnnotation,
}

/// Interval tree of one reference, immutable once built
#[derive(Debug, Clone, Default)]
pub struct IntervalTree {
    nodes: Vec<Node>,
    /// Level of the root node, `None` for an empty tree
    root_level: Option<u32>,
}
impl IntervalTree {
    /// Builds a tree from intervals in any order
    ///
    /// Intervals are sorted by `(start, end, payload)` first, so the tree and its
    /// query results do not depend on the input order.
    #[must_use]
    pub fn new(mut intervals: Vec<IntervalAnnotation>) -> Self {
        intervals.sort_unstable();
        let mut nodes: Vec<Node> = intervals
            .into_iter()
            .map(|annotation| {
                let start = i64::from(annotation.start);
                let end = i64::from(annotation.end) + 1;
                Node {
                    start,
                    end,
                    max_end: end,
                    annotation,
                }
            })
            .collect();
        let root_level = index_nodes(&mut nodes);
        Self { nodes, root_level }
    }

    /// Number of stored intervals
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over the stored intervals in `(start, end, payload)` order
    pub fn iter(&self) -> impl Iterator<Item = &IntervalAnnotation> {
        self.nodes.iter().map(|node| &node.annotation)
    }

    /// Returns all stored intervals overlapping the inclusive interval `[start, end]`
    ///
    /// Results are in `(start, end, payload)` order.
    #[must_use]
    pub fn query(&self, start: i64, end: i64) -> Vec<&IntervalAnnotation> {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let mut hits = Vec::new();
        self.for_each_overlap(start, end.saturating_add(1), |idx| hits.push(&self.nodes[idx].annotation));
        hits
    }

    /// Finds the stored interval with the largest overlap with `[start, end]`
    ///
    /// The interval is returned only if the overlap covers at least `min_coverage`
    /// of the query length. Among candidates with equal overlap the shortest
    /// interval wins, then the lowest start, then the lowest end, then the
    /// smallest payload, so the choice never depends on storage order.
    #[must_use]
    pub fn best_interval(&self, start: i64, end: i64, min_coverage: f64) -> Option<&IntervalAnnotation> {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let end_excl = end.saturating_add(1);
        let mut best: Option<(i64, &Node)> = None;
        self.for_each_overlap(start, end_excl, |idx| {
            let node = &self.nodes[idx];
            let overlap = node.end.min(end_excl) - node.start.max(start);
            let better = match best {
                None => true,
                Some((best_overlap, best_node)) => match overlap.cmp(&best_overlap) {
                    Ordering::Greater => true,
                    Ordering::Less => false,
                    Ordering::Equal => tie_break(node, best_node) == Ordering::Less,
                },
            };
            if better {
                best = Some((overlap, node));
            }
        });

        let (overlap, node) = best?;
        let query_len = i128::from(end) - i128::from(start) + 1;
        #[allow(clippy::cast_precision_loss)]
        let coverage = overlap as f64 / query_len as f64;
        (coverage >= min_coverage).then_some(&node.annotation)
    }

    /// Calls `f` with the index of every node overlapping the half-open `[start, end)`
    ///
    /// Indices are visited in ascending order.
    fn for_each_overlap<F: FnMut(usize)>(&self, start: i64, end: i64, mut f: F) {
        let Some(root_level) = self.root_level else {
            return;
        };
        let n = self.nodes.len();
        let mut stack: Vec<Frame> = Vec::with_capacity(64);
        stack.push(Frame {
            level: root_level,
            idx: (1usize << root_level) - 1,
            left_done: false,
        });
        while let Some(frame) = stack.pop() {
            if frame.level <= SCAN_LEVEL {
                let first = frame.idx >> frame.level << frame.level;
                let last = (first + (1usize << (frame.level + 1)) - 1).min(n);
                for idx in first..last {
                    let node = &self.nodes[idx];
                    if node.start >= end {
                        break;
                    }
                    if start < node.end {
                        f(idx);
                    }
                }
            } else if !frame.left_done {
                let left = frame.idx - (1usize << (frame.level - 1));
                stack.push(Frame {
                    left_done: true,
                    ..frame
                });
                // the left child may lie past the end of the array
                if left >= n || self.nodes[left].max_end > start {
                    stack.push(Frame {
                        level: frame.level - 1,
                        idx: left,
                        left_done: false,
                    });
                }
            } else if frame.idx < n && self.nodes[frame.idx].start < end {
                if start < self.nodes[frame.idx].end {
                    f(frame.idx);
                }
                stack.push(Frame {
                    level: frame.level - 1,
                    idx: frame.idx + (1usize << (frame.level - 1)),
                    left_done: false,
                });
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    level: u32,
    idx: usize,
    left_done: bool,
}

fn tie_break(a: &Node, b: &Node) -> Ordering {
    (a.end - a.start)
        .cmp(&(b.end - b.start))
        .then_with(|| a.annotation.cmp(&b.annotation))
}

/// Fills in the subtree maxima of nodes sorted by start and returns the root level
fn index_nodes(nodes: &mut [Node]) -> Option<u32> {
    let n = nodes.len();
    if n == 0 {
        return None;
    }

    // leaves
    let mut last_idx = 0;
    let mut last = 0;
    for idx in (0..n).step_by(2) {
        last_idx = idx;
        nodes[idx].max_end = nodes[idx].end;
        last = nodes[idx].max_end;
    }

    let mut level = 1;
    while (1usize << level) <= n {
        let half = 1usize << (level - 1);
        let first = (half << 1) - 1;
        let step = half << 2;
        for idx in (first..n).step_by(step) {
            let left = nodes[idx - half].max_end;
            let right = if idx + half < n {
                nodes[idx + half].max_end
            } else {
                last
            };
            nodes[idx].max_end = nodes[idx].end.max(left).max(right);
        }
        // track the max end of the rightmost subtree for nodes whose right child is missing
        last_idx = if (last_idx >> level) & 1 == 1 {
            last_idx - half
        } else {
            last_idx + half
        };
        if last_idx < n && nodes[last_idx].max_end > last {
            last = nodes[last_idx].max_end;
        }
        level += 1;
    }
    Some(level - 1)
}
