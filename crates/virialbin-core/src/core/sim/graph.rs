/// Largest point count whose edges fit in the 64-bit mask.
pub const MAX_POINTS: usize = 11;

/// An undirected graph on `n` labeled points, stored as a bitmask over point pairs.
///
/// Pair `(i, j)` with `i < j` occupies bit [`edge_index`]`(n, i, j)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlapGraph {
    n: usize,
    mask: u64,
}

/// Bit position of the pair `(i, j)`, `i < j`, in a graph of `n` points.
#[inline]
pub fn edge_index(n: usize, i: usize, j: usize) -> usize {
    debug_assert!(i < j && j < n);
    i * n - i * (i + 1) / 2 + (j - i - 1)
}

/// Number of point pairs in a graph of `n` points.
#[inline]
pub fn pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

impl OverlapGraph {
    pub fn empty(n: usize) -> Self {
        debug_assert!(n <= MAX_POINTS);
        Self { n, mask: 0 }
    }

    pub fn from_mask(n: usize, mask: u64) -> Self {
        debug_assert!(n <= MAX_POINTS);
        Self { n, mask }
    }

    pub fn complete(n: usize) -> Self {
        let pairs = pair_count(n);
        let mask = if pairs >= 64 { u64::MAX } else { (1u64 << pairs) - 1 };
        Self { n, mask }
    }

    #[inline]
    pub fn point_count(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn mask(&self) -> u64 {
        self.mask
    }

    pub fn add_edge(&mut self, i: usize, j: usize) {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        self.mask |= 1 << edge_index(self.n, i, j);
    }

    #[inline]
    pub fn has_edge(&self, i: usize, j: usize) -> bool {
        if i == j {
            return false;
        }
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        self.mask & (1 << edge_index(self.n, i, j)) != 0
    }

    #[inline]
    pub fn edge_count(&self) -> u32 {
        self.mask.count_ones()
    }

    /// Neighbors of point `i` as a bitmask over points.
    pub fn neighbors(&self, i: usize) -> u32 {
        (0..self.n)
            .filter(|&j| self.has_edge(i, j))
            .fold(0, |acc, j| acc | (1 << j))
    }

    pub fn degree(&self, i: usize) -> u32 {
        self.neighbors(i).count_ones()
    }

    pub fn triangle_count(&self) -> u32 {
        let mut count = 0;
        for i in 0..self.n {
            for j in (i + 1)..self.n {
                if !self.has_edge(i, j) {
                    continue;
                }
                for k in (j + 1)..self.n {
                    if self.has_edge(i, k) && self.has_edge(j, k) {
                        count += 1;
                    }
                }
            }
        }
        count
    }

    /// Whether every point is reachable from every other.
    pub fn is_connected(&self) -> bool {
        self.is_connected_without(None)
    }

    /// Whether the graph stays connected after removing any single point.
    ///
    /// Two points are biconnected exactly when they share an edge.
    pub fn is_biconnected(&self) -> bool {
        match self.n {
            0 | 1 => false,
            2 => self.mask & 1 != 0,
            _ => (0..self.n).all(|v| self.is_connected_without(Some(v))),
        }
    }

    /// Whether every edge of `other` is also an edge of `self`.
    #[inline]
    pub fn contains(&self, other_mask: u64) -> bool {
        other_mask & !self.mask == 0
    }

    fn is_connected_without(&self, skipped: Option<usize>) -> bool {
        let all: u32 = if self.n >= 32 { u32::MAX } else { (1 << self.n) - 1 };
        let target = match skipped {
            Some(v) => all & !(1 << v),
            None => all,
        };
        if target == 0 {
            return true;
        }
        let neighbors: Vec<u32> = (0..self.n).map(|i| self.neighbors(i) & target).collect();
        let start = target.trailing_zeros();
        let mut seen = 1u32 << start;
        let mut frontier = seen;
        while frontier != 0 {
            let i = frontier.trailing_zeros() as usize;
            frontier &= frontier - 1;
            let fresh = neighbors[i] & !seen;
            seen |= fresh;
            frontier |= fresh;
        }
        seen == target
    }
}

/// Edge masks of every biconnected graph on `n` labeled points, in ascending mask order.
pub fn biconnected_subgraphs(n: usize) -> Vec<u64> {
    let pairs = pair_count(n);
    debug_assert!(pairs < 64);
    (0..(1u64 << pairs))
        .filter(|&mask| OverlapGraph::from_mask(n, mask).is_biconnected())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: usize, edges: &[(usize, usize)]) -> OverlapGraph {
        let mut g = OverlapGraph::empty(n);
        for &(i, j) in edges {
            g.add_edge(i, j);
        }
        g
    }

    #[test]
    fn edge_index_enumerates_pairs_in_row_order() {
        let n = 5;
        let mut expected = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                assert_eq!(edge_index(n, i, j), expected);
                expected += 1;
            }
        }
        assert_eq!(expected, pair_count(n));
    }

    #[test]
    fn degree_and_triangles_of_small_graph() {
        let g = graph(4, &[(0, 1), (1, 2), (0, 2), (2, 3)]);
        assert_eq!(g.edge_count(), 4);
        assert_eq!(g.degree(2), 3);
        assert_eq!(g.degree(3), 1);
        assert_eq!(g.triangle_count(), 1);
        assert!(g.has_edge(2, 0));
        assert!(!g.has_edge(1, 3));
    }

    #[test]
    fn ring_is_biconnected_but_path_is_not() {
        let ring = graph(4, &[(0, 1), (1, 2), (2, 3), (3, 0)]);
        let path = graph(4, &[(0, 1), (1, 2), (2, 3)]);
        assert!(ring.is_biconnected());
        assert!(path.is_connected());
        assert!(!path.is_biconnected());
        assert!(!graph(4, &[(0, 1), (2, 3)]).is_connected());
    }

    #[test]
    fn two_points_are_biconnected_when_joined() {
        assert!(graph(2, &[(0, 1)]).is_biconnected());
        assert!(!OverlapGraph::empty(2).is_biconnected());
    }

    #[test]
    fn biconnected_counts_match_known_sequence() {
        assert_eq!(biconnected_subgraphs(2).len(), 1);
        assert_eq!(biconnected_subgraphs(3).len(), 1);
        assert_eq!(biconnected_subgraphs(4).len(), 10);
        assert_eq!(biconnected_subgraphs(5).len(), 238);
    }

    #[test]
    fn complete_graph_contains_every_subgraph() {
        let full = OverlapGraph::complete(4);
        assert_eq!(full.edge_count(), 6);
        assert!(biconnected_subgraphs(4).iter().all(|&m| full.contains(m)));
        assert!(!graph(4, &[(0, 1)]).contains(full.mask()));
    }
}
