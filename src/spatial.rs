//! A point index over a two dimensional plane for proximity queries
use std::cmp::Ordering;

use num_traits::Float;
use thiserror::Error;

/// An error that might occur while building a [`SpatialIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SpatialIndexError {
    #[error("Cannot build a spatial index over an empty element set")]
    EmptyPointSet,
}

/// The coordinate plane a node partitions on. Axes alternate by depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SplitAxis {
    X,
    Y,
}

impl SplitAxis {
    pub const fn of_depth(depth: usize) -> SplitAxis {
        if depth % 2 == 0 {
            SplitAxis::X
        } else {
            SplitAxis::Y
        }
    }

    pub const fn index(&self) -> usize {
        match self {
            SplitAxis::X => 0,
            SplitAxis::Y => 1,
        }
    }
}

/// A node in [`SpatialIndex`]. Nodes live in an arena and address their
/// children by index, so the tree shape is plain data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpatialIndexNode {
    /// The position of the pivot element in the member list
    pub member: usize,
    /// The axis this node partitions its subtrees on
    pub axis: SplitAxis,
    pub left_child: Option<usize>,
    pub right_child: Option<usize>,
}

/// A static k-d tree over two projected coordinates of `T`.
///
/// The index is built once from a finite element list and is read-only
/// afterwards, making a built instance safe to share across threads when
/// `T` is. Elements in a node's left subtree have a split-axis coordinate
/// less than or equal to the node's pivot, right subtree elements greater
/// than or equal to it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpatialIndex<T, V: Float = f64> {
    members: Vec<T>,
    points: Vec<[V; 2]>,
    nodes: Vec<SpatialIndexNode>,
}

impl<T, V: Float> SpatialIndex<T, V> {
    /// Build an index over `members`, projecting each element onto the
    /// plane with `coord_x` and `coord_y`. The projections are evaluated
    /// once per element here and not retained.
    ///
    /// Partitioning recurses on the median of the split axis, alternating
    /// axes by depth. Coordinate ties are broken by input order so the
    /// tree shape is a pure function of the input list.
    pub fn build<X, Y>(members: Vec<T>, coord_x: X, coord_y: Y) -> Result<Self, SpatialIndexError>
    where
        X: Fn(&T) -> V,
        Y: Fn(&T) -> V,
    {
        if members.is_empty() {
            return Err(SpatialIndexError::EmptyPointSet);
        }
        let points: Vec<[V; 2]> = members.iter().map(|m| [coord_x(m), coord_y(m)]).collect();
        let mut nodes = Vec::with_capacity(members.len());
        let mut order: Vec<usize> = (0..members.len()).collect();
        Self::build_node(&points, &mut nodes, &mut order, 0);
        Ok(Self {
            members,
            points,
            nodes,
        })
    }

    fn build_node(
        points: &[[V; 2]],
        nodes: &mut Vec<SpatialIndexNode>,
        subset: &mut [usize],
        depth: usize,
    ) -> usize {
        let axis = SplitAxis::of_depth(depth);
        let k = axis.index();
        subset.sort_unstable_by(|a, b| {
            points[*a][k]
                .partial_cmp(&points[*b][k])
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(b))
        });
        let mid = subset.len() / 2;
        let node_index = nodes.len();
        nodes.push(SpatialIndexNode {
            member: subset[mid],
            axis,
            left_child: None,
            right_child: None,
        });
        let (left, rest) = subset.split_at_mut(mid);
        let right = &mut rest[1..];
        if !left.is_empty() {
            let child = Self::build_node(points, nodes, left, depth + 1);
            nodes[node_index].left_child = Some(child);
        }
        if !right.is_empty() {
            let child = Self::build_node(points, nodes, right, depth + 1);
            nodes[node_index].right_child = Some(child);
        }
        node_index
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[T] {
        &self.members
    }

    /// The node arena, for inspecting the tree shape
    pub fn nodes(&self) -> &[SpatialIndexNode] {
        &self.nodes
    }

    pub fn root(&self) -> &SpatialIndexNode {
        &self.nodes[0]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.members.iter()
    }

    fn distance2(a: &[V; 2], b: &[V; 2]) -> V {
        let dx = a[0] - b[0];
        let dy = a[1] - b[1];
        dx * dx + dy * dy
    }

    /// Find the element closest to `query` by Euclidean distance on the
    /// projected plane.
    ///
    /// Subtrees whose split-axis bound already exceeds the current best
    /// distance are pruned. When two elements are exactly equidistant
    /// from the query, the first one encountered in traversal order (the
    /// near side of each split is descended first) is kept; a later
    /// equal-distance candidate never displaces it.
    pub fn nearest_neighbor(&self, query: (V, V)) -> &T {
        let q = [query.0, query.1];
        let mut best_member = self.nodes[0].member;
        let mut best_dist2 = V::infinity();
        self.nearest_into(0, &q, &mut best_member, &mut best_dist2);
        &self.members[best_member]
    }

    fn nearest_into(&self, node_index: usize, q: &[V; 2], best_member: &mut usize, best_dist2: &mut V) {
        let node = &self.nodes[node_index];
        let p = &self.points[node.member];
        let d2 = Self::distance2(p, q);
        if d2 < *best_dist2 {
            *best_dist2 = d2;
            *best_member = node.member;
        }
        let delta = q[node.axis.index()] - p[node.axis.index()];
        let (near, far) = if delta < V::zero() {
            (node.left_child, node.right_child)
        } else {
            (node.right_child, node.left_child)
        };
        if let Some(child) = near {
            self.nearest_into(child, q, best_member, best_dist2);
        }
        if let Some(child) = far {
            if delta * delta <= *best_dist2 {
                self.nearest_into(child, q, best_member, best_dist2);
            }
        }
    }

    /// Collect every element whose coordinates fall inside the closed
    /// rectangle spanned by `lower` and `upper`, in no particular order.
    ///
    /// Malformed bounds, where `lower` exceeds `upper` on either axis,
    /// select nothing.
    pub fn range_search(&self, lower: (V, V), upper: (V, V)) -> Vec<&T> {
        let mut hits = Vec::new();
        if lower.0 > upper.0 || lower.1 > upper.1 {
            return hits;
        }
        self.range_into(0, &[lower.0, lower.1], &[upper.0, upper.1], &mut hits);
        hits
    }

    fn range_into<'a>(&'a self, node_index: usize, lo: &[V; 2], hi: &[V; 2], hits: &mut Vec<&'a T>) {
        let node = &self.nodes[node_index];
        let p = &self.points[node.member];
        if lo[0] <= p[0] && p[0] <= hi[0] && lo[1] <= p[1] && p[1] <= hi[1] {
            hits.push(&self.members[node.member]);
        }
        let k = node.axis.index();
        if let Some(child) = node.left_child {
            if lo[k] <= p[k] {
                self.range_into(child, lo, hi, hits);
            }
        }
        if let Some(child) = node.right_child {
            if p[k] <= hi[k] {
                self.range_into(child, lo, hi, hits);
            }
        }
    }

    /// Collect every element within Euclidean `radius` of `query`, in no
    /// particular order, pruning subtrees by their split-axis bound the
    /// same way [`SpatialIndex::nearest_neighbor`] does.
    ///
    /// A negative or non-finite radius selects nothing.
    pub fn neighbor_search(&self, query: (V, V), radius: V) -> Vec<&T> {
        let mut hits = Vec::new();
        if !(radius.is_finite() && radius >= V::zero()) {
            return hits;
        }
        let q = [query.0, query.1];
        self.neighbors_into(0, &q, radius * radius, &mut hits);
        hits
    }

    fn neighbors_into<'a>(&'a self, node_index: usize, q: &[V; 2], radius2: V, hits: &mut Vec<&'a T>) {
        let node = &self.nodes[node_index];
        let p = &self.points[node.member];
        if Self::distance2(p, q) <= radius2 {
            hits.push(&self.members[node.member]);
        }
        let delta = q[node.axis.index()] - p[node.axis.index()];
        let (near, far) = if delta < V::zero() {
            (node.left_child, node.right_child)
        } else {
            (node.right_child, node.left_child)
        };
        if let Some(child) = near {
            self.neighbors_into(child, q, radius2, hits);
        }
        if let Some(child) = far {
            if delta * delta <= radius2 {
                self.neighbors_into(child, q, radius2, hits);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn example_points() -> Vec<(f64, f64)> {
        vec![(0.0, 0.0), (1.0, 8.0), (8.0, 3.0), (3.0, 2.0), (5.0, 9.0), (4.0, 3.0)]
    }

    fn build_example() -> SpatialIndex<(f64, f64)> {
        SpatialIndex::build(example_points(), |p| p.0, |p| p.1).unwrap()
    }

    // A small multiplicative congruential stream, enough to scatter
    // points without pulling in an RNG dependency.
    fn scatter(n: usize) -> Vec<(f64, f64)> {
        let mut state: u64 = 0x2545F4914F6CDD1D;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) as f64) / ((1u64 << 31) as f64) * 100.0
        };
        (0..n).map(|_| (next(), next())).collect()
    }

    fn brute_force_nearest(points: &[(f64, f64)], q: (f64, f64)) -> (f64, f64) {
        *points
            .iter()
            .min_by(|a, b| {
                let da = (a.0 - q.0).powi(2) + (a.1 - q.1).powi(2);
                let db = (b.0 - q.0).powi(2) + (b.1 - q.1).powi(2);
                da.total_cmp(&db)
            })
            .unwrap()
    }

    #[test]
    fn test_empty_set_is_an_error() {
        let res: Result<SpatialIndex<(f64, f64)>, _> = SpatialIndex::build(vec![], |p| p.0, |p| p.1);
        assert_eq!(res.unwrap_err(), SpatialIndexError::EmptyPointSet);
    }

    #[test]
    fn test_shape() {
        let tree = build_example();
        assert_eq!(tree.len(), 6);
        assert_eq!(tree.nodes().len(), 6);
        assert_eq!(tree.root().axis, SplitAxis::X);
        // Root pivots on the median x coordinate
        assert_eq!(tree.members()[tree.root().member], (4.0, 3.0));
        let leaves = tree
            .nodes()
            .iter()
            .filter(|n| n.left_child.is_none() && n.right_child.is_none())
            .count();
        assert!(leaves >= 2);
    }

    #[test]
    fn test_nearest_neighbor() {
        let tree = build_example();
        assert_eq!(*tree.nearest_neighbor((4.0, 6.0)), (4.0, 3.0));
        assert_eq!(*tree.nearest_neighbor((0.1, 0.1)), (0.0, 0.0));
        // A query far outside the indexed extent still resolves
        assert_eq!(*tree.nearest_neighbor((100.0, 100.0)), (5.0, 9.0));
    }

    #[test]
    fn test_nearest_neighbor_matches_brute_force() {
        let points = scatter(257);
        let tree = SpatialIndex::build(points.clone(), |p| p.0, |p| p.1).unwrap();
        let queries = scatter(64)
            .into_iter()
            .map(|(x, y)| (x * 1.37 - 20.0, y * 0.91 + 3.0));
        for q in queries.chain([(0.0, 0.0), (-50.0, 175.0)]) {
            let expected = brute_force_nearest(&points, q);
            assert_eq!(*tree.nearest_neighbor(q), expected, "query {q:?}");
        }
    }

    #[test]
    fn test_nearest_neighbor_tie_is_deterministic() {
        let points = vec![(1.0, 0.0), (-1.0, 0.0), (0.0, 1.0), (0.0, -1.0)];
        let tree = SpatialIndex::build(points, |p| p.0, |p| p.1).unwrap();
        // All four candidates are exactly equidistant from the origin;
        // repeated queries must keep returning the same one.
        let first = *tree.nearest_neighbor((0.0, 0.0));
        for _ in 0..4 {
            assert_eq!(*tree.nearest_neighbor((0.0, 0.0)), first);
        }
    }

    #[test]
    fn test_range_search() {
        let tree = build_example();
        let mut hits: Vec<(f64, f64)> = tree
            .range_search((1.0, 3.0), (5.0, 8.0))
            .into_iter()
            .copied()
            .collect();
        hits.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(hits, vec![(1.0, 8.0), (4.0, 3.0)]);
    }

    #[test]
    fn test_range_search_matches_brute_force() {
        let points = scatter(200);
        let tree = SpatialIndex::build(points.clone(), |p| p.0, |p| p.1).unwrap();
        for window in [((10.0, 10.0), (40.0, 60.0)), ((0.0, 0.0), (100.0, 100.0)), ((80.0, 5.0), (95.0, 20.0))] {
            let mut hits: Vec<(f64, f64)> = tree
                .range_search(window.0, window.1)
                .into_iter()
                .copied()
                .collect();
            let mut expected: Vec<(f64, f64)> = points
                .iter()
                .filter(|p| {
                    window.0 .0 <= p.0 && p.0 <= window.1 .0 && window.0 .1 <= p.1 && p.1 <= window.1 .1
                })
                .copied()
                .collect();
            hits.sort_by(|a, b| a.partial_cmp(b).unwrap());
            expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(hits, expected);
        }
    }

    #[test]
    fn test_malformed_bounds_select_nothing() {
        let tree = build_example();
        assert!(tree.range_search((5.0, 3.0), (1.0, 8.0)).is_empty());
        assert!(tree.range_search((1.0, 8.0), (5.0, 3.0)).is_empty());
    }

    #[test]
    fn test_neighbor_search() {
        let tree = build_example();
        let mut hits: Vec<(f64, f64)> = tree
            .neighbor_search((4.0, 3.0), 2.5)
            .into_iter()
            .copied()
            .collect();
        hits.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(hits, vec![(3.0, 2.0), (4.0, 3.0)]);
        assert!(tree.neighbor_search((4.0, 3.0), -1.0).is_empty());
        assert!(tree.neighbor_search((4.0, 3.0), f64::NAN).is_empty());
    }

    #[test]
    fn test_neighbor_search_matches_brute_force() {
        let points = scatter(200);
        let tree = SpatialIndex::build(points.clone(), |p| p.0, |p| p.1).unwrap();
        for (q, radius) in [((50.0, 50.0), 15.0), ((0.0, 0.0), 40.0), ((90.0, 10.0), 5.0)] {
            let mut hits: Vec<(f64, f64)> = tree
                .neighbor_search(q, radius)
                .into_iter()
                .copied()
                .collect();
            let mut expected: Vec<(f64, f64)> = points
                .iter()
                .filter(|p| (p.0 - q.0).powi(2) + (p.1 - q.1).powi(2) <= radius * radius)
                .copied()
                .collect();
            hits.sort_by(|a, b| a.partial_cmp(b).unwrap());
            expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(hits, expected);
        }
    }

    #[test]
    fn test_single_element() {
        let tree = SpatialIndex::build(vec![(2.0, 3.0)], |p: &(f64, f64)| p.0, |p| p.1).unwrap();
        assert_eq!(*tree.nearest_neighbor((100.0, -40.0)), (2.0, 3.0));
        assert_eq!(tree.range_search((0.0, 0.0), (5.0, 5.0)).len(), 1);
        assert_eq!(tree.neighbor_search((2.0, 3.0), 0.0).len(), 1);
    }
}
