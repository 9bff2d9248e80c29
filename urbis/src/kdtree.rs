//! 2-D median-split KD-tree for spatial partitioning.
//!
//! The split dimension alternates with depth (even depths split on x, odd
//! on y). Bulk loading produces a balanced tree; incremental inserts do not
//! rebalance, so callers rebuild via bulk load when skew degrades. Each node
//! tracks the bounding box and size of its subtree, which drives query
//! pruning and the block partitioning used by the index builder.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::bounding_box::BoundingBox;
use crate::geometry::Point;

/// Typed payload carried by tree and quadtree entries.
///
/// Carriers are ids into the page pool, never pointers; they must be
/// re-resolved after any pool mutation that rebuilds the owning tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemRef {
    None,
    /// A spatial object id.
    Object(u64),
    /// A page id in the pool.
    Page(u32),
}

/// An input point or query hit: a location plus its identity and payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KdEntry {
    pub point: Point,
    pub object_id: u64,
    pub data: ItemRef,
}

impl KdEntry {
    pub fn new(point: Point, object_id: u64, data: ItemRef) -> Self {
        Self {
            point,
            object_id,
            data,
        }
    }
}

#[derive(Debug, Clone)]
struct KdNode {
    entry: KdEntry,
    seq: u64,
    split_dim: usize,
    bounds: BoundingBox,
    subtree_size: usize,
    left: Option<Box<KdNode>>,
    right: Option<Box<KdNode>>,
}

impl KdNode {
    fn leaf(entry: KdEntry, seq: u64, split_dim: usize) -> Box<KdNode> {
        Box::new(KdNode {
            bounds: BoundingBox::from_point(&entry.point),
            entry,
            seq,
            split_dim,
            subtree_size: 1,
            left: None,
            right: None,
        })
    }

    fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Recomputes bounds and subtree size from the children.
    fn refresh_from_children(&mut self) {
        self.bounds = BoundingBox::from_point(&self.entry.point);
        self.subtree_size = 1;
        if let Some(left) = &self.left {
            self.bounds.expand(&left.bounds);
            self.subtree_size += left.subtree_size;
        }
        if let Some(right) = &self.right {
            self.bounds.expand(&right.bounds);
            self.subtree_size += right.subtree_size;
        }
    }
}

/// Candidate ordering for k-nearest: smaller (dist², id, seq) is better.
/// The heap keeps the *worst* candidate on top so it can be displaced.
struct Candidate {
    dist_sq: f64,
    entry: KdEntry,
    seq: u64,
}

impl Candidate {
    fn rank(&self) -> (f64, u64, u64) {
        (self.dist_sq, self.entry.object_id, self.seq)
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        let (d1, i1, s1) = self.rank();
        let (d2, i2, s2) = other.rank();
        d1.total_cmp(&d2).then(i1.cmp(&i2)).then(s1.cmp(&s2))
    }
}

/// A 2-D KD-tree over points with typed payloads.
#[derive(Debug, Default, Clone)]
pub struct KdTree {
    root: Option<Box<KdNode>>,
    size: usize,
    bounds: BoundingBox,
    next_seq: u64,
}

impl KdTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self {
            root: None,
            size: 0,
            bounds: BoundingBox::empty(),
            next_seq: 0,
        }
    }

    /// Number of points in the tree.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Bounding box of all points.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Builds a balanced tree from the given entries.
    ///
    /// Entries are sorted by the current split dimension at each level and
    /// the element at index ⌊n/2⌋ becomes the node; insertion order of the
    /// input is remembered for deterministic distance tie-breaking.
    pub fn bulk_load(entries: Vec<KdEntry>) -> Self {
        let mut bounds = BoundingBox::empty();
        for e in &entries {
            bounds.expand_point(&e.point);
        }
        let size = entries.len();
        let mut seeded: Vec<(KdEntry, u64)> = entries
            .into_iter()
            .enumerate()
            .map(|(i, e)| (e, i as u64))
            .collect();
        let root = Self::build_recursive(&mut seeded, 0);
        Self {
            root,
            size,
            bounds,
            next_seq: size as u64,
        }
    }

    fn build_recursive(entries: &mut [(KdEntry, u64)], depth: usize) -> Option<Box<KdNode>> {
        if entries.is_empty() {
            return None;
        }

        let dim = depth % 2;
        if dim == 0 {
            entries.sort_by(|a, b| a.0.point.x.total_cmp(&b.0.point.x));
        } else {
            entries.sort_by(|a, b| a.0.point.y.total_cmp(&b.0.point.y));
        }

        let median = entries.len() / 2;
        let (entry, seq) = entries[median];
        let (left_half, rest) = entries.split_at_mut(median);
        let right_half = &mut rest[1..];

        let mut node = KdNode::leaf(entry, seq, dim);
        node.left = Self::build_recursive(left_half, depth + 1);
        node.right = Self::build_recursive(right_half, depth + 1);
        node.refresh_from_children();
        Some(node)
    }

    /// Inserts a point without rebalancing.
    ///
    /// Descent compares on the node's split dimension; strict `<` goes left,
    /// ties go right. Every ancestor unions the point into its bounds and
    /// bumps its subtree size.
    pub fn insert(&mut self, point: Point, object_id: u64, data: ItemRef) {
        let seq = self.next_seq;
        self.next_seq += 1;
        Self::insert_recursive(&mut self.root, KdEntry::new(point, object_id, data), seq, 0);
        self.bounds.expand_point(&point);
        self.size += 1;
    }

    fn insert_recursive(slot: &mut Option<Box<KdNode>>, entry: KdEntry, seq: u64, depth: usize) {
        match slot {
            None => {
                *slot = Some(KdNode::leaf(entry, seq, depth % 2));
            }
            Some(node) => {
                let (coord, split) = if node.split_dim == 0 {
                    (entry.point.x, node.entry.point.x)
                } else {
                    (entry.point.y, node.entry.point.y)
                };
                if coord < split {
                    Self::insert_recursive(&mut node.left, entry, seq, depth + 1);
                } else {
                    Self::insert_recursive(&mut node.right, entry, seq, depth + 1);
                }
                node.bounds.expand_point(&entry.point);
                node.subtree_size += 1;
            }
        }
    }

    /// Finds the single nearest point to the query, or `None` when empty.
    pub fn nearest(&self, query: &Point) -> Option<KdEntry> {
        let root = self.root.as_deref()?;
        let mut best: Option<KdEntry> = None;
        let mut best_dist_sq = f64::INFINITY;
        Self::nearest_recursive(root, query, &mut best, &mut best_dist_sq);
        best
    }

    fn nearest_recursive(
        node: &KdNode,
        query: &Point,
        best: &mut Option<KdEntry>,
        best_dist_sq: &mut f64,
    ) {
        let dist_sq = query.distance_sq(&node.entry.point);
        if dist_sq < *best_dist_sq {
            *best_dist_sq = dist_sq;
            *best = Some(node.entry);
        }

        let diff = if node.split_dim == 0 {
            query.x - node.entry.point.x
        } else {
            query.y - node.entry.point.y
        };
        let (first, second) = if diff < 0.0 {
            (&node.left, &node.right)
        } else {
            (&node.right, &node.left)
        };

        if let Some(child) = first {
            Self::nearest_recursive(child, query, best, best_dist_sq);
        }
        // The far side can only help if the splitting plane is closer than
        // the current best.
        if diff * diff < *best_dist_sq {
            if let Some(child) = second {
                Self::nearest_recursive(child, query, best, best_dist_sq);
            }
        }
    }

    /// Finds the `min(k, len)` nearest points, sorted by non-decreasing
    /// squared distance; distance ties resolve to the lower id, then the
    /// earlier insertion.
    pub fn k_nearest(&self, query: &Point, k: usize) -> Vec<KdEntry> {
        if k == 0 {
            return Vec::new();
        }
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        if let Some(root) = self.root.as_deref() {
            Self::k_nearest_recursive(root, query, k, &mut heap);
        }
        let mut hits = heap.into_sorted_vec();
        hits.truncate(k);
        hits.into_iter().map(|c| c.entry).collect()
    }

    fn k_nearest_recursive(
        node: &KdNode,
        query: &Point,
        k: usize,
        heap: &mut BinaryHeap<Candidate>,
    ) {
        let candidate = Candidate {
            dist_sq: query.distance_sq(&node.entry.point),
            entry: node.entry,
            seq: node.seq,
        };
        if heap.len() < k {
            heap.push(candidate);
        } else if let Some(worst) = heap.peek() {
            if candidate.cmp(worst) == Ordering::Less {
                heap.pop();
                heap.push(candidate);
            }
        }

        let diff = if node.split_dim == 0 {
            query.x - node.entry.point.x
        } else {
            query.y - node.entry.point.y
        };
        let (first, second) = if diff < 0.0 {
            (&node.left, &node.right)
        } else {
            (&node.right, &node.left)
        };

        if let Some(child) = first {
            Self::k_nearest_recursive(child, query, k, heap);
        }
        let worst_dist = heap.peek().map(|c| c.dist_sq).unwrap_or(f64::INFINITY);
        if heap.len() < k || diff * diff < worst_dist {
            if let Some(child) = second {
                Self::k_nearest_recursive(child, query, k, heap);
            }
        }
    }

    /// Reports every point contained by the query box, pruning subtrees
    /// whose bounds miss it.
    pub fn range_query(&self, range: &BoundingBox) -> Vec<KdEntry> {
        let mut hits = Vec::new();
        if let Some(root) = self.root.as_deref() {
            Self::range_recursive(root, range, &mut hits);
        }
        hits
    }

    fn range_recursive(node: &KdNode, range: &BoundingBox, hits: &mut Vec<KdEntry>) {
        if !node.bounds.intersects(range) {
            return;
        }
        if range.contains_point(node.entry.point.x, node.entry.point.y) {
            hits.push(node.entry);
        }
        if let Some(child) = &node.left {
            Self::range_recursive(child, range, hits);
        }
        if let Some(child) = &node.right {
            Self::range_recursive(child, range, hits);
        }
    }

    /// Reports every point within `radius` of the query: a box filter
    /// followed by the exact squared-distance test.
    pub fn radius_query(&self, query: &Point, radius: f64) -> Vec<KdEntry> {
        let range = BoundingBox::new(
            query.x - radius,
            query.y - radius,
            query.x + radius,
            query.y + radius,
        );
        let radius_sq = radius * radius;
        self.range_query(&range)
            .into_iter()
            .filter(|e| query.distance_sq(&e.point) <= radius_sq)
            .collect()
    }

    /// Partitions the tree into block bounds.
    ///
    /// Descends from the root and emits a node's subtree bounds whenever the
    /// subtree holds at most `max_points_per_block` points or the node is a
    /// leaf. The emitted boxes tile the data's bounding region by leaf
    /// extents, not the whole coordinate plane.
    pub fn partition(&self, max_points_per_block: usize) -> Vec<BoundingBox> {
        let mut blocks = Vec::new();
        if let Some(root) = self.root.as_deref() {
            Self::collect_blocks(root, max_points_per_block, &mut blocks);
        }
        blocks
    }

    fn collect_blocks(node: &KdNode, max_size: usize, blocks: &mut Vec<BoundingBox>) {
        if node.subtree_size <= max_size || node.is_leaf() {
            blocks.push(node.bounds);
            return;
        }
        if let Some(child) = &node.left {
            Self::collect_blocks(child, max_size, blocks);
        }
        if let Some(child) = &node.right {
            Self::collect_blocks(child, max_size, blocks);
        }
    }

    /// Descends to the leaf region covering `p` and returns its entry.
    pub fn find_leaf(&self, p: &Point) -> Option<KdEntry> {
        let mut node = self.root.as_deref()?;
        loop {
            if node.is_leaf() {
                return Some(node.entry);
            }
            let (coord, split) = if node.split_dim == 0 {
                (p.x, node.entry.point.x)
            } else {
                (p.y, node.entry.point.y)
            };
            let next = if coord < split {
                node.left.as_deref().or(node.right.as_deref())
            } else {
                node.right.as_deref().or(node.left.as_deref())
            };
            match next {
                Some(child) => node = child,
                None => return Some(node.entry),
            }
        }
    }

    /// Longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        Self::depth_recursive(self.root.as_deref())
    }

    fn depth_recursive(node: Option<&KdNode>) -> usize {
        match node {
            None => 0,
            Some(n) => {
                1 + Self::depth_recursive(n.left.as_deref())
                    .max(Self::depth_recursive(n.right.as_deref()))
            }
        }
    }

    /// True while depth stays within twice the optimal ⌈log₂(size+1)⌉.
    pub fn is_balanced(&self) -> bool {
        if self.root.is_none() {
            return true;
        }
        let optimal = ((self.size + 1) as f64).log2().ceil() as usize;
        self.depth() <= 2 * optimal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(x: f64, y: f64, id: u64) -> KdEntry {
        KdEntry::new(Point::new(x, y), id, ItemRef::Object(id))
    }

    fn grid_entries(n: usize) -> Vec<KdEntry> {
        (0..n)
            .map(|i| entry((i % 10) as f64, (i / 10) as f64, i as u64 + 1))
            .collect()
    }

    #[test]
    fn test_empty_tree() {
        let tree = KdTree::new();
        assert!(tree.is_empty());
        assert!(tree.nearest(&Point::new(0.0, 0.0)).is_none());
        assert!(tree.k_nearest(&Point::new(0.0, 0.0), 3).is_empty());
        assert!(tree
            .range_query(&BoundingBox::new(0.0, 0.0, 1.0, 1.0))
            .is_empty());
        assert!(tree.is_balanced());
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn test_bulk_load_size_and_bounds() {
        let tree = KdTree::bulk_load(grid_entries(100));
        assert_eq!(tree.len(), 100);
        assert_eq!(tree.bounds(), BoundingBox::new(0.0, 0.0, 9.0, 9.0));
    }

    #[test]
    fn test_bulk_load_is_balanced() {
        let tree = KdTree::bulk_load(grid_entries(1000));
        assert!(tree.is_balanced());
    }

    #[test]
    fn test_sequential_insert_can_skew() {
        // A sorted insertion order degrades to a list; is_balanced reports it.
        let mut tree = KdTree::new();
        for i in 0..64 {
            tree.insert(Point::new(i as f64, i as f64), i + 1, ItemRef::None);
        }
        assert_eq!(tree.depth(), 64);
        assert!(!tree.is_balanced());
    }

    #[test]
    fn test_nearest() {
        let tree = KdTree::bulk_load(vec![
            entry(0.0, 0.0, 1),
            entry(10.0, 10.0, 2),
            entry(5.0, 5.0, 3),
            entry(2.0, 3.0, 4),
        ]);
        let hit = tree.nearest(&Point::new(2.2, 3.1)).unwrap();
        assert_eq!(hit.object_id, 4);

        let hit = tree.nearest(&Point::new(9.0, 9.0)).unwrap();
        assert_eq!(hit.object_id, 2);
    }

    #[test]
    fn test_nearest_matches_linear_scan() {
        let entries = grid_entries(100);
        let tree = KdTree::bulk_load(entries.clone());
        for q in [
            Point::new(3.4, 7.2),
            Point::new(-1.0, -1.0),
            Point::new(12.0, 4.5),
            Point::new(5.0, 5.0),
        ] {
            let expected = entries
                .iter()
                .min_by(|a, b| q.distance_sq(&a.point).total_cmp(&q.distance_sq(&b.point)))
                .unwrap();
            let got = tree.nearest(&q).unwrap();
            assert_eq!(
                q.distance_sq(&got.point),
                q.distance_sq(&expected.point),
                "query {:?}",
                q
            );
        }
    }

    #[test]
    fn test_k_nearest_order_and_count() {
        let tree = KdTree::bulk_load(vec![
            entry(0.0, 0.0, 1),
            entry(1.0, 1.0, 2),
            entry(2.0, 2.0, 3),
            entry(10.0, 10.0, 4),
            entry(20.0, 20.0, 5),
        ]);
        let hits = tree.k_nearest(&Point::new(0.5, 0.5), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].object_id, 1);
        assert_eq!(hits[1].object_id, 2);
    }

    #[test]
    fn test_k_nearest_tie_breaks_by_lower_id() {
        // (0,0) and (1,1) are equidistant from (0.5, 0.5).
        let tree = KdTree::bulk_load(vec![entry(1.0, 1.0, 2), entry(0.0, 0.0, 1)]);
        let hits = tree.k_nearest(&Point::new(0.5, 0.5), 2);
        assert_eq!(hits[0].object_id, 1);
        assert_eq!(hits[1].object_id, 2);
    }

    #[test]
    fn test_k_nearest_k_exceeds_size() {
        let tree = KdTree::bulk_load(vec![entry(0.0, 0.0, 1), entry(1.0, 0.0, 2)]);
        let hits = tree.k_nearest(&Point::new(0.0, 0.0), 10);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_k_nearest_zero_k() {
        let tree = KdTree::bulk_load(grid_entries(10));
        assert!(tree.k_nearest(&Point::new(0.0, 0.0), 0).is_empty());
    }

    #[test]
    fn test_range_query() {
        let tree = KdTree::bulk_load(grid_entries(100));
        let hits = tree.range_query(&BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        // 3x3 corner of the 10x10 grid, boundaries inclusive.
        assert_eq!(hits.len(), 9);

        let all = tree.range_query(&tree.bounds());
        assert_eq!(all.len(), 100);

        assert!(tree.range_query(&BoundingBox::empty()).is_empty());
    }

    #[test]
    fn test_radius_query_exact_filter() {
        let tree = KdTree::bulk_load(grid_entries(100));
        // Radius 1.0 around (0,0): (0,0), (1,0), (0,1). (1,1) is at √2.
        let hits = tree.radius_query(&Point::new(0.0, 0.0), 1.0);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_insert_updates_ancestor_bounds() {
        let mut tree = KdTree::bulk_load(grid_entries(10));
        tree.insert(Point::new(50.0, 50.0), 999, ItemRef::None);
        assert_eq!(tree.len(), 11);
        assert!(tree.bounds().contains_point(50.0, 50.0));
        let hit = tree.nearest(&Point::new(49.0, 49.0)).unwrap();
        assert_eq!(hit.object_id, 999);
    }

    #[test]
    fn test_partition_block_sizes() {
        let tree = KdTree::bulk_load(grid_entries(100));
        let blocks = tree.partition(25);
        assert!(!blocks.is_empty());
        // Each block must cover a subset of the tree bounds.
        let bounds = tree.bounds();
        for b in &blocks {
            assert!(bounds.contains(b));
        }
        // Every point falls inside at least one block.
        for e in grid_entries(100) {
            assert!(blocks.iter().any(|b| b.contains_point(e.point.x, e.point.y)));
        }
    }

    #[test]
    fn test_partition_whole_tree_single_block() {
        let tree = KdTree::bulk_load(grid_entries(10));
        let blocks = tree.partition(10);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0], tree.bounds());
    }

    #[test]
    fn test_find_leaf() {
        let tree = KdTree::bulk_load(grid_entries(100));
        let leaf = tree.find_leaf(&Point::new(0.1, 0.1));
        assert!(leaf.is_some());
    }

    #[test]
    fn test_payload_carrier_round_trip() {
        let mut tree = KdTree::new();
        tree.insert(Point::new(1.0, 2.0), 7, ItemRef::Page(3));
        let hit = tree.nearest(&Point::new(1.0, 2.0)).unwrap();
        assert_eq!(hit.data, ItemRef::Page(3));
    }
}
