//! Quadtree over page extents for adjacency lookups.
//!
//! Nodes partition their bounds into NW/NE/SW/SE quadrants (north = higher
//! y, east = higher x). An item lives at the lowest node whose bounds fully
//! contain it; items spanning quadrants stay at the internal node, so every
//! inserted item remains reachable by any range query covering its MBR.
//! Traversal order is deterministic: a node's own items first, then the
//! children in NW, NE, SW, SE order.

use crate::bounding_box::BoundingBox;
use crate::error::{UrbisError, UrbisResult};
use crate::geometry::Point;
use crate::kdtree::ItemRef;

/// Default number of items a node holds before splitting.
pub const DEFAULT_NODE_CAPACITY: usize = 8;

/// Default maximum tree depth.
pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Absolute tolerance for edge-touching adjacency.
const ADJACENCY_EPSILON: f64 = 1e-9;

/// Minimum absolute expansion applied to an adjacency search region.
const MIN_REGION_EXPANSION: f64 = 1e-6;

/// Relative expansion (1% of each axis extent) for adjacency searches.
const REGION_EXPANSION_RATIO: f64 = 0.01;

/// True when the boxes overlap or touch within tolerance on both axes.
fn adjacent_or_intersects(a: &BoundingBox, b: &BoundingBox) -> bool {
    !(a.max_x + ADJACENCY_EPSILON < b.min_x
        || a.min_x - ADJACENCY_EPSILON > b.max_x
        || a.max_y + ADJACENCY_EPSILON < b.min_y
        || a.min_y - ADJACENCY_EPSILON > b.max_y)
}

/// An indexed item: bounds, representative centroid, and a typed payload.
#[derive(Debug, Clone)]
pub struct QuadItem {
    pub id: u64,
    pub bounds: BoundingBox,
    pub centroid: Point,
    pub data: ItemRef,
}

impl QuadItem {
    pub fn new(id: u64, bounds: BoundingBox, centroid: Point, data: ItemRef) -> Self {
        Self {
            id,
            bounds,
            centroid,
            data,
        }
    }
}

#[derive(Debug, Clone)]
struct QuadNode {
    bounds: BoundingBox,
    depth: usize,
    items: Vec<QuadItem>,
    /// NW, NE, SW, SE. `None` marks a leaf.
    children: Option<Box<[QuadNode; 4]>>,
}

impl QuadNode {
    fn new(bounds: BoundingBox, depth: usize) -> Self {
        Self {
            bounds,
            depth,
            items: Vec::new(),
            children: None,
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Creates the four quadrant children and redistributes current items.
    /// Items no single child fully contains remain here.
    fn split(&mut self) {
        let mid = self.bounds.centroid();
        let depth = self.depth + 1;
        self.children = Some(Box::new([
            QuadNode::new(
                BoundingBox::new(self.bounds.min_x, mid.y, mid.x, self.bounds.max_y),
                depth,
            ),
            QuadNode::new(
                BoundingBox::new(mid.x, mid.y, self.bounds.max_x, self.bounds.max_y),
                depth,
            ),
            QuadNode::new(
                BoundingBox::new(self.bounds.min_x, self.bounds.min_y, mid.x, mid.y),
                depth,
            ),
            QuadNode::new(
                BoundingBox::new(mid.x, self.bounds.min_y, self.bounds.max_x, mid.y),
                depth,
            ),
        ]));

        let items = std::mem::take(&mut self.items);
        let mut kept = Vec::new();
        if let Some(children) = self.children.as_mut() {
            'items: for item in items {
                for child in children.iter_mut() {
                    if child.bounds.contains(&item.bounds) {
                        child.items.push(item);
                        continue 'items;
                    }
                }
                kept.push(item);
            }
        }
        self.items = kept;
    }

    fn insert(&mut self, item: QuadItem, capacity: usize, max_depth: usize) {
        if self.is_leaf() {
            if self.items.len() < capacity || self.depth >= max_depth {
                self.items.push(item);
                return;
            }
            self.split();
        }

        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                if child.bounds.contains(&item.bounds) {
                    child.insert(item, capacity, max_depth);
                    return;
                }
            }
        }
        // Spans quadrants (or touches the mid lines): lives here.
        self.items.push(item);
    }

    fn query_range<'a>(&'a self, range: &BoundingBox, hits: &mut Vec<&'a QuadItem>) {
        if !self.bounds.intersects(range) {
            return;
        }
        for item in &self.items {
            if item.bounds.intersects(range) {
                hits.push(item);
            }
        }
        if let Some(children) = self.children.as_deref() {
            for child in children {
                child.query_range(range, hits);
            }
        }
    }

    fn query_point<'a>(&'a self, p: &Point, hits: &mut Vec<&'a QuadItem>) {
        if !self.bounds.contains_point(p.x, p.y) {
            return;
        }
        for item in &self.items {
            if item.bounds.contains_point(p.x, p.y) {
                hits.push(item);
            }
        }
        if let Some(children) = self.children.as_deref() {
            for child in children {
                child.query_point(p, hits);
            }
        }
    }

    fn find(&self, id: u64) -> Option<&QuadItem> {
        for item in &self.items {
            if item.id == id {
                return Some(item);
            }
        }
        if let Some(children) = self.children.as_deref() {
            for child in children {
                if let Some(found) = child.find(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    fn remove(&mut self, id: u64) -> Option<QuadItem> {
        if let Some(pos) = self.items.iter().position(|item| item.id == id) {
            return Some(self.items.remove(pos));
        }
        if let Some(children) = self.children.as_mut() {
            for child in children.iter_mut() {
                if let Some(removed) = child.remove(id) {
                    return Some(removed);
                }
            }
        }
        None
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a QuadItem>) {
        for item in &self.items {
            out.push(item);
        }
        if let Some(children) = self.children.as_deref() {
            for child in children {
                child.collect(out);
            }
        }
    }

    fn count(&self, nodes: &mut usize, max_depth: &mut usize, leaves: &mut usize) {
        *nodes += 1;
        if self.depth > *max_depth {
            *max_depth = self.depth;
        }
        match self.children.as_deref() {
            None => *leaves += 1,
            Some(children) => {
                for child in children {
                    child.count(nodes, max_depth, leaves);
                }
            }
        }
    }
}

/// Structural statistics of a quadtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuadTreeStats {
    pub total_items: usize,
    pub total_nodes: usize,
    pub max_depth: usize,
    pub leaf_count: usize,
}

/// A recursive NW/NE/SW/SE partition over item bounding boxes.
#[derive(Debug, Clone)]
pub struct QuadTree {
    root: QuadNode,
    node_capacity: usize,
    max_depth: usize,
    total_items: usize,
}

impl QuadTree {
    /// Creates a tree covering `bounds`. Zero capacity or depth fall back to
    /// the defaults.
    pub fn new(bounds: BoundingBox, node_capacity: usize, max_depth: usize) -> Self {
        Self {
            root: QuadNode::new(bounds, 0),
            node_capacity: if node_capacity == 0 {
                DEFAULT_NODE_CAPACITY
            } else {
                node_capacity
            },
            max_depth: if max_depth == 0 {
                DEFAULT_MAX_DEPTH
            } else {
                max_depth
            },
            total_items: 0,
        }
    }

    /// Number of items in the tree.
    pub fn len(&self) -> usize {
        self.total_items
    }

    pub fn is_empty(&self) -> bool {
        self.total_items == 0
    }

    /// The root bounds the tree was created with.
    pub fn bounds(&self) -> BoundingBox {
        self.root.bounds
    }

    /// Inserts an item.
    ///
    /// # Errors
    /// Returns `InvalidArg` when the item's bounds do not intersect the
    /// tree bounds.
    pub fn insert(&mut self, item: QuadItem) -> UrbisResult<()> {
        if !self.root.bounds.intersects(&item.bounds) {
            return Err(UrbisError::InvalidArg(format!(
                "item {} lies outside the tree bounds",
                item.id
            )));
        }
        self.root.insert(item, self.node_capacity, self.max_depth);
        self.total_items += 1;
        Ok(())
    }

    /// Removes an item by id.
    ///
    /// # Errors
    /// Returns `NotFound` when no item carries the id.
    pub fn remove(&mut self, id: u64) -> UrbisResult<QuadItem> {
        match self.root.remove(id) {
            Some(item) => {
                self.total_items -= 1;
                Ok(item)
            }
            None => Err(UrbisError::NotFound(format!("quadtree item {}", id))),
        }
    }

    /// Looks an item up by id.
    pub fn get(&self, id: u64) -> Option<&QuadItem> {
        self.root.find(id)
    }

    /// Moves an item to new bounds by removing and reinserting it.
    pub fn update(&mut self, id: u64, new_bounds: BoundingBox) -> UrbisResult<()> {
        let mut item = self.remove(id)?;
        item.centroid = new_bounds.centroid();
        item.bounds = new_bounds;
        self.insert(item)
    }

    /// Reports every item whose bounds intersect the query box.
    pub fn query_range(&self, range: &BoundingBox) -> Vec<&QuadItem> {
        let mut hits = Vec::new();
        self.root.query_range(range, &mut hits);
        hits
    }

    /// Reports every item whose bounds contain the point.
    pub fn query_point(&self, p: &Point) -> Vec<&QuadItem> {
        let mut hits = Vec::new();
        self.root.query_point(p, &mut hits);
        hits
    }

    /// Reports every item whose centroid lies within `radius` of `center`.
    pub fn query_radius(&self, center: &Point, radius: f64) -> Vec<&QuadItem> {
        let range = BoundingBox::new(
            center.x - radius,
            center.y - radius,
            center.x + radius,
            center.y + radius,
        );
        let radius_sq = radius * radius;
        let mut hits = Vec::new();
        self.root.query_range(&range, &mut hits);
        hits.retain(|item| center.distance_sq(&item.centroid) <= radius_sq);
        hits
    }

    /// Finds items adjacent to (intersecting or edge-touching) a region.
    ///
    /// The region is grown by 1% of its extent per axis (at least 1e-6)
    /// before the range query, then hits are filtered with the ε-tolerant
    /// overlap test so that shared edges count.
    pub fn find_adjacent_to_region(&self, region: &BoundingBox) -> Vec<&QuadItem> {
        let mut dx = region.width() * REGION_EXPANSION_RATIO;
        let mut dy = region.height() * REGION_EXPANSION_RATIO;
        if dx < MIN_REGION_EXPANSION {
            dx = MIN_REGION_EXPANSION;
        }
        if dy < MIN_REGION_EXPANSION {
            dy = MIN_REGION_EXPANSION;
        }
        let expanded = BoundingBox::new(
            region.min_x - dx,
            region.min_y - dy,
            region.max_x + dx,
            region.max_y + dy,
        );

        let mut hits = Vec::new();
        self.root.query_range(&expanded, &mut hits);
        hits.retain(|item| adjacent_or_intersects(&item.bounds, region));
        hits
    }

    /// Finds items adjacent to the item with the given id.
    ///
    /// # Errors
    /// Returns `NotFound` when the id is absent.
    pub fn find_adjacent(&self, id: u64) -> UrbisResult<Vec<&QuadItem>> {
        let region = self
            .get(id)
            .map(|item| item.bounds)
            .ok_or_else(|| UrbisError::NotFound(format!("quadtree item {}", id)))?;
        Ok(self.find_adjacent_to_region(&region))
    }

    /// All items in deterministic traversal order.
    pub fn items(&self) -> Vec<&QuadItem> {
        let mut out = Vec::new();
        self.root.collect(&mut out);
        out
    }

    /// Structural statistics.
    pub fn stats(&self) -> QuadTreeStats {
        let mut stats = QuadTreeStats {
            total_items: self.total_items,
            ..Default::default()
        };
        self.root.count(
            &mut stats.total_nodes,
            &mut stats.max_depth,
            &mut stats.leaf_count,
        );
        stats
    }

    /// Removes every item, keeping the bounds and parameters.
    pub fn clear(&mut self) {
        self.root = QuadNode::new(self.root.bounds, 0);
        self.total_items = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree100() -> QuadTree {
        QuadTree::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 4, 8)
    }

    fn boxed(id: u64, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> QuadItem {
        let bounds = BoundingBox::new(min_x, min_y, max_x, max_y);
        QuadItem::new(id, bounds, bounds.centroid(), ItemRef::Page(id as u32))
    }

    #[test]
    fn test_insert_and_len() {
        let mut qt = tree100();
        qt.insert(boxed(1, 10.0, 10.0, 20.0, 20.0)).unwrap();
        qt.insert(boxed(2, 60.0, 60.0, 70.0, 70.0)).unwrap();
        assert_eq!(qt.len(), 2);
    }

    #[test]
    fn test_insert_out_of_bounds() {
        let mut qt = tree100();
        let err = qt.insert(boxed(1, 200.0, 200.0, 210.0, 210.0));
        assert!(err.is_err());
        assert_eq!(qt.len(), 0);
    }

    #[test]
    fn test_split_keeps_spanning_items_reachable() {
        let mut qt = tree100();
        // An item straddling the vertical mid line at x=50.
        qt.insert(boxed(99, 45.0, 10.0, 55.0, 20.0)).unwrap();
        // Enough small items in one quadrant to force a split.
        for i in 0..6 {
            qt.insert(boxed(i, 1.0 + i as f64, 1.0, 2.0 + i as f64, 2.0))
                .unwrap();
        }
        let stats = qt.stats();
        assert!(stats.total_nodes > 1, "expected a split");

        // The spanning item must still be reachable by a covering range.
        let hits = qt.query_range(&BoundingBox::new(40.0, 5.0, 60.0, 25.0));
        assert!(hits.iter().any(|item| item.id == 99));
        assert_eq!(qt.len(), 7);
    }

    #[test]
    fn test_query_range() {
        let mut qt = tree100();
        qt.insert(boxed(1, 10.0, 10.0, 20.0, 20.0)).unwrap();
        qt.insert(boxed(2, 60.0, 60.0, 70.0, 70.0)).unwrap();
        qt.insert(boxed(3, 15.0, 15.0, 25.0, 25.0)).unwrap();

        let hits = qt.query_range(&BoundingBox::new(0.0, 0.0, 30.0, 30.0));
        assert_eq!(hits.len(), 2);

        let all = qt.query_range(&qt.bounds());
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_query_point() {
        let mut qt = tree100();
        qt.insert(boxed(1, 10.0, 10.0, 20.0, 20.0)).unwrap();
        qt.insert(boxed(2, 15.0, 15.0, 30.0, 30.0)).unwrap();

        let hits = qt.query_point(&Point::new(17.0, 17.0));
        assert_eq!(hits.len(), 2);

        let hits = qt.query_point(&Point::new(25.0, 25.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);

        assert!(qt.query_point(&Point::new(90.0, 90.0)).is_empty());
    }

    #[test]
    fn test_query_radius_filters_by_centroid() {
        let mut qt = tree100();
        qt.insert(boxed(1, 10.0, 10.0, 20.0, 20.0)).unwrap(); // centroid (15, 15)
        qt.insert(boxed(2, 40.0, 40.0, 50.0, 50.0)).unwrap(); // centroid (45, 45)

        let hits = qt.query_radius(&Point::new(15.0, 15.0), 5.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
    }

    #[test]
    fn test_find_adjacent_edge_touching_counts() {
        let mut qt = tree100();
        qt.insert(boxed(1, 0.0, 0.0, 10.0, 10.0)).unwrap();
        qt.insert(boxed(2, 10.0, 0.0, 20.0, 10.0)).unwrap(); // shares edge x=10
        qt.insert(boxed(3, 50.0, 50.0, 60.0, 60.0)).unwrap(); // far away

        let hits = qt.find_adjacent_to_region(&BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let ids: Vec<u64> = hits.iter().map(|item| item.id).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&2));
        assert!(!ids.contains(&3));
    }

    #[test]
    fn test_find_adjacent_by_id() {
        let mut qt = tree100();
        qt.insert(boxed(1, 0.0, 0.0, 10.0, 10.0)).unwrap();
        qt.insert(boxed(2, 10.0, 0.0, 20.0, 10.0)).unwrap();

        let hits = qt.find_adjacent(1).unwrap();
        assert!(hits.iter().any(|item| item.id == 2));

        assert!(qt.find_adjacent(404).is_err());
    }

    #[test]
    fn test_remove_and_get() {
        let mut qt = tree100();
        qt.insert(boxed(1, 10.0, 10.0, 20.0, 20.0)).unwrap();
        qt.insert(boxed(2, 60.0, 60.0, 70.0, 70.0)).unwrap();

        assert!(qt.get(1).is_some());
        qt.remove(1).unwrap();
        assert!(qt.get(1).is_none());
        assert_eq!(qt.len(), 1);

        assert!(qt.remove(1).is_err());
    }

    #[test]
    fn test_update_moves_item() {
        let mut qt = tree100();
        qt.insert(boxed(1, 10.0, 10.0, 20.0, 20.0)).unwrap();

        qt.update(1, BoundingBox::new(80.0, 80.0, 90.0, 90.0)).unwrap();
        let item = qt.get(1).unwrap();
        assert_eq!(item.bounds, BoundingBox::new(80.0, 80.0, 90.0, 90.0));
        assert_eq!(item.centroid, Point::new(85.0, 85.0));
        assert_eq!(qt.len(), 1);
    }

    #[test]
    fn test_max_depth_limits_splits() {
        let mut qt = QuadTree::new(BoundingBox::new(0.0, 0.0, 100.0, 100.0), 1, 2);
        // All items in the same tiny corner would split forever without the cap.
        for i in 0..10 {
            qt.insert(boxed(i, 1.0, 1.0, 2.0, 2.0)).unwrap();
        }
        let stats = qt.stats();
        assert!(stats.max_depth <= 2);
        assert_eq!(qt.len(), 10);
    }

    #[test]
    fn test_items_traversal_order_is_stable() {
        let mut qt = tree100();
        for i in 0..12 {
            qt.insert(boxed(i, 5.0 * i as f64, 5.0, 5.0 * i as f64 + 3.0, 8.0))
                .unwrap();
        }
        let first: Vec<u64> = qt.items().iter().map(|item| item.id).collect();
        let second: Vec<u64> = qt.items().iter().map(|item| item.id).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
    }

    #[test]
    fn test_clear_keeps_bounds() {
        let mut qt = tree100();
        qt.insert(boxed(1, 10.0, 10.0, 20.0, 20.0)).unwrap();
        qt.clear();
        assert!(qt.is_empty());
        assert_eq!(qt.bounds(), BoundingBox::new(0.0, 0.0, 100.0, 100.0));
    }

    #[test]
    fn test_stats_counts() {
        let mut qt = tree100();
        for i in 0..20 {
            qt.insert(boxed(
                i,
                (i % 5) as f64 * 20.0,
                (i / 5) as f64 * 20.0,
                (i % 5) as f64 * 20.0 + 4.0,
                (i / 5) as f64 * 20.0 + 4.0,
            ))
            .unwrap();
        }
        let stats = qt.stats();
        assert_eq!(stats.total_items, 20);
        assert!(stats.total_nodes >= stats.leaf_count);
    }
}
