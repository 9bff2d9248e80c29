//! The spatial index coordinator.
//!
//! `SpatialIndex` routes inserts, builds and queries through the block
//! KD-tree, the page quadtree and the disk manager. Objects live in pool
//! pages; the trees reference them by id and are rebuilt (never patched)
//! after mutations, so a stored page reference is only valid until the
//! next mutating call.

use std::path::Path;

use log::debug;

use crate::bounding_box::BoundingBox;
use crate::config::IndexConfig;
use crate::disk::constants::{PAGES_PER_TRACK, PAGE_SIZE};
use crate::disk::manager::{DiskManager, DiskManagerConfig};
use crate::error::{UrbisError, UrbisResult};
use crate::geometry::{Point, SpatialObject};
use crate::kdtree::{ItemRef, KdEntry, KdTree};
use crate::quadtree::{QuadItem, QuadTree, DEFAULT_MAX_DEPTH, DEFAULT_NODE_CAPACITY};

/// An MBR partition produced by the KD-tree bulk loader. A materialized
/// block reserves one fresh track for future allocation near its region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialBlock {
    pub id: u32,
    pub bounds: BoundingBox,
    pub centroid: Point,
    pub track_id: u32,
    pub object_count: usize,
}

/// Aggregate statistics over the index.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndexStats {
    pub total_objects: usize,
    pub total_blocks: usize,
    pub total_pages: usize,
    pub total_tracks: usize,
    pub kdtree_depth: usize,
    pub quadtree_depth: usize,
    pub avg_objects_per_page: f64,
    pub page_utilization: f64,
    pub bounds: BoundingBox,
}

/// Result of an adjacent-pages lookup: `(page_id, track_id)` pairs in
/// quadtree traversal order, plus the seek estimate for visiting them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdjacentPages {
    pub pages: Vec<(u32, u32)>,
    pub estimated_seeks: u64,
}

/// A disk-aware 2-D spatial index over points, polylines and polygons.
pub struct SpatialIndex {
    config: IndexConfig,
    disk: DiskManager,
    block_tree: KdTree,
    page_tree: Option<QuadTree>,
    blocks: Vec<SpatialBlock>,
    next_object_id: u64,
    next_block_id: u32,
    bounds: BoundingBox,
    is_built: bool,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialIndex {
    /// Creates an in-memory index with default configuration.
    pub fn new() -> Self {
        let config = IndexConfig::default();
        let disk = DiskManager::new(Self::disk_config(&config));
        Self {
            config,
            disk,
            block_tree: KdTree::new(),
            page_tree: None,
            blocks: Vec::new(),
            next_object_id: 1,
            next_block_id: 1,
            bounds: BoundingBox::empty(),
            is_built: false,
        }
    }

    /// Creates an index from a validated configuration. With `persist` set,
    /// an existing file at `data_path` is loaded and a missing one created.
    pub fn with_config(config: IndexConfig) -> UrbisResult<Self> {
        config.validate()?;
        let disk = DiskManager::new(Self::disk_config(&config));
        let mut index = Self {
            config,
            disk,
            block_tree: KdTree::new(),
            page_tree: None,
            blocks: Vec::new(),
            next_object_id: 1,
            next_block_id: 1,
            bounds: BoundingBox::empty(),
            is_built: false,
        };
        if index.config.persist {
            if let Some(path) = index.config.data_path.clone() {
                if path.exists() {
                    index.load(&path)?;
                } else {
                    index.disk.create(&path)?;
                }
            }
        }
        Ok(index)
    }

    fn disk_config(config: &IndexConfig) -> DiskManagerConfig {
        DiskManagerConfig {
            cache_size: config.cache_size,
            page_size: PAGE_SIZE,
            pages_per_track: PAGES_PER_TRACK,
            page_capacity: config.page_capacity,
            strategy: config.strategy,
            sync_on_write: config.sync_on_write,
        }
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The disk manager, for I/O statistics and pool inspection.
    pub fn disk(&self) -> &DiskManager {
        &self.disk
    }

    /// Running union of all inserted object MBRs; never shrinks.
    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Number of stored objects.
    pub fn count(&self) -> usize {
        self.disk.pool().stats().object_count
    }

    pub fn is_built(&self) -> bool {
        self.is_built
    }

    /// Blocks materialized by the last build.
    pub fn blocks(&self) -> &[SpatialBlock] {
        &self.blocks
    }

    /// The block covering a point, if any.
    pub fn block_at(&self, p: &Point) -> Option<&SpatialBlock> {
        self.blocks
            .iter()
            .find(|b| b.bounds.contains_point(p.x, p.y))
    }

    /// Picks the page for an object: the allocation tree's nearest page if
    /// it still has room, else a freshly allocated one.
    fn target_page(&mut self, obj: &SpatialObject) -> UrbisResult<u32> {
        if let Some(hit) = self.disk.allocation_tree().nearest(&obj.centroid()) {
            if let ItemRef::Page(page_id) = hit.data {
                if let Some(page) = self.disk.pool().page(page_id) {
                    if !page.is_full() {
                        return Ok(page_id);
                    }
                }
            }
        }
        self.disk.alloc_page(obj.centroid())
    }

    /// Inserts an object, assigning an id when unassigned, and returns the
    /// id. The allocation tree is rebuilt, so prior page references are
    /// invalidated.
    pub fn insert(&mut self, mut obj: SpatialObject) -> UrbisResult<u64> {
        if obj.id() == 0 {
            obj.set_id(self.next_object_id);
            self.next_object_id += 1;
        } else if obj.id() >= self.next_object_id {
            self.next_object_id = obj.id() + 1;
        }
        obj.update_derived();

        let mut target = self.target_page(&obj)?;
        let first_try = match self.disk.pool_mut().page_mut(target) {
            Some(page) => page.add(&obj),
            None => Err(UrbisError::NotFound(format!("page {}", target))),
        };
        match first_try {
            Ok(()) => {}
            Err(UrbisError::Full(_)) => {
                target = self.disk.alloc_page(obj.centroid())?;
                match self.disk.pool_mut().page_mut(target) {
                    Some(page) => page.add(&obj)?,
                    None => return Err(UrbisError::NotFound(format!("page {}", target))),
                }
            }
            Err(e) => return Err(e),
        }

        if let Some(page) = self.disk.pool_mut().page_mut(target) {
            page.update_derived();
        }
        let track_id = self
            .disk
            .pool()
            .page(target)
            .map(|p| p.track_id())
            .unwrap_or(0);
        if track_id > 0 {
            self.disk.pool_mut().recompute_track(track_id);
        }
        self.disk.rebuild_allocation_tree();
        self.bounds.expand(&obj.mbr());
        self.is_built = false;

        let id = obj.id();
        if self.config.sync_on_write && self.disk.is_open() {
            self.disk.sync()?;
        }
        Ok(id)
    }

    /// Inserts a point feature.
    pub fn insert_point(&mut self, x: f64, y: f64) -> UrbisResult<u64> {
        self.insert(SpatialObject::point(x, y))
    }

    /// Inserts a polyline feature.
    pub fn insert_polyline(&mut self, vertices: Vec<Point>) -> UrbisResult<u64> {
        self.insert(SpatialObject::polyline(vertices)?)
    }

    /// Inserts a polygon feature from its exterior ring.
    pub fn insert_polygon(&mut self, exterior: Vec<Point>) -> UrbisResult<u64> {
        self.insert(SpatialObject::polygon(exterior)?)
    }

    /// Inserts a batch; the first failing insert aborts and surfaces its
    /// error.
    pub fn bulk_insert(&mut self, objects: Vec<SpatialObject>) -> UrbisResult<Vec<u64>> {
        let mut ids = Vec::with_capacity(objects.len());
        for obj in objects {
            ids.push(self.insert(obj)?);
        }
        Ok(ids)
    }

    /// Removes an object by id. The id is never reused.
    pub fn remove(&mut self, object_id: u64) -> UrbisResult<()> {
        let page_id = self
            .disk
            .pool()
            .pages()
            .iter()
            .find(|p| p.find(object_id).is_some())
            .map(|p| p.id())
            .ok_or_else(|| UrbisError::NotFound(format!("object {}", object_id)))?;

        match self.disk.pool_mut().page_mut(page_id) {
            Some(page) => page.remove(object_id)?,
            None => return Err(UrbisError::NotFound(format!("page {}", page_id))),
        }
        let track_id = self
            .disk
            .pool()
            .page(page_id)
            .map(|p| p.track_id())
            .unwrap_or(0);
        if track_id > 0 {
            self.disk.pool_mut().recompute_track(track_id);
        }
        self.disk.rebuild_allocation_tree();
        self.is_built = false;
        Ok(())
    }

    /// Looks an object up by id.
    pub fn get(&self, object_id: u64) -> Option<&SpatialObject> {
        self.disk
            .pool()
            .pages()
            .iter()
            .find_map(|p| p.find(object_id))
    }

    /// Replaces an object's geometry and properties, keeping its id.
    pub fn update(&mut self, object_id: u64, mut obj: SpatialObject) -> UrbisResult<u64> {
        self.remove(object_id)?;
        obj.set_id(object_id);
        self.insert(obj)
    }

    /// Bulk-loads the block KD-tree over object centroids, partitions it
    /// into blocks (each reserving a fresh track), and builds the page
    /// quadtree. Empty indexes build trivially.
    ///
    /// Tracks reserved by a previous build that never received pages are
    /// recycled first, so repeated builds observe identical page, track and
    /// block counts.
    pub fn build(&mut self) -> UrbisResult<()> {
        self.disk.pool_mut().remove_empty_tracks();

        let mut entries = Vec::new();
        for page in self.disk.pool().pages() {
            for obj in page.objects() {
                entries.push(KdEntry::new(
                    obj.centroid(),
                    obj.id(),
                    ItemRef::Object(obj.id()),
                ));
            }
        }

        if entries.is_empty() {
            self.block_tree = KdTree::new();
            self.blocks.clear();
            self.page_tree = None;
            self.is_built = true;
            return Ok(());
        }

        debug!("building index over {} objects", entries.len());
        self.block_tree = KdTree::bulk_load(entries);
        let block_bounds = self.block_tree.partition(self.config.block_size);

        self.blocks.clear();
        for bounds in block_bounds {
            let track_id = self.disk.create_track();
            let block_id = self.next_block_id;
            self.next_block_id += 1;
            self.blocks.push(SpatialBlock {
                id: block_id,
                bounds,
                centroid: bounds.centroid(),
                track_id,
                object_count: 0,
            });
        }

        // Route each object to the first block covering its centroid.
        let centroids: Vec<Point> = self
            .disk
            .pool()
            .pages()
            .iter()
            .flat_map(|p| p.objects().iter().map(|o| o.centroid()))
            .collect();
        for c in centroids {
            if let Some(block) = self
                .blocks
                .iter_mut()
                .find(|b| b.bounds.contains_point(c.x, c.y))
            {
                block.object_count += 1;
            }
        }

        if self.config.enable_quadtree {
            self.build_page_tree()?;
        } else {
            self.page_tree = None;
        }
        self.is_built = true;
        Ok(())
    }

    /// Re-runs the build.
    pub fn optimize(&mut self) -> UrbisResult<()> {
        self.build()
    }

    /// Builds the page quadtree over occupied pages.
    fn build_page_tree(&mut self) -> UrbisResult<()> {
        let occupied: Vec<(u32, BoundingBox, Point)> = self
            .disk
            .pool()
            .pages()
            .iter()
            .filter(|p| p.object_count() > 0)
            .map(|p| (p.id(), p.extent(), p.centroid()))
            .collect();
        if occupied.is_empty() || self.bounds.is_empty() {
            self.page_tree = None;
            return Ok(());
        }
        let mut tree = QuadTree::new(self.bounds, DEFAULT_NODE_CAPACITY, DEFAULT_MAX_DEPTH);
        for (page_id, extent, centroid) in occupied {
            tree.insert(QuadItem::new(
                page_id as u64,
                extent,
                centroid,
                ItemRef::Page(page_id),
            ))?;
        }
        self.page_tree = Some(tree);
        Ok(())
    }

    /// Objects whose MBR intersects the query box: a page-extent scan
    /// refined per object. Works without a prior build.
    pub fn query_range(&self, range: &BoundingBox) -> Vec<&SpatialObject> {
        let mut results = Vec::new();
        for page_id in self.disk.pool().query_region(range) {
            if let Some(page) = self.disk.pool().page(page_id) {
                for obj in page.objects() {
                    if obj.mbr().intersects(range) {
                        results.push(obj);
                    }
                }
            }
        }
        results
    }

    /// Objects whose MBR contains the point (a degenerate range query).
    pub fn query_point(&self, x: f64, y: f64) -> Vec<&SpatialObject> {
        self.query_range(&BoundingBox::new(x, y, x, y))
    }

    /// The `min(k, count)` objects nearest to `(x, y)` by centroid, in
    /// non-decreasing distance order. Uses the block KD-tree, so `build()`
    /// is required for freshness after mutations.
    ///
    /// # Errors
    /// Returns `InvalidArg` for `k == 0`.
    pub fn query_knn(&self, x: f64, y: f64, k: usize) -> UrbisResult<Vec<&SpatialObject>> {
        if k == 0 {
            return Err(UrbisError::InvalidArg("k must be at least 1".to_string()));
        }
        let hits = self.block_tree.k_nearest(&Point::new(x, y), k);
        Ok(hits
            .iter()
            .filter_map(|hit| match hit.data {
                ItemRef::Object(id) => self.get(id),
                _ => None,
            })
            .collect())
    }

    /// Pages adjacent to (intersecting or edge-touching) a region, with
    /// their track ids and the seek estimate for visiting them in order.
    /// The page quadtree is (re)built on demand when missing or stale.
    pub fn find_adjacent_pages(&mut self, region: &BoundingBox) -> UrbisResult<AdjacentPages> {
        if self.page_tree.is_none() || !self.is_built {
            self.build_page_tree()?;
        }
        let Some(tree) = self.page_tree.as_ref() else {
            return Ok(AdjacentPages::default());
        };

        let mut pages = Vec::new();
        let mut ids = Vec::new();
        for item in tree.find_adjacent_to_region(region) {
            if let ItemRef::Page(page_id) = item.data {
                let track_id = self
                    .disk
                    .pool()
                    .page(page_id)
                    .map(|p| p.track_id())
                    .unwrap_or(0);
                pages.push((page_id, track_id));
                ids.push(page_id);
            }
        }
        let estimated_seeks = self.disk.estimate_seeks(&ids);
        Ok(AdjacentPages {
            pages,
            estimated_seeks,
        })
    }

    /// Objects in pages adjacent to the region, filtered by MBR
    /// intersection with the region itself.
    pub fn query_adjacent(&mut self, region: &BoundingBox) -> UrbisResult<Vec<&SpatialObject>> {
        let adjacent = self.find_adjacent_pages(region)?;
        let mut results = Vec::new();
        for (page_id, _) in &adjacent.pages {
            if let Some(page) = self.disk.pool().page(*page_id) {
                for obj in page.objects() {
                    if obj.mbr().intersects(region) {
                        results.push(obj);
                    }
                }
            }
        }
        Ok(results)
    }

    /// Aggregate statistics.
    pub fn stats(&self) -> IndexStats {
        let pool_stats = self.disk.pool().stats();
        let page_utilization = if pool_stats.page_count > 0 {
            self.disk
                .pool()
                .pages()
                .iter()
                .map(|p| p.utilization())
                .sum::<f64>()
                / pool_stats.page_count as f64
        } else {
            0.0
        };
        IndexStats {
            total_objects: pool_stats.object_count,
            total_blocks: self.blocks.len(),
            total_pages: pool_stats.page_count,
            total_tracks: pool_stats.track_count,
            kdtree_depth: self.block_tree.depth(),
            quadtree_depth: self
                .page_tree
                .as_ref()
                .map(|t| t.stats().max_depth)
                .unwrap_or(0),
            avg_objects_per_page: if pool_stats.page_count > 0 {
                pool_stats.object_count as f64 / pool_stats.page_count as f64
            } else {
                0.0
            },
            page_utilization,
            bounds: self.bounds,
        }
    }

    /// Creates (or replaces) the backing file at `path` and syncs all
    /// state to it.
    pub fn save(&mut self, path: impl AsRef<Path>) -> UrbisResult<()> {
        self.disk.create(path.as_ref())?;
        self.disk.sync()
    }

    /// Opens the file at `path`, restores pages, tracks and bounds, and
    /// rebuilds the in-memory trees.
    pub fn load(&mut self, path: impl AsRef<Path>) -> UrbisResult<()> {
        self.disk.open(path.as_ref())?;
        self.bounds = self.disk.header().bounds;
        let max_id = self
            .disk
            .pool()
            .pages()
            .iter()
            .flat_map(|p| p.objects())
            .map(|o| o.id())
            .max()
            .unwrap_or(0);
        if max_id >= self.next_object_id {
            self.next_object_id = max_id + 1;
        }
        self.build()
    }

    /// Flushes dirty pages and the header to the open backing file.
    pub fn sync(&mut self) -> UrbisResult<()> {
        self.disk.sync()
    }

    /// Drops every object, page, track and block. Id counters keep
    /// advancing, so removed ids never come back.
    pub fn clear(&mut self) {
        self.disk.reset_memory();
        self.block_tree = KdTree::new();
        self.page_tree = None;
        self.blocks.clear();
        self.bounds = BoundingBox::empty();
        self.is_built = false;
    }
}
