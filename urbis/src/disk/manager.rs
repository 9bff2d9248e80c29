//! The disk manager: spatial-locality page allocation, file lifecycle, and
//! seek estimation.
//!
//! Allocation keeps spatially close objects on the same track by routing a
//! page's centroid through one of four strategies; an auxiliary KD-tree
//! over the centroids of occupied pages lets the index find a nearby page
//! for a new object without scanning the pool.

use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::cache::PageCache;
use super::constants::{DEFAULT_CACHE_SIZE, MAX_OBJECTS_PER_PAGE, PAGES_PER_TRACK, PAGE_SIZE};
use super::page::{Page, FLAG_DIRTY, FLAG_PINNED};
use super::pool::PagePool;
use super::storage::{FileHeader, Storage};
use crate::bounding_box::BoundingBox;
use crate::config::AllocationStrategy;
use crate::error::{UrbisError, UrbisResult};
use crate::geometry::Point;
use crate::kdtree::{ItemRef, KdEntry, KdTree};

/// Disk manager settings, usually derived from [`crate::IndexConfig`].
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    pub cache_size: usize,
    pub page_size: usize,
    pub pages_per_track: usize,
    pub page_capacity: usize,
    pub strategy: AllocationStrategy,
    pub sync_on_write: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            page_size: PAGE_SIZE,
            pages_per_track: PAGES_PER_TRACK,
            page_capacity: MAX_OBJECTS_PER_PAGE,
            strategy: AllocationStrategy::default(),
            sync_on_write: false,
        }
    }
}

/// Running I/O counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub pages_read: u64,
    pub pages_written: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Owns the page pool, the LRU cache, the allocation KD-tree and the
/// optional backing file.
pub struct DiskManager {
    config: DiskManagerConfig,
    header: FileHeader,
    pool: PagePool,
    cache: PageCache,
    allocation_tree: KdTree,
    storage: Option<Storage>,
    stats: IoStats,
    is_open: bool,
    is_dirty: bool,
}

impl DiskManager {
    pub fn new(config: DiskManagerConfig) -> Self {
        let header = FileHeader::new(config.page_size as u32, config.pages_per_track as u32);
        let cache = PageCache::new(config.cache_size);
        Self {
            config,
            header,
            pool: PagePool::new(),
            cache,
            allocation_tree: KdTree::new(),
            storage: None,
            stats: IoStats::default(),
            is_open: false,
            is_dirty: false,
        }
    }

    pub fn config(&self) -> &DiskManagerConfig {
        &self.config
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn pool(&self) -> &PagePool {
        &self.pool
    }

    pub(crate) fn pool_mut(&mut self) -> &mut PagePool {
        &mut self.pool
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn allocation_tree(&self) -> &KdTree {
        &self.allocation_tree
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// I/O counters with the cache's own hit/miss tallies folded in.
    pub fn stats(&self) -> IoStats {
        let mut stats = self.stats;
        stats.cache_hits = self.cache.hits();
        stats.cache_misses = self.cache.misses();
        stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = IoStats::default();
    }

    /// Picks a track for a page with the given centroid, or `None` when the
    /// strategy wants (or is forced into) a fresh track. Ties between
    /// equally good tracks go to the lower track id.
    fn find_best_track(&self, centroid: &Point) -> Option<u32> {
        match self.config.strategy {
            AllocationStrategy::NearestTrack => {
                let mut best = None;
                let mut best_dist = f64::INFINITY;
                for track in self.pool.tracks() {
                    if !track.has_space() {
                        continue;
                    }
                    let dist = centroid.distance(&track.centroid());
                    if dist < best_dist {
                        best_dist = dist;
                        best = Some(track.id());
                    }
                }
                best
            }
            AllocationStrategy::BestFit => {
                let mut best = None;
                let mut best_expansion = f64::INFINITY;
                for track in self.pool.tracks() {
                    if !track.has_space() {
                        continue;
                    }
                    let expansion = track.extent().enlargement(centroid);
                    if expansion < best_expansion {
                        best_expansion = expansion;
                        best = Some(track.id());
                    }
                }
                best
            }
            AllocationStrategy::Sequential => {
                let last = self.pool.tracks().last()?;
                if last.has_space() {
                    Some(last.id())
                } else {
                    None
                }
            }
            AllocationStrategy::NewTrack => None,
        }
    }

    /// Creates a fresh track.
    pub fn create_track(&mut self) -> u32 {
        let track_id = self.pool.create_track(self.config.pages_per_track);
        self.is_dirty = true;
        track_id
    }

    /// Allocates a page for data centred at `centroid`.
    ///
    /// The strategy picks a track (a new one when none has capacity), the
    /// pool allocates the page on it, the page is stamped with the
    /// centroid, and the allocation tree and index bounds are updated.
    pub fn alloc_page(&mut self, centroid: Point) -> UrbisResult<u32> {
        let track_id = match self.find_best_track(&centroid) {
            Some(id) => id,
            None => self.create_track(),
        };
        let page_id = self.pool.alloc_page(track_id, self.config.page_capacity)?;
        if let Some(page) = self.pool.page_mut(page_id) {
            page.set_centroid(centroid);
        }
        self.allocation_tree
            .insert(centroid, page_id as u64, ItemRef::Page(page_id));
        self.header.bounds.expand_point(&centroid);
        self.header.page_count = self.pool.stats().page_count as u32;
        self.is_dirty = true;
        Ok(page_id)
    }

    /// Frees a page and rebuilds the allocation tree.
    pub fn free_page(&mut self, page_id: u32) -> UrbisResult<()> {
        self.pool.free_page(page_id)?;
        self.cache.remove(page_id);
        self.rebuild_allocation_tree();
        self.header.page_count = self.pool.stats().page_count as u32;
        self.is_dirty = true;
        Ok(())
    }

    /// Fetches a page, recording a cache hit or miss and admitting missed
    /// pages at the MRU end.
    ///
    /// # Errors
    /// Returns `NotFound` when the pool does not hold the page.
    pub fn get_page(&mut self, page_id: u32) -> UrbisResult<&Page> {
        if !self.cache.touch(page_id) {
            if self.pool.page(page_id).is_none() {
                return Err(UrbisError::NotFound(format!("page {}", page_id)));
            }
            let pool = &self.pool;
            self.cache.admit(page_id, |id| {
                pool.page(id).is_some_and(|p| p.has_flag(FLAG_PINNED))
            });
        }
        self.pool
            .page(page_id)
            .ok_or_else(|| UrbisError::NotFound(format!("page {}", page_id)))
    }

    /// Pins a page, exempting it from eviction.
    pub fn pin_page(&mut self, page_id: u32) -> UrbisResult<()> {
        self.pool
            .page_mut(page_id)
            .map(|p| p.set_flag(FLAG_PINNED))
            .ok_or_else(|| UrbisError::NotFound(format!("page {}", page_id)))
    }

    /// Unpins a page.
    pub fn unpin_page(&mut self, page_id: u32) -> UrbisResult<()> {
        self.pool
            .page_mut(page_id)
            .map(|p| p.clear_flag(FLAG_PINNED))
            .ok_or_else(|| UrbisError::NotFound(format!("page {}", page_id)))
    }

    /// Marks a page dirty without touching its cache position.
    pub fn mark_page_dirty(&mut self, page_id: u32) -> UrbisResult<()> {
        self.is_dirty = true;
        self.pool
            .page_mut(page_id)
            .map(|p| p.set_flag(FLAG_DIRTY))
            .ok_or_else(|| UrbisError::NotFound(format!("page {}", page_id)))
    }

    /// Evicts up to `n` unpinned cache entries; returns how many went.
    pub fn evict(&mut self, n: usize) -> usize {
        let pool = &self.pool;
        self.cache
            .evict(n, |id| {
                pool.page(id).is_some_and(|p| p.has_flag(FLAG_PINNED))
            })
            .len()
    }

    /// Creates a new backing file, replacing any open one.
    pub fn create(&mut self, path: &Path) -> UrbisResult<()> {
        self.close()?;
        let storage = Storage::create(path, self.config.page_size)?;
        let mut header =
            FileHeader::new(self.config.page_size as u32, self.config.pages_per_track as u32);
        // Aggregates of already pooled data survive the file swap.
        self.refresh_header_aggregates(&mut header);
        storage.write_header(&header)?;
        debug!("created index file {}", path.display());
        self.header = header;
        self.storage = Some(storage);
        self.is_open = true;
        self.is_dirty = false;
        Ok(())
    }

    /// Opens an existing backing file and loads every page slot into the
    /// pool, reconstructing tracks from the persisted per-page track ids
    /// and repopulating the allocation tree from occupied pages.
    pub fn open(&mut self, path: &Path) -> UrbisResult<()> {
        self.close()?;
        let (storage, header) = Storage::open(path)?;

        // The header's layout wins over compiled defaults for this file.
        self.config.page_size = header.page_size as usize;
        self.config.pages_per_track = header.pages_per_track as usize;

        self.pool = PagePool::new();
        self.cache = PageCache::new(self.config.cache_size);

        for page_id in 1..=header.page_count {
            let slot = storage.read_slot(page_id)?;
            let page = Page::deserialize(&slot, self.config.page_capacity)?;
            self.stats.pages_read += 1;
            self.stats.bytes_read += slot.len() as u64;
            self.pool.restore_page(page);
        }

        // Track objects are not persisted; rebuild them from the track ids
        // the page records carry.
        let mut track_ids: Vec<u32> = self
            .pool
            .pages()
            .iter()
            .map(|p| p.track_id())
            .filter(|&id| id > 0)
            .collect();
        track_ids.sort_unstable();
        track_ids.dedup();
        for track_id in track_ids {
            self.pool
                .restore_track(track_id, self.config.pages_per_track);
            let members: Vec<u32> = self
                .pool
                .pages()
                .iter()
                .filter(|p| p.track_id() == track_id)
                .map(|p| p.id())
                .collect();
            for page_id in members {
                if let Err(e) = self.pool.attach_page_to_track(page_id, track_id) {
                    warn!("page {} does not fit track {}: {}", page_id, track_id, e);
                }
            }
        }

        self.rebuild_allocation_tree();
        debug!(
            "opened index file {} ({} pages, {} objects)",
            path.display(),
            header.page_count,
            header.object_count
        );
        self.header = header;
        self.storage = Some(storage);
        self.is_open = true;
        self.is_dirty = false;
        Ok(())
    }

    /// Recomputes the header aggregates from the pool.
    fn refresh_header_aggregates(&self, header: &mut FileHeader) {
        let stats = self.pool.stats();
        header.page_count = stats.page_count as u32;
        header.track_count = stats.track_count as u32;
        header.object_count = stats.object_count as u64;
        let mut bounds = BoundingBox::empty();
        for page in self.pool.pages() {
            bounds.expand(&page.extent());
        }
        header.bounds = bounds;
    }

    /// Writes every dirty page slot, clears the dirty flags, refreshes the
    /// header aggregates and persists the header.
    ///
    /// # Errors
    /// Returns `InvalidArg` when no file is open.
    pub fn sync(&mut self) -> UrbisResult<()> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| UrbisError::InvalidArg("no data file is open".to_string()))?;

        let mut written = 0u64;
        let page_size = self.config.page_size;
        let mut slots = Vec::new();
        for page in self.pool.pages_mut() {
            if page.has_flag(FLAG_DIRTY) {
                slots.push((page.id(), page.serialize(page_size)?));
                page.clear_flag(FLAG_DIRTY);
            }
        }
        for (page_id, slot) in &slots {
            storage.write_slot(*page_id, slot)?;
            written += 1;
        }
        self.stats.pages_written += written;
        self.stats.bytes_written += written * page_size as u64;

        let mut header = self.header.clone();
        self.refresh_header_aggregates(&mut header);
        header.touch_modified();
        storage.write_header(&header)?;
        storage.sync()?;
        debug!("synced {} dirty pages", written);

        self.header = header;
        self.is_dirty = false;
        Ok(())
    }

    /// Syncs and releases the backing file; a no-op when none is open.
    pub fn close(&mut self) -> UrbisResult<()> {
        if !self.is_open {
            self.storage = None;
            return Ok(());
        }
        self.sync()?;
        self.storage = None;
        self.is_open = false;
        Ok(())
    }

    /// Path of the open backing file.
    pub fn path(&self) -> Option<PathBuf> {
        self.storage.as_ref().map(|s| s.path().to_path_buf())
    }

    /// Size of the backing file in bytes; 0 when none is open.
    pub fn file_size(&self) -> u64 {
        self.storage
            .as_ref()
            .and_then(|s| s.file_size().ok())
            .unwrap_or(0)
    }

    /// Counts the seeks implied by a page access sequence: transitions
    /// between different non-zero track ids. The first access is free, and
    /// unknown page ids are skipped.
    pub fn estimate_seeks(&self, page_ids: &[u32]) -> u64 {
        let mut seeks = 0u64;
        let mut last_track = 0u32;
        for &page_id in page_ids {
            let Some(page) = self.pool.page(page_id) else {
                continue;
            };
            let track = page.track_id();
            if track != last_track && last_track != 0 {
                seeks += 1;
            }
            last_track = track;
        }
        seeks
    }

    /// Rebuilds the allocation tree from every occupied page and swaps it
    /// in atomically.
    pub fn rebuild_allocation_tree(&mut self) {
        let entries: Vec<KdEntry> = self
            .pool
            .pages()
            .iter()
            .filter(|p| p.object_count() > 0)
            .map(|p| KdEntry::new(p.centroid(), p.id() as u64, ItemRef::Page(p.id())))
            .collect();
        self.allocation_tree = KdTree::bulk_load(entries);
        self.is_dirty = true;
    }

    /// Drops all in-memory pages, tracks and cache state. Id counters keep
    /// advancing and any open file is left untouched until the next sync.
    pub(crate) fn reset_memory(&mut self) {
        self.pool.clear();
        self.cache.clear();
        self.allocation_tree = KdTree::new();
        self.header.page_count = 0;
        self.header.track_count = 0;
        self.header.object_count = 0;
        self.header.bounds = BoundingBox::empty();
        self.is_dirty = true;
    }

    /// Verifies the header and every page checksum.
    ///
    /// # Errors
    /// Returns `Corrupt` naming the first failing page.
    pub fn validate(&self) -> UrbisResult<()> {
        self.header.validate()?;
        for page in self.pool.pages() {
            if !page.verify() {
                return Err(UrbisError::Corrupt(format!(
                    "checksum mismatch on page {}",
                    page.id()
                )));
            }
        }
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if self.is_open {
            if let Err(e) = self.close() {
                warn!("failed to close index file cleanly: {}", e);
            }
        }
    }
}
