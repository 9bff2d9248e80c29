//! The page pool: sole owner of all pages and tracks.
//!
//! Every other component references pool contents by `page_id` / `track_id`
//! and resolves them here; nothing outside the pool holds page storage.
//! Page and track ids are assigned from monotonic counters starting at 1
//! and are never reused.

use super::page::{Page, Track};
use crate::bounding_box::BoundingBox;
use crate::error::{UrbisError, UrbisResult};
use crate::geometry::Point;

/// Aggregate counts over the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub page_count: usize,
    pub track_count: usize,
    pub object_count: usize,
}

/// Owns all pages and tracks of one index.
#[derive(Debug, Default, Clone)]
pub struct PagePool {
    pages: Vec<Page>,
    tracks: Vec<Track>,
    next_page_id: u32,
    next_track_id: u32,
}

impl PagePool {
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            tracks: Vec::new(),
            next_page_id: 1,
            next_track_id: 1,
        }
    }

    /// Allocates a fresh page, attaching it to `track_id` when non-zero.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown track and `Full` for a saturated one.
    pub fn alloc_page(&mut self, track_id: u32, capacity: usize) -> UrbisResult<u32> {
        let page_id = self.next_page_id;
        if track_id > 0 {
            let track = self
                .tracks
                .iter_mut()
                .find(|t| t.id() == track_id)
                .ok_or_else(|| UrbisError::NotFound(format!("track {}", track_id)))?;
            track.add_page(page_id)?;
        }
        self.next_page_id += 1;
        self.pages.push(Page::new(page_id, track_id, capacity));
        Ok(page_id)
    }

    /// Frees a page, detaching it from its track first.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown page id.
    pub fn free_page(&mut self, page_id: u32) -> UrbisResult<()> {
        let pos = self
            .pages
            .iter()
            .position(|p| p.id() == page_id)
            .ok_or_else(|| UrbisError::NotFound(format!("page {}", page_id)))?;
        let track_id = self.pages[pos].track_id();
        self.pages.remove(pos);
        if track_id > 0 {
            if let Some(track) = self.tracks.iter_mut().find(|t| t.id() == track_id) {
                let _ = track.remove_page(page_id);
            }
            self.recompute_track(track_id);
        }
        Ok(())
    }

    /// Restores a deserialized page, keeping its persisted id.
    pub(crate) fn restore_page(&mut self, page: Page) {
        if page.id() >= self.next_page_id {
            self.next_page_id = page.id() + 1;
        }
        self.pages.push(page);
    }

    pub fn page(&self, page_id: u32) -> Option<&Page> {
        self.pages.iter().find(|p| p.id() == page_id)
    }

    pub fn page_mut(&mut self, page_id: u32) -> Option<&mut Page> {
        self.pages.iter_mut().find(|p| p.id() == page_id)
    }

    /// All pages in allocation order.
    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub(crate) fn pages_mut(&mut self) -> &mut [Page] {
        &mut self.pages
    }

    /// Creates a fresh empty track.
    pub fn create_track(&mut self, page_capacity: usize) -> u32 {
        let track_id = self.next_track_id;
        self.next_track_id += 1;
        self.tracks.push(Track::new(track_id, page_capacity));
        track_id
    }

    /// Recreates a track with a persisted id, bumping the id counter past it.
    pub(crate) fn restore_track(&mut self, track_id: u32, page_capacity: usize) {
        if track_id >= self.next_track_id {
            self.next_track_id = track_id + 1;
        }
        self.tracks.push(Track::new(track_id, page_capacity));
    }

    pub fn track(&self, track_id: u32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == track_id)
    }

    /// All tracks in creation order (ascending id).
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Attaches an existing page to an existing track and refreshes the
    /// track aggregates; used when rebuilding tracks from persisted pages.
    pub(crate) fn attach_page_to_track(&mut self, page_id: u32, track_id: u32) -> UrbisResult<()> {
        {
            let track = self
                .tracks
                .iter_mut()
                .find(|t| t.id() == track_id)
                .ok_or_else(|| UrbisError::NotFound(format!("track {}", track_id)))?;
            track.add_page(page_id)?;
        }
        if let Some(page) = self.page_mut(page_id) {
            page.set_track_id(track_id);
        }
        self.recompute_track(track_id);
        Ok(())
    }

    /// Refreshes a track's derived extent and centroid from its member pages.
    pub fn recompute_track(&mut self, track_id: u32) {
        let member_ids: Vec<u32> = match self.track(track_id) {
            Some(track) => track.page_ids().to_vec(),
            None => return,
        };
        let members: Vec<(BoundingBox, Point)> = member_ids
            .iter()
            .filter_map(|id| self.page(*id))
            .map(|p| (p.extent(), p.centroid()))
            .collect();
        if let Some(track) = self.tracks.iter_mut().find(|t| t.id() == track_id) {
            track.set_derived(&members);
        }
    }

    /// Total objects across a track's pages.
    pub fn track_object_count(&self, track_id: u32) -> usize {
        match self.track(track_id) {
            Some(track) => track
                .page_ids()
                .iter()
                .filter_map(|id| self.page(*id))
                .map(|p| p.object_count())
                .sum(),
            None => 0,
        }
    }

    /// Ids of pages whose extent intersects the region, in allocation order.
    pub fn query_region(&self, region: &BoundingBox) -> Vec<u32> {
        self.pages
            .iter()
            .filter(|p| p.extent().intersects(region))
            .map(|p| p.id())
            .collect()
    }

    /// Drops tracks that own no pages; returns how many were removed.
    ///
    /// Id counters are untouched, so removed ids are never reissued.
    pub fn remove_empty_tracks(&mut self) -> usize {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.page_count() > 0);
        before - self.tracks.len()
    }

    /// Aggregate counts.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            page_count: self.pages.len(),
            track_count: self.tracks.len(),
            object_count: self.pages.iter().map(|p| p.object_count()).sum(),
        }
    }

    /// Drops all pages and tracks; id counters keep advancing.
    pub fn clear(&mut self) {
        self.pages.clear();
        self.tracks.clear();
    }
}
