//! Pages and tracks: the physical clustering units of the index.
//!
//! A page is a fixed-capacity container of spatial objects and the unit of
//! disk I/O; a track is a bounded sequence of pages assumed to be readable
//! without additional seeks. Both maintain derived spatial aggregates
//! (extent and centroid) over their contents.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::constants::MAX_OBJECTS_PER_PAGE;
use crate::bounding_box::BoundingBox;
use crate::error::{UrbisError, UrbisResult};
use crate::geometry::{GeometryKind, Point, SpatialObject};

/// Page is allocated (not free).
pub const FLAG_ALLOCATED: u32 = 1;
/// Page holds its full object capacity.
pub const FLAG_FULL: u32 = 2;
/// Page has unsaved modifications.
pub const FLAG_DIRTY: u32 = 4;
/// Page is pinned in the cache and exempt from eviction.
pub const FLAG_PINNED: u32 = 8;

/// Serialized page header: ids, count, flags, extent, centroid, checksum.
const SLOT_HEADER_SIZE: usize = 4 * 4 + 4 * 8 + 2 * 8 + 8;

/// Serialized per-object record: id, tag + padding, centroid, MBR.
const OBJECT_RECORD_SIZE: usize = 8 + 4 + 2 * 8 + 4 * 8;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over a byte slice.
fn fnv1a(data: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A fixed-capacity container of spatial objects.
///
/// The page owns its objects: `add` deep-copies the caller's value. Derived
/// extent and centroid are maintained incrementally on add and recomputed
/// fully by [`update_derived`](Page::update_derived), which also refreshes
/// the stored checksum.
#[derive(Debug, Clone)]
pub struct Page {
    page_id: u32,
    track_id: u32,
    flags: u32,
    extent: BoundingBox,
    centroid: Point,
    checksum: u64,
    capacity: usize,
    objects: Vec<SpatialObject>,
}

impl Page {
    /// Creates an allocated, empty page. Capacity is clamped to
    /// `1..=MAX_OBJECTS_PER_PAGE`.
    pub fn new(page_id: u32, track_id: u32, capacity: usize) -> Self {
        Self {
            page_id,
            track_id,
            flags: FLAG_ALLOCATED,
            extent: BoundingBox::empty(),
            centroid: Point::new(0.0, 0.0),
            checksum: 0,
            capacity: capacity.clamp(1, MAX_OBJECTS_PER_PAGE),
            objects: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.page_id
    }

    /// Owning track id; 0 means unassigned.
    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub(crate) fn set_track_id(&mut self, track_id: u32) {
        self.track_id = track_id;
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn set_flag(&mut self, flag: u32) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: u32) {
        self.flags &= !flag;
    }

    /// Union of the contained objects' MBRs; empty for an empty page.
    pub fn extent(&self) -> BoundingBox {
        self.extent
    }

    /// Arithmetic mean of object centroids, or the allocation centroid
    /// stamped by the disk manager while the page is still empty.
    pub fn centroid(&self) -> Point {
        self.centroid
    }

    /// Stamps the allocation centroid on a fresh page.
    pub(crate) fn set_centroid(&mut self, centroid: Point) {
        self.centroid = centroid;
    }

    pub fn objects(&self) -> &[SpatialObject] {
        &self.objects
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.objects.len() >= self.capacity
    }

    /// Fill ratio in `0.0..=1.0`.
    pub fn utilization(&self) -> f64 {
        self.objects.len() as f64 / self.capacity as f64
    }

    /// Adds a deep copy of the object.
    ///
    /// Unions the object's MBR into the extent, marks the page dirty and
    /// sets FULL when the capacity is reached.
    ///
    /// # Errors
    /// Returns `Full` when the page is already at capacity; the page is
    /// left untouched.
    pub fn add(&mut self, obj: &SpatialObject) -> UrbisResult<()> {
        if self.objects.len() >= self.capacity {
            return Err(UrbisError::Full(format!(
                "page {} holds {} objects",
                self.page_id, self.capacity
            )));
        }
        self.extent.expand(&obj.mbr());
        self.objects.push(obj.clone());
        self.flags |= FLAG_DIRTY;
        if self.objects.len() >= self.capacity {
            self.flags |= FLAG_FULL;
        }
        Ok(())
    }

    /// Removes an object by id, shifting later objects left.
    ///
    /// Clears FULL, marks the page dirty and recomputes the derived values.
    ///
    /// # Errors
    /// Returns `NotFound` when no object carries the id.
    pub fn remove(&mut self, object_id: u64) -> UrbisResult<()> {
        let pos = self
            .objects
            .iter()
            .position(|o| o.id() == object_id)
            .ok_or_else(|| {
                UrbisError::NotFound(format!("object {} in page {}", object_id, self.page_id))
            })?;
        self.objects.remove(pos);
        self.flags |= FLAG_DIRTY;
        self.flags &= !FLAG_FULL;
        self.update_derived();
        Ok(())
    }

    /// Finds an object by id.
    pub fn find(&self, object_id: u64) -> Option<&SpatialObject> {
        self.objects.iter().find(|o| o.id() == object_id)
    }

    /// Recomputes extent, centroid and the stored checksum from scratch.
    ///
    /// The centroid of an empty page is the zero vector.
    pub fn update_derived(&mut self) {
        self.extent = BoundingBox::empty();
        let mut cx = 0.0;
        let mut cy = 0.0;
        for obj in &self.objects {
            self.extent.expand(&obj.mbr());
            cx += obj.centroid().x;
            cy += obj.centroid().y;
        }
        if self.objects.is_empty() {
            self.centroid = Point::new(0.0, 0.0);
        } else {
            let n = self.objects.len() as f64;
            self.centroid = Point::new(cx / n, cy / n);
        }
        self.checksum = self.compute_checksum();
    }

    /// FNV-1a checksum over (page_id, track_id, object_count, per-object
    /// (id, centroid)), XOR-folded per field.
    pub fn compute_checksum(&self) -> u64 {
        let mut hash = fnv1a(&self.page_id.to_le_bytes());
        hash ^= fnv1a(&self.track_id.to_le_bytes());
        hash ^= fnv1a(&(self.objects.len() as u32).to_le_bytes());
        for obj in &self.objects {
            hash ^= fnv1a(&obj.id().to_le_bytes());
            let c = obj.centroid();
            let mut buf = [0u8; 16];
            buf[..8].copy_from_slice(&c.x.to_le_bytes());
            buf[8..].copy_from_slice(&c.y.to_le_bytes());
            hash ^= fnv1a(&buf);
        }
        hash
    }

    /// The checksum stored by the last `update_derived` or deserialization.
    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    /// Recomputes the checksum and compares it against the stored value.
    pub fn verify(&self) -> bool {
        self.checksum == self.compute_checksum()
    }

    /// Serializes the page into a fixed slot of `slot_size` bytes,
    /// little-endian, zero-padded.
    ///
    /// Only indexing tuples (id, kind, centroid, MBR) are persisted per
    /// object; full geometry is not part of the slot format.
    ///
    /// # Errors
    /// Returns `Alloc` when the records do not fit the slot.
    pub fn serialize(&self, slot_size: usize) -> UrbisResult<Bytes> {
        let needed = SLOT_HEADER_SIZE + self.objects.len() * OBJECT_RECORD_SIZE;
        if needed > slot_size {
            return Err(UrbisError::Alloc(format!(
                "page {} needs {} bytes, slot holds {}",
                self.page_id, needed, slot_size
            )));
        }

        let mut buf = BytesMut::with_capacity(slot_size);
        buf.put_u32_le(self.page_id);
        buf.put_u32_le(self.track_id);
        buf.put_u32_le(self.objects.len() as u32);
        buf.put_u32_le(self.flags);
        buf.put_f64_le(self.extent.min_x);
        buf.put_f64_le(self.extent.min_y);
        buf.put_f64_le(self.extent.max_x);
        buf.put_f64_le(self.extent.max_y);
        buf.put_f64_le(self.centroid.x);
        buf.put_f64_le(self.centroid.y);
        buf.put_u64_le(self.checksum);

        for obj in &self.objects {
            buf.put_u64_le(obj.id());
            buf.put_u8(obj.kind() as u8);
            buf.put_bytes(0, 3);
            let c = obj.centroid();
            buf.put_f64_le(c.x);
            buf.put_f64_le(c.y);
            let mbr = obj.mbr();
            buf.put_f64_le(mbr.min_x);
            buf.put_f64_le(mbr.min_y);
            buf.put_f64_le(mbr.max_x);
            buf.put_f64_le(mbr.max_y);
        }

        buf.put_bytes(0, slot_size - needed);
        Ok(buf.freeze())
    }

    /// Deserializes a page from a slot buffer.
    ///
    /// Objects come back as indexing stubs carrying the persisted id, kind,
    /// centroid and MBR (option (b) of the geometry-persistence question):
    /// exact for points, typed stand-ins otherwise. Reopened files therefore
    /// answer bounds and centroid queries until full geometry is re-ingested.
    ///
    /// # Errors
    /// Returns `Corrupt` for impossible object counts, unknown geometry
    /// tags, or a truncated buffer.
    pub fn deserialize(buf: &[u8], capacity: usize) -> UrbisResult<Page> {
        if buf.len() < SLOT_HEADER_SIZE {
            return Err(UrbisError::Corrupt(format!(
                "page slot truncated to {} bytes",
                buf.len()
            )));
        }

        let mut cursor = buf;
        let page_id = cursor.get_u32_le();
        let track_id = cursor.get_u32_le();
        let object_count = cursor.get_u32_le() as usize;
        let flags = cursor.get_u32_le();
        let extent = BoundingBox::new(
            cursor.get_f64_le(),
            cursor.get_f64_le(),
            cursor.get_f64_le(),
            cursor.get_f64_le(),
        );
        let centroid = Point::new(cursor.get_f64_le(), cursor.get_f64_le());
        let checksum = cursor.get_u64_le();

        if object_count > MAX_OBJECTS_PER_PAGE {
            return Err(UrbisError::Corrupt(format!(
                "page {} claims {} objects (maximum {})",
                page_id, object_count, MAX_OBJECTS_PER_PAGE
            )));
        }
        if cursor.remaining() < object_count * OBJECT_RECORD_SIZE {
            return Err(UrbisError::Corrupt(format!(
                "page {} records truncated",
                page_id
            )));
        }

        let mut objects = Vec::with_capacity(object_count);
        for _ in 0..object_count {
            let id = cursor.get_u64_le();
            let tag = cursor.get_u8();
            cursor.advance(3);
            let kind = GeometryKind::from_u8(tag).ok_or_else(|| {
                UrbisError::Corrupt(format!("page {} has unknown geometry tag {}", page_id, tag))
            })?;
            let obj_centroid = Point::new(cursor.get_f64_le(), cursor.get_f64_le());
            let obj_mbr = BoundingBox::new(
                cursor.get_f64_le(),
                cursor.get_f64_le(),
                cursor.get_f64_le(),
                cursor.get_f64_le(),
            );
            objects.push(SpatialObject::from_record(id, kind, obj_centroid, obj_mbr));
        }

        Ok(Page {
            page_id,
            track_id,
            flags,
            extent,
            centroid,
            checksum,
            capacity: capacity.clamp(1, MAX_OBJECTS_PER_PAGE).max(object_count),
            objects,
        })
    }
}

/// A bounded sequence of pages treated as contiguous for seek accounting.
///
/// The track holds page ids; the pool that owns both sides keeps the
/// derived extent and centroid current as member pages change.
#[derive(Debug, Clone)]
pub struct Track {
    track_id: u32,
    page_ids: Vec<u32>,
    page_capacity: usize,
    extent: BoundingBox,
    centroid: Point,
}

impl Track {
    /// Creates an empty track. Capacity zero falls back to 1.
    pub fn new(track_id: u32, page_capacity: usize) -> Self {
        Self {
            track_id,
            page_ids: Vec::new(),
            page_capacity: page_capacity.max(1),
            extent: BoundingBox::empty(),
            centroid: Point::new(0.0, 0.0),
        }
    }

    pub fn id(&self) -> u32 {
        self.track_id
    }

    pub fn page_ids(&self) -> &[u32] {
        &self.page_ids
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    pub fn is_full(&self) -> bool {
        self.page_ids.len() >= self.page_capacity
    }

    pub fn has_space(&self) -> bool {
        self.page_ids.len() < self.page_capacity
    }

    pub fn contains(&self, page_id: u32) -> bool {
        self.page_ids.contains(&page_id)
    }

    /// Union of member page extents.
    pub fn extent(&self) -> BoundingBox {
        self.extent
    }

    /// Mean of the centroids of member pages with a non-empty extent.
    pub fn centroid(&self) -> Point {
        self.centroid
    }

    /// Appends a page id.
    ///
    /// # Errors
    /// Returns `Full` when the track is at capacity.
    pub(crate) fn add_page(&mut self, page_id: u32) -> UrbisResult<()> {
        if self.is_full() {
            return Err(UrbisError::Full(format!(
                "track {} holds {} pages",
                self.track_id, self.page_capacity
            )));
        }
        self.page_ids.push(page_id);
        Ok(())
    }

    /// Removes a page id, shifting later ids left.
    ///
    /// # Errors
    /// Returns `NotFound` when the id is absent.
    pub(crate) fn remove_page(&mut self, page_id: u32) -> UrbisResult<()> {
        let pos = self
            .page_ids
            .iter()
            .position(|&id| id == page_id)
            .ok_or_else(|| {
                UrbisError::NotFound(format!("page {} in track {}", page_id, self.track_id))
            })?;
        self.page_ids.remove(pos);
        Ok(())
    }

    /// Replaces the derived aggregates; pages with empty extents contribute
    /// nothing to the centroid.
    pub(crate) fn set_derived(&mut self, members: &[(BoundingBox, Point)]) {
        self.extent = BoundingBox::empty();
        let mut cx = 0.0;
        let mut cy = 0.0;
        let mut occupied = 0usize;
        for (extent, centroid) in members {
            self.extent.expand(extent);
            if !extent.is_empty() {
                cx += centroid.x;
                cy += centroid.y;
                occupied += 1;
            }
        }
        if occupied > 0 {
            self.centroid = Point::new(cx / occupied as f64, cy / occupied as f64);
        } else {
            self.centroid = Point::new(0.0, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::constants::PAGE_SIZE;

    fn point_obj(id: u64, x: f64, y: f64) -> SpatialObject {
        let mut obj = SpatialObject::point(x, y);
        obj.set_id(id);
        obj
    }

    #[test]
    fn test_page_new() {
        let page = Page::new(1, 0, 64);
        assert_eq!(page.id(), 1);
        assert_eq!(page.track_id(), 0);
        assert!(page.has_flag(FLAG_ALLOCATED));
        assert!(!page.is_full());
        assert!(page.extent().is_empty());
        assert_eq!(page.object_count(), 0);
    }

    #[test]
    fn test_page_capacity_clamped() {
        let page = Page::new(1, 0, 1000);
        assert_eq!(page.capacity(), MAX_OBJECTS_PER_PAGE);
        let page = Page::new(2, 0, 0);
        assert_eq!(page.capacity(), 1);
    }

    #[test]
    fn test_page_add_updates_extent_and_flags() {
        let mut page = Page::new(1, 0, 4);
        page.add(&point_obj(1, 5.0, 5.0)).unwrap();
        assert!(page.has_flag(FLAG_DIRTY));
        assert_eq!(page.extent(), BoundingBox::new(5.0, 5.0, 5.0, 5.0));

        page.add(&point_obj(2, 15.0, 15.0)).unwrap();
        assert_eq!(page.extent(), BoundingBox::new(5.0, 5.0, 15.0, 15.0));
        assert!(!page.is_full());
    }

    #[test]
    fn test_page_full() {
        let mut page = Page::new(1, 0, 2);
        page.add(&point_obj(1, 0.0, 0.0)).unwrap();
        page.add(&point_obj(2, 1.0, 1.0)).unwrap();
        assert!(page.is_full());
        assert!(page.has_flag(FLAG_FULL));

        let err = page.add(&point_obj(3, 2.0, 2.0));
        assert!(matches!(err, Err(UrbisError::Full(_))));
        assert_eq!(page.object_count(), 2);
    }

    #[test]
    fn test_page_remove_shifts_and_clears_full() {
        let mut page = Page::new(1, 0, 2);
        page.add(&point_obj(1, 0.0, 0.0)).unwrap();
        page.add(&point_obj(2, 10.0, 10.0)).unwrap();
        assert!(page.has_flag(FLAG_FULL));

        page.remove(1).unwrap();
        assert!(!page.has_flag(FLAG_FULL));
        assert_eq!(page.object_count(), 1);
        assert_eq!(page.objects()[0].id(), 2);
        // Extent recomputed to the remaining object.
        assert_eq!(page.extent(), BoundingBox::new(10.0, 10.0, 10.0, 10.0));

        assert!(matches!(page.remove(99), Err(UrbisError::NotFound(_))));
    }

    #[test]
    fn test_page_find_and_utilization() {
        let mut page = Page::new(1, 0, 4);
        page.add(&point_obj(7, 1.0, 2.0)).unwrap();
        assert!(page.find(7).is_some());
        assert!(page.find(8).is_none());
        assert_eq!(page.utilization(), 0.25);
    }

    #[test]
    fn test_page_update_derived_centroid_mean() {
        let mut page = Page::new(1, 0, 4);
        page.add(&point_obj(1, 0.0, 0.0)).unwrap();
        page.add(&point_obj(2, 10.0, 0.0)).unwrap();
        page.update_derived();
        assert_eq!(page.centroid(), Point::new(5.0, 0.0));

        page.remove(1).unwrap();
        page.remove(2).unwrap();
        assert_eq!(page.centroid(), Point::new(0.0, 0.0));
        assert!(page.extent().is_empty());
    }

    #[test]
    fn test_checksum_stability_and_tamper_detection() {
        let mut page = Page::new(3, 2, 8);
        page.add(&point_obj(1, 1.0, 1.0)).unwrap();
        page.add(&point_obj(2, 2.0, 2.0)).unwrap();
        page.update_derived();

        assert!(page.verify());
        let before = page.checksum();
        // Same content hashes the same.
        assert_eq!(before, page.compute_checksum());

        page.add(&point_obj(3, 3.0, 3.0)).unwrap();
        // Stored checksum is stale until update_derived.
        assert!(!page.verify());
        page.update_derived();
        assert!(page.verify());
        assert_ne!(page.checksum(), before);
    }

    #[test]
    fn test_page_slot_round_trip() {
        let mut page = Page::new(5, 3, 8);
        page.add(&point_obj(10, 1.5, 2.5)).unwrap();
        page.add(&point_obj(11, -4.0, 7.0)).unwrap();
        page.update_derived();

        let slot = page.serialize(PAGE_SIZE).unwrap();
        assert_eq!(slot.len(), PAGE_SIZE);

        let restored = Page::deserialize(&slot, 8).unwrap();
        assert_eq!(restored.id(), 5);
        assert_eq!(restored.track_id(), 3);
        assert_eq!(restored.flags(), page.flags());
        assert_eq!(restored.extent(), page.extent());
        assert_eq!(restored.centroid(), page.centroid());
        assert_eq!(restored.checksum(), page.checksum());
        assert_eq!(restored.object_count(), 2);
        for (orig, back) in page.objects().iter().zip(restored.objects()) {
            assert_eq!(orig.id(), back.id());
            assert_eq!(orig.kind(), back.kind());
            assert_eq!(orig.centroid(), back.centroid());
            assert_eq!(orig.mbr(), back.mbr());
        }
        assert!(restored.verify());
    }

    #[test]
    fn test_deserialize_rejects_impossible_count() {
        let mut page = Page::new(1, 0, 8);
        page.add(&point_obj(1, 0.0, 0.0)).unwrap();
        page.update_derived();
        let slot = page.serialize(PAGE_SIZE).unwrap();

        let mut bytes = slot.to_vec();
        // Corrupt the object_count field (offset 8) to an impossible value.
        bytes[8..12].copy_from_slice(&1000u32.to_le_bytes());
        let err = Page::deserialize(&bytes, 8);
        assert!(matches!(err, Err(UrbisError::Corrupt(_))));
    }

    #[test]
    fn test_deserialize_rejects_truncated_buffer() {
        let err = Page::deserialize(&[0u8; 16], 8);
        assert!(matches!(err, Err(UrbisError::Corrupt(_))));
    }

    #[test]
    fn test_serialize_rejects_undersized_slot() {
        let mut page = Page::new(1, 0, 8);
        for i in 0..8 {
            page.add(&point_obj(i + 1, i as f64, 0.0)).unwrap();
        }
        let err = page.serialize(128);
        assert!(matches!(err, Err(UrbisError::Alloc(_))));
    }

    #[test]
    fn test_track_add_remove() {
        let mut track = Track::new(1, 2);
        assert_eq!(track.page_capacity(), 2);
        track.add_page(10).unwrap();
        track.add_page(11).unwrap();
        assert!(track.is_full());
        assert!(matches!(track.add_page(12), Err(UrbisError::Full(_))));

        track.remove_page(10).unwrap();
        assert!(track.has_space());
        assert_eq!(track.page_ids(), &[11]);
        assert!(matches!(track.remove_page(10), Err(UrbisError::NotFound(_))));
    }

    #[test]
    fn test_track_derived_skips_empty_pages() {
        let mut track = Track::new(1, 4);
        track.add_page(1).unwrap();
        track.add_page(2).unwrap();
        track.add_page(3).unwrap();

        // Page 3 is empty: it contributes to neither extent nor centroid.
        track.set_derived(&[
            (BoundingBox::new(0.0, 0.0, 2.0, 2.0), Point::new(1.0, 1.0)),
            (BoundingBox::new(4.0, 4.0, 6.0, 6.0), Point::new(5.0, 5.0)),
            (BoundingBox::empty(), Point::new(0.0, 0.0)),
        ]);
        assert_eq!(track.extent(), BoundingBox::new(0.0, 0.0, 6.0, 6.0));
        assert_eq!(track.centroid(), Point::new(3.0, 3.0));
    }
}
