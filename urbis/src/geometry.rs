//! Geometry primitives and spatial objects.
//!
//! This module provides the geometry kernel of the index:
//! - [`Point`]: a 2-D coordinate in plane space
//! - [`Polyline`]: an ordered vertex chain with a length-weighted centroid
//! - [`Polygon`]: an exterior ring with optional holes and a signed-area centroid
//! - [`SpatialObject`]: an identified geometry with cached derived values and
//!   an opaque property blob
//!
//! Derived centroid and MBR values are cached on the object and recomputed
//! only through [`SpatialObject::update_derived`]; every component that
//! stores objects relies on callers honouring that contract after geometry
//! mutation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

use crate::bounding_box::BoundingBox;
use crate::error::{UrbisError, UrbisResult};

/// Tolerance below which lengths and areas are treated as degenerate.
const DEGENERACY_EPSILON: f64 = 1e-10;

/// A 2-D point in plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    /// Creates a new point.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    pub fn distance_sq(&self, other: &Point) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        dx * dx + dy * dy
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        self.distance_sq(other).sqrt()
    }
}

impl Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A polyline defined by an ordered sequence of vertices.
///
/// A single-vertex polyline is allowed (a degenerate chain); an empty one is
/// rejected at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    vertices: Vec<Point>,
}

impl Polyline {
    /// Creates a new polyline.
    ///
    /// # Errors
    /// Returns `InvalidGeometry` if no vertices are provided.
    pub fn new(vertices: Vec<Point>) -> UrbisResult<Self> {
        if vertices.is_empty() {
            return Err(UrbisError::InvalidGeometry(
                "polyline requires at least 1 vertex".to_string(),
            ));
        }
        Ok(Self { vertices })
    }

    /// Gets the vertices of this polyline.
    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    /// Appends a vertex. Derived values must be refreshed by the owner.
    pub fn push_vertex(&mut self, p: Point) {
        self.vertices.push(p);
    }

    /// Total length over all segments; zero for fewer than 2 vertices.
    pub fn length(&self) -> f64 {
        if self.vertices.len() < 2 {
            return 0.0;
        }
        let mut length = 0.0;
        for pair in self.vertices.windows(2) {
            length += pair[0].distance(&pair[1]);
        }
        length
    }

    /// Length-weighted average of segment midpoints.
    ///
    /// A single vertex, or a chain whose total length is below tolerance
    /// (all vertices coincident), yields the first vertex.
    pub fn centroid(&self) -> Point {
        if self.vertices.len() == 1 {
            return self.vertices[0];
        }

        let mut total_length = 0.0;
        let mut cx = 0.0;
        let mut cy = 0.0;

        for pair in self.vertices.windows(2) {
            let seg_length = pair[0].distance(&pair[1]);
            cx += (pair[0].x + pair[1].x) / 2.0 * seg_length;
            cy += (pair[0].y + pair[1].y) / 2.0 * seg_length;
            total_length += seg_length;
        }

        if total_length < DEGENERACY_EPSILON {
            self.vertices[0]
        } else {
            Point::new(cx / total_length, cy / total_length)
        }
    }

    /// Bounding box over all vertices.
    pub fn mbr(&self) -> BoundingBox {
        let mut mbr = BoundingBox::empty();
        for v in &self.vertices {
            mbr.expand_point(v);
        }
        mbr
    }
}

/// A polygon with an exterior ring and zero or more interior holes.
///
/// Rings may optionally repeat their first vertex at the end; the shoelace
/// formulas treat every ring as implicitly closed either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    exterior: Vec<Point>,
    holes: Vec<Vec<Point>>,
}

/// Signed shoelace area of a ring, positive for counter-clockwise winding.
fn ring_signed_area(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..ring.len() {
        let j = (i + 1) % ring.len();
        area += ring[i].x * ring[j].y;
        area -= ring[j].x * ring[i].y;
    }
    area / 2.0
}

/// Signed-area centroid of a ring; degenerate rings fall back to the
/// arithmetic mean of their vertices.
fn ring_centroid(ring: &[Point]) -> Point {
    if ring.len() < 3 {
        return Point::new(0.0, 0.0);
    }

    let area = ring_signed_area(ring);
    if area.abs() < DEGENERACY_EPSILON {
        let mut cx = 0.0;
        let mut cy = 0.0;
        for p in ring {
            cx += p.x;
            cy += p.y;
        }
        let n = ring.len() as f64;
        return Point::new(cx / n, cy / n);
    }

    let mut cx = 0.0;
    let mut cy = 0.0;
    for i in 0..ring.len() {
        let j = (i + 1) % ring.len();
        let cross = ring[i].x * ring[j].y - ring[j].x * ring[i].y;
        cx += (ring[i].x + ring[j].x) * cross;
        cy += (ring[i].y + ring[j].y) * cross;
    }
    Point::new(cx / (6.0 * area), cy / (6.0 * area))
}

impl Polygon {
    /// Creates a polygon from an exterior ring.
    ///
    /// # Errors
    /// Returns `InvalidGeometry` if the ring has fewer than 3 vertices.
    pub fn new(exterior: Vec<Point>) -> UrbisResult<Self> {
        Self::with_holes(exterior, Vec::new())
    }

    /// Creates a polygon from an exterior ring and interior holes.
    ///
    /// # Errors
    /// Returns `InvalidGeometry` if any ring has fewer than 3 vertices.
    pub fn with_holes(exterior: Vec<Point>, holes: Vec<Vec<Point>>) -> UrbisResult<Self> {
        if exterior.len() < 3 {
            return Err(UrbisError::InvalidGeometry(
                "polygon exterior requires at least 3 vertices".to_string(),
            ));
        }
        for hole in &holes {
            if hole.len() < 3 {
                return Err(UrbisError::InvalidGeometry(
                    "polygon hole requires at least 3 vertices".to_string(),
                ));
            }
        }
        Ok(Self { exterior, holes })
    }

    /// Gets the exterior ring.
    pub fn exterior(&self) -> &[Point] {
        &self.exterior
    }

    /// Gets the interior holes.
    pub fn holes(&self) -> &[Vec<Point>] {
        &self.holes
    }

    /// Appends a vertex to the exterior ring.
    pub fn push_vertex(&mut self, p: Point) {
        self.exterior.push(p);
    }

    /// Adds an interior hole.
    ///
    /// # Errors
    /// Returns `InvalidGeometry` if the ring has fewer than 3 vertices.
    pub fn add_hole(&mut self, ring: Vec<Point>) -> UrbisResult<()> {
        if ring.len() < 3 {
            return Err(UrbisError::InvalidGeometry(
                "polygon hole requires at least 3 vertices".to_string(),
            ));
        }
        self.holes.push(ring);
        Ok(())
    }

    /// Signed area of the exterior ring (positive for counter-clockwise).
    pub fn signed_area(&self) -> f64 {
        ring_signed_area(&self.exterior)
    }

    /// Unsigned area: |exterior| minus the sum of |holes|.
    pub fn area(&self) -> f64 {
        let mut area = ring_signed_area(&self.exterior).abs();
        for hole in &self.holes {
            if hole.len() >= 3 {
                area -= ring_signed_area(hole).abs();
            }
        }
        area
    }

    /// True when the exterior ring winds clockwise.
    pub fn is_clockwise(&self) -> bool {
        self.signed_area() < 0.0
    }

    /// Signed-area centroid of the exterior ring only.
    ///
    /// Holes are rare in typical GIS data and are not weighted in.
    pub fn centroid(&self) -> Point {
        ring_centroid(&self.exterior)
    }

    /// Bounding box of the exterior ring.
    pub fn mbr(&self) -> BoundingBox {
        let mut mbr = BoundingBox::empty();
        for p in &self.exterior {
            mbr.expand_point(p);
        }
        mbr
    }
}

/// The geometry variants an index can store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Point),
    Polyline(Polyline),
    Polygon(Polygon),
}

/// Discriminant used in the on-disk object records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GeometryKind {
    Point = 0,
    Polyline = 1,
    Polygon = 2,
}

impl GeometryKind {
    /// Decodes a record tag byte.
    pub fn from_u8(tag: u8) -> Option<GeometryKind> {
        match tag {
            0 => Some(GeometryKind::Point),
            1 => Some(GeometryKind::Polyline),
            2 => Some(GeometryKind::Polygon),
            _ => None,
        }
    }
}

impl Geometry {
    /// Centroid per variant rules: the point itself, the length-weighted
    /// midpoint average, or the signed-area centroid.
    pub fn centroid(&self) -> Point {
        match self {
            Geometry::Point(p) => *p,
            Geometry::Polyline(line) => line.centroid(),
            Geometry::Polygon(poly) => poly.centroid(),
        }
    }

    /// Bounding box per variant; degenerate for a point.
    pub fn mbr(&self) -> BoundingBox {
        match self {
            Geometry::Point(p) => BoundingBox::from_point(p),
            Geometry::Polyline(line) => line.mbr(),
            Geometry::Polygon(poly) => poly.mbr(),
        }
    }

    /// Record discriminant for this variant.
    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Point(_) => GeometryKind::Point,
            Geometry::Polyline(_) => GeometryKind::Polyline,
            Geometry::Polygon(_) => GeometryKind::Polygon,
        }
    }
}

/// An identified geometry with cached derived values and user properties.
///
/// Ids are 64-bit and non-zero; 0 means "unassigned" and is replaced on
/// first insertion into an index. Equality compares ids only, never
/// geometry. `Clone` is the deep copy used when a page takes ownership of
/// an inserted object; it includes the property blob.
#[derive(Debug, Clone)]
pub struct SpatialObject {
    id: u64,
    geom: Geometry,
    centroid: Point,
    mbr: BoundingBox,
    properties: Bytes,
}

impl PartialEq for SpatialObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl SpatialObject {
    /// Creates an object from a geometry; derived values are computed eagerly.
    pub fn new(id: u64, geom: Geometry) -> Self {
        let centroid = geom.centroid();
        let mbr = geom.mbr();
        Self {
            id,
            geom,
            centroid,
            mbr,
            properties: Bytes::new(),
        }
    }

    /// Unassigned point object.
    pub fn point(x: f64, y: f64) -> Self {
        Self::new(0, Geometry::Point(Point::new(x, y)))
    }

    /// Unassigned polyline object.
    ///
    /// # Errors
    /// Returns `InvalidGeometry` for an empty vertex list.
    pub fn polyline(vertices: Vec<Point>) -> UrbisResult<Self> {
        Ok(Self::new(0, Geometry::Polyline(Polyline::new(vertices)?)))
    }

    /// Unassigned polygon object.
    ///
    /// # Errors
    /// Returns `InvalidGeometry` for an exterior ring of fewer than 3 vertices.
    pub fn polygon(exterior: Vec<Point>) -> UrbisResult<Self> {
        Ok(Self::new(0, Geometry::Polygon(Polygon::new(exterior)?)))
    }

    /// Reconstructs an object from a persisted indexing record.
    ///
    /// Page slots persist only (id, kind, centroid, MBR); the geometry comes
    /// back as a typed stand-in (exact for points, a degenerate chain or the
    /// MBR corner ring otherwise) and the recorded derived values are kept
    /// verbatim. Such stubs serve bounds and centroid queries until the owner
    /// re-ingests full geometry.
    pub(crate) fn from_record(
        id: u64,
        kind: GeometryKind,
        centroid: Point,
        mbr: BoundingBox,
    ) -> Self {
        let geom = match kind {
            GeometryKind::Point => Geometry::Point(centroid),
            GeometryKind::Polyline => Geometry::Polyline(Polyline {
                vertices: vec![centroid],
            }),
            GeometryKind::Polygon => Geometry::Polygon(Polygon {
                exterior: vec![
                    Point::new(mbr.min_x, mbr.min_y),
                    Point::new(mbr.max_x, mbr.min_y),
                    Point::new(mbr.max_x, mbr.max_y),
                    Point::new(mbr.min_x, mbr.max_y),
                ],
                holes: Vec::new(),
            }),
        };
        Self {
            id,
            geom,
            centroid,
            mbr,
            properties: Bytes::new(),
        }
    }

    /// The object id; 0 when unassigned.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Assigns the id. Ids are never reused within an index lifetime.
    pub fn set_id(&mut self, id: u64) {
        self.id = id;
    }

    /// The stored geometry.
    pub fn geometry(&self) -> &Geometry {
        &self.geom
    }

    /// Record discriminant of the stored geometry.
    pub fn kind(&self) -> GeometryKind {
        self.geom.kind()
    }

    /// Cached centroid; valid as of the last `update_derived`.
    pub fn centroid(&self) -> Point {
        self.centroid
    }

    /// Cached bounding box; valid as of the last `update_derived`.
    pub fn mbr(&self) -> BoundingBox {
        self.mbr
    }

    /// The opaque property blob.
    pub fn properties(&self) -> &Bytes {
        &self.properties
    }

    /// Replaces the property blob.
    pub fn set_properties(&mut self, blob: Bytes) {
        self.properties = blob;
    }

    /// Appends a vertex to a polyline or a polygon exterior ring.
    ///
    /// Callers must follow mutation with [`update_derived`](Self::update_derived).
    ///
    /// # Errors
    /// Returns `InvalidArg` for point geometries.
    pub fn push_vertex(&mut self, p: Point) -> UrbisResult<()> {
        match &mut self.geom {
            Geometry::Point(_) => Err(UrbisError::InvalidArg(
                "cannot append a vertex to a point".to_string(),
            )),
            Geometry::Polyline(line) => {
                line.push_vertex(p);
                Ok(())
            }
            Geometry::Polygon(poly) => {
                poly.push_vertex(p);
                Ok(())
            }
        }
    }

    /// Adds a hole ring to a polygon.
    ///
    /// # Errors
    /// Returns `InvalidArg` for non-polygon geometries and
    /// `InvalidGeometry` for rings of fewer than 3 vertices.
    pub fn add_hole(&mut self, ring: Vec<Point>) -> UrbisResult<()> {
        match &mut self.geom {
            Geometry::Polygon(poly) => poly.add_hole(ring),
            _ => Err(UrbisError::InvalidArg(
                "holes only apply to polygons".to_string(),
            )),
        }
    }

    /// Recomputes the cached centroid and MBR from the current geometry.
    pub fn update_derived(&mut self) {
        self.centroid = self.geom.centroid();
        self.mbr = self.geom.mbr();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_eq!(a.distance_sq(&b), 25.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_polyline_requires_vertex() {
        assert!(Polyline::new(vec![]).is_err());
        assert!(Polyline::new(vec![Point::new(1.0, 1.0)]).is_ok());
    }

    #[test]
    fn test_polyline_length() {
        let line = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(3.0, 0.0),
            Point::new(3.0, 4.0),
        ])
        .unwrap();
        assert!((line.length() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_polyline_centroid_weighted() {
        // Horizontal segment: centroid sits at the midpoint.
        let line = Polyline::new(vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)]).unwrap();
        let c = line.centroid();
        assert!((c.x - 5.0).abs() < 1e-12);
        assert!((c.y - 0.0).abs() < 1e-12);

        // Uneven segments pull the centroid toward the longer one.
        let bent = Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(8.0, 0.0),
            Point::new(8.0, 2.0),
        ])
        .unwrap();
        let c = bent.centroid();
        assert!(c.x > 4.0);
    }

    #[test]
    fn test_polyline_coincident_vertices() {
        let line = Polyline::new(vec![
            Point::new(2.0, 3.0),
            Point::new(2.0, 3.0),
            Point::new(2.0, 3.0),
        ])
        .unwrap();
        assert_eq!(line.length(), 0.0);
        assert_eq!(line.centroid(), Point::new(2.0, 3.0));
    }

    #[test]
    fn test_polyline_single_vertex() {
        let line = Polyline::new(vec![Point::new(7.0, 8.0)]).unwrap();
        assert_eq!(line.centroid(), Point::new(7.0, 8.0));
        assert_eq!(line.mbr(), BoundingBox::new(7.0, 8.0, 7.0, 8.0));
    }

    #[test]
    fn test_polygon_vertex_minimum() {
        assert!(Polygon::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]).is_err());
        assert!(Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
        ])
        .is_ok());
    }

    #[test]
    fn test_polygon_centroid_and_area() {
        // Closed unit-scaled square, counter-clockwise.
        let square = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(0.0, 0.0),
        ])
        .unwrap();
        let c = square.centroid();
        assert!((c.x - 5.0).abs() < 1e-12);
        assert!((c.y - 5.0).abs() < 1e-12);
        assert!((square.area() - 100.0).abs() < 1e-12);
        assert!(!square.is_clockwise());
    }

    #[test]
    fn test_polygon_unclosed_ring() {
        // The shoelace loop closes the ring implicitly.
        let open = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])
        .unwrap();
        assert!((open.area() - 100.0).abs() < 1e-12);
        let c = open.centroid();
        assert!((c.x - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_polygon_with_hole_area() {
        let mut poly = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])
        .unwrap();
        poly.add_hole(vec![
            Point::new(2.0, 2.0),
            Point::new(4.0, 2.0),
            Point::new(4.0, 4.0),
            Point::new(2.0, 4.0),
        ])
        .unwrap();
        assert!((poly.area() - 96.0).abs() < 1e-12);
    }

    #[test]
    fn test_polygon_degenerate_centroid_fallback() {
        // All vertices collinear: area is zero, fallback to vertex mean.
        let degenerate = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
        ])
        .unwrap();
        let c = degenerate.centroid();
        assert!((c.x - 1.0).abs() < 1e-12);
        assert!((c.y - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_polygon_clockwise_detection() {
        let cw = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 0.0),
        ])
        .unwrap();
        assert!(cw.is_clockwise());
    }

    #[test]
    fn test_spatial_object_point_derived() {
        let obj = SpatialObject::point(3.0, 4.0);
        assert_eq!(obj.id(), 0);
        assert_eq!(obj.centroid(), Point::new(3.0, 4.0));
        assert_eq!(obj.mbr(), BoundingBox::new(3.0, 4.0, 3.0, 4.0));
        assert_eq!(obj.kind(), GeometryKind::Point);
    }

    #[test]
    fn test_spatial_object_update_derived_after_mutation() {
        let mut obj =
            SpatialObject::polyline(vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)]).unwrap();
        assert_eq!(obj.centroid(), Point::new(5.0, 0.0));

        obj.push_vertex(Point::new(10.0, 10.0)).unwrap();
        // Derived values are stale until the explicit refresh.
        assert_eq!(obj.centroid(), Point::new(5.0, 0.0));

        obj.update_derived();
        assert_eq!(obj.mbr(), BoundingBox::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_spatial_object_equality_by_id() {
        let mut a = SpatialObject::point(0.0, 0.0);
        let mut b = SpatialObject::point(99.0, 99.0);
        a.set_id(7);
        b.set_id(7);
        assert_eq!(a, b);

        b.set_id(8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_spatial_object_deep_copy_includes_properties() {
        let mut obj = SpatialObject::point(1.0, 1.0);
        obj.set_properties(Bytes::from_static(b"{\"name\":\"pump house\"}"));

        let copy = obj.clone();
        assert_eq!(copy.properties(), obj.properties());
    }

    #[test]
    fn test_push_vertex_on_point_rejected() {
        let mut obj = SpatialObject::point(1.0, 1.0);
        assert!(obj.push_vertex(Point::new(2.0, 2.0)).is_err());
    }

    #[test]
    fn test_add_hole_on_non_polygon_rejected() {
        let mut obj =
            SpatialObject::polyline(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)]).unwrap();
        let err = obj.add_hole(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_from_record_preserves_derived_values() {
        let mbr = BoundingBox::new(0.0, 0.0, 4.0, 4.0);
        let centroid = Point::new(1.5, 2.5);
        let obj = SpatialObject::from_record(42, GeometryKind::Polygon, centroid, mbr);

        assert_eq!(obj.id(), 42);
        assert_eq!(obj.kind(), GeometryKind::Polygon);
        assert_eq!(obj.centroid(), centroid);
        assert_eq!(obj.mbr(), mbr);
    }

    #[test]
    fn test_geometry_kind_round_trip() {
        for kind in [
            GeometryKind::Point,
            GeometryKind::Polyline,
            GeometryKind::Polygon,
        ] {
            assert_eq!(GeometryKind::from_u8(kind as u8), Some(kind));
        }
        assert_eq!(GeometryKind::from_u8(9), None);
    }
}
