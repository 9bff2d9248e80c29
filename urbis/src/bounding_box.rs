use serde::{Deserialize, Serialize};

use crate::geometry::Point;

/// A 2-D minimum bounding rectangle (MBR) in plane coordinates.
///
/// `BoundingBox` defines a rectangular area using the minimum
/// (min_x, min_y) and maximum (max_x, max_y) corners. All boundary
/// comparisons are closed: a point on an edge is contained, and two
/// boxes sharing only an edge intersect.
///
/// An *empty* box is encoded as `min > max` on either axis; the canonical
/// empty value spans `+∞ .. −∞` so that expanding it by any point yields
/// that point's degenerate box.
///
/// # Examples
///
/// ```rust
/// use urbis::BoundingBox;
///
/// let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
/// assert!(bbox.contains_point(50.0, 50.0));
/// assert!(bbox.contains_point(100.0, 0.0));
/// ```
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Minimum X coordinate
    pub min_x: f64,
    /// Minimum Y coordinate
    pub min_y: f64,
    /// Maximum X coordinate
    pub max_x: f64,
    /// Maximum Y coordinate
    pub max_y: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BoundingBox({}, {}, {}, {})",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

impl BoundingBox {
    /// Creates a new bounding box with the specified corners.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> BoundingBox {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// The canonical empty box: any expansion replaces both corners.
    pub fn empty() -> BoundingBox {
        BoundingBox {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }

    /// Degenerate box covering exactly one point.
    pub fn from_point(p: &Point) -> BoundingBox {
        BoundingBox::new(p.x, p.y, p.x, p.y)
    }

    /// True when `min > max` on either axis.
    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Returns the width of the bounding box.
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    /// Returns the height of the bounding box.
    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Returns the area, zero for an empty box.
    pub fn area(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.width() * self.height()
    }

    /// Returns the center point, `(0, 0)` for an empty box.
    pub fn centroid(&self) -> Point {
        if self.is_empty() {
            return Point::new(0.0, 0.0);
        }
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Checks whether the point lies within the box, inclusive on all sides.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        if self.is_empty() {
            return false;
        }
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Checks whether `other` fits entirely within this box, boundaries inclusive.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        other.min_x >= self.min_x
            && other.max_x <= self.max_x
            && other.min_y >= self.min_y
            && other.max_y <= self.max_y
    }

    /// Checks intersection with closed boundaries; empty boxes never intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.min_x <= other.max_x
            && self.max_x >= other.min_x
            && self.min_y <= other.max_y
            && self.max_y >= other.min_y
    }

    /// Grows the box in place to cover the point.
    pub fn expand_point(&mut self, p: &Point) {
        if p.x < self.min_x {
            self.min_x = p.x;
        }
        if p.y < self.min_y {
            self.min_y = p.y;
        }
        if p.x > self.max_x {
            self.max_x = p.x;
        }
        if p.y > self.max_y {
            self.max_y = p.y;
        }
    }

    /// Grows the box in place to cover `other`; an empty argument is a no-op.
    pub fn expand(&mut self, other: &BoundingBox) {
        if other.is_empty() {
            return;
        }
        if other.min_x < self.min_x {
            self.min_x = other.min_x;
        }
        if other.min_y < self.min_y {
            self.min_y = other.min_y;
        }
        if other.max_x > self.max_x {
            self.max_x = other.max_x;
        }
        if other.max_y > self.max_y {
            self.max_y = other.max_y;
        }
    }

    /// Returns the union of this box with another.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        BoundingBox::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Returns the overlapping region, or `None` when the boxes are disjoint.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        ))
    }

    /// Area growth if the box were expanded to cover `p`.
    pub fn enlargement(&self, p: &Point) -> f64 {
        let mut grown = *self;
        grown.expand_point(p);
        grown.area() - self.area()
    }
}
