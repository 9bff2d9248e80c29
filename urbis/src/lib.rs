//! # Urbis: disk-aware 2-D spatial indexing for city-scale GIS data
//!
//! Urbis clusters spatially co-located features (points, polylines,
//! polygons) into contiguous physical pages and tracks, cutting seek cost
//! for bounding-box and k-nearest-neighbor queries over millions of
//! objects.
//!
//! ## Features
//!
//! - **Bulk-loaded KD-tree**: median-split partitioning of objects by
//!   centroid into block MBRs
//! - **Page/track model**: fixed-capacity pages grouped into bounded
//!   tracks, the unit of seek accounting
//! - **Page quadtree**: adjacency queries grouped by track for seek
//!   estimation
//! - **Spatial allocation**: nearest-track, best-fit, sequential and
//!   new-track page placement strategies, served through an LRU page cache
//! - **Persistence**: a versioned, checksummed single-file format
//! - **WKT / GeoJSON**: parsing and export of the stored geometry subset
//!
//! ## Quick start
//!
//! ```rust
//! use urbis::{BoundingBox, SpatialIndex};
//!
//! let mut index = SpatialIndex::new();
//! index.insert_point(5.0, 5.0)?;
//! index.insert_point(15.0, 15.0)?;
//! index.insert_point(25.0, 25.0)?;
//! index.build()?;
//!
//! let hits = index.query_range(&BoundingBox::new(0.0, 0.0, 20.0, 20.0));
//! assert_eq!(hits.len(), 2);
//!
//! let nearest = index.query_knn(4.0, 4.0, 1)?;
//! assert_eq!(nearest[0].centroid(), urbis::Point::new(5.0, 5.0));
//! # Ok::<(), urbis::UrbisError>(())
//! ```

pub mod bounding_box;
pub mod config;
pub mod disk;
pub mod error;
pub mod geometry;
pub mod index;
pub mod kdtree;
pub mod parser;
pub mod quadtree;

// Core types
pub use bounding_box::BoundingBox;
pub use error::{UrbisError, UrbisResult};
pub use geometry::{Geometry, GeometryKind, Point, Polygon, Polyline, SpatialObject};

// Index surface
pub use config::{AllocationStrategy, IndexConfig};
pub use index::{AdjacentPages, IndexStats, SpatialBlock, SpatialIndex};

// Trees
pub use kdtree::{ItemRef, KdEntry, KdTree};
pub use quadtree::{QuadItem, QuadTree, QuadTreeStats};

// Disk layer
pub use disk::cache::{PageCache, PageRef};
pub use disk::manager::{DiskManager, DiskManagerConfig, IoStats};
pub use disk::page::{Page, Track};
pub use disk::pool::{PagePool, PoolStats};
pub use disk::storage::FileHeader;

// Text formats
pub use parser::{export_geojson, export_geojson_geometry, export_wkt, parse_geojson, parse_wkt};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
