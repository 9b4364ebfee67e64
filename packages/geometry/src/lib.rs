#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry handling for the mapping-source PV layer.
//!
//! Loads the mapping layer from `GeoJSON`, normalises it (identity
//! coalescing, tag dropping, closed-way repair, reprojection into the
//! working CRS) and detects polygons nested inside other polygons so that
//! area-based capacity inference never counts the same panels twice.

pub mod containment;
pub mod export;
pub mod layer;
pub mod normalize;
pub mod projection;

use geo::{BoundingRect, Geometry};
use rstar::AABB;
use thiserror::Error;

/// Errors that can occur while loading or normalising geometry layers.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// File could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `GeoJSON` parsing or conversion failed.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    /// JSON serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The layer does not have the shape the pipeline depends on.
    #[error("Schema violation: {message}")]
    SchemaViolation {
        /// Description of what went wrong.
        message: String,
    },
}

/// Compute the bounding box envelope for a geometry.
///
/// Empty geometries collapse to a point envelope at the origin.
#[must_use]
pub fn envelope_of(geometry: &Geometry<f64>) -> AABB<[f64; 2]> {
    geometry.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
mod tests {
    use geo::{Point, Rect};
    use rstar::Envelope as _;

    use super::*;

    #[test]
    fn envelope_covers_rect() {
        let rect: Geometry<f64> = Rect::new((1.0, 2.0), (5.0, 7.0)).to_polygon().into();
        let envelope = envelope_of(&rect);
        assert_eq!(envelope.lower(), [1.0, 2.0]);
        assert_eq!(envelope.upper(), [5.0, 7.0]);
    }

    #[test]
    fn point_envelope_is_degenerate() {
        let envelope = envelope_of(&Geometry::Point(Point::new(3.0, 4.0)));
        assert!(envelope.contains_point(&[3.0, 4.0]));
        assert!((envelope.area()).abs() < f64::EPSILON);
    }
}
