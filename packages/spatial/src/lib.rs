#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! In-memory region index for attributing installations to regions.
//!
//! Loads a region partition from a `GeoJSON` layer, builds an R-tree over
//! the region polygons and answers point-in-polygon lookups. The
//! [`aggregate`] module then sums installation capacity per region.

pub mod aggregate;
pub mod report;
pub mod validate;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use geo::{Geometry, Intersects, MultiPolygon, Point};
use geojson::FeatureCollection;
use pvgeo_geometry::layer::{property_string, read_feature_collection};
use pvgeo_geometry::projection::Crs;
use pvgeo_geometry::{GeometryError, envelope_of};
use rstar::{AABB, RTree, RTreeObject};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading regions or writing reports.
#[derive(Debug, Error)]
pub enum SpatialError {
    /// File could not be read or written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reading or writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Region layer could not be loaded.
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// A region layer or reference file lacks a field the pipeline needs.
    #[error("Schema violation: {message}")]
    SchemaViolation {
        /// Description of what went wrong.
        message: String,
    },
}

/// How to read one region partition layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionLayerOptions {
    /// Property holding the region key; numbers are stringified.
    pub id_property: String,
    pub name_property: String,
    /// CRS of the layer's coordinates.
    pub crs: Crs,
}

impl Default for RegionLayerOptions {
    fn default() -> Self {
        Self {
            id_property: "RegionID".to_string(),
            name_property: "RegionName".to_string(),
            crs: Crs::Wgs84,
        }
    }
}

/// A region polygon stored in the R-tree.
struct RegionEntry {
    /// Position in the source layer; lower wins when regions overlap.
    order: usize,
    id: String,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl RTreeObject for RegionEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Region key ordered numerically when both ids are integers (GSP ids),
/// otherwise as text. Integer ids sort before textual ones.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RegionKey(String);

impl Ord for RegionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<i64>(), other.0.parse::<i64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for RegionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One region partition, indexed for point lookups.
pub struct RegionIndex {
    tree: RTree<RegionEntry>,
    /// region id -> region name, in id order.
    regions: BTreeMap<RegionKey, Option<String>>,
}

impl RegionIndex {
    /// Loads a region layer from a `GeoJSON` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a feature
    /// collection.
    pub fn load(path: &Path, options: &RegionLayerOptions) -> Result<Self, SpatialError> {
        let collection = read_feature_collection(path)?;
        let index = Self::from_collection(collection, options)?;
        log::info!(
            "Loaded {} regions from {} into spatial index",
            index.len(),
            path.display()
        );
        Ok(index)
    }

    /// Builds an index from an already-parsed layer, reprojecting it into
    /// the working CRS.
    ///
    /// Features without an id are skipped with a warning. Features with an
    /// id but no polygonal geometry are listed as regions but never match a
    /// lookup.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::SchemaViolation`] if no feature of a
    /// non-empty layer carries the id property.
    pub fn from_collection(
        collection: FeatureCollection,
        options: &RegionLayerOptions,
    ) -> Result<Self, SpatialError> {
        let total = collection.features.len();
        let mut entries = Vec::new();
        let mut regions = BTreeMap::new();
        let mut missing_id = 0_usize;

        for (order, feature) in collection.features.into_iter().enumerate() {
            let properties = feature.properties.unwrap_or_default();
            let Some(id) = property_string(&properties, &options.id_property) else {
                missing_id += 1;
                continue;
            };
            let name = property_string(&properties, &options.name_property);

            let key = RegionKey(id.clone());
            if regions.contains_key(&key) {
                log::warn!("Region {id} appears more than once; its parts are indexed separately");
            }
            regions.entry(key).or_insert(name);

            let Some(polygon) = feature
                .geometry
                .and_then(|g| Geometry::<f64>::try_from(g).ok())
                .map(|g| options.crs.to_working(&g))
                .and_then(polygonal)
            else {
                log::warn!("Region {id} has no polygonal geometry; it will have no installations");
                continue;
            };

            let envelope = envelope_of(&Geometry::MultiPolygon(polygon.clone()));
            entries.push(RegionEntry {
                order,
                id,
                envelope,
                polygon,
            });
        }

        if total > 0 && missing_id == total {
            return Err(SpatialError::SchemaViolation {
                message: format!(
                    "no region feature has the id property {:?}",
                    options.id_property
                ),
            });
        }
        if missing_id > 0 {
            log::warn!(
                "{missing_id} region features have no {:?}; skipped",
                options.id_property
            );
        }

        Ok(Self {
            tree: RTree::bulk_load(entries),
            regions,
        })
    }

    /// Looks up the region containing a working-CRS point.
    ///
    /// Points on a shared boundary intersect both neighbours; the region
    /// that came first in the layer wins.
    #[must_use]
    pub fn lookup(&self, point: &Point<f64>) -> Option<&str> {
        let query_env = AABB::from_point([point.x(), point.y()]);

        self.tree
            .locate_in_envelope_intersecting(&query_env)
            .filter(|entry| entry.polygon.intersects(point))
            .min_by_key(|entry| entry.order)
            .map(|entry| entry.id.as_str())
    }

    /// Region ids and names in id order.
    pub fn regions(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.regions
            .iter()
            .map(|(id, name)| (id.0.as_str(), name.as_deref()))
    }

    /// Number of distinct regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

fn polygonal(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::MultiPolygon(mp) => Some(mp),
        Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        Geometry::Rect(r) => Some(MultiPolygon(vec![r.to_polygon()])),
        _ => None,
    }
}
