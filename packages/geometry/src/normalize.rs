//! Normalises the raw mapping-source layer into [`NormalizedFeature`]s.
//!
//! The layer is an ogr2ogr export of several OSM layers merged together, so
//! each feature carries either a node/relation id or a way id, a pile of
//! tags irrelevant to PV capacity, and ways that were exported as
//! `LineString`s even when they outline an area. This module coalesces the
//! identities, drops the tags, closes the ways and reprojects everything
//! into the working CRS.

use std::collections::BTreeSet;

use geo::{Geometry, GeometryCollection, LineString, Polygon};
use geojson::Feature;
use pvgeo_installation_models::{NormalizedFeature, Tags};
use serde::{Deserialize, Serialize};

use crate::GeometryError;
use crate::layer::{GeometryHistogram, geometry_kind, histogram, property_i64, property_string};
use crate::projection::Crs;

/// Tags exported by ogr2ogr that say nothing about PV capacity.
pub const DEFAULT_DROPPED_TAGS: &[&str] = &[
    "other_tags",
    "barrier",
    "man_made",
    "highway",
    "landuse",
    "building",
    "tourism",
    "amenity",
    "shop",
    "natural",
    "leisure",
    "sport",
    "z_order",
    "type",
];

/// Property names and CRS of the mapping layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeOptions {
    /// Property holding node/relation ids.
    pub id_property: String,
    /// Property holding way ids. Mutually exclusive with `id_property`.
    pub way_id_property: String,
    /// Property holding the feature name.
    pub name_property: String,
    /// Properties removed from every feature.
    pub dropped_tags: Vec<String>,
    /// CRS the layer is stored in.
    pub input_crs: Crs,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            id_property: "osm_id".to_string(),
            way_id_property: "osm_way_id".to_string(),
            name_property: "name".to_string(),
            dropped_tags: DEFAULT_DROPPED_TAGS
                .iter()
                .map(ToString::to_string)
                .collect(),
            input_crs: Crs::Wgs84,
        }
    }
}

/// Counters describing what normalisation did to the layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizeDiagnostics {
    /// Geometry types as loaded.
    pub raw_types: GeometryHistogram,
    /// Geometry types after repair.
    pub normalized_types: GeometryHistogram,
    /// Closed `LineString`s turned into polygons.
    pub lines_converted: usize,
    /// Closed `LineString` members of collections turned into polygons.
    pub collection_lines_converted: usize,
    /// Identities of `LineString`s that could not be closed.
    pub unclosed_lines: Vec<i64>,
    /// Features skipped because they could not be read.
    pub malformed_features: usize,
    /// Features skipped because their identity was already seen.
    pub duplicate_ids: usize,
}

/// Normalised layer plus diagnostics.
#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    pub features: Vec<NormalizedFeature>,
    pub diagnostics: NormalizeDiagnostics,
}

/// Normalises every feature of the mapping layer.
///
/// Unreadable features are skipped and counted. One geometry is kept per
/// identity; later duplicates are dropped.
///
/// # Errors
///
/// Returns [`GeometryError::SchemaViolation`] if a feature carries both
/// identity properties or neither of them.
pub fn normalize_features(
    features: Vec<Feature>,
    options: &NormalizeOptions,
) -> Result<NormalizeOutcome, GeometryError> {
    let mut diagnostics = NormalizeDiagnostics::default();
    let mut seen = BTreeSet::new();
    let mut normalized = Vec::with_capacity(features.len());

    for (index, feature) in features.into_iter().enumerate() {
        let Some((mapping_id, geometry, mut tags)) =
            read_feature(index, feature, options, &mut diagnostics)?
        else {
            continue;
        };

        if !seen.insert(mapping_id) {
            log::warn!("Duplicate geometry for mapping id {mapping_id}, keeping the first");
            diagnostics.duplicate_ids += 1;
            continue;
        }

        *diagnostics
            .raw_types
            .entry(geometry_kind(&geometry))
            .or_default() += 1;
        let repaired = repair_geometry(geometry, mapping_id, &mut diagnostics);

        let name = property_string(&tags, &options.name_property);
        strip_tags(&mut tags, options);

        normalized.push(NormalizedFeature {
            mapping_id,
            name,
            tags,
            geometry: options.input_crs.to_working(&repaired),
        });
    }

    diagnostics.normalized_types = histogram(normalized.iter().map(|f| &f.geometry));

    log::info!(
        "Normalized {} features: {} lines and {} collection members closed into polygons, \
         {} unclosed ways, {} malformed, {} duplicates",
        normalized.len(),
        diagnostics.lines_converted,
        diagnostics.collection_lines_converted,
        diagnostics.unclosed_lines.len(),
        diagnostics.malformed_features,
        diagnostics.duplicate_ids,
    );

    Ok(NormalizeOutcome {
        features: normalized,
        diagnostics,
    })
}

/// Extracts the coalesced identity, geometry and properties of a feature.
///
/// Returns `Ok(None)` for features that are malformed but not a schema
/// violation.
fn read_feature(
    index: usize,
    feature: Feature,
    options: &NormalizeOptions,
    diagnostics: &mut NormalizeDiagnostics,
) -> Result<Option<(i64, Geometry<f64>, Tags)>, GeometryError> {
    let properties = feature.properties.unwrap_or_default();

    let ids = property_i64(&properties, &options.id_property).and_then(|id| {
        property_i64(&properties, &options.way_id_property).map(|way_id| (id, way_id))
    });

    let mapping_id = match ids {
        Err(message) => {
            log::warn!("Skipping feature #{index}: unreadable identity ({message})");
            diagnostics.malformed_features += 1;
            return Ok(None);
        }
        Ok((Some(id), None) | (None, Some(id))) => id,
        Ok((Some(id), Some(way_id))) => {
            return Err(GeometryError::SchemaViolation {
                message: format!(
                    "feature #{index} has both {}={id} and {}={way_id}",
                    options.id_property, options.way_id_property
                ),
            });
        }
        Ok((None, None)) => {
            return Err(GeometryError::SchemaViolation {
                message: format!(
                    "feature #{index} has neither {} nor {}",
                    options.id_property, options.way_id_property
                ),
            });
        }
    };

    let Some(geometry) = feature.geometry else {
        log::warn!("Skipping mapping id {mapping_id}: feature has no geometry");
        diagnostics.malformed_features += 1;
        return Ok(None);
    };

    match Geometry::<f64>::try_from(geometry) {
        Ok(geometry) => Ok(Some((mapping_id, geometry, properties))),
        Err(e) => {
            log::warn!("Skipping mapping id {mapping_id}: unsupported geometry ({e})");
            diagnostics.malformed_features += 1;
            Ok(None)
        }
    }
}

/// Removes identity, name and irrelevant tags.
fn strip_tags(tags: &mut Tags, options: &NormalizeOptions) {
    tags.remove(&options.id_property);
    tags.remove(&options.way_id_property);
    tags.remove(&options.name_property);
    for tag in &options.dropped_tags {
        tags.remove(tag);
    }
}

/// Turns a closed ring into a polygon; hands the line back otherwise.
fn close_ring(line: LineString<f64>) -> Result<Polygon<f64>, LineString<f64>> {
    // A ring needs at least three distinct points plus the closing one.
    if line.0.len() >= 4 && line.is_closed() {
        Ok(Polygon::new(line, vec![]))
    } else {
        Err(line)
    }
}

fn repair_geometry(
    geometry: Geometry<f64>,
    mapping_id: i64,
    diagnostics: &mut NormalizeDiagnostics,
) -> Geometry<f64> {
    match geometry {
        Geometry::LineString(line) => match close_ring(line) {
            Ok(polygon) => {
                diagnostics.lines_converted += 1;
                Geometry::Polygon(polygon)
            }
            Err(line) => {
                log::warn!(
                    "Unclosed way {mapping_id} (has {} points), consider inspecting it",
                    line.0.len()
                );
                diagnostics.unclosed_lines.push(mapping_id);
                Geometry::LineString(line)
            }
        },
        Geometry::GeometryCollection(collection) => {
            Geometry::GeometryCollection(repair_collection(collection, diagnostics))
        }
        other => other,
    }
}

/// Closes line-ring members of a collection, recursing into nested
/// collections. Every other member passes through unchanged.
fn repair_collection(
    collection: GeometryCollection<f64>,
    diagnostics: &mut NormalizeDiagnostics,
) -> GeometryCollection<f64> {
    let mut members = Vec::with_capacity(collection.0.len());

    for member in collection.0 {
        let repaired = match member {
            Geometry::LineString(line) => match close_ring(line) {
                Ok(polygon) => {
                    diagnostics.collection_lines_converted += 1;
                    Geometry::Polygon(polygon)
                }
                Err(line) => Geometry::LineString(line),
            },
            Geometry::GeometryCollection(inner) => {
                Geometry::GeometryCollection(repair_collection(inner, diagnostics))
            }
            other => other,
        };
        members.push(repaired);
    }

    GeometryCollection(members)
}
