//! `GeoJSON` layer reading/writing and property helpers.

use std::collections::BTreeMap;
use std::path::Path;

use geo::Geometry;
use geojson::{FeatureCollection, GeoJson, JsonObject};

use crate::GeometryError;
use crate::projection::Crs;

/// Count of geometries per `GeoJSON` type name.
pub type GeometryHistogram = BTreeMap<&'static str, usize>;

/// Reads a `GeoJSON` file that must contain a `FeatureCollection`.
///
/// # Errors
///
/// Returns [`GeometryError`] if the file cannot be read or parsed, or
/// [`GeometryError::SchemaViolation`] if it is not a feature collection.
pub fn read_feature_collection(path: &Path) -> Result<FeatureCollection, GeometryError> {
    let text = std::fs::read_to_string(path)?;
    let geojson: GeoJson = text.parse()?;

    match geojson {
        GeoJson::FeatureCollection(collection) => {
            log::info!(
                "Loaded {} features from {}",
                collection.features.len(),
                path.display()
            );
            Ok(collection)
        }
        GeoJson::Feature(_) | GeoJson::Geometry(_) => Err(GeometryError::SchemaViolation {
            message: format!("{} is not a GeoJSON FeatureCollection", path.display()),
        }),
    }
}

/// Writes a feature collection, tagging it with the legacy `crs` member so
/// GIS tools do not assume WGS84 for working-CRS coordinates.
///
/// # Errors
///
/// Returns [`GeometryError`] if serialization or the write fails.
pub fn write_feature_collection(
    path: &Path,
    mut collection: FeatureCollection,
    crs: Crs,
) -> Result<(), GeometryError> {
    let mut members = collection.foreign_members.take().unwrap_or_default();
    members.insert(
        "crs".to_string(),
        serde_json::json!({
            "type": "name",
            "properties": { "name": crs.urn() },
        }),
    );
    collection.foreign_members = Some(members);

    let count = collection.features.len();
    std::fs::write(path, serde_json::to_string(&GeoJson::FeatureCollection(collection))?)?;
    log::info!("Wrote {count} features to {}", path.display());
    Ok(())
}

/// `GeoJSON` type name of a geometry.
#[must_use]
pub const fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) | Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Tallies geometries by type.
pub fn histogram<'a>(geometries: impl IntoIterator<Item = &'a Geometry<f64>>) -> GeometryHistogram {
    let mut counts = GeometryHistogram::new();
    for geometry in geometries {
        *counts.entry(geometry_kind(geometry)).or_default() += 1;
    }
    counts
}

/// Reads an integer property that may be encoded as a JSON number or as a
/// numeric string (ogr2ogr exports OSM ids as strings). Whole-valued floats
/// such as `5.0` are accepted.
///
/// Returns `Ok(None)` for absent, null or blank values.
///
/// # Errors
///
/// Returns a description of the offending value if it is not an integer.
pub fn property_i64(properties: &JsonObject, key: &str) -> Result<Option<i64>, String> {
    match properties.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(whole_number))
            .map(Some)
            .ok_or_else(|| format!("{key}={n} is not an integer")),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(whole_number))
                .map(Some)
                .ok_or_else(|| format!("{key}={s:?} is not an integer"))
        }
        Some(other) => Err(format!("{key}={other} is not an integer")),
    }
}

/// `Some` for finite whole floats within the exactly representable range.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn whole_number(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value.abs() < 9.0e15).then_some(value as i64)
}

/// Reads a property as a string, stringifying numbers.
///
/// Returns `None` for absent, null, blank or non-scalar values.
#[must_use]
pub fn property_string(properties: &JsonObject, key: &str) -> Option<String> {
    match properties.get(key)? {
        serde_json::Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        serde_json::Value::Number(n) => Some(
            n.as_f64()
                .filter(|_| !n.is_i64() && !n.is_u64())
                .and_then(whole_number)
                .map_or_else(|| n.to_string(), |whole| whole.to_string()),
        ),
        _ => None,
    }
}
