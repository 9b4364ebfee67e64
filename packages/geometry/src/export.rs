//! Conversion of harmonised installations back into a `GeoJSON` layer.

use std::path::Path;

use geojson::{Feature, FeatureCollection, JsonObject};
use pvgeo_installation_models::{CapacityColumn, InstallationRecord};
use serde_json::{Value, json};

use crate::GeometryError;
use crate::layer::write_feature_collection;
use crate::projection::Crs;

/// Builds a feature carrying every record field as a property.
///
/// Properties are named after the record fields; capacity columns use the
/// same names as the region and category reports. Pass-through tags are
/// written first so the record's own fields win on a name clash.
#[must_use]
pub fn installation_feature(record: &InstallationRecord) -> Feature {
    let mut properties: JsonObject = record.tags.clone();
    let fields = json!({
        "mapping_id": record.mapping_id,
        "mapping_objtype": record.mapping_objtype,
        "registry_id": record.registry_id,
        "mapping_cluster_id": record.mapping_cluster_id,
        "registry_cluster_id": record.registry_cluster_id,
        "mapping_name": record.mapping_name,
        "area_sqm": record.area_sqm,
        "is_contained": record.is_contained,
        "capacity_provenance": record.capacity_provenance.as_ref(),
        "category": record.category.as_ref(),
        "num_modules": record.num_modules,
        "orientation": record.orientation,
        "located": record.located,
        "region_a_id": record.region_a_id,
        "region_b_id": record.region_b_id,
    });
    if let Value::Object(fields) = fields {
        properties.extend(fields);
    }
    for column in CapacityColumn::ALL {
        properties.insert(column.to_string(), json!(column.value(record)));
    }

    Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(&record.geometry))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Writes the harmonised inventory in the working CRS.
///
/// # Errors
///
/// Returns [`GeometryError`] if serialization or the write fails.
pub fn write_installations(
    path: &Path,
    records: &[InstallationRecord],
) -> Result<(), GeometryError> {
    let collection = FeatureCollection {
        bbox: None,
        features: records.iter().map(installation_feature).collect(),
        foreign_members: None,
    };
    write_feature_collection(path, collection, Crs::WORKING)
}
