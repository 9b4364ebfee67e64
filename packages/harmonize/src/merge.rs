//! Joins the normalised mapping layer onto the attribute table.
//!
//! The join is attribute-preserving: every attribute row survives unless it
//! cannot be given a geometry, and geometries nobody refers to are dropped.
//! Register-only rows get a point synthesised from their coordinates.

use std::collections::{BTreeMap, BTreeSet};

use geo::Geometry;
use pvgeo_geometry::projection::{area_sqm, project_point};
use pvgeo_installation_models::{AttributeRecord, InstallationRecord, NormalizedFeature, Tags};

use crate::HarmonizeError;

/// Counters describing what the merge kept and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeDiagnostics {
    /// Attribute rows that found their mapping geometry.
    pub matched: usize,
    /// Mapping geometries no attribute row referred to.
    pub unmatched_geometries: usize,
    /// Rows with a mapping id but no geometry, assumed to be part of a
    /// relation's multipolygon that the extract did not resolve.
    pub dropped_relation_members: usize,
    /// Rows with neither a geometry nor coordinates.
    pub dropped_ungeolocatable: usize,
    /// Register-only rows given a point from their coordinates.
    pub synthesized_points: usize,
}

/// Merged records plus diagnostics.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub records: Vec<InstallationRecord>,
    pub diagnostics: MergeDiagnostics,
}

/// An attribute row after the join, before geometry resolution.
struct JoinedRow {
    attributes: AttributeRecord,
    geometry: Option<Geometry<f64>>,
    name: Option<String>,
    tags: Tags,
}

/// Right-joins the mapping layer onto the attribute rows by mapping id.
///
/// # Errors
///
/// Returns [`HarmonizeError::DataIntegrity`] if any surviving row still has
/// no geometry once points have been synthesised (for example a register
/// row with a latitude but no longitude).
pub fn merge_records(
    features: Vec<NormalizedFeature>,
    attributes: Vec<AttributeRecord>,
) -> Result<MergeOutcome, HarmonizeError> {
    let mut diagnostics = MergeDiagnostics::default();

    let mut layer = BTreeMap::new();
    for feature in features {
        layer.entry(feature.mapping_id).or_insert(feature);
    }

    let mut referenced = BTreeSet::new();
    let mut rows: Vec<JoinedRow> = attributes
        .into_iter()
        .map(|attributes| {
            let feature = attributes.mapping_id.and_then(|id| layer.get(&id));
            if let Some(feature) = feature {
                referenced.insert(feature.mapping_id);
            }
            JoinedRow {
                geometry: feature.map(|f| f.geometry.clone()),
                name: feature.and_then(|f| f.name.clone()),
                tags: feature.map(|f| f.tags.clone()).unwrap_or_default(),
                attributes,
            }
        })
        .collect();

    diagnostics.matched = rows.iter().filter(|r| r.geometry.is_some()).count();
    diagnostics.unmatched_geometries = layer.len() - referenced.len();

    rows.retain(|row| {
        let drop = row.geometry.is_none() && row.attributes.mapping_id.is_some();
        if drop {
            diagnostics.dropped_relation_members += 1;
        }
        !drop
    });
    log::info!(
        "Dropped {} items with a mapping id but no geometry (assumed merged into a relation's multipolygon)",
        diagnostics.dropped_relation_members
    );

    rows.retain(|row| {
        let drop = row.geometry.is_none() && row.attributes.latitude.is_none();
        if drop {
            diagnostics.dropped_ungeolocatable += 1;
        }
        !drop
    });
    log::info!(
        "Dropped {} items with no geometry and no coordinates (cannot geolocate)",
        diagnostics.dropped_ungeolocatable
    );

    for row in rows.iter_mut().filter(|r| r.geometry.is_none()) {
        if let (Some(latitude), Some(longitude)) = (row.attributes.latitude, row.attributes.longitude)
        {
            row.geometry = Some(Geometry::Point(project_point(longitude, latitude)));
            diagnostics.synthesized_points += 1;
        }
    }
    log::info!(
        "Created point geometries for {} register-only items",
        diagnostics.synthesized_points
    );

    let unresolved = rows.iter().filter(|r| r.geometry.is_none()).count();
    if unresolved > 0 {
        return Err(HarmonizeError::DataIntegrity {
            message: format!(
                "{unresolved} rows still have no geometry after creating points from coordinates"
            ),
        });
    }

    let records: Vec<InstallationRecord> = rows
        .into_iter()
        .filter_map(|row| {
            let geometry = row.geometry?;
            let mut record =
                InstallationRecord::from_attributes(row.attributes, geometry, row.name, row.tags);
            record.area_sqm = area_sqm(&record.geometry);
            Some(record)
        })
        .collect();

    log::info!(
        "Merged {} records ({} matched to mapping geometry, {} mapping geometries unreferenced)",
        records.len(),
        diagnostics.matched,
        diagnostics.unmatched_geometries
    );

    Ok(MergeOutcome {
        records,
        diagnostics,
    })
}

/// Marks records whose mapping geometry lies inside another mapped
/// polygon. Register-only records are never marked. Returns how many
/// records were marked.
pub fn flag_contained(records: &mut [InstallationRecord], contained: &BTreeSet<i64>) -> usize {
    let mut flagged = 0;
    for record in records {
        record.is_contained = record.mapping_id.is_some_and(|id| contained.contains(&id));
        flagged += usize::from(record.is_contained);
    }
    flagged
}

#[cfg(test)]
mod tests {
    use geo::Rect;
    use pvgeo_geometry::projection::web_mercator_latitude;

    use super::*;

    fn square(mapping_id: i64) -> NormalizedFeature {
        NormalizedFeature {
            mapping_id,
            name: Some(format!("array {mapping_id}")),
            tags: Tags::new(),
            geometry: Rect::new((0.0, 0.0), (10.0, 20.0)).to_polygon().into(),
        }
    }

    fn mapped(mapping_id: i64) -> AttributeRecord {
        AttributeRecord {
            mapping_id: Some(mapping_id),
            latitude: Some(0.0),
            longitude: Some(0.0),
            ..AttributeRecord::default()
        }
    }

    #[test]
    fn keeps_attribute_rows_and_drops_unreferenced_geometry() {
        let outcome = merge_records(vec![square(1), square(2)], vec![mapped(1)]).unwrap();

        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.mapping_id, Some(1));
        assert_eq!(record.mapping_name.as_deref(), Some("array 1"));
        assert!((record.area_sqm - 200.0).abs() < 1e-6);
        assert_eq!(outcome.diagnostics.matched, 1);
        assert_eq!(outcome.diagnostics.unmatched_geometries, 1);
    }

    #[test]
    fn drops_mapping_rows_without_geometry() {
        let outcome = merge_records(vec![square(1)], vec![mapped(1), mapped(99)]).unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.diagnostics.dropped_relation_members, 1);
    }

    #[test]
    fn synthesizes_points_for_register_only_rows() {
        let register_only = AttributeRecord {
            registry_id: Some(5),
            latitude: Some(51.5),
            longitude: Some(-0.1),
            capacity_source_b_mwp: Some(2.0),
            ..AttributeRecord::default()
        };

        let outcome = merge_records(vec![], vec![register_only]).unwrap();
        let record = &outcome.records[0];

        let Geometry::Point(point) = record.geometry else {
            panic!("expected a synthesized point");
        };
        let expected = project_point(-0.1, 51.5);
        assert!((point.x() - expected.x()).abs() < 1e-9);
        assert!((web_mercator_latitude(point.y()) - 51.5).abs() < 1e-9);
        assert!(record.area_sqm.abs() < f64::EPSILON);
        assert_eq!(outcome.diagnostics.synthesized_points, 1);
    }

    #[test]
    fn drops_rows_that_cannot_be_geolocated() {
        let nowhere = AttributeRecord {
            registry_id: Some(6),
            ..AttributeRecord::default()
        };

        let outcome = merge_records(vec![], vec![nowhere]).unwrap();

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.diagnostics.dropped_ungeolocatable, 1);
    }

    #[test]
    fn half_a_coordinate_breaks_the_postcondition() {
        let half = AttributeRecord {
            registry_id: Some(7),
            latitude: Some(51.5),
            ..AttributeRecord::default()
        };

        let err = merge_records(vec![], vec![half]).unwrap_err();
        assert!(matches!(err, HarmonizeError::DataIntegrity { .. }));
    }

    #[test]
    fn containment_flags_follow_the_mapping_id() {
        let register_only = AttributeRecord {
            registry_id: Some(1),
            latitude: Some(51.0),
            longitude: Some(0.0),
            ..AttributeRecord::default()
        };
        let mut records = merge_records(
            vec![square(1), square(2)],
            vec![mapped(1), mapped(2), register_only],
        )
        .unwrap()
        .records;

        let flagged = flag_contained(&mut records, &BTreeSet::from([1]));

        assert_eq!(flagged, 1);
        let flags: Vec<bool> = records.iter().map(|r| r.is_contained).collect();
        assert_eq!(flags, vec![true, false, false]);
    }

    #[test]
    fn repeated_mapping_ids_share_one_geometry() {
        let first = AttributeRecord {
            registry_id: Some(1),
            ..mapped(3)
        };
        let second = AttributeRecord {
            registry_id: Some(2),
            ..mapped(3)
        };

        let outcome = merge_records(vec![square(3)], vec![first, second]).unwrap();

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.records[0].geometry, outcome.records[1].geometry);
        assert_eq!(outcome.diagnostics.unmatched_geometries, 0);
    }
}
