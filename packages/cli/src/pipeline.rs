//! Stage orchestration for the `run`, `regress` and `inspect` commands.
//!
//! Every stage takes the previous table by value and hands back a new one
//! with its diagnostics, which are logged here. A step bar tracks progress
//! across stages; region assignment gets its own per-record bar.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use pvgeo_cli_utils::{IndicatifProgress, MultiProgress};
use pvgeo_geometry::containment::find_contained;
use pvgeo_geometry::export::write_installations;
use pvgeo_geometry::layer::{GeometryHistogram, histogram, read_feature_collection};
use pvgeo_geometry::normalize::{NormalizeOutcome, normalize_features};
use pvgeo_harmonize::attributes::load_attributes;
use pvgeo_harmonize::capacity::{CapacityDiagnostics, RegressionFit, estimate_capacities};
use pvgeo_harmonize::category::classify;
use pvgeo_harmonize::merge::{flag_contained, merge_records};
use pvgeo_harmonize::progress::ProgressCallback;
use pvgeo_harmonize::summary::{
    MetadataStats, SourceSubtotals, category_pivot, metadata_stats, module_regression,
    source_subtotals,
};
use pvgeo_installation_models::{CapacityColumn, CapacityProvenance, InstallationRecord};
use pvgeo_spatial::{RegionIndex, SpatialError};
use pvgeo_spatial::aggregate::{Partition, aggregate, assign_regions};
use pvgeo_spatial::report::write_region_report_file;
use pvgeo_spatial::validate::{ValidationOutcome, compare_with_reference, load_reference};
use serde::Serialize;

use crate::config::{PartitionConfig, PipelineConfig};

/// Stages shared by `run` and `regress`.
const HARMONISE_STAGES: u64 = 6;
/// Region assignment, then reports.
const REPORT_STAGES: u64 = 2;

/// The harmonised inventory before region assignment.
struct Harmonised {
    records: Vec<InstallationRecord>,
    capacity: CapacityDiagnostics,
}

/// Machine-readable summary written next to the reports.
#[derive(Debug, Serialize)]
struct RunSummary {
    subtotals: SourceSubtotals,
    metadata: MetadataStats,
    area_fit: Option<RegressionFit>,
    module_fit: Option<RegressionFit>,
    provenance: BTreeMap<CapacityProvenance, usize>,
    validation: BTreeMap<String, ValidationOutcome>,
}

/// Runs every stage and writes all outputs.
///
/// Every input, reference tables included, is read and checked before the
/// first output is written, so a schema or integrity failure leaves the
/// output directory untouched.
///
/// # Errors
///
/// Returns an error if an input is unreadable, an invariant is violated,
/// or an output cannot be written.
pub fn run(config: &PipelineConfig, multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();

    let regions_a = RegionIndex::load(&config.region_a.path, &config.region_a.layer)?;
    let regions_b = RegionIndex::load(&config.region_b.path, &config.region_b.layer)?;
    let reference_a = load_partition_reference(&config.region_a)?;
    let reference_b = load_partition_reference(&config.region_b)?;

    let stages =
        IndicatifProgress::stages_bar(multi, "Harmonising", HARMONISE_STAGES + REPORT_STAGES);
    let harmonised = harmonise(config, &stages)?;

    stages.set_message("Assigning regions".to_string());
    let bar = IndicatifProgress::records_bar(multi, "Assigning regions");
    let assigned = assign_regions(harmonised.records, &regions_a, &regions_b, &bar);
    let records = assigned.records;
    stages.inc(1);

    stages.set_message("Writing outputs".to_string());
    std::fs::create_dir_all(&config.output_dir)?;
    write_installations(&config.output("installations.geojson"), &records)?;

    let subtotals = source_subtotals(&records);
    log_subtotals(&subtotals);
    let metadata = metadata_stats(&records);
    log_metadata(&metadata);

    let pivot = category_pivot(&records);
    pivot.log();
    pivot.write_csv(&config.output("category_pivot.csv"))?;

    let module_fit = module_regression(&records);
    log_fit("Capacity per module (small installations)", "W/module", module_fit.as_ref());

    let mut validation = BTreeMap::new();
    for (partition, settings, regions, reference) in [
        (Partition::A, &config.region_a, &regions_a, reference_a.as_ref()),
        (Partition::B, &config.region_b, &regions_b, reference_b.as_ref()),
    ] {
        let summaries = aggregate(&records, regions, partition);
        write_region_report_file(
            &config.output(&format!("{}_regions.csv", settings.label)),
            &summaries,
        )?;
        if let Some(reference) = reference {
            log::info!("Validating {} totals against reference", settings.label);
            let outcome =
                compare_with_reference(&summaries, reference, CapacityColumn::MergedFinal);
            validation.insert(settings.label.clone(), outcome);
        }
    }

    let summary = RunSummary {
        subtotals,
        metadata,
        area_fit: harmonised.capacity.area_fit,
        module_fit,
        provenance: harmonised.capacity.provenance_counts,
        validation,
    };
    std::fs::write(
        config.output("run_summary.json"),
        serde_json::to_string_pretty(&summary)?,
    )?;
    stages.inc(1);

    stages.finish(format!(
        "Harmonised {} installations in {:.1}s",
        records.len(),
        started.elapsed().as_secs_f64()
    ));
    Ok(())
}

/// Runs the stages up to classification and reports both regressions.
///
/// # Errors
///
/// Returns an error if an input is unreadable or an invariant is violated.
pub fn regress(
    config: &PipelineConfig,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let stages = IndicatifProgress::stages_bar(multi, "Harmonising", HARMONISE_STAGES);
    let harmonised = harmonise(config, &stages)?;
    stages.finish_and_clear();

    log_fit(
        "Capacity per area",
        "W/m²",
        harmonised.capacity.area_fit.as_ref(),
    );
    log_fit(
        "Capacity per module (small installations)",
        "W/module",
        module_regression(&harmonised.records).as_ref(),
    );
    Ok(())
}

/// Prints the geometry-type histogram before and after normalisation.
///
/// # Errors
///
/// Returns an error if the layer cannot be read or violates its schema.
pub fn inspect(config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let layer = load_mapping_layer(config)?;
    let normalized = histogram(layer.features.iter().map(|f| &f.geometry));

    println!("{:<20} {:>10} {:>12}", "geometry", "raw", "normalized");
    let kinds: std::collections::BTreeSet<&str> = layer
        .diagnostics
        .raw_types
        .keys()
        .chain(normalized.keys())
        .copied()
        .collect();
    for kind in kinds {
        println!(
            "{kind:<20} {:>10} {:>12}",
            count(&layer.diagnostics.raw_types, kind),
            count(&normalized, kind)
        );
    }
    println!();
    println!(
        "{} closed lines converted, {} inside collections, {} left open",
        layer.diagnostics.lines_converted,
        layer.diagnostics.collection_lines_converted,
        layer.diagnostics.unclosed_lines.len()
    );
    println!(
        "{} malformed features skipped, {} duplicate ids",
        layer.diagnostics.malformed_features, layer.diagnostics.duplicate_ids
    );
    Ok(())
}

fn count(histogram: &GeometryHistogram, kind: &str) -> usize {
    histogram.get(kind).copied().unwrap_or_default()
}

fn load_mapping_layer(
    config: &PipelineConfig,
) -> Result<NormalizeOutcome, Box<dyn std::error::Error>> {
    let collection = read_feature_collection(&config.inputs.geometries)?;
    Ok(normalize_features(collection.features, &config.mapping)?)
}

fn harmonise(
    config: &PipelineConfig,
    stages: &Arc<dyn ProgressCallback>,
) -> Result<Harmonised, Box<dyn std::error::Error>> {
    stages.set_message("Normalising mapping layer".to_string());
    let layer = load_mapping_layer(config)?;
    stages.inc(1);

    stages.set_message("Loading attributes".to_string());
    let attributes = load_attributes(
        &config.inputs.attributes,
        &config.attributes.columns,
        config.attributes.min_rows,
    )?;
    if !attributes.diagnostics.absent_optional_columns.is_empty() {
        log::info!(
            "Optional columns not in the attribute table: {}",
            attributes.diagnostics.absent_optional_columns.join(", ")
        );
    }
    stages.inc(1);

    stages.set_message("Detecting contained polygons".to_string());
    let contained = find_contained(&layer.features);
    stages.inc(1);

    stages.set_message("Merging records".to_string());
    let merged = merge_records(layer.features, attributes.records)?;
    let mut records = merged.records;
    let flagged = flag_contained(&mut records, &contained);
    log::info!("{flagged} merged records lie inside another mapped polygon");
    stages.inc(1);

    stages.set_message("Estimating capacity".to_string());
    let capacity = estimate_capacities(records, &config.capacity)?;
    for (provenance, count) in &capacity.diagnostics.provenance_counts {
        log::info!("Capacity from {provenance}: {count} records");
    }
    stages.inc(1);

    stages.set_message("Classifying".to_string());
    let records = classify(capacity.records);
    stages.inc(1);

    Ok(Harmonised {
        records,
        capacity: capacity.diagnostics,
    })
}

/// Reads a partition's reference table, if one is configured.
fn load_partition_reference(
    settings: &PartitionConfig,
) -> Result<Option<BTreeMap<String, f64>>, SpatialError> {
    settings.reference.as_ref().map(load_reference).transpose()
}

fn log_subtotals(subtotals: &SourceSubtotals) {
    log::info!("Installations / clusters:");
    for (source, subtotal) in [
        ("mapping", subtotals.mapping),
        ("register", subtotals.registry),
        ("harmonised", subtotals.harmonised),
    ] {
        log::info!(
            "  {source:<10} {} / {}",
            subtotal.installations,
            subtotal.clusters
        );
    }
}

fn log_metadata(stats: &MetadataStats) {
    for (field, presence) in [
        ("capacity_merged_MWp", stats.capacity_merged),
        ("orientation", stats.orientation),
        ("located", stats.located),
        ("num_modules", stats.num_modules),
        ("area_sqm", stats.area),
    ] {
        log::info!(
            "{field}, num entries: {} (=={:.1} % of rows)",
            presence.count,
            presence.percent
        );
    }
    log::info!("Capacity, sum: {:.3} MWp", stats.capacity_sum_mwp);
    if let Some(median) = stats.capacity_median_mwp {
        log::info!("Capacity, median: {median} MWp");
    }
}

fn log_fit(label: &str, unit: &str, fit: Option<&RegressionFit>) {
    match fit {
        Some(fit) => log::info!(
            "{label}: slope {:.2} {unit}, R² {:.3} over {} samples",
            fit.slope_w_per_unit(),
            fit.r_squared,
            fit.samples
        ),
        None => log::warn!("{label}: nothing to regress"),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use indicatif::ProgressDrawTarget;
    use pvgeo_geometry::layer::geometry_kind;
    use pvgeo_harmonize::progress::null_progress;
    use pvgeo_installation_models::Category;
    use serde_json::{Value, json};

    use super::*;

    const CONFIG: &str = r#"
        output_dir = "out"

        [inputs]
        attributes = "points.csv"
        geometries = "geometries.geojson"

        [region_a]
        label = "gsp"
        path = "gsp.geojson"

        [region_a.reference]
        path = "gsp_reference.csv"

        [region_b]
        label = "lsoa"
        path = "lsoa.geojson"
        id_property = "code"
        name_property = "name"

        [region_b.reference]
        path = "lsoa_reference.csv"
        id_column = "code"
    "#;

    /// Mapped arrays: 1 encloses 2, and 3 is a separate array with a
    /// reported capacity. Registry id 77 has coordinates only.
    const POINTS: &str = "\
osm_id,repd_id,latitude,longitude,capacity_osm_MWp,capacity_repd_MWp
1,,,,,
2,,,,,
3,,,,0.5,
,77,51.52,-0.05,,2.0
";

    fn rect(min: [f64; 2], max: [f64; 2], properties: Value) -> Value {
        json!({
            "type": "Feature",
            "properties": properties,
            "geometry": {
                "type": "Polygon",
                "coordinates": [[
                    [min[0], min[1]],
                    [max[0], min[1]],
                    [max[0], max[1]],
                    [min[0], max[1]],
                    [min[0], min[1]],
                ]],
            },
        })
    }

    fn square(min_lon: f64, min_lat: f64, size: f64, properties: Value) -> Value {
        rect([min_lon, min_lat], [min_lon + size, min_lat + size], properties)
    }

    fn collection(features: Vec<Value>) -> String {
        json!({ "type": "FeatureCollection", "features": features }).to_string()
    }

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    fn fixture(dir: &Path, lsoa_reference: &str) -> PipelineConfig {
        write(dir, "pvgeo.toml", CONFIG);
        write(dir, "points.csv", POINTS);
        write(
            dir,
            "geometries.geojson",
            &collection(vec![
                square(-0.150, 51.500, 0.001, json!({ "osm_id": 1, "name": "Outer" })),
                square(-0.1498, 51.5002, 0.0006, json!({ "osm_id": 2 })),
                square(-0.130, 51.510, 0.001, json!({ "osm_id": 3, "building": "yes" })),
                square(-0.120, 51.510, 0.001, json!({ "osm_id": 4 })),
            ]),
        );
        write(
            dir,
            "gsp.geojson",
            &collection(vec![
                rect([-0.1, 51.4], [0.0, 51.6], json!({ "RegionID": 2, "RegionName": "East" })),
                rect([-0.2, 51.4], [-0.1, 51.6], json!({ "RegionID": 1, "RegionName": "West" })),
            ]),
        );
        write(
            dir,
            "lsoa.geojson",
            &collection(vec![square(
                -0.2,
                51.4,
                0.2,
                json!({ "code": "E01", "name": "Central" }),
            )]),
        );
        write(dir, "gsp_reference.csv", "RegionID,dc_capacity\n1,0.6\n2,2.0\n");
        write(dir, "lsoa_reference.csv", lsoa_reference);

        PipelineConfig::load(&dir.join("pvgeo.toml")).unwrap()
    }

    fn by_mapping_id(records: &[InstallationRecord], id: i64) -> &InstallationRecord {
        records.iter().find(|r| r.mapping_id == Some(id)).unwrap()
    }

    fn hidden() -> MultiProgress {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    }

    #[test]
    fn only_the_enclosing_polygon_gets_an_area_estimate() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "code,dc_capacity\nE01,2.6\n");

        let harmonised = harmonise(&config, &null_progress()).unwrap();
        let records = &harmonised.records;
        assert_eq!(records.len(), 4);

        let outer = by_mapping_id(records, 1);
        assert!(!outer.is_contained);
        assert_eq!(outer.mapping_name.as_deref(), Some("Outer"));
        assert_eq!(outer.capacity_provenance, CapacityProvenance::AreaRegression);
        let estimate = outer.capacity_merged_with_area_mwp.unwrap();
        assert!((estimate - 0.5).abs() < 0.01, "{estimate}");

        let inner = by_mapping_id(records, 2);
        assert!(inner.is_contained);
        assert_eq!(inner.capacity_merged_with_area_mwp, None);
        assert_eq!(inner.capacity_merged_final_mwp, None);
        assert_eq!(inner.capacity_provenance, CapacityProvenance::Unknown);

        let reported = by_mapping_id(records, 3);
        assert_eq!(reported.capacity_provenance, CapacityProvenance::SourceA);
        assert!(!reported.tags.contains_key("building"));

        let fit = harmonised.capacity.area_fit.unwrap();
        assert_eq!(fit.samples, 1);
    }

    #[test]
    fn register_only_row_becomes_a_point() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "code,dc_capacity\nE01,2.6\n");

        let harmonised = harmonise(&config, &null_progress()).unwrap();
        let registered = harmonised
            .records
            .iter()
            .find(|r| r.registry_id == Some(77))
            .unwrap();

        assert_eq!(registered.mapping_id, None);
        assert_eq!(geometry_kind(&registered.geometry), "Point");
        assert!(registered.area_sqm.abs() < f64::EPSILON);
        assert_eq!(registered.capacity_merged_final_mwp, Some(2.0));
        assert_eq!(registered.capacity_provenance, CapacityProvenance::SourceB);
        assert_eq!(registered.category, Category::Large);
        assert_eq!(
            harmonised.capacity.provenance_counts[&CapacityProvenance::SourceB],
            1
        );
    }

    #[test]
    fn run_writes_every_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "code,dc_capacity\nE01,2.6\n");

        run(&config, &hidden()).unwrap();

        for name in [
            "installations.geojson",
            "category_pivot.csv",
            "gsp_regions.csv",
            "lsoa_regions.csv",
            "run_summary.json",
        ] {
            assert!(config.output(name).is_file(), "{name}");
        }

        let gsp = std::fs::read_to_string(config.output("gsp_regions.csv")).unwrap();
        let rows: Vec<&str> = gsp.lines().skip(1).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("1,West,3,"), "{}", rows[0]);
        assert!(rows[1].starts_with("2,East,1,"), "{}", rows[1]);

        let summary: Value =
            serde_json::from_str(&std::fs::read_to_string(config.output("run_summary.json")).unwrap())
                .unwrap();
        assert_eq!(summary["validation"]["lsoa"]["regions"], json!(1));
        assert_eq!(summary["provenance"]["source_b"], json!(1));
    }

    #[test]
    fn bad_reference_aborts_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "code,wrong_col\nE01,2.6\n");

        let err = run(&config, &hidden()).unwrap_err();

        assert!(err.to_string().contains("dc_capacity"), "{err}");
        assert!(!config.output_dir.exists());
    }

    #[test]
    fn missing_attribute_column_aborts_before_any_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path(), "code,dc_capacity\nE01,2.6\n");
        write(
            dir.path(),
            "points.csv",
            "osm_id,latitude,longitude,capacity_osm_MWp,capacity_repd_MWp\n1,,,,\n",
        );

        assert!(run(&config, &hidden()).is_err());
        assert!(!config.output_dir.exists());
    }
}
