//! Loading of the attribute table (the exported points CSV).
//!
//! Column names are declared up front in an [`AttributeSchema`]. Missing
//! required columns abort the run; missing optional columns simply leave
//! the corresponding field `None` on every row. Rows that cannot be parsed
//! are skipped and counted rather than failing the load.

use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use csv::StringRecord;
use pvgeo_installation_models::AttributeRecord;
use serde::{Deserialize, Serialize};

use crate::HarmonizeError;

/// Column names of the attribute table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeSchema {
    pub mapping_id: String,
    pub registry_id: String,
    pub latitude: String,
    pub longitude: String,
    pub capacity_source_a: String,
    pub capacity_source_b: String,
    pub mapping_objtype: String,
    pub mapping_cluster_id: String,
    pub registry_cluster_id: String,
    pub num_modules: String,
    pub orientation: String,
    pub located: String,
}

impl Default for AttributeSchema {
    fn default() -> Self {
        Self {
            mapping_id: "osm_id".to_string(),
            registry_id: "repd_id".to_string(),
            latitude: "latitude".to_string(),
            longitude: "longitude".to_string(),
            capacity_source_a: "capacity_osm_MWp".to_string(),
            capacity_source_b: "capacity_repd_MWp".to_string(),
            mapping_objtype: "osm_objtype".to_string(),
            mapping_cluster_id: "osm_cluster_id".to_string(),
            registry_cluster_id: "repd_cluster_id".to_string(),
            num_modules: "num_modules".to_string(),
            orientation: "orientation".to_string(),
            located: "located".to_string(),
        }
    }
}

/// Header positions resolved against a concrete file.
struct ColumnIndex {
    mapping_id: usize,
    registry_id: usize,
    latitude: usize,
    longitude: usize,
    capacity_source_a: usize,
    capacity_source_b: usize,
    mapping_objtype: Option<usize>,
    mapping_cluster_id: Option<usize>,
    registry_cluster_id: Option<usize>,
    num_modules: Option<usize>,
    orientation: Option<usize>,
    located: Option<usize>,
}

impl ColumnIndex {
    fn resolve(
        headers: &StringRecord,
        schema: &AttributeSchema,
        diagnostics: &mut AttributeDiagnostics,
    ) -> Result<Self, HarmonizeError> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);

        let mut missing = Vec::new();
        let mut required = |name: &str| {
            find(name).unwrap_or_else(|| {
                missing.push(name.to_string());
                usize::MAX
            })
        };

        let mapping_id = required(&schema.mapping_id);
        let registry_id = required(&schema.registry_id);
        let latitude = required(&schema.latitude);
        let longitude = required(&schema.longitude);
        let capacity_source_a = required(&schema.capacity_source_a);
        let capacity_source_b = required(&schema.capacity_source_b);

        if !missing.is_empty() {
            return Err(HarmonizeError::SchemaViolation {
                message: format!(
                    "attribute table is missing required column(s): {}",
                    missing.join(", ")
                ),
            });
        }

        let mut optional = |name: &str| {
            let index = find(name);
            if index.is_none() {
                log::info!("Optional column {name} absent; treating it as unknown on every row");
                diagnostics.absent_optional_columns.push(name.to_string());
            }
            index
        };

        Ok(Self {
            mapping_id,
            registry_id,
            latitude,
            longitude,
            capacity_source_a,
            capacity_source_b,
            mapping_objtype: optional(&schema.mapping_objtype),
            mapping_cluster_id: optional(&schema.mapping_cluster_id),
            registry_cluster_id: optional(&schema.registry_cluster_id),
            num_modules: optional(&schema.num_modules),
            orientation: optional(&schema.orientation),
            located: optional(&schema.located),
        })
    }

    fn parse(&self, record: &StringRecord) -> Result<AttributeRecord, String> {
        let integer = |index: Option<usize>| parse_integer(record, index);
        let float = |index: usize| parse_cell::<f64>(record, Some(index));

        Ok(AttributeRecord {
            mapping_id: integer(Some(self.mapping_id))?,
            mapping_objtype: text(record, self.mapping_objtype),
            registry_id: integer(Some(self.registry_id))?,
            mapping_cluster_id: integer(self.mapping_cluster_id)?,
            registry_cluster_id: integer(self.registry_cluster_id)?,
            latitude: float(self.latitude)?,
            longitude: float(self.longitude)?,
            capacity_source_a_mwp: float(self.capacity_source_a)?,
            capacity_source_b_mwp: float(self.capacity_source_b)?,
            num_modules: integer(self.num_modules)?,
            orientation: integer(self.orientation)?,
            located: text(record, self.located),
        })
    }
}

/// Counters describing what loading did to the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeDiagnostics {
    /// Data rows encountered, including malformed ones.
    pub rows_read: usize,
    /// Rows skipped because they could not be parsed.
    pub malformed_rows: usize,
    /// Optional columns that were absent from the header.
    pub absent_optional_columns: Vec<String>,
}

/// Parsed attribute table plus diagnostics.
#[derive(Debug, Clone)]
pub struct AttributeOutcome {
    pub records: Vec<AttributeRecord>,
    pub diagnostics: AttributeDiagnostics,
}

/// Reads the attribute table from any reader.
///
/// # Errors
///
/// Returns [`HarmonizeError::SchemaViolation`] if a required column is
/// absent, or [`HarmonizeError::Csv`] if the header cannot be read.
pub fn read_attributes<R: Read>(
    reader: R,
    schema: &AttributeSchema,
) -> Result<AttributeOutcome, HarmonizeError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(reader);
    let mut diagnostics = AttributeDiagnostics::default();

    let headers = reader.headers()?.clone();
    let columns = ColumnIndex::resolve(&headers, schema, &mut diagnostics)?;

    let mut records = Vec::new();

    for (row, result) in reader.records().enumerate() {
        diagnostics.rows_read += 1;
        // Header is line 1
        let line = row + 2;

        let parsed = result
            .map_err(|e| e.to_string())
            .and_then(|record| columns.parse(&record));

        match parsed {
            Ok(record) => records.push(record),
            Err(message) => {
                log::warn!("Skipping malformed attribute row at line {line}: {message}");
                diagnostics.malformed_rows += 1;
            }
        }
    }

    log::info!(
        "Read {} attribute rows ({} malformed rows skipped)",
        records.len(),
        diagnostics.malformed_rows
    );

    Ok(AttributeOutcome {
        records,
        diagnostics,
    })
}

/// Loads the attribute table from a file and checks it clears the minimum
/// volume expected of a real export.
///
/// # Errors
///
/// Returns [`HarmonizeError`] if the file cannot be read, a required column
/// is missing, or fewer than `min_rows` rows survive parsing.
pub fn load_attributes(
    path: &Path,
    schema: &AttributeSchema,
    min_rows: usize,
) -> Result<AttributeOutcome, HarmonizeError> {
    log::info!("Loading attribute table from {}", path.display());
    let file = std::fs::File::open(path)?;
    let outcome = read_attributes(file, schema)?;
    check_minimum_volume(&outcome, min_rows)?;
    Ok(outcome)
}

/// Fails if too few rows survived parsing to trust the export.
///
/// # Errors
///
/// Returns [`HarmonizeError::DataIntegrity`] below the threshold.
pub fn check_minimum_volume(
    outcome: &AttributeOutcome,
    min_rows: usize,
) -> Result<(), HarmonizeError> {
    if outcome.records.len() < min_rows {
        return Err(HarmonizeError::DataIntegrity {
            message: format!(
                "only {} attribute rows survived parsing ({} malformed); expected at least {min_rows}",
                outcome.records.len(),
                outcome.diagnostics.malformed_rows
            ),
        });
    }
    Ok(())
}

fn cell(record: &StringRecord, index: Option<usize>) -> Option<&str> {
    let value = record.get(index?)?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("nan") || value == "<NA>" {
        None
    } else {
        Some(value)
    }
}

fn text(record: &StringRecord, index: Option<usize>) -> Option<String> {
    cell(record, index).map(ToString::to_string)
}

fn parse_cell<T>(record: &StringRecord, index: Option<usize>) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    cell(record, index)
        .map(|value| value.parse::<T>().map_err(|e| format!("{value:?}: {e}")))
        .transpose()
}

/// Nullable integers may have been written as `123.0` by float-typed
/// exports; whole-valued floats are accepted.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn parse_integer(record: &StringRecord, index: Option<usize>) -> Result<Option<i64>, String> {
    let Some(value) = cell(record, index) else {
        return Ok(None);
    };

    if let Ok(integer) = value.parse::<i64>() {
        return Ok(Some(integer));
    }

    match value.parse::<f64>() {
        Ok(float) if float.fract() == 0.0 && float.abs() < 9.0e15 => Ok(Some(float as i64)),
        _ => Err(format!("{value:?} is not an integer")),
    }
}
