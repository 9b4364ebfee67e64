//! Comparison of per-region totals against an independent reference.
//!
//! The reference is a CSV with one row per region. Regions missing from
//! either side count as zero, so a region we never assigned anything to
//! still weighs against the correlation.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::PathBuf;

use pvgeo_installation_models::CapacityColumn;
use serde::{Deserialize, Serialize};

use crate::SpatialError;
use crate::aggregate::RegionSummary;

/// Where to find a reference table and which columns to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceOptions {
    pub path: PathBuf,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default = "default_capacity_column")]
    pub capacity_column: String,
}

fn default_id_column() -> String {
    "RegionID".to_string()
}

fn default_capacity_column() -> String {
    "dc_capacity".to_string()
}

/// Reads region id -> capacity (MWp). Repeated ids are summed; blank or
/// unparseable capacities are skipped with a warning.
///
/// # Errors
///
/// Returns [`SpatialError::SchemaViolation`] if either column is missing,
/// or [`SpatialError::Csv`] if the CSV is unreadable.
pub fn read_reference<R: Read>(
    reader: R,
    id_column: &str,
    capacity_column: &str,
) -> Result<BTreeMap<String, f64>, SpatialError> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = csv.headers()?.clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| SpatialError::SchemaViolation {
                message: format!("reference table has no {name:?} column"),
            })
    };
    let id_index = position(id_column)?;
    let capacity_index = position(capacity_column)?;

    let mut totals = BTreeMap::new();
    let mut skipped = 0_usize;
    for row in csv.records() {
        let row = row?;
        let id = row.get(id_index).map(str::trim).unwrap_or_default();
        let capacity = row
            .get(capacity_index)
            .and_then(|c| c.trim().parse::<f64>().ok());
        match capacity {
            Some(capacity) if !id.is_empty() => {
                *totals.entry(id.to_string()).or_insert(0.0) += capacity;
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {skipped} reference rows without an id or a numeric capacity");
    }
    Ok(totals)
}

/// Reads a reference table from disk.
///
/// # Errors
///
/// See [`read_reference`].
pub fn load_reference(options: &ReferenceOptions) -> Result<BTreeMap<String, f64>, SpatialError> {
    let file = std::fs::File::open(&options.path)?;
    let totals = read_reference(file, &options.id_column, &options.capacity_column)?;
    log::info!(
        "Loaded {} reference regions from {}",
        totals.len(),
        options.path.display()
    );
    Ok(totals)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    /// Regions in the union of both sides.
    pub regions: usize,
    pub only_ours: usize,
    pub only_reference: usize,
    pub our_total_mwp: f64,
    pub reference_total_mwp: f64,
    /// Squared Pearson correlation; `None` if either side is constant.
    pub r_squared: Option<f64>,
}

/// Outer-joins our per-region `column` totals with the reference.
#[must_use]
pub fn compare_with_reference(
    summaries: &[RegionSummary],
    reference: &BTreeMap<String, f64>,
    column: CapacityColumn,
) -> ValidationOutcome {
    let ours: BTreeMap<&str, f64> = summaries
        .iter()
        .map(|s| (s.region_id.as_str(), s.column(column).sum_mwp))
        .collect();
    let ids: BTreeSet<&str> = ours
        .keys()
        .copied()
        .chain(reference.keys().map(String::as_str))
        .collect();

    let pairs: Vec<(f64, f64)> = ids
        .iter()
        .map(|id| {
            (
                ours.get(id).copied().unwrap_or_default(),
                reference.get(*id).copied().unwrap_or_default(),
            )
        })
        .collect();

    let outcome = ValidationOutcome {
        regions: ids.len(),
        only_ours: ours.keys().filter(|id| !reference.contains_key(**id)).count(),
        only_reference: reference
            .keys()
            .filter(|id| !ours.contains_key(id.as_str()))
            .count(),
        our_total_mwp: pairs.iter().map(|(a, _)| a).sum(),
        reference_total_mwp: pairs.iter().map(|(_, b)| b).sum(),
        r_squared: pearson_r_squared(&pairs),
    };

    match outcome.r_squared {
        Some(r2) => log::info!(
            "Correlation with reference over {} regions: R² = {r2:.3} ({:.1} vs {:.1} MWp)",
            outcome.regions,
            outcome.our_total_mwp,
            outcome.reference_total_mwp
        ),
        None => log::warn!("Reference correlation undefined (constant totals)"),
    }

    outcome
}

/// Squared Pearson correlation of `(x, y)` pairs.
#[must_use]
pub fn pearson_r_squared(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let (dx, dy) = (x - mean_x, y - mean_y);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    Some(sxy * sxy / (sxx * syy))
}
