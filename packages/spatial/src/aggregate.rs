//! Region assignment and per-region capacity subtotals.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use geo::{Centroid, Geometry, Point};
use pvgeo_harmonize::progress::ProgressCallback;
use pvgeo_harmonize::summary::ColumnTotal;
use pvgeo_installation_models::{CapacityColumn, InstallationRecord};
use serde::{Deserialize, Serialize};

use crate::RegionIndex;

/// Which of the two region partitions a summary refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    A,
    B,
}

impl Partition {
    /// The record's region in this partition.
    #[must_use]
    pub fn region_of(self, record: &InstallationRecord) -> Option<&str> {
        match self {
            Self::A => record.region_a_id.as_deref(),
            Self::B => record.region_b_id.as_deref(),
        }
    }
}

/// Point used to place an installation in a region: the centroid, or the
/// point itself for points. `None` for empty geometries.
#[must_use]
pub fn representative_point(geometry: &Geometry<f64>) -> Option<Point<f64>> {
    match geometry {
        Geometry::Point(point) => Some(*point),
        other => other.centroid(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignDiagnostics {
    pub assigned_a: usize,
    pub assigned_b: usize,
    /// Records whose geometry has no centroid.
    pub empty_geometries: usize,
}

#[derive(Debug, Clone)]
pub struct AssignOutcome {
    pub records: Vec<InstallationRecord>,
    pub diagnostics: AssignDiagnostics,
}

/// Sets `region_a_id` and `region_b_id` on every record. Records outside
/// every region keep `None`.
#[must_use]
pub fn assign_regions(
    mut records: Vec<InstallationRecord>,
    regions_a: &RegionIndex,
    regions_b: &RegionIndex,
    progress: &Arc<dyn ProgressCallback>,
) -> AssignOutcome {
    let mut diagnostics = AssignDiagnostics::default();
    progress.set_total(records.len() as u64);

    for record in &mut records {
        progress.inc(1);
        let Some(point) = representative_point(&record.geometry) else {
            diagnostics.empty_geometries += 1;
            continue;
        };

        record.region_a_id = regions_a.lookup(&point).map(str::to_string);
        record.region_b_id = regions_b.lookup(&point).map(str::to_string);
        diagnostics.assigned_a += usize::from(record.region_a_id.is_some());
        diagnostics.assigned_b += usize::from(record.region_b_id.is_some());
    }

    progress.finish(format!(
        "Assigned regions: {} / {} of {} installations",
        diagnostics.assigned_a,
        diagnostics.assigned_b,
        records.len()
    ));
    if diagnostics.empty_geometries > 0 {
        log::warn!(
            "{} installations have empty geometry and no region",
            diagnostics.empty_geometries
        );
    }

    AssignOutcome {
        records,
        diagnostics,
    }
}

/// Installation count and capacity subtotals for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSummary {
    pub region_id: String,
    pub region_name: Option<String>,
    pub num_installations: usize,
    pub columns: BTreeMap<CapacityColumn, ColumnTotal>,
}

impl RegionSummary {
    fn empty(region_id: &str, region_name: Option<&str>) -> Self {
        Self {
            region_id: region_id.to_string(),
            region_name: region_name.map(str::to_string),
            num_installations: 0,
            columns: CapacityColumn::ALL
                .iter()
                .map(|c| (*c, ColumnTotal::default()))
                .collect(),
        }
    }

    /// Subtotal for one capacity column.
    #[must_use]
    pub fn column(&self, column: CapacityColumn) -> ColumnTotal {
        self.columns.get(&column).copied().unwrap_or_default()
    }
}

/// One summary per region of the partition, in region id order. Regions
/// without installations are present with zero counts.
#[must_use]
pub fn aggregate(
    records: &[InstallationRecord],
    regions: &RegionIndex,
    partition: Partition,
) -> Vec<RegionSummary> {
    let mut summaries: Vec<RegionSummary> = regions
        .regions()
        .map(|(id, name)| RegionSummary::empty(id, name))
        .collect();
    let position: HashMap<&str, usize> = regions
        .regions()
        .enumerate()
        .map(|(index, (id, _))| (id, index))
        .collect();

    for record in records {
        let Some(summary) = partition
            .region_of(record)
            .and_then(|id| position.get(id))
            .map(|index| &mut summaries[*index])
        else {
            continue;
        };

        summary.num_installations += 1;
        for column in CapacityColumn::ALL {
            summary
                .columns
                .entry(*column)
                .or_default()
                .add(column.value(record));
        }
    }

    let empty = summaries
        .iter()
        .filter(|s| s.num_installations == 0)
        .count();
    log::info!(
        "Partition {partition:?}: {} regions, {empty} without installations",
        summaries.len()
    );

    summaries
}
