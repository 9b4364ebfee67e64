//! Whole-inventory summaries reported after harmonisation.

use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use pvgeo_installation_models::{CapacityColumn, Category, InstallationRecord};
use serde::Serialize;

use crate::HarmonizeError;
use crate::capacity::{RegressionFit, fit_zero_intercept, positive};

/// Distinct installations and site clusters in one view of the inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Subtotal {
    pub installations: usize,
    pub clusters: usize,
}

/// Subtotals from each source and for the harmonised table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceSubtotals {
    pub mapping: Subtotal,
    pub registry: Subtotal,
    pub harmonised: Subtotal,
}

#[must_use]
pub fn source_subtotals(records: &[InstallationRecord]) -> SourceSubtotals {
    let from_mapping: Vec<_> = records
        .iter()
        .filter(|r| r.mapping_id.is_some_and(|id| id > 0))
        .collect();
    let from_registry: Vec<_> = records
        .iter()
        .filter(|r| r.registry_id.is_some_and(|id| id > 0))
        .collect();

    SourceSubtotals {
        mapping: Subtotal {
            installations: distinct(&from_mapping, |r| (r.mapping_objtype.clone(), r.mapping_id)),
            clusters: distinct(&from_mapping, |r| r.mapping_cluster_id),
        },
        registry: Subtotal {
            installations: distinct(&from_registry, |r| r.registry_id),
            clusters: distinct(&from_registry, |r| r.registry_cluster_id),
        },
        harmonised: Subtotal {
            installations: distinct(records, |r| {
                (r.mapping_objtype.clone(), r.mapping_id, r.registry_id)
            }),
            clusters: distinct(records, |r| (r.mapping_cluster_id, r.registry_id)),
        },
    }
}

fn distinct<R, K, F>(records: &[R], key: F) -> usize
where
    R: Borrow<InstallationRecord>,
    K: Ord,
    F: Fn(&InstallationRecord) -> K,
{
    records
        .iter()
        .map(|r| key(r.borrow()))
        .collect::<BTreeSet<_>>()
        .len()
}

/// How many rows carry a field, and what share of the table that is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Presence {
    pub count: usize,
    pub percent: f64,
}

impl Presence {
    #[allow(clippy::cast_precision_loss)]
    fn of(count: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            100.0 * count as f64 / total as f64
        };
        Self { count, percent }
    }
}

/// Presence of descriptive metadata across the harmonised table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataStats {
    pub rows: usize,
    pub capacity_merged: Presence,
    pub orientation: Presence,
    pub located: Presence,
    pub num_modules: Presence,
    pub area: Presence,
    pub capacity_sum_mwp: f64,
    pub capacity_median_mwp: Option<f64>,
}

#[must_use]
pub fn metadata_stats(records: &[InstallationRecord]) -> MetadataStats {
    let rows = records.len();
    let count = |f: fn(&InstallationRecord) -> bool| records.iter().filter(|r| f(r)).count();

    let mut capacities: Vec<f64> = records.iter().filter_map(|r| r.capacity_merged_mwp).collect();
    capacities.sort_by(f64::total_cmp);

    MetadataStats {
        rows,
        capacity_merged: Presence::of(capacities.len(), rows),
        orientation: Presence::of(count(|r| r.orientation.is_some()), rows),
        located: Presence::of(count(|r| r.located.is_some()), rows),
        num_modules: Presence::of(count(|r| r.num_modules.is_some()), rows),
        area: Presence::of(count(|r| r.area_sqm > 0.0), rows),
        capacity_sum_mwp: capacities.iter().sum(),
        capacity_median_mwp: median(&capacities),
    }
}

fn median(sorted: &[f64]) -> Option<f64> {
    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => None,
        n if n % 2 == 1 => Some(sorted[mid]),
        _ => Some(f64::midpoint(sorted[mid - 1], sorted[mid])),
    }
}

/// Sum and count of positive values for one capacity column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ColumnTotal {
    pub sum_mwp: f64,
    pub positive: usize,
}

impl ColumnTotal {
    /// Adds a value to the sum, counting it if strictly positive.
    pub fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum_mwp += v;
        }
        if positive(value).is_some() {
            self.positive += 1;
        }
    }
}

/// Capacity subtotals per size class and per estimation stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryPivot {
    pub rows: BTreeMap<Category, BTreeMap<CapacityColumn, ColumnTotal>>,
    pub totals: BTreeMap<CapacityColumn, ColumnTotal>,
}

#[must_use]
pub fn category_pivot(records: &[InstallationRecord]) -> CategoryPivot {
    let mut pivot = CategoryPivot::default();
    for category in Category::ALL {
        pivot.rows.insert(*category, BTreeMap::new());
    }

    for record in records {
        let row = pivot.rows.entry(record.category).or_default();
        for column in CapacityColumn::ALL {
            let value = column.value(record);
            row.entry(*column).or_default().add(value);
            pivot.totals.entry(*column).or_default().add(value);
        }
    }

    pivot
}

impl CategoryPivot {
    fn labelled(&self) -> impl Iterator<Item = (String, &BTreeMap<CapacityColumn, ColumnTotal>)> {
        self.rows
            .iter()
            .map(|(category, columns)| (category.to_string(), columns))
            .chain(std::iter::once(("total".to_string(), &self.totals)))
    }

    /// Logs one line per category plus the totals.
    pub fn log(&self) {
        for (label, columns) in self.labelled() {
            let sums: Vec<String> = CapacityColumn::ALL
                .iter()
                .map(|c| {
                    let total = columns.get(c).copied().unwrap_or_default();
                    format!("{c}={:.3} ({})", total.sum_mwp, total.positive)
                })
                .collect();
            log::info!("{label:>6}: {}", sums.join(", "));
        }
    }

    /// Writes the pivot as CSV: one row per category plus a `total` row.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn write_csv(&self, path: &Path) -> Result<(), HarmonizeError> {
        let mut writer = csv::Writer::from_path(path)?;

        let mut header = vec!["category".to_string()];
        header.extend(CapacityColumn::ALL.iter().map(ToString::to_string));
        header.extend(CapacityColumn::ALL.iter().map(|c| format!("{c}_count")));
        writer.write_record(&header)?;

        for (label, columns) in self.labelled() {
            let totals: Vec<ColumnTotal> = CapacityColumn::ALL
                .iter()
                .map(|c| columns.get(c).copied().unwrap_or_default())
                .collect();
            let mut row = vec![label];
            row.extend(totals.iter().map(|t| format!("{:.3}", t.sum_mwp)));
            row.extend(totals.iter().map(|t| t.positive.to_string()));
            writer.write_record(&row)?;
        }

        writer.flush()?;
        log::info!("Wrote category pivot to {}", path.display());
        Ok(())
    }
}

/// Capacity per module, fitted over small installations that report both.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn module_regression(records: &[InstallationRecord]) -> Option<RegressionFit> {
    let samples: Vec<(f64, f64)> = records
        .iter()
        .filter(|r| r.category == Category::Small)
        .filter_map(|r| {
            let modules = r.num_modules.filter(|n| *n > 0)?;
            let capacity = positive(r.capacity_merged_mwp)?;
            Some((modules as f64, capacity))
        })
        .collect();

    log::info!(
        "{} small installations with module count and capacity to regress",
        samples.len()
    );
    fit_zero_intercept(&samples)
}
