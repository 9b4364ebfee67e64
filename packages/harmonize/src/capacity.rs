//! Capacity gap filling.
//!
//! Three stages run in order, each only filling values the previous one
//! left undefined:
//!
//! 1. coalesce the two reported capacities into `capacity_merged_MWp`,
//! 2. infer capacity from polygon area with a zero-intercept regression
//!    trained on rows that have both (`capacity_merged_with_area_MWp`),
//! 3. give everything still unknown a small household floor value
//!    (`capacity_merged_final_MWp`).
//!
//! Contained polygons take no part in stages 2 and 3: their area is already
//! counted by the outline that encloses them.

use std::collections::BTreeMap;

use pvgeo_installation_models::{CapacityProvenance, InstallationRecord};
use serde::{Deserialize, Serialize};

use crate::HarmonizeError;

/// Default capacity given to installations nothing else could estimate.
pub const DEFAULT_FLOOR_CAPACITY_MWP: f64 = 0.003;

/// Returns the value if it is strictly positive.
#[must_use]
pub fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

/// Ordered fallback: the first candidate with a strictly positive value,
/// together with the tag of the candidate that supplied it.
#[must_use]
pub fn first_positive<T: Copy>(candidates: &[(T, Option<f64>)]) -> Option<(f64, T)> {
    candidates
        .iter()
        .find_map(|(tag, value)| positive(*value).map(|v| (v, *tag)))
}

/// A fitted `y ≈ slope × x` line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionFit {
    /// MWp per unit of the explanatory variable.
    pub slope: f64,
    pub r_squared: f64,
    pub samples: usize,
}

impl RegressionFit {
    /// Slope converted from MWp to W per unit (W/m² for area).
    #[must_use]
    pub fn slope_w_per_unit(&self) -> f64 {
        self.slope * 1e6
    }
}

/// Least-squares fit through the origin.
///
/// R² is computed against the mean of `y` so that it stays comparable with
/// an ordinary fit. If every `y` is identical the total sum of squares is
/// zero and R² is 1.0 for a perfect fit, else 0.0. Returns `None` with no
/// samples or when every `x` is zero.
#[must_use]
pub fn fit_zero_intercept(samples: &[(f64, f64)]) -> Option<RegressionFit> {
    let sum_xy: f64 = samples.iter().map(|(x, y)| x * y).sum();
    let sum_xx: f64 = samples.iter().map(|(x, _)| x * x).sum();
    if samples.is_empty() || sum_xx <= 0.0 {
        return None;
    }
    let slope = sum_xy / sum_xx;

    #[allow(clippy::cast_precision_loss)]
    let mean_y = samples.iter().map(|(_, y)| y).sum::<f64>() / samples.len() as f64;
    let ss_res: f64 = samples.iter().map(|(x, y)| (y - slope * x).powi(2)).sum();
    let ss_tot: f64 = samples.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();

    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res <= f64::EPSILON {
        1.0
    } else {
        0.0
    };

    Some(RegressionFit {
        slope,
        r_squared,
        samples: samples.len(),
    })
}

/// Tunables for [`estimate_capacities`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityOptions {
    pub floor_capacity_mwp: f64,
}

impl Default for CapacityOptions {
    fn default() -> Self {
        Self {
            floor_capacity_mwp: DEFAULT_FLOOR_CAPACITY_MWP,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapacityDiagnostics {
    /// Records whose capacity came from one of the reported sources.
    pub coalesced: usize,
    /// The area regression, if any rows could train it.
    pub area_fit: Option<RegressionFit>,
    pub area_filled: usize,
    pub floor_filled: usize,
    pub provenance_counts: BTreeMap<CapacityProvenance, usize>,
}

#[derive(Debug, Clone)]
pub struct CapacityOutcome {
    pub records: Vec<InstallationRecord>,
    pub diagnostics: CapacityDiagnostics,
}

/// Runs all three fill stages and tags every record with its provenance.
///
/// # Errors
///
/// Returns [`HarmonizeError::DataIntegrity`] if a stage would overwrite a
/// value an earlier stage established.
pub fn estimate_capacities(
    mut records: Vec<InstallationRecord>,
    options: &CapacityOptions,
) -> Result<CapacityOutcome, HarmonizeError> {
    let mut diagnostics = CapacityDiagnostics::default();

    for record in &mut records {
        let merged = first_positive(&[
            (CapacityProvenance::SourceA, record.capacity_source_a_mwp),
            (CapacityProvenance::SourceB, record.capacity_source_b_mwp),
        ]);
        record.capacity_merged_mwp = merged.map(|(value, _)| value);
        if merged.is_some() {
            diagnostics.coalesced += 1;
        }
    }
    log::info!(
        "{} of {} records have a reported capacity",
        diagnostics.coalesced,
        records.len()
    );

    let training: Vec<(f64, f64)> = records
        .iter()
        .filter(|r| !r.is_contained && r.area_sqm > 0.0)
        .filter_map(|r| positive(r.capacity_merged_mwp).map(|c| (r.area_sqm, c)))
        .collect();
    diagnostics.area_fit = fit_zero_intercept(&training);

    match &diagnostics.area_fit {
        Some(fit) => log::info!(
            "Area regression: {:.1} W/m² (R² = {:.3}, {} samples)",
            fit.slope_w_per_unit(),
            fit.r_squared,
            fit.samples
        ),
        None => log::warn!(
            "No records with both positive area and capacity; area regression skipped"
        ),
    }

    for record in &mut records {
        record.capacity_merged_with_area_mwp = record.capacity_merged_mwp;
        if let Some(fit) = &diagnostics.area_fit
            && record.capacity_merged_mwp.is_none()
            && record.area_sqm > 0.0
            && !record.is_contained
        {
            record.capacity_merged_with_area_mwp = Some(fit.slope * record.area_sqm);
            diagnostics.area_filled += 1;
        }
    }
    log::info!(
        "Filled {} capacities from polygon area",
        diagnostics.area_filled
    );

    for record in &mut records {
        record.capacity_merged_final_mwp = record.capacity_merged_with_area_mwp;
        if positive(record.capacity_merged_final_mwp).is_none() && !record.is_contained {
            record.capacity_merged_final_mwp = Some(options.floor_capacity_mwp);
            diagnostics.floor_filled += 1;
        }
    }
    log::info!(
        "Filled {} capacities with the {} MWp floor estimate",
        diagnostics.floor_filled,
        options.floor_capacity_mwp
    );

    for record in &mut records {
        if let Some(merged) = record.capacity_merged_mwp
            && record.capacity_merged_with_area_mwp != Some(merged)
        {
            return Err(HarmonizeError::DataIntegrity {
                message: format!(
                    "area stage overwrote the reported capacity of mapping id {:?} / registry id {:?}",
                    record.mapping_id, record.registry_id
                ),
            });
        }
        record.capacity_provenance = provenance_of(record);
        *diagnostics
            .provenance_counts
            .entry(record.capacity_provenance)
            .or_default() += 1;
    }

    let unknown = diagnostics
        .provenance_counts
        .get(&CapacityProvenance::Unknown)
        .copied()
        .unwrap_or_default();
    if unknown > 0 {
        log::warn!("{unknown} records have no capacity from any source");
    }

    Ok(CapacityOutcome {
        records,
        diagnostics,
    })
}

/// Tags the source or stage that supplied a record's final capacity.
///
/// Precedence: the mapping source when it is positive and differs from the
/// register, then the register, then whichever fill stage produced the value.
#[must_use]
pub fn provenance_of(record: &InstallationRecord) -> CapacityProvenance {
    let source_a = positive(record.capacity_source_a_mwp);
    let source_b = positive(record.capacity_source_b_mwp);

    if source_a.is_some() && record.capacity_source_a_mwp != record.capacity_source_b_mwp {
        CapacityProvenance::SourceA
    } else if source_b.is_some() {
        CapacityProvenance::SourceB
    } else if positive(record.capacity_merged_with_area_mwp).is_some()
        && positive(record.capacity_merged_mwp).is_none()
    {
        CapacityProvenance::AreaRegression
    } else if positive(record.capacity_merged_final_mwp).is_some()
        && positive(record.capacity_merged_with_area_mwp).is_none()
    {
        CapacityProvenance::FloorEstimate
    } else {
        CapacityProvenance::Unknown
    }
}

#[cfg(test)]
mod tests {
    use geo::{Geometry, Point, Rect};
    use pvgeo_installation_models::{AttributeRecord, Tags};

    use super::*;

    fn record(
        area_sqm: f64,
        source_a: Option<f64>,
        source_b: Option<f64>,
    ) -> InstallationRecord {
        let attributes = AttributeRecord {
            capacity_source_a_mwp: source_a,
            capacity_source_b_mwp: source_b,
            ..AttributeRecord::default()
        };
        let geometry: Geometry<f64> = if area_sqm > 0.0 {
            Rect::new((0.0, 0.0), (area_sqm, 1.0)).to_polygon().into()
        } else {
            Point::new(0.0, 0.0).into()
        };
        let mut record = InstallationRecord::from_attributes(attributes, geometry, None, Tags::new());
        record.area_sqm = area_sqm;
        record
    }

    #[test]
    fn first_positive_reports_the_supplying_candidate() {
        let picked = first_positive(&[("a", Some(0.0)), ("b", None), ("c", Some(2.5))]);
        assert_eq!(picked, Some((2.5, "c")));
        assert_eq!(first_positive::<&str>(&[("a", Some(-1.0))]), None);
    }

    #[test]
    fn perfect_proportional_fit() {
        let fit = fit_zero_intercept(&[(100.0, 0.01), (200.0, 0.02)]).unwrap();

        assert!((fit.slope - 0.0001).abs() < 1e-12);
        assert!((fit.slope_w_per_unit() - 100.0).abs() < 1e-6);
        assert!((fit.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(fit.samples, 2);
    }

    #[test]
    fn constant_targets_do_not_divide_by_zero() {
        let fit = fit_zero_intercept(&[(100.0, 0.01), (200.0, 0.01)]).unwrap();
        assert!(fit.r_squared.abs() < f64::EPSILON);
        assert!(fit.slope > 0.0);
    }

    #[test]
    fn fit_needs_samples() {
        assert!(fit_zero_intercept(&[]).is_none());
        assert!(fit_zero_intercept(&[(0.0, 1.0)]).is_none());
    }

    #[test]
    fn only_the_outline_gets_an_area_estimate() {
        let trainer = record(1000.0, Some(0.1), None);
        let mut inner = record(500.0, None, None);
        inner.is_contained = true;
        let outer = record(2000.0, None, None);

        let outcome =
            estimate_capacities(vec![trainer, inner, outer], &CapacityOptions::default()).unwrap();
        let [_, inner, outer] = outcome.records.as_slice() else {
            panic!("expected three records");
        };

        assert_eq!(inner.capacity_merged_with_area_mwp, None);
        assert_eq!(inner.capacity_merged_final_mwp, None);
        assert_eq!(inner.capacity_provenance, CapacityProvenance::Unknown);

        let estimate = outer.capacity_merged_with_area_mwp.unwrap();
        assert!((estimate - 0.2).abs() < 1e-9);
        assert_eq!(outer.capacity_provenance, CapacityProvenance::AreaRegression);
        assert_eq!(outcome.diagnostics.area_filled, 1);
    }

    #[test]
    fn stages_only_fill_gaps() {
        let records = vec![
            record(100.0, Some(0.01), None),
            record(200.0, None, Some(0.03)),
            record(300.0, None, None),
            record(0.0, None, None),
            record(0.0, Some(0.5), Some(0.5)),
        ];

        let outcome = estimate_capacities(records, &CapacityOptions::default()).unwrap();

        for r in &outcome.records {
            if let Some(merged) = r.capacity_merged_mwp {
                assert_eq!(r.capacity_merged_with_area_mwp, Some(merged));
                assert_eq!(r.capacity_merged_final_mwp, Some(merged));
            }
            assert!(
                r.capacity_merged_with_area_mwp.unwrap_or_default()
                    >= r.capacity_merged_mwp.unwrap_or_default()
            );
        }

        let provenance: Vec<_> = outcome
            .records
            .iter()
            .map(|r| r.capacity_provenance)
            .collect();
        assert_eq!(
            provenance,
            vec![
                CapacityProvenance::SourceA,
                CapacityProvenance::SourceB,
                CapacityProvenance::AreaRegression,
                CapacityProvenance::FloorEstimate,
                CapacityProvenance::SourceB,
            ]
        );
        assert_eq!(outcome.records[3].capacity_merged_final_mwp, Some(0.003));
    }

    #[test]
    fn no_training_rows_means_no_area_estimates() {
        let outcome = estimate_capacities(
            vec![record(500.0, None, None)],
            &CapacityOptions {
                floor_capacity_mwp: 0.005,
            },
        )
        .unwrap();

        assert!(outcome.diagnostics.area_fit.is_none());
        let only = &outcome.records[0];
        assert_eq!(only.capacity_merged_with_area_mwp, None);
        assert_eq!(only.capacity_merged_final_mwp, Some(0.005));
        assert_eq!(only.capacity_provenance, CapacityProvenance::FloorEstimate);
    }

    #[test]
    fn register_only_row_keeps_its_capacity() {
        let outcome = estimate_capacities(
            vec![record(0.0, None, Some(2.0)), record(0.0, None, Some(0.0))],
            &CapacityOptions::default(),
        )
        .unwrap();

        assert_eq!(outcome.records[0].capacity_provenance, CapacityProvenance::SourceB);
        assert_eq!(
            outcome.records[1].capacity_provenance,
            CapacityProvenance::FloorEstimate
        );
        assert_eq!(
            outcome.diagnostics.provenance_counts[&CapacityProvenance::SourceB],
            1
        );
    }

    #[test]
    fn slope_is_non_negative_for_non_negative_data() {
        let fit =
            fit_zero_intercept(&[(10.0, 0.0), (50.0, 0.004), (120.0, 0.02), (3.0, 0.0001)])
                .unwrap();
        assert!(fit.slope >= 0.0);
    }
}
